//! Prints the CRDs owned by this project as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/bases.yaml`

use crds::{TinkerbellCluster, TinkerbellMachine};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [TinkerbellMachine::crd(), TinkerbellCluster::crd()];
    for crd in crds {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
