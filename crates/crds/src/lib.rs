//! Tinkerbell machine CRD definitions
//!
//! Kubernetes resource types read and written by the Tinkerbell machine
//! controller: the infrastructure machine it owns, the Cluster API objects it
//! reads, and the Tinkerbell, BMC and IPAM objects it drives.

pub mod references;
pub mod tinkerbell_machine;
pub mod tinkerbell_cluster;
pub mod capi;
pub mod hardware;
pub mod workflow;
pub mod bmc_job;
pub mod ipam;

pub use references::*;
pub use tinkerbell_machine::*;
pub use tinkerbell_cluster::*;
pub use capi::*;
pub use hardware::*;
pub use workflow::*;
pub use bmc_job::*;
pub use ipam::*;
