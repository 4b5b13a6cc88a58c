//! Test utilities for unit testing the reconciler
//!
//! Builders for test objects plus helpers that seed the mock store with a
//! ready owner chain.

use crate::config::ControllerConfig;
use crate::reconciler::Reconciler;
use crds::*;
use infra_client::{InfraClientTrait, MockInfraClient};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

pub const TEST_CLUSTER: &str = "test-cluster";

/// Helper to create a TinkerbellMachine owned by a CAPI Machine of the same name
pub fn create_test_tinkerbell_machine(name: &str, namespace: &str) -> TinkerbellMachine {
    TinkerbellMachine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-tm-{}", name)),
            labels: Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), TEST_CLUSTER.to_string())])),
            owner_references: Some(vec![OwnerReference {
                api_version: "cluster.x-k8s.io/v1beta1".to_string(),
                kind: "Machine".to_string(),
                name: name.to_string(),
                uid: format!("uid-machine-{}", name),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        spec: TinkerbellMachineSpec::default(),
        status: None,
    }
}

/// Helper to create a CAPI Machine with bootstrap data ready
pub fn create_test_machine(name: &str, namespace: &str) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: MachineSpec {
            cluster_name: TEST_CLUSTER.to_string(),
            bootstrap: Bootstrap {
                data_secret_name: Some(format!("{}-bootstrap", name)),
            },
            version: Some("v1.30.2".to_string()),
            infrastructure_ref: ObjectReference {
                api_version: Some(format!("{}/v1beta1", INFRASTRUCTURE_GROUP)),
                kind: Some("TinkerbellMachine".to_string()),
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
            },
        },
        status: None,
    }
}

/// Helper to create a CAPI Cluster whose infrastructure is ready
pub fn create_test_cluster(name: &str, namespace: &str) -> Cluster {
    Cluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: ClusterSpec {
            paused: false,
            infrastructure_ref: Some(ObjectReference {
                api_version: Some(format!("{}/v1beta1", INFRASTRUCTURE_GROUP)),
                kind: Some("TinkerbellCluster".to_string()),
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
            }),
        },
        status: Some(ClusterStatus {
            infrastructure_ready: true,
        }),
    }
}

/// Helper to create a TinkerbellCluster with default image lookup values
pub fn create_test_tinkerbell_cluster(name: &str, namespace: &str) -> TinkerbellCluster {
    TinkerbellCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: TinkerbellClusterSpec {
            control_plane_endpoint: ApiEndpoint {
                host: "10.0.0.100".to_string(),
                port: 6443,
            },
            ..Default::default()
        },
        status: None,
    }
}

/// Helper to create a bootstrap data secret
pub fn create_test_bootstrap_secret(name: &str, namespace: &str, data: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "value".to_string(),
            ByteString(data.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// Helper to create unowned Hardware with one interface and one disk
pub fn create_test_hardware(name: &str, namespace: &str, mac: &str, ip: Option<&str>) -> Hardware {
    Hardware {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: HardwareSpec {
            interfaces: vec![Interface {
                dhcp: Some(Dhcp {
                    mac: Some(mac.to_string()),
                    hostname: Some(name.to_string()),
                    ip: ip.map(|address| Ip {
                        address: address.to_string(),
                        netmask: Some("255.255.255.0".to_string()),
                        gateway: Some("10.0.0.1".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            disks: vec![Disk {
                device: "/dev/sda".to_string(),
            }],
            ..Default::default()
        },
        status: None,
    }
}

/// Helper to create Hardware with a BMC reference
pub fn create_test_hardware_with_bmc(name: &str, namespace: &str, mac: &str, ip: Option<&str>) -> Hardware {
    let mut hardware = create_test_hardware(name, namespace, mac, ip);
    hardware.spec.bmc_ref = Some(TypedLocalObjectReference::new(
        "bmc.tinkerbell.org",
        "Machine",
        format!("{}-bmc", name),
    ));
    hardware
}

/// Adds inventory fields the controller does not model to the primary interface
pub fn with_inventory_fields(mut hardware: Hardware) -> Hardware {
    if let Some(primary) = hardware.spec.interfaces.first_mut() {
        if let Some(dhcp) = primary.dhcp.as_mut() {
            dhcp.extra.insert("arch".to_string(), serde_json::json!("x86_64"));
            dhcp.extra.insert("lease_time".to_string(), serde_json::json!(86400));
        }
        let netboot = primary.netboot.get_or_insert_with(Netboot::default);
        netboot.extra.insert("ipxe".to_string(), serde_json::json!({ "url": "http://boot/auto.ipxe" }));
    }
    hardware
}

/// Asserts the fields added by `with_inventory_fields` are still present
pub fn assert_inventory_fields(hardware: &Hardware) {
    let primary = &hardware.spec.interfaces[0];
    let dhcp = primary.dhcp.as_ref().unwrap();
    assert_eq!(dhcp.extra.get("arch"), Some(&serde_json::json!("x86_64")));
    assert_eq!(dhcp.extra.get("lease_time"), Some(&serde_json::json!(86400)));
    assert_eq!(dhcp.uefi, None);
    let netboot = primary.netboot.as_ref().unwrap();
    assert_eq!(
        netboot.extra.get("ipxe"),
        Some(&serde_json::json!({ "url": "http://boot/auto.ipxe" }))
    );
}

/// Helper to create an IPAddress granted to a claim
pub fn create_test_ip_address(name: &str, namespace: &str, address: &str, prefix: i32) -> IPAddress {
    IPAddress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: IPAddressSpec {
            claim_ref: LocalObjectReference {
                name: format!("{}-claim", name),
            },
            pool_ref: test_pool_ref(),
            address: address.to_string(),
            prefix,
            gateway: Some("10.1.0.1".to_string()),
        },
    }
}

/// Pool reference used by IPAM tests
pub fn test_pool_ref() -> TypedLocalObjectReference {
    TypedLocalObjectReference::new("ipam.cluster.x-k8s.io", "InClusterIPPool", "pool")
}

/// Seeds the owner chain of `machine_name` (Machine, Cluster,
/// TinkerbellCluster and bootstrap secret) so every readiness gate passes.
pub fn setup_ready_owner(mock: &MockInfraClient, machine_name: &str, namespace: &str) {
    mock.add_machine(create_test_machine(machine_name, namespace));
    mock.add_cluster(create_test_cluster(TEST_CLUSTER, namespace));
    mock.add_tinkerbell_cluster(create_test_tinkerbell_cluster(TEST_CLUSTER, namespace));
    mock.add_secret(create_test_bootstrap_secret(
        &format!("{}-bootstrap", machine_name),
        namespace,
        "#cloud-config\n",
    ));
}

/// Reconciler over a shared mock store with default configuration
pub fn create_test_reconciler(mock: &MockInfraClient) -> Reconciler {
    Reconciler::new(mock.clone(), ControllerConfig::default())
}

/// Re-reads a machine from the mock store and runs one pass on it
pub async fn reconcile_stored(
    reconciler: &Reconciler,
    mock: &MockInfraClient,
    namespace: &str,
    name: &str,
) -> Result<kube_runtime::controller::Action, crate::error::ControllerError> {
    let machine = mock
        .get_tinkerbell_machine(namespace, name)
        .await?
        .ok_or_else(|| infra_client::InfraError::NotFound(format!("{}/{}", namespace, name)))?;
    reconciler.reconcile_tinkerbell_machine(&machine).await
}
