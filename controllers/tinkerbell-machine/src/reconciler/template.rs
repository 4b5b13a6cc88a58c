//! Default provisioning template.
//!
//! When a machine has no `templateOverride`, the Template data is rendered
//! here: stream the OS image to the first disk, write the cloud-init
//! datasource config, then reboot into the installed system.

use crate::error::ControllerError;
use crds::{Hardware, TinkerbellCluster, TinkerbellMachine};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_IMAGE_LOOKUP_FORMAT: &str =
    "{{.BaseRegistry}}/{{.OSDistro}}-{{.OSVersion}}-kube-{{.KubernetesVersion}}.raw.gz";
pub const DEFAULT_IMAGE_LOOKUP_BASE_REGISTRY: &str = "ghcr.io/tinkerbell/cluster-api-provider-tinkerbell";
pub const DEFAULT_IMAGE_LOOKUP_OS_DISTRO: &str = "ubuntu";
pub const DEFAULT_IMAGE_LOOKUP_OS_VERSION: &str = "20.04";

const IMAGE2DISK_ACTION: &str = "quay.io/tinkerbell-actions/image2disk:v1.0.0";
const WRITEFILE_ACTION: &str = "quay.io/tinkerbell-actions/writefile:v1.0.0";
const REBOOT_ACTION: &str = "ghcr.io/jacobweinstock/waitdaemon:0.2.0";
const CLOUD_INIT_PATH: &str = "/etc/cloud/cloud.cfg.d/10_tinkerbell.cfg";
const DS_IDENTIFY_PATH: &str = "/etc/cloud/ds-identify.cfg";

/// Resolved image lookup parameters
///
/// Machine-level values win over cluster-level ones, which win over the
/// built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLookup {
    pub format: String,
    pub base_registry: String,
    pub os_distro: String,
    pub os_version: String,
    pub kubernetes_version: String,
}

fn pick(machine: Option<&String>, cluster: Option<&String>, default: &str) -> String {
    machine
        .filter(|v| !v.is_empty())
        .or(cluster.filter(|v| !v.is_empty()))
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

impl ImageLookup {
    /// Merge machine, cluster and default image lookup values
    pub fn resolve(
        machine: &TinkerbellMachine,
        cluster: Option<&TinkerbellCluster>,
        kubernetes_version: Option<&str>,
    ) -> Self {
        let m = &machine.spec;
        let c = cluster.map(|c| &c.spec);
        Self {
            format: pick(
                m.image_lookup_format.as_ref(),
                c.and_then(|c| c.image_lookup_format.as_ref()),
                DEFAULT_IMAGE_LOOKUP_FORMAT,
            ),
            base_registry: pick(
                m.image_lookup_base_registry.as_ref(),
                c.and_then(|c| c.image_lookup_base_registry.as_ref()),
                DEFAULT_IMAGE_LOOKUP_BASE_REGISTRY,
            ),
            os_distro: pick(
                m.image_lookup_os_distro.as_ref(),
                c.and_then(|c| c.image_lookup_os_distro.as_ref()),
                DEFAULT_IMAGE_LOOKUP_OS_DISTRO,
            ),
            os_version: pick(
                m.image_lookup_os_version.as_ref(),
                c.and_then(|c| c.image_lookup_os_version.as_ref()),
                DEFAULT_IMAGE_LOOKUP_OS_VERSION,
            ),
            kubernetes_version: kubernetes_version.unwrap_or_default().to_string(),
        }
    }

    /// Substitutes the lookup values into the format string.
    ///
    /// The distro is lower-cased and dots are dropped from the OS version,
    /// so `Ubuntu` / `20.04` become `ubuntu-2004`.
    pub fn image_url(&self) -> String {
        self.format
            .replace("{{.BaseRegistry}}", self.base_registry.trim_end_matches('/'))
            .replace("{{.OSDistro}}", &self.os_distro.to_lowercase())
            .replace("{{.OSVersion}}", &self.os_version.replace('.', ""))
            .replace("{{.KubernetesVersion}}", &self.kubernetes_version)
    }
}

#[derive(Debug, Serialize)]
struct TemplateDocument {
    version: &'static str,
    name: String,
    global_timeout: u32,
    tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
struct Task {
    name: String,
    worker: &'static str,
    volumes: Vec<&'static str>,
    actions: Vec<TaskAction>,
}

#[derive(Debug, Serialize)]
struct TaskAction {
    name: &'static str,
    image: &'static str,
    timeout: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<&'static str>,
    environment: BTreeMap<&'static str, String>,
}

/// First partition of a disk device (`/dev/sda` -> `/dev/sda1`, `/dev/nvme0n1` -> `/dev/nvme0n1p1`)
pub fn first_partition(disk: &str) -> String {
    if disk.starts_with("/dev/nvme") || disk.starts_with("/dev/mmcblk") {
        format!("{}p1", disk)
    } else {
        format!("{}1", disk)
    }
}

fn cloud_init_config(metadata_url: &str) -> String {
    format!(
        "datasource:\n  Ec2:\n    metadata_urls: [\"{}\"]\n    strict_id: false\nmanage_etc_hosts: localhost\nwarnings:\n  dsid_missing_source: off\n",
        metadata_url
    )
}

fn file_environment(disk: &str, path: &str, contents: String) -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        ("DEST_DISK", first_partition(disk)),
        ("FS_TYPE", "ext4".to_string()),
        ("DEST_PATH", path.to_string()),
        ("UID", "0".to_string()),
        ("GID", "0".to_string()),
        ("MODE", "0600".to_string()),
        ("DIRMODE", "0700".to_string()),
        ("CONTENTS", contents),
    ])
}

/// Renders the default Template data for a machine on `hardware`.
pub fn render_default_template(
    machine_name: &str,
    hardware: &Hardware,
    image_url: &str,
    metadata_url: &str,
) -> Result<String, ControllerError> {
    let disk = hardware
        .spec
        .disks
        .iter()
        .map(|d| d.device.as_str())
        .find(|d| !d.is_empty())
        .ok_or_else(|| ControllerError::InvalidHardware(format!("{}: no disks", machine_name)))?;

    let document = TemplateDocument {
        version: "0.1",
        name: machine_name.to_string(),
        global_timeout: 6000,
        tasks: vec![Task {
            name: machine_name.to_string(),
            worker: "{{.device_1}}",
            volumes: vec![
                "/dev:/dev",
                "/dev/console:/dev/console",
                "/lib/firmware:/lib/firmware:ro",
            ],
            actions: vec![
                TaskAction {
                    name: "stream-image",
                    image: IMAGE2DISK_ACTION,
                    timeout: 600,
                    pid: None,
                    environment: BTreeMap::from([
                        ("DEST_DISK", disk.to_string()),
                        ("IMG_URL", image_url.to_string()),
                        ("COMPRESSED", "true".to_string()),
                    ]),
                },
                TaskAction {
                    name: "add-cloud-init-config",
                    image: WRITEFILE_ACTION,
                    timeout: 90,
                    pid: None,
                    environment: file_environment(disk, CLOUD_INIT_PATH, cloud_init_config(metadata_url)),
                },
                TaskAction {
                    name: "add-cloud-init-ds-config",
                    image: WRITEFILE_ACTION,
                    timeout: 90,
                    pid: None,
                    environment: file_environment(disk, DS_IDENTIFY_PATH, "datasource: Ec2\n".to_string()),
                },
                TaskAction {
                    name: "reboot",
                    image: REBOOT_ACTION,
                    timeout: 90,
                    pid: Some("host"),
                    environment: BTreeMap::from([
                        ("IMAGE", "alpine".to_string()),
                        ("WAIT_SECONDS", "10".to_string()),
                    ]),
                },
            ],
        }],
    };

    Ok(serde_yaml::to_string(&document)?)
}
