//! Desired-state descriptors, decoded from YAML machine and cluster files.
//!
//! Descriptors carry what the caller wants; the provider-observed state lives
//! in `machineup-providers` and is merged onto these structs by the
//! orchestrator's resolvers. Fields marked `#[serde(skip)]` are populated
//! from provider responses only.

use serde::{Deserialize, Serialize};

use crate::tags::Tag;

/// A block-storage volume. An empty `id` means the volume does not exist yet
/// and will be created; a non-empty `id` denotes an existing remote volume
/// that is loaded, never re-created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Volume {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub volume_type: String,
    /// Size in GiB; 0 lets the provider derive it (e.g. from a snapshot).
    pub size: i64,
    pub iops: i64,
    pub availability_zone: String,
    pub snapshot_id: String,
    /// Device path the volume is attached under, e.g. `/dev/xvdf`.
    pub device: String,
    /// Mount point inside the instance, e.g. `/data`.
    pub mount: String,
    pub file_system: String,
    pub tags: Vec<Tag>,
    /// Last provider-reported status.
    #[serde(skip)]
    pub status: String,
}

impl Volume {
    /// A volume is new, and its device unformatted, when it neither exists
    /// remotely nor originates from a snapshot.
    pub fn needs_format(&self) -> bool {
        self.id.is_empty() && self.snapshot_id.is_empty()
    }
}

/// A compute instance. Same get-or-create identifier convention as [`Volume`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Instance {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    pub image_id: String,
    pub region: String,
    pub key_name: String,
    pub security_groups: Vec<String>,
    pub subnet_id: String,
    pub availability_zone: String,
    /// Path to a user-data template rendered at creation time.
    pub cloud_config: String,
    pub ebs_optimized: bool,
    /// Provider shutdown behavior, `stop` or `terminate`; empty keeps the
    /// provider default.
    pub shutdown_behavior: String,
    pub enable_api_termination: bool,
    pub placement_group: String,
    pub tags: Vec<Tag>,
    /// Last provider-reported lifecycle state.
    #[serde(skip)]
    pub state: String,
    #[serde(skip)]
    pub private_ip: String,
    #[serde(skip)]
    pub public_ip: String,
}

/// One instance plus the volumes it owns. Volume availability zones are
/// forced to the instance's zone before resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Machine {
    pub instance: Instance,
    pub volumes: Vec<Volume>,
}

/// Cluster-level defaults cascaded onto every machine template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub image_id: String,
    pub region: String,
    pub key_name: String,
    pub security_groups: Vec<String>,
    pub subnet_id: String,
    pub availability_zone: String,
    pub tags: Vec<Tag>,
}

/// One cluster entry: a machine template replicated `nodes` times.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterEntry {
    /// Path to the machine descriptor file.
    pub machine: String,
    pub nodes: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterFile {
    pub default: Defaults,
    pub clusters: Vec<ClusterEntry>,
}
