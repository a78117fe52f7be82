//! Abstract cloud provider capability consumed by the orchestrator.
//!
//! Implementations normalize their native status strings to the canonical
//! vocabulary in [`state`] and their "volume already attached" failures to
//! the [`codes::VOLUME_IN_USE`] error code, so the orchestrator stays
//! provider-agnostic.

use async_trait::async_trait;
use thiserror::Error;

use machineup_common::tags::Tag;

pub mod mock;
pub mod scaleway;

/// Canonical resource status strings reported by [`CloudProvider`]
/// implementations and consumed by the orchestrator's poll loop.
pub mod state {
    pub const VOLUME_CREATING: &str = "creating";
    pub const VOLUME_AVAILABLE: &str = "available";
    pub const VOLUME_IN_USE: &str = "in-use";

    pub const INSTANCE_PENDING: &str = "pending";
    pub const INSTANCE_RUNNING: &str = "running";
    pub const INSTANCE_SHUTTING_DOWN: &str = "shutting-down";
    pub const INSTANCE_STOPPED: &str = "stopped";
    pub const INSTANCE_TERMINATED: &str = "terminated";
}

/// Canonical provider error codes.
pub mod codes {
    /// Attaching a volume that is already attached; callers treat this as an
    /// idempotent no-op.
    pub const VOLUME_IN_USE: &str = "VolumeInUse";
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected the request. `code` is empty when the provider
    /// gave none.
    #[error("{message}")]
    Api { code: String, message: String },
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Provider error code, if the failure carried one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } if !code.is_empty() => Some(code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateVolumeRequest {
    pub volume_type: String,
    /// Omitted when the size should be derived (e.g. from a snapshot).
    pub size_gib: Option<i64>,
    pub availability_zone: String,
    pub snapshot_id: Option<String>,
    /// Provisioned IOPS; only set for volume types that take it.
    pub iops: Option<i64>,
}

/// Observed volume state, merged onto the descriptor by the resolver.
#[derive(Debug, Clone, Default)]
pub struct VolumeInfo {
    pub id: String,
    pub volume_type: String,
    pub size_gib: i64,
    pub iops: i64,
    pub availability_zone: String,
    pub snapshot_id: String,
    pub status: String,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateInstanceRequest {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group_ids: Vec<String>,
    pub subnet_id: String,
    pub availability_zone: String,
    pub ebs_optimized: bool,
    pub disable_api_termination: bool,
    /// `stop` or `terminate`; `None` keeps the provider default.
    pub shutdown_behavior: Option<String>,
    pub placement_group: Option<String>,
    /// Rendered boot-time user data.
    pub user_data: Option<String>,
}

/// Observed instance state, merged onto the descriptor by the resolver.
#[derive(Debug, Clone, Default)]
pub struct InstanceInfo {
    pub id: String,
    pub instance_type: String,
    pub image_id: String,
    pub key_name: String,
    pub security_group_ids: Vec<String>,
    pub subnet_id: String,
    pub availability_zone: String,
    pub ebs_optimized: bool,
    pub state: String,
    pub private_ip: String,
    pub public_ip: String,
    pub tags: Vec<Tag>,
}

#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Region this provider handle is bound to.
    fn region(&self) -> &str;

    async fn create_volume(
        &self,
        request: &CreateVolumeRequest,
    ) -> Result<VolumeInfo, ProviderError>;

    /// `Ok(None)` when no volume with that id exists.
    async fn describe_volume(&self, volume_id: &str) -> Result<Option<VolumeInfo>, ProviderError>;

    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> Result<InstanceInfo, ProviderError>;

    /// `Ok(None)` when no instance with that id exists.
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceInfo>, ProviderError>;

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<(), ProviderError>;

    async fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> Result<(), ProviderError>;

    async fn reboot_instance(&self, instance_id: &str) -> Result<(), ProviderError>;

    async fn terminate_instance(&self, instance_id: &str) -> Result<(), ProviderError>;
}
