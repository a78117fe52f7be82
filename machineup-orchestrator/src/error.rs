use std::time::Duration;

use thiserror::Error;

use machineup_common::config::ConfigError;
use machineup_providers::ProviderError;

/// Everything that can abort a provisioning pass.
///
/// No step recovers locally except the documented idempotent attach case;
/// any of these aborts the current machine immediately. `PartialState` marks
/// the nasty class: the resource exists remotely but a dependent step failed
/// after creation, and nothing cleans it up.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Missing or invalid descriptor input, unreadable template or
    /// boot-config file. Detected before any remote mutation where possible.
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("{kind} <{id}> not found")]
    NotFound { kind: &'static str, id: String },

    #[error("provider request failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("{resource} <{id}> left in inconsistent remote state, {step} failed: {source}")]
    PartialState {
        resource: &'static str,
        id: String,
        step: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("gave up after {waited:?} waiting for {resource} to reach <{target}>")]
    Timeout {
        resource: String,
        target: String,
        waited: Duration,
    },
}

impl From<ConfigError> for ProvisionError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
