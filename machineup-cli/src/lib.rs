//! Shared glue for the machine-up and cluster-up binaries: flags, provider
//! selection and logging setup.

pub mod credentials;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;

use machineup_orchestrator::Settle;
use machineup_providers::mock::MockProvider;
use machineup_providers::scaleway::ScalewayProvider;
use machineup_providers::CloudProvider;

/// Flags shared by both binaries.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Provider backend: scaleway, or mock for a local dry run.
    #[arg(long, env = "PROVIDER", default_value = "scaleway")]
    pub provider: String,

    /// Access key; falls back to the environment, then the credentials file.
    #[arg(long)]
    pub access_key: Option<String>,

    /// Secret key; falls back to the environment, then the credentials file.
    #[arg(long)]
    pub secret_key: Option<String>,

    /// Region override when the descriptor does not pin one.
    #[arg(long)]
    pub region: Option<String>,

    /// Working directory for generated boot-configuration files.
    #[arg(long, default_value = "cloud-config")]
    pub workdir: PathBuf,

    /// Bound, in seconds, on each state poll; by default polls wait forever.
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

impl CommonArgs {
    pub fn settle(&self) -> Settle {
        match self.deadline_secs {
            Some(secs) => Settle {
                deadline: Some(Duration::from_secs(secs)),
                ..Settle::default()
            },
            None => Settle::default(),
        }
    }

    /// Descriptor region wins; the flag is the fallback.
    pub fn effective_region(&self, descriptor_region: &str) -> Result<String> {
        if !descriptor_region.is_empty() {
            return Ok(descriptor_region.to_string());
        }
        if let Some(region) = &self.region {
            return Ok(region.clone());
        }
        bail!("no region configured: set instance.region in the descriptor or pass --region");
    }

    pub fn provider(&self, region: &str) -> Result<Box<dyn CloudProvider>> {
        match self.provider.to_lowercase().as_str() {
            "mock" => Ok(Box::new(MockProvider::new(region))),
            "scaleway" => {
                let credentials =
                    credentials::resolve(self.access_key.as_deref(), self.secret_key.as_deref())?;
                Ok(Box::new(ScalewayProvider::new(
                    credentials.access_key,
                    credentials.secret_key,
                    region.to_string(),
                )))
            }
            other => bail!("unknown provider <{other}>"),
        }
    }
}

/// Process-wide tracing setup; call once at startup. Progress lines go
/// through the orchestrator's reporter, this only carries diagnostics.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();
}
