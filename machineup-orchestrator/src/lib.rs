//! Resource provisioning orchestrator: brings remote instances and volumes
//! into conformance with declarative machine and cluster descriptors.
//!
//! One invocation is a single sequential reconciliation pass: volumes are
//! resolved (get-or-create), freshly created ones are formatted through a
//! disposable bootstrap instance, the instance is resolved, volumes attached
//! and the instance rebooted. There is no teardown and no rollback; the
//! remote provider is the only durable store.

pub mod cluster;
pub mod error;
pub mod format;
pub mod instances;
pub mod machine;
pub mod report;
pub mod settle;
pub mod volumes;

pub use error::ProvisionError;
pub use report::{Report, SilentReport, StderrReport};
pub use settle::Settle;
