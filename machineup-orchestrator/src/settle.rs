//! Poll-until-state: the only synchronization primitive in a provisioning
//! pass.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::ProvisionError;
use crate::report::Report;

/// Wait policy for [`converge`]. The production default re-reads every two
/// seconds and waits forever, which is appropriate for provisioning state
/// transitions that settle within seconds to low minutes; tests and cautious
/// callers inject a deadline.
#[derive(Debug, Clone)]
pub struct Settle {
    pub interval: Duration,
    pub deadline: Option<Duration>,
}

impl Default for Settle {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: None,
        }
    }
}

impl Settle {
    pub fn bounded(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval,
            deadline: Some(deadline),
        }
    }
}

/// A resource whose remote status can be re-read into its descriptor.
#[async_trait]
pub trait Refresh: Send {
    /// Subject for progress lines, e.g. `Volume status`.
    fn label(&self) -> String;

    /// Last status merged into the descriptor.
    fn last(&self) -> &str;

    /// Re-load the resource from the provider and update the descriptor.
    async fn refresh(&mut self) -> Result<(), ProvisionError>;
}

/// Block until the watched resource's status equals `target` (exact,
/// case-sensitive match). The current status is checked before any provider
/// call, and no further calls are made once it matches. Any load error
/// aborts; with no deadline configured a resource stuck outside the target
/// state blocks forever.
pub async fn converge<W: Refresh>(
    settle: &Settle,
    report: &dyn Report,
    watch: &mut W,
    target: &str,
) -> Result<(), ProvisionError> {
    report.fragment(&format!(
        "{} is <{}>, waiting for <{}>",
        watch.label(),
        watch.last(),
        target
    ));
    let started = Instant::now();
    loop {
        report.fragment(".");
        if watch.last() == target {
            report.fragment(" [OK]\n");
            return Ok(());
        }
        if let Some(deadline) = settle.deadline {
            if started.elapsed() >= deadline {
                report.fragment(" [TIMEOUT]\n");
                return Err(ProvisionError::Timeout {
                    resource: watch.label(),
                    target: target.to_string(),
                    waited: started.elapsed(),
                });
            }
        }
        tokio::time::sleep(settle.interval).await;
        if let Err(err) = watch.refresh().await {
            report.fragment(" [ERROR]\n");
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemoryReport;
    use std::collections::VecDeque;

    struct Scripted {
        current: String,
        upcoming: VecDeque<String>,
        refreshes: usize,
    }

    impl Scripted {
        fn new(current: &str, upcoming: &[&str]) -> Self {
            Self {
                current: current.to_string(),
                upcoming: upcoming.iter().map(|s| s.to_string()).collect(),
                refreshes: 0,
            }
        }
    }

    #[async_trait]
    impl Refresh for Scripted {
        fn label(&self) -> String {
            "Volume status".to_string()
        }

        fn last(&self) -> &str {
            &self.current
        }

        async fn refresh(&mut self) -> Result<(), ProvisionError> {
            self.refreshes += 1;
            if let Some(next) = self.upcoming.pop_front() {
                self.current = next;
            }
            Ok(())
        }
    }

    fn fast() -> Settle {
        Settle::bounded(Duration::from_millis(1), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn already_settled_makes_no_provider_calls() {
        let mut watch = Scripted::new("available", &[]);
        converge(&fast(), &MemoryReport::default(), &mut watch, "available")
            .await
            .unwrap();
        assert_eq!(watch.refreshes, 0);
    }

    #[tokio::test]
    async fn stops_refreshing_the_moment_the_target_is_reached() {
        let mut watch = Scripted::new("creating", &["creating", "available", "available"]);
        let report = MemoryReport::default();
        converge(&fast(), &report, &mut watch, "available")
            .await
            .unwrap();
        assert_eq!(watch.refreshes, 2);
        assert_eq!(
            report.contents(),
            vec!["Volume status is <creating>, waiting for <available>... [OK]"]
        );
    }

    #[tokio::test]
    async fn deadline_turns_into_timeout_error() {
        let mut watch = Scripted::new("creating", &[]);
        let settle = Settle::bounded(Duration::from_millis(1), Duration::from_millis(5));
        let err = converge(&settle, &MemoryReport::default(), &mut watch, "available")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Timeout { .. }));
    }
}
