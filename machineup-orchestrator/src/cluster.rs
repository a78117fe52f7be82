//! Cluster expansion: replicate machine templates across N nodes and drive
//! the per-machine orchestrator over them.

use std::fs;
use std::path::Path;

use futures_util::stream::{self, StreamExt};

use machineup_common::cluster::{apply_defaults, expand_node};
use machineup_common::config;
use machineup_common::descriptor::Machine;
use machineup_providers::CloudProvider;

use crate::error::ProvisionError;
use crate::report::{Report, SilentReport};
use crate::settle::Settle;

/// One cluster entry with its template fully loaded and defaults cascaded.
#[derive(Debug, Clone)]
pub struct ClusterPlan {
    pub machine: Machine,
    pub nodes: u32,
}

/// Result of provisioning a single node. Failures are collected per node; a
/// failed node never undoes or blocks its siblings.
#[derive(Debug)]
pub struct NodeOutcome {
    pub name: String,
    pub instance_id: String,
    pub address: String,
    pub result: Result<(), ProvisionError>,
}

/// Read the cluster file and every referenced machine template, verify
/// user-data templates exist, and cascade the cluster defaults. All of this
/// happens before the first provider call so misconfiguration fails fast.
pub fn load_plan(path: &Path) -> Result<Vec<ClusterPlan>, ProvisionError> {
    let file = config::load_cluster(path)?;
    let mut plans = Vec::with_capacity(file.clusters.len());
    for entry in &file.clusters {
        let mut machine = config::load_machine(Path::new(&entry.machine))?;
        if !machine.instance.cloud_config.is_empty() {
            fs::metadata(&machine.instance.cloud_config).map_err(|err| {
                ProvisionError::Configuration(format!(
                    "user-data template <{}>: {err}",
                    machine.instance.cloud_config
                ))
            })?;
        }
        apply_defaults(&mut machine, &file.default);
        plans.push(ClusterPlan {
            machine,
            nodes: entry.nodes,
        });
    }
    Ok(plans)
}

/// Provision every node of every cluster entry. Nodes are expanded from the
/// template with `-<n>` name suffixes and run through the machine
/// orchestrator with up to `parallelism` nodes in flight (1 = strictly
/// sequential, in order). Per-machine progress is silenced; this layer
/// reports one summary line per node.
pub async fn provision(
    provider: &dyn CloudProvider,
    report: &dyn Report,
    settle: &Settle,
    plans: &[ClusterPlan],
    parallelism: usize,
    workdir: &Path,
) -> Vec<NodeOutcome> {
    let mut outcomes = Vec::new();
    for (index, plan) in plans.iter().enumerate() {
        report.line(&format!(
            "================ Running machines of {}. cluster ================",
            index + 1
        ));

        let nodes: Vec<Machine> = (1..=plan.nodes).map(|i| expand_node(&plan.machine, i)).collect();
        let mut results: Vec<NodeOutcome> = stream::iter(nodes.into_iter().map(|mut node| async move {
            report.line(&format!("Running machine: {}", node.instance.name));
            let result =
                crate::machine::converge(provider, &SilentReport, settle, &mut node, workdir).await;
            NodeOutcome {
                name: node.instance.name.clone(),
                instance_id: node.instance.id.clone(),
                address: node.instance.private_ip.clone(),
                result,
            }
        }))
        .buffered(parallelism.max(1))
        .collect()
        .await;

        for outcome in &results {
            match &outcome.result {
                Ok(()) => report.line(&format!(
                    "Machine Id <{}>, IP Address <{}>",
                    outcome.instance_id, outcome.address
                )),
                Err(err) => report.line(&format!("Machine {} failed: {err}", outcome.name)),
            }
        }
        outcomes.append(&mut results);
    }
    report.line("================================================================");
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use machineup_common::descriptor::{Instance, Volume};
    use machineup_providers::mock::MockProvider;
    use std::path::PathBuf;
    use std::time::Duration;

    fn fast() -> Settle {
        Settle::bounded(Duration::from_millis(1), Duration::from_secs(1))
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("machineup-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn template() -> Machine {
        Machine {
            instance: Instance {
                name: "web".into(),
                instance_type: "t2.small".into(),
                image_id: "img-1234".into(),
                availability_zone: "us-west-2a".into(),
                ..Instance::default()
            },
            volumes: vec![Volume {
                name: "web-data".into(),
                snapshot_id: "snap-1".into(),
                device: "/dev/xvdf".into(),
                mount: "/data".into(),
                file_system: "ext4".into(),
                ..Volume::default()
            }],
        }
    }

    #[tokio::test]
    async fn every_node_is_provisioned_with_suffixed_names() {
        let provider = MockProvider::new("us-west-2");
        let plans = vec![ClusterPlan {
            machine: template(),
            nodes: 3,
        }];

        let outcomes = provision(&provider, &SilentReport, &fast(), &plans, 1, &tempdir()).await;

        assert_eq!(outcomes.len(), 3);
        let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["web-1", "web-2", "web-3"]);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert!(outcomes.iter().all(|o| o.instance_id.starts_with("i-")));
    }

    #[tokio::test]
    async fn a_failing_node_does_not_abort_its_siblings() {
        let provider = MockProvider::new("us-west-2");
        provider.fail_next("CreateInstance", "InsufficientCapacity", "no room");
        let plans = vec![ClusterPlan {
            machine: template(),
            nodes: 2,
        }];

        let outcomes = provision(&provider, &SilentReport, &fast(), &plans, 1, &tempdir()).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_err());
        assert!(outcomes[1].result.is_ok());
    }

    #[test]
    fn load_plan_cascades_defaults_onto_templates() {
        let dir = tempdir();
        let machine_path = dir.join("web.yml");
        fs::write(
            &machine_path,
            "instance:\n  name: web\n  type: t2.small\n",
        )
        .unwrap();
        let cluster_path = dir.join("cluster.yml");
        fs::write(
            &cluster_path,
            format!(
                "default:\n  image_id: img-1234\n  region: us-west-2\n  availability_zone: us-west-2a\n  tags:\n    - key: env\n      value: prod\nclusters:\n  - machine: {}\n    nodes: 2\n",
                machine_path.display()
            ),
        )
        .unwrap();

        let plans = load_plan(&cluster_path).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].nodes, 2);
        assert_eq!(plans[0].machine.instance.image_id, "img-1234");
        assert_eq!(plans[0].machine.instance.availability_zone, "us-west-2a");
        assert_eq!(plans[0].machine.instance.tags[0].key, "env");
    }

    #[test]
    fn load_plan_fails_fast_on_missing_user_data_template() {
        let dir = tempdir();
        let machine_path = dir.join("web.yml");
        fs::write(
            &machine_path,
            "instance:\n  name: web\n  cloud_config: /nonexistent/user-data.yml\n",
        )
        .unwrap();
        let cluster_path = dir.join("cluster.yml");
        fs::write(
            &cluster_path,
            format!("clusters:\n  - machine: {}\n    nodes: 1\n", machine_path.display()),
        )
        .unwrap();

        let err = load_plan(&cluster_path).unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration(_)));
    }
}
