//! Expand a cluster descriptor into its machines and provision every node.

use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;

use machineup_cli::{init_tracing, CommonArgs};
use machineup_orchestrator::{cluster, StderrReport};

#[derive(Debug, Parser)]
#[command(name = "cluster-up", version, about = "Provision every node of a YAML cluster descriptor")]
struct Args {
    /// Cluster descriptor file.
    cluster_file: PathBuf,

    /// Nodes provisioned concurrently within a cluster; 1 keeps the strict
    /// sequential order.
    #[arg(long, default_value_t = 1)]
    parallel: usize,

    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("cluster-up: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let plans = cluster::load_plan(&args.cluster_file)?;
    if plans.is_empty() {
        bail!("cluster file declares no clusters");
    }

    let descriptor_region = plans
        .iter()
        .map(|plan| plan.machine.instance.region.clone())
        .find(|region| !region.is_empty())
        .unwrap_or_default();
    let region = args.common.effective_region(&descriptor_region)?;
    let provider = args.common.provider(&region)?;
    let settle = args.common.settle();

    let outcomes = cluster::provision(
        provider.as_ref(),
        &StderrReport,
        &settle,
        &plans,
        args.parallel,
        &args.common.workdir,
    )
    .await;

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 {
        bail!("{failed} of {} node(s) failed", outcomes.len());
    }
    Ok(())
}
