//! Bring a single declared machine (one instance plus its volumes) into
//! conformance with its descriptor file.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use machineup_cli::{init_tracing, CommonArgs};
use machineup_common::config;
use machineup_orchestrator::{machine, StderrReport};

#[derive(Debug, Parser)]
#[command(name = "machine-up", version, about = "Provision one machine from a YAML descriptor")]
struct Args {
    /// Machine descriptor file.
    machine_file: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("machine-up: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let mut machine =
        config::load_machine(&args.machine_file).context("loading machine descriptor")?;
    if machine.instance.availability_zone.is_empty() {
        anyhow::bail!("cannot create machine, instance.availability_zone is missing");
    }

    let region = args.common.effective_region(&machine.instance.region)?;
    let provider = args.common.provider(&region)?;
    let settle = args.common.settle();

    machine::converge(
        provider.as_ref(),
        &StderrReport,
        &settle,
        &mut machine,
        &args.common.workdir,
    )
    .await?;

    println!(
        "Machine Id <{}>, IP Address <{}>",
        machine.instance.id, machine.instance.private_ip
    );
    Ok(())
}
