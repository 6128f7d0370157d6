// tesserad: standalone lease daemon entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tessera_daemon::runtime::{run_standalone, DaemonOptions};
use tracing::info;

#[derive(Parser)]
#[command(name = "tesserad", version, about = "Tessera lease daemon")]
struct Args {
    /// Git working tree that carries the lease ledger
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Directory for the socket and PID file (default: ~/.tessera)
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    info!("starting tessera daemon");
    run_standalone(DaemonOptions { workspace_root: args.workspace, state_dir: args.state_dir })
        .await
        .context("daemon terminated unexpectedly")
}
