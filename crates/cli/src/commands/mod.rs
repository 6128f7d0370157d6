// CLI subcommand dispatch.

use std::future::Future;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand};

use crate::client::DaemonClient;
use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

pub mod extend;
pub mod mine;
pub mod release;
pub mod reserve;
pub mod show;
pub mod sync;

#[derive(Subcommand)]
pub enum Command {
    /// Reserve a resource for exclusive editing
    Reserve(reserve::ReserveArgs),
    /// Start a fresh term on a lease you hold
    Extend(extend::ExtendArgs),
    /// Give up a lease (or all of them with --all)
    Release(release::ReleaseArgs),
    /// Show who holds a resource
    Show(show::ShowArgs),
    /// List your active leases
    Mine(mine::MineArgs),
    /// Rebuild the daemon's lease table from the ledger now
    Sync(sync::SyncArgs),
}

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,

    /// Daemon socket (default: ~/.tessera/daemon.sock).
    #[arg(long, env = "TESSERA_SOCKET")]
    pub socket: Option<PathBuf>,
}

impl CommonArgs {
    pub fn format(&self) -> OutputFormat {
        OutputFormat::detect(self.json)
    }

    pub fn client(&self) -> DaemonClient {
        DaemonClient::for_socket(self.socket.clone())
    }
}

pub fn run(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Reserve(args) => reserve::run(args),
        Command::Extend(args) => extend::run(args),
        Command::Release(args) => release::run(args),
        Command::Show(args) => show::run(args),
        Command::Mine(args) => mine::run(args),
        Command::Sync(args) => sync::run(args),
    }
}

/// Drive one daemon call to completion, printing a mapped error on failure.
pub(crate) fn call_daemon<T, Fut>(format: OutputFormat, call: Fut) -> anyhow::Result<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
        .and_then(|runtime| runtime.block_on(call));

    if let Err(error) = &result {
        output::print_anyhow_error(format, error);
    }
    result
}
