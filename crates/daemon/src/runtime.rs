use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{GlobalConfig, WorkspaceConfig};
use crate::editor::EditCoordinator;
use crate::lease::{spawn_event_logger, spawn_reconcile_loop, spawn_sweeper, LeaseManager, ManagerConfig};
use crate::ledger::{GitLedger, LedgerTransport};
use crate::rpc::methods::RpcServerState;
use crate::rpc::unix::serve_unix_until_shutdown;
use crate::startup::{bind_socket, remove_pid_file, write_pid_file, DaemonPaths};

/// Where a standalone daemon finds its workspace and runtime files.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Git working tree that carries the ledger.
    pub workspace_root: PathBuf,
    /// Overrides `~/.tessera` for the socket and PID file.
    pub state_dir: Option<PathBuf>,
}

pub async fn run_standalone(options: DaemonOptions) -> Result<()> {
    let paths = match &options.state_dir {
        Some(dir) => DaemonPaths::under(dir)?,
        None => DaemonPaths::resolve()?,
    };

    let identity = GlobalConfig::load().identity();
    let workspace = WorkspaceConfig::load(&options.workspace_root);
    workspace.validate().context("invalid workspace configuration")?;

    let ledger =
        GitLedger::new(&options.workspace_root, &workspace.git.remote, &workspace.git.branch);
    let manager = Arc::new(LeaseManager::new(
        ledger,
        SystemClock,
        ManagerConfig::from_workspace(identity, &workspace),
    ));

    info!(
        identity = manager.identity(),
        workspace = %options.workspace_root.display(),
        remote = %workspace.git.remote,
        branch = %workspace.git.branch,
        "standalone daemon starting"
    );

    let (shutdown_tx, _) = broadcast::channel(4);
    let ctrl_c_tx = shutdown_tx.clone();
    let ctrl_c = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = ctrl_c_tx.send(());
    });

    let result = run_daemon(manager, &workspace, paths, shutdown_tx).await;
    ctrl_c.abort();
    result.context("standalone daemon exited with error")
}

/// Serve lease RPCs on the daemon socket until `shutdown_tx` fires, either
/// from outside or through `daemon.shutdown`.
///
/// Background tasks (event logger, expiry sweeper and periodic reconcile)
/// live exactly as long as the server. On the way out every lease held by
/// this participant is released so peers are not kept waiting for expiry.
pub async fn run_daemon<T: LedgerTransport, C: Clock>(
    manager: Arc<LeaseManager<T, C>>,
    workspace: &WorkspaceConfig,
    paths: DaemonPaths,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<()> {
    let listener = bind_socket(&paths.socket_path).await?;
    write_pid_file(&paths.pid_path)?;
    let shutdown_rx = shutdown_tx.subscribe();

    let logger = spawn_event_logger(manager.subscribe());

    match manager.force_reconcile().await {
        Ok(report) => info!(active = report.active, "initial reconcile complete"),
        Err(error) => warn!(error = %error, "initial reconcile failed, starting with empty table"),
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let sweeper =
        spawn_sweeper(Arc::clone(&manager), workspace.lease.sweep_interval(), stop_rx.clone());
    let reconciler = workspace
        .sync
        .reconcile_interval()
        .map(|interval| spawn_reconcile_loop(Arc::clone(&manager), interval, stop_rx));

    let editor = Arc::new(EditCoordinator::new(Arc::clone(&manager), workspace.lease.on_conflict));
    let state = RpcServerState::new(Arc::clone(&manager), editor).with_shutdown_notifier(shutdown_tx);

    info!(socket_path = %paths.socket_path.display(), "daemon ready");
    let result = serve_unix_until_shutdown(listener, state, shutdown_rx).await;

    let _ = stop_tx.send(true);
    let _ = sweeper.await;
    if let Some(reconciler) = reconciler {
        let _ = reconciler.await;
    }

    let report = manager.release_all(manager.identity()).await;
    if report.failed.is_empty() {
        info!(released = report.released.len(), "released leases on shutdown");
    } else {
        warn!(
            released = report.released.len(),
            failed = ?report.failed,
            "some leases could not be released, peers will reclaim them on expiry"
        );
    }

    logger.abort();
    cleanup_paths(&paths);
    result
}

fn cleanup_paths(paths: &DaemonPaths) {
    if let Err(error) = std::fs::remove_file(&paths.socket_path) {
        if error.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %error, "failed to remove daemon socket");
        }
    }
    remove_pid_file(&paths.pid_path);
}
