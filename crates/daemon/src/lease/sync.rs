// Periodic reconciliation against the ledger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::manager::LeaseManager;
use crate::clock::Clock;
use crate::ledger::LedgerTransport;

/// Reconcile every `interval` until `shutdown` flips to true.
///
/// A failed pass is logged and the table kept; the next tick tries again.
pub fn spawn_reconcile_loop<T: LedgerTransport, C: Clock>(
    manager: Arc<LeaseManager<T, C>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(error) = manager.force_reconcile().await {
                        warn!(error = %error, "periodic reconcile failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("reconcile loop shutting down");
                    break;
                }
            }
        }
    })
}
