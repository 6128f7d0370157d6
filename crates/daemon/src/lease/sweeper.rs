// Expiry sweeper.
//
// Each tick evicts expired leases and warns once per lease term about the
// local identity's leases that are close to running out. A term is keyed by
// its `expires_at`, so extending or re-acquiring a lease re-arms the warning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tessera_common::lease::Lease;
use tokio::sync::watch;
use tracing::debug;

use super::events::LeaseEvent;
use super::manager::LeaseManager;
use crate::clock::Clock;
use crate::ledger::LedgerTransport;

/// What one sweep did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<Lease>,
    pub warned: Vec<Lease>,
}

pub struct ExpirySweeper<T: LedgerTransport, C: Clock> {
    manager: Arc<LeaseManager<T, C>>,
    /// Resource -> `expires_at` of the term already warned about.
    warned: HashMap<String, DateTime<Utc>>,
}

impl<T: LedgerTransport, C: Clock> ExpirySweeper<T, C> {
    pub fn new(manager: Arc<LeaseManager<T, C>>) -> Self {
        Self { manager, warned: HashMap::new() }
    }

    pub fn tick(&mut self) -> SweepReport {
        let expired = self.manager.evict_expired();

        let now = self.manager.now();
        let window = self.manager.config().lease.warning_window();
        let mine = self.manager.my_leases(self.manager.identity());

        // Forget terms that ended or were replaced.
        self.warned.retain(|resource, expires_at| {
            mine.iter().any(|lease| &lease.resource_id == resource && lease.expires_at == *expires_at)
        });

        let mut warned = Vec::new();
        for lease in mine {
            let remaining = lease.remaining_at(now);
            if remaining > window || self.warned.contains_key(&lease.resource_id) {
                continue;
            }
            self.warned.insert(lease.resource_id.clone(), lease.expires_at);
            self.manager.emit(LeaseEvent::ExpiringSoon {
                lease: lease.clone(),
                remaining_sec: remaining.num_seconds(),
            });
            warned.push(lease);
        }

        if !expired.is_empty() || !warned.is_empty() {
            debug!(expired = expired.len(), warned = warned.len(), "lease sweep");
        }
        SweepReport { expired, warned }
    }
}

/// Run the sweeper every `interval` until `shutdown` flips to true.
pub fn spawn_sweeper<T: LedgerTransport, C: Clock>(
    manager: Arc<LeaseManager<T, C>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sweeper = ExpirySweeper::new(manager);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    sweeper.tick();
                }
                _ = shutdown.changed() => {
                    debug!("expiry sweeper shutting down");
                    break;
                }
            }
        }
    })
}
