// Lease lifecycle notifications.
//
// The manager and sweeper broadcast these; the daemon logs them and an
// editing surface may subscribe to drive its own notifications.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tessera_common::lease::Lease;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LeaseEvent {
    Reserved { lease: Lease },
    Extended { lease: Lease },
    Released { lease: Lease },
    /// A reservation was refused because `holder` has the resource.
    Denied { resource_id: String, holder: String, expires_at: DateTime<Utc> },
    /// Reconciliation found that a local lease no longer stands.
    Lost { lease: Lease },
    /// One of the local identity's leases is about to run out.
    ExpiringSoon { lease: Lease, remaining_sec: i64 },
    Expired { lease: Lease },
}

impl LeaseEvent {
    pub fn resource_id(&self) -> &str {
        match self {
            Self::Reserved { lease }
            | Self::Extended { lease }
            | Self::Released { lease }
            | Self::Lost { lease }
            | Self::ExpiringSoon { lease, .. }
            | Self::Expired { lease } => &lease.resource_id,
            Self::Denied { resource_id, .. } => resource_id,
        }
    }
}

/// Log one event at the level its severity calls for.
pub fn log_event(event: &LeaseEvent) {
    match event {
        LeaseEvent::Reserved { lease } => {
            info!(resource = %lease.resource_id, holder = %lease.holder, expires_at = %lease.expires_at, "lease reserved");
        }
        LeaseEvent::Extended { lease } => {
            info!(resource = %lease.resource_id, holder = %lease.holder, expires_at = %lease.expires_at, "lease extended");
        }
        LeaseEvent::Released { lease } => {
            info!(resource = %lease.resource_id, holder = %lease.holder, "lease released");
        }
        LeaseEvent::Denied { resource_id, holder, expires_at } => {
            warn!(resource = %resource_id, holder = %holder, %expires_at, "reservation denied, resource is reserved by another holder");
        }
        LeaseEvent::Lost { lease } => {
            warn!(resource = %lease.resource_id, holder = %lease.holder, "lease lost during reconciliation");
        }
        LeaseEvent::ExpiringSoon { lease, remaining_sec } => {
            warn!(resource = %lease.resource_id, remaining_sec, "lease expiring soon");
        }
        LeaseEvent::Expired { lease } => {
            debug!(resource = %lease.resource_id, holder = %lease.holder, "lease expired");
        }
    }
}

/// Drain `events` into the log until the channel closes.
pub fn spawn_event_logger(mut events: broadcast::Receiver<LeaseEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "lease event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
