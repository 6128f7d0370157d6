// Lease data model shared by the daemon, the RPC protocol and the CLI.
//
// A lease is an immutable value: renewing produces a new `Lease`, it never
// mutates one that other code may already hold.

pub mod codec;
pub mod outcome;
pub mod resolution;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use codec::{format_entry, parse_entry, CodecError};
pub use outcome::{
    ExtendOutcome, ReconcileReport, ReleaseAllReport, ReleaseOutcome, ReserveOutcome,
};
pub use resolution::ConflictResolution;

/// A time-bounded claim of exclusive intent to edit one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub resource_id: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Start a fresh term at `acquired_at`.
    pub fn new(
        resource_id: impl Into<String>,
        holder: impl Into<String>,
        acquired_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            holder: holder.into(),
            acquired_at,
            expires_at: acquired_at + duration,
        }
    }

    /// A lease is inactive once `now >= expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_held_by(&self, holder: &str) -> bool {
        self.holder == holder
    }

    /// Remaining term, clamped at zero.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// The same holder's lease restarted for a full term at `now`.
    pub fn renewed_at(&self, now: DateTime<Utc>, duration: Duration) -> Self {
        Self::new(self.resource_id.clone(), self.holder.clone(), now, duration)
    }
}

/// Ledger action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseAction {
    Reserve,
    Extend,
    Release,
}

impl LeaseAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reserve => "RESERVE",
            Self::Extend => "EXTEND",
            Self::Release => "RELEASE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RESERVE" => Some(Self::Reserve),
            "EXTEND" => Some(Self::Extend),
            "RELEASE" => Some(Self::Release),
            _ => None,
        }
    }
}

impl std::fmt::Display for LeaseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable fact in the replicated ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub action: LeaseAction,
    pub resource_id: String,
    pub holder: String,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        action: LeaseAction,
        resource_id: impl Into<String>,
        holder: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self { action, resource_id: resource_id.into(), holder: holder.into(), timestamp }
    }

    /// Entry announcing `lease`, stamped with its term start.
    pub fn for_lease(action: LeaseAction, lease: &Lease) -> Self {
        Self::new(action, lease.resource_id.clone(), lease.holder.clone(), lease.acquired_at)
    }

    /// Reconstruct the lease a RESERVE/EXTEND entry announces.
    ///
    /// Returns `None` for RELEASE tombstones.
    pub fn to_lease(&self, duration: Duration) -> Option<Lease> {
        match self.action {
            LeaseAction::Reserve | LeaseAction::Extend => Some(Lease::new(
                self.resource_id.clone(),
                self.holder.clone(),
                self.timestamp,
                duration,
            )),
            LeaseAction::Release => None,
        }
    }
}
