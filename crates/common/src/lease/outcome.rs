// Results of lease operations.
//
// Conflicts, rate limiting and ownership mismatches are ordinary outcomes, not
// errors; only transport failures are reported as errors by the daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Lease;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReserveOutcome {
    /// A new term was published to the ledger.
    Granted { lease: Lease },
    /// The caller already held an active lease; nothing was written.
    AlreadyHeld { lease: Lease },
    /// Someone else holds an active lease.
    Denied { resource_id: String, holder: String, expires_at: DateTime<Utc> },
}

impl ReserveOutcome {
    /// Whether the caller holds the lease after the call.
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. } | Self::AlreadyHeld { .. })
    }

    pub fn lease(&self) -> Option<&Lease> {
        match self {
            Self::Granted { lease } | Self::AlreadyHeld { lease } => Some(lease),
            Self::Denied { .. } => None,
        }
    }

    /// Human-readable conflict description naming resource and holder.
    pub fn conflict_message(&self) -> Option<String> {
        match self {
            Self::Denied { resource_id, holder, expires_at } => Some(format!(
                "{resource_id} is reserved by {holder} until {}",
                expires_at.to_rfc3339()
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtendOutcome {
    Extended { lease: Lease },
    /// No active lease owned by the caller.
    NotHeld { resource_id: String },
    /// Remaining term is still above the extend threshold.
    NotDue { resource_id: String, remaining_sec: i64 },
    /// Extended too recently.
    RateLimited { resource_id: String, retry_after_sec: i64 },
}

impl ExtendOutcome {
    pub fn is_extended(&self) -> bool {
        matches!(self, Self::Extended { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Released { lease: Lease },
    /// Another holder owns the lease; it was left untouched.
    NotHeld { resource_id: String, holder: String },
    NotFound { resource_id: String },
}

impl ReleaseOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released { .. })
    }
}

/// Summary of a best-effort `release_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAllReport {
    pub released: Vec<String>,
    pub failed: Vec<String>,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Active leases in the table after the pass.
    pub active: usize,
    /// Ledger lines that could not be parsed.
    pub skipped: usize,
    /// Local leases kept because the ledger does not show them yet.
    pub preserved: Vec<String>,
    /// Local leases the ledger now attributes to someone else or released.
    pub lost: Vec<Lease>,
}
