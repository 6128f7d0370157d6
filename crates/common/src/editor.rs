// Editing-surface events and the decisions returned for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lease::{ConflictResolution, Lease};

/// Notification from the editing surface about one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorEventKind {
    Opened,
    AboutToModify,
    Created,
    Deleted,
}

/// What the editing surface should do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum EditDecision {
    /// Go ahead; `lease` is the caller's lease when one is held.
    Proceed { lease: Option<Lease> },
    /// Someone else is editing; show the resource read-only.
    ReadOnly { holder: String, expires_at: DateTime<Utc> },
    /// Discard the local edits (`ConflictResolution::Theirs`).
    Revert { holder: String, expires_at: DateTime<Utc> },
    /// Keep the local edits despite the other lease (`ConflictResolution::Mine`).
    Override { holder: String, expires_at: DateTime<Utc> },
    /// Ask the user what to do (`ConflictResolution::Manual`).
    AskUser { holder: String, expires_at: DateTime<Utc> },
}

impl EditDecision {
    /// Decision for a denied reservation under `strategy`.
    pub fn for_conflict(
        strategy: ConflictResolution,
        holder: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        match strategy {
            ConflictResolution::Theirs => Self::Revert { holder, expires_at },
            ConflictResolution::Mine => Self::Override { holder, expires_at },
            ConflictResolution::Manual => Self::AskUser { holder, expires_at },
        }
    }

    /// Whether the surface may persist local changes.
    pub fn allows_write(&self) -> bool {
        matches!(self, Self::Proceed { .. } | Self::Override { .. })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn conflict_strategy_maps_to_decision() {
        let at = Utc.timestamp_opt(0, 0).single().unwrap();
        assert_eq!(
            EditDecision::for_conflict(ConflictResolution::Theirs, "bob".into(), at),
            EditDecision::Revert { holder: "bob".into(), expires_at: at }
        );
        assert!(EditDecision::for_conflict(ConflictResolution::Mine, "bob".into(), at)
            .allows_write());
        assert!(!EditDecision::for_conflict(ConflictResolution::Manual, "bob".into(), at)
            .allows_write());
    }
}
