// What an editor should do with local edits when a reservation is denied.

use serde::{Deserialize, Serialize};

/// Strategy applied by the editor-facing layer when someone else holds the lease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Discard local edits and keep the holder's version.
    Theirs,
    /// Keep local edits anyway; the lease stays advisory.
    Mine,
    /// Ask the user.
    #[default]
    Manual,
}

impl ConflictResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Theirs => "theirs",
            Self::Mine => "mine",
            Self::Manual => "manual",
        }
    }
}
