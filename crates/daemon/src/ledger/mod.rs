// Ledger transport: the replicated, append-only log leases are published to.
//
// The lease core only needs a handful of primitives. Every call may suspend on
// the network and may fail; callers wrap them in `retry::RetryPolicy`.

pub mod git;
pub mod memory;
pub mod retry;

use std::future::Future;

use thiserror::Error;

pub use git::GitLedger;
pub use memory::{MemoryLedger, MemoryRemote};
pub use retry::RetryPolicy;

/// Ledger operation name, used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    Append,
    Push,
    Fetch,
    ReadRecent,
    Discard,
}

impl LedgerOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Push => "push",
            Self::Fetch => "fetch",
            Self::ReadRecent => "read_recent",
            Self::Discard => "discard",
        }
    }
}

impl std::fmt::Display for LedgerOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Remote not reachable or command failed transiently.
    #[error("ledger {op} failed: {message}")]
    Unavailable { op: LedgerOp, message: String },

    /// The remote refused the write (e.g. non-fast-forward push).
    #[error("ledger {op} rejected: {message}")]
    Rejected { op: LedgerOp, message: String },

    /// The transport cannot run at all (missing binary, bad repository).
    #[error("ledger {op} cannot run: {message}")]
    Fatal { op: LedgerOp, message: String },
}

impl LedgerError {
    pub fn op(&self) -> LedgerOp {
        match self {
            Self::Unavailable { op, .. } | Self::Rejected { op, .. } | Self::Fatal { op, .. } => *op,
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal { .. })
    }
}

/// The replicated log leases travel through.
///
/// All methods return `Send` futures so the lease manager can run on a
/// multi-threaded tokio runtime.
pub trait LedgerTransport: Send + Sync + 'static {
    /// Append one entry locally. Durable once acknowledged.
    fn append(&self, entry: &str) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Publish locally appended entries to the shared remote.
    fn push(&self) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Integrate entries other participants have pushed.
    fn fetch(&self) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Take back `entry` if it is the newest local entry and was never
    /// published. Returns whether anything was removed.
    fn discard_unpushed(
        &self,
        entry: &str,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send;

    /// The most recent `limit` raw entries, oldest first.
    fn read_recent(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<String>, LedgerError>> + Send;
}
