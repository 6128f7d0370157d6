// In-process ledger with git-like push/fetch semantics.
//
// Several `MemoryLedger`s share one `MemoryRemote`, each with its own local
// history. A push is refused when the remote moved since the last fetch, which
// is what makes cross-participant races observable in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{LedgerError, LedgerOp, LedgerTransport};

/// The shared history every participant pushes to.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    entries: Arc<Mutex<Vec<String>>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Publish an entry directly, as a participant outside this process would.
    pub fn publish(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).push(entry.into());
    }
}

#[derive(Debug, Default)]
struct LocalHistory {
    /// Remote history as of the last successful fetch or push.
    synced: Vec<String>,
    /// Entries appended here and not yet pushed.
    unpushed: Vec<String>,
}

#[derive(Debug)]
pub struct MemoryLedger {
    remote: MemoryRemote,
    local: Mutex<LocalHistory>,
    failures: Mutex<HashMap<LedgerOp, usize>>,
    appends: AtomicUsize,
}

impl MemoryLedger {
    pub fn new(remote: MemoryRemote) -> Self {
        Self {
            remote,
            local: Mutex::new(LocalHistory::default()),
            failures: Mutex::new(HashMap::new()),
            appends: AtomicUsize::new(0),
        }
    }

    /// A ledger with a private remote.
    pub fn standalone() -> Self {
        Self::new(MemoryRemote::new())
    }

    pub fn remote(&self) -> &MemoryRemote {
        &self.remote
    }

    /// Make the next `count` calls of `op` fail with `Unavailable`.
    pub fn fail_next(&self, op: LedgerOp, count: usize) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).insert(op, count);
    }

    /// Number of successful appends so far.
    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    /// Entries appended locally that have not reached the remote.
    pub fn unpushed(&self) -> Vec<String> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner).unpushed.clone()
    }

    fn take_failure(&self, op: LedgerOp) -> Result<(), LedgerError> {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(LedgerError::Unavailable { op, message: "injected failure".to_string() })
            }
            _ => Ok(()),
        }
    }
}

impl LedgerTransport for MemoryLedger {
    async fn append(&self, entry: &str) -> Result<(), LedgerError> {
        tokio::task::yield_now().await;
        self.take_failure(LedgerOp::Append)?;
        self.local.lock().unwrap_or_else(PoisonError::into_inner).unpushed.push(entry.to_string());
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn push(&self) -> Result<(), LedgerError> {
        tokio::task::yield_now().await;
        self.take_failure(LedgerOp::Push)?;

        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        let mut remote = self.remote.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if remote.len() != local.synced.len() {
            return Err(LedgerError::Rejected {
                op: LedgerOp::Push,
                message: "remote contains work that is not present locally".to_string(),
            });
        }
        let pushed = std::mem::take(&mut local.unpushed);
        remote.extend(pushed);
        local.synced = remote.clone();
        Ok(())
    }

    async fn fetch(&self) -> Result<(), LedgerError> {
        tokio::task::yield_now().await;
        self.take_failure(LedgerOp::Fetch)?;

        let remote = self.remote.entries();
        self.local.lock().unwrap_or_else(PoisonError::into_inner).synced = remote;
        Ok(())
    }

    async fn discard_unpushed(&self, entry: &str) -> Result<bool, LedgerError> {
        tokio::task::yield_now().await;
        self.take_failure(LedgerOp::Discard)?;

        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        if local.unpushed.last().map(String::as_str) != Some(entry) {
            return Ok(false);
        }
        local.unpushed.pop();
        Ok(true)
    }

    async fn read_recent(&self, limit: usize) -> Result<Vec<String>, LedgerError> {
        tokio::task::yield_now().await;
        self.take_failure(LedgerOp::ReadRecent)?;

        let local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        let history: Vec<&String> = local.synced.iter().chain(local.unpushed.iter()).collect();
        let start = history.len().saturating_sub(limit);
        Ok(history[start..].iter().map(|entry| entry.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appended_entries_are_local_until_pushed() {
        let ledger = MemoryLedger::standalone();
        ledger.append("one").await.unwrap();

        assert_eq!(ledger.read_recent(10).await.unwrap(), vec!["one"]);
        assert!(ledger.remote().entries().is_empty());

        ledger.push().await.unwrap();
        assert_eq!(ledger.remote().entries(), vec!["one"]);
        assert!(ledger.unpushed().is_empty());
    }

    #[tokio::test]
    async fn push_is_rejected_until_fetch_when_remote_moved() {
        let remote = MemoryRemote::new();
        let alice = MemoryLedger::new(remote.clone());
        let bob = MemoryLedger::new(remote.clone());

        bob.append("bob").await.unwrap();
        bob.push().await.unwrap();

        alice.append("alice").await.unwrap();
        let error = alice.push().await.expect_err("push should be rejected");
        assert!(matches!(error, LedgerError::Rejected { .. }));

        alice.fetch().await.unwrap();
        assert_eq!(alice.read_recent(10).await.unwrap(), vec!["bob", "alice"]);
        alice.push().await.unwrap();
        assert_eq!(remote.entries(), vec!["bob", "alice"]);
    }

    #[tokio::test]
    async fn read_recent_returns_the_newest_window_in_order() {
        let ledger = MemoryLedger::standalone();
        for entry in ["a", "b", "c", "d"] {
            ledger.append(entry).await.unwrap();
        }
        assert_eq!(ledger.read_recent(2).await.unwrap(), vec!["c", "d"]);
        assert!(ledger.read_recent(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn discard_takes_back_only_the_newest_unpushed_entry() {
        let ledger = MemoryLedger::standalone();
        ledger.append("one").await.unwrap();
        ledger.push().await.unwrap();
        assert!(!ledger.discard_unpushed("one").await.unwrap());

        ledger.append("two").await.unwrap();
        ledger.append("three").await.unwrap();
        assert!(!ledger.discard_unpushed("two").await.unwrap());
        assert!(ledger.discard_unpushed("three").await.unwrap());

        assert_eq!(ledger.read_recent(10).await.unwrap(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let ledger = MemoryLedger::standalone();
        ledger.fail_next(LedgerOp::Append, 2);

        assert!(ledger.append("x").await.is_err());
        assert!(ledger.append("x").await.is_err());
        assert!(ledger.append("x").await.is_ok());
        assert_eq!(ledger.append_count(), 1);
    }
}
