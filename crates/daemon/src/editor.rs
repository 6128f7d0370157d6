// Maps editing-surface events onto lease operations.
//
// The manager knows nothing about dialogs; this coordinator turns a denied
// reservation into an `EditDecision` according to the configured
// `ConflictResolution`.

use std::sync::Arc;

use tessera_common::editor::{EditDecision, EditorEventKind};
use tessera_common::lease::{ConflictResolution, ExtendOutcome, ReserveOutcome};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::lease::{LeaseError, LeaseManager};
use crate::ledger::LedgerTransport;

pub struct EditCoordinator<T: LedgerTransport, C: Clock> {
    manager: Arc<LeaseManager<T, C>>,
    strategy: ConflictResolution,
}

impl<T: LedgerTransport, C: Clock> EditCoordinator<T, C> {
    pub fn new(manager: Arc<LeaseManager<T, C>>, strategy: ConflictResolution) -> Self {
        Self { manager, strategy }
    }

    pub fn strategy(&self) -> ConflictResolution {
        self.strategy
    }

    pub async fn handle(
        &self,
        kind: EditorEventKind,
        resource: &str,
    ) -> Result<EditDecision, LeaseError> {
        debug!(?kind, resource, "editor event");
        match kind {
            EditorEventKind::Opened => self.on_opened(resource).await,
            EditorEventKind::AboutToModify | EditorEventKind::Created => {
                self.on_write(resource).await
            }
            EditorEventKind::Deleted => self.on_deleted(resource).await,
        }
    }

    async fn on_opened(&self, resource: &str) -> Result<EditDecision, LeaseError> {
        // A stale view is still useful; sync failures only cost freshness.
        if let Err(error) = self.manager.force_reconcile().await {
            warn!(resource, error = %error, "reconcile before open failed");
        }
        let identity = self.manager.identity();
        Ok(match self.manager.get_lease(resource)? {
            Some(lease) if !lease.is_held_by(identity) => {
                EditDecision::ReadOnly { holder: lease.holder, expires_at: lease.expires_at }
            }
            lease => EditDecision::Proceed { lease },
        })
    }

    async fn on_write(&self, resource: &str) -> Result<EditDecision, LeaseError> {
        let identity = self.manager.identity();
        if let Some(current) = self.manager.get_lease(resource)? {
            if current.is_held_by(identity) {
                let lease = match self.manager.extend(resource, identity).await {
                    Ok(ExtendOutcome::Extended { lease }) => lease,
                    Ok(_) => current,
                    Err(error) => {
                        // Still the holder until expiry; the next edit retries.
                        warn!(resource, error = %error, "lease extension failed");
                        current
                    }
                };
                return Ok(EditDecision::Proceed { lease: Some(lease) });
            }
        }

        // Taking a new lease: look at what peers published first.
        if let Err(error) = self.manager.force_reconcile().await {
            warn!(resource, error = %error, "reconcile before reserve failed");
        }
        match self.manager.reserve(resource, identity).await? {
            ReserveOutcome::Granted { lease } | ReserveOutcome::AlreadyHeld { lease } => {
                Ok(EditDecision::Proceed { lease: Some(lease) })
            }
            ReserveOutcome::Denied { holder, expires_at, .. } => {
                if self.strategy == ConflictResolution::Mine {
                    warn!(resource, holder = %holder, "editing despite another holder's lease");
                }
                Ok(EditDecision::for_conflict(self.strategy, holder, expires_at))
            }
        }
    }

    async fn on_deleted(&self, resource: &str) -> Result<EditDecision, LeaseError> {
        let outcome = self.manager.release(resource, self.manager.identity()).await?;
        debug!(resource, ?outcome, "release after delete");
        Ok(EditDecision::Proceed { lease: None })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::lease::ManagerConfig;
    use crate::ledger::{MemoryLedger, MemoryRemote, RetryPolicy};

    type Manager = LeaseManager<MemoryLedger, ManualClock>;

    fn participant(identity: &str, remote: &MemoryRemote, clock: &ManualClock) -> Arc<Manager> {
        let mut config = ManagerConfig::new(identity);
        config.retry = RetryPolicy::none();
        Arc::new(LeaseManager::new(MemoryLedger::new(remote.clone()), clock.clone(), config))
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).single().unwrap())
    }

    #[tokio::test]
    async fn modify_reserves_then_extends() {
        let clock = clock();
        let manager = participant("alice", &MemoryRemote::new(), &clock);
        let editor = EditCoordinator::new(Arc::clone(&manager), ConflictResolution::Manual);

        let first = editor.handle(EditorEventKind::AboutToModify, "a.md").await.unwrap();
        assert!(first.allows_write());
        assert_eq!(manager.ledger().append_count(), 1);

        clock.advance(Duration::minutes(11));
        let decision = editor.handle(EditorEventKind::AboutToModify, "a.md").await.unwrap();
        match decision {
            EditDecision::Proceed { lease: Some(lease) } => {
                assert_eq!(lease.expires_at, clock.now() + Duration::minutes(15));
            }
            other => panic!("unexpected decision {other:?}"),
        }
        assert_eq!(manager.ledger().append_count(), 2);
    }

    #[tokio::test]
    async fn conflict_follows_strategy() {
        let clock = clock();
        let remote = MemoryRemote::new();
        let bob = participant("bob", &remote, &clock);
        bob.reserve("a.md", "bob").await.unwrap();

        let alice = participant("alice", &remote, &clock);
        alice.force_reconcile().await.unwrap();

        for (strategy, expect_write) in [
            (ConflictResolution::Theirs, false),
            (ConflictResolution::Mine, true),
            (ConflictResolution::Manual, false),
        ] {
            let editor = EditCoordinator::new(Arc::clone(&alice), strategy);
            let decision = editor.handle(EditorEventKind::Created, "a.md").await.unwrap();
            assert_eq!(decision.allows_write(), expect_write, "{strategy:?}");
        }
        assert_eq!(alice.ledger().append_count(), 0);
    }

    #[tokio::test]
    async fn write_sees_a_lease_pushed_after_the_last_sync() {
        let clock = clock();
        let remote = MemoryRemote::new();
        let alice = participant("alice", &remote, &clock);
        let bob = participant("bob", &remote, &clock);
        alice.force_reconcile().await.unwrap();

        bob.reserve("a.md", "bob").await.unwrap();

        let editor = EditCoordinator::new(Arc::clone(&alice), ConflictResolution::Manual);
        let decision = editor.handle(EditorEventKind::AboutToModify, "a.md").await.unwrap();
        assert!(!decision.allows_write(), "{decision:?}");
        assert_eq!(alice.ledger().append_count(), 0);

        let report = bob.force_reconcile().await.unwrap();
        assert!(report.lost.is_empty());
        assert_eq!(bob.get_lease("a.md").unwrap().unwrap().holder, "bob");
    }

    #[tokio::test]
    async fn open_reconciles_and_reports_holder() {
        let clock = clock();
        let remote = MemoryRemote::new();
        let bob = participant("bob", &remote, &clock);
        bob.reserve("a.md", "bob").await.unwrap();

        let alice = participant("alice", &remote, &clock);
        let editor = EditCoordinator::new(Arc::clone(&alice), ConflictResolution::Manual);

        match editor.handle(EditorEventKind::Opened, "a.md").await.unwrap() {
            EditDecision::ReadOnly { holder, .. } => assert_eq!(holder, "bob"),
            other => panic!("unexpected decision {other:?}"),
        }
        let free = editor.handle(EditorEventKind::Opened, "b.md").await.unwrap();
        assert_eq!(free, EditDecision::Proceed { lease: None });
    }

    #[tokio::test]
    async fn delete_releases_own_lease() {
        let clock = clock();
        let manager = participant("alice", &MemoryRemote::new(), &clock);
        let editor = EditCoordinator::new(Arc::clone(&manager), ConflictResolution::Manual);

        editor.handle(EditorEventKind::Created, "a.md").await.unwrap();
        editor.handle(EditorEventKind::Deleted, "a.md").await.unwrap();

        assert_eq!(manager.get_lease("a.md").unwrap(), None);
        assert!(manager.ledger().remote().entries()[1].starts_with("[RELEASE] a.md - alice - "));
    }
}
