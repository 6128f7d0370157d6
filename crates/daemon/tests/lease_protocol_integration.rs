use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tessera_common::lease::{
    format_entry, ExtendOutcome, LeaseAction, LedgerEntry, ReleaseOutcome, ReserveOutcome,
};
use tessera_daemon::clock::{Clock, ManualClock};
use tessera_daemon::lease::{LeaseEvent, LeaseManager, ManagerConfig};
use tessera_daemon::ledger::{LedgerOp, MemoryLedger, MemoryRemote};

type Manager = LeaseManager<MemoryLedger, ManualClock>;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid start time")
}

fn participant(identity: &str, remote: &MemoryRemote, clock: &ManualClock) -> Manager {
    LeaseManager::new(
        MemoryLedger::new(remote.clone()),
        clock.clone(),
        ManagerConfig::new(identity),
    )
}

#[tokio::test(start_paused = true)]
async fn extension_keeps_others_out_until_the_new_expiry() {
    let remote = MemoryRemote::new();
    let clock = ManualClock::new(start());
    let alice = participant("alice", &remote, &clock);
    let bob = participant("bob", &remote, &clock);

    let granted = alice.reserve("notes/a.md", "alice").await.unwrap();
    assert!(matches!(granted, ReserveOutcome::Granted { .. }));

    clock.advance(Duration::minutes(11));
    let extended = alice.extend("notes/a.md", "alice").await.unwrap();
    let ExtendOutcome::Extended { lease } = extended.clone() else {
        panic!("extension at 11m should succeed, got {extended:?}");
    };
    assert_eq!(lease.expires_at, start() + Duration::minutes(26));

    clock.advance(Duration::minutes(1));
    bob.force_reconcile().await.unwrap();
    let denied = bob.reserve("notes/a.md", "bob").await.unwrap();
    assert!(!denied.is_granted());
    assert_eq!(
        denied.conflict_message().unwrap(),
        format!("notes/a.md is reserved by alice until {}", lease.expires_at.to_rfc3339())
    );

    clock.set(start() + Duration::minutes(27));
    let reclaimed = bob.reserve("notes/a.md", "bob").await.unwrap();
    assert!(matches!(reclaimed, ReserveOutcome::Granted { .. }));
}

#[tokio::test(start_paused = true)]
async fn concurrent_reserves_in_one_process_append_once() {
    let clock = ManualClock::new(start());
    let manager = participant("alice", &MemoryRemote::new(), &clock);

    let (first, second) =
        tokio::join!(manager.reserve("x.md", "alice"), manager.reserve("x.md", "alice"));
    assert!(first.unwrap().is_granted());
    assert!(second.unwrap().is_granted());
    assert_eq!(manager.ledger().append_count(), 1);
    assert_eq!(manager.ledger().remote().entries().len(), 1);
    assert_eq!(manager.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_reserves_by_different_holders_grant_exactly_one() {
    let clock = ManualClock::new(start());
    let manager = Arc::new(participant("alice", &MemoryRemote::new(), &clock));

    let mut tasks = Vec::new();
    for holder in ["alice", "bob", "carol", "dave"] {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move { manager.reserve("x.md", holder).await }));
    }

    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().is_granted() {
            granted += 1;
        }
    }
    assert_eq!(granted, 1);
    assert_eq!(manager.ledger().append_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reserve_is_idempotent_for_the_holder() {
    let clock = ManualClock::new(start());
    let manager = participant("alice", &MemoryRemote::new(), &clock);

    let first = manager.reserve("a.md", "alice").await.unwrap();
    clock.advance(Duration::minutes(5));
    let again = manager.reserve("a.md", "alice").await.unwrap();

    assert_eq!(first.lease(), again.lease());
    assert!(matches!(again, ReserveOutcome::AlreadyHeld { .. }));
    assert_eq!(manager.ledger().append_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn expired_lease_is_reclaimable_and_never_returned() {
    let clock = ManualClock::new(start());
    let manager = participant("alice", &MemoryRemote::new(), &clock);

    manager.reserve("a.md", "alice").await.unwrap();
    clock.advance(Duration::minutes(15));
    assert_eq!(manager.get_lease("a.md").unwrap(), None);
    assert!(manager.my_leases("alice").is_empty());

    let outcome = manager.reserve("a.md", "bob").await.unwrap();
    assert_eq!(outcome.lease().unwrap().holder, "bob");
}

#[tokio::test(start_paused = true)]
async fn extension_is_gated_by_threshold_and_rate_limit() {
    let clock = ManualClock::new(start());
    let manager = participant("alice", &MemoryRemote::new(), &clock);
    manager.reserve("a.md", "alice").await.unwrap();

    clock.advance(Duration::minutes(9));
    let early = manager.extend("a.md", "alice").await.unwrap();
    assert_eq!(early, ExtendOutcome::NotDue { resource_id: "a.md".into(), remaining_sec: 360 });

    clock.advance(Duration::minutes(1));
    assert!(manager.extend("a.md", "alice").await.unwrap().is_extended());

    // A fresh term is not due, and the rate limit is checked first.
    clock.advance(Duration::seconds(30));
    let limited = manager.extend("a.md", "alice").await.unwrap();
    assert_eq!(
        limited,
        ExtendOutcome::RateLimited { resource_id: "a.md".into(), retry_after_sec: 30 }
    );

    let not_mine = manager.extend("a.md", "bob").await.unwrap();
    assert!(matches!(not_mine, ExtendOutcome::NotHeld { .. }));
}

#[tokio::test(start_paused = true)]
async fn only_the_holder_can_release() {
    let clock = ManualClock::new(start());
    let manager = participant("alice", &MemoryRemote::new(), &clock);
    manager.reserve("a.md", "alice").await.unwrap();

    let refused = manager.release("a.md", "bob").await.unwrap();
    assert_eq!(refused, ReleaseOutcome::NotHeld { resource_id: "a.md".into(), holder: "alice".into() });
    assert!(manager.get_lease("a.md").unwrap().is_some());

    assert!(manager.release("a.md", "alice").await.unwrap().is_released());
    assert_eq!(manager.get_lease("a.md").unwrap(), None);

    let missing = manager.release("a.md", "alice").await.unwrap();
    assert!(matches!(missing, ReleaseOutcome::NotFound { .. }));
    assert_eq!(manager.ledger().append_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn release_all_frees_every_lease_for_peers() {
    let remote = MemoryRemote::new();
    let clock = ManualClock::new(start());
    let alice = participant("alice", &remote, &clock);
    let bob = participant("bob", &remote, &clock);

    alice.reserve("a.md", "alice").await.unwrap();
    alice.reserve("b.md", "alice").await.unwrap();

    let report = alice.release_all("alice").await;
    assert_eq!(report.released, vec!["a.md".to_string(), "b.md".to_string()]);
    assert!(report.failed.is_empty());

    let report = bob.force_reconcile().await.unwrap();
    assert_eq!(report.active, 0);
    assert!(bob.reserve("a.md", "bob").await.unwrap().is_granted());
}

#[tokio::test(start_paused = true)]
async fn rejected_push_fetches_and_retries() {
    let remote = MemoryRemote::new();
    let clock = ManualClock::new(start());
    let alice = participant("alice", &remote, &clock);
    let bob = participant("bob", &remote, &clock);

    alice.reserve("a.md", "alice").await.unwrap();

    // Bob never fetched, so his first push is refused.
    let outcome = bob.reserve("b.md", "bob").await.unwrap();
    assert!(matches!(outcome, ReserveOutcome::Granted { .. }));
    assert_eq!(remote.entries().len(), 2);
    assert!(bob.ledger().unpushed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reservation_that_loses_the_push_race_is_denied() {
    let remote = MemoryRemote::new();
    let clock = ManualClock::new(start());
    let alice = participant("alice", &remote, &clock);
    let bob = participant("bob", &remote, &clock);
    alice.force_reconcile().await.unwrap();

    assert!(bob.reserve("a.md", "bob").await.unwrap().is_granted());
    clock.advance(Duration::seconds(1));

    // Alice's table is stale; her push is refused and the fetch reveals bob.
    let outcome = alice.reserve("a.md", "alice").await.unwrap();
    assert!(matches!(outcome, ReserveOutcome::Denied { ref holder, .. } if holder == "bob"));
    assert_eq!(alice.get_lease("a.md").unwrap().unwrap().holder, "bob");
    assert!(alice.ledger().unpushed().is_empty());
    assert_eq!(remote.entries().len(), 1);

    let report = bob.force_reconcile().await.unwrap();
    assert!(report.lost.is_empty());
    assert_eq!(bob.get_lease("a.md").unwrap().unwrap().holder, "bob");
}

#[tokio::test(start_paused = true)]
async fn racing_entries_converge_on_the_last_append() {
    let remote = MemoryRemote::new();
    let clock = ManualClock::new(start());
    let alice = participant("alice", &remote, &clock);
    let bob = participant("bob", &remote, &clock);
    let mut alice_events = alice.subscribe();

    assert!(alice.reserve("a.md", "alice").await.unwrap().is_granted());
    // A participant that never saw alice's entry lands one after it.
    clock.advance(Duration::seconds(1));
    remote.publish(
        format_entry(&LedgerEntry::new(LeaseAction::Reserve, "a.md", "bob", clock.now())).unwrap(),
    );

    let alice_report = alice.force_reconcile().await.unwrap();
    let bob_report = bob.force_reconcile().await.unwrap();

    assert_eq!(alice.get_lease("a.md").unwrap().unwrap().holder, "bob");
    assert_eq!(bob.get_lease("a.md").unwrap().unwrap().holder, "bob");
    assert_eq!(alice_report.lost.len(), 1);
    assert!(bob_report.lost.is_empty());

    let mut saw_lost = false;
    while let Ok(event) = alice_events.try_recv() {
        saw_lost |= matches!(event, LeaseEvent::Lost { ref lease } if lease.holder == "alice");
    }
    assert!(saw_lost);
}

#[tokio::test(start_paused = true)]
async fn unpublished_local_lease_survives_reconcile() {
    let remote = MemoryRemote::new();
    let clock = ManualClock::new(start());

    let mut config = ManagerConfig::new("alice");
    config.history_window = 1;
    let narrow = LeaseManager::new(MemoryLedger::new(remote.clone()), clock.clone(), config);
    narrow.reserve("c.md", "alice").await.unwrap();
    // A newer entry pushes alice's out of the one-line window.
    remote.publish(
        format_entry(&LedgerEntry::new(LeaseAction::Reserve, "d.md", "bob", start())).unwrap(),
    );

    let report = narrow.force_reconcile().await.unwrap();
    assert_eq!(report.preserved, vec!["c.md".to_string()]);
    assert_eq!(narrow.get_lease("c.md").unwrap().unwrap().holder, "alice");
    assert_eq!(narrow.get_lease("d.md").unwrap().unwrap().holder, "bob");
}

#[tokio::test(start_paused = true)]
async fn unreachable_ledger_fails_without_changing_state() {
    let clock = ManualClock::new(start());
    let manager = participant("alice", &MemoryRemote::new(), &clock);
    manager.ledger().fail_next(LedgerOp::Push, 10);

    assert!(manager.reserve("a.md", "alice").await.is_err());
    assert_eq!(manager.get_lease("a.md").unwrap(), None);

    manager.ledger().fail_next(LedgerOp::Fetch, 10);
    assert!(manager.force_reconcile().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn failed_reservation_stays_failed_after_reconcile() {
    let remote = MemoryRemote::new();
    let clock = ManualClock::new(start());
    let alice = participant("alice", &remote, &clock);
    let bob = participant("bob", &remote, &clock);
    // One failure per attempt of the default retry policy.
    alice.ledger().fail_next(LedgerOp::Push, 3);

    assert!(alice.reserve("a.md", "alice").await.is_err());

    let report = alice.force_reconcile().await.unwrap();
    assert_eq!(report.active, 0);
    assert_eq!(alice.get_lease("a.md").unwrap(), None);
    assert!(bob.reserve("a.md", "bob").await.unwrap().is_granted());

    // Alice's next successful push must not carry the failed entry along.
    assert!(alice.reserve("b.md", "alice").await.unwrap().is_granted());
    assert_eq!(remote.entries().len(), 2);
    bob.force_reconcile().await.unwrap();
    assert_eq!(bob.get_lease("a.md").unwrap().unwrap().holder, "bob");
}

#[tokio::test(start_paused = true)]
async fn failed_release_stays_failed_after_reconcile() {
    let clock = ManualClock::new(start());
    let manager = participant("alice", &MemoryRemote::new(), &clock);
    manager.reserve("a.md", "alice").await.unwrap();
    manager.ledger().fail_next(LedgerOp::Push, 3);

    assert!(manager.release("a.md", "alice").await.is_err());
    assert_eq!(manager.get_lease("a.md").unwrap().unwrap().holder, "alice");

    let report = manager.force_reconcile().await.unwrap();
    assert!(report.lost.is_empty());
    assert_eq!(manager.get_lease("a.md").unwrap().unwrap().holder, "alice");
}

#[tokio::test(start_paused = true)]
async fn malformed_ledger_lines_are_skipped() {
    let remote = MemoryRemote::new();
    let clock = ManualClock::new(start());
    remote.publish("Merge branch 'main' of origin");
    remote.publish(
        format_entry(&LedgerEntry::new(LeaseAction::Reserve, "a.md", "bob", start())).unwrap(),
    );
    remote.publish("LEASE|bogus");

    let manager = participant("alice", &remote, &clock);
    let report = manager.force_reconcile().await.unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(report.active, 1);
}
