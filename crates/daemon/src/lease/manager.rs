// Lease manager: reserve, extend and release leases through the ledger.
//
// Every change is installed in the table optimistically, appended to the
// ledger and pushed. If publishing fails the entry is taken back out of the
// local ledger and the table is rolled back, so a failed call leaves both as
// they were. Operations on the same resource run one at a time; different
// resources proceed concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tessera_common::lease::{
    format_entry, parse_entry, CodecError, ExtendOutcome, Lease, LeaseAction, LedgerEntry, ReconcileReport,
    ReleaseAllReport, ReleaseOutcome, ReserveOutcome,
};
use tessera_common::path::{normalize_resource_id, ResourceIdError};
use thiserror::Error;
use tokio::sync::{broadcast, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::events::{LeaseEvent, EVENT_CHANNEL_CAPACITY};
use super::reconcile::{merge_local, parse_window};
use super::table::LeaseTable;
use crate::clock::Clock;
use crate::config::{LeaseConfig, WorkspaceConfig};
use crate::ledger::{LedgerError, LedgerTransport, RetryPolicy};

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("invalid resource id: {0}")]
    InvalidResource(#[from] ResourceIdError),

    #[error("cannot encode ledger entry: {0}")]
    InvalidEntry(#[from] CodecError),

    #[error("could not publish lease change for `{resource}`: {source}")]
    Transport {
        resource: String,
        #[source]
        source: LedgerError,
    },

    #[error("could not sync with the lease ledger: {0}")]
    Sync(#[source] LedgerError),
}

// ── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Identity whose unpublished leases survive reconciliation.
    pub identity: String,
    pub lease: LeaseConfig,
    pub history_window: usize,
    pub retry: RetryPolicy,
}

impl ManagerConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self::from_workspace(identity, &WorkspaceConfig::default())
    }

    pub fn from_workspace(identity: impl Into<String>, workspace: &WorkspaceConfig) -> Self {
        Self {
            identity: identity.into(),
            lease: workspace.lease.clone(),
            history_window: workspace.sync.history_window,
            retry: workspace.retry.clone(),
        }
    }
}

// ── Per-resource serialization ─────────────────────────────────────

#[derive(Default)]
struct PendingRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PendingRegistry {
    async fn enter(&self, resource_id: &str) -> PendingGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(resource_id.to_string()).or_default())
        };
        let guard = match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(resource = %resource_id, "waiting for in-flight lease operation");
                lock.lock_owned().await
            }
        };
        PendingGuard { registry: self, resource_id: resource_id.to_string(), _guard: Some(guard) }
    }

    fn in_flight(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct PendingGuard<'a> {
    registry: &'a PendingRegistry,
    resource_id: String,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.registry.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Release the async lock first; the registry entry goes once idle.
        self._guard.take();
        if locks.get(&self.resource_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.resource_id);
        }
    }
}

// ── Manager ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct State {
    table: LeaseTable,
    /// When each resource was last extended successfully.
    last_extended: HashMap<String, DateTime<Utc>>,
    /// Entries that failed to publish and could not be taken back out of the
    /// local ledger. Reconciliation ignores them until they age out.
    abandoned: HashSet<String>,
}

impl State {
    fn forget_extensions_of_free_resources(&mut self) {
        let table = &self.table;
        self.last_extended.retain(|resource, _| table.peek(resource).is_some());
    }
}

/// How a publish attempt ended when the ledger itself did not fail.
enum Published {
    Done,
    /// A fetch during the push retry showed another holder on the resource;
    /// our entry was withdrawn.
    Superseded(Lease),
}

pub struct LeaseManager<T: LedgerTransport, C: Clock> {
    ledger: T,
    clock: C,
    config: ManagerConfig,
    state: Mutex<State>,
    pending: PendingRegistry,
    events: broadcast::Sender<LeaseEvent>,
}

impl<T: LedgerTransport, C: Clock> LeaseManager<T, C> {
    pub fn new(ledger: T, clock: C, config: ManagerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            ledger,
            clock,
            config,
            state: Mutex::new(State::default()),
            pending: PendingRegistry::default(),
            events,
        }
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &T {
        &self.ledger
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LeaseEvent> {
        self.events.subscribe()
    }

    /// Number of resources with an operation running or queued.
    pub fn in_flight(&self) -> usize {
        self.pending.in_flight()
    }

    /// Reserve `resource` for `holder`.
    ///
    /// Re-reserving an active lease one already holds writes nothing.
    pub async fn reserve(&self, resource: &str, holder: &str) -> Result<ReserveOutcome, LeaseError> {
        let resource = normalize_resource_id(resource)?;
        let _pending = self.pending.enter(&resource).await;
        let now = self.clock.now();

        let (lease, previous, line) = {
            let mut state = self.lock_state();
            if let Some(current) = state.table.get(&resource, now) {
                if current.is_held_by(holder) {
                    debug!(resource = %resource, holder, "lease already held");
                    return Ok(ReserveOutcome::AlreadyHeld { lease: current });
                }
                drop(state);
                return Ok(self.deny(resource, current));
            }

            let lease = Lease::new(resource.clone(), holder, now, self.config.lease.duration());
            let line = format_entry(&LedgerEntry::for_lease(LeaseAction::Reserve, &lease))?;
            let previous = state.table.insert(lease.clone());
            (lease, previous, line)
        };

        match self.publish(&resource, holder, &line).await {
            Ok(Published::Done) => {}
            Ok(Published::Superseded(current)) => {
                self.lock_state().table.rollback(&resource, Some(&lease), Some(current.clone()));
                return Ok(self.deny(resource, current));
            }
            Err(source) => {
                self.lock_state().table.rollback(&resource, Some(&lease), previous);
                return Err(LeaseError::Transport { resource, source });
            }
        }

        self.emit(LeaseEvent::Reserved { lease: lease.clone() });
        Ok(ReserveOutcome::Granted { lease })
    }

    /// Start a fresh term for a lease `holder` already has.
    ///
    /// Allowed once the remaining term is at or below the extend threshold,
    /// and not within the minimum interval of the previous extension.
    pub async fn extend(&self, resource: &str, holder: &str) -> Result<ExtendOutcome, LeaseError> {
        let resource = normalize_resource_id(resource)?;
        let _pending = self.pending.enter(&resource).await;
        let now = self.clock.now();

        let (renewed, previous, line) = {
            let mut state = self.lock_state();
            let current = match state.table.get(&resource, now) {
                Some(lease) if lease.is_held_by(holder) => lease,
                _ => return Ok(ExtendOutcome::NotHeld { resource_id: resource }),
            };

            if let Some(last) = state.last_extended.get(&resource) {
                let since = now - *last;
                let min_interval = self.config.lease.min_extend_interval();
                if since < min_interval {
                    let wait_ms = (min_interval - since).num_milliseconds();
                    return Ok(ExtendOutcome::RateLimited {
                        resource_id: resource,
                        retry_after_sec: (wait_ms + 999) / 1_000,
                    });
                }
            }

            let remaining = current.remaining_at(now);
            if remaining > self.config.lease.extend_threshold() {
                return Ok(ExtendOutcome::NotDue {
                    resource_id: resource,
                    remaining_sec: remaining.num_seconds(),
                });
            }

            let renewed = current.renewed_at(now, self.config.lease.duration());
            let line = format_entry(&LedgerEntry::for_lease(LeaseAction::Extend, &renewed))?;
            let previous = state.table.insert(renewed.clone());
            (renewed, previous, line)
        };

        match self.publish(&resource, holder, &line).await {
            Ok(Published::Done) => {}
            Ok(Published::Superseded(current)) => {
                let mut state = self.lock_state();
                state.table.rollback(&resource, Some(&renewed), Some(current));
                state.last_extended.remove(&resource);
                drop(state);
                if let Some(lost) = previous {
                    self.emit(LeaseEvent::Lost { lease: lost });
                }
                return Ok(ExtendOutcome::NotHeld { resource_id: resource });
            }
            Err(source) => {
                self.lock_state().table.rollback(&resource, Some(&renewed), previous);
                return Err(LeaseError::Transport { resource, source });
            }
        }

        self.lock_state().last_extended.insert(resource, now);
        self.emit(LeaseEvent::Extended { lease: renewed.clone() });
        Ok(ExtendOutcome::Extended { lease: renewed })
    }

    /// Give up `holder`'s lease on `resource`. Someone else's lease is left alone.
    pub async fn release(&self, resource: &str, holder: &str) -> Result<ReleaseOutcome, LeaseError> {
        let resource = normalize_resource_id(resource)?;
        let _pending = self.pending.enter(&resource).await;
        let now = self.clock.now();

        let (removed, line) = {
            let mut state = self.lock_state();
            let current = match state.table.get(&resource, now) {
                None => return Ok(ReleaseOutcome::NotFound { resource_id: resource }),
                Some(lease) if !lease.is_held_by(holder) => {
                    return Ok(ReleaseOutcome::NotHeld {
                        resource_id: resource,
                        holder: lease.holder,
                    });
                }
                Some(lease) => lease,
            };
            let line = format_entry(&LedgerEntry::new(
                LeaseAction::Release,
                resource.clone(),
                holder,
                now,
            ))?;
            state.table.remove(&resource);
            (current, line)
        };

        match self.publish(&resource, holder, &line).await {
            Ok(Published::Done) => {}
            Ok(Published::Superseded(current)) => {
                let other = current.holder.clone();
                let mut state = self.lock_state();
                state.table.rollback(&resource, None, Some(current));
                state.last_extended.remove(&resource);
                drop(state);
                self.emit(LeaseEvent::Lost { lease: removed });
                return Ok(ReleaseOutcome::NotHeld { resource_id: resource, holder: other });
            }
            Err(source) => {
                self.lock_state().table.rollback(&resource, None, Some(removed));
                return Err(LeaseError::Transport { resource, source });
            }
        }

        self.lock_state().last_extended.remove(&resource);
        self.emit(LeaseEvent::Released { lease: removed.clone() });
        Ok(ReleaseOutcome::Released { lease: removed })
    }

    /// Best-effort release of everything `holder` owns, one bounded attempt
    /// per resource. Failures are logged and reported, never retried further.
    pub async fn release_all(&self, holder: &str) -> ReleaseAllReport {
        let mut report = ReleaseAllReport::default();
        let timeout = self.config.lease.release_timeout();

        for lease in self.my_leases(holder) {
            let resource = lease.resource_id;
            match tokio::time::timeout(timeout, self.release(&resource, holder)).await {
                Ok(Ok(ReleaseOutcome::Released { .. })) => report.released.push(resource),
                Ok(Ok(outcome)) => {
                    debug!(resource = %resource, ?outcome, "lease no longer held at release");
                }
                Ok(Err(error)) => {
                    warn!(resource = %resource, error = %error, "failed to release lease");
                    report.failed.push(resource);
                }
                Err(_) => {
                    warn!(resource = %resource, timeout_ms = timeout.as_millis() as u64, "lease release timed out");
                    report.failed.push(resource);
                }
            }
        }

        report
    }

    /// Current lease on `resource`; expired leases are evicted, never returned.
    pub fn get_lease(&self, resource: &str) -> Result<Option<Lease>, LeaseError> {
        let resource = normalize_resource_id(resource)?;
        let now = self.clock.now();
        Ok(self.lock_state().table.get(&resource, now))
    }

    /// Active leases owned by `holder`, sorted by resource id.
    pub fn my_leases(&self, holder: &str) -> Vec<Lease> {
        let now = self.clock.now();
        self.lock_state().table.held_by(holder, now)
    }

    /// Rebuild the table from the ledger now.
    ///
    /// On transport failure the table is left unchanged.
    pub async fn force_reconcile(&self) -> Result<ReconcileReport, LeaseError> {
        let retry = &self.config.retry;
        retry.run("fetch", |_| self.ledger.fetch()).await.map_err(LeaseError::Sync)?;
        let window = self.config.history_window;
        let lines = retry
            .run("read_recent", |_| self.ledger.read_recent(window))
            .await
            .map_err(LeaseError::Sync)?;

        let now = self.clock.now();
        let report = {
            let mut state = self.lock_state();
            self.prune_abandoned(&mut state, now);
            let lines = without_abandoned(lines, &state.abandoned);
            let parsed = parse_window(&lines, now, self.config.lease.duration());
            let merged = merge_local(parsed, &state.table, &self.config.identity, now);
            state.table = merged.table;
            state.forget_extensions_of_free_resources();
            merged.report
        };

        for lease in &report.lost {
            self.emit(LeaseEvent::Lost { lease: lease.clone() });
        }
        info!(
            active = report.active,
            skipped = report.skipped,
            preserved = report.preserved.len(),
            lost = report.lost.len(),
            "lease table reconciled"
        );
        Ok(report)
    }

    /// Evict expired leases, broadcasting `Expired` for each.
    pub fn evict_expired(&self) -> Vec<Lease> {
        let now = self.clock.now();
        let evicted = {
            let mut state = self.lock_state();
            let evicted = state.table.evict_expired(now);
            state.forget_extensions_of_free_resources();
            evicted
        };
        for lease in &evicted {
            self.emit(LeaseEvent::Expired { lease: lease.clone() });
        }
        evicted
    }

    pub(crate) fn emit(&self, event: LeaseEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn deny(&self, resource_id: String, current: Lease) -> ReserveOutcome {
        self.emit(LeaseEvent::Denied {
            resource_id: resource_id.clone(),
            holder: current.holder.clone(),
            expires_at: current.expires_at,
        });
        ReserveOutcome::Denied {
            resource_id,
            holder: current.holder,
            expires_at: current.expires_at,
        }
    }

    /// Append `line` then push it. Each retry fetches first and gives up if
    /// the fetched history hands `resource` to someone other than `holder`.
    /// Whenever the entry does not reach the remote it is withdrawn again.
    async fn publish(
        &self,
        resource: &str,
        holder: &str,
        line: &str,
    ) -> Result<Published, LedgerError> {
        let retry = &self.config.retry;
        retry.run("append", |_| self.ledger.append(line)).await?;
        let pushed = retry
            .run("push", |attempt| async move {
                if attempt > 0 {
                    self.ledger.fetch().await?;
                    if let Some(current) = self.contender(resource, holder, line).await? {
                        return Ok(Some(current));
                    }
                }
                self.ledger.push().await.map(|()| None)
            })
            .await;

        match pushed {
            Ok(None) => Ok(Published::Done),
            Ok(Some(current)) => {
                info!(
                    resource,
                    holder = %current.holder,
                    "fetched history shows another holder, withdrawing lease entry"
                );
                self.withdraw(line).await;
                Ok(Published::Superseded(current))
            }
            Err(error) => {
                self.withdraw(line).await;
                Err(error)
            }
        }
    }

    /// Active lease another holder has on `resource` according to the local
    /// ledger, ignoring our own pending `line`.
    async fn contender(
        &self,
        resource: &str,
        holder: &str,
        line: &str,
    ) -> Result<Option<Lease>, LedgerError> {
        let mut lines = self.ledger.read_recent(self.config.history_window + 1).await?;
        if let Some(own) = lines.iter().rposition(|entry| entry == line) {
            lines.remove(own);
        }
        let lines = without_abandoned(lines, &self.lock_state().abandoned);
        let now = self.clock.now();
        let mut window = parse_window(&lines, now, self.config.lease.duration());
        Ok(window.table.get(resource, now).filter(|lease| !lease.is_held_by(holder)))
    }

    async fn withdraw(&self, line: &str) {
        match self.ledger.discard_unpushed(line).await {
            Ok(true) => {
                debug!(entry = %line, "withdrew unpublished lease entry");
                return;
            }
            Ok(false) => warn!(entry = %line, "unpublished lease entry is no longer at the tip"),
            Err(error) => {
                warn!(entry = %line, error = %error, "failed to withdraw unpublished lease entry");
            }
        }
        self.lock_state().abandoned.insert(line.to_string());
    }

    /// Abandoned entries whose term is over can no longer install a lease.
    fn prune_abandoned(&self, state: &mut State, now: DateTime<Utc>) {
        let duration = self.config.lease.duration();
        state.abandoned.retain(|line| {
            parse_entry(line).is_ok_and(|entry| entry.timestamp + duration > now)
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn without_abandoned(lines: Vec<String>, abandoned: &HashSet<String>) -> Vec<String> {
    if abandoned.is_empty() {
        return lines;
    }
    lines.into_iter().filter(|line| !abandoned.contains(line)).collect()
}
