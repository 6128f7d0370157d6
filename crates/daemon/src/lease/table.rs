// In-memory lease table: resource id -> active lease.
//
// Reads take `now` and evict what has expired, so an expired lease is never
// handed out even if the sweeper has not run yet.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tessera_common::lease::Lease;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseTable {
    leases: HashMap<String, Lease>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_leases(leases: impl IntoIterator<Item = Lease>) -> Self {
        Self { leases: leases.into_iter().map(|l| (l.resource_id.clone(), l)).collect() }
    }

    /// Active lease for `resource_id`; an expired one is evicted instead.
    pub fn get(&mut self, resource_id: &str, now: DateTime<Utc>) -> Option<Lease> {
        if self.leases.get(resource_id)?.is_expired_at(now) {
            self.leases.remove(resource_id);
            return None;
        }
        self.leases.get(resource_id).cloned()
    }

    /// Raw entry without expiry handling.
    pub fn peek(&self, resource_id: &str) -> Option<&Lease> {
        self.leases.get(resource_id)
    }

    /// Install `lease`, returning what it replaced.
    pub fn insert(&mut self, lease: Lease) -> Option<Lease> {
        self.leases.insert(lease.resource_id.clone(), lease)
    }

    pub fn remove(&mut self, resource_id: &str) -> Option<Lease> {
        self.leases.remove(resource_id)
    }

    /// Undo an optimistic change: if the entry for `resource_id` is still
    /// `optimistic`, put `previous` back. Returns whether anything changed.
    ///
    /// A reconcile that ran in between wins over the rollback.
    pub fn rollback(
        &mut self,
        resource_id: &str,
        optimistic: Option<&Lease>,
        previous: Option<Lease>,
    ) -> bool {
        if self.leases.get(resource_id) != optimistic {
            return false;
        }
        match previous {
            Some(lease) => {
                self.leases.insert(resource_id.to_string(), lease);
            }
            None => {
                self.leases.remove(resource_id);
            }
        }
        true
    }

    /// Remove and return every lease expired at `now`.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> Vec<Lease> {
        let expired: Vec<String> = self
            .leases
            .values()
            .filter(|lease| lease.is_expired_at(now))
            .map(|lease| lease.resource_id.clone())
            .collect();
        let mut evicted: Vec<Lease> =
            expired.iter().filter_map(|resource| self.leases.remove(resource)).collect();
        evicted.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        evicted
    }

    /// Active leases owned by `holder`, sorted by resource id.
    pub fn held_by(&self, holder: &str, now: DateTime<Utc>) -> Vec<Lease> {
        let mut leases: Vec<Lease> = self
            .leases
            .values()
            .filter(|lease| lease.is_held_by(holder) && !lease.is_expired_at(now))
            .cloned()
            .collect();
        leases.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        leases
    }

    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.leases.values().filter(|lease| !lease.is_expired_at(now)).count()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }
}
