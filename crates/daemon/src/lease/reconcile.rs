// Rebuilding the lease table from a window of ledger history.
//
// Entries are walked in append order and the last appended one wins. A
// RELEASE drops whatever an earlier entry of the window installed. Local
// leases the window cannot know about yet are merged back in afterwards.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tessera_common::lease::{parse_entry, Lease, LeaseAction, ReconcileReport};
use tracing::debug;

use super::table::LeaseTable;

/// Result of walking one window of raw ledger lines.
#[derive(Debug, Default)]
pub struct ParsedWindow {
    pub table: LeaseTable,
    /// Newest entry timestamp seen per resource.
    pub latest: HashMap<String, DateTime<Utc>>,
    pub skipped: usize,
}

pub fn parse_window(lines: &[String], now: DateTime<Utc>, duration: Duration) -> ParsedWindow {
    let mut window = ParsedWindow::default();

    for line in lines {
        let entry = match parse_entry(line) {
            Ok(entry) => entry,
            Err(error) => {
                debug!(line = %line, error = %error, "skipping ledger line");
                window.skipped += 1;
                continue;
            }
        };

        window
            .latest
            .entry(entry.resource_id.clone())
            .and_modify(|seen| *seen = (*seen).max(entry.timestamp))
            .or_insert(entry.timestamp);

        match entry.action {
            LeaseAction::Reserve | LeaseAction::Extend => {
                if let Some(lease) = entry.to_lease(duration) {
                    if !lease.is_expired_at(now) {
                        window.table.insert(lease);
                    }
                }
            }
            LeaseAction::Release => {
                window.table.remove(&entry.resource_id);
            }
        }
    }

    window
}

/// Outcome of merging local state into a parsed window.
#[derive(Debug)]
pub struct Merged {
    pub table: LeaseTable,
    pub report: ReconcileReport,
}

/// Merge `identity`'s still-active local leases into the parsed window.
///
/// A local lease is kept when the window has no active lease for its resource
/// and no entry for it stamped at or after the local term start. When both the
/// window and the local table give `identity` the lease, the longer term wins.
/// Local leases the window hands to someone else, or has released, are lost.
pub fn merge_local(
    window: ParsedWindow,
    local: &LeaseTable,
    identity: &str,
    now: DateTime<Utc>,
) -> Merged {
    let ParsedWindow { mut table, latest, skipped } = window;
    let mut preserved = Vec::new();
    let mut lost = Vec::new();

    for mine in local.held_by(identity, now) {
        let resource = mine.resource_id.as_str();
        match table.get(resource, now) {
            Some(parsed) if parsed.is_held_by(identity) => {
                if mine.expires_at > parsed.expires_at {
                    table.insert(mine);
                }
            }
            Some(_) => lost.push(mine),
            None => {
                let represented =
                    latest.get(resource).is_some_and(|stamp| *stamp >= mine.acquired_at);
                if represented {
                    lost.push(mine);
                } else {
                    preserved.push(mine.resource_id.clone());
                    table.insert(mine);
                }
            }
        }
    }

    let report =
        ReconcileReport { active: table.active_count(now), skipped, preserved, lost };
    Merged { table, report }
}
