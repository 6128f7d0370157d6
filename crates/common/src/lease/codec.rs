// Ledger entry wire format.
//
//   [ACTION] resourceId - holder - 2026-01-02T03:04:05.000Z
//
// Independent processes parse each other's entries, so the format is fixed.
// Parsing peels the last two " - " fields off the right: the timestamp, then
// the holder. Everything before that is the resource id, which may itself
// contain " - ". Lines that do not match are malformed and callers skip them.

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use super::{LeaseAction, LedgerEntry};

const FIELD_SEPARATOR: &str = " - ";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("ledger entry has an empty resource id")]
    EmptyResource,

    #[error("ledger entry has an empty holder")]
    EmptyHolder,

    #[error("holder `{0}` contains the field separator \" - \"")]
    HolderContainsSeparator(String),

    #[error("ledger entry field contains a line break")]
    LineBreak,

    #[error("ledger entry field has leading or trailing whitespace")]
    SurroundingWhitespace,

    #[error("missing `[ACTION]` prefix")]
    MissingAction,

    #[error("unknown ledger action `{0}`")]
    UnknownAction(String),

    #[error("ledger entry is missing the holder or timestamp field")]
    MissingFields,

    #[error("invalid ledger timestamp `{0}`")]
    InvalidTimestamp(String),
}

/// Encode an entry as a single ledger line.
///
/// Rejects entries that could not be parsed back unchanged.
pub fn format_entry(entry: &LedgerEntry) -> Result<String, CodecError> {
    if entry.resource_id.is_empty() {
        return Err(CodecError::EmptyResource);
    }
    if entry.holder.is_empty() {
        return Err(CodecError::EmptyHolder);
    }
    if has_line_break(&entry.resource_id) || has_line_break(&entry.holder) {
        return Err(CodecError::LineBreak);
    }
    if entry.holder.contains(FIELD_SEPARATOR) {
        return Err(CodecError::HolderContainsSeparator(entry.holder.clone()));
    }
    // Surrounding whitespace would be lost to the trim in `parse_entry`.
    if entry.resource_id.trim() != entry.resource_id || entry.holder.trim() != entry.holder {
        return Err(CodecError::SurroundingWhitespace);
    }

    Ok(format!(
        "[{}] {}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}",
        entry.action,
        entry.resource_id,
        entry.holder,
        format_timestamp(entry.timestamp),
    ))
}

/// Decode one ledger line.
pub fn parse_entry(line: &str) -> Result<LedgerEntry, CodecError> {
    let line = line.trim();
    let rest = line.strip_prefix('[').ok_or(CodecError::MissingAction)?;
    let (action_raw, rest) = rest.split_once(']').ok_or(CodecError::MissingAction)?;
    let action = LeaseAction::parse(action_raw)
        .ok_or_else(|| CodecError::UnknownAction(action_raw.to_string()))?;
    let body = rest.strip_prefix(' ').ok_or(CodecError::MissingFields)?;

    let (head, timestamp_raw) =
        body.rsplit_once(FIELD_SEPARATOR).ok_or(CodecError::MissingFields)?;
    let (resource_id, holder) =
        head.rsplit_once(FIELD_SEPARATOR).ok_or(CodecError::MissingFields)?;

    if resource_id.trim().is_empty() {
        return Err(CodecError::EmptyResource);
    }
    if holder.trim().is_empty() {
        return Err(CodecError::EmptyHolder);
    }

    let timestamp = DateTime::parse_from_rfc3339(timestamp_raw.trim())
        .map_err(|_| CodecError::InvalidTimestamp(timestamp_raw.to_string()))?
        .with_timezone(&Utc);

    Ok(LedgerEntry {
        action,
        resource_id: resource_id.to_string(),
        holder: holder.to_string(),
        timestamp,
    })
}

/// ISO 8601 in UTC with millisecond precision, e.g. `2026-01-02T03:04:05.000Z`.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\n', '\r'])
}
