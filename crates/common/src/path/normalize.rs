// Resource id canonicalization: NFKC normalization, traversal rejection, 512 char max.
//
// A resource id is the workspace-relative path a lease is taken on. Two
// participants must derive the same id for the same file, and the id has to
// survive being embedded in a single-line ledger entry.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum allowed resource id length in characters.
const MAX_RESOURCE_CHARS: usize = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourceIdError {
    #[error("resource id is empty")]
    Empty,

    #[error("resource id exceeds maximum length of {MAX_RESOURCE_CHARS} characters")]
    TooLong,

    #[error("resource id contains directory traversal component: {0}")]
    Traversal(String),

    #[error("resource id contains a control character")]
    ControlCharacter,

    #[error("resource id contains invalid component: {0}")]
    InvalidComponent(String),
}

/// Normalize a document path into the resource id used for leases.
///
/// Rules:
/// - Apply Unicode NFKC normalization
/// - Convert all separators to `/`
/// - Collapse consecutive `/` into one
/// - Strip leading and trailing `/`
/// - Reject `.` and `..` components
/// - Reject control characters (null bytes, line breaks, tabs)
/// - Reject empty ids
/// - Enforce the 512 character limit (after normalization)
pub fn normalize_resource_id(input: &str) -> Result<String, ResourceIdError> {
    if input.is_empty() {
        return Err(ResourceIdError::Empty);
    }

    if input.chars().any(char::is_control) {
        return Err(ResourceIdError::ControlCharacter);
    }

    let normalized: String = input.nfkc().collect();
    let unified = normalized.replace('\\', "/");

    let components: Vec<&str> = unified.split('/').filter(|s| !s.is_empty()).collect();
    if components.is_empty() {
        return Err(ResourceIdError::Empty);
    }

    for component in &components {
        if *component == "." || *component == ".." {
            return Err(ResourceIdError::Traversal((*component).to_string()));
        }
        if component.trim().is_empty() {
            return Err(ResourceIdError::InvalidComponent(
                "(whitespace-only component)".to_string(),
            ));
        }
    }

    let result = components.join("/");
    if result.chars().count() > MAX_RESOURCE_CHARS {
        return Err(ResourceIdError::TooLong);
    }

    Ok(result)
}
