// Parameter payloads for the `lease.*` and `editor.*` RPC methods.
//
// `holder` defaults to the daemon's configured identity when omitted.

use serde::{Deserialize, Serialize};

use crate::editor::EditorEventKind;
use crate::lease::Lease;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceParams {
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGetResult {
    pub resource: String,
    pub lease: Option<Lease>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseMineResult {
    pub holder: String,
    pub leases: Vec<Lease>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorEventParams {
    pub kind: EditorEventKind,
    pub resource: String,
}
