// Consistent exit codes for the tessera CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   10 = daemon not reachable
//   12 = resource reserved by someone else
//   13 = lease ledger unreachable

use std::process;

use tessera_common::protocol::jsonrpc::{
    self, INVALID_PARAMS, INVALID_REQUEST, LEDGER_UNAVAILABLE, METHOD_NOT_FOUND,
};

use crate::client::DaemonUnavailable;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    DaemonDown = 10,
    Conflict = 12,
    LedgerUnavailable = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<DaemonUnavailable>().is_some() {
                return Self::DaemonDown;
            }
            if let Some(rpc_err) = cause.downcast_ref::<RpcError>() {
                return Self::from_rpc_code(rpc_err.code);
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                        Self::DaemonDown
                    }
                    _ => Self::Error,
                };
            }
        }
        Self::Error
    }

    /// Map a JSON-RPC error code to an exit code.
    pub fn from_rpc_code(code: i32) -> Self {
        match code {
            INVALID_PARAMS | INVALID_REQUEST | METHOD_NOT_FOUND => Self::Usage,
            LEDGER_UNAVAILABLE => Self::LedgerUnavailable,
            _ => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

/// A daemon error response, embedded in an `anyhow::Error` chain.
#[derive(Debug)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// The daemon's `data.reason`, when it sent one.
    pub fn reason(&self) -> Option<&str> {
        self.data.as_ref()?.get("reason")?.as_str()
    }
}

impl From<jsonrpc::RpcError> for RpcError {
    fn from(error: jsonrpc::RpcError) -> Self {
        Self { code: error.code, message: error.message, data: error.data }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{} ({}): {reason}", self.message, self.code),
            None => write!(f, "{} ({})", self.message, self.code),
        }
    }
}

impl std::error::Error for RpcError {}
