use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tessera_common::protocol::jsonrpc::{Request, RequestId, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::exit_code::RpcError;

pub const DAEMON_NOT_RUNNING_EXIT_CODE: i32 = 10;

const SOCKET_RELATIVE_PATH: &str = ".tessera/daemon.sock";
// Ledger pushes retry with backoff inside the daemon, so allow for that.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug)]
pub struct DaemonUnavailable {
    socket_path: PathBuf,
    source: io::Error,
}

impl DaemonUnavailable {
    fn new(socket_path: PathBuf, source: io::Error) -> Self {
        Self { socket_path, source }
    }

    pub fn exit_code(&self) -> i32 {
        DAEMON_NOT_RUNNING_EXIT_CODE
    }
}

impl fmt::Display for DaemonUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "daemon is not running (socket `{}`)", self.socket_path.display())
    }
}

impl std::error::Error for DaemonUnavailable {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Debug)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
    next_request_id: AtomicI64,
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new(default_socket_path())
    }
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            next_request_id: AtomicI64::new(1),
        }
    }

    /// Client for `socket_path`, or the default socket when `None`.
    pub fn for_socket(socket_path: Option<PathBuf>) -> Self {
        socket_path.map(Self::new).unwrap_or_default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one request and decode its result.
    ///
    /// Lease calls are not idempotent on the wire, so a failed call is not
    /// retried here; the daemon already retries ledger operations.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let params = serde_json::to_value(params).context("failed to serialize rpc params")?;
        let request = Request::new(method, Some(params), RequestId::Number(id));
        let mut payload =
            serde_json::to_vec(&request).context("failed to serialize json-rpc request")?;
        payload.push(b'\n');

        let stream = timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("timed out connecting to daemon socket")?
            .map_err(|err| {
                if is_daemon_unavailable_kind(err.kind()) {
                    anyhow!(DaemonUnavailable::new(self.socket_path.clone(), err))
                } else {
                    anyhow!(err)
                }
            })
            .with_context(|| {
                format!("failed to connect to daemon socket `{}`", self.socket_path.display())
            })?;

        let (read_half, mut write_half) = stream.into_split();
        timeout(self.timeout, write_half.write_all(&payload))
            .await
            .context("timed out writing json-rpc request")?
            .context("failed writing json-rpc request to daemon socket")?;

        let mut reader = BufReader::new(read_half);
        let mut response_line = Vec::new();
        timeout(self.timeout, reader.read_until(b'\n', &mut response_line))
            .await
            .context("timed out waiting for json-rpc response")?
            .context("failed reading json-rpc response from daemon socket")?;

        if response_line.is_empty() {
            anyhow::bail!("daemon returned an empty json-rpc response");
        }

        let response: Response = serde_json::from_slice(&response_line)
            .context("failed to decode daemon json-rpc response")?;

        if let Some(error) = response.error {
            return Err(anyhow::Error::new(RpcError::from(error))
                .context(format!("daemon rejected `{method}`")));
        }

        let result = response.result.context("daemon json-rpc response missing `result` field")?;
        serde_json::from_value(result).with_context(|| format!("unexpected `{method}` result"))
    }
}

pub fn daemon_unavailable_exit_code(error: &anyhow::Error) -> Option<i32> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<DaemonUnavailable>())
        .map(DaemonUnavailable::exit_code)
}

fn default_socket_path() -> PathBuf {
    let home = dirs::home_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(SOCKET_RELATIVE_PATH)
}

fn is_daemon_unavailable_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused)
}
