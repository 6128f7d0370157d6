// Daemon runtime files: state directory, PID file and the Unix socket.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::security::{create_private_dir_all, ensure_owner_only_file, open_private_truncate};

/// Socket path: ~/.tessera/daemon.sock
const SOCKET_NAME: &str = "daemon.sock";
/// PID file: ~/.tessera/daemon.pid (diagnostics only)
const PID_FILE_NAME: &str = "daemon.pid";

/// Resolved paths for daemon runtime files.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub base_dir: PathBuf,
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
}

impl DaemonPaths {
    /// Resolve paths under `~/.tessera/`, creating the directory.
    pub fn resolve() -> Result<Self> {
        let base = crate::config::global_dir().context("could not determine home directory")?;
        Self::under(base)
    }

    /// Paths inside `base_dir`, creating it owner-only.
    pub fn under(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        create_private_dir_all(&base_dir)?;
        Ok(Self {
            socket_path: base_dir.join(SOCKET_NAME),
            pid_path: base_dir.join(PID_FILE_NAME),
            base_dir,
        })
    }
}

pub fn write_pid_file(path: &Path) -> Result<()> {
    let pid = std::process::id();
    let mut file = open_private_truncate(path).context("failed to create PID file")?;
    write!(file, "{pid}").context("failed to write PID")?;
    ensure_owner_only_file(path)?;
    info!(pid, path = %path.display(), "wrote PID file");
    Ok(())
}

pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, "failed to remove PID file");
        }
    }
}

/// Bind the daemon socket, replacing a stale socket file.
///
/// Refuses to start when another daemon still answers on the socket.
pub async fn bind_socket(path: &Path) -> Result<UnixListener> {
    if is_daemon_running(path).await {
        anyhow::bail!("a daemon is already listening on `{}`", path.display());
    }
    if path.exists() {
        fs::remove_file(path).context("failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(path).context("failed to bind Unix socket")?;
    ensure_owner_only_file(path)?;
    info!(path = %path.display(), "daemon socket ready");
    Ok(listener)
}

/// Whether a daemon accepts connections on `socket_path`.
pub async fn is_daemon_running(socket_path: &Path) -> bool {
    tokio::net::UnixStream::connect(socket_path).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths(tmp: &TempDir) -> DaemonPaths {
        DaemonPaths::under(tmp.path().join("state")).expect("paths should resolve")
    }

    #[test]
    fn paths_live_in_created_base_dir() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        assert!(paths.base_dir.is_dir());
        assert!(paths.socket_path.ends_with("daemon.sock"));
        assert!(paths.pid_path.ends_with("daemon.pid"));
    }

    #[test]
    fn write_and_remove_pid_file() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);

        write_pid_file(&paths.pid_path).unwrap();
        let pid: u32 = fs::read_to_string(&paths.pid_path).unwrap().parse().unwrap();
        assert_eq!(pid, std::process::id());

        remove_pid_file(&paths.pid_path);
        assert!(!paths.pid_path.exists());
        // Removing again is harmless.
        remove_pid_file(&paths.pid_path);
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);

        let first = bind_socket(&paths.socket_path).await.unwrap();
        drop(first);

        let _second = bind_socket(&paths.socket_path).await.unwrap();
        assert!(paths.socket_path.exists());
    }

    #[tokio::test]
    async fn bind_refuses_live_socket() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);

        let _listener = bind_socket(&paths.socket_path).await.unwrap();
        assert!(is_daemon_running(&paths.socket_path).await);
        assert!(bind_socket(&paths.socket_path).await.is_err());
    }

    #[tokio::test]
    async fn missing_socket_is_not_running() {
        let tmp = TempDir::new().unwrap();
        assert!(!is_daemon_running(&tmp.path().join("nonexistent.sock")).await);
    }
}
