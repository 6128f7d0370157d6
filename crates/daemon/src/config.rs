// Local configuration files for the daemon.
//
// Global config: `~/.tessera/config.toml`
// Workspace config: `<workspace>/.tessera/workspace.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tessera_common::lease::ConflictResolution;

use crate::ledger::RetryPolicy;
use crate::security::{ensure_owner_only_dir, ensure_owner_only_file};

const FALLBACK_IDENTITY: &str = "anonymous";

/// Upper bound for every lease timing setting: one day.
pub const MAX_LEASE_TIMING_SEC: u64 = 86_400;

/// Root directory for Tessera global state: `~/.tessera/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".tessera"))
}

/// Path to the global config file: `~/.tessera/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Path to the workspace config file: `<root>/.tessera/workspace.toml`.
pub fn workspace_config_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".tessera").join("workspace.toml")
}

// ── Global config ──────────────────────────────────────────────────

/// Global daemon configuration at `~/.tessera/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    /// Name published as the holder of this user's leases.
    pub display_name: Option<String>,
}

impl GlobalConfig {
    /// Load from `~/.tessera/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ))
        })?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        write_toml(self, path)
    }

    /// Holder identity: `display_name`, else `$USER`, else `anonymous`.
    pub fn identity(&self) -> String {
        identity_from(self.display_name.as_deref(), std::env::var("USER").ok().as_deref())
    }
}

fn identity_from(display_name: Option<&str>, user: Option<&str>) -> String {
    [display_name, user]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .unwrap_or(FALLBACK_IDENTITY)
        .to_string()
}

// ── Workspace config ───────────────────────────────────────────────

/// Per-workspace configuration at `<root>/.tessera/workspace.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub git: GitConfig,
    pub lease: LeaseConfig,
    pub sync: SyncConfig,
    pub retry: RetryPolicy,
}

impl WorkspaceConfig {
    /// Load from `<root>/.tessera/workspace.toml`. Returns defaults if
    /// the file doesn't exist or can't be parsed.
    pub fn load(workspace_root: &Path) -> Self {
        let path = workspace_config_path(workspace_root);
        Self::load_from(&path).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    pub fn save(&self, workspace_root: &Path) -> Result<(), ConfigError> {
        self.save_to(&workspace_config_path(workspace_root))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        write_toml(self, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lease.validate()?;
        if self.sync.history_window == 0 {
            return Err(ConfigError::Invalid("sync.history_window must be at least 1".into()));
        }
        if self.git.remote.trim().is_empty() || self.git.branch.trim().is_empty() {
            return Err(ConfigError::Invalid("git.remote and git.branch must be set".into()));
        }
        Ok(())
    }
}

/// Where lease entries are pushed and fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitConfig {
    pub remote: String,
    pub branch: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self { remote: "origin".into(), branch: "main".into() }
    }
}

/// Lease timing and conflict policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LeaseConfig {
    /// Length of one lease term.
    pub duration_sec: u64,
    /// A holder may extend once the remaining term is at or below this.
    pub extend_threshold_sec: u64,
    /// Minimum time between two extensions of the same resource.
    pub min_extend_interval_sec: u64,
    /// Remaining term at which the holder is warned once.
    pub warning_window_sec: u64,
    pub sweep_interval_sec: u64,
    /// Bound on each release attempted at shutdown.
    pub release_timeout_sec: u64,
    pub on_conflict: ConflictResolution,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_sec: 900,
            extend_threshold_sec: 300,
            min_extend_interval_sec: 60,
            warning_window_sec: 120,
            sweep_interval_sec: 30,
            release_timeout_sec: 5,
            on_conflict: ConflictResolution::Manual,
        }
    }
}

impl LeaseConfig {
    pub fn duration(&self) -> chrono::Duration {
        seconds(self.duration_sec)
    }

    pub fn extend_threshold(&self) -> chrono::Duration {
        seconds(self.extend_threshold_sec)
    }

    pub fn min_extend_interval(&self) -> chrono::Duration {
        seconds(self.min_extend_interval_sec)
    }

    pub fn warning_window(&self) -> chrono::Duration {
        seconds(self.warning_window_sec)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_sec)
    }

    pub fn release_timeout(&self) -> Duration {
        Duration::from_secs(self.release_timeout_sec)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("lease.duration_sec", self.duration_sec),
            ("lease.sweep_interval_sec", self.sweep_interval_sec),
            ("lease.release_timeout_sec", self.release_timeout_sec),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        let bounded = [
            ("lease.duration_sec", self.duration_sec),
            ("lease.min_extend_interval_sec", self.min_extend_interval_sec),
            ("lease.sweep_interval_sec", self.sweep_interval_sec),
            ("lease.release_timeout_sec", self.release_timeout_sec),
        ];
        if let Some((name, _)) = bounded.iter().find(|(_, value)| *value > MAX_LEASE_TIMING_SEC) {
            return Err(ConfigError::Invalid(format!(
                "{name} must be at most {MAX_LEASE_TIMING_SEC} seconds"
            )));
        }
        if self.extend_threshold_sec >= self.duration_sec {
            return Err(ConfigError::Invalid(
                "lease.extend_threshold_sec must be shorter than lease.duration_sec".into(),
            ));
        }
        if self.warning_window_sec >= self.duration_sec {
            return Err(ConfigError::Invalid(
                "lease.warning_window_sec must be shorter than lease.duration_sec".into(),
            ));
        }
        Ok(())
    }
}

/// Clamped so an unvalidated config cannot overflow timestamp arithmetic.
fn seconds(value: u64) -> chrono::Duration {
    let clamped = value.min(MAX_LEASE_TIMING_SEC);
    chrono::Duration::seconds(i64::try_from(clamped).unwrap_or(0))
}

/// Reconciliation against the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the background reconcile (0 = only on demand).
    pub reconcile_interval_sec: u64,
    /// Number of most recent ledger entries leases are rebuilt from.
    pub history_window: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { reconcile_interval_sec: 60, history_window: 50 }
    }
}

impl SyncConfig {
    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_sec > 0).then(|| Duration::from_secs(self.reconcile_interval_sec))
    }
}

fn write_toml<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        ensure_owner_only_dir(parent)
            .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))?;
    }
    let contents = toml::to_string_pretty(value).map_err(ConfigError::Serialize)?;
    std::fs::write(path, contents).map_err(ConfigError::Io)?;
    ensure_owner_only_file(path)
        .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ── GlobalConfig ───────────────────────────────────────────────

    #[test]
    fn global_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let cfg = GlobalConfig { display_name: Some("Alice".into()) };
        cfg.save_to(&path).unwrap();
        assert_eq!(GlobalConfig::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn global_config_missing_fields_use_defaults() {
        let cfg: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, GlobalConfig::default());
    }

    #[test]
    fn identity_prefers_display_name_then_user() {
        assert_eq!(identity_from(Some("Alice"), Some("alice")), "Alice");
        assert_eq!(identity_from(Some("  "), Some("alice")), "alice");
        assert_eq!(identity_from(None, None), "anonymous");
    }

    // ── WorkspaceConfig ────────────────────────────────────────────

    #[test]
    fn workspace_config_defaults() {
        let cfg = WorkspaceConfig::default();
        assert_eq!(cfg.git.remote, "origin");
        assert_eq!(cfg.git.branch, "main");
        assert_eq!(cfg.lease.duration(), chrono::Duration::minutes(15));
        assert_eq!(cfg.lease.extend_threshold(), chrono::Duration::minutes(5));
        assert_eq!(cfg.lease.on_conflict, ConflictResolution::Manual);
        assert_eq!(cfg.sync.history_window, 50);
        assert_eq!(cfg.retry.max_attempts, 3);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn workspace_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workspace.toml");

        let mut cfg = WorkspaceConfig::default();
        cfg.git.branch = "leases".into();
        cfg.lease.on_conflict = ConflictResolution::Theirs;
        cfg.sync.history_window = 200;
        cfg.save_to(&path).unwrap();

        assert_eq!(WorkspaceConfig::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn workspace_config_partial_toml_uses_defaults() {
        let toml_str = r#"
[lease]
duration_sec = 600
on_conflict = "mine"

[sync]
history_window = 100
"#;
        let cfg: WorkspaceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.lease.duration_sec, 600);
        assert_eq!(cfg.lease.on_conflict, ConflictResolution::Mine);
        assert_eq!(cfg.lease.extend_threshold_sec, 300); // default
        assert_eq!(cfg.sync.history_window, 100);
        assert_eq!(cfg.git.remote, "origin"); // default
    }

    #[test]
    fn workspace_config_load_from_workspace_root() {
        let dir = TempDir::new().unwrap();
        let ws_root = dir.path().join("notes");
        std::fs::create_dir_all(&ws_root).unwrap();

        let cfg = WorkspaceConfig::default();
        cfg.save(&ws_root).unwrap();

        assert_eq!(WorkspaceConfig::load(&ws_root), cfg);
        assert!(ws_root.join(".tessera").join("workspace.toml").exists());
    }

    #[test]
    fn workspace_config_unparsable_file_returns_default() {
        let dir = TempDir::new().unwrap();
        let path = workspace_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[lease\nduration_sec = ").unwrap();

        assert!(matches!(WorkspaceConfig::load_from(&path), Err(ConfigError::Parse(_))));
        assert_eq!(WorkspaceConfig::load(dir.path()), WorkspaceConfig::default());
    }

    #[test]
    fn lease_config_rejects_inconsistent_timings() {
        let mut lease = LeaseConfig { duration_sec: 0, ..LeaseConfig::default() };
        assert!(matches!(lease.validate(), Err(ConfigError::Invalid(_))));

        lease.duration_sec = 300;
        lease.extend_threshold_sec = 300;
        let error = lease.validate().expect_err("threshold equal to duration");
        assert!(error.to_string().contains("extend_threshold_sec"));

        lease.extend_threshold_sec = 100;
        lease.warning_window_sec = 400;
        assert!(lease.validate().is_err());
    }

    #[test]
    fn lease_timings_are_capped_at_one_day() {
        let lease = LeaseConfig { duration_sec: u64::MAX, ..LeaseConfig::default() };
        let error = lease.validate().expect_err("duration over one day");
        assert!(error.to_string().contains("lease.duration_sec"));
        assert_eq!(lease.duration(), chrono::Duration::days(1));

        let lease = LeaseConfig { min_extend_interval_sec: 86_401, ..LeaseConfig::default() };
        assert!(lease.validate().is_err());
        assert_eq!(lease.min_extend_interval(), chrono::Duration::days(1));

        let lease = LeaseConfig { duration_sec: 86_400, ..LeaseConfig::default() };
        lease.validate().expect("one day is allowed");
    }

    #[test]
    fn zero_history_window_is_invalid() {
        let mut cfg = WorkspaceConfig::default();
        cfg.sync.history_window = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn reconcile_interval_zero_disables_loop() {
        let sync = SyncConfig { reconcile_interval_sec: 0, ..SyncConfig::default() };
        assert_eq!(sync.reconcile_interval(), None);
        assert_eq!(SyncConfig::default().reconcile_interval(), Some(Duration::from_secs(60)));
    }

    // ── Path helpers ───────────────────────────────────────────────

    #[test]
    fn workspace_config_path_is_correct() {
        let root = PathBuf::from("/projects/notes");
        assert_eq!(
            workspace_config_path(&root),
            PathBuf::from("/projects/notes/.tessera/workspace.toml")
        );
    }

    #[test]
    fn global_config_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep").join("nested").join("config.toml");

        GlobalConfig::default().save_to(&path).unwrap();
        assert!(path.exists());
    }
}
