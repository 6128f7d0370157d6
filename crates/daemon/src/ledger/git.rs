// Ledger transport over the git CLI.
//
// Each lease entry is an empty commit whose subject is the encoded entry, so
// leases travel through the same history as the documents they guard.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tracing::debug;

use super::{LedgerError, LedgerOp, LedgerTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs one external command. Blocking; `GitLedger` calls it off the runtime.
pub trait CommandExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<CommandResult, std::io::Error>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCommandExecutor;

impl CommandExecutor for ProcessCommandExecutor {
    fn execute(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<CommandResult, std::io::Error> {
        let output = Command::new(program).args(args).current_dir(cwd).output()?;
        Ok(CommandResult {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug)]
pub struct GitLedger<E = ProcessCommandExecutor> {
    repo_path: PathBuf,
    remote: String,
    branch: String,
    executor: Arc<E>,
}

impl GitLedger<ProcessCommandExecutor> {
    pub fn new(
        repo_path: impl Into<PathBuf>,
        remote: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self::with_executor(repo_path, remote, branch, ProcessCommandExecutor)
    }
}

impl<E: CommandExecutor> GitLedger<E> {
    pub fn with_executor(
        repo_path: impl Into<PathBuf>,
        remote: impl Into<String>,
        branch: impl Into<String>,
        executor: E,
    ) -> Self {
        Self {
            repo_path: repo_path.into(),
            remote: remote.into(),
            branch: branch.into(),
            executor: Arc::new(executor),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    async fn run(&self, op: LedgerOp, args: Vec<String>) -> Result<CommandResult, LedgerError> {
        let executor = Arc::clone(&self.executor);
        let cwd = self.repo_path.clone();
        let command = format!("git {}", args.join(" "));
        debug!(%op, command = %command, "running ledger command");

        let result =
            tokio::task::spawn_blocking(move || executor.execute("git", &args, &cwd))
                .await
                .map_err(|error| LedgerError::Fatal { op, message: error.to_string() })?
                .map_err(|error| LedgerError::Fatal {
                    op,
                    message: format!("failed to run `{command}`: {error}"),
                })?;

        Ok(result)
    }

    async fn run_checked(&self, op: LedgerOp, args: Vec<String>) -> Result<String, LedgerError> {
        let result = self.run(op, args).await?;
        if result.success {
            return Ok(result.stdout);
        }
        Err(classify_failure(op, &result))
    }
}

impl<E: CommandExecutor> LedgerTransport for GitLedger<E> {
    async fn append(&self, entry: &str) -> Result<(), LedgerError> {
        let args = vec![
            "commit".to_string(),
            "--allow-empty".to_string(),
            "--only".to_string(),
            "--no-verify".to_string(),
            "-m".to_string(),
            entry.to_string(),
        ];
        self.run_checked(LedgerOp::Append, args).await.map(|_| ())
    }

    async fn push(&self) -> Result<(), LedgerError> {
        let args =
            vec!["push".to_string(), self.remote.clone(), format!("HEAD:{}", self.branch)];
        self.run_checked(LedgerOp::Push, args).await.map(|_| ())
    }

    async fn fetch(&self) -> Result<(), LedgerError> {
        let args = vec![
            "pull".to_string(),
            "--rebase".to_string(),
            "--autostash".to_string(),
            self.remote.clone(),
            self.branch.clone(),
        ];
        self.run_checked(LedgerOp::Fetch, args).await.map(|_| ())
    }

    async fn discard_unpushed(&self, entry: &str) -> Result<bool, LedgerError> {
        let op = LedgerOp::Discard;
        let head = self.run_checked(op, git_args(&["log", "-1", "--format=%s"])).await?;
        if head.trim_end() != entry {
            return Ok(false);
        }

        let tracking = format!("refs/remotes/{}/{}", self.remote, self.branch);
        let verify = git_args(&["rev-parse", "--verify", "--quiet", tracking.as_str()]);
        if self.run(op, verify).await?.success {
            let ancestry = git_args(&["merge-base", "--is-ancestor", "HEAD", tracking.as_str()]);
            let published = self.run(op, ancestry).await?;
            match published.code {
                Some(0) => return Ok(false),
                Some(1) => {}
                _ => return Err(classify_failure(op, &published)),
            }
        }

        // Soft reset keeps whatever the user has staged.
        let parent = git_args(&["rev-parse", "--verify", "--quiet", "HEAD~1"]);
        if self.run(op, parent).await?.success {
            self.run_checked(op, git_args(&["reset", "--soft", "HEAD~1"])).await?;
        } else {
            self.run_checked(op, git_args(&["update-ref", "-d", "HEAD"])).await?;
        }
        debug!(entry, "discarded unpublished ledger commit");
        Ok(true)
    }

    async fn read_recent(&self, limit: usize) -> Result<Vec<String>, LedgerError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let args = vec![
            "log".to_string(),
            "-n".to_string(),
            limit.to_string(),
            "--reverse".to_string(),
            "--format=%s".to_string(),
        ];
        let result = self.run(LedgerOp::ReadRecent, args).await?;
        if !result.success {
            // A fresh repository has no history yet; that is an empty ledger.
            if result.stderr.contains("does not have any commits") {
                return Ok(Vec::new());
            }
            return Err(classify_failure(LedgerOp::ReadRecent, &result));
        }
        Ok(result.stdout.lines().map(str::to_string).collect())
    }
}

fn git_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn classify_failure(op: LedgerOp, result: &CommandResult) -> LedgerError {
    let output = if result.stderr.trim().is_empty() { &result.stdout } else { &result.stderr };
    let message = match result.code {
        Some(code) => format!("exit code {code}: {}", output.trim()),
        None => output.trim().to_string(),
    };

    let lowered = output.to_ascii_lowercase();
    if lowered.contains("not a git repository") {
        return LedgerError::Fatal { op, message };
    }
    if op == LedgerOp::Push
        && (lowered.contains("[rejected]")
            || lowered.contains("non-fast-forward")
            || lowered.contains("fetch first"))
    {
        return LedgerError::Rejected { op, message };
    }
    LedgerError::Unavailable { op, message }
}
