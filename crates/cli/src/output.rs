// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → structured JSON.
// `--json` flag forces JSON output regardless of terminal.

use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tessera_common::protocol::jsonrpc::{INVALID_PARAMS, LEDGER_UNAVAILABLE};

use crate::client::daemon_unavailable_exit_code;
use crate::exit_code::RpcError;

const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RESET: &str = "\x1b[0m";

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Human,
    /// Machine-readable JSON (one object per response).
    Json,
}

impl OutputFormat {
    /// Auto-detect format: JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    /// Testable variant that takes an explicit `is_tty` flag.
    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Write a value to stdout in the selected format.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    write_output(&mut io::stdout().lock(), format, value, human_fn)
}

/// Write a value to a provided writer (useful for testing).
pub fn write_output<W, T, F>(
    writer: &mut W,
    format: OutputFormat,
    value: &T,
    human_fn: F,
) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => {
            writeln!(writer, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

/// Write an error to stderr in the selected format.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    print_stderr(format, "error", ANSI_RED, code, message);
}

/// Write a warning to stderr in the selected format.
pub fn print_warning(format: OutputFormat, code: &str, message: &str) {
    print_stderr(format, "warning", ANSI_YELLOW, code, message);
}

fn print_stderr(format: OutputFormat, label: &str, color: &str, code: &str, message: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line = render_human_stderr_line(label, message, io::stderr().is_terminal(), color);
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({ label: { "code": code, "message": message } });
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

/// Print a mapped, actionable error for a command failure.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    print_error(format, code, &message);
}

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    if daemon_unavailable_exit_code(error).is_some() {
        return (
            "DAEMON_NOT_RUNNING",
            "Daemon is not running. Start it in your workspace with: tesserad --workspace ."
                .to_string(),
        );
    }

    if let Some(rpc) = error.chain().find_map(|cause| cause.downcast_ref::<RpcError>()) {
        let reason = rpc.reason().unwrap_or(&rpc.message).to_string();
        return match rpc.code {
            INVALID_PARAMS => ("INVALID_RESOURCE", reason),
            LEDGER_UNAVAILABLE => (
                "LEDGER_UNAVAILABLE",
                format!("Could not reach the lease ledger, nothing was changed: {reason}"),
            ),
            _ => ("RPC_ERROR", reason),
        };
    }

    let message = format!("{error:#}");
    if message.to_ascii_lowercase().contains("timed out") {
        return (
            "DAEMON_TIMEOUT",
            "Daemon did not answer in time. Check that tesserad is running.".to_string(),
        );
    }

    ("ERROR", message)
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool, color: &str) -> String {
    if is_tty {
        format!("{color}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}

/// `12:15:00 UTC (in 9m)` style rendering of a lease expiry.
pub fn describe_expiry(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = expires_at - now;
    let clock = expires_at.format("%H:%M:%S UTC");
    if remaining.num_seconds() <= 0 {
        return format!("{clock} (expired)");
    }
    if remaining.num_minutes() == 0 {
        return format!("{clock} (in {}s)", remaining.num_seconds());
    }
    format!("{clock} (in {}m)", remaining.num_minutes())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    #[test]
    fn detect_tty_returns_human() {
        assert_eq!(OutputFormat::detect_from_terminal(true), OutputFormat::Human);
    }

    #[test]
    fn detect_pipe_returns_json() {
        assert_eq!(OutputFormat::detect_from_terminal(false), OutputFormat::Json);
    }

    #[test]
    fn detect_json_flag_overrides_tty() {
        assert_eq!(OutputFormat::detect(true), OutputFormat::Json);
    }

    #[test]
    fn write_output_human_format() {
        #[derive(Serialize)]
        struct Info {
            name: String,
        }
        let info = Info { name: "alice".into() };
        let mut buf = Vec::new();
        write_output(&mut buf, OutputFormat::Human, &info, |i| format!("Name: {}", i.name))
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "Name: alice\n");
    }

    #[test]
    fn write_output_json_does_not_call_human_fn() {
        #[derive(Serialize)]
        struct Info {
            count: u32,
        }
        let mut buf = Vec::new();
        write_output(&mut buf, OutputFormat::Json, &Info { count: 42 }, |_| {
            unreachable!("human_fn should not be called in JSON mode")
        })
        .unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(parsed["count"], 42);
    }

    #[test]
    fn render_human_error_uses_color_for_tty() {
        let line = render_human_stderr_line("error", "boom", true, ANSI_RED);
        assert!(line.contains(ANSI_RED));
        assert!(line.contains(ANSI_RESET));
        assert!(line.contains("boom"));
    }

    #[test]
    fn render_human_warning_without_tty_is_plain() {
        let line = render_human_stderr_line("warning", "careful", false, ANSI_YELLOW);
        assert_eq!(line, "warning: careful");
    }

    #[test]
    fn actionable_error_ledger_unavailable() {
        let err = anyhow::Error::new(RpcError {
            code: LEDGER_UNAVAILABLE,
            message: "Ledger unavailable".into(),
            data: Some(serde_json::json!({ "reason": "push failed" })),
        })
        .context("daemon rejected `lease.reserve`");
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "LEDGER_UNAVAILABLE");
        assert!(message.contains("push failed"));
        assert!(message.contains("nothing was changed"));
    }

    #[test]
    fn actionable_error_invalid_resource_uses_reason() {
        let err = anyhow::Error::new(RpcError {
            code: INVALID_PARAMS,
            message: "Invalid params".into(),
            data: Some(serde_json::json!({ "reason": "resource id contains `..`" })),
        });
        assert_eq!(
            actionable_error(&err),
            ("INVALID_RESOURCE", "resource id contains `..`".to_string())
        );
    }

    #[test]
    fn actionable_error_timeout_message() {
        let err = anyhow::anyhow!("timed out waiting for json-rpc response");
        let (code, message) = actionable_error(&err);
        assert_eq!(code, "DAEMON_TIMEOUT");
        assert!(message.contains("tesserad"));
    }

    #[test]
    fn actionable_error_falls_back_to_message() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(actionable_error(&err), ("ERROR", "something else".to_string()));
    }

    #[test]
    fn describe_expiry_variants() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().unwrap();
        assert_eq!(
            describe_expiry(now + Duration::minutes(9) + Duration::seconds(30), now),
            "12:09:30 UTC (in 9m)"
        );
        assert_eq!(describe_expiry(now + Duration::seconds(45), now), "12:00:45 UTC (in 45s)");
        assert_eq!(describe_expiry(now, now), "12:00:00 UTC (expired)");
    }
}
