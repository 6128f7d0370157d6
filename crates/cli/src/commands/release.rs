// `tessera release`: give up one lease, or every lease with `--all`.

use clap::Args;
use tessera_common::lease::{ReleaseAllReport, ReleaseOutcome};
use tessera_common::protocol::lease::{HolderParams, ResourceParams};
use tessera_common::protocol::rpc_methods;

use super::{call_daemon, CommonArgs};
use crate::exit_code::ExitCode;
use crate::output;

#[derive(Debug, Args)]
pub struct ReleaseArgs {
    /// Resource id.
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub resource: Option<String>,

    /// Release every lease held by the holder.
    #[arg(long)]
    pub all: bool,

    #[arg(long)]
    pub holder: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

pub fn run(args: ReleaseArgs) -> anyhow::Result<ExitCode> {
    let format = args.common.format();
    let client = args.common.client();

    match args.resource {
        Some(resource) => {
            let params = ResourceParams { resource, holder: args.holder };
            let outcome: ReleaseOutcome = call_daemon(format, async move {
                client.call(rpc_methods::LEASE_RELEASE, params).await
            })?;
            output::print_output(format, &outcome, format_human)?;
            Ok(exit_code(&outcome))
        }
        None => {
            let params = HolderParams { holder: args.holder };
            let report: ReleaseAllReport = call_daemon(format, async move {
                client.call(rpc_methods::LEASE_RELEASE_ALL, params).await
            })?;
            output::print_output(format, &report, format_all_human)?;
            Ok(all_exit_code(&report))
        }
    }
}

/// Someone else's lease is a conflict; releasing nothing is not an error.
fn exit_code(outcome: &ReleaseOutcome) -> ExitCode {
    match outcome {
        ReleaseOutcome::NotHeld { .. } => ExitCode::Conflict,
        _ => ExitCode::Success,
    }
}

fn all_exit_code(report: &ReleaseAllReport) -> ExitCode {
    if report.failed.is_empty() {
        ExitCode::Success
    } else {
        ExitCode::LedgerUnavailable
    }
}

fn format_human(outcome: &ReleaseOutcome) -> String {
    match outcome {
        ReleaseOutcome::Released { lease } => format!("released {}", lease.resource_id),
        ReleaseOutcome::NotHeld { resource_id, holder } => {
            format!("{resource_id} is held by {holder}, not released")
        }
        ReleaseOutcome::NotFound { resource_id } => format!("no active lease on {resource_id}"),
    }
}

fn format_all_human(report: &ReleaseAllReport) -> String {
    let mut lines = Vec::new();
    if report.released.is_empty() && report.failed.is_empty() {
        lines.push("no leases to release".to_string());
    }
    lines.extend(report.released.iter().map(|resource| format!("released {resource}")));
    lines.extend(
        report
            .failed
            .iter()
            .map(|resource| format!("failed to release {resource} (it will expire)")),
    );
    lines.join("\n")
}
