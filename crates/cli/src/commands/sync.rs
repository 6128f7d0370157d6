// `tessera sync`: force a reconcile against the ledger.

use clap::Args;
use serde_json::json;
use tessera_common::lease::ReconcileReport;
use tessera_common::protocol::rpc_methods;

use super::{call_daemon, CommonArgs};
use crate::exit_code::ExitCode;
use crate::output;

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

pub fn run(args: SyncArgs) -> anyhow::Result<ExitCode> {
    let format = args.common.format();
    let client = args.common.client();

    let report: ReconcileReport = call_daemon(format, async move {
        client.call(rpc_methods::LEASE_RECONCILE, json!({})).await
    })?;

    output::print_output(format, &report, format_human)?;
    for lease in &report.lost {
        output::print_warning(
            format,
            "LEASE_LOST",
            &format!("your lease on {} is now held by someone else", lease.resource_id),
        );
    }
    if report.skipped > 0 {
        output::print_warning(
            format,
            "LEDGER_NOISE",
            &format!("{} ledger line(s) could not be parsed", report.skipped),
        );
    }
    Ok(ExitCode::Success)
}

fn format_human(report: &ReconcileReport) -> String {
    let mut text = format!("{} active lease(s)", report.active);
    if !report.preserved.is_empty() {
        text.push_str(&format!(", {} not yet on the ledger", report.preserved.len()));
    }
    text
}
