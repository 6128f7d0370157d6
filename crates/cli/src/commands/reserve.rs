// `tessera reserve`: take the exclusive-edit lease on a resource.

use chrono::Utc;
use clap::Args;
use tessera_common::lease::ReserveOutcome;
use tessera_common::protocol::lease::ResourceParams;
use tessera_common::protocol::rpc_methods;

use super::{call_daemon, CommonArgs};
use crate::exit_code::ExitCode;
use crate::output::{self, describe_expiry};

#[derive(Debug, Args)]
pub struct ReserveArgs {
    /// Resource id, e.g. `notes/a.md`.
    pub resource: String,

    /// Reserve on behalf of this holder instead of the daemon's identity.
    #[arg(long)]
    pub holder: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

pub fn run(args: ReserveArgs) -> anyhow::Result<ExitCode> {
    let format = args.common.format();
    let client = args.common.client();
    let params = ResourceParams { resource: args.resource, holder: args.holder };

    let outcome: ReserveOutcome =
        call_daemon(format, async move { client.call(rpc_methods::LEASE_RESERVE, params).await })?;

    output::print_output(format, &outcome, format_human)?;
    Ok(exit_code(&outcome))
}

fn exit_code(outcome: &ReserveOutcome) -> ExitCode {
    if outcome.is_granted() {
        ExitCode::Success
    } else {
        ExitCode::Conflict
    }
}

fn format_human(outcome: &ReserveOutcome) -> String {
    let now = Utc::now();
    match outcome {
        ReserveOutcome::Granted { lease } => format!(
            "reserved {} until {}",
            lease.resource_id,
            describe_expiry(lease.expires_at, now)
        ),
        ReserveOutcome::AlreadyHeld { lease } => format!(
            "already holding {} until {}",
            lease.resource_id,
            describe_expiry(lease.expires_at, now)
        ),
        ReserveOutcome::Denied { resource_id, holder, expires_at } => format!(
            "{resource_id} is reserved by {holder} until {}",
            describe_expiry(*expires_at, now)
        ),
    }
}
