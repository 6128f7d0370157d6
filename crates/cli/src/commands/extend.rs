// `tessera extend`: renew a lease that is close to expiry.

use chrono::Utc;
use clap::Args;
use tessera_common::lease::ExtendOutcome;
use tessera_common::protocol::lease::ResourceParams;
use tessera_common::protocol::rpc_methods;

use super::{call_daemon, CommonArgs};
use crate::exit_code::ExitCode;
use crate::output::{self, describe_expiry};

#[derive(Debug, Args)]
pub struct ExtendArgs {
    /// Resource id.
    pub resource: String,

    #[arg(long)]
    pub holder: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

pub fn run(args: ExtendArgs) -> anyhow::Result<ExitCode> {
    let format = args.common.format();
    let client = args.common.client();
    let params = ResourceParams { resource: args.resource, holder: args.holder };

    let outcome: ExtendOutcome =
        call_daemon(format, async move { client.call(rpc_methods::LEASE_EXTEND, params).await })?;

    output::print_output(format, &outcome, format_human)?;
    Ok(exit_code(&outcome))
}

/// Not due and rate limited are normal answers; only a missing lease fails.
fn exit_code(outcome: &ExtendOutcome) -> ExitCode {
    match outcome {
        ExtendOutcome::NotHeld { .. } => ExitCode::Error,
        _ => ExitCode::Success,
    }
}

fn format_human(outcome: &ExtendOutcome) -> String {
    match outcome {
        ExtendOutcome::Extended { lease } => format!(
            "extended {} until {}",
            lease.resource_id,
            describe_expiry(lease.expires_at, Utc::now())
        ),
        ExtendOutcome::NotHeld { resource_id } => {
            format!("you do not hold an active lease on {resource_id}")
        }
        ExtendOutcome::NotDue { resource_id, remaining_sec } => {
            format!("{resource_id} does not need extending yet ({remaining_sec}s left)")
        }
        ExtendOutcome::RateLimited { resource_id, retry_after_sec } => {
            format!("{resource_id} was extended recently; try again in {retry_after_sec}s")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_held_fails() {
        let not_held = ExtendOutcome::NotHeld { resource_id: "a.md".into() };
        let not_due = ExtendOutcome::NotDue { resource_id: "a.md".into(), remaining_sec: 400 };
        let limited = ExtendOutcome::RateLimited { resource_id: "a.md".into(), retry_after_sec: 12 };
        assert_eq!(exit_code(&not_held), ExitCode::Error);
        assert_eq!(exit_code(&not_due), ExitCode::Success);
        assert_eq!(exit_code(&limited), ExitCode::Success);
    }

    #[test]
    fn human_format_mentions_wait() {
        let limited = ExtendOutcome::RateLimited { resource_id: "a.md".into(), retry_after_sec: 12 };
        assert_eq!(format_human(&limited), "a.md was extended recently; try again in 12s");
    }
}
