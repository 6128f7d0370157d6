// `tessera mine`: active leases held by you (or `--holder`).

use chrono::{DateTime, Utc};
use clap::Args;
use tessera_common::protocol::lease::{HolderParams, LeaseMineResult};
use tessera_common::protocol::rpc_methods;

use super::{call_daemon, CommonArgs};
use crate::exit_code::ExitCode;
use crate::output::{self, describe_expiry};

#[derive(Debug, Args)]
pub struct MineArgs {
    #[arg(long)]
    pub holder: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

pub fn run(args: MineArgs) -> anyhow::Result<ExitCode> {
    let format = args.common.format();
    let client = args.common.client();
    let params = HolderParams { holder: args.holder };

    let result: LeaseMineResult =
        call_daemon(format, async move { client.call(rpc_methods::LEASE_MINE, params).await })?;

    output::print_output(format, &result, |result| format_human(result, Utc::now()))?;
    Ok(ExitCode::Success)
}

fn format_human(result: &LeaseMineResult, now: DateTime<Utc>) -> String {
    if result.leases.is_empty() {
        return format!("{} holds no leases", result.holder);
    }
    let width = result.leases.iter().map(|lease| lease.resource_id.len()).max().unwrap_or(0);
    result
        .leases
        .iter()
        .map(|lease| {
            format!("{:<width$}  {}", lease.resource_id, describe_expiry(lease.expires_at, now))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
