// `tessera show`: who holds a resource right now.

use chrono::Utc;
use clap::Args;
use tessera_common::protocol::lease::{LeaseGetResult, ResourceParams};
use tessera_common::protocol::rpc_methods;

use super::{call_daemon, CommonArgs};
use crate::exit_code::ExitCode;
use crate::output::{self, describe_expiry};

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Resource id.
    pub resource: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

pub fn run(args: ShowArgs) -> anyhow::Result<ExitCode> {
    let format = args.common.format();
    let client = args.common.client();
    let params = ResourceParams { resource: args.resource, holder: None };

    let result: LeaseGetResult =
        call_daemon(format, async move { client.call(rpc_methods::LEASE_GET, params).await })?;

    output::print_output(format, &result, format_human)?;
    Ok(ExitCode::Success)
}

fn format_human(result: &LeaseGetResult) -> String {
    match &result.lease {
        Some(lease) => format!(
            "{} is reserved by {} until {}",
            lease.resource_id,
            lease.holder,
            describe_expiry(lease.expires_at, Utc::now())
        ),
        None => format!("{} is free", result.resource),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_resource() {
        let result = LeaseGetResult { resource: "a.md".into(), lease: None };
        assert_eq!(format_human(&result), "a.md is free");
    }
}
