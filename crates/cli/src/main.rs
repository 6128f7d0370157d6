// tessera CLI entry point.

use clap::Parser;

mod client;
mod commands;
mod exit_code;
mod output;

use exit_code::ExitCode;

#[derive(Parser)]
#[command(name = "tessera", version, about = "Exclusive-edit leases over a shared git ledger")]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match commands::run(cli.command) {
        Ok(code) => code.into(),
        Err(error) => {
            tracing::debug!(error = ?error, "command failed");
            ExitCode::from_error(&error).into()
        }
    }
}
