mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use commands::core_command::{Cli, Context};
use opthub_core::OptHubError;
use opthub_lib::settings::Settings;
use opthub_lib::telemetry::{init_tracing, level_for};

/// Entrypoint for the application
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json, level_for(cli.verbose));

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .downcast_ref::<OptHubError>()
                .map(OptHubError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let settings = Settings::from_env()?;
    let ctx = Context::new(&settings)?;

    cli.command.cmd_value().handle(&ctx).await
}
