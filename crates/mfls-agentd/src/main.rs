mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use mfls_observe::{LoggerConfig, logger_init};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let verbose = cli.command.opts().verbose;
    let level = match &cli.command {
        Command::Serve(_) => "warn",
        _ => "warn,mfls_daemon=info",
    };
    let cfg = LoggerConfig::default()
        .with_format(cli.log_format)
        .with_level(level)
        .verbose(verbose);
    logger_init(&cfg)?;

    commands::dispatch(cli.command).await
}
