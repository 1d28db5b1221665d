use std::process::ExitCode;

use anyhow::Context;
use mfls_daemon::{
    DaemonRuntime, ProcessSupervisor, RuntimeConfig, StartOutcome, SupervisorConfig,
};
use tracing::{debug, info};

use crate::cli::{Command, DaemonOpts};

const SERVICE_URL_ENV: &str = "METAFLOW_SERVICE_URL";
const DEFAULT_METADATA_ENV: &str = "METAFLOW_DEFAULT_METADATA";

pub async fn dispatch(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Start(opts) => start(&opts).await,
        Command::Stop(opts) => stop(&opts),
        Command::Status(opts) => status(&opts),
        Command::Url(opts) => url(&opts),
        Command::Run { opts, command } => run(&opts, &command).await,
        Command::Serve(opts) => serve(&opts).await,
    }
}

fn supervisor(opts: &DaemonOpts) -> anyhow::Result<ProcessSupervisor> {
    let config = SupervisorConfig::new(opts.daemon_config()?)?;
    Ok(ProcessSupervisor::new(config)?)
}

async fn start(opts: &DaemonOpts) -> anyhow::Result<ExitCode> {
    match supervisor(opts)?.start().await? {
        StartOutcome::AlreadyRunning(state) => {
            println!("Already running: pid={}  url={}", state.pid, state.url());
        }
        StartOutcome::Started(state) => {
            println!("Started: pid={}  url={}", state.pid, state.url());
            println!("  {SERVICE_URL_ENV}={}", state.url());
            println!("  {DEFAULT_METADATA_ENV}=service");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn stop(opts: &DaemonOpts) -> anyhow::Result<ExitCode> {
    if supervisor(opts)?.stop()? {
        println!("Stopped.");
    } else {
        println!("No running daemon found.");
    }
    Ok(ExitCode::SUCCESS)
}

fn status(opts: &DaemonOpts) -> anyhow::Result<ExitCode> {
    match supervisor(opts)?.status()? {
        Some(state) => {
            println!("Running: pid={}  url={}", state.pid, state.url());
            println!("  metaflow_root={}", state.storage_root.display());
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("Not running.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn url(opts: &DaemonOpts) -> anyhow::Result<ExitCode> {
    match supervisor(opts)?.status()? {
        Some(state) => {
            print!("{}", state.url());
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("Not running.");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Ensure the daemon is up, then run `command` against it and mirror its exit code.
///
/// The daemon outlives the command; its idle timeout cleans it up.
async fn run(opts: &DaemonOpts, command: &[String]) -> anyhow::Result<ExitCode> {
    let state = supervisor(opts)?.ensure_running().await?;
    eprintln!(
        "metaflow-local-service running at {} (pid={})",
        state.url(),
        state.pid
    );

    let (program, args) = command
        .split_first()
        .context("no command given")?;
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .env(SERVICE_URL_ENV, state.url())
        .env(DEFAULT_METADATA_ENV, "service")
        .spawn()
        .with_context(|| format!("failed to run {program}"))?;

    // The child shares our process group and sees ^C itself; stay alive to report its exit.
    let status = loop {
        tokio::select! {
            status = child.wait() => break status.with_context(|| format!("failed to wait for {program}"))?,
            _ = tokio::signal::ctrl_c() => debug!("interrupt delivered to child"),
        }
    };
    Ok(exit_code(status))
}

async fn serve(opts: &DaemonOpts) -> anyhow::Result<ExitCode> {
    let config = RuntimeConfig::new(opts.daemon_config()?);
    let reason = DaemonRuntime::new(config).run().await?;
    info!(?reason, "daemon exiting");
    Ok(ExitCode::SUCCESS)
}

fn exit_code(status: std::process::ExitStatus) -> ExitCode {
    ExitCode::from(status_byte(status))
}

/// Exit code of a finished child, with `128 + signal` for signal deaths.
fn status_byte(status: std::process::ExitStatus) -> u8 {
    use std::os::unix::process::ExitStatusExt;

    let code = status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1);
    u8::try_from(code).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use std::{os::unix::process::ExitStatusExt, process::ExitStatus};

    use super::*;

    #[test]
    fn exit_codes_follow_the_child() {
        // Raw wait statuses: exit code in the high byte, terminating signal in the low bits.
        assert_eq!(status_byte(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(status_byte(ExitStatus::from_raw(0)), 0);
        assert_eq!(status_byte(ExitStatus::from_raw(15)), 128 + 15);
    }
}
