use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand, builder::BoolishValueParser};
use mfls_daemon::DaemonConfig;
use mfls_observe::LoggerFormat;

#[derive(Parser, Debug)]
#[command(name = "metaflow-local-service", version)]
#[command(about = "Local Metaflow metadata service backed by .metaflow/ on disk", long_about = None)]
pub struct Cli {
    /// Log output format: text, json or journald.
    #[arg(
        long,
        global = true,
        env = "METAFLOW_LOCAL_SERVICE_LOG_FORMAT",
        default_value = "text",
        value_parser = parse_format
    )]
    pub log_format: LoggerFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(about = "Start the metadata service daemon in the background")]
    Start(DaemonOpts),

    #[command(about = "Stop the running daemon")]
    Stop(DaemonOpts),

    #[command(about = "Show whether a daemon is running (exit 1 if not)")]
    Status(DaemonOpts),

    #[command(about = "Print the service URL (exit 1 if not running)")]
    Url(DaemonOpts),

    #[command(about = "Ensure the daemon runs, then run CMD with the service URL exported")]
    Run {
        #[command(flatten)]
        opts: DaemonOpts,

        #[arg(
            value_name = "CMD",
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        command: Vec<String>,
    },

    /// Daemon entry point, spawned by `start`.
    #[command(hide = true)]
    Serve(DaemonOpts),
}

impl Command {
    pub fn opts(&self) -> &DaemonOpts {
        match self {
            Command::Start(opts)
            | Command::Stop(opts)
            | Command::Status(opts)
            | Command::Url(opts)
            | Command::Serve(opts)
            | Command::Run { opts, .. } => opts,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DaemonOpts {
    /// Port to listen on; 0 picks a free port.
    #[arg(long, env = "METAFLOW_LOCAL_SERVICE_PORT", default_value_t = 0)]
    pub port: u16,

    /// Parent directory of .metaflow/ [default: current directory].
    #[arg(long = "metaflow-root", value_name = "PATH", env = "METAFLOW_LOCAL_SERVICE_ROOT")]
    pub metaflow_root: Option<PathBuf>,

    /// Seconds of heartbeat silence before the daemon exits.
    #[arg(long, value_name = "SECONDS", env = "METAFLOW_LOCAL_SERVICE_IDLE_TIMEOUT", default_value_t = 300)]
    pub idle_timeout: u64,

    /// Verbose logging; a started daemon writes its log under the root.
    #[arg(
        long,
        env = "METAFLOW_LOCAL_SERVICE_DEBUG",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub verbose: bool,
}

impl DaemonOpts {
    pub fn daemon_config(&self) -> anyhow::Result<DaemonConfig> {
        let root = match &self.metaflow_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().context("cannot determine current directory")?,
        };
        Ok(DaemonConfig::new(root)
            .with_port(self.port)
            .with_idle_timeout(Duration::from_secs(self.idle_timeout))
            .with_verbose(self.verbose))
    }
}

fn parse_format(s: &str) -> Result<LoggerFormat, mfls_observe::LoggerError> {
    s.parse()
}
