//! Daemon, runtime and supervisor settings.
//!
//! The binary fills these from flags with environment fallbacks; library users build
//! them directly.

use std::{path::PathBuf, time::Duration};

use crate::error::DaemonError;

pub const DEFAULT_PORT: u16 = 0;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// What a daemon serves and for how long.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Parent directory of `.metaflow/`.
    pub storage_root: PathBuf,
    /// Listen port on 127.0.0.1; `0` lets the OS choose.
    pub port: u16,
    /// Heartbeat silence after which the daemon exits.
    pub idle_timeout: Duration,
    pub verbose: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            storage_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            port: DEFAULT_PORT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            verbose: false,
        }
    }
}

impl DaemonConfig {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.idle_timeout.is_zero() {
            return Err(DaemonError::InvalidConfig(
                "idle timeout must be greater than zero".into(),
            ));
        }
        if !self.storage_root.is_dir() {
            return Err(DaemonError::InvalidConfig(format!(
                "storage root {} is not a directory",
                self.storage_root.display()
            )));
        }
        Ok(())
    }
}

/// Settings of the in-process daemon.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub daemon: DaemonConfig,
    /// How often the idle monitor checks heartbeat recency.
    pub monitor_interval: Duration,
}

impl RuntimeConfig {
    pub fn new(daemon: DaemonConfig) -> Self {
        Self {
            daemon,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
        }
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), DaemonError> {
        self.daemon.validate()?;
        if self.monitor_interval.is_zero() {
            return Err(DaemonError::InvalidConfig(
                "monitor interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for managing a detached daemon.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub daemon: DaemonConfig,
    /// Executable that understands the `serve` subcommand.
    pub program: PathBuf,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
}

impl SupervisorConfig {
    /// Supervise daemons spawned from the current executable.
    pub fn new(daemon: DaemonConfig) -> Result<Self, DaemonError> {
        let program = std::env::current_exe().map_err(DaemonError::io("current executable"))?;
        Ok(Self::with_program(daemon, program))
    }

    pub fn with_program(daemon: DaemonConfig, program: impl Into<PathBuf>) -> Self {
        Self {
            daemon,
            program: program.into(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}
