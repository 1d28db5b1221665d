//! Start, stop and inspect a detached daemon through its state file.

use std::{fs, process::Stdio};

use tokio::{
    process::{Child, Command},
    time::{self, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    config::SupervisorConfig,
    error::DaemonError,
    probe::Probe,
    proc,
    state::{DaemonState, StateFile},
};

/// Result of [`ProcessSupervisor::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(DaemonState),
    AlreadyRunning(DaemonState),
}

impl StartOutcome {
    pub fn state(&self) -> &DaemonState {
        match self {
            StartOutcome::Started(s) | StartOutcome::AlreadyRunning(s) => s,
        }
    }

    pub fn into_state(self) -> DaemonState {
        match self {
            StartOutcome::Started(s) | StartOutcome::AlreadyRunning(s) => s,
        }
    }
}

pub struct ProcessSupervisor {
    config: SupervisorConfig,
    state_file: StateFile,
    probe: Probe,
}

impl ProcessSupervisor {
    /// The storage root must exist; it is canonicalized so every caller finds the
    /// same state file.
    pub fn new(mut config: SupervisorConfig) -> Result<Self, DaemonError> {
        config.daemon.validate()?;
        let root = &config.daemon.storage_root;
        config.daemon.storage_root = root.canonicalize().map_err(DaemonError::io(root))?;

        let state_file = StateFile::for_root(&config.daemon.storage_root);
        let probe = Probe::new(Probe::DEFAULT_TIMEOUT)?;
        Ok(Self {
            config,
            state_file,
            probe,
        })
    }

    pub fn state_file(&self) -> &StateFile {
        &self.state_file
    }

    /// The live daemon for this root, if any. Stale state is removed.
    pub fn status(&self) -> Result<Option<DaemonState>, DaemonError> {
        let Some(state) = self.state_file.read()? else {
            return Ok(None);
        };
        if proc::pid_alive(state.pid) {
            return Ok(Some(state));
        }
        warn!(pid = state.pid, port = state.port, "discarding stale daemon state");
        self.state_file.clear()?;
        Ok(None)
    }

    /// Spawn a detached daemon unless one is already running for this root.
    pub async fn start(&self) -> Result<StartOutcome, DaemonError> {
        if let Some(state) = self.status()? {
            debug!(pid = state.pid, port = state.port, "daemon already running");
            return Ok(StartOutcome::AlreadyRunning(state));
        }

        let mut child = self.spawn()?;
        let Some(pid) = child.id() else {
            return Err(self.unreachable("daemon exited before it could be tracked"));
        };
        debug!(pid, program = %self.config.program.display(), "daemon spawned");

        match self.await_ready(&mut child, pid).await {
            Ok(state) => {
                info!(pid, url = %state.url(), "daemon started");
                Ok(StartOutcome::Started(state))
            }
            Err(e) => {
                if let Err(kill) = child.start_kill() {
                    debug!(pid, error = %kill, "daemon already gone");
                }
                self.state_file.clear_if_owned(pid)?;
                Err(e)
            }
        }
    }

    /// Same as [`ProcessSupervisor::start`], returning the state either way.
    pub async fn ensure_running(&self) -> Result<DaemonState, DaemonError> {
        self.start().await.map(StartOutcome::into_state)
    }

    /// SIGTERM the running daemon and forget it. `false` if none was running.
    ///
    /// Does not wait for the process to exit.
    pub fn stop(&self) -> Result<bool, DaemonError> {
        let Some(state) = self.status()? else {
            return Ok(false);
        };
        match proc::terminate(state.pid) {
            Ok(true) => info!(pid = state.pid, "daemon signalled"),
            Ok(false) => debug!(pid = state.pid, "daemon exited before it was signalled"),
            Err(source) => {
                return Err(DaemonError::Signal {
                    pid: state.pid,
                    source,
                });
            }
        }
        self.state_file.clear()?;
        Ok(true)
    }

    fn spawn(&self) -> Result<Child, DaemonError> {
        let daemon = &self.config.daemon;
        let mut cmd = Command::new(&self.config.program);
        cmd.arg("serve")
            .arg("--port")
            .arg(daemon.port.to_string())
            .arg("--metaflow-root")
            .arg(&daemon.storage_root)
            .arg("--idle-timeout")
            .arg(daemon.idle_timeout.as_secs().max(1).to_string());
        if daemon.verbose {
            cmd.arg("--verbose");
        }

        cmd.stdin(Stdio::null()).stdout(Stdio::null());
        if daemon.verbose {
            cmd.stderr(self.open_log()?);
        } else {
            cmd.stderr(Stdio::null());
        }
        proc::detach(&mut cmd);

        cmd.spawn().map_err(|source| DaemonError::Spawn {
            program: self.config.program.clone(),
            source,
        })
    }

    fn open_log(&self) -> Result<fs::File, DaemonError> {
        let path = StateFile::log_path(&self.config.daemon.storage_root);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(DaemonError::io(dir))?;
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(DaemonError::io(&path))
    }

    /// Poll until the child advertises itself and answers `/ping`.
    async fn await_ready(&self, child: &mut Child, pid: u32) -> Result<DaemonState, DaemonError> {
        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(DaemonError::io(&self.config.program))?
            {
                return Err(self.unreachable(&format!("daemon exited early ({status})")));
            }

            if let Some(state) = self.state_file.read()? {
                if state.pid == pid && self.probe.ping(state.port).await {
                    return Ok(state);
                }
            }

            if Instant::now() >= deadline {
                return Err(self.unreachable(&format!(
                    "no answer within {}s",
                    self.config.startup_timeout.as_secs_f32()
                )));
            }
            time::sleep(self.config.poll_interval).await;
        }
    }

    fn unreachable(&self, what: &str) -> DaemonError {
        let daemon = &self.config.daemon;
        let log = StateFile::log_path(&daemon.storage_root);
        let output = if daemon.verbose {
            format!("daemon output is in {}", log.display())
        } else {
            format!(
                "set METAFLOW_LOCAL_SERVICE_DEBUG=1 to capture daemon output in {}",
                log.display()
            )
        };
        DaemonError::Unreachable {
            port: daemon.port,
            hint: format!(
                "{what}; {output}. Retry, or pick another port with --port / METAFLOW_LOCAL_SERVICE_PORT"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::DaemonConfig;

    use super::*;

    /// Above the kernel's maximum `pid_max` (2^22), so never allocated.
    const NEVER_A_PID: u32 = 1 << 22;

    fn supervisor(dir: &tempfile::TempDir, program: &str) -> ProcessSupervisor {
        let cfg = SupervisorConfig::with_program(DaemonConfig::new(dir.path()), program)
            .with_startup_timeout(Duration::from_secs(2));
        ProcessSupervisor::new(cfg).unwrap()
    }

    #[test]
    fn no_state_means_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, "/nonexistent/daemon");
        assert!(sup.status().unwrap().is_none());
        assert!(!sup.stop().unwrap());
    }

    #[test]
    fn stale_state_is_healed_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, "/nonexistent/daemon");
        sup.state_file()
            .write(&DaemonState::new(NEVER_A_PID, 9999, dir.path()))
            .unwrap();

        assert!(sup.status().unwrap().is_none());
        assert!(!sup.state_file().path().exists());
    }

    #[test]
    fn stop_on_stale_state_reports_nothing_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, "/nonexistent/daemon");
        sup.state_file()
            .write(&DaemonState::new(NEVER_A_PID, 9999, dir.path()))
            .unwrap();

        assert!(!sup.stop().unwrap());
        assert!(!sup.state_file().path().exists());
    }

    #[tokio::test]
    async fn start_against_live_daemon_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        // Spawning this program would fail, so success proves nothing was spawned.
        let sup = supervisor(&dir, "/nonexistent/daemon");
        let live = DaemonState::new(std::process::id(), 4321, dir.path());
        sup.state_file().write(&live).unwrap();

        let outcome = sup.start().await.unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyRunning(live.clone()));
        assert_eq!(sup.state_file().read().unwrap(), Some(live));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, "/nonexistent/daemon");
        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, DaemonError::Spawn { .. }));
    }

    #[tokio::test]
    async fn early_exit_is_unreachable_with_hint() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, "true");

        let err = sup.start().await.unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, DaemonError::Unreachable { .. }));
        assert!(message.contains("exited early"), "{message}");
        assert!(message.contains("METAFLOW_LOCAL_SERVICE_DEBUG"), "{message}");
        assert!(!sup.state_file().path().exists());
    }

    #[tokio::test]
    async fn silent_daemon_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hang.sh");
        fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let cfg = SupervisorConfig::with_program(DaemonConfig::new(dir.path()), &script)
            .with_startup_timeout(Duration::from_millis(600));
        let sup = ProcessSupervisor::new(cfg).unwrap();

        let started = Instant::now();
        let err = sup.start().await.unwrap_err();
        assert!(err.to_string().contains("no answer"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
