//! In-process daemon: store, listener, state advertisement, idle monitor and server.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use mfls_api::{HttpApi, ServiceContext};
use mfls_core::{HeartbeatClock, MetadataStore};
use tokio::{
    net::TcpListener,
    signal::unix::{Signal, SignalKind, signal},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::RuntimeConfig,
    error::DaemonError,
    idle::{IdleMonitor, MonitorState},
    shutdown::{ShutdownReason, ShutdownTrigger},
    state::{DaemonState, StateFile},
};

/// Removes the state file when dropped, unless another process has taken it over.
struct StateGuard {
    file: StateFile,
    pid: u32,
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        match self.file.clear_if_owned(self.pid) {
            Ok(true) => debug!(path = %self.file.path().display(), "daemon state removed"),
            Ok(false) => debug!("daemon state not owned by this process; left in place"),
            Err(e) => warn!(error = %e, "failed to remove daemon state"),
        }
    }
}

pub struct DaemonRuntime {
    config: RuntimeConfig,
}

impl DaemonRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Bring the daemon up and return once it accepts requests.
    ///
    /// SIGTERM and SIGINT handlers are in place before the state file is written with
    /// the bound port, and the file is removed when the server task ends for any reason.
    pub async fn start(self) -> Result<RunningDaemon, DaemonError> {
        self.config.validate()?;
        let daemon = &self.config.daemon;

        let signals = SignalWatch::install()?;
        let store = MetadataStore::open(&daemon.storage_root)?;
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, daemon.port))
            .await
            .map_err(|source| DaemonError::Bind {
                port: daemon.port,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| DaemonError::Bind {
            port: daemon.port,
            source,
        })?;

        let state = DaemonState::new(
            std::process::id(),
            local_addr.port(),
            store.storage_root(),
        );
        let shutdown = ShutdownTrigger::new();
        let signals = signals.spawn(shutdown.clone());

        let state_file = StateFile::for_root(store.storage_root());
        if let Err(e) = state_file.write(&state) {
            shutdown.trigger(ShutdownReason::Stopped);
            return Err(e);
        }
        let guard = StateGuard {
            file: state_file,
            pid: state.pid,
        };

        let clock = Arc::new(HeartbeatClock::new());
        let monitor = IdleMonitor::new(
            Arc::clone(&clock),
            daemon.idle_timeout,
            self.config.monitor_interval,
        )
        .spawn(shutdown.clone());

        let router = HttpApi::new(ServiceContext::with_heartbeat(store, clock)).router();
        let token = shutdown.token();
        let server = tokio::spawn(async move {
            let _guard = guard;
            axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        });

        info!(
            pid = state.pid,
            addr = %local_addr,
            root = %state.storage_root.display(),
            idle_timeout_secs = daemon.idle_timeout.as_secs(),
            "metadata service listening"
        );

        Ok(RunningDaemon {
            state,
            local_addr,
            shutdown,
            server,
            monitor,
            signals,
        })
    }

    /// Serve until idle timeout, SIGTERM or SIGINT.
    pub async fn run(self) -> Result<ShutdownReason, DaemonError> {
        self.start().await?.wait().await
    }
}

/// Handle to a started daemon.
pub struct RunningDaemon {
    state: DaemonState,
    local_addr: SocketAddr,
    shutdown: ShutdownTrigger,
    server: JoinHandle<io::Result<()>>,
    monitor: JoinHandle<MonitorState>,
    signals: JoinHandle<()>,
}

impl RunningDaemon {
    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn url(&self) -> String {
        self.state.url()
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown.clone()
    }

    /// Ask the server to stop; pair with [`RunningDaemon::wait`].
    pub fn stop(&self) {
        self.shutdown.trigger(ShutdownReason::Stopped);
    }

    /// Wait for the server to finish and the state file to be gone.
    pub async fn wait(self) -> Result<ShutdownReason, DaemonError> {
        let served = self.server.await;
        self.shutdown.trigger(ShutdownReason::Stopped);
        if let Err(e) = self.monitor.await {
            warn!(error = %e, "idle monitor task failed");
        }
        if let Err(e) = self.signals.await {
            warn!(error = %e, "signal watcher task failed");
        }

        let reason = self.shutdown.reason().unwrap_or(ShutdownReason::Stopped);
        match served {
            Ok(Ok(())) => {
                info!(?reason, "metadata service stopped");
                Ok(reason)
            }
            Ok(Err(e)) => Err(DaemonError::Serve(e.to_string())),
            Err(e) => Err(DaemonError::Serve(format!("server task: {e}"))),
        }
    }

    pub async fn shutdown(self) -> Result<ShutdownReason, DaemonError> {
        self.stop();
        self.wait().await
    }
}

/// SIGTERM and SIGINT streams. Signals delivered after `install` are held until the
/// watcher task polls them.
struct SignalWatch {
    term: Signal,
    interrupt: Signal,
}

impl SignalWatch {
    fn install() -> Result<Self, DaemonError> {
        Ok(Self {
            term: signal(SignalKind::terminate()).map_err(DaemonError::SignalHandler)?,
            interrupt: signal(SignalKind::interrupt()).map_err(DaemonError::SignalHandler)?,
        })
    }

    fn spawn(mut self, shutdown: ShutdownTrigger) -> JoinHandle<()> {
        tokio::spawn(async move {
            let name = tokio::select! {
                _ = self.term.recv() => "SIGTERM",
                _ = self.interrupt.recv() => "SIGINT",
                _ = shutdown.cancelled() => return,
            };
            info!(signal = name, "shutdown requested");
            shutdown.trigger(ShutdownReason::Signal);
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::DaemonConfig;

    use super::*;

    fn config(dir: &tempfile::TempDir) -> RuntimeConfig {
        RuntimeConfig::new(DaemonConfig::new(dir.path()))
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serves_and_cleans_up_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = DaemonRuntime::new(config(&dir)).start().await.unwrap();

        let file = StateFile::for_root(&dir.path().canonicalize().unwrap());
        let state = file.read().unwrap().unwrap();
        assert_eq!(state.pid, std::process::id());
        assert_eq!(state.port, daemon.local_addr().port());
        assert_ne!(state.port, 0);

        let resp = client()
            .get(format!("{}/ping", daemon.url()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.text().await.unwrap(), "pong");

        let created = client()
            .post(format!("{}/flows/F/run", daemon.url()))
            .send()
            .await
            .unwrap();
        assert_eq!(created.status().as_u16(), 201);
        assert!(dir.path().join(".metaflow/F/1/_meta/_self.json").exists());

        assert_eq!(daemon.shutdown().await.unwrap(), ShutdownReason::Stopped);
        assert!(file.read().unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn idle_daemon_shuts_itself_down() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RuntimeConfig::new(
            DaemonConfig::new(dir.path()).with_idle_timeout(Duration::from_millis(300)),
        )
        .with_monitor_interval(Duration::from_millis(50));
        let daemon = DaemonRuntime::new(cfg).start().await.unwrap();
        let file = StateFile::for_root(&daemon.state().storage_root);

        let reason = tokio::time::timeout(Duration::from_secs(5), daemon.wait())
            .await
            .expect("daemon should stop on its own")
            .unwrap();
        assert_eq!(reason, ShutdownReason::Idle);
        assert!(!file.path().exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replaced_state_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = DaemonRuntime::new(config(&dir)).start().await.unwrap();
        let file = StateFile::for_root(&daemon.state().storage_root);

        let successor = DaemonState::new(daemon.state().pid + 1, 1, dir.path());
        file.write(&successor).unwrap();

        daemon.shutdown().await.unwrap();
        assert_eq!(file.read().unwrap(), Some(successor));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bind_failure_writes_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let cfg = RuntimeConfig::new(DaemonConfig::new(dir.path()).with_port(port));
        let err = DaemonRuntime::new(cfg).start().await.err().unwrap();
        assert!(matches!(err, DaemonError::Bind { port: p, .. } if p == port));
        assert!(!StateFile::for_root(&dir.path().canonicalize().unwrap())
            .path()
            .exists());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_binding() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RuntimeConfig::new(
            DaemonConfig::new(dir.path()).with_idle_timeout(Duration::ZERO),
        );
        let err = DaemonRuntime::new(cfg).start().await.err().unwrap();
        assert!(matches!(err, DaemonError::InvalidConfig(_)));
    }
}
