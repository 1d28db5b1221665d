use std::{sync::Arc, time::Duration};

use mfls_core::HeartbeatClock;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, trace};

use crate::shutdown::{ShutdownReason, ShutdownTrigger};

/// Terminal state of an [`IdleMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Stopped because something else shut the daemon down.
    Watching,
    /// Stopped after triggering an idle shutdown.
    Triggered,
}

/// Shuts the daemon down after heartbeat silence.
///
/// Checks every `interval`, so shutdown happens at most `idle_timeout + interval`
/// after the last heartbeat.
pub struct IdleMonitor {
    clock: Arc<HeartbeatClock>,
    idle_timeout: Duration,
    interval: Duration,
}

impl IdleMonitor {
    pub fn new(clock: Arc<HeartbeatClock>, idle_timeout: Duration, interval: Duration) -> Self {
        Self {
            clock,
            idle_timeout,
            interval,
        }
    }

    pub fn spawn(self, shutdown: ShutdownTrigger) -> JoinHandle<MonitorState> {
        tokio::spawn(self.watch(shutdown))
    }

    async fn watch(self, shutdown: ShutdownTrigger) -> MonitorState {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("idle monitor stopped");
                    return MonitorState::Watching;
                }
                _ = ticker.tick() => {
                    let idle = self.clock.idle_for();
                    if idle > self.idle_timeout {
                        info!(
                            idle_secs = idle.as_secs(),
                            timeout_secs = self.idle_timeout.as_secs(),
                            "no heartbeat within idle timeout; shutting down"
                        );
                        shutdown.trigger(ShutdownReason::Idle);
                        return MonitorState::Triggered;
                    }
                    trace!(idle_ms = idle.as_millis() as u64, "idle check");
                }
            }
        }
    }
}
