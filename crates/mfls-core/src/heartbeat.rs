use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::time::Instant;

/// Process-wide "last heartbeat" timestamp.
///
/// Stored as milliseconds since the clock was created, so a single atomic word is
/// enough. Writers race with `fetch_max`; the monitor tolerates a few ms of staleness.
/// Uses tokio's clock so paused-time tests can drive it.
#[derive(Debug)]
pub struct HeartbeatClock {
    launched: Instant,
    last_ms: AtomicU64,
}

impl HeartbeatClock {
    /// New clock; creation counts as the first heartbeat.
    pub fn new() -> Self {
        Self {
            launched: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        self.last_ms.fetch_max(self.elapsed_ms(), Ordering::Relaxed);
    }

    /// Time since the most recent heartbeat.
    pub fn idle_for(&self) -> Duration {
        let last = self.last_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    fn elapsed_ms(&self) -> u64 {
        self.launched.elapsed().as_millis() as u64
    }
}

impl Default for HeartbeatClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_grows_until_touched() {
        let clock = HeartbeatClock::new();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(clock.idle_for(), Duration::from_secs(5));

        clock.touch();
        assert_eq!(clock.idle_for(), Duration::ZERO);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(clock.idle_for(), Duration::from_millis(1500));
    }
}
