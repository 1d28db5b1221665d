use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Why a daemon stopped serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// No heartbeat within the idle timeout.
    Idle,
    /// SIGTERM or SIGINT.
    Signal,
    /// Requested in-process.
    Stopped,
}

/// One-shot shutdown latch shared by the server, the idle monitor and signal handlers.
///
/// Every trigger cancels the same token; only the first one records its reason.
#[derive(Debug, Clone, Default)]
pub struct ShutdownTrigger {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` if this call was the first trigger.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let trigger = ShutdownTrigger::new();
        assert!(!trigger.is_triggered());
        assert_eq!(trigger.reason(), None);

        let clone = trigger.clone();
        assert!(clone.trigger(ShutdownReason::Idle));
        assert!(!trigger.trigger(ShutdownReason::Signal));

        assert!(trigger.is_triggered());
        assert_eq!(trigger.reason(), Some(ShutdownReason::Idle));
        assert!(trigger.token().is_cancelled());
    }
}
