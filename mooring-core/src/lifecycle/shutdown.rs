//! Process-wide shutdown signal shared by the event loop and every watcher

use std::sync::Arc;

use tokio::sync::watch;

/// Creates a connected trigger and signal pair.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        ShutdownTrigger {
            sender: Arc::new(sender),
        },
        ShutdownSignal { receiver },
    )
}

/// Closes the shutdown signal. Closing is permanent.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Fires the signal. Returns true for the call that actually closed it.
    pub fn trigger(&self) -> bool {
        !self.sender.send_replace(true)
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Observes the shutdown signal.
///
/// Dropping every trigger also counts as shutdown, so an owner that goes away
/// without an orderly stop still releases all waiters.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown fires or every trigger is gone.
    pub async fn wait(&self) {
        let mut receiver = self.receiver.clone();
        let _ = receiver.wait_for(|closed| *closed).await;
    }

    /// Non-blocking check, also true once every trigger is gone.
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[tokio::test]
    async fn test_trigger_releases_every_waiter() {
        let (trigger, signal) = shutdown_channel();

        let mut first = task::spawn(signal.wait());
        let second_signal = signal.clone();
        let mut second = task::spawn(second_signal.wait());
        assert_pending!(first.poll());
        assert_pending!(second.poll());
        assert!(!signal.is_triggered());

        assert!(trigger.trigger());
        assert!(!trigger.trigger());

        assert!(first.is_woken());
        assert_ready!(first.poll());
        assert_ready!(second.poll());
        assert!(signal.is_triggered());
        assert!(trigger.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_after_trigger_returns_immediately() {
        let (trigger, signal) = shutdown_channel();
        trigger.trigger();

        timeout(Duration::from_millis(100), signal.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, signal) = shutdown_channel();
        drop(trigger);

        assert!(signal.is_triggered());
        timeout(Duration::from_millis(100), signal.wait())
            .await
            .unwrap();
    }
}
