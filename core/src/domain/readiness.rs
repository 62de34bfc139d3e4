//! One-shot readiness signal between the forward loop and request issuers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Fires once the local listener accepts connections.
///
/// Clones share the same signal. Once fired it stays fired, so waiters that
/// arrive late return immediately.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fires the gate. Returns false if it had already fired.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until the gate fires.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Waits until the gate fires or `timeout` elapses. Returns whether it fired.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready};

    use super::*;

    #[tokio::test]
    async fn test_fire_once() {
        let gate = ReadinessGate::new();
        assert!(!gate.is_fired());
        assert!(gate.fire());
        assert!(!gate.fire());
        assert!(gate.is_fired());
    }

    #[test]
    fn test_waiter_before_fire() {
        let gate = ReadinessGate::new();
        let mut waiter = tokio_test::task::spawn(gate.wait());

        assert_pending!(waiter.poll());
        assert!(gate.fire());
        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_late_waiters_return_immediately() {
        let gate = ReadinessGate::new();
        gate.fire();

        let waiters: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.wait_timeout(Duration::from_millis(50)).await })
            })
            .collect();

        for waiter in waiters {
            assert!(waiter.await.unwrap());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_without_fire() {
        let gate = ReadinessGate::new();
        assert!(!gate.wait_timeout(Duration::from_secs(1)).await);
    }
}
