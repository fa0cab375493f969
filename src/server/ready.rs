//! Node network readiness

use std::time::Duration;
use tokio::sync::watch;

/// Fired once when the node network is initialized
#[derive(Debug)]
pub struct ReadySignal {
    tx: watch::Sender<bool>,
}

/// Waits for [`ReadySignal::mark_ready`]; any number of clones observe the
/// same signal.
#[derive(Debug, Clone)]
pub struct ReadyWaiter {
    rx: watch::Receiver<bool>,
}

pub fn network_readiness() -> (ReadySignal, ReadyWaiter) {
    let (tx, rx) = watch::channel(false);
    (ReadySignal { tx }, ReadyWaiter { rx })
}

impl ReadySignal {
    pub fn mark_ready(self) {
        self.tx.send_replace(true);
    }
}

impl ReadyWaiter {
    /// Already-ready waiter, for callers with no initialization step.
    pub fn ready() -> Self {
        let (signal, waiter) = network_readiness();
        signal.mark_ready();
        waiter
    }

    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns false if the network is still not ready after `limit`, or if
    /// the signal was dropped without firing.
    pub async fn wait(&self, limit: Duration) -> bool {
        let mut rx = self.rx.clone();
        let fired = matches!(
            tokio::time::timeout(limit, rx.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        );
        fired
    }
}
