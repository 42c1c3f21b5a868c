//! Request-wide cancellation propagation: a flag plus a broadcast so every
//! in-flight adapter call and chain round can react to the same signal
//! instead of polling a deadline directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Why a [`CancellationToken`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    /// The client disconnected.
    ClientDisconnected,
    /// The request-wide deadline elapsed.
    DeadlineExceeded,
}

/// Shared cancellation signal for one request's fan-out.
///
/// Cloning shares the same underlying flag; every adapter call and chain
/// round holds a clone and checks [`is_cancelled`](Self::is_cancelled)
/// before and after its own `tokio::time::timeout`.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    sender: broadcast::Sender<CancellationReason>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Fire the token. Idempotent: only the first call broadcasts a reason.
    pub fn cancel(&self, reason: CancellationReason) {
        if !self.cancelled.swap(true, Ordering::Relaxed) {
            let _ = self.sender.send(reason);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CancellationReason> {
        self.sender.subscribe()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_once_and_notifies_subscribers() {
        let token = CancellationToken::new();
        let mut rx = token.subscribe();
        assert!(!token.is_cancelled());

        token.cancel(CancellationReason::DeadlineExceeded);
        assert!(token.is_cancelled());
        assert_eq!(rx.recv().await.unwrap(), CancellationReason::DeadlineExceeded);

        // A second cancel with a different reason does not re-broadcast.
        token.cancel(CancellationReason::ClientDisconnected);
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel(CancellationReason::DeadlineExceeded);
        assert!(clone.is_cancelled());
    }
}
