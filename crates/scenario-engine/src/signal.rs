//! Single-shot signals
//!
//! A [`Signal`] is resolved at most once; the first resolver wins and every
//! waiter, past or future, observes that value. Named events and branch
//! completion handles are both signals.
//!
//! Waiters subscribe to the signal's sender. When the last clone of a signal
//! is dropped (an event being reset), its pending waiters are left pending
//! forever rather than woken.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<Option<i32>>>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Resolve with `value`; returns `false` if already resolved
    pub fn resolve(&self, value: i32) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(value);
            true
        })
    }

    pub fn value(&self) -> Option<i32> {
        *self.tx.borrow()
    }

    pub fn is_resolved(&self) -> bool {
        self.value().is_some()
    }

    /// Wait for the resolution value
    ///
    /// The returned future does not keep the signal alive.
    pub fn wait(&self) -> impl Future<Output = i32> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let resolved = rx.wait_for(Option::is_some).await.map(|value| *value);
            match resolved {
                Ok(Some(value)) => value,
                // Dropped before resolution
                _ => std::future::pending().await,
            }
        }
    }

    /// True when both handles refer to the same signal
    pub fn same_as(&self, other: &Signal) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_resolver_wins() {
        let signal = Signal::new();
        let waiter = tokio::spawn(signal.wait());

        assert!(signal.resolve(3));
        assert!(!signal.resolve(4));
        assert_eq!(waiter.await.unwrap(), 3);
        assert_eq!(signal.value(), Some(3));

        // Late waiters see the stored value
        assert_eq!(signal.wait().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_signal_leaves_waiters_pending() {
        let signal = Signal::new();
        let waiter = signal.wait();
        drop(signal);

        let result = tokio::time::timeout(Duration::from_secs(60), waiter).await;
        assert!(result.is_err());
    }
}
