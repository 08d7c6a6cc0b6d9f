//! Controllable hold points
//!
//! A [`Hold`] parks the daemon calls that pass through it while closed.
//! It only uses a watch channel, so it works both inside a Tokio runtime
//! and under `futures::executor::block_on`.

use std::sync::Arc;
use tokio::sync::watch;

/// Gate that delays calls while closed
#[derive(Debug, Clone)]
pub struct Hold {
    closed: Arc<watch::Sender<bool>>,
}

impl Hold {
    /// Create an open hold
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            closed: Arc::new(tx),
        }
    }

    /// Park every call arriving from now on
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Release parked calls
    pub fn open(&self) {
        self.closed.send_replace(false);
    }

    /// Whether calls are currently parked
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once the hold is open
    pub async fn pass(&self) {
        let mut rx = self.closed.subscribe();
        loop {
            if !*rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Hold {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_hold_parks_until_opened() {
        let hold = Hold::new();
        hold.close();

        let parked = tokio::spawn({
            let hold = hold.clone();
            async move { hold.pass().await }
        });
        tokio::task::yield_now().await;
        assert!(!parked.is_finished());

        hold.open();
        parked.await.unwrap();
        assert!(!hold.is_closed());
    }

    #[test]
    fn test_open_hold_passes_without_runtime() {
        let hold = Hold::new();
        futures::executor::block_on(hold.pass());
    }
}
