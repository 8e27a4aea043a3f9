//! Trailing-edge debouncer.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Collapses a burst of pokes into one trigger, fired one window after the
/// last poke.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Takes effect from the next poke.
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// Restart the window.
    pub fn poke(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Resolves once the window after the last poke has elapsed, and never
    /// while nothing is pending.
    ///
    /// Cancel safe: dropping the future before it resolves keeps the
    /// pending trigger.
    pub async fn expired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    #[tokio::test]
    async fn test_burst_of_pokes_fires_once_after_last_window() {
        let window = Duration::from_millis(200);
        let mut debouncer = Debouncer::new(window);
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for _ in 0..5 {
                let _ = tx.send(Instant::now());
                sleep(Duration::from_millis(40)).await;
            }
        });

        let mut last_event = None;
        let mut triggers = Vec::new();
        let observe_until = Instant::now() + Duration::from_millis(1000);

        loop {
            tokio::select! {
                Some(at) = rx.recv() => {
                    last_event = Some(at);
                    debouncer.poke();
                }
                _ = debouncer.expired() => triggers.push(Instant::now()),
                _ = sleep_until(observe_until) => break,
            }
        }

        assert_eq!(triggers.len(), 1);
        let last_event = last_event.unwrap();
        assert!(triggers[0] >= last_event + window);
    }

    #[tokio::test]
    async fn test_idle_debouncer_never_fires() {
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        assert!(timeout(Duration::from_millis(100), debouncer.expired())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_cancel_drops_pending_trigger() {
        let mut debouncer = Debouncer::new(Duration::from_millis(20));
        debouncer.poke();
        assert!(debouncer.is_pending());

        debouncer.cancel();
        assert!(timeout(Duration::from_millis(100), debouncer.expired())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_dropped_wait_keeps_trigger() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.poke();

        assert!(timeout(Duration::from_millis(10), debouncer.expired())
            .await
            .is_err());
        assert!(debouncer.is_pending());

        debouncer.expired().await;
        assert!(!debouncer.is_pending());
    }
}
