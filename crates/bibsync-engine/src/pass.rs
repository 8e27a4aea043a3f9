//! Re-entrancy guard and pacing shared by the sync, import and check passes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// In-progress flag for one kind of pass.
///
/// A second request while a pass is active gets `None` from
/// [`PassFlag::try_begin`] and is expected to drop itself.
#[derive(Debug, Default)]
pub struct PassFlag(AtomicBool);

impl PassFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self) -> Option<PassGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard(&self.0))
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Clears its flag when dropped, including on early return or error.
#[derive(Debug)]
pub struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fixed-size batching with a pause between batches, to stay within the
/// rate limits of external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPacing {
    pub batch_size: usize,
    pub pause: Duration,
}

impl BatchPacing {
    pub fn new(batch_size: usize, pause: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            pause,
        }
    }

    /// No pause, one batch per key.
    pub fn unpaced() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn batches<'a, T>(&self, items: &'a [T]) -> std::slice::Chunks<'a, T> {
        items.chunks(self.batch_size.max(1))
    }

    /// Sleep between two batches.
    pub async fn pause(&self) {
        if !self.pause.is_zero() {
            debug!("Pausing {:?} between batches", self.pause);
            tokio::time::sleep(self.pause).await;
        }
    }
}

impl Default for BatchPacing {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(500))
    }
}
