use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn wall_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Shared coarse-resolution clock, updated by a ticker task instead of a
/// syscall per read. Cache expiry math only needs second resolution.
#[derive(Debug)]
pub struct CoarseClock {
    now: AtomicU64,
}

impl CoarseClock {
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(wall_secs()),
        }
    }

    #[inline]
    pub fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    /// Re-reads the wall clock. Called by the ticker task once per second.
    pub fn tick(&self) {
        self.now.store(wall_secs(), Ordering::Relaxed);
    }

    /// Pins the clock to an arbitrary second. Only meaningful when no ticker
    /// is running against this instance.
    pub fn set(&self, secs: u64) {
        self.now.store(secs, Ordering::Relaxed);
    }
}

impl Default for CoarseClock {
    fn default() -> Self {
        Self::new()
    }
}
