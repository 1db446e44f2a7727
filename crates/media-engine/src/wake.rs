// crates/media-engine/src/wake.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Platform hook keeping the device awake while audio plays.
///
/// Implementations must tolerate redundant calls; the guard below already
/// filters them, but a platform layer may be shared.
pub trait WakeLock: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// Default implementation for platforms without a wake-lock concept
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&self) {}
    fn release(&self) {}
}

/// Wraps a wake lock so acquire/release only reach the platform on actual
/// held-state changes. Every code path that stops playback can call
/// `release` unconditionally.
pub struct WakeGuard {
    lock: Arc<dyn WakeLock>,
    held: AtomicBool,
}

impl WakeGuard {
    pub fn new(lock: Arc<dyn WakeLock>) -> Self {
        Self {
            lock,
            held: AtomicBool::new(false),
        }
    }

    pub fn acquire(&self) {
        if !self.held.swap(true, Ordering::SeqCst) {
            self.lock.acquire();
        }
    }

    pub fn release(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            self.lock.release();
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        acquires: AtomicUsize,
        releases: AtomicUsize,
    }

    impl WakeLock for Counting {
        fn acquire(&self) {
            self.acquires.fetch_add(1, Ordering::SeqCst);
        }
        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn redundant_calls_are_filtered() {
        let counting = Arc::new(Counting {
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        });
        let guard = WakeGuard::new(counting.clone());

        guard.release();
        assert_eq!(counting.releases.load(Ordering::SeqCst), 0);

        guard.acquire();
        guard.acquire();
        assert_eq!(counting.acquires.load(Ordering::SeqCst), 1);
        assert!(guard.is_held());

        guard.release();
        guard.release();
        assert_eq!(counting.releases.load(Ordering::SeqCst), 1);
        assert!(!guard.is_held());
    }
}
