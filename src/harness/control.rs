use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Shared stop signal; cloning yields a handle to the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals every holder and wakes sleepers.
    pub fn cancel(&self) {
        let (flag, wake) = &*self.inner;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        wake.notify_all();
    }

    /// Clears the signal so the same handles can stop a later run.
    pub fn reset(&self) {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns `false` if the token was cancelled before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        if duration.is_zero() {
            return !*guard;
        }
        let (guard, _) = wake
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard
    }
}

/// Point-in-time view of the query counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub executed: u64,
    pub failed: u64,
}

impl ProgressSnapshot {
    pub fn total(&self) -> u64 {
        self.executed + self.failed
    }
}

/// Query counters shared by all workers of one harness.
///
/// Reporting only; nothing in the simulation reads these values back.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    executed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl Progress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record(&self, success: bool) {
        let counter = if success { &self.executed } else { &self.failed };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn cancel_wakes_sleepers() {
        let token = CancellationToken::new();
        let sleeper = token.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(!handle.join().expect("join"));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(token.is_cancelled());
        assert!(!token.sleep(Duration::from_millis(1)));
    }

    #[test]
    fn reset_rearms_every_handle() {
        let token = CancellationToken::new();
        let other = token.clone();
        token.cancel();
        assert!(other.is_cancelled());
        other.reset();
        assert!(!token.is_cancelled());
        assert!(token.sleep(Duration::from_millis(1)));
    }

    #[test]
    fn uncancelled_sleep_completes() {
        let token = CancellationToken::new();
        assert!(token.sleep(Duration::from_millis(5)));
        assert!(token.sleep(Duration::ZERO));
    }

    #[test]
    fn progress_counts_across_threads() {
        let progress = Progress::default();
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let progress = progress.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        progress.record((i + n) % 4 != 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.total(), 400);
        assert_eq!(snapshot.failed, 100);
    }
}
