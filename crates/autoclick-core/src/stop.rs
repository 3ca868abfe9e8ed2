//! Cooperative stop signal shared between a controller and a worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep while waiting on a signal
pub const SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in slices, returning early if stopped.
    /// Returns false when the wait was interrupted.
    pub fn sleep(&self, duration: Duration) -> bool {
        sleep_unless(Some(self), duration)
    }
}

/// Sleep in [`SLICE`] steps, watching `stop` if given
pub fn sleep_unless(stop: Option<&StopSignal>, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.is_some_and(StopSignal::is_stopped) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = StopSignal::new();
        let b = a.clone();
        b.stop();
        assert!(a.is_stopped());
    }

    #[test]
    fn sleep_interrupted_early() {
        let s = StopSignal::new();
        let s2 = s.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            s2.stop();
        });
        let started = Instant::now();
        assert!(!s.sleep(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
        t.join().unwrap();
    }

    #[test]
    fn sleep_completes() {
        let started = Instant::now();
        assert!(sleep_unless(None, Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
