//! Fixed-window attempt limiter for hot authentication paths.
//!
//! Station secret verification is deliberately expensive (argon2), so login
//! attempts are capped per key before the hash is ever computed. In-memory
//! and per-process; good enough for the handful of stations an event runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Above this many tracked keys, expired windows are swept before a new
/// attempt is recorded. Keys on the login path are caller-chosen, so the
/// map must not grow with attacker traffic.
const SWEEP_THRESHOLD: usize = 1024;

pub struct RateLimiter {
    max_attempts: u32,
    window: Duration,
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Records one attempt for the key; false once the window's budget is
    /// exhausted. The window resets when its span elapses.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            // A poisoned lock only ever holds counter state; keep serving.
            Err(poisoned) => poisoned.into_inner(),
        };

        if windows.len() >= SWEEP_THRESHOLD {
            let window = self.window;
            windows.retain(|_, (start, _)| now.duration_since(*start) < window);
        }

        let entry = windows.entry(key.to_string()).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;

        entry.1 <= self.max_attempts
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        match self.windows.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_budget_then_blocks() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        assert!(limiter.check("e1:S1"));
        assert!(limiter.check("e1:S1"));
        assert!(limiter.check("e1:S1"));
        assert!(!limiter.check("e1:S1"));
        assert!(!limiter.check("e1:S1"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.check("e1:S1"));
        assert!(!limiter.check("e1:S1"));
        assert!(limiter.check("e1:S2"));
        assert!(limiter.check("e2:S1"));
    }

    #[test]
    fn expired_windows_are_swept_once_map_grows() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        for i in 0..SWEEP_THRESHOLD {
            limiter.check(&format!("station-{i}"));
        }
        assert_eq!(limiter.tracked_keys(), SWEEP_THRESHOLD);

        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.check("late-arrival"));
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn window_expiry_resets_budget() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));

        assert!(limiter.check("k"));
        assert!(!limiter.check("k"));
        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.check("k"));
    }
}
