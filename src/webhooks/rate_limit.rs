// Webhook Rate Limiting - fixed-window counters per endpoint

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Window {
    started_at: Instant,
    count: i64,
}

/// Fixed-window rate limiter keyed by endpoint id. The window opens on
/// first use and resets once the period elapses. Check-and-increment
/// happens under one lock, so concurrent deliveries cannot overshoot the
/// limit.
#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<Uuid, Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and counts the call if the endpoint is under its
    /// limit for the current window, `false` otherwise.
    pub fn try_acquire(&self, key: Uuid, limit: i64, period: Duration) -> bool {
        self.try_acquire_at(key, limit, period, Instant::now())
    }

    fn try_acquire_at(&self, key: Uuid, limit: i64, period: Duration, now: Instant) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let window = windows.entry(key).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now.duration_since(window.started_at) >= period {
            window.started_at = now;
            window.count = 0;
        }

        if window.count >= limit {
            return false;
        }

        window.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixth_call_in_window_is_rejected() {
        let limiter = RateLimiter::new();
        let key = Uuid::new_v4();
        let now = Instant::now();
        let period = Duration::from_secs(60);

        for _ in 0..5 {
            assert!(limiter.try_acquire_at(key, 5, period, now));
        }
        assert!(!limiter.try_acquire_at(key, 5, period, now));
    }

    #[test]
    fn test_window_resets_after_period() {
        let limiter = RateLimiter::new();
        let key = Uuid::new_v4();
        let now = Instant::now();
        let period = Duration::from_secs(60);

        for _ in 0..5 {
            assert!(limiter.try_acquire_at(key, 5, period, now));
        }
        assert!(!limiter.try_acquire_at(key, 5, period, now));

        let later = now + Duration::from_secs(61);
        assert!(limiter.try_acquire_at(key, 5, period, later));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        let period = Duration::from_secs(60);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(limiter.try_acquire_at(a, 1, period, now));
        assert!(!limiter.try_acquire_at(a, 1, period, now));
        assert!(limiter.try_acquire_at(b, 1, period, now));
    }
}
