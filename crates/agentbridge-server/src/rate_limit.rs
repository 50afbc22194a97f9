//! Per-connection token-bucket rate limiter.
//!
//! One bucket per connection, checked by the reader task before an envelope
//! is handed to the router. Configurable rate and burst, per
//! `LimitsConfig::rate_limit_per_sec` / `rate_limit_burst`.

use std::sync::Mutex;
use std::time::Instant;

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<(f64, Instant)>,
}

impl TokenBucket {
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        let capacity = burst.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: rate_per_sec.max(1) as f64,
            state: Mutex::new((capacity, Instant::now())),
        }
    }

    /// Attempts to take one token. Returns `false` if the bucket is empty.
    pub fn try_take(&self) -> bool {
        let mut guard = self.state.lock().expect("token bucket mutex poisoned");
        let (tokens, last) = &mut *guard;
        let now = Instant::now();
        let elapsed = now.duration_since(*last).as_secs_f64();
        *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity);
        *last = now;

        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
