//! Request rate limiting
//!
//! One token bucket shared by every request. The bucket starts full, gains
//! one token per fill interval up to its capacity, and a request that finds
//! it empty is refused with 429.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::engine::config::RateLimitConfig;

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    last_fill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    fill_interval: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: u64, fill_interval: Duration) -> Self {
        Self::starting_at(capacity, fill_interval, Instant::now())
    }

    fn starting_at(capacity: u64, fill_interval: Duration, now: Instant) -> Self {
        Self {
            capacity,
            fill_interval,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_fill: now,
            }),
        }
    }

    /// `None` when rate limiting is switched off.
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.capacity, config.fill_interval()))
    }

    pub fn try_take(&self) -> bool {
        self.try_take_at(Instant::now())
    }

    fn try_take_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let interval = self.fill_interval.as_nanos().max(1);
        let elapsed = now.saturating_duration_since(state.last_fill).as_nanos();
        let ticks = u64::try_from(elapsed / interval).unwrap_or(u64::MAX);

        if ticks > 0 {
            state.tokens = state.tokens.saturating_add(ticks).min(self.capacity);
            // Carry the partial interval over unless the bucket is full.
            let advanced = u32::try_from(ticks)
                .ok()
                .and_then(|t| self.fill_interval.checked_mul(t))
                .map(|d| state.last_fill + d);
            state.last_fill = match advanced {
                Some(at) if state.tokens < self.capacity => at,
                _ => now,
            };
        }

        if state.tokens == 0 {
            return false;
        }
        state.tokens -= 1;
        true
    }

    pub fn available(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).tokens
    }
}
