//! Request gating for the extraction executor
//!
//! The per-minute quota smooths request pacing (callers wait their turn);
//! the hour and day ceilings are hard stops that fail fast once reached.
//! The gate sits on the extraction executor, never on the queue itself.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::Mutex;

use crate::infrastructure::config::RateLimitSettings;

/// Rolling window counter for the hour/day ceilings
#[derive(Debug)]
struct WindowCounter {
    window: Duration,
    limit: u32,
    entries: Mutex<VecDeque<Instant>>,
}

impl WindowCounter {
    fn new(window: Duration, limit: u32) -> Self {
        Self {
            window,
            limit,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    async fn try_record(&self) -> bool {
        let mut entries = self.entries.lock().await;
        let cutoff = Instant::now() - self.window;
        while entries.front().is_some_and(|t| *t < cutoff) {
            entries.pop_front();
        }
        if entries.len() as u32 >= self.limit {
            return false;
        }
        entries.push_back(Instant::now());
        true
    }
}

/// Errors from the request gate
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("request ceiling reached for the current {0}")]
    CeilingReached(&'static str),
}

/// Gate combining the per-minute quota with hour/day ceilings
pub struct RequestGate {
    minute: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    hour: WindowCounter,
    day: WindowCounter,
}

impl RequestGate {
    #[must_use]
    pub fn new(settings: &RateLimitSettings) -> Self {
        let per_minute = NonZeroU32::new(settings.requests_per_minute.max(1))
            .expect("max(1) guarantees non-zero");
        Self {
            minute: RateLimiter::direct(Quota::per_minute(per_minute)),
            hour: WindowCounter::new(Duration::from_secs(3_600), settings.requests_per_hour),
            day: WindowCounter::new(Duration::from_secs(86_400), settings.requests_per_day),
        }
    }

    /// Acquires one request slot. Waits for the per-minute quota, fails
    /// fast on the hour/day ceilings.
    pub async fn acquire(&self) -> Result<(), GateError> {
        if !self.day.try_record().await {
            return Err(GateError::CeilingReached("day"));
        }
        if !self.hour.try_record().await {
            return Err(GateError::CeilingReached("hour"));
        }
        self.minute.until_ready().await;
        Ok(())
    }
}
