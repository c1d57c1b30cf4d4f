//! Fixed-window rate limiter for calls into the generation service.
//!
//! A window admits at most `limit` call starts and lasts `window`. Once it
//! is full or has run out, the next window opens no earlier than `window`
//! after the previous window's last start, so no span of length `window`
//! ever sees more than `limit` starts, even across a boundary that follows
//! an idle gap. The counter lives behind an async mutex that stays locked
//! across the wait, so concurrent acquirers queue up in arrival order and
//! no two can open a window at the same time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::error::ConfigError;

/// Source of time for the limiter and for retry backoff.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time from the tokio runtime. Honors `tokio::time::pause`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Default)]
struct WindowState {
    count: u32,
    window_start: Option<Instant>,
    last_start: Option<Instant>,
}

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        if limit == 0 || window.is_zero() {
            return Err(ConfigError::InvalidRateLimit {
                requests: limit,
                window_secs: window.as_secs(),
            });
        }
        Ok(Self {
            limit,
            window,
            clock,
            state: Mutex::new(WindowState::default()),
        })
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        Self::new(config.requests_per_window, config.window(), clock)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits until one more call is allowed, then records it.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let in_window = match state.window_start {
            Some(start) => {
                state.count < self.limit && now.saturating_duration_since(start) < self.window
            }
            None => false,
        };

        if !in_window {
            let opens_at = match state.last_start {
                Some(last) => (last + self.window).max(now),
                None => now,
            };
            if opens_at > now {
                let wait = opens_at - now;
                debug!(
                    wait_ms = wait.as_millis() as u64,
                    limit = self.limit,
                    "Rate limit reached, waiting for next window"
                );
                self.clock.sleep(wait).await;
            }
            state.window_start = Some(self.clock.now());
            state.count = 0;
        }

        state.count += 1;
        state.last_start = Some(self.clock.now());
    }
}
