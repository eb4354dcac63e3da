//! Per-model request throttling.
//!
//! The limiter enforces a minimum interval between consecutive model calls
//! of `60 / requests_per_minute` seconds. The first call never sleeps; the
//! last-call timestamp is guarded by an async mutex so the limiter stays
//! correct when shared across tasks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::message::ChatMessage;

use super::common::{GenerateOptions, Model, ModelResponse, ModelStream};

/// Minimum-interval throttle for model calls.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_minute` calls per minute.
    #[must_use]
    pub fn per_minute(requests_per_minute: f64) -> Self {
        let secs = if requests_per_minute > 0.0 {
            60.0 / requests_per_minute
        } else {
            0.0
        };
        Self {
            min_interval: Duration::from_secs_f64(secs),
            last_call: Mutex::new(None),
        }
    }

    /// The enforced minimum interval.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a call is permitted, then record it.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// A model wrapper that throttles every call through a [`RateLimiter`].
pub struct Throttled<M> {
    inner: M,
    limiter: RateLimiter,
}

impl<M: Model> Throttled<M> {
    /// Wrap a model with a requests-per-minute budget.
    #[must_use]
    pub fn new(inner: M, requests_per_minute: f64) -> Self {
        Self {
            inner,
            limiter: RateLimiter::per_minute(requests_per_minute),
        }
    }

    /// The wrapped model.
    pub const fn inner(&self) -> &M {
        &self.inner
    }
}

#[async_trait]
impl<M: Model> Model for Throttled<M> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
    ) -> Result<ModelResponse> {
        self.limiter.acquire().await;
        self.inner.generate(messages, options).await
    }

    async fn generate_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerateOptions,
    ) -> Result<ModelStream> {
        self.limiter.acquire().await;
        self.inner.generate_stream(messages, options).await
    }

    fn supports_stop_parameter(&self) -> bool {
        self.inner.supports_stop_parameter()
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    fn supports_tool_calling(&self) -> bool {
        self.inner.supports_tool_calling()
    }

    fn provider(&self) -> &'static str {
        self.inner.provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_call_never_sleeps() {
        let limiter = RateLimiter::per_minute(60.0);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_calls_are_spaced() {
        let limiter = RateLimiter::per_minute(60.0);
        limiter.acquire().await;

        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        // With 60 rpm the second call must wait roughly one second.
        assert!(start.elapsed() >= Duration::from_millis(990));
    }

    #[tokio::test]
    async fn test_disabled_limiter_enforces_nothing() {
        let limiter = RateLimiter::per_minute(0.0);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
