#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::{ChatBotError, Result};

/// Sliding-window request limiter keyed by conversation id
#[derive(Debug)]
pub struct RateLimiter {
    burst_limit: usize,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    #[inline]
    pub fn new(burst_limit: usize, window: Duration) -> Self {
        Self {
            burst_limit: burst_limit.max(1),
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.burst_limit, Duration::from_secs(config.window_seconds))
    }

    #[inline]
    pub async fn check_and_record(&self, conversation_id: &str) -> Result<()> {
        self.check_and_record_at(conversation_id, Instant::now())
            .await
    }

    /// Record a request made at `now`, or fail with the time left until the oldest
    /// request in the window expires
    pub async fn check_and_record_at(&self, conversation_id: &str, now: Instant) -> Result<()> {
        let mut windows = self.windows.lock().await;
        let timestamps = windows
            .entry(conversation_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.burst_limit));

        while timestamps
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) > self.window)
        {
            timestamps.pop_front();
        }

        if timestamps.len() >= self.burst_limit {
            let retry_after = timestamps
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or_default();
            debug!(
                "Conversation {} is rate limited for {:?}",
                conversation_id, retry_after
            );
            return Err(ChatBotError::RateLimitExceeded { retry_after });
        }

        timestamps.push_back(now);
        Ok(())
    }

    /// Drop windows whose newest request has already left the window
    pub async fn evict_idle_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, timestamps| {
            timestamps
                .back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) <= self.window)
        });
        before - windows.len()
    }

    #[inline]
    pub async fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now()).await
    }

    /// Number of conversations with a live window
    #[inline]
    pub async fn tracked_conversations(&self) -> usize {
        self.windows.lock().await.len()
    }
}
