use std::time::{Duration, Instant};

/// Minimum time between two flushed fragments
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(3);

/// Groups small streamed deltas into readable fragments.
///
/// Text is held back until a delta ends a line and more than [`FLUSH_INTERVAL`] has
/// passed since the previous flush. Whatever remains is released by
/// [`FragmentBatcher::finish`].
#[derive(Debug)]
pub struct FragmentBatcher {
    buffer: String,
    last_flush: Instant,
    interval: Duration,
}

impl FragmentBatcher {
    #[inline]
    pub fn new(started: Instant) -> Self {
        Self::with_interval(started, FLUSH_INTERVAL)
    }

    #[inline]
    pub fn with_interval(started: Instant, interval: Duration) -> Self {
        Self {
            buffer: String::new(),
            last_flush: started,
            interval,
        }
    }

    /// Add a delta received at `now`, returning a fragment when one is due
    pub fn push(&mut self, delta: &str, now: Instant) -> Option<String> {
        self.buffer.push_str(delta);
        if !delta.ends_with('\n') || now.saturating_duration_since(self.last_flush) <= self.interval
        {
            return None;
        }

        self.last_flush = now;
        let fragment = self.buffer.trim().to_string();
        self.buffer.clear();
        (!fragment.is_empty()).then_some(fragment)
    }

    /// Release the text still buffered when the stream ends
    pub fn finish(self) -> Option<String> {
        let fragment = self.buffer.trim();
        (!fragment.is_empty()).then(|| fragment.to_string())
    }
}
