use std::time::Duration;
use tokio::time::Instant;

/// Leading-edge rate limit for repeated captures.
///
/// The first call after a quiet period passes; further calls within
/// `interval` of the last accepted one are rejected.
#[derive(Debug)]
pub struct CaptureDebounce {
    interval: Duration,
    last: Option<Instant>,
}

impl CaptureDebounce {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Returns true and records `now` when a capture may fire.
    pub fn ready(&mut self, now: Instant) -> bool {
        if self.interval.is_zero() {
            return true;
        }
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
