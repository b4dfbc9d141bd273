use std::time::{Duration, Instant};

/// Process-local monotonic millisecond clock
///
/// Frame timestamps, handshake timers and scheduler deadlines all read the
/// same origin, so they are directly comparable.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Whole milliseconds since the origin
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Absolute timer deadline for a millisecond timestamp
    pub fn deadline(&self, at_ms: u64) -> tokio::time::Instant {
        tokio::time::Instant::from_std(self.origin + Duration::from_millis(at_ms))
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
