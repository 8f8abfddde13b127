use std::time::Duration;

use tokio::time::Instant;

/// Minimum idle period after a close before a new position may open.
///
/// Uses the tokio clock so tests can drive it with a paused runtime.
#[derive(Debug, Clone)]
pub struct Cooldown {
    duration: Duration,
    started_at: Option<Instant>,
}

impl Cooldown {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started_at: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Time left, or `None` once the window has elapsed (or never started).
    pub fn remaining(&self) -> Option<Duration> {
        let elapsed = self.started_at?.elapsed();
        self.duration.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    pub fn is_active(&self) -> bool {
        self.remaining().is_some()
    }
}
