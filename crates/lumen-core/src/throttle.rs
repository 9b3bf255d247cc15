use std::time::{Duration, Instant};

/// Minimum-interval gate shared by the push trigger and the fallback timer.
/// A refused trigger is gone; nothing is queued for later.
#[derive(Debug, Clone)]
pub struct ThrottleGate {
    min_interval: Duration,
    last_run_at: Option<Instant>,
}

impl ThrottleGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_run_at: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_run_at(&self) -> Option<Instant> {
        self.last_run_at
    }

    pub fn try_pass(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_run_at {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_run_at = Some(now);
        true
    }
}
