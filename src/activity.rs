/// Output activity tracking: when did the child last write anything?
use tokio::time::Instant;

/// Register holding the time of the last observed output line.
///
/// Only ever moves forward. Uses the monotonic clock so wall-clock
/// adjustments can't fake or hide an idle period.
#[derive(Debug, Clone, Copy)]
pub struct ActivityTracker {
    last_activity: Instant,
}

impl ActivityTracker {
    /// Start tracking now. Launch counts as activity.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(at: Instant) -> Self {
        Self { last_activity: at }
    }

    /// Mark output as seen right now.
    pub fn record_activity(&mut self) {
        self.record_activity_at(Instant::now());
    }

    /// Mark output as seen at `at`. Older timestamps than the current one
    /// are ignored, so events delivered out of order can't rewind the register.
    pub fn record_activity_at(&mut self, at: Instant) {
        if at > self.last_activity {
            self.last_activity = at;
        }
    }

    #[cfg(test)]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Whole seconds since the last recorded activity.
    pub fn idle_seconds(&self) -> u64 {
        self.idle_seconds_at(Instant::now())
    }

    pub fn idle_seconds_at(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.last_activity).as_secs()
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}
