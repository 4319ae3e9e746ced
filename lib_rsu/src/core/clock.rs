use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Wall clock that never repeats or goes backwards.
///
/// Decisions are ordered by timestamp on dashboards, so two decisions created
/// within the same clock tick (or across a wall-clock step back) are spaced by
/// one microsecond.
#[derive(Debug)]
pub struct DecisionClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl DecisionClock {
    /// A clock with no history.
    pub fn new() -> Self {
        Self { last: Mutex::new(None) }
    }

    /// Next strictly increasing timestamp.
    pub fn next(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamp = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}

impl Default for DecisionClock {
    fn default() -> Self {
        Self::new()
    }
}
