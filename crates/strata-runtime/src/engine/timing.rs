//! Start and end timestamps of runs and nodes.

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

/// Timing information for a run or a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// When the operation started.
    pub started_at: Timestamp,
    /// When the operation ended.
    pub ended_at: Timestamp,
}

impl Timing {
    /// Creates a timing with the given start and end timestamps.
    pub fn new(started_at: Timestamp, ended_at: Timestamp) -> Self {
        Self {
            started_at,
            ended_at,
        }
    }

    /// Starts timing now; the end is set by [`finish`](Self::finish).
    pub fn start() -> Self {
        let now = Timestamp::now();
        Self::new(now, now)
    }

    /// Marks the operation as ended now.
    pub fn finish(&mut self) {
        self.ended_at = Timestamp::now();
    }

    /// Returns the duration of the operation.
    pub fn duration(&self) -> SignedDuration {
        self.ended_at.duration_since(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_duration() {
        let start = Timestamp::now();
        let end = start + SignedDuration::from_millis(100);

        let timing = Timing::new(start, end);
        assert_eq!(timing.duration().as_millis(), 100);
    }

    #[test]
    fn test_timing_finish() {
        let mut timing = Timing::start();
        assert_eq!(timing.duration().as_millis(), 0);
        timing.finish();
        assert!(timing.ended_at >= timing.started_at);
    }
}
