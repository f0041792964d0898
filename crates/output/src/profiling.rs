use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Metadata key carrying the time a record entered this layer
pub const PROFILING_ENTRY_KEY: &str = "ts_msgbus_output_data_entry";

/// Wall-clock stamps in epoch milliseconds that never go backwards, even if
/// the system clock is stepped.
#[derive(Debug, Default)]
pub struct ProfilingClock {
    last: AtomicI64,
}

impl ProfilingClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let prev = self.last.fetch_max(now, Ordering::SeqCst);
        prev.max(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamps_are_non_decreasing() {
        let clock = ProfilingClock::new();
        let mut last = 0;
        for _ in 0..1000 {
            let ts = clock.stamp();
            assert!(ts >= last);
            last = ts;
        }
    }

    #[test]
    fn test_stamp_never_below_previous_max() {
        let clock = ProfilingClock::new();
        // Simulate a stamp from a clock that ran ahead
        let ahead = Utc::now().timestamp_millis() + 60_000;
        clock.last.store(ahead, Ordering::SeqCst);
        assert_eq!(clock.stamp(), ahead);
    }

    #[test]
    fn test_stamp_is_epoch_millis() {
        let before = Utc::now().timestamp_millis();
        let ts = ProfilingClock::new().stamp();
        let after = Utc::now().timestamp_millis();
        assert!(ts >= before && ts <= after);
    }
}
