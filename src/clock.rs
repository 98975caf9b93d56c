use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Source of "now" for holdout gating and staleness checks.
///
/// Timestamps are whole seconds, the resolution records are stored with.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        now - Duration::nanoseconds(now.timestamp_subsec_nanos() as i64)
    }
}

/// Manually driven clock for tests.
#[derive(Debug)]
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
}
impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}
impl Default for TestClock {
    fn default() -> Self {
        Self::new(SystemClock.now())
    }
}
impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
