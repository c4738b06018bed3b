//! Time source used by the monitor and orchestrator.
//!
//! Health and healing decisions compare wall-clock timestamps coming from
//! the controller, so time is injected rather than read directly.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and replays.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Upper bound for configured intervals so timestamp arithmetic cannot overflow.
const MAX_INTERVAL_DAYS: i64 = 36_500;

/// Convert a std duration into a chrono duration, clamped to a century.
pub fn chrono_duration(d: std::time::Duration) -> Duration {
    Duration::from_std(d)
        .ok()
        .filter(|d| *d < Duration::days(MAX_INTERVAL_DAYS))
        .unwrap_or_else(|| Duration::days(MAX_INTERVAL_DAYS))
}

/// Seconds as a chrono duration, clamped to a century.
pub fn secs(s: u64) -> Duration {
    chrono_duration(std::time::Duration::from_secs(s))
}
