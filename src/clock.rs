use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use tokio::time::Instant;

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// Timestamp in the `toISOString` shape, e.g. `2026-10-19T08:00:00.000Z`.
    fn iso_now(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Wall clock anchored at construction and advanced by the Tokio clock, so a
/// paused runtime yields virtual wall time.
#[derive(Debug, Clone)]
pub struct RuntimeClock {
    origin: DateTime<Utc>,
    started: Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.started.elapsed()).unwrap_or(TimeDelta::zero());
        self.origin + elapsed
    }
}
