use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of "now" shared by every engine operation.
///
/// Must never go backwards. Deadline and window checks compare against it
/// directly, so it is held by the engine and never taken from a caller.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, clamped so it never returns an earlier instant than before
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock();
        let now = match *last {
            Some(previous) => previous.max(Utc::now()),
            None => Utc::now(),
        };
        *last = Some(now);
        now
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves forward by `by`; negative durations are ignored
    pub fn advance(&self, by: Duration) {
        if by > Duration::zero() {
            let mut now = self.now.lock();
            *now += by;
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    /// Jumps to `instant` if it is later than the current time
    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.lock();
        if instant > *now {
            *now = instant;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
