use std::sync::{Arc, Mutex};

use chrono::{Duration, Local, NaiveDateTime, Utc, DateTime};

/// Source of "now". Appointment dates and times are clinic wall-clock
/// values, so policy checks compare against local naive time.
pub trait Clock: Send + Sync {
    fn now_local(&self) -> NaiveDateTime;

    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests. Local time and UTC are treated as the same
/// instant.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now_local(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.now_local().and_utc()
    }
}
