use chrono::{DateTime, Local, NaiveDateTime, Utc};

/// Local wall-clock time of the car wash.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    /// Instant stamped on created and updated records.
    fn timestamp(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
