//! Time source abstraction.
//!
//! The engine and webhook pipeline take the clock as an explicit dependency
//! so tests can pin the sync window and run timestamps.

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    /// Start of the sync window: today at local midnight, converted to UTC.
    fn window_start(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn window_start(&self) -> DateTime<Utc> {
        let midnight = Local::now().date_naive().and_time(NaiveTime::MIN);
        Local
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }
}
