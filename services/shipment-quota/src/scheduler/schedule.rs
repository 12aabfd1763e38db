use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_RESET_DAY: u32 = 28;
pub const MAX_RESET_HOUR: u32 = 23;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("reset day must be between 1 and 28, got {0}")]
    InvalidDay(u32),
    #[error("reset hour must be between 0 and 23, got {0}")]
    InvalidHour(u32),
    #[error("next reset instant after {0} is not representable")]
    OutOfRange(DateTime<Utc>),
}

/// Calendar position of the monthly usage reset, in UTC.
///
/// The day is capped at 28 so the same day exists in every month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetSchedule {
    enabled: bool,
    reset_day: u32,
    reset_hour: u32,
}

impl ResetSchedule {
    pub fn new(enabled: bool, reset_day: u32, reset_hour: u32) -> Result<Self, ScheduleError> {
        if !(1..=MAX_RESET_DAY).contains(&reset_day) {
            return Err(ScheduleError::InvalidDay(reset_day));
        }
        if reset_hour > MAX_RESET_HOUR {
            return Err(ScheduleError::InvalidHour(reset_hour));
        }
        Ok(Self {
            enabled,
            reset_day,
            reset_hour,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn reset_day(&self) -> u32 {
        self.reset_day
    }

    pub fn reset_hour(&self) -> u32 {
        self.reset_hour
    }

    /// First reset instant strictly after `now`: this month's slot if it is
    /// still ahead, otherwise next month's.
    pub fn next_reset_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let this_month = self
            .instant_in_month(now.year(), now.month())
            .ok_or(ScheduleError::OutOfRange(now))?;
        if this_month > now {
            return Ok(this_month);
        }

        let (year, month) = if now.month() == 12 {
            (now.year() + 1, 1)
        } else {
            (now.year(), now.month() + 1)
        };
        self.instant_in_month(year, month)
            .ok_or(ScheduleError::OutOfRange(now))
    }

    fn instant_in_month(&self, year: i32, month: u32) -> Option<DateTime<Utc>> {
        let naive = NaiveDate::from_ymd_opt(year, month, self.reset_day)?
            .and_hms_opt(self.reset_hour, 0, 0)?;
        Some(Utc.from_utc_datetime(&naive))
    }
}

/// Whole hours left until `next`, rounded up so the value only reaches zero
/// once the reset is due.
pub fn hours_until(next: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (next - now).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    (seconds + 3599) / 3600
}
