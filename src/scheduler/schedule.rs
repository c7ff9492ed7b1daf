// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Weekday};

use crate::scheduler::SchedulerError;

/// Fires once a day at a fixed local time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DailySchedule {
    hour: u32,
    minute: u32,
}

impl DailySchedule {
    /// Returns a new daily schedule, rejecting out-of-range times.
    pub fn new(hour: u32, minute: u32) -> Result<Self, SchedulerError> {
        if hour > 23 {
            return Err(SchedulerError::InvalidHour(hour));
        }
        if minute > 59 {
            return Err(SchedulerError::InvalidMinute(minute));
        }

        Ok(Self { hour, minute })
    }

    /// Computes the next fire time strictly after `now`.
    ///
    /// A local time which does not exist on some day (DST gap) falls over to
    /// the next day on which it does.
    pub fn next_after(&self, now: DateTime<Local>) -> DateTime<Local> {
        if let Some(candidate) = at_local(now, 0, self.hour, self.minute) {
            if candidate > now {
                return candidate;
            }
        }

        let mut days = 1;
        loop {
            if let Some(candidate) = at_local(now, days, self.hour, self.minute) {
                return candidate;
            }
            days += 1;
        }
    }

    /// Human-readable label for status output.
    pub fn label(&self) -> String {
        format!("daily at {:02}:{:02}", self.hour, self.minute)
    }
}

/// Fires once a week at a fixed local weekday and time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeeklySchedule {
    weekday: Weekday,
    hour: u32,
    minute: u32,
}

impl WeeklySchedule {
    /// Returns a new weekly schedule, rejecting out-of-range times.
    pub fn new(weekday: Weekday, hour: u32, minute: u32) -> Result<Self, SchedulerError> {
        if hour > 23 {
            return Err(SchedulerError::InvalidHour(hour));
        }
        if minute > 59 {
            return Err(SchedulerError::InvalidMinute(minute));
        }

        Ok(Self {
            weekday,
            hour,
            minute,
        })
    }

    /// Computes the next fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Local>) -> DateTime<Local> {
        let days_ahead = (self.weekday.num_days_from_monday() as i64
            - now.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);

        if let Some(candidate) = at_local(now, days_ahead, self.hour, self.minute) {
            if candidate > now {
                return candidate;
            }
        }

        // Same weekday but the time already passed (or fell into a DST gap),
        // move a week ahead
        let mut days = days_ahead + 7;
        loop {
            if let Some(candidate) = at_local(now, days, self.hour, self.minute) {
                return candidate;
            }
            days += 7;
        }
    }

    /// Human-readable label for status output.
    pub fn label(&self) -> String {
        format!("{:?} at {:02}:{:02}", self.weekday, self.hour, self.minute)
    }
}

/// Local instant `days` days after `now` at the given wall-clock time, when
/// that time exists (DST gaps yield `None`, ambiguous fall-back times pick
/// the earlier occurrence).
fn at_local(now: DateTime<Local>, days: i64, hour: u32, minute: u32) -> Option<DateTime<Local>> {
    (now + Duration::days(days))
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
}
