//! Bikram Sambat calendar adapter.
//!
//! Billing periods are BS months. Conversion is table driven: the month
//! lengths of each BS year are published by the Nepal calendar committee and
//! cannot be derived arithmetically.

use crate::models::BillingPeriod;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use thiserror::Error;

/// Nepal Standard Time, UTC+05:45.
const NEPAL_OFFSET_SECS: i32 = 5 * 3600 + 45 * 60;

/// First BS year covered by the table; 2070-01-01 BS is 2013-04-14 AD.
const BS_FIRST_YEAR: i32 = 2070;

const BS_MONTH_DAYS: [[u32; 12]; 21] = [
    [31, 31, 31, 32, 31, 31, 29, 30, 30, 29, 30, 30], // 2070
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2071
    [31, 32, 31, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2072
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2073
    [31, 31, 31, 32, 31, 31, 30, 29, 30, 29, 30, 30], // 2074
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2075
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 30], // 2076
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 2077
    [31, 31, 31, 32, 31, 31, 30, 29, 30, 29, 30, 30], // 2078
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2079
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 30], // 2080
    [31, 31, 32, 32, 31, 30, 30, 30, 29, 30, 30, 30], // 2081
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 30, 30], // 2082
    [31, 31, 32, 31, 31, 30, 30, 30, 29, 30, 30, 30], // 2083
    [31, 31, 32, 31, 31, 30, 30, 30, 29, 30, 30, 30], // 2084
    [31, 32, 31, 32, 30, 31, 30, 30, 29, 30, 30, 30], // 2085
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 30, 30], // 2086
    [31, 31, 32, 31, 31, 31, 30, 30, 29, 30, 30, 30], // 2087
    [30, 31, 32, 32, 30, 31, 30, 30, 29, 30, 30, 30], // 2088
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 30, 30], // 2089
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 30, 30], // 2090
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    #[error("date {0} is outside the supported Bikram Sambat range")]
    OutOfRange(NaiveDate),

    #[error("invalid calendar offset: {0}")]
    InvalidOffset(String),
}

/// A date in the Bikram Sambat calendar. Months are 1-based (1 = Baisakh).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BsDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl BsDate {
    pub fn display(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Source of the current billing period.
pub trait CalendarAdapter: Send + Sync {
    fn current_period(&self) -> Result<BillingPeriod, CalendarError>;

    /// True on day 1 of the current BS month.
    fn is_first_day_of_period(&self) -> Result<bool, CalendarError> {
        Ok(self.current_period()?.is_first_day())
    }
}

/// Table-driven BS calendar evaluated in Nepal time.
#[derive(Debug, Clone, Default)]
pub struct BikramSambatCalendar;

impl BikramSambatCalendar {
    pub fn new() -> Self {
        Self
    }

    /// Billing period observed at `now`.
    pub fn period_at(&self, now: DateTime<Utc>) -> Result<BillingPeriod, CalendarError> {
        let offset = FixedOffset::east_opt(NEPAL_OFFSET_SECS)
            .ok_or_else(|| CalendarError::InvalidOffset(NEPAL_OFFSET_SECS.to_string()))?;
        let local_date = now.with_timezone(&offset).date_naive();
        let bs = to_bs(local_date)?;

        Ok(BillingPeriod {
            year: bs.year,
            month: bs.month as i32,
            day: bs.day as i32,
            display_date: bs.display(),
            gregorian_date: local_date,
        })
    }
}

impl CalendarAdapter for BikramSambatCalendar {
    fn current_period(&self) -> Result<BillingPeriod, CalendarError> {
        self.period_at(Utc::now())
    }
}

fn bs_epoch() -> Result<NaiveDate, CalendarError> {
    NaiveDate::from_ymd_opt(2013, 4, 14)
        .ok_or_else(|| CalendarError::InvalidOffset("epoch".to_string()))
}

/// Convert a Gregorian date to Bikram Sambat.
pub fn to_bs(date: NaiveDate) -> Result<BsDate, CalendarError> {
    let mut remaining = date.signed_duration_since(bs_epoch()?).num_days();
    if remaining < 0 {
        return Err(CalendarError::OutOfRange(date));
    }

    for (index, months) in BS_MONTH_DAYS.iter().enumerate() {
        let year_days: i64 = months.iter().map(|d| *d as i64).sum();
        if remaining >= year_days {
            remaining -= year_days;
            continue;
        }

        for (month_index, month_days) in months.iter().enumerate() {
            let month_days = *month_days as i64;
            if remaining < month_days {
                return Ok(BsDate {
                    year: BS_FIRST_YEAR + index as i32,
                    month: month_index as u32 + 1,
                    day: remaining as u32 + 1,
                });
            }
            remaining -= month_days;
        }
    }

    Err(CalendarError::OutOfRange(date))
}
