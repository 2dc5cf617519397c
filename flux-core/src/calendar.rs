//! Row-index <-> timestamp math, week buckets and the DTIME column.
//!
//! Rows are zero-based within a calendar year and labelled by the interval
//! *end* timestamp (closed-right intervals): midnight on January 1st
//! belongs to the previous year's last row.

use crate::error::{PipelineError, Result};
use crate::timeres::TimeRes;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which edge of a row's interval a timestamp labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Start,
    End,
}

/// An absolute instant, second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl Timestamp {
    pub fn new(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Timestamp {
        Timestamp {
            year,
            month,
            day,
            hour,
            minute,
            second: 0,
        }
    }

    /// Parse a compact `YYYYMMDD[hh[mm[ss]]]` string.
    pub fn parse(s: &str) -> Result<Timestamp> {
        let s = s.trim();
        if s.len() < 4 || s.len() > 14 || s.len() % 2 != 0 {
            return Err(PipelineError::MalformedHeader(format!(
                "bad timestamp length for '{}'",
                s
            )));
        }
        let field = |from: usize, to: usize| -> Result<u32> {
            if s.len() < to {
                return Ok(0);
            }
            s[from..to].parse::<u32>().map_err(|_| {
                PipelineError::MalformedHeader(format!("bad timestamp field in '{}'", s))
            })
        };
        Ok(Timestamp {
            year: field(0, 4)? as i32,
            month: field(4, 6)?,
            day: field(6, 8)?,
            hour: field(8, 10)?,
            minute: field(10, 12)?,
            second: field(12, 14)?,
        })
    }

    /// Compact `YYYYMMDDhhmm` form used in output files.
    pub fn to_compact(&self) -> String {
        format!(
            "{:04}{:02}{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        )
    }

    /// Compact `YYYYMMDD` date-only form (weekly and daily outputs).
    pub fn to_compact_date(&self) -> String {
        format!("{:04}{:02}{:02}", self.year, self.month, self.day)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_compact())
    }
}

/// Leap year test (Gregorian rules).
#[inline]
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Days in the given calendar year.
#[inline]
pub fn days_per_year(year: i32) -> usize {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

/// Month (1-12) and day-of-month for a 1-based day of year.
pub fn month_and_day(day_of_year: usize, year: i32) -> (u32, u32) {
    let date = NaiveDate::from_ymd_opt(year, 1, 1).unwrap()
        + Duration::days(day_of_year as i64 - 1);
    (date.month(), date.day())
}

/// Timestamp labelling `row` of `year` at the given resolution and side.
///
/// The end label of the last row rolls into January 1st of the next year.
pub fn timestamp_for_row(row: usize, year: i32, res: TimeRes, side: Side) -> Timestamp {
    let row = match side {
        Side::Start => row,
        Side::End => row + 1,
    };
    let rows_per_day = res.rows_per_day();
    let date = NaiveDate::from_ymd_opt(year, 1, 1).unwrap()
        + Duration::days((row / rows_per_day) as i64);
    let slot = row % rows_per_day;
    let (hour, minute) = match res {
        TimeRes::HalfHourly => ((slot / 2) as u32, if slot % 2 == 1 { 30 } else { 0 }),
        TimeRes::Hourly => (slot as u32, 0),
    };
    Timestamp {
        year: date.year(),
        month: date.month(),
        day: date.day(),
        hour,
        minute,
        second: 0,
    }
}

/// Zero-based row index for an interval-end timestamp.
///
/// Midnight on January 1st maps to the previous year's last row.
pub fn row_for_timestamp(t: &Timestamp, res: TimeRes) -> Result<usize> {
    if t.month == 1 && t.day == 1 && t.hour == 0 && t.minute == 0 {
        return Ok(res.rows_per_year(t.year - 1) - 1);
    }
    let date = NaiveDate::from_ymd_opt(t.year, t.month, t.day).ok_or_else(|| {
        PipelineError::MalformedHeader(format!("bad date in timestamp {}", t))
    })?;
    let mut row = (date.ordinal0() as usize) * res.rows_per_day();
    row += t.hour as usize * res.rows_per_hour();
    if t.minute > 0 {
        row += 1;
    }
    if row == 0 {
        return Err(PipelineError::InvariantViolation(format!(
            "timestamp {} does not label any row",
            t
        )));
    }
    Ok(row - 1)
}

/// Weeks per year: 51 seven-day blocks plus the remainder.
pub const WEEKS_PER_YEAR: usize = 52;

/// Zero-based week bucket for a zero-based day index, capped at the last.
#[inline]
pub fn week_of_day(day_index: usize) -> usize {
    (day_index / 7).min(WEEKS_PER_YEAR - 1)
}

/// First row of a zero-based week.
pub fn week_start_row(week: usize, res: TimeRes) -> usize {
    week * 7 * res.rows_per_day()
}

/// One past the last row of a zero-based week. The final week absorbs the
/// remainder of the year (7 or 8 days).
pub fn week_end_row(week: usize, year: i32, res: TimeRes) -> usize {
    if week == WEEKS_PER_YEAR - 1 {
        res.rows_per_year(year)
    } else {
        (week + 1) * 7 * res.rows_per_day()
    }
}

/// Date stamps bracketing a week: (first day, last day).
pub fn week_timestamps(week: usize, year: i32, res: TimeRes) -> (Timestamp, Timestamp) {
    let start = timestamp_for_row(week_start_row(week, res), year, res, Side::Start);
    let end = timestamp_for_row(week_end_row(week, year, res) - 1, year, res, Side::Start);
    (start, end)
}

/// Fixed decimal fractions used by the DTIME column, one per half-hour
/// slot; a frozen table so output matches to the digit across tools.
const DTIME_FRACTION: [f64; 48] = [
    0.02083, 0.04167, 0.0625, 0.08333, 0.10417, 0.125, 0.14583, 0.16667, 0.1875, 0.20833,
    0.22917, 0.25, 0.27083, 0.29167, 0.3125, 0.33333, 0.35417, 0.375, 0.39583, 0.41667,
    0.4375, 0.45833, 0.47917, 0.5, 0.52083, 0.54167, 0.5625, 0.58333, 0.60417, 0.625,
    0.64583, 0.66667, 0.6875, 0.70833, 0.72917, 0.75, 0.77083, 0.79167, 0.8125, 0.83333,
    0.85417, 0.875, 0.89583, 0.91667, 0.9375, 0.95833, 0.97917, 1.0,
];

/// Decimal day-of-year label for a row (hourly rows land on the odd
/// half-hour slots).
pub fn dtime_for_row(row: usize, res: TimeRes) -> f64 {
    let rows_per_day = res.rows_per_day();
    let day = row / rows_per_day + 1;
    let slot = match res {
        TimeRes::HalfHourly => row % rows_per_day,
        TimeRes::Hourly => (row % rows_per_day) * 2 + 1,
    };
    day as f64 + DTIME_FRACTION[slot]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leap_years() {
        assert!(is_leap_year(2012));
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(2010));
        assert!(!is_leap_year(1900));
    }

    #[test]
    fn test_first_row_labels() {
        let start = timestamp_for_row(0, 2010, TimeRes::HalfHourly, Side::Start);
        assert_eq!(start, Timestamp::new(2010, 1, 1, 0, 0));
        let end = timestamp_for_row(0, 2010, TimeRes::HalfHourly, Side::End);
        assert_eq!(end, Timestamp::new(2010, 1, 1, 0, 30));
    }

    #[test]
    fn test_last_row_rolls_into_next_year() {
        let end = timestamp_for_row(17519, 2010, TimeRes::HalfHourly, Side::End);
        assert_eq!(end, Timestamp::new(2011, 1, 1, 0, 0));
        let end = timestamp_for_row(8783, 2012, TimeRes::Hourly, Side::End);
        assert_eq!(end, Timestamp::new(2013, 1, 1, 0, 0));
    }

    #[test]
    fn test_row_timestamp_inverse() {
        for &row in &[0usize, 1, 47, 48, 100, 8759, 17519] {
            let t = timestamp_for_row(row, 2010, TimeRes::HalfHourly, Side::End);
            // the year of the timestamp may roll; row_for_timestamp handles it
            assert_eq!(row_for_timestamp(&t, TimeRes::HalfHourly).unwrap(), row);
        }
        for &row in &[0usize, 23, 24, 8759] {
            let t = timestamp_for_row(row, 2010, TimeRes::Hourly, Side::End);
            assert_eq!(row_for_timestamp(&t, TimeRes::Hourly).unwrap(), row);
        }
    }

    #[test]
    fn test_midnight_jan_first_belongs_to_previous_year() {
        let t = Timestamp::new(2011, 1, 1, 0, 0);
        assert_eq!(row_for_timestamp(&t, TimeRes::HalfHourly).unwrap(), 17519);
        let t = Timestamp::new(2013, 1, 1, 0, 0);
        // 2012 is leap
        assert_eq!(row_for_timestamp(&t, TimeRes::HalfHourly).unwrap(), 17567);
    }

    #[test]
    fn test_leap_year_week_52() {
        // zero-based week 51 is the 1-based week 52 of the outputs
        assert_eq!(week_start_row(51, TimeRes::HalfHourly), 51 * 7 * 48);
        assert_eq!(week_end_row(51, 2012, TimeRes::HalfHourly), 366 * 48);
        let width_days =
            (week_end_row(51, 2012, TimeRes::HalfHourly) - week_start_row(51, TimeRes::HalfHourly)) / 48;
        assert_eq!(width_days, 9);
        let width_days =
            (week_end_row(51, 2010, TimeRes::HalfHourly) - week_start_row(51, TimeRes::HalfHourly)) / 48;
        assert_eq!(width_days, 8);
    }

    #[test]
    fn test_week_of_day_caps() {
        assert_eq!(week_of_day(0), 0);
        assert_eq!(week_of_day(6), 0);
        assert_eq!(week_of_day(7), 1);
        assert_eq!(week_of_day(357), 51);
        assert_eq!(week_of_day(365), 51);
    }

    #[test]
    fn test_dtime() {
        assert_eq!(dtime_for_row(0, TimeRes::HalfHourly), 1.02083);
        assert_eq!(dtime_for_row(47, TimeRes::HalfHourly), 2.0);
        assert_eq!(dtime_for_row(0, TimeRes::Hourly), 1.04167);
    }

    #[test]
    fn test_timestamp_parse_and_format() {
        let t = Timestamp::parse("201001010030").unwrap();
        assert_eq!(t, Timestamp::new(2010, 1, 1, 0, 30));
        assert_eq!(t.to_compact(), "201001010030");
        assert_eq!(t.to_compact_date(), "20100101");
        assert!(Timestamp::parse("2010010").is_err());
        assert!(Timestamp::parse("2010AB010030").is_err());
    }

    #[test]
    fn test_month_and_day() {
        assert_eq!(month_and_day(1, 2010), (1, 1));
        assert_eq!(month_and_day(59, 2010), (2, 28));
        assert_eq!(month_and_day(60, 2010), (3, 1));
        assert_eq!(month_and_day(60, 2012), (2, 29));
        assert_eq!(month_and_day(366, 2012), (12, 31));
    }
}
