//! Time resolution of a dataset.

use crate::error::{PipelineError, Result};
use crate::{LEAP_YEAR_ROWS, YEAR_ROWS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Acquisition resolutions accepted by the core.
///
/// The details header also recognises `spot`, `quaterhourly`, `daily` and
/// `monthly`, but only the two resolutions below can be processed; the
/// others are rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRes {
    HalfHourly,
    Hourly,
}

impl TimeRes {
    /// Parse a `timeres` detail value.
    pub fn parse(s: &str) -> Result<TimeRes> {
        match s.trim().to_ascii_lowercase().as_str() {
            "halfhourly" => Ok(TimeRes::HalfHourly),
            "hourly" => Ok(TimeRes::Hourly),
            "spot" | "quaterhourly" | "daily" | "monthly" => Err(
                PipelineError::MalformedHeader(format!(
                    "time resolution '{}' is recognised but not supported",
                    s.trim()
                )),
            ),
            other => Err(PipelineError::MalformedHeader(format!(
                "unknown time resolution '{}'",
                other
            ))),
        }
    }

    /// Rows per day at this resolution.
    #[inline]
    pub fn rows_per_day(self) -> usize {
        match self {
            TimeRes::HalfHourly => 48,
            TimeRes::Hourly => 24,
        }
    }

    /// Rows per hour at this resolution.
    #[inline]
    pub fn rows_per_hour(self) -> usize {
        match self {
            TimeRes::HalfHourly => 2,
            TimeRes::Hourly => 1,
        }
    }

    /// Rows in the given calendar year at this resolution.
    pub fn rows_per_year(self, year: i32) -> usize {
        let hh = if crate::calendar::is_leap_year(year) {
            LEAP_YEAR_ROWS
        } else {
            YEAR_ROWS
        };
        match self {
            TimeRes::HalfHourly => hh,
            TimeRes::Hourly => hh / 2,
        }
    }

    /// Minutes covered by one row.
    #[inline]
    pub fn minutes_per_row(self) -> usize {
        match self {
            TimeRes::HalfHourly => 30,
            TimeRes::Hourly => 60,
        }
    }
}

impl fmt::Display for TimeRes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeRes::HalfHourly => write!(f, "halfhourly"),
            TimeRes::Hourly => write!(f, "hourly"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepted() {
        assert_eq!(TimeRes::parse("halfhourly").unwrap(), TimeRes::HalfHourly);
        assert_eq!(TimeRes::parse("Hourly").unwrap(), TimeRes::Hourly);
    }

    #[test]
    fn test_parse_recognised_but_rejected() {
        for v in ["spot", "quaterhourly", "daily", "monthly"] {
            assert!(TimeRes::parse(v).is_err());
        }
    }

    #[test]
    fn test_parse_unknown() {
        assert!(TimeRes::parse("weekly").is_err());
    }

    #[test]
    fn test_rows_per_year() {
        assert_eq!(TimeRes::HalfHourly.rows_per_year(2010), 17520);
        assert_eq!(TimeRes::HalfHourly.rows_per_year(2012), 17568);
        assert_eq!(TimeRes::Hourly.rows_per_year(2010), 8760);
        assert_eq!(TimeRes::Hourly.rows_per_year(2012), 8784);
    }
}
