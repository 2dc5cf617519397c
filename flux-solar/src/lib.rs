//! Potential (clear-sky) shortwave radiation.
//!
//! The series is computed per minute from solar geometry, shifted within
//! each day so that the curve peaks at true local solar noon, then averaged
//! to the dataset resolution. On a day with a timezone change the shift is
//! applied in two halves spliced at the change minute.

mod noon;

use flux_core::calendar::{days_per_year, month_and_day};
use flux_core::details::SiteDetails;
use noon::solar_noon_minutes;

/// Solar constant, W m^-2.
const SOLAR_CONSTANT: f64 = 1376.0;

/// Minutes per day; radiation is computed on this grid before aggregation.
const MINUTES_PER_DAY: usize = 1440;

/// Potential radiation at one minute of the year.
///
/// `day_of_year` is 1-based; `hour` is the local standard time in decimal
/// hours. Negative elevations clamp to zero.
fn minute_rpot(latitude: f64, day_of_year: usize, hour: f64) -> f64 {
    let tthet = 2.0 * std::f64::consts::PI * (day_of_year as f64 - 1.0) / 365.0;

    let signed_las = (12.0 - hour).abs();
    let omega = -15.0 * signed_las;
    let decl_rad = 0.006918 - 0.399912 * tthet.cos() + 0.070257 * tthet.sin()
        - 0.006758 * (2.0 * tthet).cos()
        + 0.000907 * (2.0 * tthet).sin()
        - 0.002697 * (3.0 * tthet).cos()
        + 0.00148 * (3.0 * tthet).sin();
    let lat_rad = latitude.to_radians();

    let theta_rad = (decl_rad.sin() * lat_rad.sin()
        + decl_rad.cos() * lat_rad.cos() * omega.to_radians().cos())
    .acos();

    let rpot = SOLAR_CONSTANT
        * (1.00011 + 0.034221 * tthet.cos() + 0.00128 * tthet.sin()
            + 0.000719 * (2.0 * tthet).cos()
            + 0.000077 * (2.0 * tthet).sin());
    let rpot_h = rpot * theta_rad.cos();

    rpot_h.max(0.0)
}

/// Shift a day's minute series so its peak lands on `noon_minute`,
/// zero-filling the vacated edge.
fn shift(day: &mut [f64], noon_minute: i32) {
    let offset = noon_minute - 720;
    if offset == 0 {
        return;
    }
    if offset > 0 {
        let k = offset as usize;
        day.copy_within(0..MINUTES_PER_DAY - k, k);
        for v in day[..k].iter_mut() {
            *v = 0.0;
        }
    } else {
        let k = (-offset) as usize;
        day.copy_within(k..MINUTES_PER_DAY, 0);
        for v in day[MINUTES_PER_DAY - k..].iter_mut() {
            *v = 0.0;
        }
    }
}

/// Two-half shift for a timezone-change day: the minutes before the change
/// use the old offset's noon, the rest the new one's.
fn shift_two(day: &mut [f64], noon_old: i32, noon_new: i32, change_minute: usize) {
    let mut second_half = day.to_vec();
    shift(day, noon_old);
    shift(&mut second_half, noon_new);
    day[change_minute..].copy_from_slice(&second_half[change_minute..]);
}

/// Potential radiation for a whole site-year at the dataset resolution.
///
/// Output length equals the year's row count; every value is >= 0.
pub fn potential_radiation(details: &SiteDetails) -> Vec<f64> {
    potential_radiation_with_solar_noon(details, 0, 0).0
}

/// Same as [`potential_radiation`] but also reports the solar noon (as an
/// `hhmmss` integer) of the probed month/day, for the shift-detection
/// output.
pub fn potential_radiation_with_solar_noon(
    details: &SiteDetails,
    probe_month: u32,
    probe_day: u32,
) -> (Vec<f64>, Option<i32>) {
    let year = details.year;
    let days = days_per_year(year);
    let aggr = details.timeres.minutes_per_row();
    let rows_per_day = MINUTES_PER_DAY / aggr;

    // west-positive longitude and inverted offset, the NOAA convention
    let longitude = -details.lon;
    let mut zone = -details.time_zones[0].offset;

    let mut out = Vec::with_capacity(days * rows_per_day);
    let mut probed_noon = None;
    let mut day_minutes = vec![0.0f64; MINUTES_PER_DAY];

    let mut next_zone = if details.time_zones.len() > 1 { 1 } else { 0 };
    for day_index in 0..days {
        for (i, slot) in day_minutes.iter_mut().enumerate() {
            let absolute = day_index * MINUTES_PER_DAY + i;
            let doy = absolute / MINUTES_PER_DAY + 1;
            let hour = (absolute % MINUTES_PER_DAY) as f64 / 60.0;
            *slot = minute_rpot(details.lat, doy, hour);
        }

        let (month, day) = month_and_day(day_index + 1, year);

        let change = next_zone != 0
            && details.time_zones[next_zone].timestamp.month == month
            && details.time_zones[next_zone].timestamp.day == day;
        if change {
            let (h, m, _) = solar_noon_minutes(year, month, day, longitude, zone);
            let noon_old = (60 * h + m) as i32;
            zone = -details.time_zones[next_zone].offset;
            let change_minute = (60 * details.time_zones[next_zone].timestamp.hour
                + details.time_zones[next_zone].timestamp.minute)
                as usize;
            next_zone += 1;
            if next_zone >= details.time_zones.len() {
                next_zone = 0;
            }
            let (h, m, s) = solar_noon_minutes(year, month, day, longitude, zone);
            if month == probe_month && day == probe_day {
                probed_noon = Some((h * 10000 + m * 100 + s) as i32);
            }
            let noon_new = (60 * h + m) as i32;
            shift_two(&mut day_minutes, noon_old, noon_new, change_minute);
        } else {
            let (h, m, s) = solar_noon_minutes(year, month, day, longitude, zone);
            if month == probe_month && day == probe_day {
                probed_noon = Some((h * 10000 + m * 100 + s) as i32);
            }
            shift(&mut day_minutes, (60 * h + m) as i32);
        }

        for chunk in day_minutes.chunks(aggr) {
            out.push(chunk.iter().sum::<f64>() / aggr as f64);
        }
    }

    (out, probed_noon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::details::SiteDetails;
    use flux_core::TimeRes;

    fn test_details(lat: f64, lon: f64, year: i32) -> SiteDetails {
        let header = format!(
            "site,US-TST\nyear,{}\nlat,{}\nlon,{}\n\
timezone,{}01010000,-7\nhtower,{}01010000,3.0\ntimeres,halfhourly\nsc_negl,0\n",
            year, lat, lon, year, year
        );
        SiteDetails::parse(&header).unwrap().0
    }

    #[test]
    fn test_output_length_matches_year() {
        let rpot = potential_radiation(&test_details(40.0, -105.0, 2010));
        assert_eq!(rpot.len(), 17520);
        let rpot = potential_radiation(&test_details(40.0, -105.0, 2012));
        assert_eq!(rpot.len(), 17568);
    }

    #[test]
    fn test_hourly_output_length() {
        let mut dd = test_details(40.0, -105.0, 2010);
        dd.timeres = TimeRes::Hourly;
        assert_eq!(potential_radiation(&dd).len(), 8760);
    }

    #[test]
    fn test_never_negative() {
        let rpot = potential_radiation(&test_details(40.0, -105.0, 2010));
        assert!(rpot.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_noon_positive_night_zero() {
        let rpot = potential_radiation(&test_details(40.0, -105.0, 2010));
        // June 21 local noon (row = day 171 * 48 + 24)
        let noon_row = 171 * 48 + 24;
        assert!(rpot[noon_row] > 400.0);
        // June 21 local midnight
        assert!(rpot[171 * 48] < 1.0);
    }

    #[test]
    fn test_polar_winter_is_dark() {
        let rpot = potential_radiation(&test_details(78.0, 15.0, 2010));
        // winter solstice day at 78N: sun never rises
        let day = 354;
        let slice = &rpot[day * 48..(day + 1) * 48];
        assert!(slice.iter().all(|&v| v < 1.0));
    }

    #[test]
    fn test_winter_daily_sum_shrinks_toward_pole() {
        let day = 354; // around Dec 21
        let sum_at = |lat: f64| -> f64 {
            let rpot = potential_radiation(&test_details(lat, 0.0, 2010));
            rpot[day * 48..(day + 1) * 48].iter().sum()
        };
        let low = sum_at(20.0);
        let mid = sum_at(50.0);
        let high = sum_at(80.0);
        assert!(low > mid);
        assert!(mid > high);
        assert!(high < 1.0);
    }

    #[test]
    fn test_shift_moves_peak() {
        let mut day: Vec<f64> = (0..MINUTES_PER_DAY).map(|i| if i == 720 { 1.0 } else { 0.0 }).collect();
        shift(&mut day, 750);
        assert_eq!(day[750], 1.0);
        assert_eq!(day[720], 0.0);
        let mut day: Vec<f64> = (0..MINUTES_PER_DAY).map(|i| if i == 720 { 1.0 } else { 0.0 }).collect();
        shift(&mut day, 690);
        assert_eq!(day[690], 1.0);
    }
}
