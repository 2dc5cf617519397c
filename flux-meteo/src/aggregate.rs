//! Multi-resolution aggregation: half-hourly to daily, weekly, monthly
//! and yearly rows.
//!
//! Every non-precipitation variable averages; precipitation sums at the
//! daily and yearly tiers. A single missing sub-row invalidates the whole
//! period ("all or nothing"), and a missing value drags its quality code
//! along.

use crate::dataset::{
    collapse_qc, Col, MeteoDataset, COLS, ERA_RANGE, FILLED_RANGE, FILLED_TO_END, SCRATCH_RANGE,
};
use flux_core::calendar::{days_per_year, is_leap_year};
use flux_core::stats::standard_deviation;
use flux_core::{is_invalid, INVALID_VALUE};

/// Aggregated soil profile series.
#[derive(Debug, Clone)]
pub struct ProfileAgg {
    pub index: u32,
    pub filled: Vec<f64>,
    pub qc: Vec<f64>,
}

/// One tier of aggregated rows, same column layout as the dataset.
pub struct AggRows {
    pub count: usize,
    pub columns: Vec<Vec<f64>>,
    pub tss: Vec<ProfileAgg>,
    pub swcs: Vec<ProfileAgg>,
    pub nights_count: Vec<f64>,
    pub days_count: Vec<f64>,
}

impl AggRows {
    fn new(count: usize, ds: &MeteoDataset) -> AggRows {
        let profile = |p: &crate::dataset::ProfileSeries| ProfileAgg {
            index: p.index,
            filled: vec![INVALID_VALUE; count],
            qc: vec![INVALID_VALUE; count],
        };
        AggRows {
            count,
            columns: vec![vec![INVALID_VALUE; count]; COLS],
            tss: ds.tss.iter().map(profile).collect(),
            swcs: ds.swcs.iter().map(profile).collect(),
            nights_count: vec![0.0; count],
            days_count: vec![0.0; count],
        }
    }

    #[inline]
    pub fn col(&self, c: Col) -> &[f64] {
        &self.columns[c as usize]
    }
}

/// All-or-nothing aggregate of `values[from..from+len]`: the mean (or sum)
/// when every sub-value is valid, missing otherwise.
fn aggregate_slice(values: &[f64], from: usize, len: usize, sum: bool) -> f64 {
    let mut total = 0.0;
    let mut valids = 0usize;
    for &v in &values[from..from + len] {
        if !is_invalid(v) {
            total += v;
            valids += 1;
        }
    }
    if valids != len {
        return INVALID_VALUE;
    }
    if sum {
        total
    } else {
        total / valids as f64
    }
}

/// Collapse the 0..3 codes to the 0/1 "good fraction" scale in place.
/// Must run after the half-hourly product is written.
pub fn collapse_quality_codes(ds: &mut MeteoDataset) {
    let plain = [
        Col::TaQc,
        Col::VpdQc,
        Col::SwInQc,
        Col::LwInQc,
        Col::Co2Qc,
        Col::TaMQc,
        Col::VpdMQc,
        Col::SwInMQc,
        Col::LwInMQc,
        Col::LwInCalcQc,
        Col::LwInCalcMQc,
    ];
    for c in plain {
        for v in ds.col_mut(c).iter_mut() {
            *v = collapse_qc(*v, false);
        }
    }
    // ERA-absent _m codes stay missing
    for c in [Col::PaMQc, Col::PrecipMQc, Col::WsMQc] {
        for v in ds.col_mut(c).iter_mut() {
            *v = collapse_qc(*v, true);
        }
    }
    for p in ds.tss.iter_mut().chain(ds.swcs.iter_mut()) {
        for v in p.qc.iter_mut() {
            *v = collapse_qc(*v, false);
        }
    }
}

/// Invalidate quality codes wherever the value itself went missing.
fn fix_qc(rows: &mut AggRows) {
    const PAIRS: [(Col, Col); 13] = [
        (Col::TaM, Col::TaMQc),
        (Col::VpdM, Col::VpdMQc),
        (Col::SwInM, Col::SwInMQc),
        (Col::LwInM, Col::LwInMQc),
        (Col::PaM, Col::PaMQc),
        (Col::PrecipM, Col::PrecipMQc),
        (Col::WsM, Col::WsMQc),
        (Col::TaFilled, Col::TaQc),
        (Col::VpdFilled, Col::VpdQc),
        (Col::SwInFilled, Col::SwInQc),
        (Col::LwInFilled, Col::LwInQc),
        (Col::Co2Filled, Col::Co2Qc),
        (Col::LwInCalc, Col::LwInCalcQc),
    ];
    for i in 0..rows.count {
        for (value, qc) in PAIRS {
            if is_invalid(rows.columns[value as usize][i]) {
                rows.columns[qc as usize][i] = INVALID_VALUE;
            }
        }
        for p in rows.tss.iter_mut().chain(rows.swcs.iter_mut()) {
            if is_invalid(p.filled[i]) {
                p.qc[i] = INVALID_VALUE;
            }
        }
    }
}

/// Daily aggregation. Collapses the quality codes first, then folds each
/// day with the all-or-nothing rule and computes the night/day TA
/// partitions (night = zero potential radiation).
pub fn compute_daily(ds: &mut MeteoDataset) -> AggRows {
    collapse_quality_codes(ds);

    let rows_per_day = ds.rows_per_day();
    let count = ds.rows_count / rows_per_day;
    let mut daily = AggRows::new(count, ds);

    for day in 0..count {
        let from = day * rows_per_day;
        for c in ERA_RANGE {
            daily.columns[c][day] = aggregate_slice(
                &ds.columns[c],
                from,
                rows_per_day,
                c == Col::PrecipEra as usize,
            );
        }
        daily.columns[Col::Rpot as usize][day] =
            aggregate_slice(&ds.columns[Col::Rpot as usize], from, rows_per_day, false);
        for c in FILLED_RANGE {
            daily.columns[c][day] = aggregate_slice(
                &ds.columns[c],
                from,
                rows_per_day,
                c == Col::PrecipM as usize,
            );
        }
        for c in [Col::LwInCalc as usize, Col::LwInCalcQc as usize] {
            daily.columns[c][day] =
                aggregate_slice(&ds.columns[c], from, rows_per_day, false);
        }
        for (agg, src) in daily.tss.iter_mut().zip(&ds.tss) {
            agg.filled[day] = aggregate_slice(&src.filled, from, rows_per_day, false);
            agg.qc[day] = aggregate_slice(&src.qc, from, rows_per_day, false);
        }
        for (agg, src) in daily.swcs.iter_mut().zip(&ds.swcs) {
            agg.filled[day] = aggregate_slice(&src.filled, from, rows_per_day, false);
            agg.qc[day] = aggregate_slice(&src.qc, from, rows_per_day, false);
        }
    }

    fix_qc(&mut daily);
    compute_nights(ds, &mut daily);
    daily
}

/// Night/day partitioned TA means, sample stddevs and quality means per
/// day, plus the night and day row counts.
fn compute_nights(ds: &MeteoDataset, daily: &mut AggRows) {
    let rows_per_day = ds.rows_per_day();
    let variants: [(Col, Option<Col>, [Col; 2], [Option<Col>; 2], [Col; 2]); 3] = [
        (
            Col::TaFilled,
            Some(Col::TaQc),
            [Col::TaFNight, Col::TaFDay],
            [Some(Col::TaFNightQc), Some(Col::TaFDayQc)],
            [Col::TaFNightStd, Col::TaFDayStd],
        ),
        (
            Col::TaM,
            Some(Col::TaMQc),
            [Col::TaMNight, Col::TaMDay],
            [Some(Col::TaMNightQc), Some(Col::TaMDayQc)],
            [Col::TaMNightStd, Col::TaMDayStd],
        ),
        (
            Col::TaEra,
            None,
            [Col::TaEraNight, Col::TaEraDay],
            [None, None],
            [Col::TaEraNightStd, Col::TaEraDayStd],
        ),
    ];

    for day in 0..daily.count {
        let from = day * rows_per_day;
        for (value_col, qc_col, mean_cols, qc_cols, std_cols) in variants {
            let mut samples: [Vec<f64>; 2] = [Vec::new(), Vec::new()];
            let mut qc_sums = [0.0f64; 2];
            for i in from..from + rows_per_day {
                let is_night = ds.columns[Col::Rpot as usize][i] == 0.0;
                let part = if is_night { 0 } else { 1 };
                let v = ds.columns[value_col as usize][i];
                if !is_invalid(v) {
                    samples[part].push(v);
                    if let Some(qc) = qc_col {
                        qc_sums[part] += ds.columns[qc as usize][i];
                    }
                }
            }
            for part in 0..2 {
                let n = samples[part].len();
                if n > 0 {
                    let mean = samples[part].iter().sum::<f64>() / n as f64;
                    daily.columns[mean_cols[part] as usize][day] = mean;
                    daily.columns[std_cols[part] as usize][day] =
                        standard_deviation(&samples[part]);
                    if let Some(qc) = qc_cols[part] {
                        daily.columns[qc as usize][day] = qc_sums[part] / n as f64;
                    }
                } else {
                    daily.columns[mean_cols[part] as usize][day] = INVALID_VALUE;
                    daily.columns[std_cols[part] as usize][day] = INVALID_VALUE;
                    if let Some(qc) = qc_cols[part] {
                        daily.columns[qc as usize][day] = INVALID_VALUE;
                    }
                }
            }
        }

        let mut nights = 0.0;
        for i in from..from + rows_per_day {
            if ds.columns[Col::Rpot as usize][i] == 0.0 {
                nights += 1.0;
            }
        }
        daily.nights_count[day] = nights;
        daily.days_count[day] = rows_per_day as f64 - nights;
    }
}

/// Generic daily-to-period fold shared by the weekly, monthly and yearly
/// tiers. `periods` yields (daily start index, length) per output row;
/// `sum_precip` turns the precipitation columns into sums (yearly tier).
fn fold_periods(
    ds: &MeteoDataset,
    daily: &AggRows,
    periods: &[(usize, usize)],
    sum_precip: bool,
) -> AggRows {
    let mut out = AggRows::new(periods.len(), ds);
    for (row, &(from, len)) in periods.iter().enumerate() {
        for c in ERA_RANGE {
            let sum = sum_precip && c == Col::PrecipEra as usize;
            out.columns[c][row] = aggregate_slice(&daily.columns[c], from, len, sum);
        }
        out.columns[Col::Rpot as usize][row] =
            aggregate_slice(&daily.columns[Col::Rpot as usize], from, len, false);
        for c in FILLED_TO_END {
            if SCRATCH_RANGE.contains(&c) {
                continue;
            }
            let sum = sum_precip && c == Col::PrecipM as usize;
            out.columns[c][row] = aggregate_slice(&daily.columns[c], from, len, sum);
        }
        for (agg, src) in out.tss.iter_mut().zip(&daily.tss) {
            agg.filled[row] = aggregate_slice(&src.filled, from, len, false);
            agg.qc[row] = aggregate_slice(&src.qc, from, len, false);
        }
        for (agg, src) in out.swcs.iter_mut().zip(&daily.swcs) {
            agg.filled[row] = aggregate_slice(&src.filled, from, len, false);
            agg.qc[row] = aggregate_slice(&src.qc, from, len, false);
        }
        let mut nights = 0.0;
        let mut days = 0.0;
        for d in from..from + len {
            nights += daily.nights_count[d];
            days += daily.days_count[d];
        }
        out.nights_count[row] = nights / len as f64;
        out.days_count[row] = days / len as f64;
    }
    fix_qc(&mut out);
    out
}

/// Weekly tier: 51 seven-day weeks plus the remainder week per year.
pub fn compute_weekly(ds: &MeteoDataset, daily: &AggRows) -> AggRows {
    let mut periods = Vec::with_capacity(ds.years.len() * 52);
    let mut offset = 0usize;
    for record in &ds.years {
        let days_in_year = days_per_year(record.year);
        for week in 0..52 {
            let len = if week == 51 { days_in_year - 51 * 7 } else { 7 };
            periods.push((offset + week * 7, len));
        }
        offset += days_in_year;
    }
    fold_periods(ds, daily, &periods, false)
}

/// Monthly tier: calendar months, leap February included.
pub fn compute_monthly(ds: &MeteoDataset, daily: &AggRows) -> AggRows {
    const DAYS_PER_MONTH: [usize; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut periods = Vec::with_capacity(ds.years.len() * 12);
    let mut offset = 0usize;
    for record in &ds.years {
        for (month, &days) in DAYS_PER_MONTH.iter().enumerate() {
            let len = if month == 1 && is_leap_year(record.year) {
                days + 1
            } else {
                days
            };
            periods.push((offset, len));
            offset += len;
        }
    }
    fold_periods(ds, daily, &periods, false)
}

/// Yearly tier; precipitation sums and its total is valid only when every
/// daily value was.
pub fn compute_yearly(ds: &MeteoDataset, daily: &AggRows) -> AggRows {
    let mut periods = Vec::with_capacity(ds.years.len());
    let mut offset = 0usize;
    for record in &ds.years {
        let days = days_per_year(record.year);
        periods.push((offset, days));
        offset += days;
    }
    fold_periods(ds, daily, &periods, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::YearInput;
    use flux_core::TimeRes;

    fn dataset_with(f: impl Fn(&mut MeteoDataset)) -> MeteoDataset {
        let mut ds = MeteoDataset::assemble(
            "US-TST",
            TimeRes::HalfHourly,
            &[YearInput { year: 2010, met: None, era: None }],
        )
        .unwrap();
        f(&mut ds);
        ds
    }

    #[test]
    fn test_daily_mean_all_or_nothing() {
        let mut ds = dataset_with(|ds| {
            for i in 0..ds.rows_count {
                ds.col_mut(Col::TaFilled)[i] = 10.0;
                ds.col_mut(Col::TaQc)[i] = 0.0;
            }
            // one missing sub-row on day 3
            ds.col_mut(Col::TaFilled)[3 * 48 + 10] = INVALID_VALUE;
        });
        let daily = compute_daily(&mut ds);
        assert_eq!(daily.col(Col::TaFilled)[0], 10.0);
        assert!(is_invalid(daily.col(Col::TaFilled)[3]));
        // qc follows the value
        assert!(is_invalid(daily.col(Col::TaQc)[3]));
        assert_eq!(daily.col(Col::TaQc)[0], 1.0); // collapsed good fraction
    }

    #[test]
    fn test_daily_precip_sums() {
        let mut ds = dataset_with(|ds| {
            for i in 0..ds.rows_count {
                ds.col_mut(Col::PrecipM)[i] = 0.1;
                ds.col_mut(Col::PrecipMQc)[i] = 0.0;
            }
        });
        let daily = compute_daily(&mut ds);
        assert!((daily.col(Col::PrecipM)[0] - 4.8).abs() < 1e-9);
    }

    #[test]
    fn test_precip_conservation_through_year() {
        let mut ds = dataset_with(|ds| {
            for i in 0..ds.rows_count {
                ds.col_mut(Col::PrecipM)[i] = 0.1;
            }
        });
        let daily = compute_daily(&mut ds);
        let yearly = compute_yearly(&ds, &daily);
        let total: f64 = ds.col(Col::PrecipM).iter().sum();
        assert!((yearly.col(Col::PrecipM)[0] - total).abs() < 1e-6);
    }

    #[test]
    fn test_night_day_partition() {
        let mut ds = dataset_with(|ds| {
            for i in 0..ds.rows_count {
                let is_day = i % 48 >= 16 && i % 48 < 32;
                ds.col_mut(Col::Rpot)[i] = if is_day { 500.0 } else { 0.0 };
                ds.col_mut(Col::TaFilled)[i] = if is_day { 20.0 } else { 10.0 };
                ds.col_mut(Col::TaQc)[i] = 0.0;
            }
        });
        let daily = compute_daily(&mut ds);
        assert_eq!(daily.col(Col::TaFNight)[0], 10.0);
        assert_eq!(daily.col(Col::TaFDay)[0], 20.0);
        assert_eq!(daily.col(Col::TaFNightStd)[0], 0.0);
        assert_eq!(daily.nights_count[0], 32.0);
        assert_eq!(daily.days_count[0], 16.0);
    }

    #[test]
    fn test_weekly_structure_and_leap_week() {
        let mut ds = MeteoDataset::assemble(
            "US-TST",
            TimeRes::HalfHourly,
            &[YearInput { year: 2012, met: None, era: None }],
        )
        .unwrap();
        for i in 0..ds.rows_count {
            ds.col_mut(Col::TaFilled)[i] = 1.0;
        }
        let daily = compute_daily(&mut ds);
        let weekly = compute_weekly(&ds, &daily);
        assert_eq!(weekly.count, 52);
        assert_eq!(weekly.col(Col::TaFilled)[0], 1.0);
        // leap year: the last week holds 8 days and still averages cleanly
        assert_eq!(weekly.col(Col::TaFilled)[51], 1.0);
    }

    #[test]
    fn test_monthly_covers_calendar() {
        let mut ds = dataset_with(|ds| {
            for i in 0..ds.rows_count {
                ds.col_mut(Col::TaFilled)[i] = 2.0;
            }
        });
        let daily = compute_daily(&mut ds);
        let monthly = compute_monthly(&ds, &daily);
        assert_eq!(monthly.count, 12);
        for m in 0..12 {
            assert_eq!(monthly.col(Col::TaFilled)[m], 2.0);
        }
    }

    #[test]
    fn test_yearly_invalidated_by_one_missing_day() {
        let mut ds = dataset_with(|ds| {
            for i in 0..ds.rows_count {
                ds.col_mut(Col::TaFilled)[i] = 5.0;
            }
            ds.col_mut(Col::TaFilled)[200 * 48] = INVALID_VALUE;
        });
        let daily = compute_daily(&mut ds);
        let yearly = compute_yearly(&ds, &daily);
        assert!(is_invalid(yearly.col(Col::TaFilled)[0]));
    }

    #[test]
    fn test_profile_aggregation() {
        let mut ds = MeteoDataset::assemble(
            "US-TST",
            TimeRes::HalfHourly,
            &[YearInput { year: 2010, met: None, era: None }],
        )
        .unwrap();
        ds.tss.push(crate::dataset::ProfileSeries {
            index: 1,
            value: vec![3.0; ds.rows_count],
            filled: vec![3.0; ds.rows_count],
            qc: vec![0.0; ds.rows_count],
        });
        let daily = compute_daily(&mut ds);
        assert_eq!(daily.tss[0].filled[0], 3.0);
        assert_eq!(daily.tss[0].qc[0], 1.0);
    }
}
