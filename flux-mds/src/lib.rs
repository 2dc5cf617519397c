//! Marginal Distribution Sampling gap fill.
//!
//! Gaps in a target series are filled with the mean of "similar" rows:
//! rows inside a symmetric time window whose meteorological drivers fall
//! within tolerance of the gap row. A ladder of methods widens the window
//! and relaxes the driver requirements until at least two candidates turn
//! up; the fallback samples the same time of day on neighbouring days.

use flux_core::error::{PipelineError, Result};
use flux_core::{is_invalid, TimeRes, INVALID_VALUE};

/// Default adaptive tolerance bounds for driver 1 (shortwave radiation).
pub const VALUE1_TOLERANCE_MIN: f64 = 20.0;
pub const VALUE1_TOLERANCE_MAX: f64 = 50.0;
/// Default tolerance for driver 2 (air temperature, degC).
pub const VALUE2_TOLERANCE: f64 = 2.5;
/// Default tolerance for driver 3 (vapour pressure deficit, hPa).
pub const VALUE3_TOLERANCE: f64 = 5.0;

/// Rows to extend the fill domain past the first/last valid observation.
pub const BOUNDS_MARGIN_DAYS: usize = 15;

const TOFILL_VALID: u8 = 1;
const VALUE1_VALID: u8 = 2;
const VALUE2_VALID: u8 = 4;
const VALUE3_VALID: u8 = 8;
const ALL_VALID: u8 = TOFILL_VALID | VALUE1_VALID | VALUE2_VALID | VALUE3_VALID;

/// Which similarity criterion produced a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// All three drivers within tolerance.
    All,
    /// Driver 1 only.
    Value1,
    /// Same time of day on neighbouring days, target values only.
    ToFill,
}

impl Method {
    /// 1-based ordinal stamped on filled rows.
    pub fn ordinal(self) -> u8 {
        match self {
            Method::All => 1,
            Method::Value1 => 2,
            Method::ToFill => 3,
        }
    }
}

/// Per-row gap-fill annotation.
#[derive(Debug, Clone, Copy)]
pub struct GfRow {
    mask: u8,
    /// Fill result; the original value where observed, sentinel if unfilled.
    pub filled: f64,
    /// Sample standard deviation of the candidates.
    pub stddev: f64,
    /// Quality class 1..3 of a fill; `None` for observed or unfilled rows.
    pub quality: Option<u8>,
    /// Window width in days that produced the fill.
    pub time_window: u32,
    /// Number of similar samples averaged.
    pub samples_count: u32,
    /// Method that succeeded.
    pub method: Option<Method>,
}

impl GfRow {
    /// True when the target value was observed at this row.
    pub fn observed(&self) -> bool {
        self.mask & TOFILL_VALID != 0
    }
}

impl Default for GfRow {
    fn default() -> GfRow {
        GfRow {
            mask: 0,
            filled: INVALID_VALUE,
            stddev: INVALID_VALUE,
            quality: None,
            time_window: 0,
            samples_count: 0,
            method: None,
        }
    }
}

/// Target and driver series; all slices must share one length.
/// A missing driver is passed as `None` and behaves as all-invalid.
pub struct MdsDrivers<'a> {
    pub tofill: &'a [f64],
    pub value1: Option<&'a [f64]>,
    pub value2: Option<&'a [f64]>,
    pub value3: Option<&'a [f64]>,
    /// Optional driver quality codes, gated by `MdsOptions::qc_threshold`.
    pub value1_qc: Option<&'a [f64]>,
    pub value2_qc: Option<&'a [f64]>,
    pub value3_qc: Option<&'a [f64]>,
}

impl<'a> MdsDrivers<'a> {
    /// The common case: target plus the three meteorological drivers.
    pub fn new(
        tofill: &'a [f64],
        value1: &'a [f64],
        value2: &'a [f64],
        value3: &'a [f64],
    ) -> MdsDrivers<'a> {
        MdsDrivers {
            tofill,
            value1: Some(value1),
            value2: Some(value2),
            value3: Some(value3),
            value1_qc: None,
            value2_qc: None,
            value3_qc: None,
        }
    }

    /// Target-only input: every fill falls through to the time-of-day
    /// method.
    pub fn target_only(tofill: &'a [f64]) -> MdsDrivers<'a> {
        MdsDrivers {
            tofill,
            value1: None,
            value2: None,
            value3: None,
            value1_qc: None,
            value2_qc: None,
            value3_qc: None,
        }
    }
}

/// Driver tolerances; `None` selects the defaults. When only one bound of
/// the driver-1 pair is present the tolerance is fixed at that bound
/// instead of adapting to the row's radiation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tolerances {
    pub value1_min: Option<f64>,
    pub value1_max: Option<f64>,
    pub value2: Option<f64>,
    pub value3: Option<f64>,
}

/// Gap-fill configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct MdsOptions {
    pub tolerances: Tolerances,
    /// Drop driver validity where its QC code exceeds this threshold.
    pub qc_threshold: Option<f64>,
    /// Minimum observed values below which the fill refuses to run.
    pub values_min: usize,
    /// Also estimate rows that already have observations ("hat" mode).
    pub compute_hat: bool,
    /// Restrict the fill to `[start, end)`; rows outside are untouched.
    pub bounds: Option<(usize, usize)>,
}

/// Result of one gap-fill run.
pub struct MdsOutcome {
    pub rows: Vec<GfRow>,
    /// Rows the whole ladder failed to fill.
    pub unfilled: usize,
}

/// Ladder of (start, end, step, method) window schedules, in days. The
/// last entry's end is resolved to the domain length at run time.
const LADDER: [(i64, i64, i64, Method); 6] = [
    (7, 14, 7, Method::All),
    (7, 7, 7, Method::Value1),
    (0, 2, 1, Method::ToFill),
    (21, 77, 7, Method::All),
    (14, 77, 7, Method::Value1),
    (3, -1, 3, Method::ToFill),
];

/// Run the gap fill over a site-year (or a multi-year span).
pub fn fill(drivers: &MdsDrivers, res: TimeRes, opts: &MdsOptions) -> Result<MdsOutcome> {
    let rows_count = drivers.tofill.len();
    let (start_row, end_row) = match opts.bounds {
        Some((s, e)) => (s.min(rows_count), e.min(rows_count)),
        None => (0, rows_count),
    };

    let mut rows = vec![GfRow::default(); rows_count];

    // validity mask over the bounded range, with optional QC gating
    let mut valids = 0usize;
    for i in start_row..end_row {
        let mut mask = 0u8;
        if !is_invalid(drivers.tofill[i]) {
            mask |= TOFILL_VALID;
        }
        if driver_valid(drivers.value1, drivers.value1_qc, opts.qc_threshold, i) {
            mask |= VALUE1_VALID;
        }
        if driver_valid(drivers.value2, drivers.value2_qc, opts.qc_threshold, i) {
            mask |= VALUE2_VALID;
        }
        if driver_valid(drivers.value3, drivers.value3_qc, opts.qc_threshold, i) {
            mask |= VALUE3_VALID;
        }
        rows[i].mask = mask;
        if mask & TOFILL_VALID != 0 {
            valids += 1;
        }
    }
    if valids < opts.values_min {
        return Err(PipelineError::InsufficientData(format!(
            "{} valid values to fill, {} required",
            valids, opts.values_min
        )));
    }

    let tol = resolve_tolerances(&opts.tolerances);
    let rows_per_day = res.rows_per_day() as i64;
    let hourly = res == TimeRes::Hourly;
    // same-time-of-day span and window padding of the fallback method
    let (neighbour_span, back_pad, fwd_pad) = if hourly { (3, 1, 2) } else { (5, 2, 3) };

    let mut scratch: Vec<f64> = Vec::with_capacity(256);
    let mut unfilled = 0usize;

    for row in start_row..end_row {
        rows[row].filled = drivers.tofill[row];
        if !is_invalid(rows[row].filled) && !opts.compute_hat {
            continue;
        }

        let mut done = false;
        'ladder: for &(start, end, step, method) in &LADDER {
            let end = if end < 0 { end_row as i64 + 1 } else { end };
            let mut i = start;
            let scan_step = if method == Method::ToFill { rows_per_day } else { 1 };
            while i <= end {
                scratch.clear();
                let window = rows_per_day * i;

                let mut window_start = row as i64 - window;
                let mut window_end = row as i64 + window;
                let mut tol1 = 0.0;
                if method == Method::ToFill {
                    window_start -= back_pad;
                    window_end += fwd_pad;
                } else {
                    window_start += 1;
                    if window_start < 0 {
                        window_start = 0;
                    }
                    if window_end > end_row as i64 {
                        window_end = end_row as i64;
                    }
                    tol1 = match (tol.value1_min, tol.value1_max) {
                        (None, Some(max)) => max,
                        (Some(min), None) => min,
                        (Some(min), Some(max)) => drivers
                            .value1
                            .map(|v| v[row].clamp(min, max))
                            .unwrap_or(min),
                        (None, None) => unreachable!(),
                    };
                }

                let mut wc = window_start;
                while wc < window_end {
                    match method {
                        Method::All => {
                            let w = wc as usize;
                            if rows[w].mask & ALL_VALID == ALL_VALID
                                && within(drivers.value2, w, row, tol.value2)
                                && within(drivers.value1, w, row, tol1)
                                && within(drivers.value3, w, row, tol.value3)
                            {
                                scratch.push(drivers.tofill[w]);
                            }
                        }
                        Method::Value1 => {
                            let w = wc as usize;
                            if rows[w].mask & (TOFILL_VALID | VALUE1_VALID)
                                == (TOFILL_VALID | VALUE1_VALID)
                                && within(drivers.value1, w, row, tol1)
                            {
                                scratch.push(drivers.tofill[w]);
                            }
                        }
                        Method::ToFill => {
                            for y in 0..neighbour_span {
                                let idx = wc + y;
                                if idx < 0 || idx >= end_row as i64 {
                                    continue;
                                }
                                if rows[idx as usize].mask & TOFILL_VALID != 0 {
                                    scratch.push(drivers.tofill[idx as usize]);
                                }
                            }
                        }
                    }
                    wc += scan_step;
                }

                if scratch.len() > 1 {
                    let n = scratch.len() as f64;
                    let mean = scratch.iter().sum::<f64>() / n;
                    let sum2: f64 = scratch.iter().map(|&v| (v - mean) * (v - mean)).sum();
                    rows[row].filled = mean;
                    rows[row].stddev = (sum2 / (n - 1.0)).sqrt();
                    rows[row].method = Some(method);
                    rows[row].time_window = (i * 2) as u32
                        + if method == Method::ToFill { 1 } else { 0 };
                    rows[row].samples_count = scratch.len() as u32;
                    done = true;
                    break 'ladder;
                }

                i += step;
                if window_start < start_row as i64 && window_end > end_row as i64 {
                    break;
                }
            }
        }

        if !done {
            unfilled += 1;
            continue;
        }

        let m = rows[row].method.map(Method::ordinal).unwrap_or(0);
        let tw = rows[row].time_window;
        let mut quality = 1u8;
        if ((m == 1 || m == 2) && tw > 14) || (m == 3 && tw > 1) {
            quality += 1;
        }
        if (m == 1 && tw > 56) || (m == 2 && tw > 28) || (m == 3 && tw > 5) {
            quality += 1;
        }
        rows[row].quality = Some(quality);
    }

    Ok(MdsOutcome { rows, unfilled })
}

/// Fill domain around the observed span of a target: first/last valid row
/// widened by [`BOUNDS_MARGIN_DAYS`]. `None` when the target is entirely
/// missing, an error when a single lonely value makes filling meaningless.
pub fn observed_bounds(target: &[f64], res: TimeRes) -> Result<Option<(usize, usize)>> {
    let first = target.iter().position(|&v| !is_invalid(v));
    let first = match first {
        Some(f) => f,
        None => return Ok(None),
    };
    let last = target.iter().rposition(|&v| !is_invalid(v)).unwrap();
    if first == last {
        return Err(PipelineError::InsufficientData(
            "only one valid value".into(),
        ));
    }
    let margin = BOUNDS_MARGIN_DAYS * res.rows_per_day();
    let start = first.saturating_sub(margin);
    let end = (last + margin).min(target.len());
    Ok(Some((start, end)))
}

fn resolve_tolerances(t: &Tolerances) -> ResolvedTolerances {
    let (value1_min, value1_max) = match (t.value1_min, t.value1_max) {
        (None, None) => (Some(VALUE1_TOLERANCE_MIN), Some(VALUE1_TOLERANCE_MAX)),
        pair => pair,
    };
    ResolvedTolerances {
        value1_min,
        value1_max,
        value2: t.value2.unwrap_or(VALUE2_TOLERANCE),
        value3: t.value3.unwrap_or(VALUE3_TOLERANCE),
    }
}

struct ResolvedTolerances {
    value1_min: Option<f64>,
    value1_max: Option<f64>,
    value2: f64,
    value3: f64,
}

#[inline]
fn within(series: Option<&[f64]>, candidate: usize, row: usize, tolerance: f64) -> bool {
    match series {
        Some(v) => (v[candidate] - v[row]).abs() < tolerance,
        None => false,
    }
}

#[inline]
fn driver_valid(
    series: Option<&[f64]>,
    qc: Option<&[f64]>,
    threshold: Option<f64>,
    i: usize,
) -> bool {
    let valid = series.map(|v| !is_invalid(v[i])).unwrap_or(false);
    if !valid {
        return false;
    }
    if let (Some(thrs), Some(codes)) = (threshold, qc) {
        if !is_invalid(codes[i]) && codes[i] > thrs {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::{INVALID_VALUE, YEAR_ROWS};

    /// A synthetic half-hourly year: constant TA and VPD, SW_IN = 200 on
    /// the noon rows and 0 elsewhere.
    fn synthetic_year() -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut sw_in = vec![0.0; YEAR_ROWS];
        for (i, v) in sw_in.iter_mut().enumerate() {
            if i % 48 == 24 {
                *v = 200.0;
            }
        }
        let ta = vec![10.0; YEAR_ROWS];
        let vpd = vec![5.0; YEAR_ROWS];
        (sw_in, ta, vpd)
    }

    #[test]
    fn test_no_gaps_leaves_values_unchanged() {
        let (sw_in, ta, vpd) = synthetic_year();
        let drivers = MdsDrivers::new(&ta, &sw_in, &ta, &vpd);
        let out = fill(&drivers, TimeRes::HalfHourly, &MdsOptions::default()).unwrap();
        assert_eq!(out.unfilled, 0);
        for (i, row) in out.rows.iter().enumerate() {
            assert!(row.observed());
            assert_eq!(row.filled, ta[i]);
            assert_eq!(row.quality, None);
        }
    }

    #[test]
    fn test_single_gap_filled_by_first_method() {
        let (sw_in, mut ta, vpd) = synthetic_year();
        let ta_drivers = ta.clone();
        ta[10000] = INVALID_VALUE;
        let drivers = MdsDrivers::new(&ta, &sw_in, &ta_drivers, &vpd);
        let out = fill(&drivers, TimeRes::HalfHourly, &MdsOptions::default()).unwrap();
        let row = &out.rows[10000];
        assert!(!row.observed());
        assert_eq!(row.filled, 10.0);
        assert_eq!(row.quality, Some(1));
        assert_eq!(row.method, Some(Method::All));
        assert_eq!(row.time_window, 14);
        assert!(row.samples_count >= 14);
        assert_eq!(row.stddev, 0.0);
        assert_eq!(out.unfilled, 0);
    }

    #[test]
    fn test_target_only_falls_back_to_time_of_day() {
        // 30 synthetic days keep the all-gap ladder cheap
        let mut target = vec![INVALID_VALUE; 30 * 48];
        // same slot on several consecutive days, one missing in the middle
        for day in 10..20 {
            target[day * 48 + 20] = day as f64;
        }
        target[15 * 48 + 20] = INVALID_VALUE;
        let drivers = MdsDrivers::target_only(&target);
        let out = fill(&drivers, TimeRes::HalfHourly, &MdsOptions::default()).unwrap();
        let row = &out.rows[15 * 48 + 20];
        assert_eq!(row.method, Some(Method::ToFill));
        // neighbours at the same slot on day 14 and 16 (one-day window)
        assert_eq!(row.filled, (14.0 + 16.0) / 2.0);
        assert_eq!(row.quality, Some(2));
        assert_eq!(row.time_window, 3);
    }

    #[test]
    fn test_gap_fill_never_overwrites_observations() {
        let (sw_in, mut ta, vpd) = synthetic_year();
        let ta_drivers = ta.clone();
        ta[5000] = INVALID_VALUE;
        let drivers = MdsDrivers::new(&ta, &sw_in, &ta_drivers, &vpd);
        let out = fill(&drivers, TimeRes::HalfHourly, &MdsOptions::default()).unwrap();
        for (i, row) in out.rows.iter().enumerate() {
            if i != 5000 {
                assert_eq!(row.filled, ta[i]);
            }
        }
    }

    #[test]
    fn test_compute_hat_estimates_observed_rows() {
        let (sw_in, ta, vpd) = synthetic_year();
        let drivers = MdsDrivers::new(&ta, &sw_in, &ta, &vpd);
        let opts = MdsOptions {
            compute_hat: true,
            ..MdsOptions::default()
        };
        let out = fill(&drivers, TimeRes::HalfHourly, &opts).unwrap();
        // hat of a constant series is the constant
        assert_eq!(out.rows[9000].filled, 10.0);
        assert!(out.rows[9000].quality.is_some());
    }

    #[test]
    fn test_bounds_restrict_fill_domain() {
        let (sw_in, mut ta, vpd) = synthetic_year();
        let ta_drivers = ta.clone();
        ta[100] = INVALID_VALUE;
        ta[10000] = INVALID_VALUE;
        let drivers = MdsDrivers::new(&ta, &sw_in, &ta_drivers, &vpd);
        let opts = MdsOptions {
            bounds: Some((5000, 15000)),
            ..MdsOptions::default()
        };
        let out = fill(&drivers, TimeRes::HalfHourly, &opts).unwrap();
        // outside the bounds: untouched, no stamp
        assert!(is_invalid(out.rows[100].filled));
        assert_eq!(out.rows[100].quality, None);
        // inside: filled
        assert_eq!(out.rows[10000].filled, 10.0);
    }

    #[test]
    fn test_values_min_enforced() {
        let target = vec![INVALID_VALUE; 30 * 48];
        let drivers = MdsDrivers::target_only(&target);
        let opts = MdsOptions {
            values_min: 10,
            ..MdsOptions::default()
        };
        assert!(matches!(
            fill(&drivers, TimeRes::HalfHourly, &opts),
            Err(PipelineError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_unfilled_counter() {
        let mut target = vec![INVALID_VALUE; 30 * 48];
        target[0] = 1.0;
        target[1] = 2.0;
        let drivers = MdsDrivers::target_only(&target);
        let out = fill(&drivers, TimeRes::HalfHourly, &MdsOptions::default()).unwrap();
        // the two lonely values cannot seed fills at other times of day
        assert!(out.unfilled > 0);
    }

    #[test]
    fn test_quality_degrades_with_window() {
        // single valid pair far from the gap at the same time of day
        let mut target = vec![INVALID_VALUE; 60 * 48];
        let slot = 20;
        target[10 * 48 + slot] = 4.0;
        target[11 * 48 + slot] = 6.0;
        // gap at day 30, same slot: ToFill only succeeds once the window
        // spans ~20 days
        let gap = 30 * 48 + slot;
        let drivers = MdsDrivers::target_only(&target);
        let out = fill(&drivers, TimeRes::HalfHourly, &MdsOptions::default()).unwrap();
        let row = &out.rows[gap];
        assert_eq!(row.method, Some(Method::ToFill));
        assert_eq!(row.filled, 5.0);
        assert!(row.time_window > 5);
        assert_eq!(row.quality, Some(3));
    }

    #[test]
    fn test_observed_bounds() {
        let mut target = vec![INVALID_VALUE; YEAR_ROWS];
        target[1000] = 1.0;
        target[16000] = 2.0;
        let bounds = observed_bounds(&target, TimeRes::HalfHourly)
            .unwrap()
            .unwrap();
        assert_eq!(bounds.0, 1000 - 15 * 48);
        assert_eq!(bounds.1, (16000 + 15 * 48).min(YEAR_ROWS));

        assert_eq!(
            observed_bounds(&vec![INVALID_VALUE; 100], TimeRes::HalfHourly).unwrap(),
            None
        );

        let mut lonely = vec![INVALID_VALUE; YEAR_ROWS];
        lonely[5] = 1.0;
        assert!(observed_bounds(&lonely, TimeRes::HalfHourly).is_err());
    }

    #[test]
    fn test_qc_threshold_gates_drivers() {
        let (sw_in, mut ta, vpd) = synthetic_year();
        let ta_drivers = ta.clone();
        ta[10000] = INVALID_VALUE;
        // mark every SW_IN row with a bad QC code: method 1 and 2 starve,
        // the time-of-day fallback still fills from TA itself
        let bad_qc = vec![3.0; YEAR_ROWS];
        let drivers = MdsDrivers {
            tofill: &ta,
            value1: Some(&sw_in),
            value2: Some(&ta_drivers),
            value3: Some(&vpd),
            value1_qc: Some(&bad_qc),
            value2_qc: None,
            value3_qc: None,
        };
        let opts = MdsOptions {
            qc_threshold: Some(2.0),
            ..MdsOptions::default()
        };
        let out = fill(&drivers, TimeRes::HalfHourly, &opts).unwrap();
        let row = &out.rows[10000];
        assert_eq!(row.method, Some(Method::ToFill));
        assert_eq!(row.filled, 10.0);
    }
}
