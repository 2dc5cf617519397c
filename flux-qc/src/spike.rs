//! Night/day classification and spike detection (Papale et al. 2006).

use flux_core::error::{PipelineError, Result};
use flux_core::stats::median;
use flux_core::{is_invalid, INVALID_VALUE};

/// Default sliding-window length, half-hourly rows.
pub const SPIKES_WINDOW: usize = 624;
/// Gap-edge difference threshold for NEE.
pub const SPIKE_THRESHOLD_NEE: f64 = 6.0;
/// Gap-edge difference threshold for H and LE.
pub const SPIKE_THRESHOLD_H_LE: f64 = 100.0;

/// The three z levels of the double-difference test and the severity each
/// one stamps.
pub const SPIKE_LEVELS: [(f64, f64); 3] = [(4.0, 1.0), (5.5, 2.0), (7.0, 3.0)];

/// Night/day classification, both widened by one row on each side.
///
/// A row is night when SW_IN_POT <= 12, overridden by a valid SW_IN
/// (< 12 => night) and then by a valid PPFD (< 25 => night). Day is the
/// complement before widening, so boundary rows can belong to both.
pub fn classify_night_day(
    rpot: &[f64],
    swin: Option<&[f64]>,
    ppfd: Option<&[f64]>,
) -> (Vec<bool>, Vec<bool>) {
    let n = rpot.len();
    let mut night_raw = vec![false; n];
    for i in 0..n {
        let mut night = rpot[i] <= 12.0;
        if let Some(sw) = swin {
            if !is_invalid(sw[i]) {
                night = sw[i] < 12.0;
            }
        }
        if let Some(pp) = ppfd {
            if !is_invalid(pp[i]) {
                night = pp[i] < 25.0;
            }
        }
        night_raw[i] = night;
    }
    let day_raw: Vec<bool> = night_raw.iter().map(|&n| !n).collect();
    (widen(&night_raw), widen(&day_raw))
}

/// One-row widening so margin rows get checked in both populations.
fn widen(raw: &[bool]) -> Vec<bool> {
    let n = raw.len();
    (0..n)
        .map(|i| {
            raw[i]
                || (i > 0 && raw[i - 1])
                || (i + 1 < n && raw[i + 1])
        })
        .collect()
}

/// Double-difference spike detection over sliding windows, one population
/// (night or day) at a time, stamping `level` on rows outside the
/// median +- z * MAD / 0.6745 band.
fn detect_level(
    values: &[f64],
    population: &[bool],
    window: usize,
    z: f64,
    level: f64,
    flags: &mut [f64],
) -> Result<()> {
    let rows_count = values.len();
    let chunks = rows_count / window;
    if chunks == 0 {
        return Err(PipelineError::InvariantViolation(
            "spike window larger than the dataset".into(),
        ));
    }

    let temp: Vec<f64> = (0..rows_count)
        .map(|i| {
            if population[i] && !is_invalid(values[i]) {
                values[i]
            } else {
                INVALID_VALUE
            }
        })
        .collect();

    let mut differences = vec![INVALID_VALUE; rows_count - (chunks - 1) * window];
    for chunk in 0..chunks {
        let offset = chunk * window;
        let len = if chunk == chunks - 1 {
            rows_count - offset
        } else {
            window
        };
        differences[0] = INVALID_VALUE;
        for y in 1..len - 1 {
            let (a, b, c) = (temp[offset + y - 1], temp[offset + y], temp[offset + y + 1]);
            differences[y] = if is_invalid(a) || is_invalid(b) || is_invalid(c) {
                INVALID_VALUE
            } else {
                (b - a) - (c - b)
            };
        }
        differences[len - 1] = INVALID_VALUE;

        let m = median(&differences[..len]);
        if is_invalid(m) {
            continue;
        }
        let abs_dev: Vec<f64> = differences[..len]
            .iter()
            .map(|&d| if is_invalid(d) { INVALID_VALUE } else { (d - m).abs() })
            .collect();
        let mad = median(&abs_dev);
        if is_invalid(mad) {
            continue;
        }
        let max = m + z * mad / 0.6745;
        let min = m - z * mad / 0.6745;
        for y in 0..len {
            if !is_invalid(differences[y]) && (differences[y] > max || differences[y] < min) {
                flags[offset + y] = level;
            }
        }
    }
    Ok(())
}

/// Full spike pass for one variable: three z levels over the night and day
/// populations (severest level wins), then the gap-edge check, then flag
/// invalidation where the value itself is missing.
pub fn spike_flags(
    values: &[f64],
    night: &[bool],
    day: &[bool],
    window: usize,
    edge_threshold: f64,
) -> Result<Vec<f64>> {
    let mut flags = vec![0.0; values.len()];
    for &(z, level) in &SPIKE_LEVELS {
        detect_level(values, night, window, z, level, &mut flags)?;
        detect_level(values, day, window, z, level, &mut flags)?;
    }
    gap_edge_spikes(values, edge_threshold, &mut flags);
    for (f, &v) in flags.iter_mut().zip(values) {
        if is_invalid(v) {
            *f = INVALID_VALUE;
        }
    }
    Ok(flags)
}

/// Flag the last value before a gap and the first after it when the jump
/// to its neighbour exceeds the threshold; the three-point difference
/// cannot be formed there.
pub fn gap_edge_spikes(values: &[f64], threshold: f64, flags: &mut [f64]) {
    let n = values.len();
    for i in 2..n {
        if is_invalid(values[i]) && !is_invalid(values[i - 1]) && !is_invalid(values[i - 2]) {
            if (values[i - 1] - values[i - 2]).abs() > threshold {
                flags[i - 1] = 1.0;
            }
        }
    }
    for i in 0..n.saturating_sub(2) {
        if is_invalid(values[i]) && !is_invalid(values[i + 1]) && !is_invalid(values[i + 2]) {
            if (values[i + 1] - values[i + 2]).abs() > threshold {
                flags[i + 1] = 1.0;
            }
        }
    }
}

/// Mask values to missing where their flag equals 1 (or any severity for
/// spikes when the filter is on).
pub fn mask_flagged(values: &mut [f64], flags: &[f64]) {
    for (v, &f) in values.iter_mut().zip(flags) {
        if !is_invalid(f) && f >= 1.0 {
            *v = INVALID_VALUE;
        }
    }
}
