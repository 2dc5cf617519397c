//! Range clamps, radiation consistency checks and u* recovery.

use flux_core::stats::{linear_regression, standard_deviation};
use flux_core::{is_invalid, INVALID_VALUE, TimeRes};

/// Valid range for a half-hourly value. Values below `zero_floor` (when
/// set) are clamped to zero instead of discarded.
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub min: f64,
    pub max: f64,
    pub zero_floor: bool,
}

/// The fixed screening range for a variable, if one is defined.
pub fn range_for(base: &str) -> Option<Range> {
    let r = match base.to_ascii_uppercase().as_str() {
        "TA" => Range { min: -50.0, max: 50.0, zero_floor: false },
        "VPD" => Range { min: -5.0, max: 120.0, zero_floor: true },
        "P" => Range { min: -0.1, max: 200.0, zero_floor: true },
        "WS" => Range { min: 0.0, max: 40.0, zero_floor: false },
        "SW_IN" => Range { min: -50.0, max: 1400.0, zero_floor: true },
        "LW_IN" => Range { min: 50.0, max: 700.0, zero_floor: false },
        "PA" => Range { min: 70.0, max: 130.0, zero_floor: false },
        _ => return None,
    };
    Some(r)
}

/// Apply a range clamp in place: out-of-range values go missing, small
/// negatives go to zero where the range allows it.
pub fn apply_range(values: &mut [f64], range: Range) {
    for v in values.iter_mut() {
        if is_invalid(*v) {
            continue;
        }
        if *v < range.min || *v > range.max {
            *v = INVALID_VALUE;
        } else if range.zero_floor && *v < 0.0 {
            *v = 0.0;
        }
    }
}

/// Missing/negative incoming radiation during potential-radiation night.
///
/// When SW_IN_POT is zero and any valid value exists within the window,
/// the row is set to 0 and flagged as derived; a negative value while the
/// sun is up goes missing instead. Keeps nighttime data available for the
/// u*-threshold stage.
pub fn zero_night_radiation(
    values: &mut [f64],
    rpot: &[f64],
    res: TimeRes,
    derived_flag: Option<&mut [f64]>,
) {
    let window = match res {
        TimeRes::HalfHourly => 24,
        TimeRes::Hourly => 12,
    };
    let original: Vec<f64> = values.to_vec();
    let mut flags = derived_flag;
    for i in 0..values.len() {
        let missing = is_invalid(original[i]);
        if !missing && original[i] >= 0.0 {
            continue;
        }
        if rpot[i] == 0.0 {
            let start = i.saturating_sub(window);
            let end = (i + window).min(values.len());
            let any_valid = original[start..end].iter().any(|&v| !is_invalid(v));
            if any_valid {
                values[i] = 0.0;
                if let Some(f) = flags.as_deref_mut() {
                    f[i] = 1.0;
                }
            }
        } else {
            values[i] = INVALID_VALUE;
        }
    }
}

/// Consistency flag of measured radiation against the potential curve.
///
/// Flag = 1 when the (scaled) measurement exceeds 50 W m^-2 under a zero
/// potential, or tops the potential by more than 50 W m^-2 and 15% when
/// the potential itself exceeds 200 W m^-2. `scale` is 1 for SW_IN and
/// 0.5 for PPFD.
pub fn radiation_vs_potential_flags(values: &[f64], rpot: &[f64], scale: f64) -> Vec<f64> {
    const VALUE_CHECK: f64 = 50.0;
    const RPOT_CHECK: f64 = 200.0;
    const EXCESS_LIMIT: f64 = 0.15;

    let mut flags = vec![0.0; values.len()];
    for i in 0..values.len() {
        if is_invalid(values[i]) {
            flags[i] = INVALID_VALUE;
            continue;
        }
        let scaled = values[i] * scale;
        let excess = scaled - rpot[i];
        if excess > 0.0 {
            if rpot[i] == 0.0 {
                if scaled > VALUE_CHECK {
                    flags[i] = 1.0;
                }
            } else if excess > VALUE_CHECK
                && rpot[i] > RPOT_CHECK
                && excess / rpot[i] > EXCESS_LIMIT
            {
                flags[i] = 1.0;
            }
        }
    }
    flags
}

/// Minimum valid pairs before the SW_IN <-> PPFD comparison runs.
pub const RADIATION_PAIRS_MIN: usize = 11000;
/// Residual multiplier for the outlier band.
pub const RADIATION_STDDEV_MULT: f64 = 5.0;
/// Minimum residual spread for the comparison to be meaningful.
pub const SWIN_VS_PPFD_THRESHOLD: f64 = 0.01;

/// Cross-check SW_IN against PPFD by linear regression.
///
/// Returns a flag column (1 = inconsistent pair) or `None` when there are
/// too few paired values or the residual spread is below threshold. The
/// caller masks flagged rows in both series.
pub fn swin_vs_ppfd_flags(swin: &[f64], ppfd: &[f64]) -> Option<Vec<f64>> {
    let mut pairs: Vec<(f64, f64)> = Vec::new();
    let mut pair_rows: Vec<usize> = Vec::new();
    let mut flags = vec![INVALID_VALUE; swin.len()];
    for i in 0..swin.len() {
        if !is_invalid(swin[i]) && !is_invalid(ppfd[i]) {
            pairs.push((swin[i], ppfd[i]));
            pair_rows.push(i);
            flags[i] = 0.0;
        }
    }
    if pairs.len() < RADIATION_PAIRS_MIN {
        return None;
    }
    let (slope, intercept) = linear_regression(&pairs)?;
    let residuals: Vec<f64> = pairs
        .iter()
        .map(|&(x, y)| y - (slope * x + intercept))
        .collect();
    let stddev = standard_deviation(&residuals);
    if is_invalid(stddev) || stddev <= SWIN_VS_PPFD_THRESHOLD {
        return Some(flags);
    }
    // distance from the fit line, not just the vertical residual
    let denominator = (1.0 + slope * slope).sqrt();
    for (k, &row) in pair_rows.iter().enumerate() {
        if residuals[k].abs() >= RADIATION_STDDEV_MULT * stddev
            && residuals[k].abs() / denominator > 50.0
        {
            flags[row] = 1.0;
        }
    }
    Some(flags)
}

/// Recover u* from momentum flux when the u* column is entirely missing:
/// u* = sqrt(|tau| / 1.2).
pub fn ustar_from_tau(ustar: &mut [f64], tau: &[f64]) {
    if ustar.iter().any(|&v| !is_invalid(v)) {
        return;
    }
    for (u, &t) in ustar.iter_mut().zip(tau) {
        if is_invalid(t) {
            *u = INVALID_VALUE;
        } else {
            *u = flux_core::fold_nan((t.abs() / 1.2).sqrt());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_clamps() {
        let mut ta = vec![-60.0, -50.0, 0.0, 50.0, 51.0, INVALID_VALUE];
        apply_range(&mut ta, range_for("TA").unwrap());
        assert!(is_invalid(ta[0]));
        assert_eq!(ta[1], -50.0);
        assert_eq!(ta[3], 50.0);
        assert!(is_invalid(ta[4]));
        assert!(is_invalid(ta[5]));

        let mut vpd = vec![-6.0, -3.0, 100.0, 121.0];
        apply_range(&mut vpd, range_for("VPD").unwrap());
        assert!(is_invalid(vpd[0]));
        assert_eq!(vpd[1], 0.0); // small negative clamps to zero
        assert_eq!(vpd[2], 100.0);
        assert!(is_invalid(vpd[3]));

        let mut sw = vec![-60.0, -10.0, 1200.0, 1500.0];
        apply_range(&mut sw, range_for("SW_IN").unwrap());
        assert!(is_invalid(sw[0]));
        assert_eq!(sw[1], 0.0);
        assert_eq!(sw[2], 1200.0);
        assert!(is_invalid(sw[3]));
    }

    #[test]
    fn test_no_range_for_unknown_variable() {
        assert!(range_for("USTAR").is_none());
    }

    #[test]
    fn test_zero_night_radiation() {
        let n = 100;
        let mut sw = vec![INVALID_VALUE; n];
        sw[40] = 150.0; // a valid value near the missing night rows
        sw[50] = -3.0;
        let mut rpot = vec![0.0; n];
        for (i, r) in rpot.iter_mut().enumerate() {
            if i >= 60 {
                *r = 300.0;
            }
        }
        let mut flags = vec![0.0; n];
        zero_night_radiation(&mut sw, &rpot, TimeRes::HalfHourly, Some(&mut flags));
        // missing at night with a valid neighbour inside +/-24 rows
        assert_eq!(sw[30], 0.0);
        assert_eq!(flags[30], 1.0);
        // negative at night becomes zero too
        assert_eq!(sw[50], 0.0);
        // missing at night but nothing valid within the window
        assert!(is_invalid(sw[0]));
        assert_eq!(flags[0], 0.0);
        // missing during the day stays missing
        assert!(is_invalid(sw[80]));
    }

    #[test]
    fn test_radiation_vs_potential_flags() {
        let values = vec![60.0, 40.0, 300.0, 260.0, INVALID_VALUE];
        let rpot = vec![0.0, 0.0, 220.0, 220.0, 100.0];
        let flags = radiation_vs_potential_flags(&values, &rpot, 1.0);
        assert_eq!(flags[0], 1.0); // >50 with no sun
        assert_eq!(flags[1], 0.0);
        // 300 vs 220: excess 80 > 50 and 36% > 15%
        assert_eq!(flags[2], 1.0);
        // 260 vs 220: excess 40 <= 50
        assert_eq!(flags[3], 0.0);
        assert!(is_invalid(flags[4]));
    }

    #[test]
    fn test_ppfd_uses_half_scale() {
        let values = vec![90.0, 110.0];
        let rpot = vec![0.0, 0.0];
        let flags = radiation_vs_potential_flags(&values, &rpot, 0.5);
        assert_eq!(flags[0], 0.0); // 45 <= 50
        assert_eq!(flags[1], 1.0); // 55 > 50
    }

    #[test]
    fn test_swin_vs_ppfd_needs_enough_pairs() {
        let swin = vec![100.0; 100];
        let ppfd = vec![200.0; 100];
        assert!(swin_vs_ppfd_flags(&swin, &ppfd).is_none());
    }

    #[test]
    fn test_swin_vs_ppfd_flags_outliers() {
        let n = 12000;
        let mut swin = Vec::with_capacity(n);
        let mut ppfd = Vec::with_capacity(n);
        for i in 0..n {
            let x = (i % 700) as f64;
            swin.push(x);
            // 2x + small deterministic wiggle so the residual spread is real
            ppfd.push(2.0 * x + ((i % 7) as f64 - 3.0));
        }
        // one pair far off the line
        ppfd[6000] = 2.0 * swin[6000] + 500.0;
        let flags = swin_vs_ppfd_flags(&swin, &ppfd).unwrap();
        assert_eq!(flags[6000], 1.0);
        assert_eq!(flags[100], 0.0);
    }

    #[test]
    fn test_ustar_from_tau() {
        let mut ustar = vec![INVALID_VALUE; 4];
        let tau = vec![1.2, -1.2, INVALID_VALUE, 0.0];
        ustar_from_tau(&mut ustar, &tau);
        assert_eq!(ustar[0], 1.0);
        assert_eq!(ustar[1], 1.0);
        assert!(is_invalid(ustar[2]));
        assert_eq!(ustar[3], 0.0);
    }

    #[test]
    fn test_ustar_not_rederived_when_present() {
        let mut ustar = vec![0.5, INVALID_VALUE];
        let tau = vec![1.2, 1.2];
        ustar_from_tau(&mut ustar, &tau);
        assert_eq!(ustar[0], 0.5);
        assert!(is_invalid(ustar[1]));
    }
}
