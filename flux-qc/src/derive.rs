//! Row-level derivations: NEE composition, VPD, SW_IN from PPFD.

use flux_core::error::{PipelineError, Result};
use flux_core::stats::linear_regression;
use flux_core::{fold_nan, is_invalid, INVALID_VALUE, TimeRes};

/// Acceptance range for a composed NEE, exclusive on both ends.
pub const STORAGE_RANGE_MIN: f64 = -80.0;
pub const STORAGE_RANGE_MAX: f64 = 50.0;

/// Inputs to the NEE composition.
pub struct NeeInputs<'a> {
    pub fc: &'a [f64],
    pub sc: Option<&'a [f64]>,
    pub co2: Option<&'a [f64]>,
    /// A NEE column already present on input wins over Fc + Sc.
    pub existing_nee: Option<&'a [f64]>,
    /// Footprint quality; 0 masks the row.
    pub qc_foot: Option<&'a [f64]>,
    /// Per-row tower height.
    pub heights: &'a [f64],
    /// Per-row storage-negligible flag.
    pub sc_negl: &'a [bool],
    pub res: TimeRes,
}

/// Compose NEE, stamping flag 1 (Fc + Sc), 2 (storage from top of tower)
/// or 3 (Fc alone, storage negligible). `None` when Fc is absent in
/// practice (all missing), in which case NEE is not derived at all.
pub fn compose_nee(inputs: &NeeInputs) -> Option<(Vec<f64>, Vec<f64>)> {
    let n = inputs.fc.len();
    if inputs.fc.iter().all(|&v| is_invalid(v)) {
        return None;
    }
    let seconds = match inputs.res {
        TimeRes::HalfHourly => 1800.0,
        TimeRes::Hourly => 3600.0,
    };

    // method 1 source: an imported NEE column, else Fc + Sc in range
    let mut fcstor = vec![INVALID_VALUE; n];
    if let Some(nee) = inputs.existing_nee {
        fcstor.copy_from_slice(nee);
    } else if let Some(sc) = inputs.sc {
        for i in 0..n {
            if !is_invalid(inputs.fc[i]) && !is_invalid(sc[i]) {
                let value = inputs.fc[i] + sc[i];
                if value > STORAGE_RANGE_MIN && value < STORAGE_RANGE_MAX {
                    fcstor[i] = value;
                }
            }
        }
    }

    // method 2 source: storage from the CO2 profile top
    let mut fcstortt = vec![INVALID_VALUE; n];
    if let Some(co2) = inputs.co2 {
        for i in 1..n {
            if is_invalid(co2[i]) || is_invalid(co2[i - 1]) || is_invalid(inputs.fc[i]) {
                continue;
            }
            let height = inputs.heights[i];
            if is_invalid(height) {
                continue;
            }
            let value =
                inputs.fc[i] + ((co2[i] - co2[i - 1]) / seconds) * (height / 0.024);
            if value > STORAGE_RANGE_MIN && value < STORAGE_RANGE_MAX {
                fcstortt[i] = value;
            }
        }
    }

    let mut nee = vec![INVALID_VALUE; n];
    let mut flags = vec![INVALID_VALUE; n];
    for i in 0..n {
        if !is_invalid(fcstor[i]) {
            nee[i] = fcstor[i];
            flags[i] = 1.0;
        } else if !is_invalid(fcstortt[i]) {
            nee[i] = fcstortt[i];
            flags[i] = 2.0;
        } else if inputs.sc_negl[i] && !is_invalid(inputs.fc[i]) {
            nee[i] = inputs.fc[i];
            flags[i] = 3.0;
        }
    }

    if let Some(foot) = inputs.qc_foot {
        for i in 0..n {
            if foot[i] == 0.0 && !is_invalid(nee[i]) {
                nee[i] = INVALID_VALUE;
                flags[i] = INVALID_VALUE;
            }
        }
    }

    Some((nee, flags))
}

/// Vapour pressure deficit (hPa) from air temperature and relative
/// humidity; out-of-range results go missing.
pub fn vpd_from_ta_rh(ta: &[f64], rh: &[f64]) -> Vec<f64> {
    const VPD_RANGE_MIN: f64 = -5.0;
    const VPD_RANGE_MAX: f64 = 120.0;
    ta.iter()
        .zip(rh)
        .map(|(&t, &h)| {
            if is_invalid(t) || is_invalid(h) {
                return INVALID_VALUE;
            }
            let value = 6.11 * (17.26938818 * t / (237.3 + t)).exp() * (1.0 - h / 100.0);
            let value = fold_nan(value);
            if is_invalid(value) || value < VPD_RANGE_MIN || value > VPD_RANGE_MAX {
                INVALID_VALUE
            } else {
                value
            }
        })
        .collect()
}

const PPFD_TO_SWIN: f64 = 0.52;
const SLOPE_TOLERANCE: f64 = 0.2;

/// Derive or infill SW_IN from PPFD.
///
/// With no usable SW_IN at all the fixed 0.52 conversion applies (flag 3).
/// Otherwise missing rows are infilled through the inverse of the
/// SW_IN -> PPFD regression (flag 2); a slope outside the plausible band
/// aborts the derivation. Observed rows are never touched.
pub fn swin_from_ppfd(
    swin: Option<&[f64]>,
    ppfd: &[f64],
) -> Result<Option<(Vec<f64>, Vec<f64>)>> {
    let n = ppfd.len();
    if ppfd.iter().all(|&v| is_invalid(v)) {
        return Ok(None);
    }
    let valid_swin = swin
        .map(|s| s.iter().filter(|&&v| !is_invalid(v)).count())
        .unwrap_or(0);

    let mut flags = vec![0.0; n];
    if valid_swin == 0 {
        let mut out = vec![INVALID_VALUE; n];
        for i in 0..n {
            if !is_invalid(ppfd[i]) {
                out[i] = ppfd[i] * PPFD_TO_SWIN;
                flags[i] = 3.0;
            }
        }
        return Ok(Some((out, flags)));
    }

    let swin = swin.unwrap();
    let pairs: Vec<(f64, f64)> = swin
        .iter()
        .zip(ppfd)
        .filter(|(&s, &p)| !is_invalid(s) && !is_invalid(p))
        .map(|(&s, &p)| (s, p))
        .collect();
    if pairs.is_empty() {
        return Ok(None);
    }
    let (slope, intercept) = match linear_regression(&pairs) {
        Some(fit) => fit,
        None => return Ok(None),
    };
    let slope_min = 1.0 / (PPFD_TO_SWIN + SLOPE_TOLERANCE);
    let slope_max = 1.0 / (PPFD_TO_SWIN - SLOPE_TOLERANCE);
    if slope < slope_min || slope > slope_max {
        return Err(PipelineError::InsufficientData(format!(
            "unable to compute SW_IN from PPFD_IN: slope is {:.6}",
            slope
        )));
    }
    let mut out = swin.to_vec();
    for i in 0..n {
        if is_invalid(out[i]) && !is_invalid(ppfd[i]) {
            out[i] = (ppfd[i] - intercept) / slope;
            flags[i] = 2.0;
        }
    }
    Ok(Some((out, flags)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nee_inputs<'a>(
        fc: &'a [f64],
        sc: Option<&'a [f64]>,
        co2: Option<&'a [f64]>,
        heights: &'a [f64],
        sc_negl: &'a [bool],
    ) -> NeeInputs<'a> {
        NeeInputs {
            fc,
            sc,
            co2,
            existing_nee: None,
            qc_foot: None,
            heights,
            sc_negl,
            res: TimeRes::HalfHourly,
        }
    }

    #[test]
    fn test_nee_from_fc_plus_sc() {
        let fc = vec![-5.0, -5.0];
        let sc = vec![1.0, INVALID_VALUE];
        let heights = vec![INVALID_VALUE; 2];
        let negl = vec![false; 2];
        let (nee, flags) =
            compose_nee(&nee_inputs(&fc, Some(&sc), None, &heights, &negl)).unwrap();
        assert_eq!(nee[0], -4.0);
        assert_eq!(flags[0], 1.0);
        assert!(is_invalid(nee[1]));
    }

    #[test]
    fn test_nee_storage_from_tower_top() {
        let fc = vec![-5.0, -5.0];
        let co2 = vec![400.0, 400.0 + 1800.0 * 0.024]; // delta chosen so the term is height
        let heights = vec![3.0, 3.0];
        let negl = vec![false; 2];
        let (nee, flags) =
            compose_nee(&nee_inputs(&fc, None, Some(&co2), &heights, &negl)).unwrap();
        assert!(is_invalid(nee[0])); // no previous CO2 sample
        assert!((nee[1] - (-5.0 + 3.0)).abs() < 1e-9);
        assert_eq!(flags[1], 2.0);
    }

    #[test]
    fn test_nee_fc_alone_when_storage_negligible() {
        let fc = vec![-5.0];
        let heights = vec![INVALID_VALUE];
        let negl = vec![true];
        let (nee, flags) = compose_nee(&nee_inputs(&fc, None, None, &heights, &negl)).unwrap();
        assert_eq!(nee[0], -5.0);
        assert_eq!(flags[0], 3.0);
    }

    #[test]
    fn test_nee_out_of_range_rejected() {
        let fc = vec![-100.0, 60.0];
        let sc = vec![0.0, 0.0];
        let heights = vec![INVALID_VALUE; 2];
        let negl = vec![false; 2];
        let (nee, flags) =
            compose_nee(&nee_inputs(&fc, Some(&sc), None, &heights, &negl)).unwrap();
        assert!(is_invalid(nee[0]));
        assert!(is_invalid(nee[1]));
        assert!(is_invalid(flags[0]));
    }

    #[test]
    fn test_nee_flag_exclusive() {
        // when Fc+Sc works the storage and negligible paths must not fire
        let fc = vec![-5.0];
        let sc = vec![1.0];
        let heights = vec![3.0];
        let negl = vec![true];
        let (_, flags) = compose_nee(&nee_inputs(&fc, Some(&sc), None, &heights, &negl)).unwrap();
        assert_eq!(flags[0], 1.0);
    }

    #[test]
    fn test_nee_footprint_mask() {
        let fc = vec![-5.0, -5.0];
        let sc = vec![1.0, 1.0];
        let heights = vec![INVALID_VALUE; 2];
        let negl = vec![false; 2];
        let foot = vec![0.0, 1.0];
        let mut inputs = nee_inputs(&fc, Some(&sc), None, &heights, &negl);
        inputs.qc_foot = Some(&foot);
        let (nee, flags) = compose_nee(&inputs).unwrap();
        assert!(is_invalid(nee[0]));
        assert!(is_invalid(flags[0]));
        assert_eq!(nee[1], -4.0);
    }

    #[test]
    fn test_nee_not_derived_without_fc() {
        let fc = vec![INVALID_VALUE; 4];
        let heights = vec![3.0; 4];
        let negl = vec![true; 4];
        assert!(compose_nee(&nee_inputs(&fc, None, None, &heights, &negl)).is_none());
    }

    #[test]
    fn test_vpd_formula() {
        let ta = vec![20.0];
        let rh = vec![50.0];
        let vpd = vpd_from_ta_rh(&ta, &rh);
        // esat(20 C) ~ 23.4 hPa, half of it remains as deficit
        assert!((vpd[0] - 11.7).abs() < 0.2);

        let vpd = vpd_from_ta_rh(&[20.0], &[100.0]);
        assert_eq!(vpd[0], 0.0);

        let vpd = vpd_from_ta_rh(&[INVALID_VALUE], &[50.0]);
        assert!(is_invalid(vpd[0]));
    }

    #[test]
    fn test_swin_fixed_conversion_when_absent() {
        let ppfd = vec![100.0, INVALID_VALUE];
        let (swin, flags) = swin_from_ppfd(None, &ppfd).unwrap().unwrap();
        assert_eq!(swin[0], 52.0);
        assert_eq!(flags[0], 3.0);
        assert!(is_invalid(swin[1]));
    }

    #[test]
    fn test_swin_regression_infill() {
        let n = 10000;
        let mut swin = vec![INVALID_VALUE; n];
        let mut ppfd = vec![0.0; n];
        for i in 0..n {
            let s = (i % 700) as f64;
            ppfd[i] = 2.0 * s - 4.0; // PPFD ~ (SW_IN - 2) / 0.5
            if i <= 5000 {
                swin[i] = s;
            }
        }
        let (out, flags) = swin_from_ppfd(Some(&swin), &ppfd).unwrap().unwrap();
        // observed rows preserved
        for i in 0..=5000 {
            assert_eq!(out[i], swin[i]);
            assert_eq!(flags[i], 0.0);
        }
        // infilled rows follow the inverse fit
        for i in 5001..n {
            let expected = (ppfd[i] + 4.0) / 2.0;
            assert!((out[i] - expected).abs() < 1e-6);
            assert_eq!(flags[i], 2.0);
        }
    }

    #[test]
    fn test_swin_bad_slope_aborts() {
        let n = 100;
        let swin: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let ppfd: Vec<f64> = (0..n).map(|i| 10.0 * i as f64).collect();
        assert!(swin_from_ppfd(Some(&swin), &ppfd).is_err());
    }
}
