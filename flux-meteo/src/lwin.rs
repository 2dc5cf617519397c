//! Clear-sky incoming longwave radiation (Campbell-style estimate).

use crate::dataset::{Col, MeteoDataset};
use flux_core::{is_invalid, INVALID_VALUE};

const SIGMA: f64 = 5.6696e-8;
const T0: f64 = 273.15;
const T_STROKE: f64 = 36.0;
const E_STAR: f64 = 611.0;
const A: f64 = 17.27;
const VP_FLOOR: f64 = 3.3546e-4;

/// Derive LW_IN_calc from filled TA, VPD and SW_IN.
///
/// fAPAR (SW_IN / SW_IN_POT, clipped at zero) is averaged per day and
/// propagated to the night rows; rows still missing get the year mean.
/// The cloud-corrected emissivity then yields the longwave flux, accepted
/// in (10, 1000) W m^-2.
pub fn compute_lwin_calc(ds: &mut MeteoDataset) {
    let rows_per_day = ds.rows_per_day();
    let n = ds.rows_count;

    // daytime fAPAR and its daily mean for the night rows
    let mut day_start = 0;
    while day_start < n {
        let mut sum = 0.0;
        let mut valids = 0usize;
        for i in day_start..day_start + rows_per_day {
            let rpot = ds.columns[Col::Rpot as usize][i];
            let swin = ds.columns[Col::SwInFilled as usize][i];
            let fpar = if rpot != 0.0 && !is_invalid(swin) {
                (swin / rpot).max(0.0)
            } else {
                INVALID_VALUE
            };
            ds.columns[Col::Fpar as usize][i] = fpar;
            if !is_invalid(fpar) {
                sum += fpar;
                valids += 1;
            }
        }
        if valids > 0 {
            let mean = sum / valids as f64;
            for i in day_start..day_start + rows_per_day {
                if ds.columns[Col::Rpot as usize][i] == 0.0 {
                    ds.columns[Col::Fpar as usize][i] = mean;
                }
            }
        }
        day_start += rows_per_day;
    }

    // any row still missing inherits its year's mean
    let mut offset = 0usize;
    for record in &ds.years {
        let year_rows = ds.timeres.rows_per_year(record.year);
        let slice = offset..offset + year_rows;
        let mut sum = 0.0;
        let mut valids = 0usize;
        for i in slice.clone() {
            let fpar = ds.columns[Col::Fpar as usize][i];
            if !is_invalid(fpar) {
                sum += fpar;
                valids += 1;
            }
        }
        if valids > 0 && valids != year_rows {
            let mean = sum / valids as f64;
            for i in slice {
                if is_invalid(ds.columns[Col::Fpar as usize][i]) {
                    ds.columns[Col::Fpar as usize][i] = mean;
                }
            }
        }
        offset += year_rows;
    }

    for i in 0..n {
        let fpar = ds.columns[Col::Fpar as usize][i];
        let ta = ds.columns[Col::TaFilled as usize][i];
        let vpd = ds.columns[Col::VpdFilled as usize][i];
        if is_invalid(fpar) || is_invalid(ta) || is_invalid(vpd) {
            ds.columns[Col::LwInCalc as usize][i] = INVALID_VALUE;
            continue;
        }

        let cloud_cover = (1.0 - (fpar - 0.5) / 0.4).clamp(0.0, 1.0);
        let r_cloud = 1.0 + 0.22 * cloud_cover * cloud_cover;

        let esat = E_STAR * (A * (ta / ((ta + T0) - T_STROKE))).exp();
        let mut vp = esat - vpd * 100.0;
        if vp < 0.0 {
            vp = VP_FLOOR;
        }
        let eps_a = 0.64 * (vp / (ta + T0)).powf(1.0 / 7.0);

        ds.columns[Col::CloudCover as usize][i] = cloud_cover;
        ds.columns[Col::RCloud as usize][i] = r_cloud;
        ds.columns[Col::Esat as usize][i] = esat;
        ds.columns[Col::Vp as usize][i] = vp;
        ds.columns[Col::EpsA as usize][i] = eps_a;

        let lw = r_cloud * eps_a * SIGMA * (ta + T0).powi(4);
        ds.columns[Col::LwInCalc as usize][i] = if lw < 10.0 || lw > 1000.0 {
            INVALID_VALUE
        } else {
            lw
        };
    }

    // qc: worst of the three driver codes
    for i in 0..n {
        if is_invalid(ds.columns[Col::LwInCalc as usize][i]) {
            continue;
        }
        let mut qc = ds.columns[Col::SwInQc as usize][i];
        for other in [Col::TaQc, Col::VpdQc] {
            if ds.columns[other as usize][i] > qc {
                qc = ds.columns[other as usize][i];
            }
        }
        ds.columns[Col::LwInCalcQc as usize][i] = qc;
    }
}

/// Compose LW_IN_calc_m: the computed estimate when its code is good,
/// else the ERA series, else the estimate again with qc 3.
pub fn compose_lwin_calc_m(ds: &mut MeteoDataset) {
    for i in 0..ds.rows_count {
        let qc = ds.columns[Col::LwInCalcQc as usize][i];
        let calc = ds.columns[Col::LwInCalc as usize][i];
        let era = ds.columns[Col::LwInCalcEra as usize][i];
        let (m, mqc) = if !is_invalid(qc) && qc < 2.0 {
            (calc, qc)
        } else {
            (era, 2.0)
        };
        let (m, mqc) = if is_invalid(m) { (calc, 3.0) } else { (m, mqc) };
        ds.columns[Col::LwInCalcM as usize][i] = m;
        ds.columns[Col::LwInCalcMQc as usize][i] = mqc;
    }
}
