//! Column model and assembly of a multi-year meteo dataset.

use flux_core::error::{PipelineError, Result};
use flux_core::record::{ColumnId, DataTable};
use flux_core::{is_invalid, INVALID_VALUE, TimeRes};
use flux_mds::{fill, observed_bounds, MdsDrivers, MdsOptions, MdsOutcome};
use log::{info, warn};

/// Column index into a [`MeteoDataset`]. The declaration order fixes the
/// aggregation ranges, so new columns go at the end of their group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Col {
    // ERA fallback series
    TaEra = 0,
    PaEra,
    VpdEra,
    WsEra,
    PrecipEra,
    SwInEra,
    LwInEra,
    LwInCalcEra,
    // measured series
    Co2Met,
    TaMet,
    VpdMet,
    PrecipMet,
    WsMet,
    SwInMet,
    LwInMet,
    PaMet,
    Rpot,
    // gap-filled series and their quality codes
    TaFilled,
    VpdFilled,
    SwInFilled,
    LwInFilled,
    Co2Filled,
    TaQc,
    VpdQc,
    SwInQc,
    LwInQc,
    Co2Qc,
    // measured-filled-ERA composition
    TaM,
    TaMQc,
    VpdM,
    VpdMQc,
    SwInM,
    SwInMQc,
    LwInM,
    LwInMQc,
    LwInCalcM,
    LwInCalcMQc,
    PaM,
    PaMQc,
    PrecipM,
    PrecipMQc,
    WsM,
    WsMQc,
    // daily night/day partitions (populated on aggregated rows only)
    TaFNight,
    TaFNightStd,
    TaFNightQc,
    TaFDay,
    TaFDayStd,
    TaFDayQc,
    TaMNight,
    TaMNightStd,
    TaMNightQc,
    TaMDay,
    TaMDayStd,
    TaMDayQc,
    TaEraNight,
    TaEraNightStd,
    TaEraDay,
    TaEraDayStd,
    // clear-sky longwave scratch chain and result
    Fpar,
    CloudCover,
    RCloud,
    Esat,
    Vp,
    EpsA,
    LwInCalc,
    LwInCalcQc,
}

/// Total number of columns.
pub const COLS: usize = Col::LwInCalcQc as usize + 1;

/// Range of the ERA block (PRECIP_ERA sums, the rest average).
pub const ERA_RANGE: std::ops::Range<usize> = 0..8;
/// Range of filled/qc/_m columns aggregated daily.
pub const FILLED_RANGE: std::ops::Range<usize> = Col::TaFilled as usize..Col::TaFNight as usize;
/// Everything from the filled block to the end (weekly and up).
pub const FILLED_TO_END: std::ops::Range<usize> = Col::TaFilled as usize..COLS;
/// Scratch columns never aggregated.
pub const SCRATCH_RANGE: std::ops::RangeInclusive<usize> =
    Col::Fpar as usize..=Col::EpsA as usize;

/// One year's presence in the assembled record.
#[derive(Debug, Clone)]
pub struct YearRecord {
    pub year: i32,
    pub met_exists: bool,
    pub era_exists: bool,
}

/// Parsed inputs for one year; a `None` table materialises an all-missing
/// slot so the calendar stays contiguous.
pub struct YearInput {
    pub year: i32,
    pub met: Option<DataTable>,
    pub era: Option<DataTable>,
}

/// One soil profile (TS or SWC at one depth index).
#[derive(Debug, Clone)]
pub struct ProfileSeries {
    pub index: u32,
    pub value: Vec<f64>,
    pub filled: Vec<f64>,
    pub qc: Vec<f64>,
}

/// A site's multi-year dataset in struct-of-arrays layout.
pub struct MeteoDataset {
    pub site: String,
    pub timeres: TimeRes,
    pub years: Vec<YearRecord>,
    pub rows_count: usize,
    /// Column-major values, `COLS` columns by `rows_count` rows.
    pub columns: Vec<Vec<f64>>,
    pub tss: Vec<ProfileSeries>,
    pub swcs: Vec<ProfileSeries>,
}

/// Accepted header spellings for the ERA columns, legacy first.
const ERA_TOKENS: [(&str, &str, Col); 8] = [
    ("Ta_era", "Ta_era", Col::TaEra),
    ("Pa_era", "Pa_era", Col::PaEra),
    ("VPD_era", "VPD_era", Col::VpdEra),
    ("WS_era", "WS_era", Col::WsEra),
    ("Precip_era", "P_era", Col::PrecipEra),
    ("Rg_era", "SW_IN_era", Col::SwInEra),
    ("LWin_era", "LW_in_era", Col::LwInEra),
    ("LWincalc_era", "LW_in_calc_era", Col::LwInCalcEra),
];

/// Measured-column header names.
const MET_TOKENS: [(&str, Col); 9] = [
    ("CO2", Col::Co2Met),
    ("TA", Col::TaMet),
    ("VPD", Col::VpdMet),
    ("P", Col::PrecipMet),
    ("WS", Col::WsMet),
    ("SW_IN", Col::SwInMet),
    ("LW_IN", Col::LwInMet),
    ("PA", Col::PaMet),
    ("SW_IN_POT", Col::Rpot),
];

impl MeteoDataset {
    /// Column accessor.
    #[inline]
    pub fn col(&self, c: Col) -> &[f64] {
        &self.columns[c as usize]
    }

    /// Mutable column accessor.
    #[inline]
    pub fn col_mut(&mut self, c: Col) -> &mut Vec<f64> {
        &mut self.columns[c as usize]
    }

    pub fn rows_per_day(&self) -> usize {
        self.timeres.rows_per_day()
    }

    /// Assemble a contiguous multi-year dataset from per-year inputs.
    ///
    /// Years must arrive in ascending order with no gaps; a missing file
    /// keeps its calendar slot with all-missing values.
    pub fn assemble(site: &str, timeres: TimeRes, inputs: &[YearInput]) -> Result<MeteoDataset> {
        if inputs.is_empty() {
            return Err(PipelineError::InvariantViolation("no years to process".into()));
        }
        for pair in inputs.windows(2) {
            if pair[1].year != pair[0].year + 1 {
                return Err(PipelineError::InvariantViolation(format!(
                    "years are not contiguous: {} then {}",
                    pair[0].year, pair[1].year
                )));
            }
        }

        let rows_count: usize = inputs.iter().map(|y| timeres.rows_per_year(y.year)).sum();
        let mut columns = vec![vec![INVALID_VALUE; rows_count]; COLS];

        // discover the soil profiles present anywhere in the record
        let mut ts_indices: Vec<u32> = Vec::new();
        let mut swc_indices: Vec<u32> = Vec::new();
        for input in inputs {
            if let Some(met) = &input.met {
                for i in met.profile_indices("TS") {
                    if !ts_indices.contains(&i) {
                        ts_indices.push(i);
                    }
                }
                for i in met.profile_indices("SWC") {
                    if !swc_indices.contains(&i) {
                        swc_indices.push(i);
                    }
                }
            }
        }
        ts_indices.sort_unstable();
        swc_indices.sort_unstable();
        let mut tss: Vec<ProfileSeries> = ts_indices
            .iter()
            .map(|&index| ProfileSeries {
                index,
                value: vec![INVALID_VALUE; rows_count],
                filled: vec![INVALID_VALUE; rows_count],
                qc: vec![INVALID_VALUE; rows_count],
            })
            .collect();
        let mut swcs: Vec<ProfileSeries> = swc_indices
            .iter()
            .map(|&index| ProfileSeries {
                index,
                value: vec![INVALID_VALUE; rows_count],
                filled: vec![INVALID_VALUE; rows_count],
                qc: vec![INVALID_VALUE; rows_count],
            })
            .collect();

        let mut years = Vec::with_capacity(inputs.len());
        let mut offset = 0usize;
        for input in inputs {
            let year_rows = timeres.rows_per_year(input.year);

            if let Some(era) = &input.era {
                if era.values.len() != year_rows {
                    return Err(PipelineError::SchemaMismatch(format!(
                        "era rows for {} should be {}, not {}",
                        input.year,
                        year_rows,
                        era.values.len()
                    )));
                }
                for &(legacy, current, col) in &ERA_TOKENS {
                    let idx = era.column(legacy).or_else(|| era.column(current));
                    if let Some(idx) = idx {
                        for r in 0..year_rows {
                            columns[col as usize][offset + r] = era.values[r][idx];
                        }
                    }
                }
            }

            if let Some(met) = &input.met {
                if met.values.len() != year_rows {
                    return Err(PipelineError::SchemaMismatch(format!(
                        "meteo rows for {} should be {}, not {}",
                        input.year,
                        year_rows,
                        met.values.len()
                    )));
                }
                for &(token, col) in &MET_TOKENS {
                    if let Some(idx) = met.column(token) {
                        for r in 0..year_rows {
                            columns[col as usize][offset + r] = met.values[r][idx];
                        }
                    }
                }
                for profile in tss.iter_mut() {
                    let id = ColumnId {
                        base: "TS".into(),
                        indices: vec![profile.index],
                        qualifier: None,
                    };
                    if let Some(idx) = met.column_id(&id) {
                        for r in 0..year_rows {
                            profile.value[offset + r] = met.values[r][idx];
                        }
                    }
                }
                for profile in swcs.iter_mut() {
                    let id = ColumnId {
                        base: "SWC".into(),
                        indices: vec![profile.index],
                        qualifier: None,
                    };
                    if let Some(idx) = met.column_id(&id) {
                        for r in 0..year_rows {
                            profile.value[offset + r] = met.values[r][idx];
                        }
                    }
                }
            }

            years.push(YearRecord {
                year: input.year,
                met_exists: input.met.is_some(),
                era_exists: input.era.is_some(),
            });
            offset += year_rows;
        }

        Ok(MeteoDataset {
            site: site.to_string(),
            timeres,
            years,
            rows_count,
            columns,
            tss,
            swcs,
        })
    }

    /// Gap-fill every fillable series with MDS (drivers: SW_IN, TA, VPD).
    pub fn gapfill(&mut self) -> Result<()> {
        let fills = [
            ("TA", Col::TaMet, Col::TaFilled, Col::TaQc),
            ("SW_IN", Col::SwInMet, Col::SwInFilled, Col::SwInQc),
            ("LW_IN", Col::LwInMet, Col::LwInFilled, Col::LwInQc),
            ("VPD", Col::VpdMet, Col::VpdFilled, Col::VpdQc),
            ("CO2", Col::Co2Met, Col::Co2Filled, Col::Co2Qc),
        ];
        for (name, source, filled, qc) in fills {
            let outcome = self.fill_series(name, source as usize, None)?;
            if let Some(outcome) = outcome {
                self.store_fill(&outcome, source as usize, filled as usize, qc as usize);
            }
        }

        for p in 0..self.tss.len() {
            let name = format!("TS_{}", self.tss[p].index);
            let outcome = self.fill_profile(&name, true, p)?;
            if let Some(outcome) = outcome {
                store_profile_fill(&outcome, &mut self.tss[p]);
            }
        }
        for p in 0..self.swcs.len() {
            let name = format!("SWC_{}", self.swcs[p].index);
            let outcome = self.fill_profile(&name, false, p)?;
            if let Some(outcome) = outcome {
                store_profile_fill(&outcome, &mut self.swcs[p]);
            }
        }
        Ok(())
    }

    fn fill_series(
        &self,
        name: &str,
        target: usize,
        override_target: Option<&[f64]>,
    ) -> Result<Option<(MdsOutcome, (usize, usize))>> {
        let tofill = override_target.unwrap_or(&self.columns[target]);
        let bounds = match observed_bounds(tofill, self.timeres)? {
            Some(b) => b,
            None => {
                warn!("- gapfilling {}...ok but is missing!", name);
                return Ok(None);
            }
        };
        let drivers = MdsDrivers::new(
            tofill,
            &self.columns[Col::SwInMet as usize],
            &self.columns[Col::TaMet as usize],
            &self.columns[Col::VpdMet as usize],
        );
        let opts = MdsOptions {
            bounds: Some(bounds),
            ..MdsOptions::default()
        };
        let outcome = fill(&drivers, self.timeres, &opts)?;
        if outcome.unfilled == 0 {
            info!("- gapfilling {}...ok", name);
        } else {
            info!("- gapfilling {}...ok ({} values unfilled)", name, outcome.unfilled);
        }
        Ok(Some((outcome, bounds)))
    }

    fn fill_profile(
        &self,
        name: &str,
        is_ts: bool,
        p: usize,
    ) -> Result<Option<(MdsOutcome, (usize, usize))>> {
        let series = if is_ts { &self.tss[p] } else { &self.swcs[p] };
        let values = series.value.clone();
        self.fill_series(name, 0, Some(&values))
    }

    fn store_fill(
        &mut self,
        (outcome, bounds): &(MdsOutcome, (usize, usize)),
        source: usize,
        filled: usize,
        qc: usize,
    ) {
        for i in 0..self.rows_count {
            self.columns[filled][i] = self.columns[source][i];
            self.columns[qc][i] = INVALID_VALUE;
            if i >= bounds.0 && i < bounds.1 {
                let row = &outcome.rows[i];
                if row.observed() {
                    self.columns[qc][i] = 0.0;
                } else {
                    self.columns[filled][i] = row.filled;
                    self.columns[qc][i] = row
                        .quality
                        .map(|q| q as f64)
                        .unwrap_or(INVALID_VALUE);
                }
            }
        }
    }

    /// Compose the `_m` series: measured first, then a good fill, then
    /// ERA, finally the fill again (qc 3) when ERA is absent.
    pub fn compose_m(&mut self) {
        let filled_vars = [
            (Col::TaMet, Col::TaFilled, Col::TaQc, Col::TaEra, Col::TaM, Col::TaMQc),
            (Col::SwInMet, Col::SwInFilled, Col::SwInQc, Col::SwInEra, Col::SwInM, Col::SwInMQc),
            (Col::LwInMet, Col::LwInFilled, Col::LwInQc, Col::LwInEra, Col::LwInM, Col::LwInMQc),
            (Col::VpdMet, Col::VpdFilled, Col::VpdQc, Col::VpdEra, Col::VpdM, Col::VpdMQc),
        ];
        for (met, filled, qc, era, m, mqc) in filled_vars {
            for i in 0..self.rows_count {
                let (met, filled, qc, era) = (
                    self.columns[met as usize][i],
                    self.columns[filled as usize][i],
                    self.columns[qc as usize][i],
                    self.columns[era as usize][i],
                );
                let (value, code) = if !is_invalid(met) {
                    (met, 0.0)
                } else if !is_invalid(qc) {
                    if qc < 2.0 {
                        (filled, qc)
                    } else {
                        (era, 2.0)
                    }
                } else {
                    (era, 2.0)
                };
                // no ERA for this year: fall back to the fill with qc 3
                let (value, code) = if is_invalid(value) {
                    (filled, 3.0)
                } else {
                    (value, code)
                };
                self.columns[m as usize][i] = value;
                self.columns[mqc as usize][i] = if is_invalid(value) {
                    INVALID_VALUE
                } else {
                    code
                };
            }
        }

        // PA/P/WS are not gap-filled; without ERA the _m series is absent
        let plain_vars = [
            (Col::PaMet, Col::PaEra, Col::PaM, Col::PaMQc),
            (Col::PrecipMet, Col::PrecipEra, Col::PrecipM, Col::PrecipMQc),
            (Col::WsMet, Col::WsEra, Col::WsM, Col::WsMQc),
        ];
        for (met, era, m, mqc) in plain_vars {
            for i in 0..self.rows_count {
                let (met, era) = (
                    self.columns[met as usize][i],
                    self.columns[era as usize][i],
                );
                let (value, code) = if is_invalid(era) {
                    (INVALID_VALUE, INVALID_VALUE)
                } else if !is_invalid(met) {
                    (met, 0.0)
                } else {
                    (era, 2.0)
                };
                self.columns[m as usize][i] = value;
                self.columns[mqc as usize][i] = code;
            }
        }
    }
}

fn store_profile_fill(
    (outcome, bounds): &(MdsOutcome, (usize, usize)),
    profile: &mut ProfileSeries,
) {
    for i in 0..profile.value.len() {
        profile.filled[i] = profile.value[i];
        profile.qc[i] = INVALID_VALUE;
        if i >= bounds.0 && i < bounds.1 {
            let row = &outcome.rows[i];
            if row.observed() {
                profile.qc[i] = 0.0;
            } else {
                profile.filled[i] = row.filled;
                profile.qc[i] = row.quality.map(|q| q as f64).unwrap_or(INVALID_VALUE);
            }
        }
    }
}

/// Collapse a 0..3 quality code to the good/other 1/0 scale used by the
/// aggregation tiers. Missing codes stay missing only where the caller
/// wants them to (ERA-absent `_m` codes).
pub fn collapse_qc(code: f64, keep_missing: bool) -> f64 {
    if is_invalid(code) {
        if keep_missing {
            return INVALID_VALUE;
        }
        return 0.0;
    }
    if (0.0..2.0).contains(&code) {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::record::DataTable;

    fn met_table(year_rows: usize, ta: f64) -> DataTable {
        let mut text = String::from("TIMESTAMP_START,TIMESTAMP_END,TA,SW_IN,VPD,P,SW_IN_POT,TS_1\n");
        for i in 0..year_rows {
            text.push_str(&format!(
                "20100101{:04},20100101{:04},{},100.0,5.0,0.1,200.0,7.5\n",
                i % 10000,
                (i + 1) % 10000,
                ta
            ));
        }
        DataTable::parse(&text, Some(year_rows)).unwrap()
    }

    #[test]
    fn test_assemble_requires_contiguous_years() {
        let inputs = vec![
            YearInput { year: 2010, met: None, era: None },
            YearInput { year: 2012, met: None, era: None },
        ];
        assert!(MeteoDataset::assemble("US-TST", TimeRes::HalfHourly, &inputs).is_err());
    }

    #[test]
    fn test_assemble_materialises_missing_years() {
        let inputs = vec![
            YearInput { year: 2010, met: Some(met_table(17520, 10.0)), era: None },
            YearInput { year: 2011, met: None, era: None },
        ];
        let ds = MeteoDataset::assemble("US-TST", TimeRes::HalfHourly, &inputs).unwrap();
        assert_eq!(ds.rows_count, 17520 * 2);
        assert_eq!(ds.years.len(), 2);
        assert!(!ds.years[1].met_exists);
        assert_eq!(ds.col(Col::TaMet)[0], 10.0);
        assert!(is_invalid(ds.col(Col::TaMet)[17520]));
        // the TS_1 profile is discovered and loaded
        assert_eq!(ds.tss.len(), 1);
        assert_eq!(ds.tss[0].value[0], 7.5);
    }

    #[test]
    fn test_compose_m_prefers_measured() {
        let mut ds =
            MeteoDataset::assemble("US-TST", TimeRes::HalfHourly, &[YearInput {
                year: 2010,
                met: Some(met_table(17520, 10.0)),
                era: None,
            }])
            .unwrap();
        // fabricate fill and era data for the first rows
        ds.col_mut(Col::TaMet)[1] = INVALID_VALUE;
        ds.col_mut(Col::TaFilled)[1] = 11.0;
        ds.col_mut(Col::TaQc)[1] = 1.0;
        ds.col_mut(Col::TaMet)[2] = INVALID_VALUE;
        ds.col_mut(Col::TaFilled)[2] = 12.0;
        ds.col_mut(Col::TaQc)[2] = 3.0;
        ds.col_mut(Col::TaEra)[2] = 9.0;
        ds.col_mut(Col::TaMet)[3] = INVALID_VALUE;
        ds.col_mut(Col::TaFilled)[3] = 13.0;
        ds.col_mut(Col::TaQc)[3] = 3.0;
        ds.compose_m();
        // measured wins
        assert_eq!(ds.col(Col::TaM)[0], 10.0);
        assert_eq!(ds.col(Col::TaMQc)[0], 0.0);
        // good fill wins over era
        assert_eq!(ds.col(Col::TaM)[1], 11.0);
        assert_eq!(ds.col(Col::TaMQc)[1], 1.0);
        // poor fill falls back to era
        assert_eq!(ds.col(Col::TaM)[2], 9.0);
        assert_eq!(ds.col(Col::TaMQc)[2], 2.0);
        // no era at all: the fill comes back with qc 3
        assert_eq!(ds.col(Col::TaM)[3], 13.0);
        assert_eq!(ds.col(Col::TaMQc)[3], 3.0);
    }

    #[test]
    fn test_compose_m_plain_vars_need_era() {
        let mut ds =
            MeteoDataset::assemble("US-TST", TimeRes::HalfHourly, &[YearInput {
                year: 2010,
                met: Some(met_table(17520, 10.0)),
                era: None,
            }])
            .unwrap();
        ds.col_mut(Col::PaEra)[0] = 95.0;
        ds.col_mut(Col::PaMet)[0] = 96.0;
        ds.compose_m();
        assert_eq!(ds.col(Col::PaM)[0], 96.0);
        assert_eq!(ds.col(Col::PaMQc)[0], 0.0);
        // no ERA anywhere else: _m missing even though P was measured
        assert!(is_invalid(ds.col(Col::PrecipM)[0]));
        assert!(is_invalid(ds.col(Col::PrecipMQc)[0]));
    }

    #[test]
    fn test_collapse_qc() {
        assert_eq!(collapse_qc(0.0, false), 1.0);
        assert_eq!(collapse_qc(1.0, false), 1.0);
        assert_eq!(collapse_qc(2.0, false), 0.0);
        assert_eq!(collapse_qc(3.0, false), 0.0);
        assert_eq!(collapse_qc(INVALID_VALUE, false), 0.0);
        assert!(is_invalid(collapse_qc(INVALID_VALUE, true)));
    }
}
