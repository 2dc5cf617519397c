//! Sunset-respiration (SR) aggregation: a per-row {reco, qc, tn} record
//! rolled up by valid-count daily means and nominal-length rescaling at
//! the coarser tiers.

use crate::dataset::{monthly_periods, weekly_periods, yearly_periods, UreYear};
use crate::CO2_TO_C;
use flux_core::error::{PipelineError, Result};
use flux_core::record::DataTable;
use flux_core::{is_invalid, INVALID_VALUE, TimeRes};

/// One half-hourly SR record.
#[derive(Debug, Clone, Copy)]
pub struct SrRow {
    pub reco: f64,
    pub qc: i32,
    pub tn: i32,
    /// Fraction of valid sub-rows contributing to an aggregate.
    pub reco_n: f64,
}

impl Default for SrRow {
    fn default() -> SrRow {
        SrRow {
            reco: INVALID_VALUE,
            qc: -1,
            tn: -1,
            reco_n: 0.0,
        }
    }
}

/// Multi-year SR record for one site.
pub struct SrDataset {
    pub site: String,
    pub timeres: TimeRes,
    pub years: Vec<UreYear>,
    pub rows: Vec<SrRow>,
}

impl SrDataset {
    /// Assemble from per-year tables carrying `RECO` (required) plus the
    /// optional `qc` and `tn` columns.
    pub fn assemble(
        site: &str,
        timeres: TimeRes,
        inputs: &[(i32, Option<DataTable>)],
    ) -> Result<SrDataset> {
        let rows_count: usize = inputs.iter().map(|(y, _)| timeres.rows_per_year(*y)).sum();
        let mut rows = vec![SrRow::default(); rows_count];
        let mut years = Vec::with_capacity(inputs.len());
        let mut offset = 0usize;
        for (year, table) in inputs {
            let year_rows = timeres.rows_per_year(*year);
            if let Some(table) = table {
                if table.values.len() != year_rows {
                    return Err(PipelineError::SchemaMismatch(format!(
                        "rows for {} should be {}, not {}",
                        year,
                        year_rows,
                        table.values.len()
                    )));
                }
                let reco = table.column("RECO").ok_or_else(|| {
                    PipelineError::SchemaMismatch("column RECO not found".into())
                })?;
                let qc = table.column("qc");
                let tn = table.column("tn");
                for r in 0..year_rows {
                    let row = &mut rows[offset + r];
                    row.reco = table.values[r][reco];
                    if let Some(qc) = qc {
                        row.qc = table.values[r][qc] as i32;
                    }
                    if let Some(tn) = tn {
                        row.tn = table.values[r][tn] as i32;
                    }
                }
            }
            years.push(UreYear {
                year: *year,
                exists: table.is_some(),
            });
            offset += year_rows;
        }
        Ok(SrDataset {
            site: site.to_string(),
            timeres,
            years,
            rows,
        })
    }

    /// Daily tier: mean over the valid sub-rows (not the nominal count),
    /// scaled to gC m^-2 d^-1, with `reco_n` the valid fraction.
    pub fn daily(&self) -> Vec<SrRow> {
        let rows_per_day = self.timeres.rows_per_day();
        let count = self.rows.len() / rows_per_day;
        let mut out = vec![SrRow::default(); count];
        for day in 0..count {
            let mut sum = 0.0;
            let mut valids = 0usize;
            for i in 0..rows_per_day {
                let v = self.rows[day * rows_per_day + i].reco;
                if !is_invalid(v) {
                    sum += v;
                    valids += 1;
                }
            }
            if valids > 0 {
                out[day].reco = sum / valids as f64 * CO2_TO_C;
                out[day].reco_n = valids as f64 / rows_per_day as f64;
            }
        }
        out
    }

    /// Coarser tiers share one shape: reco averages over the valid days,
    /// reco_n rescales by the nominal period length.
    fn fold(daily: &[SrRow], periods: &[(usize, usize)]) -> Vec<SrRow> {
        let mut out = vec![SrRow::default(); periods.len()];
        for (row, &(from, len)) in periods.iter().enumerate() {
            let mut sum = 0.0;
            let mut n_sum = 0.0;
            let mut valids = 0usize;
            for d in from..from + len {
                if !is_invalid(daily[d].reco) {
                    sum += daily[d].reco;
                    n_sum += daily[d].reco_n;
                    valids += 1;
                }
            }
            if valids > 0 {
                out[row].reco = sum / valids as f64;
                out[row].reco_n = n_sum / len as f64;
            }
        }
        out
    }

    pub fn weekly(&self, daily: &[SrRow]) -> Vec<SrRow> {
        Self::fold(daily, &weekly_periods(&self.years))
    }

    pub fn monthly(&self, daily: &[SrRow]) -> Vec<SrRow> {
        Self::fold(daily, &monthly_periods(&self.years))
    }

    pub fn yearly(&self, daily: &[SrRow]) -> Vec<SrRow> {
        Self::fold(daily, &yearly_periods(&self.years))
    }
}
