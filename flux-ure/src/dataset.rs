//! Candidate matrices, Model-Efficiency reference selection and the
//! percentile/standard-error extraction.

use flux_core::error::{PipelineError, Result};
use flux_core::record::DataTable;
use flux_core::stats::{
    mean_allowing_invalid, percentile_allowing_invalid, standard_deviation_allowing_invalid,
};
use flux_core::{is_invalid, INVALID_VALUE, TimeRes};
use log::info;

/// Number of u*-threshold candidates.
pub const CANDIDATES: usize = 40;
/// Candidates plus the trailing 50% ("ust50") column.
pub const MATRIX_COLS: usize = CANDIDATES + 1;

/// u* percentile labels of the matrix columns, ust50 last.
pub const PERCENTILE_LABELS: [f64; MATRIX_COLS] = [
    1.25, 3.75, 6.25, 8.75, 11.25, 13.75, 16.25, 18.75, 21.25, 23.75, 26.25, 28.75, 31.25,
    33.75, 36.25, 38.75, 41.25, 43.75, 46.25, 48.75, 51.25, 53.75, 56.25, 58.75, 61.25, 63.75,
    66.25, 68.75, 71.25, 73.75, 76.25, 78.75, 81.25, 83.75, 86.25, 88.75, 91.25, 93.75, 96.25,
    98.75, 50.0,
];

/// Output envelope percentiles.
pub const ENVELOPE: [f64; 7] = [5.0, 16.0, 25.0, 50.0, 75.0, 84.0, 95.0];

/// One grouping's candidate matrix, row-major.
#[derive(Debug, Clone)]
pub struct Matrix {
    pub rows: Vec<[f64; MATRIX_COLS]>,
}

/// One year's presence in the record.
#[derive(Debug, Clone, Copy)]
pub struct UreYear {
    pub year: i32,
    pub exists: bool,
}

/// The assembled multi-year candidate record for one site/author/type.
pub struct UreDataset {
    pub site: String,
    pub timeres: TimeRes,
    pub years: Vec<UreYear>,
    pub rows_count: usize,
    pub y: Matrix,
    pub c: Matrix,
}

/// Percentile/uncertainty extraction for one row.
#[derive(Debug, Clone, Copy)]
pub struct PRow {
    pub envelope: [f64; 7],
    pub mean: f64,
    pub std_err: f64,
}

impl UreDataset {
    /// Whole-record grouping only makes sense with three or more years.
    pub fn has_c(&self) -> bool {
        self.years.len() >= 3
    }

    /// Assemble from per-year realization tables.
    ///
    /// Each table carries 82 value columns: the whole-record grouping
    /// first (40 percentiles plus ust50), then the per-year grouping.
    /// A missing year keeps its all-missing calendar slot.
    pub fn assemble(
        site: &str,
        timeres: TimeRes,
        inputs: &[(i32, Option<DataTable>)],
    ) -> Result<UreDataset> {
        if inputs.is_empty() {
            return Err(PipelineError::InvariantViolation("no years to process".into()));
        }
        for pair in inputs.windows(2) {
            if pair[1].0 != pair[0].0 + 1 {
                return Err(PipelineError::InvariantViolation(format!(
                    "years are not contiguous: {} then {}",
                    pair[0].0, pair[1].0
                )));
            }
        }
        let rows_count: usize = inputs.iter().map(|(y, _)| timeres.rows_per_year(*y)).sum();
        let mut y_matrix = Matrix {
            rows: vec![[INVALID_VALUE; MATRIX_COLS]; rows_count],
        };
        let mut c_matrix = Matrix {
            rows: vec![[INVALID_VALUE; MATRIX_COLS]; rows_count],
        };

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
                if table.columns.len() < 2 * MATRIX_COLS {
                    return Err(PipelineError::SchemaMismatch(format!(
                        "expected {} candidate columns, found {}",
                        2 * MATRIX_COLS,
                        table.columns.len()
                    )));
                }
                for r in 0..year_rows {
                    for p in 0..MATRIX_COLS {
                        c_matrix.rows[offset + r][p] = table.values[r][p];
                        y_matrix.rows[offset + r][p] = table.values[r][MATRIX_COLS + p];
                    }
                }
            }
            years.push(UreYear {
                year: *year,
                exists: table.is_some(),
            });
            offset += year_rows;
        }

        let mut ds = UreDataset {
            site: site.to_string(),
            timeres,
            years,
            rows_count,
            y: y_matrix,
            c: c_matrix,
        };
        infill_matrix(&mut ds.c, "c");
        infill_matrix(&mut ds.y, "y");
        Ok(ds)
    }
}

/// Bridge short invalid runs inside each candidate column with the
/// midpoint of the surrounding valid values; leading and trailing gaps
/// copy their neighbour.
fn infill_matrix(matrix: &mut Matrix, label: &str) {
    let rows_count = matrix.rows.len();
    if rows_count < 2 {
        return;
    }
    for col in 0..MATRIX_COLS {
        let mut row = 0usize;
        while row < rows_count {
            if !is_invalid(matrix.rows[row][col]) {
                row += 1;
                continue;
            }
            if row == 0 {
                matrix.rows[0][col] = matrix.rows[1][col];
                row += 1;
                continue;
            }
            if row == rows_count - 1 {
                matrix.rows[row][col] = matrix.rows[row - 1][col];
                break;
            }
            let start_value = matrix.rows[row - 1][col];
            if is_invalid(start_value) {
                row += 1;
                continue;
            }
            let end = match (row + 1..rows_count).find(|&z| !is_invalid(matrix.rows[z][col])) {
                Some(z) => z,
                None => {
                    row += 1;
                    continue;
                }
            };
            let value = (start_value + matrix.rows[end][col]) / 2.0;
            if end - row > 1 {
                info!(
                    "- invalid values found from row {} to row {} for percentile {}% {}, replaced with {}",
                    row + 1,
                    end,
                    PERCENTILE_LABELS[col],
                    label,
                    value
                );
            }
            for z in row..end {
                matrix.rows[z][col] = value;
            }
            row = end;
        }
    }
}

/// Select the reference candidate by Model Efficiency.
///
/// Rows with any missing candidate are excluded; candidates still holding
/// missing values are dropped and the winning index mapped back. Ties
/// keep the lowest index. The trailing ust50 column never competes.
pub fn reference_by_model_efficiency(matrix: &Matrix) -> Result<usize> {
    let columns = CANDIDATES;
    // keep only the complete rows
    let rows: Vec<&[f64; MATRIX_COLS]> = matrix
        .rows
        .iter()
        .filter(|r| r[..columns].iter().any(|&v| !is_invalid(v)))
        .collect();

    let mut bad = [false; CANDIDATES];
    for r in &rows {
        for (c, flag) in bad.iter_mut().enumerate() {
            if is_invalid(r[c]) {
                *flag = true;
            }
        }
    }
    let kept: Vec<usize> = (0..columns).filter(|&c| !bad[c]).collect();
    if kept.is_empty() {
        return Err(PipelineError::InsufficientData(
            "each candidate column has an invalid value at least".into(),
        ));
    }
    if kept.len() == 1 {
        return Ok(kept[0]);
    }

    let n = rows.len();
    if n == 0 {
        return Err(PipelineError::InsufficientData(
            "no complete rows across candidates".into(),
        ));
    }

    // pairwise model efficiency, normalised by the row column's variance
    let mut sums = vec![0.0f64; kept.len()];
    for (ci, &col_i) in kept.iter().enumerate() {
        let mean: f64 = rows.iter().map(|r| r[col_i]).sum::<f64>() / n as f64;
        let variance: f64 =
            rows.iter().map(|r| (r[col_i] - mean).powi(2)).sum::<f64>() / n as f64;
        if variance == 0.0 {
            return Err(PipelineError::InsufficientData(format!(
                "unable to compute variance for column {}",
                col_i
            )));
        }
        for (cj, &col_j) in kept.iter().enumerate() {
            let sum: f64 = rows
                .iter()
                .map(|r| (r[col_i] - r[col_j]).powi(2))
                .sum::<f64>();
            let me = 1.0 - sum / n as f64 / variance;
            sums[cj] += me;
        }
    }

    let mut best = 0usize;
    let mut best_sum = sums[0];
    for (c, &s) in sums.iter().enumerate() {
        if s > best_sum {
            best_sum = s;
            best = c;
        }
    }
    Ok(kept[best])
}

/// Envelope percentiles, mean and standard error per row over the forty
/// candidates (the ust50 column is excluded from the statistics).
pub fn process_matrix(matrix: &Matrix) -> Result<Vec<PRow>> {
    let mut out = Vec::with_capacity(matrix.rows.len());
    for row in &matrix.rows {
        let candidates = &row[..CANDIDATES];
        let mut envelope = [INVALID_VALUE; 7];
        for (k, &p) in ENVELOPE.iter().enumerate() {
            envelope[k] = percentile_allowing_invalid(candidates, p).ok_or_else(|| {
                PipelineError::InvariantViolation(format!("unable to compute {}% percentile", p))
            })?;
        }
        let mean = mean_allowing_invalid(candidates);
        let std_err = if is_invalid(mean) {
            INVALID_VALUE
        } else {
            let sd = standard_deviation_allowing_invalid(candidates);
            if is_invalid(sd) {
                INVALID_VALUE
            } else {
                sd / 6.324555320336759
            }
        };
        out.push(PRow {
            envelope,
            mean,
            std_err,
        });
    }
    Ok(out)
}

/// Daily aggregation of a candidate matrix: nominal-divisor mean scaled
/// to gC m^-2 d^-1; a day with no valid sub-rows stays missing.
pub fn matrix_daily(matrix: &Matrix, rows_per_day: usize) -> Matrix {
    let count = matrix.rows.len() / rows_per_day;
    let mut out = Matrix {
        rows: vec![[INVALID_VALUE; MATRIX_COLS]; count],
    };
    for day in 0..count {
        for col in 0..MATRIX_COLS {
            let mut sum = 0.0;
            let mut valids = 0usize;
            for i in 0..rows_per_day {
                let v = matrix.rows[day * rows_per_day + i][col];
                if !is_invalid(v) {
                    sum += v;
                    valids += 1;
                }
            }
            if valids > 0 {
                out.rows[day][col] = sum / rows_per_day as f64 * crate::CO2_TO_C;
            }
        }
    }
    out
}

/// Period fold with a nominal divisor: (daily start, length) per output
/// row; all-invalid periods stay missing.
fn matrix_fold(daily: &Matrix, periods: &[(usize, usize)]) -> Matrix {
    let mut out = Matrix {
        rows: vec![[INVALID_VALUE; MATRIX_COLS]; periods.len()],
    };
    for (row, &(from, len)) in periods.iter().enumerate() {
        for col in 0..MATRIX_COLS {
            let mut sum = 0.0;
            let mut valids = 0usize;
            for d in from..from + len {
                let v = daily.rows[d][col];
                if !is_invalid(v) {
                    sum += v;
                    valids += 1;
                }
            }
            if valids > 0 {
                out.rows[row][col] = sum / len as f64;
            }
        }
    }
    out
}

/// 51 seven-day weeks plus the remainder, per year.
pub fn weekly_periods(years: &[UreYear]) -> Vec<(usize, usize)> {
    let mut periods = Vec::with_capacity(years.len() * 52);
    let mut offset = 0usize;
    for y in years {
        let days = flux_core::calendar::days_per_year(y.year);
        for week in 0..52 {
            let len = if week == 51 { days - 51 * 7 } else { 7 };
            periods.push((offset + week * 7, len));
        }
        offset += days;
    }
    periods
}

/// Calendar months per year.
pub fn monthly_periods(years: &[UreYear]) -> Vec<(usize, usize)> {
    const DAYS_PER_MONTH: [usize; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut periods = Vec::with_capacity(years.len() * 12);
    let mut offset = 0usize;
    for y in years {
        for (month, &days) in DAYS_PER_MONTH.iter().enumerate() {
            let len = if month == 1 && flux_core::calendar::is_leap_year(y.year) {
                days + 1
            } else {
                days
            };
            periods.push((offset, len));
            offset += len;
        }
    }
    periods
}

/// Whole years.
pub fn yearly_periods(years: &[UreYear]) -> Vec<(usize, usize)> {
    let mut periods = Vec::with_capacity(years.len());
    let mut offset = 0usize;
    for y in years {
        let days = flux_core::calendar::days_per_year(y.year);
        periods.push((offset, days));
        offset += days;
    }
    periods
}

/// Weekly matrix from the daily one.
pub fn matrix_weekly(daily: &Matrix, years: &[UreYear]) -> Matrix {
    matrix_fold(daily, &weekly_periods(years))
}

/// Monthly matrix from the daily one.
pub fn matrix_monthly(daily: &Matrix, years: &[UreYear]) -> Matrix {
    matrix_fold(daily, &monthly_periods(years))
}

/// Yearly matrix from the daily one.
pub fn matrix_yearly(daily: &Matrix, years: &[UreYear]) -> Matrix {
    matrix_fold(daily, &yearly_periods(years))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_matrix(rows: usize) -> Matrix {
        Matrix {
            rows: (0..rows)
                .map(|r| [r as f64 / 10000.0; MATRIX_COLS])
                .collect(),
        }
    }

    #[test]
    fn test_identical_candidates_pick_lowest_index() {
        // all candidates equal: every ME sum ties and the deterministic
        // tie-break keeps the lowest index, a series identical to ust50
        let matrix = ramp_matrix(200);
        let reference = reference_by_model_efficiency(&matrix).unwrap();
        assert_eq!(reference, 0);
    }

    /// Ramp plus a fixed per-candidate offset: +0.1 below index 20, zero
    /// at 20, -0.1 above. Candidate 20 sits strictly closest to the
    /// ensemble and must win.
    fn offset_matrix(rows: usize) -> Matrix {
        let mut matrix = Matrix {
            rows: vec![[0.0; MATRIX_COLS]; rows],
        };
        for r in 0..rows {
            for c in 0..MATRIX_COLS {
                let offset = match c.cmp(&20) {
                    std::cmp::Ordering::Less => 0.1,
                    std::cmp::Ordering::Equal => 0.0,
                    std::cmp::Ordering::Greater => -0.1,
                };
                matrix.rows[r][c] = r as f64 / 100.0 + offset;
            }
        }
        matrix
    }

    #[test]
    fn test_reference_prefers_central_candidate() {
        let reference = reference_by_model_efficiency(&offset_matrix(500)).unwrap();
        assert_eq!(reference, 20);
    }

    #[test]
    fn test_bad_columns_are_dropped_and_remapped() {
        let mut matrix = offset_matrix(300);
        // poison the two lowest candidates: the winner's index must still
        // come back in matrix coordinates
        matrix.rows[100][0] = INVALID_VALUE;
        matrix.rows[200][1] = INVALID_VALUE;
        let reference = reference_by_model_efficiency(&matrix).unwrap();
        assert_eq!(reference, 20);
    }

    #[test]
    fn test_all_columns_bad_is_an_error() {
        let mut matrix = ramp_matrix(CANDIDATES);
        for r in 0..CANDIDATES {
            matrix.rows[r][r] = INVALID_VALUE;
        }
        // every candidate column holds an invalid value somewhere
        assert!(reference_by_model_efficiency(&matrix).is_err());
    }

    #[test]
    fn test_process_matrix_on_identical_candidates() {
        let matrix = ramp_matrix(100);
        let p = process_matrix(&matrix).unwrap();
        for (r, row) in p.iter().enumerate() {
            let expected = r as f64 / 10000.0;
            for v in row.envelope {
                assert_eq!(v, expected);
            }
            assert_eq!(row.mean, expected);
            assert_eq!(row.std_err, 0.0);
        }
    }

    #[test]
    fn test_matrix_daily_nominal_divisor() {
        let mut matrix = Matrix {
            rows: vec![[1.0; MATRIX_COLS]; 48],
        };
        matrix.rows[0][0] = INVALID_VALUE;
        let daily = matrix_daily(&matrix, 48);
        assert_eq!(daily.rows.len(), 1);
        // column 0 had 47 valid values but still divides by 48
        let expected = 47.0 / 48.0 * crate::CO2_TO_C;
        assert!((daily.rows[0][0] - expected).abs() < 1e-12);
        let full = 48.0 / 48.0 * crate::CO2_TO_C;
        assert!((daily.rows[0][1] - full).abs() < 1e-12);
    }

    #[test]
    fn test_infill_bridges_small_gaps() {
        let mut matrix = Matrix {
            rows: vec![[1.0; MATRIX_COLS]; 10],
        };
        matrix.rows[4][3] = INVALID_VALUE;
        matrix.rows[5][3] = 3.0;
        infill_matrix(&mut matrix, "y");
        assert_eq!(matrix.rows[4][3], 2.0);

        let mut matrix = Matrix {
            rows: vec![[1.0; MATRIX_COLS]; 10],
        };
        matrix.rows[0][0] = INVALID_VALUE;
        matrix.rows[9][0] = INVALID_VALUE;
        infill_matrix(&mut matrix, "y");
        assert_eq!(matrix.rows[0][0], 1.0);
        assert_eq!(matrix.rows[9][0], 1.0);
    }

    #[test]
    fn test_weekly_periods_leap() {
        let years = [UreYear { year: 2012, exists: true }];
        let periods = weekly_periods(&years);
        assert_eq!(periods.len(), 52);
        assert_eq!(periods[51], (357, 9));
    }
}
