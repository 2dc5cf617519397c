//! Thin CSV record reader: header discovery, typed column identities and
//! per-row tokenisation with missing-value substitution.

use crate::calendar::Timestamp;
use crate::error::{PipelineError, Result};
use crate::{fold_nan, INVALID_VALUE};
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashSet;

/// Qualifier suffix on a variable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// `_SD` — standard deviation companion column.
    StdDev,
    /// `_N` — sample count companion column.
    Count,
}

/// Structured identity of a data column: base name, up to three trailing
/// profile indices, and an optional qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnId {
    pub base: String,
    pub indices: Vec<u32>,
    pub qualifier: Option<Qualifier>,
}

impl ColumnId {
    /// Parse a raw header token like `TS_2`, `SWC_1_SD` or `TA`.
    pub fn parse(token: &str) -> ColumnId {
        let mut parts: Vec<&str> = token.split('_').collect();
        let mut qualifier = None;
        if let Some(last) = parts.last() {
            match *last {
                "SD" => qualifier = Some(Qualifier::StdDev),
                "N" => qualifier = Some(Qualifier::Count),
                _ => {}
            }
        }
        if qualifier.is_some() {
            parts.pop();
        }
        let mut indices = Vec::new();
        while indices.len() < 3 {
            match parts.last().and_then(|p| p.parse::<u32>().ok()) {
                Some(i) if parts.len() > 1 => {
                    indices.push(i);
                    parts.pop();
                }
                _ => break,
            }
        }
        indices.reverse();
        ColumnId {
            base: parts.join("_"),
            indices,
            qualifier,
        }
    }
}

/// A dataset parsed into fixed-length rows of f64 values.
#[derive(Debug, Clone)]
pub struct DataTable {
    /// Identities of the value columns, input order preserved.
    pub columns: Vec<ColumnId>,
    /// Row-major values, one inner vec per row, `columns.len()` wide.
    pub values: Vec<Vec<f64>>,
    /// Interval-end timestamp per row (from `TIMESTAMP_END`, or derived
    /// from `TIMESTAMP_START` when only that column exists).
    pub timestamps: Vec<Timestamp>,
}

impl DataTable {
    /// Parse data lines (header line first). Blank lines are skipped.
    ///
    /// When `expected_rows` is given the parsed row count must match.
    pub fn parse(text: &str, expected_rows: Option<usize>) -> Result<DataTable> {
        // the reader chokes on stray blank lines, drop them up front
        let clean: String = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(clean.as_bytes());

        let header = reader
            .headers()
            .map_err(|e| PipelineError::SchemaMismatch(format!("unable to read header: {}", e)))?
            .clone();

        let mut ts_start = None;
        let mut ts_end = None;
        let mut value_columns: Vec<(usize, ColumnId)> = Vec::new();
        let mut seen: HashSet<ColumnId> = HashSet::new();
        for (i, name) in header.iter().enumerate() {
            if name.eq_ignore_ascii_case("TIMESTAMP_START") {
                ts_start = Some(i);
            } else if name.eq_ignore_ascii_case("TIMESTAMP_END")
                || name.eq_ignore_ascii_case("TIMESTAMP")
            {
                ts_end = Some(i);
            } else {
                let id = ColumnId::parse(name);
                if !seen.insert(id.clone()) {
                    return Err(PipelineError::SchemaMismatch(format!(
                        "var \"{}\" already found at another column",
                        name
                    )));
                }
                value_columns.push((i, id));
            }
        }
        if ts_end.is_none() && ts_start.is_none() {
            return Err(PipelineError::SchemaMismatch(
                "no TIMESTAMP_START or TIMESTAMP_END column found".into(),
            ));
        }

        let mut values = Vec::new();
        let mut timestamps = Vec::new();
        for (row_index, record) in reader.records().enumerate() {
            let record: StringRecord = record.map_err(|e| {
                PipelineError::SchemaMismatch(format!("bad row at {}: {}", row_index + 1, e))
            })?;
            if record.len() != header.len() {
                return Err(PipelineError::SchemaMismatch(format!(
                    "imported columns at row {} should be {}, not {}",
                    row_index + 1,
                    header.len(),
                    record.len()
                )));
            }
            let ts_field = record
                .get(ts_end.or(ts_start).unwrap())
                .unwrap_or_default();
            timestamps.push(Timestamp::parse(ts_field)?);

            let mut row = Vec::with_capacity(value_columns.len());
            for (col, _) in &value_columns {
                let cell = record.get(*col).unwrap_or_default();
                row.push(parse_cell(cell, row_index + 1, *col + 1)?);
            }
            values.push(row);
        }

        if let Some(expected) = expected_rows {
            if values.len() != expected {
                return Err(PipelineError::SchemaMismatch(format!(
                    "imported rows should be {}, not {}",
                    expected,
                    values.len()
                )));
            }
        }

        Ok(DataTable {
            columns: value_columns.into_iter().map(|(_, id)| id).collect(),
            values,
            timestamps,
        })
    }

    /// Index of the plain (unindexed, unqualified) column with this base.
    pub fn column(&self, base: &str) -> Option<usize> {
        self.columns.iter().position(|c| {
            c.base.eq_ignore_ascii_case(base) && c.indices.is_empty() && c.qualifier.is_none()
        })
    }

    /// Index of an exact column identity.
    pub fn column_id(&self, id: &ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c == id)
    }

    /// All profile indices present for a base name (e.g. TS, SWC), sorted.
    pub fn profile_indices(&self, base: &str) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .columns
            .iter()
            .filter(|c| {
                c.base.eq_ignore_ascii_case(base)
                    && c.indices.len() == 1
                    && c.qualifier.is_none()
            })
            .map(|c| c.indices[0])
            .collect();
        out.sort_unstable();
        out
    }

    /// Extract one column as a flat vector.
    pub fn column_values(&self, index: usize) -> Vec<f64> {
        self.values.iter().map(|row| row[index]).collect()
    }
}

/// One data cell: blank, `-9999` and NaN are all the sentinel.
fn parse_cell(cell: &str, row: usize, column: usize) -> Result<f64> {
    if cell.is_empty() {
        return Ok(INVALID_VALUE);
    }
    match cell.parse::<f64>() {
        Ok(v) => Ok(fold_nan(v)),
        Err(_) => Err(PipelineError::NumericParse {
            value: cell.to_string(),
            row,
            column,
        }),
    }
}
