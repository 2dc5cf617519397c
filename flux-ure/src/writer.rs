//! Per-tier writers for the reference/uncertainty products and the SR
//! variant, plus the model-efficiency info sidecar.

use crate::dataset::{Matrix, PRow, UreDataset, CANDIDATES, ENVELOPE, PERCENTILE_LABELS};
use crate::sr::{SrDataset, SrRow};
use flux_core::calendar::{
    days_per_year, dtime_for_row, month_and_day, timestamp_for_row, week_timestamps, Side,
};
use flux_core::error::Result;
use flux_core::INVALID_VALUE;
use std::io::Write;

/// One grouping's series for a tier: the matrix, its percentile rows and
/// the selected reference column.
pub struct TierGroup<'a> {
    pub matrix: &'a Matrix,
    pub p_rows: &'a [PRow],
    pub reference: usize,
}

/// Everything a tier writer needs; the whole-record grouping is present
/// only for sites with three or more years.
pub struct TierData<'a> {
    pub y: TierGroup<'a>,
    pub c: Option<TierGroup<'a>>,
}

#[inline]
fn g(v: f64) -> String {
    format!("{}", v)
}

fn group_header(w: &mut impl Write, label: &str, suffix: &str) -> Result<()> {
    write!(
        w,
        "{l}_ref_{s},{l}_ust50_{s},{l}_mean_{s},{l}_SE_{s}",
        l = label,
        s = suffix
    )?;
    for p in ENVELOPE {
        write!(w, ",{}_{:02}_{}", label, p as u32, suffix)?;
    }
    Ok(())
}

fn group_values(
    w: &mut impl Write,
    group: &TierGroup,
    row: usize,
    exists: bool,
) -> Result<()> {
    if exists {
        write!(
            w,
            "{},{},{},{}",
            g(group.matrix.rows[row][group.reference]),
            g(group.matrix.rows[row][CANDIDATES]),
            g(group.p_rows[row].mean),
            g(group.p_rows[row].std_err)
        )?;
        for v in group.p_rows[row].envelope {
            write!(w, ",{}", g(v))?;
        }
    } else {
        write!(w, "{0},{0},{0},{0}", g(INVALID_VALUE))?;
        for _ in 0..ENVELOPE.len() {
            write!(w, ",{}", g(INVALID_VALUE))?;
        }
    }
    Ok(())
}

fn header_line(w: &mut impl Write, prefix: &str, label: &str, has_c: bool) -> Result<()> {
    write!(w, "{}", prefix)?;
    group_header(w, label, "y")?;
    if has_c {
        write!(w, ",")?;
        group_header(w, label, "c")?;
    }
    writeln!(w)?;
    Ok(())
}

fn value_tail(w: &mut impl Write, tier: &TierData, row: usize, exists: bool) -> Result<()> {
    group_values(w, &tier.y, row, exists)?;
    if let Some(c) = &tier.c {
        write!(w, ",")?;
        group_values(w, c, row, exists)?;
    }
    writeln!(w)?;
    Ok(())
}

/// Half-hourly (or hourly) tier.
pub fn write_hh<W: Write>(
    w: &mut W,
    ds: &UreDataset,
    label: &str,
    tier: &TierData,
) -> Result<()> {
    header_line(w, "TIMESTAMP_START,TIMESTAMP_END,DTIME,", label, tier.c.is_some())?;
    let mut row = 0usize;
    for record in &ds.years {
        let year_rows = ds.timeres.rows_per_year(record.year);
        for r in 0..year_rows {
            let start = timestamp_for_row(r, record.year, ds.timeres, Side::Start);
            let end = timestamp_for_row(r, record.year, ds.timeres, Side::End);
            write!(
                w,
                "{},{},{},",
                start.to_compact(),
                end.to_compact(),
                g(dtime_for_row(r, ds.timeres))
            )?;
            value_tail(w, tier, row, record.exists)?;
            row += 1;
        }
    }
    Ok(())
}

/// Daily tier: date stamp plus day-of-year ordinal.
pub fn write_dd<W: Write>(
    w: &mut W,
    ds: &UreDataset,
    label: &str,
    tier: &TierData,
) -> Result<()> {
    header_line(w, "TIMESTAMP,DOY,", label, tier.c.is_some())?;
    let mut row = 0usize;
    for record in &ds.years {
        for day in 0..days_per_year(record.year) {
            let (month, dom) = month_and_day(day + 1, record.year);
            write!(w, "{:04}{:02}{:02},{},", record.year, month, dom, day + 1)?;
            value_tail(w, tier, row, record.exists)?;
            row += 1;
        }
    }
    Ok(())
}

/// Weekly tier.
pub fn write_ww<W: Write>(
    w: &mut W,
    ds: &UreDataset,
    label: &str,
    tier: &TierData,
) -> Result<()> {
    header_line(w, "TIMESTAMP_START,TIMESTAMP_END,WEEK,", label, tier.c.is_some())?;
    let mut row = 0usize;
    for record in &ds.years {
        for week in 0..52 {
            let (start, end) = week_timestamps(week, record.year, ds.timeres);
            write!(
                w,
                "{},{},{},",
                start.to_compact_date(),
                end.to_compact_date(),
                week + 1
            )?;
            value_tail(w, tier, row, record.exists)?;
            row += 1;
        }
    }
    Ok(())
}

/// Monthly tier.
pub fn write_mm<W: Write>(
    w: &mut W,
    ds: &UreDataset,
    label: &str,
    tier: &TierData,
) -> Result<()> {
    header_line(w, "TIMESTAMP,", label, tier.c.is_some())?;
    let mut row = 0usize;
    for record in &ds.years {
        for month in 1..=12 {
            write!(w, "{:04}{:02},", record.year, month)?;
            value_tail(w, tier, row, record.exists)?;
            row += 1;
        }
    }
    Ok(())
}

/// Yearly tier.
pub fn write_yy<W: Write>(
    w: &mut W,
    ds: &UreDataset,
    label: &str,
    tier: &TierData,
) -> Result<()> {
    header_line(w, "TIMESTAMP,", label, tier.c.is_some())?;
    for (row, record) in ds.years.iter().enumerate() {
        write!(w, "{:04},", record.year)?;
        value_tail(w, tier, row, record.exists)?;
    }
    Ok(())
}

/// Model-efficiency info sidecar for one tier.
pub fn write_info<W: Write>(
    w: &mut W,
    ds: &UreDataset,
    label: &str,
    ref_y: usize,
    ref_c: Option<usize>,
) -> Result<()> {
    writeln!(w, "Model Efficiency selection:")?;
    writeln!(
        w,
        "The reference {} has been selected on the basis of the Model Efficiency.",
        label
    )?;
    writeln!(
        w,
        "Starting from the {} different {} estimations it has been calculated the Model Efficiency between each version and the others.",
        CANDIDATES, label
    )?;
    writeln!(
        w,
        "The reference {} has been selected as the one with higher Model Efficiency sum (so the most similar to the others).",
        label
    )?;
    writeln!(w, "In this dataset have been selected as reference:")?;
    writeln!(w)?;
    if let Some(ref_c) = ref_c {
        writeln!(
            w,
            "{}_ref_c = filtered using the ustar percentile {}",
            label, PERCENTILE_LABELS[ref_c]
        )?;
        for record in &ds.years {
            writeln!(
                w,
                "{}_ref_y filtered on year {} using the ustar percentile {}",
                label, record.year, PERCENTILE_LABELS[ref_y]
            )?;
        }
    } else {
        writeln!(
            w,
            "{}_ref_y filtered using the ustar percentile {}",
            label, PERCENTILE_LABELS[ref_y]
        )?;
    }
    Ok(())
}

/// SR half-hourly product.
pub fn write_sr_hh<W: Write>(w: &mut W, ds: &SrDataset) -> Result<()> {
    writeln!(w, "TIMESTAMP_START,TIMESTAMP_END,DTIME,RECO")?;
    let mut row = 0usize;
    for record in &ds.years {
        let year_rows = ds.timeres.rows_per_year(record.year);
        for r in 0..year_rows {
            let start = timestamp_for_row(r, record.year, ds.timeres, Side::Start);
            let end = timestamp_for_row(r, record.year, ds.timeres, Side::End);
            writeln!(
                w,
                "{},{},{},{}",
                start.to_compact(),
                end.to_compact(),
                g(dtime_for_row(r, ds.timeres)),
                g(ds.rows[row].reco)
            )?;
            row += 1;
        }
    }
    Ok(())
}

/// SR daily product.
pub fn write_sr_dd<W: Write>(w: &mut W, ds: &SrDataset, daily: &[SrRow]) -> Result<()> {
    writeln!(w, "TIMESTAMP,DOY,RECO,RECO_n")?;
    let mut row = 0usize;
    for record in &ds.years {
        for day in 0..days_per_year(record.year) {
            let (month, dom) = month_and_day(day + 1, record.year);
            writeln!(
                w,
                "{:04}{:02}{:02},{},{},{}",
                record.year,
                month,
                dom,
                day + 1,
                g(daily[row].reco),
                g(daily[row].reco_n)
            )?;
            row += 1;
        }
    }
    Ok(())
}

/// SR weekly product.
pub fn write_sr_ww<W: Write>(w: &mut W, ds: &SrDataset, weekly: &[SrRow]) -> Result<()> {
    writeln!(w, "TIMESTAMP_START,TIMESTAMP_END,WEEK,RECO,RECO_n")?;
    let mut row = 0usize;
    for record in &ds.years {
        for week in 0..52 {
            let (start, end) = week_timestamps(week, record.year, ds.timeres);
            writeln!(
                w,
                "{},{},{},{},{}",
                start.to_compact_date(),
                end.to_compact_date(),
                week + 1,
                g(weekly[row].reco),
                g(weekly[row].reco_n)
            )?;
            row += 1;
        }
    }
    Ok(())
}

/// SR monthly product.
pub fn write_sr_mm<W: Write>(w: &mut W, ds: &SrDataset, monthly: &[SrRow]) -> Result<()> {
    writeln!(w, "TIMESTAMP,RECO,RECO_n")?;
    let mut row = 0usize;
    for record in &ds.years {
        for month in 1..=12 {
            writeln!(
                w,
                "{:04}{:02},{},{}",
                record.year,
                month,
                g(monthly[row].reco),
                g(monthly[row].reco_n)
            )?;
            row += 1;
        }
    }
    Ok(())
}

/// SR yearly product.
pub fn write_sr_yy<W: Write>(w: &mut W, ds: &SrDataset, yearly: &[SrRow]) -> Result<()> {
    writeln!(w, "TIMESTAMP,RECO,RECO_n")?;
    for (row, record) in ds.years.iter().enumerate() {
        writeln!(
            w,
            "{:04},{},{}",
            record.year,
            g(yearly[row].reco),
            g(yearly[row].reco_n)
        )?;
    }
    Ok(())
}
