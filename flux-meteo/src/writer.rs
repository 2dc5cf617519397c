//! Per-tier CSV writers with a frozen column schema, plus the info-text
//! sidecar. Writers are pure: same dataset in, same bytes out.

use crate::aggregate::AggRows;
use crate::dataset::{Col, MeteoDataset};
use flux_core::calendar::{
    days_per_year, dtime_for_row, month_and_day, timestamp_for_row, week_timestamps, Side,
};
use flux_core::error::Result;
use std::io::Write;

/// `%.3f` formatting used for physical values (missing prints -9999.000).
#[inline]
fn f3(v: f64) -> String {
    format!("{:.3}", v)
}

/// `%g`-style minimal formatting used for quality codes and DTIME.
#[inline]
fn g(v: f64) -> String {
    format!("{}", v)
}

/// The fixed value block shared by every tier after the TA group:
/// radiation, VPD, pressure, precipitation, wind and CO2.
fn tail_columns(include_rpot: bool, include_measured: bool) -> Vec<(Col, bool)> {
    // (column, formats_as_code)
    let mut cols = Vec::new();
    if include_rpot {
        cols.push((Col::Rpot, true));
    }
    cols.extend([
        (Col::SwInFilled, false),
        (Col::SwInQc, true),
        (Col::SwInEra, false),
        (Col::SwInM, false),
        (Col::SwInMQc, true),
        (Col::LwInFilled, false),
        (Col::LwInQc, true),
        (Col::LwInEra, false),
        (Col::LwInM, false),
        (Col::LwInMQc, true),
        (Col::LwInCalc, false),
        (Col::LwInCalcQc, true),
        (Col::LwInCalcEra, false),
        (Col::LwInCalcM, false),
        (Col::LwInCalcMQc, true),
        (Col::VpdFilled, false),
        (Col::VpdQc, true),
        (Col::VpdEra, false),
        (Col::VpdM, false),
        (Col::VpdMQc, true),
    ]);
    if include_measured {
        cols.extend([
            (Col::PaMet, false),
            (Col::PaEra, false),
            (Col::PaM, false),
            (Col::PaMQc, true),
            (Col::PrecipMet, false),
            (Col::PrecipEra, false),
            (Col::PrecipM, false),
            (Col::PrecipMQc, true),
            (Col::WsMet, false),
            (Col::WsEra, false),
            (Col::WsM, false),
            (Col::WsMQc, true),
        ]);
    } else {
        cols.extend([
            (Col::PaEra, false),
            (Col::PaM, false),
            (Col::PaMQc, true),
            (Col::PrecipEra, false),
            (Col::PrecipM, false),
            (Col::PrecipMQc, true),
            (Col::WsEra, false),
            (Col::WsM, false),
            (Col::WsMQc, true),
        ]);
    }
    cols.extend([(Col::Co2Filled, false), (Col::Co2Qc, true)]);
    cols
}

const TAIL_HEADER_AGG: &str = "SW_IN_pot,\
SW_IN_f,SW_IN_fqc,SW_IN_ERA,SW_IN_m,SW_IN_mqc,\
LW_IN_f,LW_IN_fqc,LW_IN_ERA,LW_IN_m,LW_IN_mqc,\
LW_IN_calc,LW_IN_calc_qc,LW_IN_calc_ERA,LW_IN_calc_m,LW_IN_calc_mqc,\
VPD_f,VPD_fqc,VPD_ERA,VPD_m,VPD_mqc,\
PA_ERA,PA_m,PA_mqc,P_ERA,P_m,P_mqc,WS_ERA,WS_m,WS_mqc,CO2_f,CO2_fqc";

const TA_HEADER_AGG: &str = "TA_f,TA_fqc,TA_f_night,TA_f_night_std,TA_f_night_qc,\
TA_f_day,TA_f_day_std,TA_f_day_qc,\
TA_ERA,TA_ERA_night,TA_ERA_night_std,TA_ERA_day,TA_ERA_day_std,\
TA_m,TA_mqc,TA_m_night,TA_m_night_std,TA_m_night_qc,TA_m_day,TA_m_day_std,TA_m_day_qc";

/// TA block of the aggregated tiers (means, night/day partitions).
const TA_COLS_AGG: [(Col, bool); 21] = [
    (Col::TaFilled, false),
    (Col::TaQc, true),
    (Col::TaFNight, false),
    (Col::TaFNightStd, false),
    (Col::TaFNightQc, true),
    (Col::TaFDay, false),
    (Col::TaFDayStd, false),
    (Col::TaFDayQc, true),
    (Col::TaEra, false),
    (Col::TaEraNight, false),
    (Col::TaEraNightStd, false),
    (Col::TaEraDay, false),
    (Col::TaEraDayStd, false),
    (Col::TaM, false),
    (Col::TaMQc, true),
    (Col::TaMNight, false),
    (Col::TaMNightStd, false),
    (Col::TaMNightQc, true),
    (Col::TaMDay, false),
    (Col::TaMDayStd, false),
    (Col::TaMDayQc, true),
];

fn profile_header(ds: &MeteoDataset) -> String {
    let mut out = String::new();
    for p in &ds.tss {
        out.push_str(&format!(",TS_{}_f,TS_{}_fqc", p.index, p.index));
    }
    for p in &ds.swcs {
        out.push_str(&format!(",SWC_{}_f,SWC_{}_fqc", p.index, p.index));
    }
    out
}

fn write_profiles_hh<W: Write>(w: &mut W, ds: &MeteoDataset, row: usize) -> Result<()> {
    for p in ds.tss.iter().chain(ds.swcs.iter()) {
        write!(w, ",{},{}", f3(p.filled[row]), g(p.qc[row]))?;
    }
    Ok(())
}

fn write_profiles_agg<W: Write>(w: &mut W, rows: &AggRows, row: usize) -> Result<()> {
    for p in rows.tss.iter().chain(rows.swcs.iter()) {
        write!(w, ",{},{}", f3(p.filled[row]), g(p.qc[row]))?;
    }
    Ok(())
}

/// Half-hourly product.
pub fn write_hh<W: Write>(w: &mut W, ds: &MeteoDataset) -> Result<()> {
    write!(
        w,
        "TIMESTAMP_START,TIMESTAMP_END,DTIME,\
TA_f,TA_fqc,TA_ERA,TA_m,TA_mqc,{}",
        TAIL_HEADER_AGG.replacen("PA_ERA,", "PA,PA_ERA,", 1)
            .replacen("P_ERA,", "P,P_ERA,", 1)
            .replacen("WS_ERA,", "WS,WS_ERA,", 1)
    )?;
    writeln!(w, "{}", profile_header(ds))?;

    let ta_cols = [
        (Col::TaFilled, false),
        (Col::TaQc, true),
        (Col::TaEra, false),
        (Col::TaM, false),
        (Col::TaMQc, true),
    ];
    let tail = tail_columns(true, true);

    let mut row = 0usize;
    for record in &ds.years {
        let year_rows = ds.timeres.rows_per_year(record.year);
        for r in 0..year_rows {
            let start = timestamp_for_row(r, record.year, ds.timeres, Side::Start);
            let end = timestamp_for_row(r, record.year, ds.timeres, Side::End);
            write!(
                w,
                "{},{},{}",
                start.to_compact(),
                end.to_compact(),
                g(dtime_for_row(r, ds.timeres))
            )?;
            for (c, as_code) in ta_cols {
                let v = ds.columns[c as usize][row];
                write!(w, ",{}", if as_code { g(v) } else { f3(v) })?;
            }
            for &(c, as_code) in &tail {
                let v = ds.columns[c as usize][row];
                write!(w, ",{}", if as_code { g(v) } else { f3(v) })?;
            }
            write_profiles_hh(w, ds, row)?;
            writeln!(w)?;
            row += 1;
        }
    }
    Ok(())
}

fn write_agg_row<W: Write>(
    w: &mut W,
    rows: &AggRows,
    row: usize,
    include_rpot: bool,
) -> Result<()> {
    for (c, as_code) in TA_COLS_AGG {
        let v = rows.columns[c as usize][row];
        write!(w, ",{}", if as_code { g(v) } else { f3(v) })?;
    }
    for (c, as_code) in tail_columns(include_rpot, false) {
        let v = rows.columns[c as usize][row];
        write!(w, ",{}", if as_code { g(v) } else { f3(v) })?;
    }
    write_profiles_agg(w, rows, row)?;
    writeln!(w)?;
    Ok(())
}

/// Daily product: one `YYYYMMDD` stamp per row.
pub fn write_dd<W: Write>(w: &mut W, ds: &MeteoDataset, daily: &AggRows) -> Result<()> {
    writeln!(
        w,
        "TIMESTAMP,{},{}{}",
        TA_HEADER_AGG,
        TAIL_HEADER_AGG,
        profile_header(ds)
    )?;
    let mut row = 0usize;
    for record in &ds.years {
        for day in 0..days_per_year(record.year) {
            let (month, dom) = month_and_day(day + 1, record.year);
            write!(w, "{:04}{:02}{:02}", record.year, month, dom)?;
            write_agg_row(w, daily, row, true)?;
            row += 1;
        }
    }
    Ok(())
}

/// Weekly product: date-bracket stamps plus the week ordinal.
pub fn write_ww<W: Write>(w: &mut W, ds: &MeteoDataset, weekly: &AggRows) -> Result<()> {
    writeln!(
        w,
        "TIMESTAMP_START,TIMESTAMP_END,WEEK,{},{}{}",
        TA_HEADER_AGG,
        TAIL_HEADER_AGG,
        profile_header(ds)
    )?;
    let mut row = 0usize;
    for record in &ds.years {
        for week in 0..52 {
            let (start, end) = week_timestamps(week, record.year, ds.timeres);
            write!(
                w,
                "{},{},{}",
                start.to_compact_date(),
                end.to_compact_date(),
                week + 1
            )?;
            write_agg_row(w, weekly, row, true)?;
            row += 1;
        }
    }
    Ok(())
}

/// Monthly product: `YYYYMM` stamps.
pub fn write_mm<W: Write>(w: &mut W, ds: &MeteoDataset, monthly: &AggRows) -> Result<()> {
    writeln!(
        w,
        "TIMESTAMP,{},{}{}",
        TA_HEADER_AGG,
        TAIL_HEADER_AGG,
        profile_header(ds)
    )?;
    let mut row = 0usize;
    for record in &ds.years {
        for month in 1..=12 {
            write!(w, "{:04}{:02}", record.year, month)?;
            write_agg_row(w, monthly, row, true)?;
            row += 1;
        }
    }
    Ok(())
}

/// Yearly product: `YYYY` stamps, no potential-radiation column.
pub fn write_yy<W: Write>(w: &mut W, ds: &MeteoDataset, yearly: &AggRows) -> Result<()> {
    writeln!(
        w,
        "TIMESTAMP,{},{}{}",
        TA_HEADER_AGG,
        TAIL_HEADER_AGG.trim_start_matches("SW_IN_pot,"),
        profile_header(ds)
    )?;
    for (row, record) in ds.years.iter().enumerate() {
        write!(w, "{:04}", record.year)?;
        write_agg_row(w, yearly, row, false)?;
    }
    Ok(())
}

/// Info-text sidecar: descriptive header plus the opaque per-site stat
/// blob handed in by the caller.
pub fn write_info<W: Write>(
    w: &mut W,
    ds: &MeteoDataset,
    tier: &str,
    stat_blob: &str,
) -> Result<()> {
    writeln!(w, "site: {}", ds.site)?;
    writeln!(
        w,
        "years: {}-{}",
        ds.years.first().map(|y| y.year).unwrap_or_default(),
        ds.years.last().map(|y| y.year).unwrap_or_default()
    )?;
    writeln!(w, "timeres: {}", ds.timeres)?;
    writeln!(w, "aggregation: {}", tier)?;
    for record in &ds.years {
        writeln!(
            w,
            "{}: meteo {}, era {}",
            record.year,
            if record.met_exists { "present" } else { "missing" },
            if record.era_exists { "present" } else { "missing" },
        )?;
    }
    if !stat_blob.is_empty() {
        writeln!(w)?;
        w.write_all(stat_blob.as_bytes())?;
    }
    Ok(())
}
