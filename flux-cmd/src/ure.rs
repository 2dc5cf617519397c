//! The `ure` subcommand: reference selection and uncertainty envelopes
//! over the u*-threshold realizations, plus the SR aggregation path.

use crate::files::{collect_csv_files, parse_ure_name};
use crate::{Author, FluxType};
use anyhow::{bail, Context, Result};
use flux_core::record::DataTable;
use flux_core::TimeRes;
use flux_ure::dataset::{
    matrix_daily, matrix_monthly, matrix_weekly, matrix_yearly, process_matrix,
    reference_by_model_efficiency, Matrix, PRow, UreDataset,
};
use flux_ure::sr::SrDataset;
use flux_ure::writer::{self, TierData, TierGroup};
use log::{error, info};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub fn run_ure(
    input_path: &str,
    output_path: &str,
    author: Author,
    flux_type: FluxType,
) -> Result<()> {
    if author == Author::Sr && flux_type == FluxType::Gpp {
        bail!("SR can be used only with RECO type not GPP");
    }

    let mut sites: BTreeMap<String, BTreeMap<i32, PathBuf>> = BTreeMap::new();
    for file in collect_csv_files(input_path)? {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if let Some((site, year, a, t)) = parse_ure_name(&name) {
            if a == author.suffix() && t == flux_type.suffix() {
                sites.entry(site).or_default().insert(year, file);
            }
        }
    }
    if sites.is_empty() {
        bail!("no files found under {}", input_path);
    }

    let mut processed = 0usize;
    let mut skipped = 0usize;
    for (site, years) in &sites {
        let result = if author == Author::Sr {
            process_sr_site(site, years, output_path, author, flux_type)
        } else {
            process_site(site, years, output_path, author, flux_type)
        };
        match result {
            Ok(()) => processed += 1,
            Err(e) => {
                error!("{}: {:#}", site, e);
                skipped += 1;
            }
        }
    }
    info!(
        "{} site{}: {} processed, {} skipped.",
        sites.len(),
        if sites.len() == 1 { "" } else { "s" },
        processed,
        skipped
    );
    if processed == 0 {
        bail!("no site could be processed");
    }
    Ok(())
}

/// Read the per-year tables, inferring the resolution from the first
/// readable file's row count.
fn load_inputs(
    years: &BTreeMap<i32, PathBuf>,
) -> Result<(TimeRes, Vec<(i32, Option<DataTable>)>)> {
    let first = *years.keys().next().unwrap();
    let last = *years.keys().last().unwrap();
    let mut timeres: Option<TimeRes> = None;
    let mut inputs = Vec::new();
    for year in first..=last {
        let table = match years.get(&year) {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("unable to open {}", path.display()))?;
                let table = DataTable::parse(&text, None)?;
                if timeres.is_none() {
                    timeres = Some(infer_timeres(table.values.len(), year)?);
                }
                Some(table)
            }
            None => {
                info!("- importing {}...ok (nothing found, null year added)", year);
                None
            }
        };
        inputs.push((year, table));
    }
    let timeres = timeres.context("no readable realization file for site")?;
    Ok((timeres, inputs))
}

fn infer_timeres(rows: usize, year: i32) -> Result<TimeRes> {
    if rows == TimeRes::HalfHourly.rows_per_year(year) {
        Ok(TimeRes::HalfHourly)
    } else if rows == TimeRes::Hourly.rows_per_year(year) {
        Ok(TimeRes::Hourly)
    } else {
        bail!("{} rows match neither half-hourly nor hourly for {}", rows, year)
    }
}

struct Tier {
    matrix: Matrix,
    p_rows: Vec<PRow>,
    reference: usize,
}

fn tier_data<'a>(y: &'a Tier, c: &'a Option<Tier>) -> TierData<'a> {
    TierData {
        y: TierGroup {
            matrix: &y.matrix,
            p_rows: &y.p_rows,
            reference: y.reference,
        },
        c: c.as_ref().map(|c| TierGroup {
            matrix: &c.matrix,
            p_rows: &c.p_rows,
            reference: c.reference,
        }),
    }
}

/// Compute one grouping's tier: the reference (or a carried-over one) and
/// the percentile matrix.
fn build_tier(matrix: Matrix, carry_reference: Option<usize>) -> Result<Tier> {
    let reference = match carry_reference {
        Some(r) => r,
        None => reference_by_model_efficiency(&matrix)?,
    };
    let p_rows = process_matrix(&matrix)?;
    Ok(Tier {
        matrix,
        p_rows,
        reference,
    })
}

fn process_site(
    site: &str,
    years: &BTreeMap<i32, PathBuf>,
    output_path: &str,
    author: Author,
    flux_type: FluxType,
) -> Result<()> {
    info!("- {}, {} year{}", site, years.len(), if years.len() == 1 { "" } else { "s" });
    let (timeres, inputs) = load_inputs(years)?;
    let ds = UreDataset::assemble(site, timeres, &inputs)?;
    let label = flux_type.suffix();
    let has_c = ds.has_c();

    let out = Path::new(output_path);
    let file = |tier: &str| {
        out.join(format!(
            "{}_{}_{}_{}.csv",
            site,
            author.suffix(),
            label,
            tier
        ))
    };
    let info_file = |tier: &str| {
        out.join(format!(
            "{}_{}_{}_{}_info.txt",
            site,
            author.suffix(),
            label,
            tier
        ))
    };

    // half-hourly tier straight off the imported matrices
    let hh_y = build_tier(ds.y.clone(), None)?;
    let hh_c = if has_c {
        Some(build_tier(ds.c.clone(), None)?)
    } else {
        None
    };
    writer::write_hh(
        &mut BufWriter::new(File::create(file("hh"))?),
        &ds,
        label,
        &tier_data(&hh_y, &hh_c),
    )?;
    writer::write_info(
        &mut BufWriter::new(File::create(info_file("hh"))?),
        &ds,
        label,
        hh_y.reference,
        hh_c.as_ref().map(|c| c.reference),
    )?;
    info!("- saving hh...ok");

    // aggregated tiers from the daily matrices
    let rows_per_day = timeres.rows_per_day();
    let daily_y = matrix_daily(&ds.y, rows_per_day);
    let daily_c = has_c.then(|| matrix_daily(&ds.c, rows_per_day));

    let dd_y = build_tier(daily_y.clone(), None)?;
    let dd_c = match &daily_c {
        Some(m) => Some(build_tier(m.clone(), None)?),
        None => None,
    };
    writer::write_dd(
        &mut BufWriter::new(File::create(file("dd"))?),
        &ds,
        label,
        &tier_data(&dd_y, &dd_c),
    )?;
    writer::write_info(
        &mut BufWriter::new(File::create(info_file("dd"))?),
        &ds,
        label,
        dd_y.reference,
        dd_c.as_ref().map(|c| c.reference),
    )?;
    info!("- saving daily...ok");

    let ww_y = build_tier(matrix_weekly(&daily_y, &ds.years), None)?;
    let ww_c = match &daily_c {
        Some(m) => Some(build_tier(matrix_weekly(m, &ds.years), None)?),
        None => None,
    };
    writer::write_ww(
        &mut BufWriter::new(File::create(file("ww"))?),
        &ds,
        label,
        &tier_data(&ww_y, &ww_c),
    )?;
    writer::write_info(
        &mut BufWriter::new(File::create(info_file("ww"))?),
        &ds,
        label,
        ww_y.reference,
        ww_c.as_ref().map(|c| c.reference),
    )?;
    info!("- saving weekly...ok");

    let mm_y = build_tier(matrix_monthly(&daily_y, &ds.years), None)?;
    let mm_c = match &daily_c {
        Some(m) => Some(build_tier(matrix_monthly(m, &ds.years), None)?),
        None => None,
    };
    writer::write_mm(
        &mut BufWriter::new(File::create(file("mm"))?),
        &ds,
        label,
        &tier_data(&mm_y, &mm_c),
    )?;
    writer::write_info(
        &mut BufWriter::new(File::create(info_file("mm"))?),
        &ds,
        label,
        mm_y.reference,
        mm_c.as_ref().map(|c| c.reference),
    )?;
    info!("- saving monthly...ok");

    // a single year makes the annual Model Efficiency degenerate: reuse
    // the monthly reference
    let yy_carry = (ds.years.len() == 1).then_some(mm_y.reference);
    let yy_y = build_tier(matrix_yearly(&daily_y, &ds.years), yy_carry)?;
    let yy_c = match &daily_c {
        Some(m) => Some(build_tier(matrix_yearly(m, &ds.years), None)?),
        None => None,
    };
    writer::write_yy(
        &mut BufWriter::new(File::create(file("yy"))?),
        &ds,
        label,
        &tier_data(&yy_y, &yy_c),
    )?;
    writer::write_info(
        &mut BufWriter::new(File::create(info_file("yy"))?),
        &ds,
        label,
        yy_y.reference,
        yy_c.as_ref().map(|c| c.reference),
    )?;
    info!("- saving yearly...ok");
    Ok(())
}

fn process_sr_site(
    site: &str,
    years: &BTreeMap<i32, PathBuf>,
    output_path: &str,
    author: Author,
    flux_type: FluxType,
) -> Result<()> {
    info!("- {}, {} year{}", site, years.len(), if years.len() == 1 { "" } else { "s" });
    let (timeres, inputs) = load_inputs(years)?;
    let ds = SrDataset::assemble(site, timeres, &inputs)?;

    let out = Path::new(output_path);
    let file = |tier: &str| {
        out.join(format!(
            "{}_{}_{}_{}.csv",
            site,
            author.suffix(),
            flux_type.suffix(),
            tier
        ))
    };

    writer::write_sr_hh(&mut BufWriter::new(File::create(file("hh"))?), &ds)?;
    let daily = ds.daily();
    writer::write_sr_dd(&mut BufWriter::new(File::create(file("dd"))?), &ds, &daily)?;
    let weekly = ds.weekly(&daily);
    writer::write_sr_ww(&mut BufWriter::new(File::create(file("ww"))?), &ds, &weekly)?;
    let monthly = ds.monthly(&daily);
    writer::write_sr_mm(&mut BufWriter::new(File::create(file("mm"))?), &ds, &monthly)?;
    let yearly = ds.yearly(&daily);
    writer::write_sr_yy(&mut BufWriter::new(File::create(file("yy"))?), &ds, &yearly)?;
    info!("- saving sr tiers...ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::calendar::{timestamp_for_row, Side};
    use flux_ure::MATRIX_COLS;
    use std::io::Write as _;

    fn realization_text() -> String {
        let mut header = String::from("TIMESTAMP_START,TIMESTAMP_END");
        for p in 0..MATRIX_COLS {
            header.push_str(&format!(",NEE_c_{}", p + 1));
        }
        for p in 0..MATRIX_COLS {
            header.push_str(&format!(",NEE_y_{}", p + 1));
        }
        header.push('\n');
        let mut text = header;
        for row in 0..17520 {
            let start = timestamp_for_row(row, 2010, TimeRes::HalfHourly, Side::Start);
            let end = timestamp_for_row(row, 2010, TimeRes::HalfHourly, Side::End);
            text.push_str(&format!("{},{}", start.to_compact(), end.to_compact()));
            let ramp = row as f64 / 10000.0;
            for _ in 0..2 * MATRIX_COLS {
                text.push_str(&format!(",{}", ramp));
            }
            text.push('\n');
        }
        text
    }

    #[test]
    fn test_ure_identical_candidates_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("US-TST_2010_NT_GPP.csv");
        let mut f = File::create(&input).unwrap();
        f.write_all(realization_text().as_bytes()).unwrap();
        drop(f);

        let out = tempfile::tempdir().unwrap();
        run_ure(
            dir.path().to_str().unwrap(),
            out.path().to_str().unwrap(),
            Author::Nt,
            FluxType::Gpp,
        )
        .unwrap();

        for tier in ["hh", "dd", "ww", "mm", "yy"] {
            assert!(out.path().join(format!("US-TST_NT_GPP_{}.csv", tier)).exists());
        }
        // identical candidates: envelope percentiles collapse onto the
        // ramp and the standard error is zero everywhere
        let hh = std::fs::read_to_string(out.path().join("US-TST_NT_GPP_hh.csv")).unwrap();
        let line = hh.lines().nth(100).unwrap();
        let fields: Vec<&str> = line.split(',').collect();
        let reference = fields[3];
        let p05 = fields[7];
        let p95 = fields[13];
        assert_eq!(reference, p05);
        assert_eq!(reference, p95);
        assert_eq!(fields[6], "0");
    }

    #[test]
    fn test_sr_with_gpp_rejected() {
        assert!(run_ure(".", ".", Author::Sr, FluxType::Gpp).is_err());
    }
}
