//! The `meteo` subcommand: assemble each site's multi-year record from
//! the qca meteo files plus the ERA fallbacks, gap-fill, aggregate and
//! write the per-tier products.

use crate::files::{collect_csv_files, parse_era_name, parse_qca_meteo_name};
use anyhow::{bail, Context, Result};
use flux_core::details::SiteDetails;
use flux_core::record::DataTable;
use flux_core::TimeRes;
use flux_meteo::aggregate::{compute_daily, compute_monthly, compute_weekly, compute_yearly};
use flux_meteo::lwin::{compose_lwin_calc_m, compute_lwin_calc};
use flux_meteo::writer;
use flux_meteo::{MeteoDataset, YearInput};
use log::{error, info};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub fn run_meteo(input_path: &str, era_path: Option<&str>, output_path: &str) -> Result<()> {
    let era_path = era_path.unwrap_or(input_path);

    // group the qca meteo files per site
    let mut sites: BTreeMap<String, BTreeMap<i32, PathBuf>> = BTreeMap::new();
    for file in collect_csv_files(input_path)? {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if let Some((site, year)) = parse_qca_meteo_name(&name) {
            sites.entry(site).or_default().insert(year, file);
        }
    }
    if sites.is_empty() {
        bail!("no meteo files found under {}", input_path);
    }

    let mut eras: BTreeMap<(String, i32), PathBuf> = BTreeMap::new();
    for file in collect_csv_files(era_path).unwrap_or_default() {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if let Some((site, year)) = parse_era_name(&name) {
            eras.insert((site, year), file);
        }
    }

    let mut processed = 0usize;
    let mut skipped = 0usize;
    for (site, years) in &sites {
        match process_site(site, years, &eras, output_path) {
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

fn process_site(
    site: &str,
    years: &BTreeMap<i32, PathBuf>,
    eras: &BTreeMap<(String, i32), PathBuf>,
    output_path: &str,
) -> Result<()> {
    let first = *years.keys().next().unwrap();
    let last = *years.keys().last().unwrap();
    info!("- {}, {} year{}", site, last - first + 1, if first == last { "" } else { "s" });

    let mut timeres: Option<TimeRes> = None;
    let mut inputs = Vec::new();
    for year in first..=last {
        let met = match years.get(&year) {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("unable to open {}", path.display()))?;
                let (details, consumed) = SiteDetails::parse(&text)?;
                timeres = Some(details.timeres);
                let data: String = text
                    .lines()
                    .skip(consumed)
                    .collect::<Vec<_>>()
                    .join("\n");
                Some(DataTable::parse(&data, Some(details.rows_count()))?)
            }
            None => {
                info!("- {:02} importing {}...ok (nothing found, null year added)", year - first + 1, year);
                None
            }
        };
        let res = timeres.unwrap_or(TimeRes::HalfHourly);
        let era = match eras.get(&(site.to_string(), year)) {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("unable to open {}", path.display()))?;
                Some(DataTable::parse(&text, Some(res.rows_per_year(year)))?)
            }
            None => None,
        };
        inputs.push(YearInput { year, met, era });
    }
    let timeres = timeres.context("no readable meteo file for site")?;

    let mut ds = MeteoDataset::assemble(site, timeres, &inputs)?;
    ds.gapfill()?;
    info!("- computing ms and qcs...ok");
    ds.compose_m();
    info!("- computing calc...ok");
    compute_lwin_calc(&mut ds);
    compose_lwin_calc_m(&mut ds);

    let out = Path::new(output_path);
    let file = |tier: &str| out.join(format!("{}_meteo_{}.csv", site, tier));

    info!("- saving hh...ok");
    writer::write_hh(&mut BufWriter::new(File::create(file("hh"))?), &ds)?;

    info!("- computing daily...ok");
    let daily = compute_daily(&mut ds);
    writer::write_dd(&mut BufWriter::new(File::create(file("dd"))?), &ds, &daily)?;

    info!("- computing weekly...ok");
    let weekly = compute_weekly(&ds, &daily);
    writer::write_ww(&mut BufWriter::new(File::create(file("ww"))?), &ds, &weekly)?;

    info!("- computing monthly...ok");
    let monthly = compute_monthly(&ds, &daily);
    writer::write_mm(&mut BufWriter::new(File::create(file("mm"))?), &ds, &monthly)?;

    info!("- computing yearly...ok");
    let yearly = compute_yearly(&ds, &daily);
    writer::write_yy(&mut BufWriter::new(File::create(file("yy"))?), &ds, &yearly)?;

    for tier in ["hh", "dd", "ww", "mm", "yy"] {
        let path = out.join(format!("{}_meteo_{}_info.txt", site, tier));
        writer::write_info(&mut BufWriter::new(File::create(path)?), &ds, tier, "")?;
    }
    Ok(())
}
