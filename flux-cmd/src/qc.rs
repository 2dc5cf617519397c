//! The `qc` subcommand: screen each site-year dataset and emit the input
//! files of the downstream stages.

use crate::files::collect_csv_files;
use anyhow::{bail, Context, Result};
use flux_core::calendar::month_and_day;
use flux_qc::pipeline::{
    process, write_energy_file, write_meteo_file, write_nee_file, write_solar_file,
    write_sr_file, write_ustar_file, QcDataset, QcOptions,
};
use log::{error, info};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Which input files to create.
#[derive(Debug, Clone, Copy, Default)]
pub struct Outputs {
    pub meteo: bool,
    pub nee: bool,
    pub energy: bool,
    pub ustar: bool,
    pub sr: bool,
    pub solar: bool,
}

impl Outputs {
    fn any(&self) -> bool {
        self.meteo || self.nee || self.energy || self.ustar || self.sr || self.solar
    }
}

/// Build the QC options from the CLI flags. The `doy` probe is given as a
/// day of year and resolved against a non-leap calendar, as the solar
/// output expects.
pub fn options(
    marginals_window: usize,
    spikes_window: usize,
    qc2_filter: bool,
    no_spike_filter: bool,
    doy: Option<u32>,
) -> QcOptions {
    QcOptions {
        marginals_window,
        spikes_window,
        qc2_filter,
        spike_filter: !no_spike_filter,
        doy: doy.map(|d| month_and_day(d as usize, 2001)),
    }
}

/// Process every dataset under `input_path`.
pub fn run_qc(
    input_path: &str,
    output_path: &str,
    options: &QcOptions,
    outputs: &Outputs,
) -> Result<()> {
    if !outputs.any() {
        bail!("no output specified");
    }
    let files = collect_csv_files(input_path)?;
    if files.is_empty() {
        bail!("no files found under {}", input_path);
    }

    let mut processed = 0usize;
    let mut skipped = 0usize;
    for file in &files {
        match process_one(file, output_path, options, outputs) {
            Ok(()) => processed += 1,
            Err(e) => {
                error!("{}: {:#}", file.display(), e);
                skipped += 1;
            }
        }
    }
    info!(
        "{} file{} found: {} processed, {} skipped.",
        files.len(),
        if files.len() == 1 { "" } else { "s" },
        processed,
        skipped
    );
    if processed == 0 {
        bail!("no dataset could be processed");
    }
    Ok(())
}

fn process_one(
    file: &Path,
    output_path: &str,
    options: &QcOptions,
    outputs: &Outputs,
) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("unable to open {}", file.display()))?;
    let mut ds = QcDataset::load(&text)
        .with_context(|| format!("unable to parse {}", file.display()))?;
    info!("- found {}, {}", ds.details.site, ds.details.year);
    let flags = process(&mut ds, options)?;

    let out = Path::new(output_path);
    let name = |kind: &str| {
        out.join(format!(
            "{}_qca_{}_{}.csv",
            ds.details.site, kind, ds.details.year
        ))
    };
    if outputs.meteo {
        let mut w = BufWriter::new(File::create(name("meteo"))?);
        write_meteo_file(&mut w, &ds)?;
    }
    if outputs.nee {
        let mut w = BufWriter::new(File::create(name("nee"))?);
        write_nee_file(&mut w, &ds, &flags)?;
    }
    if outputs.energy {
        let mut w = BufWriter::new(File::create(name("energy"))?);
        write_energy_file(&mut w, &ds)?;
    }
    if outputs.ustar {
        let mut w = BufWriter::new(File::create(name("ustar"))?);
        write_ustar_file(&mut w, &ds)?;
    }
    if outputs.sr {
        let mut w = BufWriter::new(File::create(name("sr"))?);
        write_sr_file(&mut w, &ds, &flags)?;
    }
    if outputs.solar {
        let mut w = BufWriter::new(File::create(name("solar_noon"))?);
        write_solar_file(&mut w, &ds)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::calendar::{timestamp_for_row, Side};
    use flux_core::TimeRes;
    use std::io::Write as _;

    fn dataset_text() -> String {
        let mut text = String::from(
            "site,US-TST\nyear,2010\nlat,40.0\nlon,-105.0\n\
timezone,201001010000,-7\nhtower,201001010000,3.0\ntimeres,halfhourly\nsc_negl,1\n\
notes,command test dataset\n",
        );
        text.push_str("TIMESTAMP_START,TIMESTAMP_END,FC,TA,RH,SW_IN\n");
        for row in 0..17520 {
            let start = timestamp_for_row(row, 2010, TimeRes::HalfHourly, Side::Start);
            let end = timestamp_for_row(row, 2010, TimeRes::HalfHourly, Side::End);
            text.push_str(&format!(
                "{},{},-2.0,10.0,50.0,0.0\n",
                start.to_compact(),
                end.to_compact()
            ));
        }
        text
    }

    #[test]
    fn test_run_qc_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("US-TST_2010.csv");
        let mut f = File::create(&input).unwrap();
        f.write_all(dataset_text().as_bytes()).unwrap();
        drop(f);

        let out_dir = tempfile::tempdir().unwrap();
        let outputs = Outputs {
            meteo: true,
            ustar: true,
            ..Outputs::default()
        };
        run_qc(
            input.to_str().unwrap(),
            out_dir.path().to_str().unwrap(),
            &QcOptions::default(),
            &outputs,
        )
        .unwrap();
        assert!(out_dir.path().join("US-TST_qca_meteo_2010.csv").exists());
        assert!(out_dir.path().join("US-TST_qca_ustar_2010.csv").exists());
    }

    #[test]
    fn test_no_outputs_is_an_error() {
        assert!(run_qc(".", ".", &QcOptions::default(), &Outputs::default()).is_err());
    }
}
