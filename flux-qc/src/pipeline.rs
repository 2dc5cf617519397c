//! The QC stage pipeline for one site-year: screening, derivations,
//! flagging and the qca output files consumed by the later stages.

use crate::derive::{compose_nee, swin_from_ppfd, vpd_from_ta_rh, NeeInputs};
use crate::marginals::marginal_flags;
use crate::screening::{
    apply_range, radiation_vs_potential_flags, range_for, swin_vs_ppfd_flags, ustar_from_tau,
    zero_night_radiation,
};
use crate::spike::{
    classify_night_day, mask_flagged, spike_flags, SPIKES_WINDOW, SPIKE_THRESHOLD_H_LE,
    SPIKE_THRESHOLD_NEE,
};
use flux_core::details::SiteDetails;
use flux_core::error::{PipelineError, Result};
use flux_core::record::{ColumnId, DataTable};
use flux_core::INVALID_VALUE;
use log::{info, warn};
use std::io::Write;

/// Filter and window settings of one QC run.
#[derive(Debug, Clone)]
pub struct QcOptions {
    pub marginals_window: usize,
    pub spikes_window: usize,
    /// Mask rows whose instrument quality code is 2 and marginal rows.
    pub qc2_filter: bool,
    /// Mask detected spikes (on by default).
    pub spike_filter: bool,
    /// Custom day-of-year probed for the solar-noon output.
    pub doy: Option<(u32, u32)>,
}

impl Default for QcOptions {
    fn default() -> QcOptions {
        QcOptions {
            marginals_window: crate::marginals::MARGINALS_WINDOW,
            spikes_window: SPIKES_WINDOW,
            qc2_filter: false,
            spike_filter: true,
            doy: None,
        }
    }
}

/// Flags produced by a QC run, kept for the output writers.
#[derive(Debug, Default)]
pub struct QcFlags {
    pub nee_flag: Vec<f64>,
    pub spike_nee: Vec<f64>,
    pub spike_h: Vec<f64>,
    pub spike_le: Vec<f64>,
    pub marginal_nee: Vec<f64>,
    pub marginal_h: Vec<f64>,
    pub marginal_le: Vec<f64>,
    pub swin_from_ppfd: Vec<f64>,
    pub swin_vs_rpot: Vec<f64>,
    pub ppfd_vs_rpot: Vec<f64>,
    pub swin_vs_ppfd: Vec<f64>,
    pub night: Vec<bool>,
    pub day: Vec<bool>,
}

/// One site-year under QC: the parsed details, the data columns and the
/// derived series.
pub struct QcDataset {
    pub details: SiteDetails,
    names: Vec<ColumnId>,
    columns: Vec<Vec<f64>>,
    pub rpot: Vec<f64>,
    pub solar_noon: Option<i32>,
    pub rows_count: usize,
}

impl QcDataset {
    /// Load one dataset file: details header then the data block.
    pub fn load(text: &str) -> Result<QcDataset> {
        let (details, consumed) = SiteDetails::parse(text)?;
        let data: String = text
            .lines()
            .skip(consumed)
            .collect::<Vec<_>>()
            .join("\n");
        let table = DataTable::parse(&data, Some(details.rows_count()))?;
        let rows_count = table.values.len();
        let names = table.columns.clone();
        let columns: Vec<Vec<f64>> = (0..names.len())
            .map(|c| table.values.iter().map(|row| row[c]).collect())
            .collect();
        Ok(QcDataset {
            details,
            names,
            columns,
            rpot: Vec::new(),
            solar_noon: None,
            rows_count,
        })
    }

    /// Index of a plain column.
    pub fn column(&self, base: &str) -> Option<usize> {
        self.names.iter().position(|c| {
            c.base.eq_ignore_ascii_case(base) && c.indices.is_empty() && c.qualifier.is_none()
        })
    }

    pub fn values(&self, index: usize) -> &[f64] {
        &self.columns[index]
    }

    pub fn values_mut(&mut self, index: usize) -> &mut Vec<f64> {
        &mut self.columns[index]
    }

    /// Add a derived column, returning its index.
    pub fn add_column(&mut self, base: &str, values: Vec<f64>) -> usize {
        self.names.push(ColumnId {
            base: base.to_string(),
            indices: Vec::new(),
            qualifier: None,
        });
        self.columns.push(values);
        self.names.len() - 1
    }

    fn column_or_missing(&self, base: &str) -> Vec<f64> {
        match self.column(base) {
            Some(i) => self.columns[i].clone(),
            None => vec![INVALID_VALUE; self.rows_count],
        }
    }
}

/// Run the full QC sequence on one site-year.
pub fn process(ds: &mut QcDataset, opts: &QcOptions) -> Result<QcFlags> {
    let mut flags = QcFlags::default();
    let n = ds.rows_count;

    // potential radiation first: several checks depend on it
    let (probe_month, probe_day) = opts.doy.unwrap_or((0, 0));
    let (rpot, noon) =
        flux_solar::potential_radiation_with_solar_noon(&ds.details, probe_month, probe_day);
    if rpot.len() != n {
        return Err(PipelineError::InvariantViolation(format!(
            "potential radiation rows should be {}, not {}",
            n,
            rpot.len()
        )));
    }
    ds.rpot = rpot;
    ds.solar_noon = noon;
    info!("- computing SW_IN_POT...ok");

    // u* from momentum flux when the u* column never got a value
    if let Some(tau) = ds.column("TAU") {
        let tau_values = ds.columns[tau].clone();
        let ustar = match ds.column("USTAR") {
            Some(i) => i,
            None => ds.add_column("USTAR", vec![INVALID_VALUE; n]),
        };
        ustar_from_tau(ds.values_mut(ustar), &tau_values);
    }

    // VPD only when the tower did not report one
    if ds.column("VPD").is_none() {
        if let (Some(ta), Some(rh)) = (ds.column("TA"), ds.column("RH")) {
            let vpd = vpd_from_ta_rh(&ds.columns[ta], &ds.columns[rh]);
            ds.add_column("VPD", vpd);
            info!("- computing VPD...ok");
        }
    }

    // NEE composition with footprint mask
    let heights: Vec<f64> = (0..n)
        .map(|r| ds.details.tower_height_for_row(r).unwrap_or(INVALID_VALUE))
        .collect();
    let sc_negl: Vec<bool> = (0..n).map(|r| ds.details.sc_negl_for_row(r)).collect();
    if let Some(fc) = ds.column("FC") {
        let inputs = NeeInputs {
            fc: &ds.columns[fc],
            sc: ds.column("SC").map(|i| ds.columns[i].as_slice()),
            co2: ds.column("CO2").map(|i| ds.columns[i].as_slice()),
            existing_nee: ds.column("NEE").map(|i| ds.columns[i].as_slice()),
            qc_foot: ds.column("FETCH_FILTER").map(|i| ds.columns[i].as_slice()),
            heights: &heights,
            sc_negl: &sc_negl,
            res: ds.details.timeres,
        };
        if let Some((nee, nee_flag)) = compose_nee(&inputs) {
            match ds.column("NEE") {
                Some(i) => ds.columns[i] = nee,
                None => {
                    ds.add_column("NEE", nee);
                }
            }
            flags.nee_flag = nee_flag;
            info!("- computing NEE...ok");
        }
    }

    // range clamps
    for base in ["TA", "VPD", "P", "WS", "SW_IN", "LW_IN", "PA"] {
        if let Some(i) = ds.column(base) {
            apply_range(&mut ds.columns[i], range_for(base).unwrap());
        }
    }

    // SW_IN from PPFD when possible
    if let Some(ppfd) = ds.column("PPFD_IN") {
        let ppfd_values = ds.columns[ppfd].clone();
        let swin = ds.column("SW_IN");
        let current = swin.map(|i| ds.columns[i].as_slice());
        match swin_from_ppfd(current, &ppfd_values) {
            Ok(Some((values, ppfd_flags))) => {
                match swin {
                    Some(i) => ds.columns[i] = values,
                    None => {
                        ds.add_column("SW_IN", values);
                    }
                }
                flags.swin_from_ppfd = ppfd_flags;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("- SW_IN from PPFD_IN skipped: {}", e);
            }
        }
    }

    // radiation vs potential: zero the dark rows, then flag the excesses
    let rpot = ds.rpot.clone();
    for (base, is_swin) in [("SW_IN", true), ("PPFD_IN", false)] {
        if let Some(i) = ds.column(base) {
            let mut derived = if is_swin {
                std::mem::take(&mut flags.swin_from_ppfd)
            } else {
                vec![0.0; n]
            };
            if derived.is_empty() {
                derived = vec![0.0; n];
            }
            zero_night_radiation(
                &mut ds.columns[i],
                &rpot,
                ds.details.timeres,
                Some(&mut derived),
            );
            if is_swin {
                flags.swin_from_ppfd = derived;
            }
        }
    }
    if let Some(i) = ds.column("SW_IN") {
        flags.swin_vs_rpot = radiation_vs_potential_flags(&ds.columns[i], &rpot, 1.0);
    }
    if let Some(i) = ds.column("PPFD_IN") {
        flags.ppfd_vs_rpot = radiation_vs_potential_flags(&ds.columns[i], &rpot, 0.5);
    }

    // SW_IN <-> PPFD cross-consistency: flagged rows go missing in both
    if let (Some(swin), Some(ppfd)) = (ds.column("SW_IN"), ds.column("PPFD_IN")) {
        if let Some(cross) = swin_vs_ppfd_flags(&ds.columns[swin], &ds.columns[ppfd]) {
            mask_flagged(&mut ds.columns[swin], &cross);
            mask_flagged(&mut ds.columns[ppfd], &cross);
            flags.swin_vs_ppfd = cross;
        }
    }

    // night/day classification feeds the spike populations
    let swin = ds.column("SW_IN").map(|i| ds.columns[i].clone());
    let ppfd = ds.column("PPFD_IN").map(|i| ds.columns[i].clone());
    let (night, day) = classify_night_day(&rpot, swin.as_deref(), ppfd.as_deref());
    flags.night = night;
    flags.day = day;

    // spikes on the flux variables
    for (base, threshold, out) in [
        ("NEE", SPIKE_THRESHOLD_NEE, 0usize),
        ("H", SPIKE_THRESHOLD_H_LE, 1),
        ("LE", SPIKE_THRESHOLD_H_LE, 2),
    ] {
        if let Some(i) = ds.column(base) {
            let spikes = spike_flags(
                &ds.columns[i],
                &flags.night,
                &flags.day,
                opts.spikes_window,
                threshold,
            )?;
            if opts.spike_filter {
                mask_flagged(&mut ds.columns[i], &spikes);
            }
            match out {
                0 => flags.spike_nee = spikes,
                1 => flags.spike_h = spikes,
                _ => flags.spike_le = spikes,
            }
        }
    }

    // marginal values
    for (base, out) in [("NEE", 0usize), ("LE", 1), ("H", 2)] {
        if let Some(i) = ds.column(base) {
            let marginals = marginal_flags(&ds.columns[i], opts.marginals_window);
            if opts.qc2_filter {
                mask_flagged(&mut ds.columns[i], &marginals);
            }
            match out {
                0 => flags.marginal_nee = marginals,
                1 => flags.marginal_le = marginals,
                _ => flags.marginal_h = marginals,
            }
        }
    }

    // instrument quality code 2 masks under the qc2 policy
    if opts.qc2_filter {
        for (var, code) in [
            ("NEE", "FC_SSITC_TEST"),
            ("H", "H_SSITC_TEST"),
            ("LE", "LE_SSITC_TEST"),
        ] {
            if let (Some(v), Some(c)) = (ds.column(var), ds.column(code)) {
                let codes = ds.columns[c].clone();
                for (value, code) in ds.columns[v].iter_mut().zip(&codes) {
                    if *code == 2.0 {
                        *value = INVALID_VALUE;
                    }
                }
            }
        }
    }

    Ok(flags)
}

/// Columns of the qca meteo output consumed by the meteo stage.
const METEO_OUTPUT: [&str; 9] = ["CO2", "TA", "VPD", "P", "WS", "SW_IN", "LW_IN", "PA", "SW_IN_POT"];

/// Write the meteo input file: details header, then the met columns plus
/// the soil profiles.
pub fn write_meteo_file<W: Write>(w: &mut W, ds: &QcDataset) -> Result<()> {
    ds.details.write(w, "processed with qc")?;
    let profile_columns: Vec<usize> = ds
        .names
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            (c.base.eq_ignore_ascii_case("TS") || c.base.eq_ignore_ascii_case("SWC"))
                && c.indices.len() == 1
                && c.qualifier.is_none()
        })
        .map(|(i, _)| i)
        .collect();

    write!(w, "TIMESTAMP_START,TIMESTAMP_END")?;
    for base in METEO_OUTPUT {
        write!(w, ",{}", base)?;
    }
    for &i in &profile_columns {
        write!(w, ",{}_{}", ds.names[i].base.to_uppercase(), ds.names[i].indices[0])?;
    }
    writeln!(w)?;

    let res = ds.details.timeres;
    for row in 0..ds.rows_count {
        let start = flux_core::calendar::timestamp_for_row(
            row,
            ds.details.year,
            res,
            flux_core::calendar::Side::Start,
        );
        let end = flux_core::calendar::timestamp_for_row(
            row,
            ds.details.year,
            res,
            flux_core::calendar::Side::End,
        );
        write!(w, "{},{}", start.to_compact(), end.to_compact())?;
        for base in METEO_OUTPUT {
            let v = if base == "SW_IN_POT" {
                ds.rpot[row]
            } else {
                match ds.column(base) {
                    Some(i) => ds.columns[i][row],
                    None => INVALID_VALUE,
                }
            };
            write!(w, ",{:.3}", v)?;
        }
        for &i in &profile_columns {
            write!(w, ",{:.3}", ds.columns[i][row])?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Write the u*-threshold input file: the turbulence and radiation series
/// the u* filtering stage needs.
pub fn write_ustar_file<W: Write>(w: &mut W, ds: &QcDataset) -> Result<()> {
    write_simple(w, ds, &["USTAR", "NEE", "TA", "SW_IN", "SW_IN_POT"])
}

/// Write the NEE-uncertainty input file.
pub fn write_nee_file<W: Write>(w: &mut W, ds: &QcDataset, flags: &QcFlags) -> Result<()> {
    write!(w, "TIMESTAMP_START,TIMESTAMP_END,NEE,NEE_FLAG,USTAR,TA,SW_IN,VPD")?;
    writeln!(w)?;
    let res = ds.details.timeres;
    for row in 0..ds.rows_count {
        let start = flux_core::calendar::timestamp_for_row(
            row,
            ds.details.year,
            res,
            flux_core::calendar::Side::Start,
        );
        let end = flux_core::calendar::timestamp_for_row(
            row,
            ds.details.year,
            res,
            flux_core::calendar::Side::End,
        );
        write!(w, "{},{}", start.to_compact(), end.to_compact())?;
        let nee = ds
            .column("NEE")
            .map(|i| ds.columns[i][row])
            .unwrap_or(INVALID_VALUE);
        let flag = flags
            .nee_flag
            .get(row)
            .copied()
            .unwrap_or(INVALID_VALUE);
        write!(w, ",{:.3},{}", nee, flag)?;
        for base in ["USTAR", "TA", "SW_IN", "VPD"] {
            let v = ds
                .column(base)
                .map(|i| ds.columns[i][row])
                .unwrap_or(INVALID_VALUE);
            write!(w, ",{:.3}", v)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Write the energy-correction input file.
pub fn write_energy_file<W: Write>(w: &mut W, ds: &QcDataset) -> Result<()> {
    write_simple(w, ds, &["H", "LE", "NETRAD", "G", "TA", "WS", "SW_IN_POT"])
}

/// Write the sunset-respiration input file.
pub fn write_sr_file<W: Write>(w: &mut W, ds: &QcDataset, flags: &QcFlags) -> Result<()> {
    writeln!(w, "TIMESTAMP_START,TIMESTAMP_END,NEE,TA,NIGHT")?;
    let res = ds.details.timeres;
    for row in 0..ds.rows_count {
        let start = flux_core::calendar::timestamp_for_row(
            row,
            ds.details.year,
            res,
            flux_core::calendar::Side::Start,
        );
        let end = flux_core::calendar::timestamp_for_row(
            row,
            ds.details.year,
            res,
            flux_core::calendar::Side::End,
        );
        let nee = ds
            .column("NEE")
            .map(|i| ds.columns[i][row])
            .unwrap_or(INVALID_VALUE);
        let ta = ds
            .column("TA")
            .map(|i| ds.columns[i][row])
            .unwrap_or(INVALID_VALUE);
        writeln!(
            w,
            "{},{},{:.3},{:.3},{}",
            start.to_compact(),
            end.to_compact(),
            nee,
            ta,
            if flags.night.get(row).copied().unwrap_or(false) { 1 } else { 0 }
        )?;
    }
    Ok(())
}

/// Write the solar-noon / shift-detection sidecar.
pub fn write_solar_file<W: Write>(w: &mut W, ds: &QcDataset) -> Result<()> {
    writeln!(w, "site,{}", ds.details.site)?;
    writeln!(w, "year,{}", ds.details.year)?;
    writeln!(
        w,
        "solar_noon,{}",
        ds.solar_noon.map(|v| v as f64).unwrap_or(INVALID_VALUE)
    )?;
    writeln!(w, "TIMESTAMP_START,TIMESTAMP_END,SW_IN_POT,SW_IN")?;
    let res = ds.details.timeres;
    for row in 0..ds.rows_count {
        let start = flux_core::calendar::timestamp_for_row(
            row,
            ds.details.year,
            res,
            flux_core::calendar::Side::Start,
        );
        let end = flux_core::calendar::timestamp_for_row(
            row,
            ds.details.year,
            res,
            flux_core::calendar::Side::End,
        );
        let swin = ds
            .column("SW_IN")
            .map(|i| ds.columns[i][row])
            .unwrap_or(INVALID_VALUE);
        writeln!(
            w,
            "{},{},{:.3},{:.3}",
            start.to_compact(),
            end.to_compact(),
            ds.rpot[row],
            swin
        )?;
    }
    Ok(())
}

fn write_simple<W: Write>(w: &mut W, ds: &QcDataset, bases: &[&str]) -> Result<()> {
    write!(w, "TIMESTAMP_START,TIMESTAMP_END")?;
    for base in bases {
        write!(w, ",{}", base)?;
    }
    writeln!(w)?;
    let res = ds.details.timeres;
    for row in 0..ds.rows_count {
        let start = flux_core::calendar::timestamp_for_row(
            row,
            ds.details.year,
            res,
            flux_core::calendar::Side::Start,
        );
        let end = flux_core::calendar::timestamp_for_row(
            row,
            ds.details.year,
            res,
            flux_core::calendar::Side::End,
        );
        write!(w, "{},{}", start.to_compact(), end.to_compact())?;
        for base in bases {
            let v = if *base == "SW_IN_POT" {
                ds.rpot[row]
            } else {
                ds.column(base)
                    .map(|i| ds.columns[i][row])
                    .unwrap_or(INVALID_VALUE)
            };
            write!(w, ",{:.3}", v)?;
        }
        writeln!(w)?;
    }
    Ok(())
}
