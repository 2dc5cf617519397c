//! Command implementations for the flux processing CLI.
//!
//! Provides subcommands for the three batch stages: quality control of
//! raw site-year datasets, meteo product assembly, and uncertainty /
//! reference extraction.

use clap::{Subcommand, ValueEnum};

pub mod files;
pub mod meteo;
pub mod qc;
pub mod ure;

/// Partitioning product family consumed by the uncertainty stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Author {
    Nt,
    Dt,
    Sr,
}

impl Author {
    pub fn suffix(self) -> &'static str {
        match self {
            Author::Nt => "NT",
            Author::Dt => "DT",
            Author::Sr => "SR",
        }
    }
}

/// Flux estimate type of an uncertainty input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FluxType {
    Gpp,
    Reco,
}

impl FluxType {
    pub fn suffix(self) -> &'static str {
        match self {
            FluxType::Gpp => "GPP",
            FluxType::Reco => "RECO",
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Quality-control screening of raw site-year datasets
    Qc {
        /// File or directory of datasets to process
        #[arg(long)]
        input_path: String,

        /// Directory where result files are created
        #[arg(long)]
        output_path: String,

        /// Size of the window for marginal detection
        #[arg(long, default_value_t = 480)]
        marginals_window: usize,

        /// Size of the window for spike detection
        #[arg(long, default_value_t = 624)]
        spikes_window: usize,

        /// Enable the qc2/marginal filter
        #[arg(long)]
        qc2_filter: bool,

        /// Disable spike filtering for NEE, H and LE
        #[arg(long)]
        no_spike_filter: bool,

        /// Custom day-of-year probed for the solar-noon output
        #[arg(long)]
        doy: Option<u32>,

        /// Create the meteo input file
        #[arg(long)]
        meteo: bool,

        /// Create the NEE-uncertainty input file
        #[arg(long)]
        nee: bool,

        /// Create the energy-correction input file
        #[arg(long)]
        energy: bool,

        /// Create the u*-threshold input file
        #[arg(long)]
        ustar: bool,

        /// Create the sunset-respiration input file
        #[arg(long)]
        sr: bool,

        /// Create the shift-detection solar file
        #[arg(long)]
        solar: bool,

        /// Create every input file except sr and solar
        #[arg(long)]
        all: bool,
    },

    /// Assemble the gap-filled, aggregated meteo products
    Meteo {
        /// Directory holding the qca meteo files
        #[arg(long)]
        input_path: String,

        /// Directory holding the ERA fallback files (defaults to the
        /// input directory)
        #[arg(long)]
        era_path: Option<String>,

        /// Directory where result files are created
        #[arg(long)]
        output_path: String,
    },

    /// Extract references and uncertainty envelopes from the u*
    /// realizations
    Ure {
        /// Directory holding the realization files
        #[arg(long)]
        input_path: String,

        /// Directory where result files are created
        #[arg(long)]
        output_path: String,

        /// Partitioning product family
        #[arg(long, value_enum)]
        author: Author,

        /// Flux estimate type
        #[arg(long = "type", value_enum)]
        flux_type: FluxType,
    },
}

pub fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Qc {
            input_path,
            output_path,
            marginals_window,
            spikes_window,
            qc2_filter,
            no_spike_filter,
            doy,
            meteo,
            nee,
            energy,
            ustar,
            sr,
            solar,
            all,
        } => {
            let outputs = qc::Outputs {
                meteo: meteo || all,
                nee: nee || all,
                energy: energy || all,
                ustar: ustar || all,
                sr,
                solar,
            };
            let options = qc::options(marginals_window, spikes_window, qc2_filter, no_spike_filter, doy);
            qc::run_qc(&input_path, &output_path, &options, &outputs)
        }
        Command::Meteo {
            input_path,
            era_path,
            output_path,
        } => meteo::run_meteo(&input_path, era_path.as_deref(), &output_path),
        Command::Ure {
            input_path,
            output_path,
            author,
            flux_type,
        } => ure::run_ure(&input_path, &output_path, author, flux_type),
    }
}
