//! Uncertainty and reference extraction.
//!
//! Consumes the forty u*-threshold realizations of a flux estimate
//! (per-year "y" and whole-record "c" groupings), selects a reference
//! series by Model Efficiency, and emits percentile envelopes with
//! standard errors at every aggregation tier. A simpler "SR" variant
//! aggregates sunset-respiration records.

pub mod dataset;
pub mod sr;
pub mod writer;

pub use dataset::{Matrix, PRow, UreDataset, UreYear, CANDIDATES, ENVELOPE, MATRIX_COLS,
    PERCENTILE_LABELS};

/// Conversion from umolCO2 m^-2 s^-1 to gC m^-2 d^-1 over a day.
pub const CO2_TO_C: f64 = 1.03772448;
