//! Meteo product assembly.
//!
//! Takes the QC'd meteo files plus the ERA fallback series for a site,
//! gap-fills with MDS, composes the measured/filled/ERA `_m` series,
//! derives clear-sky longwave radiation, aggregates to daily, weekly,
//! monthly and yearly resolution and writes the per-tier products.

pub mod aggregate;
pub mod dataset;
pub mod lwin;
pub mod writer;

pub use dataset::{Col, MeteoDataset, ProfileSeries, YearInput, YearRecord, COLS};
