//! Biomonitoring trend analysis.
//!
//! Loads stream biomonitoring samples and station metadata, keeps the
//! stations with enough samples over a long enough period whose grade
//! changes, fits a proportional-odds ordinal regression of grade on year per
//! station, and reports predicted grade probabilities over a future year
//! grid.
//!
//! Modules:
//! - `model`: shared domain types and errors.
//! - `ingest` / `stations`: CSV loading of samples and station metadata.
//! - `analysis`: filtering, model fitting and prediction.
//! - `pipeline`: one full run from loaded inputs to report.
//! - `report`: JSON, text-table and CSV outputs.
//! - `config` / `logging`: run settings and structured log output.

pub mod analysis;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod stations;
