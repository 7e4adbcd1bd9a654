/// Input loaders for the analysis.
///
/// Submodules:
/// - `csv`: field splitting, quoting and header alias resolution.
/// - `samples`: the biomonitoring sample table.
///
/// The station table loader lives in `crate::stations` alongside the
/// registry it produces.

pub mod csv;
pub mod samples;

pub use samples::{load_samples, load_samples_file, SampleLoad};
