/// Statistical core of the biomonitoring trend analysis.
///
/// Submodules:
/// - `filter`: per-station aggregation and the count/span/variation filter.
/// - `logit`: sigmoid and log-odds link functions.
/// - `ordinal`: proportional-odds model fitting per station.
/// - `predict`: grade probabilities over a year grid from a fitted model.

pub mod filter;
pub mod logit;
pub mod ordinal;
pub mod predict;

pub use filter::{aggregate, filter_stations, most_recent_records, FilterCriteria, FilterOutcome};
pub use ordinal::{fit_all, fit_station, ConvergenceStatus, FitError, FitOptions, FittedModel, StationFit};
pub use predict::{predict, Prediction, YearGrid};
