/// Run configuration for the biomonitoring trend analysis.
///
/// Settings come from three layers, later layers winning:
///   1. a TOML file (`biomon.toml` by default), every key optional
///   2. environment variables, including any `.env` file loaded by `dotenv`
///   3. command-line flags, applied by the binary
///
/// # Environment injection
/// `apply_env_overrides_with` takes a lookup function rather than reading the
/// process environment directly, so tests stay deterministic without
/// mutating global state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analysis::{FilterCriteria, FitOptions, YearGrid};
use crate::logging::LogLevel;
use crate::model::{AnalysisError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "biomon.toml";

pub const ENV_SAMPLES: &str = "BIOMON_SAMPLES";
pub const ENV_STATIONS: &str = "BIOMON_STATIONS";
pub const ENV_OUTPUT_DIR: &str = "BIOMON_OUTPUT_DIR";
pub const ENV_LOG_FILE: &str = "BIOMON_LOG_FILE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub samples_path: PathBuf,
    pub stations_path: PathBuf,
    pub output_dir: PathBuf,
    /// Sample type code to analyse, e.g. `MI` for macroinvertebrates.
    pub sample_type: String,
    pub min_samples: usize,
    pub min_year_span: i32,
    /// Year subtracted from sample years before fitting.
    pub reference_year: i32,
    pub prediction: YearGrid,
    pub fit: FitOptions,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            samples_path: PathBuf::from("data/samples.csv"),
            stations_path: PathBuf::from("data/stations.csv"),
            output_dir: PathBuf::from("output"),
            sample_type: "MI".to_string(),
            min_samples: 3,
            min_year_span: 5,
            reference_year: 2000,
            prediction: YearGrid::default(),
            fit: FitOptions::default(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AnalysisError::Config(e.to_string()))
    }

    /// Loads `path` if given, otherwise `biomon.toml` in the working
    /// directory if it exists, otherwise the defaults. An explicitly named
    /// file that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(AnalysisConfig::default());
                }
                default
            }
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| AnalysisError::io(path.display().to_string(), e))?;
        Self::from_toml_str(&text)
    }

    /// Applies overrides from the process environment after loading `.env`.
    pub fn apply_env_overrides(&mut self) {
        dotenv::dotenv().ok();
        self.apply_env_overrides_with(|key| std::env::var(key).ok());
    }

    pub fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty(ENV_SAMPLES) {
            self.samples_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty(ENV_STATIONS) {
            self.stations_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty(ENV_LOG_FILE) {
            self.log_file = Some(PathBuf::from(v));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_type.trim().is_empty() {
            return Err(AnalysisError::Config("sample_type must not be empty".into()));
        }
        if self.min_samples < 1 {
            return Err(AnalysisError::Config("min_samples must be at least 1".into()));
        }
        if self.min_year_span < 0 {
            return Err(AnalysisError::Config("min_year_span must not be negative".into()));
        }
        if self.prediction.step < 1 {
            return Err(AnalysisError::Config("prediction.step must be at least 1".into()));
        }
        if self.prediction.start_year > self.prediction.end_year {
            return Err(AnalysisError::Config(format!(
                "prediction.start_year {} is after end_year {}",
                self.prediction.start_year, self.prediction.end_year
            )));
        }
        if !(self.fit.tolerance > 0.0) {
            return Err(AnalysisError::Config("fit.tolerance must be positive".into()));
        }
        if self.fit.max_iterations == 0 {
            return Err(AnalysisError::Config("fit.max_iterations must be at least 1".into()));
        }
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<LogLevel> {
        self.log_level.parse().map_err(AnalysisError::Config)
    }

    pub fn criteria(&self) -> FilterCriteria {
        FilterCriteria {
            sample_type: self.sample_type.clone(),
            min_samples: self.min_samples,
            min_year_span: self.min_year_span,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
