/// Core data types for the biomonitoring trend analysis.
///
/// This module defines the shared domain model imported by all other modules:
/// classification grades, sample records, station metadata and the per-station
/// aggregates derived from them. It contains no I/O.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Classification grades
// ---------------------------------------------------------------------------

/// Biological classification grade assigned to a sample.
///
/// Grades are ordered from worst to best:
///   NA (non-attainment) < C < B < A
///
/// The derive order of the variants is the ordinal order used by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ClassGrade {
    #[serde(rename = "NA")]
    NonAttainment,
    C,
    B,
    A,
}

impl ClassGrade {
    /// All grades in ascending order.
    pub const ALL: [ClassGrade; 4] = [
        ClassGrade::NonAttainment,
        ClassGrade::C,
        ClassGrade::B,
        ClassGrade::A,
    ];

    /// Position of the grade in `ClassGrade::ALL`.
    pub fn index(self) -> usize {
        match self {
            ClassGrade::NonAttainment => 0,
            ClassGrade::C => 1,
            ClassGrade::B => 2,
            ClassGrade::A => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ClassGrade::NonAttainment => "NA",
            ClassGrade::C => "C",
            ClassGrade::B => "B",
            ClassGrade::A => "A",
        }
    }

    /// Parses a determination label.
    ///
    /// Returns `Ok(None)` for indeterminate labels (`I`, `Indeterminate`,
    /// `NULL` or empty) and `Err` for anything unrecognised.
    pub fn parse_label(raw: &str) -> Result<Option<ClassGrade>> {
        let label = raw.trim();
        match label.to_ascii_uppercase().as_str() {
            "NA" => Ok(Some(ClassGrade::NonAttainment)),
            "C" => Ok(Some(ClassGrade::C)),
            "B" => Ok(Some(ClassGrade::B)),
            "A" => Ok(Some(ClassGrade::A)),
            "" | "I" | "INDETERMINATE" | "NULL" => Ok(None),
            _ => Err(AnalysisError::Parse(format!(
                "unrecognised class label '{}'",
                label
            ))),
        }
    }
}

impl fmt::Display for ClassGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// A single biomonitoring sample as loaded from the sample table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    pub station_id: String,
    pub sample_id: Option<String>,
    pub date: NaiveDate,
    /// Calendar year derived from `date`.
    pub year: i32,
    /// `None` when the determination was indeterminate.
    pub grade: Option<ClassGrade>,
    /// Whether the sample met the station's statutory class, if recorded.
    pub attains: Option<bool>,
    pub sample_type: String,
}

/// Metadata for a monitoring station, from the station table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationInfo {
    pub station_id: String,
    pub name: Option<String>,
    pub waterbody: Option<String>,
    pub town: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Percent impervious cover of the upstream watershed.
    pub impervious_pct: Option<f64>,
    /// Class the station is legally required to attain.
    pub statutory_class: Option<ClassGrade>,
}

impl StationInfo {
    pub fn bare(station_id: &str) -> Self {
        StationInfo {
            station_id: station_id.to_string(),
            name: None,
            waterbody: None,
            town: None,
            latitude: None,
            longitude: None,
            impervious_pct: None,
            statutory_class: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Per-station summary recomputed on every run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationAggregate {
    pub station_id: String,
    pub sample_count: usize,
    pub first_year: i32,
    pub last_year: i32,
    pub year_span: i32,
    pub grades: BTreeSet<ClassGrade>,
    /// Samples recorded as attaining (`attains == Some(true)`).
    pub attaining_count: usize,
}

impl StationAggregate {
    /// True when more than one distinct grade has been observed.
    pub fn grade_varies(&self) -> bool {
        self.grades.len() >= 2
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while loading inputs, reading configuration or writing
/// outputs. Model fitting failures are reported separately per station.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A required column could not be resolved from the header row.
    #[error("{table} table is missing required column '{column}'")]
    MissingColumn { table: &'static str, column: &'static str },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No usable rows in {0}")]
    EmptyInput(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        AnalysisError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
