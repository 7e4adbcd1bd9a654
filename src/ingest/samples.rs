/// Sample table loader.
///
/// Reads the biomonitoring sample export, resolves its columns by alias,
/// parses dates and determinations, and derives the sample year.
/// Malformed rows are skipped and counted rather than failing the load.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::path::Path;

use super::csv::{optional_field, parse_csv_line, Header};
use crate::logging::{self, Stage};
use crate::model::{AnalysisError, ClassGrade, Result, SampleRecord};

const STATION_ALIASES: &[&str] = &["Station", "StationID", "Station_ID", "Site", "Site_ID"];
const DATE_ALIASES: &[&str] = &["Date", "SampleDate", "Sample_Date", "Collection_Date"];
const CLASS_ALIASES: &[&str] = &[
    "Final_Determination",
    "FinalDetermination",
    "Determination",
    "Class",
    "Grade",
];
const ATTAINS_ALIASES: &[&str] = &["Attains", "Attainment", "Attains_Class"];
const TYPE_ALIASES: &[&str] = &["Sample_Type", "SampleType", "Type"];
const SAMPLE_ID_ALIASES: &[&str] = &["Sample_ID", "SampleID", "Sample_Number"];

/// Date formats seen in the exports, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M"];

/// Result of loading the sample table.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLoad {
    pub records: Vec<SampleRecord>,
    /// Data rows dropped because of an empty station id, an unparseable date
    /// or an unrecognised determination.
    pub skipped: usize,
}

/// Parses a sample date in any of the accepted formats.
pub fn parse_sample_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Parses an attainment flag. Unknown spellings are treated as missing.
pub fn parse_attains(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "attains" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "does not attain" => Some(false),
        _ => None,
    }
}

/// Loads sample records from CSV text.
pub fn load_samples(text: &str) -> Result<SampleLoad> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header_line = lines
        .next()
        .ok_or_else(|| AnalysisError::EmptyInput("sample table".to_string()))?;
    let header = Header::parse(header_line, "sample");

    let station_col = header.require("station", STATION_ALIASES)?;
    let date_col = header.require("date", DATE_ALIASES)?;
    let class_col = header.require("class", CLASS_ALIASES)?;
    let type_col = header.require("sample type", TYPE_ALIASES)?;
    let attains_col = header.find(ATTAINS_ALIASES);
    let sample_id_col = header.find(SAMPLE_ID_ALIASES);

    let mut records = Vec::new();
    let mut skipped = 0;

    for (row, line) in lines.enumerate() {
        let fields = parse_csv_line(line);

        let Some(station_id) = optional_field(&fields, Some(station_col)) else {
            skipped += 1;
            continue;
        };

        let raw_date = optional_field(&fields, Some(date_col)).unwrap_or_default();
        let Some(date) = parse_sample_date(raw_date) else {
            logging::debug(
                Stage::Load,
                Some(station_id),
                &format!("row {}: unparseable date '{}'", row + 2, raw_date),
            );
            skipped += 1;
            continue;
        };

        let raw_class = fields.get(class_col).map(String::as_str).unwrap_or_default();
        let grade = match ClassGrade::parse_label(raw_class) {
            Ok(grade) => grade,
            Err(e) => {
                logging::debug(Stage::Load, Some(station_id), &format!("row {}: {}", row + 2, e));
                skipped += 1;
                continue;
            }
        };

        records.push(SampleRecord {
            station_id: station_id.to_string(),
            sample_id: optional_field(&fields, sample_id_col).map(String::from),
            date,
            year: date.year(),
            grade,
            attains: optional_field(&fields, attains_col).and_then(parse_attains),
            sample_type: optional_field(&fields, Some(type_col))
                .unwrap_or_default()
                .to_string(),
        });
    }

    if skipped > 0 {
        logging::warn(
            Stage::Load,
            None,
            &format!("Skipped {} malformed sample row(s)", skipped),
        );
    }

    Ok(SampleLoad { records, skipped })
}

/// Reads and loads the sample table at `path`.
pub fn load_samples_file(path: &Path) -> Result<SampleLoad> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AnalysisError::io(path.display().to_string(), e))?;
    let load = load_samples(&text)?;
    logging::info(
        Stage::Load,
        None,
        &format!("Loaded {} sample(s) from {}", load.records.len(), path.display()),
    );
    Ok(load)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
