//! Analysis report: per-station summaries, model coefficients, predictions
//! and fit diagnostics.
//!
//! The report is written three ways: `report.json` for downstream tooling,
//! `tables.txt` for reading, and `recent_samples.csv` holding the latest
//! sample per station joined with station metadata.

use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::analysis::{ConvergenceStatus, FittedModel, Prediction};
use crate::ingest::csv::quote_field;
use crate::logging::{self, FailureType, Stage};
use crate::model::{AnalysisError, ClassGrade, Result, SampleRecord, StationAggregate, StationInfo};
use crate::stations::StationRegistry;

pub const REPORT_JSON: &str = "report.json";
pub const REPORT_TABLES: &str = "tables.txt";
pub const RECENT_CSV: &str = "recent_samples.csv";

// ============================================================================
// Report Structures
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub generated_at: String,
    pub settings: ReportSettings,
    pub summary: ReportSummary,
    pub stations: Vec<StationRow>,
    pub models: Vec<ModelSummary>,
    pub predictions: Vec<Prediction>,
    pub failures: Vec<FitFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSettings {
    pub sample_type: String,
    pub min_samples: usize,
    pub min_year_span: i32,
    pub reference_year: i32,
    pub prediction_years: Vec<i32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSummary {
    pub samples_loaded: usize,
    pub samples_skipped: usize,
    pub type_matched: usize,
    pub indeterminate_dropped: usize,
    pub stations_observed: usize,
    pub stations_meeting_thresholds: usize,
    pub stations_modelled: usize,
    pub fits_converged: usize,
    pub fits_unreliable: usize,
    pub fits_failed: usize,
}

/// One row of the station table: the aggregate joined with metadata.
#[derive(Debug, Clone, Serialize)]
pub struct StationRow {
    pub station_id: String,
    pub name: Option<String>,
    pub waterbody: Option<String>,
    pub impervious_pct: Option<f64>,
    pub statutory_class: Option<ClassGrade>,
    pub sample_count: usize,
    pub first_year: i32,
    pub last_year: i32,
    pub year_span: i32,
    pub grades: Vec<ClassGrade>,
    /// Share of samples recorded as attaining.
    pub attainment_rate: f64,
    pub modelled: bool,
}

impl StationRow {
    pub fn new(aggregate: &StationAggregate, info: &StationInfo, modelled: bool) -> Self {
        StationRow {
            station_id: aggregate.station_id.clone(),
            name: info.name.clone(),
            waterbody: info.waterbody.clone(),
            impervious_pct: info.impervious_pct,
            statutory_class: info.statutory_class,
            sample_count: aggregate.sample_count,
            first_year: aggregate.first_year,
            last_year: aggregate.last_year,
            year_span: aggregate.year_span,
            grades: aggregate.grades.iter().copied().collect(),
            attainment_rate: if aggregate.sample_count > 0 {
                aggregate.attaining_count as f64 / aggregate.sample_count as f64
            } else {
                0.0
            },
            modelled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub station_id: String,
    pub levels: Vec<ClassGrade>,
    pub cutpoints: Vec<f64>,
    pub cutpoint_std_errors: Vec<f64>,
    pub slope: f64,
    pub slope_std_error: f64,
    pub odds_ratio_per_year: f64,
    pub reference_year: i32,
    pub log_likelihood: f64,
    pub iterations: usize,
    pub n_obs: usize,
    pub convergence_code: i32,
    pub status: ConvergenceStatus,
    pub degenerate: bool,
    pub reliable: bool,
}

impl From<&FittedModel> for ModelSummary {
    fn from(model: &FittedModel) -> Self {
        ModelSummary {
            station_id: model.station_id.clone(),
            levels: model.levels.clone(),
            cutpoints: model.cutpoints.clone(),
            cutpoint_std_errors: model.cutpoint_std_errors.clone(),
            slope: model.slope,
            slope_std_error: model.slope_std_error,
            odds_ratio_per_year: model.odds_ratio_per_year(),
            reference_year: model.reference_year,
            log_likelihood: model.log_likelihood,
            iterations: model.iterations,
            n_obs: model.n_obs,
            convergence_code: model.convergence_code(),
            status: model.status,
            degenerate: model.degenerate,
            reliable: model.is_reliable(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FitFailure {
    pub station_id: String,
    pub error: String,
    pub failure_type: String,
}

impl FitFailure {
    pub fn new(station_id: &str, error: &dyn std::error::Error) -> Self {
        let message = error.to_string();
        let failure_type: FailureType = logging::classify_fit_failure(&message);
        FitFailure {
            station_id: station_id.to_string(),
            error: message,
            failure_type: failure_type.to_string(),
        }
    }
}

impl AnalysisReport {
    /// Models whose estimates should not be relied on: non-zero convergence
    /// code or degenerate estimates.
    pub fn unreliable_models(&self) -> impl Iterator<Item = &ModelSummary> {
        self.models.iter().filter(|m| !m.reliable)
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn fmt_opt_f64(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.*}", precision, v))
}

fn fmt_grades(grades: &[ClassGrade]) -> String {
    grades.iter().map(|g| g.label()).collect::<Vec<_>>().join("/")
}

fn fmt_estimate(value: f64, se: f64) -> String {
    if se.is_finite() {
        format!("{:.3} ({:.3})", value, se)
    } else {
        format!("{:.3} (n/a)", value)
    }
}

/// Renders the station, model and prediction tables plus convergence
/// warnings as plain text.
pub fn render_text_tables(report: &AnalysisReport) -> String {
    let mut out = String::new();
    let rule = "=".repeat(100);

    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "BIOMONITORING TREND REPORT  (sample type {}, k={}, s={}, reference year {})",
        report.settings.sample_type,
        report.settings.min_samples,
        report.settings.min_year_span,
        report.settings.reference_year
    );
    let _ = writeln!(out, "generated {}", report.generated_at);
    let _ = writeln!(out, "{}", rule);

    // --- Stations -----------------------------------------------------------
    let _ = writeln!(out, "\nSTATIONS");
    let _ = writeln!(
        out,
        "{:<12} {:<32} {:>7} {:>11} {:>5} {:<10} {:>7} {:>7} {:>5} {:>8}",
        "Station", "Name", "Samples", "Years", "Span", "Grades", "Attain%", "Imperv%", "Class", "Modelled"
    );
    for row in &report.stations {
        let mut name = row.name.clone().unwrap_or_default();
        if name.chars().count() > 32 {
            name = name.chars().take(31).collect::<String>() + "~";
        }
        let _ = writeln!(
            out,
            "{:<12} {:<32} {:>7} {:>11} {:>5} {:<10} {:>7.1} {:>7} {:>5} {:>8}",
            row.station_id,
            name,
            row.sample_count,
            format!("{}-{}", row.first_year, row.last_year),
            row.year_span,
            fmt_grades(&row.grades),
            row.attainment_rate * 100.0,
            fmt_opt_f64(row.impervious_pct, 1),
            row.statutory_class.map(|c| c.label()).unwrap_or("-"),
            if row.modelled { "yes" } else { "no" }
        );
    }

    // --- Models -------------------------------------------------------------
    let _ = writeln!(out, "\nMODELS  (P(Y <= j) = sigmoid(cutpoint_j - slope * (year - {})))", report.settings.reference_year);
    let _ = writeln!(
        out,
        "{:<12} {:<10} {:<44} {:<20} {:>8} {:>5} {:>5}",
        "Station", "Levels", "Cutpoints (SE)", "Slope (SE)", "OR/yr", "Code", "Iter"
    );
    for model in &report.models {
        let cutpoints = model
            .cutpoints
            .iter()
            .zip(&model.cutpoint_std_errors)
            .map(|(c, se)| fmt_estimate(*c, *se))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            out,
            "{:<12} {:<10} {:<44} {:<20} {:>8.3} {:>5} {:>5}{}",
            model.station_id,
            fmt_grades(&model.levels),
            cutpoints,
            fmt_estimate(model.slope, model.slope_std_error),
            model.odds_ratio_per_year,
            model.convergence_code,
            model.iterations,
            if model.degenerate { "  DEGENERATE" } else { "" }
        );
    }

    // --- Predictions --------------------------------------------------------
    let _ = writeln!(out, "\nPREDICTIONS");
    let _ = writeln!(
        out,
        "{:<12} {:>6} {:>7} {:>7} {:>7} {:>7} {:>9} {:>9}",
        "Station", "Year", "P(NA)", "P(C)", "P(B)", "P(A)", "Predicted", "P(attain)"
    );
    for p in &report.predictions {
        let _ = writeln!(
            out,
            "{:<12} {:>6} {:>7.3} {:>7.3} {:>7.3} {:>7.3} {:>9} {:>9}",
            p.station_id,
            p.year,
            p.probabilities[0],
            p.probabilities[1],
            p.probabilities[2],
            p.probabilities[3],
            p.predicted.label(),
            fmt_opt_f64(p.p_attaining, 3)
        );
    }

    // --- Diagnostics --------------------------------------------------------
    let unreliable: Vec<&ModelSummary> = report.unreliable_models().collect();
    if !unreliable.is_empty() || !report.failures.is_empty() {
        let _ = writeln!(out, "\nWARNINGS");
        for model in unreliable {
            let _ = writeln!(
                out,
                "  {}: convergence code {} ({}){}; estimates are unreliable",
                model.station_id,
                model.convergence_code,
                model.status.describe(),
                if model.degenerate { ", extreme coefficients or standard errors" } else { "" }
            );
        }
        for failure in &report.failures {
            let _ = writeln!(
                out,
                "  {}: not fitted [{}]: {}",
                failure.station_id, failure.failure_type, failure.error
            );
        }
    }

    out
}

/// Serialises the report as pretty-printed JSON. Non-finite numbers are
/// written as `null`.
pub fn to_json(report: &AnalysisReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// CSV of the most recent record per station, joined with station metadata.
pub fn render_recent_csv(records: &[SampleRecord], registry: &StationRegistry) -> String {
    let mut out = String::from(
        "Station,Name,Waterbody,Town,Latitude,Longitude,Imperviousness,Statutory_Class,Sample_ID,Date,Year,Sample_Type,Final_Determination,Attains\n",
    );
    for record in records {
        let info = registry.info_or_bare(&record.station_id);
        let fields = [
            record.station_id.clone(),
            info.name.unwrap_or_default(),
            info.waterbody.unwrap_or_default(),
            info.town.unwrap_or_default(),
            info.latitude.map(|v| v.to_string()).unwrap_or_default(),
            info.longitude.map(|v| v.to_string()).unwrap_or_default(),
            info.impervious_pct.map(|v| v.to_string()).unwrap_or_default(),
            info.statutory_class.map(|c| c.label().to_string()).unwrap_or_default(),
            record.sample_id.clone().unwrap_or_default(),
            record.date.format("%Y-%m-%d").to_string(),
            record.year.to_string(),
            record.sample_type.clone(),
            record.grade.map(|g| g.label().to_string()).unwrap_or_else(|| "Indeterminate".to_string()),
            record.attains.map(|a| if a { "TRUE" } else { "FALSE" }.to_string()).unwrap_or_default(),
        ];
        let line = fields.iter().map(|f| quote_field(f)).collect::<Vec<_>>().join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

// ============================================================================
// Output
// ============================================================================

/// Paths of the files written by `write_outputs`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub json: PathBuf,
    pub tables: PathBuf,
    pub recent_csv: PathBuf,
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| AnalysisError::io(path.display().to_string(), e))
}

/// Writes the JSON report into `dir`, creating it if needed.
pub fn write_json(dir: &Path, report: &AnalysisReport) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| AnalysisError::io(dir.display().to_string(), e))?;
    let path = dir.join(REPORT_JSON);
    write_file(&path, &to_json(report)?)?;
    Ok(path)
}

/// Writes only the most-recent-records CSV into `dir`.
pub fn write_recent_csv(dir: &Path, records: &[SampleRecord], registry: &StationRegistry) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| AnalysisError::io(dir.display().to_string(), e))?;
    let path = dir.join(RECENT_CSV);
    write_file(&path, &render_recent_csv(records, registry))?;
    logging::info(
        Stage::Report,
        None,
        &format!("Wrote {} recent record(s) to {}", records.len(), path.display()),
    );
    Ok(path)
}

/// Writes the JSON report, text tables and recent-records CSV into `dir`,
/// creating it if needed.
pub fn write_outputs(
    dir: &Path,
    report: &AnalysisReport,
    recent: &[SampleRecord],
    registry: &StationRegistry,
) -> Result<OutputPaths> {
    let json = write_json(dir, report)?;

    let tables = dir.join(REPORT_TABLES);
    write_file(&tables, &render_text_tables(report))?;

    let recent_csv = write_recent_csv(dir, recent, registry)?;

    logging::info(Stage::Report, None, &format!("Report written to {}", dir.display()));
    Ok(OutputPaths {
        json,
        tables,
        recent_csv,
    })
}

pub fn print_summary(report: &AnalysisReport) {
    let s = &report.summary;
    println!("\n═══════════════════════════════════════════════════════════");
    println!("📊 ANALYSIS SUMMARY");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!("Samples:   {} loaded, {} skipped, {} of type '{}', {} indeterminate",
        s.samples_loaded, s.samples_skipped, s.type_matched, report.settings.sample_type, s.indeterminate_dropped);
    println!("Stations:  {} observed, {} meet thresholds, {} modelled",
        s.stations_observed, s.stations_meeting_thresholds, s.stations_modelled);
    println!("Models:    {} converged, {} unreliable, {} failed",
        s.fits_converged, s.fits_unreliable, s.fits_failed);

    for model in report.unreliable_models() {
        println!("  ⚠ {}: convergence code {} ({}){}",
            model.station_id,
            model.convergence_code,
            model.status.describe(),
            if model.degenerate { ", degenerate" } else { "" });
    }
    println!("═══════════════════════════════════════════════════════════");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stations::load_stations;
    use chrono::NaiveDate;

    fn model_summary(station: &str, status: ConvergenceStatus, degenerate: bool) -> ModelSummary {
        ModelSummary {
            station_id: station.to_string(),
            levels: vec![ClassGrade::C, ClassGrade::B],
            cutpoints: vec![0.4],
            cutpoint_std_errors: vec![f64::NAN],
            slope: 0.1,
            slope_std_error: 0.02,
            odds_ratio_per_year: 0.1f64.exp(),
            reference_year: 2000,
            log_likelihood: -4.2,
            iterations: 6,
            n_obs: 6,
            convergence_code: status.code(),
            status,
            degenerate,
            reliable: status == ConvergenceStatus::Converged && !degenerate,
        }
    }

    fn report() -> AnalysisReport {
        AnalysisReport {
            generated_at: "2024-05-01T13:00:00+00:00".to_string(),
            settings: ReportSettings {
                sample_type: "MI".to_string(),
                min_samples: 3,
                min_year_span: 5,
                reference_year: 2000,
                prediction_years: vec![2030],
            },
            summary: ReportSummary::default(),
            stations: Vec::new(),
            models: vec![
                model_summary("S-1", ConvergenceStatus::Converged, false),
                model_summary("S-2", ConvergenceStatus::IterationLimit, false),
                model_summary("S-3", ConvergenceStatus::Converged, true),
            ],
            predictions: Vec::new(),
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_unreliable_models_include_nonzero_codes_and_degenerate_fits() {
        let report = report();
        let ids: Vec<&str> = report.unreliable_models().map(|m| m.station_id.as_str()).collect();
        assert_eq!(ids, vec!["S-2", "S-3"]);
    }

    #[test]
    fn test_text_tables_surface_convergence_warnings() {
        let text = render_text_tables(&report());
        assert!(text.contains("WARNINGS"));
        assert!(text.contains("S-2: convergence code 1 (iteration limit reached)"));
        assert!(text.contains("DEGENERATE"));
        assert!(!text.contains("S-1: convergence code"));
    }

    #[test]
    fn test_json_writes_nan_standard_errors_as_null() {
        let json = to_json(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["models"][0]["cutpoint_std_errors"][0].is_null());
        assert_eq!(value["models"][1]["convergence_code"], 1);
        assert_eq!(value["models"][0]["levels"][0], "C");
    }

    #[test]
    fn test_recent_csv_joins_station_metadata_and_quotes() {
        let registry = load_stations(
            "Station,Name,Imperviousness,Statutory_Class\nS-1,\"Long Creek, lower\",12.5,B\n",
        )
        .unwrap();
        let date = NaiveDate::from_ymd_opt(2019, 8, 2).unwrap();
        let records = vec![
            SampleRecord {
                station_id: "S-1".to_string(),
                sample_id: Some("9001".to_string()),
                date,
                year: 2019,
                grade: Some(ClassGrade::NonAttainment),
                attains: Some(false),
                sample_type: "MI".to_string(),
            },
            SampleRecord {
                station_id: "S-2".to_string(),
                sample_id: None,
                date,
                year: 2019,
                grade: None,
                attains: None,
                sample_type: "MI".to_string(),
            },
        ];
        let csv = render_recent_csv(&records, &registry);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[1],
            "S-1,\"Long Creek, lower\",,,,,12.5,B,9001,2019-08-02,2019,MI,NA,FALSE"
        );
        assert_eq!(lines[2], "S-2,,,,,,,,,2019-08-02,2019,MI,Indeterminate,");
    }

    #[test]
    fn test_write_json_round_trips_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), &report()).unwrap();
        assert_eq!(path, dir.path().join(REPORT_JSON));
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["settings"]["sample_type"], "MI");
        assert_eq!(value["models"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_write_outputs_creates_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let paths = write_outputs(&out, &report(), &[], &StationRegistry::default()).unwrap();
        assert!(paths.json.exists());
        assert!(paths.tables.exists());
        assert!(paths.recent_csv.exists());
        let csv = std::fs::read_to_string(&paths.recent_csv).unwrap();
        assert!(csv.starts_with("Station,Name"));
    }
}
