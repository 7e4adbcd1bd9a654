/// Integration tests for the full analysis pipeline
///
/// These tests verify:
/// 1. Sample and station tables load from files on disk
/// 2. Filtering keeps only stations with enough, long-running, varying data
/// 3. Each kept station gets a model; unreliable fits are reported, not hidden
/// 4. Predictions cover the configured year grid and are proper distributions
/// 5. Report, tables and recent-sample CSV are written to the output directory
///
/// Run with: cargo test --test pipeline_integration

use biomon_trends::analysis::{ConvergenceStatus, YearGrid};
use biomon_trends::config::AnalysisConfig;
use biomon_trends::ingest::load_samples_file;
use biomon_trends::model::ClassGrade;
use biomon_trends::pipeline::{recent_records, run_analysis_at, AnalysisRun};
use biomon_trends::report::{render_text_tables, write_outputs};
use biomon_trends::stations::{load_stations_file, StationRegistry};

use chrono::{TimeZone, Utc};
use std::path::Path;

// ---------------------------------------------------------------------------
// Test Fixtures
// ---------------------------------------------------------------------------

const STATIONS_CSV: &str = "\
Station,Name,Waterbody,Town,Latitude,Longitude,Imperviousness,Statutory_Class
S-10,\"Stroudwater River, upper\",Stroudwater River,Gorham,43.68,-70.40,3.2,B
S-20,Mill Brook,Mill Brook,Westbrook,43.69,-70.36,6.8,B
S-30,Long Creek at Rt 1,Long Creek,South Portland,43.63,-70.31,28.5,C
S-40,Red Brook,Red Brook,Scarborough,43.61,-70.33,11.0,C
";

fn samples_csv() -> String {
    let mut rows = vec!["Station,Sample_ID,Date,Sample_Type,Final_Determination,Attains".to_string()];
    let mut id = 100;
    let mut push = |station: &str, date: &str, kind: &str, class: &str, attains: &str| {
        id += 1;
        rows.push(format!("{},{},{},{},{},{}", station, id, date, kind, class, attains));
    };

    // S-10: improving, grades overlap in time
    for (year, class) in [
        (2000, "C"), (2001, "NA"), (2002, "C"), (2003, "B"), (2004, "C"), (2005, "B"), (2006, "C"),
        (2007, "B"), (2008, "A"), (2009, "B"), (2010, "A"), (2011, "B"), (2012, "A"),
    ] {
        let attains = if class == "A" || class == "B" { "TRUE" } else { "FALSE" };
        push("S-10", &format!("{}-08-15", year), "MI", class, attains);
    }
    push("S-10", "2013-08-15", "MI", "Indeterminate", "");

    // S-20: long record, never changes grade
    for year in [2001, 2005, 2009, 2013] {
        push("S-20", &format!("{}-07-20", year), "MI", "B", "TRUE");
    }

    // S-30: perfectly separable, C early and A late
    for year in [2000, 2001, 2002, 2003] {
        push("S-30", &format!("08/01/{}", year), "MI", "C", "TRUE");
    }
    for year in [2007, 2008, 2009, 2010] {
        push("S-30", &format!("08/01/{}", year), "MI", "A", "TRUE");
    }

    // S-40: too few samples
    push("S-40", "2002-09-01", "MI", "NA", "FALSE");
    push("S-40", "2012-09-01", "MI", "C", "TRUE");

    // other sample types and a malformed row
    push("S-20", "2014-07-20", "Algae", "NA", "FALSE");
    push("S-20", "sometime", "MI", "B", "TRUE");

    rows.join("\n") + "\n"
}

fn config(dir: &Path) -> AnalysisConfig {
    AnalysisConfig {
        samples_path: dir.join("samples.csv"),
        stations_path: dir.join("stations.csv"),
        output_dir: dir.join("out"),
        sample_type: "MI".to_string(),
        min_samples: 3,
        min_year_span: 5,
        reference_year: 2000,
        prediction: YearGrid {
            start_year: 2025,
            end_year: 2050,
            step: 5,
        },
        ..AnalysisConfig::default()
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    config: AnalysisConfig,
    registry: StationRegistry,
    run: AnalysisRun,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(dir.path().join("samples.csv"), samples_csv()).unwrap();
    std::fs::write(dir.path().join("stations.csv"), STATIONS_CSV).unwrap();

    let config = config(dir.path());
    config.validate().expect("fixture config should be valid");

    let samples = load_samples_file(&config.samples_path).expect("samples should load");
    let registry = load_stations_file(&config.stations_path).expect("stations should load");
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
    let run = run_analysis_at(&config, &samples, &registry, now);

    Fixture {
        _dir: dir,
        config,
        registry,
        run,
    }
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

#[test]
fn test_only_varying_long_running_stations_are_modelled() {
    let f = fixture();
    assert_eq!(f.run.filter.meeting_thresholds, vec!["S-10", "S-20", "S-30"]);
    assert_eq!(f.run.filter.retained, vec!["S-10", "S-30"]);
}

#[test]
fn test_summary_counts_every_stage() {
    let f = fixture();
    let s = &f.run.report.summary;
    assert_eq!(s.samples_skipped, 1, "malformed date row");
    assert_eq!(s.samples_loaded, 13 + 1 + 4 + 8 + 2 + 1);
    assert_eq!(s.type_matched, 13 + 1 + 4 + 8 + 2);
    assert_eq!(s.indeterminate_dropped, 1);
    assert_eq!(s.stations_observed, 4);
    assert_eq!(s.stations_meeting_thresholds, 3);
    assert_eq!(s.stations_modelled, 2);
}

#[test]
fn test_retained_stations_satisfy_thresholds() {
    let f = fixture();
    for aggregate in f.run.filter.retained_aggregates() {
        assert!(aggregate.sample_count >= f.config.min_samples);
        assert!(aggregate.year_span >= f.config.min_year_span);
        assert!(aggregate.grades.len() >= 2);
    }
}

// ---------------------------------------------------------------------------
// Fitting
// ---------------------------------------------------------------------------

#[test]
fn test_improving_station_fits_cleanly() {
    let f = fixture();
    let model = f
        .run
        .report
        .models
        .iter()
        .find(|m| m.station_id == "S-10")
        .expect("S-10 should be modelled");
    assert_eq!(model.convergence_code, 0);
    assert_eq!(model.status, ConvergenceStatus::Converged);
    assert!(model.reliable);
    assert!(model.slope > 0.0);
    assert_eq!(
        model.levels,
        vec![ClassGrade::NonAttainment, ClassGrade::C, ClassGrade::B, ClassGrade::A]
    );
    assert_eq!(model.n_obs, 13, "indeterminate sample must not be modelled");
}

#[test]
fn test_separable_station_is_reported_as_unreliable() {
    let f = fixture();
    let model = f
        .run
        .report
        .models
        .iter()
        .find(|m| m.station_id == "S-30")
        .expect("S-30 should still produce a model");
    assert!(!model.reliable);
    assert!(model.convergence_code != 0 || model.degenerate);

    let unreliable: Vec<&str> = f.run.report.unreliable_models().map(|m| m.station_id.as_str()).collect();
    assert_eq!(unreliable, vec!["S-30"]);
    assert_eq!(f.run.report.summary.fits_converged, 1);
    assert_eq!(f.run.report.summary.fits_unreliable, 1);
    assert_eq!(f.run.report.summary.fits_failed, 0);

    let tables = render_text_tables(&f.run.report);
    assert!(tables.contains("WARNINGS"));
    assert!(tables.contains("S-30: convergence code"));
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

#[test]
fn test_predictions_cover_year_grid_for_each_model() {
    let f = fixture();
    let years = f.config.prediction.years();
    assert_eq!(f.run.report.settings.prediction_years, years);
    assert_eq!(f.run.report.predictions.len(), years.len() * 2);

    for prediction in &f.run.report.predictions {
        let total: f64 = prediction.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(prediction.probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
    }
}

#[test]
fn test_improving_station_is_predicted_to_reach_a() {
    let f = fixture();
    let last = f
        .run
        .report
        .predictions
        .iter()
        .filter(|p| p.station_id == "S-10")
        .last()
        .expect("S-10 predictions");
    assert_eq!(last.year, 2050);
    assert_eq!(last.predicted, ClassGrade::A);
    // statutory class B comes from the station table
    let p = last.p_attaining.expect("statutory class is known");
    assert!((p - (last.probability_of(ClassGrade::B) + last.probability_of(ClassGrade::A))).abs() < 1e-12);
}

#[test]
fn test_unobserved_grades_get_zero_probability() {
    let f = fixture();
    for prediction in f.run.report.predictions.iter().filter(|p| p.station_id == "S-30") {
        assert_eq!(prediction.probability_of(ClassGrade::NonAttainment), 0.0);
        assert_eq!(prediction.probability_of(ClassGrade::B), 0.0);
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[test]
fn test_outputs_are_written() {
    let f = fixture();
    let samples = load_samples_file(&f.config.samples_path).unwrap();
    let recent = recent_records(&f.config, &samples.records);
    let paths = write_outputs(&f.config.output_dir, &f.run.report, &recent, &f.registry)
        .expect("outputs should be written");

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.json).unwrap()).unwrap();
    assert_eq!(json["generated_at"], "2024-05-01T13:00:00+00:00");
    assert_eq!(json["models"].as_array().unwrap().len(), 2);

    let csv = std::fs::read_to_string(&paths.recent_csv).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 5, "header plus one row per station");
    assert!(lines[1].starts_with("S-10,\"Stroudwater River, upper\""));
    assert!(lines[1].contains("2013-08-15"));
    assert!(lines[1].contains("Indeterminate"));
    // the algae sample is newer but of another type
    assert!(lines[2].starts_with("S-20,") && lines[2].contains("2013-07-20"));
}
