/// End-to-end analysis run: filter, fit, predict, assemble the report.
///
/// Loading happens before this module and writing after it, so a run over
/// in-memory records is fully deterministic apart from the report
/// timestamp, which is injected.

use chrono::{DateTime, Utc};

use crate::analysis::{
    filter_stations, fit_all, most_recent_records, predict, FilterOutcome, Prediction, StationFit,
};
use crate::config::AnalysisConfig;
use crate::ingest::SampleLoad;
use crate::logging::{self, Stage};
use crate::model::SampleRecord;
use crate::report::{
    AnalysisReport, FitFailure, ModelSummary, ReportSettings, ReportSummary, StationRow,
};
use crate::stations::StationRegistry;

/// Intermediate products of a run, kept alongside the report.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub filter: FilterOutcome,
    pub fits: Vec<StationFit>,
    pub report: AnalysisReport,
}

/// Records of the configured sample type reduced to the latest per station.
/// Indeterminate samples are included; they are still the latest visit.
pub fn recent_records(config: &AnalysisConfig, samples: &[SampleRecord]) -> Vec<SampleRecord> {
    let typed: Vec<SampleRecord> = samples
        .iter()
        .filter(|r| r.sample_type.trim().eq_ignore_ascii_case(config.sample_type.trim()))
        .cloned()
        .collect();
    most_recent_records(&typed)
}

/// Runs the analysis with the current time as the report timestamp.
pub fn run_analysis(config: &AnalysisConfig, samples: &SampleLoad, registry: &StationRegistry) -> AnalysisRun {
    run_analysis_at(config, samples, registry, Utc::now())
}

pub fn run_analysis_at(
    config: &AnalysisConfig,
    samples: &SampleLoad,
    registry: &StationRegistry,
    now: DateTime<Utc>,
) -> AnalysisRun {
    let filter = filter_stations(&samples.records, &config.criteria());
    let fits = fit_all(&filter, config.reference_year, &config.fit);
    let years = config.prediction.years();

    let mut models = Vec::new();
    let mut predictions: Vec<Prediction> = Vec::new();
    let mut failures = Vec::new();

    for fit in &fits {
        match &fit.result {
            Ok(model) => {
                let statutory = registry
                    .find_station(&fit.station_id)
                    .and_then(|s| s.statutory_class);
                predictions.extend(predict(model, &years, statutory));
                models.push(ModelSummary::from(model));
            }
            Err(e) => failures.push(FitFailure::new(&fit.station_id, e)),
        }
    }
    logging::info(
        Stage::Predict,
        None,
        &format!(
            "{} prediction(s) for {} model(s) over {} year(s)",
            predictions.len(),
            models.len(),
            years.len()
        ),
    );

    let stations: Vec<StationRow> = filter
        .aggregates
        .values()
        .map(|aggregate| {
            let info = registry.info_or_bare(&aggregate.station_id);
            let modelled = filter.retained.contains(&aggregate.station_id);
            StationRow::new(aggregate, &info, modelled)
        })
        .collect();

    let summary = ReportSummary {
        samples_loaded: samples.records.len(),
        samples_skipped: samples.skipped,
        type_matched: filter.type_matched,
        indeterminate_dropped: filter.indeterminate_dropped,
        stations_observed: filter.aggregates.len(),
        stations_meeting_thresholds: filter.meeting_thresholds.len(),
        stations_modelled: filter.retained.len(),
        fits_converged: models.iter().filter(|m| m.reliable).count(),
        fits_unreliable: models.iter().filter(|m| !m.reliable).count(),
        fits_failed: failures.len(),
    };

    let report = AnalysisReport {
        generated_at: now.to_rfc3339(),
        settings: ReportSettings {
            sample_type: config.sample_type.clone(),
            min_samples: config.min_samples,
            min_year_span: config.min_year_span,
            reference_year: config.reference_year,
            prediction_years: years,
        },
        summary,
        stations,
        models,
        predictions,
        failures,
    };

    AnalysisRun {
        filter,
        fits,
        report,
    }
}
