//! Station filtering and aggregation.
//!
//! Restricts the sample table to one sample type, drops indeterminate
//! determinations, summarises each station, and keeps the stations with
//! enough samples over a long enough period whose grade actually changes.
//! Every function here is a pure function of its inputs.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::logging::{self, Stage};
use crate::model::{SampleRecord, StationAggregate};

/// Thresholds a station must meet to be modelled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterCriteria {
    /// Sample type to analyse, matched case-insensitively.
    pub sample_type: String,
    /// Minimum number of graded samples (`k`).
    pub min_samples: usize,
    /// Minimum `last_year - first_year` (`s`).
    pub min_year_span: i32,
}

/// Everything the filter stage produced, kept for the report.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub criteria: FilterCriteria,
    /// Records of the requested sample type, graded or not.
    pub type_matched: usize,
    /// Of those, records dropped as indeterminate.
    pub indeterminate_dropped: usize,
    /// Aggregates for every station with at least one graded sample.
    pub aggregates: BTreeMap<String, StationAggregate>,
    /// Stations meeting the count and span thresholds.
    pub meeting_thresholds: Vec<String>,
    /// Stations meeting the thresholds whose grade varies; these are modelled.
    pub retained: Vec<String>,
    /// Graded records of each retained station, in date order.
    pub records: BTreeMap<String, Vec<SampleRecord>>,
}

impl FilterOutcome {
    pub fn retained_aggregates(&self) -> impl Iterator<Item = &StationAggregate> {
        self.retained.iter().filter_map(|id| self.aggregates.get(id))
    }
}

/// Summarises records per station. Indeterminate records count towards
/// `sample_count` but contribute no grade.
pub fn aggregate(records: &[SampleRecord]) -> BTreeMap<String, StationAggregate> {
    let mut aggregates: BTreeMap<String, StationAggregate> = BTreeMap::new();

    for record in records {
        let entry = aggregates
            .entry(record.station_id.clone())
            .or_insert_with(|| StationAggregate {
                station_id: record.station_id.clone(),
                sample_count: 0,
                first_year: record.year,
                last_year: record.year,
                year_span: 0,
                grades: BTreeSet::new(),
                attaining_count: 0,
            });

        entry.sample_count += 1;
        entry.first_year = entry.first_year.min(record.year);
        entry.last_year = entry.last_year.max(record.year);
        entry.year_span = entry.last_year - entry.first_year;
        if let Some(grade) = record.grade {
            entry.grades.insert(grade);
        }
        if record.attains == Some(true) {
            entry.attaining_count += 1;
        }
    }

    aggregates
}

/// True when the record's type matches `sample_type`, ignoring case and
/// surrounding whitespace.
fn type_matches(record: &SampleRecord, sample_type: &str) -> bool {
    record.sample_type.trim().eq_ignore_ascii_case(sample_type.trim())
}

/// Applies the sample-type, determinacy, count, span and variation filters.
pub fn filter_stations(records: &[SampleRecord], criteria: &FilterCriteria) -> FilterOutcome {
    let typed: Vec<&SampleRecord> = records
        .iter()
        .filter(|r| type_matches(r, &criteria.sample_type))
        .collect();
    let graded: Vec<SampleRecord> = typed
        .iter()
        .filter(|r| r.grade.is_some())
        .map(|r| (*r).clone())
        .collect();
    let indeterminate_dropped = typed.len() - graded.len();

    let aggregates = aggregate(&graded);

    let meeting_thresholds: Vec<String> = aggregates
        .values()
        .filter(|a| a.sample_count >= criteria.min_samples && a.year_span >= criteria.min_year_span)
        .map(|a| a.station_id.clone())
        .collect();

    let varying: BTreeSet<&str> = aggregates
        .values()
        .filter(|a| a.grade_varies())
        .map(|a| a.station_id.as_str())
        .collect();

    let retained: Vec<String> = meeting_thresholds
        .iter()
        .filter(|id| varying.contains(id.as_str()))
        .cloned()
        .collect();

    let mut by_station: BTreeMap<String, Vec<SampleRecord>> = BTreeMap::new();
    for record in graded {
        if retained.binary_search(&record.station_id).is_ok() {
            by_station
                .entry(record.station_id.clone())
                .or_default()
                .push(record);
        }
    }
    for station_records in by_station.values_mut() {
        station_records.sort_by_key(|r| r.date);
    }

    logging::info(
        Stage::Filter,
        None,
        &format!(
            "{} '{}' sample(s), {} indeterminate dropped; {} station(s), {} meet thresholds (k={}, s={}), {} vary",
            typed.len(),
            criteria.sample_type,
            indeterminate_dropped,
            aggregates.len(),
            meeting_thresholds.len(),
            criteria.min_samples,
            criteria.min_year_span,
            retained.len()
        ),
    );

    FilterOutcome {
        criteria: criteria.clone(),
        type_matched: typed.len(),
        indeterminate_dropped,
        aggregates,
        meeting_thresholds,
        retained,
        records: by_station,
    }
}

/// The latest-dated record for each station, ordered by station id.
/// When two records share the latest date the later one in input order wins.
pub fn most_recent_records(records: &[SampleRecord]) -> Vec<SampleRecord> {
    let mut latest: BTreeMap<&str, &SampleRecord> = BTreeMap::new();
    for record in records {
        match latest.get(record.station_id.as_str()) {
            Some(current) if current.date > record.date => {}
            _ => {
                latest.insert(record.station_id.as_str(), record);
            }
        }
    }
    latest.into_values().cloned().collect()
}
