/// Station registry for the biomonitoring trend analysis.
///
/// Holds the station metadata table (name, waterbody, location, watershed
/// imperviousness, statutory class) keyed by station id. This is the single
/// source of station metadata for the report; sample records refer to
/// stations by id only.

use std::collections::BTreeMap;
use std::path::Path;

use crate::ingest::csv::{optional_f64, optional_field, parse_csv_line, Header};
use crate::logging::{self, Stage};
use crate::model::{AnalysisError, ClassGrade, Result, StationInfo};

const STATION_ALIASES: &[&str] = &["Station", "StationID", "Station_ID", "Site", "Site_ID"];
const NAME_ALIASES: &[&str] = &["Name", "Station_Name", "StationName"];
const WATERBODY_ALIASES: &[&str] = &["Waterbody", "Stream", "River"];
const TOWN_ALIASES: &[&str] = &["Town", "Municipality"];
const LAT_ALIASES: &[&str] = &["Latitude", "Lat"];
const LON_ALIASES: &[&str] = &["Longitude", "Lon", "Long"];
const IMPERVIOUS_ALIASES: &[&str] = &["Imperviousness", "Impervious_Pct", "Pct_Impervious", "IC"];
const STATUTORY_ALIASES: &[&str] = &["Statutory_Class", "StatutoryClass", "Class"];

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Station metadata keyed by station id, iterated in id order.
#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: BTreeMap<String, StationInfo>,
}

impl StationRegistry {
    pub fn new(stations: impl IntoIterator<Item = StationInfo>) -> Self {
        StationRegistry {
            stations: stations
                .into_iter()
                .map(|s| (s.station_id.clone(), s))
                .collect(),
        }
    }

    /// Looks up a station by id. Returns `None` if not found.
    pub fn find_station(&self, station_id: &str) -> Option<&StationInfo> {
        self.stations.get(station_id)
    }

    /// Station metadata for `station_id`, or a bare entry carrying only the
    /// id when the station table has no row for it.
    pub fn info_or_bare(&self, station_id: &str) -> StationInfo {
        self.find_station(station_id)
            .cloned()
            .unwrap_or_else(|| StationInfo::bare(station_id))
    }

    pub fn all_station_ids(&self) -> Vec<&str> {
        self.stations.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationInfo> {
        self.stations.values()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Loads the station table from CSV text. Only the station id column is
/// required; rows with a blank id are skipped. A later row with the same id
/// replaces an earlier one.
pub fn load_stations(text: &str) -> Result<StationRegistry> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header_line = lines
        .next()
        .ok_or_else(|| AnalysisError::EmptyInput("station table".to_string()))?;
    let header = Header::parse(header_line, "station");

    let id_col = header.require("station", STATION_ALIASES)?;
    let name_col = header.find(NAME_ALIASES);
    let waterbody_col = header.find(WATERBODY_ALIASES);
    let town_col = header.find(TOWN_ALIASES);
    let lat_col = header.find(LAT_ALIASES);
    let lon_col = header.find(LON_ALIASES);
    let impervious_col = header.find(IMPERVIOUS_ALIASES);
    let statutory_col = header.find(STATUTORY_ALIASES);

    let mut stations = Vec::new();
    for line in lines {
        let fields = parse_csv_line(line);
        let Some(station_id) = optional_field(&fields, Some(id_col)) else {
            continue;
        };

        let statutory_class = match optional_field(&fields, statutory_col) {
            Some(raw) => ClassGrade::parse_label(raw).unwrap_or_else(|e| {
                logging::warn(Stage::Load, Some(station_id), &e.to_string());
                None
            }),
            None => None,
        };

        stations.push(StationInfo {
            station_id: station_id.to_string(),
            name: optional_field(&fields, name_col).map(String::from),
            waterbody: optional_field(&fields, waterbody_col).map(String::from),
            town: optional_field(&fields, town_col).map(String::from),
            latitude: optional_f64(&fields, lat_col),
            longitude: optional_f64(&fields, lon_col),
            impervious_pct: optional_f64(&fields, impervious_col),
            statutory_class,
        });
    }

    Ok(StationRegistry::new(stations))
}

/// Reads and loads the station table at `path`.
pub fn load_stations_file(path: &Path) -> Result<StationRegistry> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AnalysisError::io(path.display().to_string(), e))?;
    let registry = load_stations(&text)?;
    logging::info(
        Stage::Load,
        None,
        &format!("Loaded {} station(s) from {}", registry.len(), path.display()),
    );
    Ok(registry)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const STATION_CSV: &str = "\
Station,Name,Waterbody,Town,Latitude,Longitude,Imperviousness,Statutory_Class
S-56,\"Capisic Brook, below Rt 302\",Capisic Brook,Portland,43.6723,-70.3091,18.2%,C
S-71,Mill Brook at Westbrook,Mill Brook,Westbrook,43.69,-70.36,4.1,B
S-90,Upper Pleasant River,Pleasant River,,,,,A
,orphan row,,,,,,
";

    fn registry() -> StationRegistry {
        load_stations(STATION_CSV).expect("station table should load")
    }

    #[test]
    fn test_blank_station_ids_are_skipped() {
        assert_eq!(registry().len(), 3);
    }

    #[test]
    fn test_find_station_returns_correct_entry() {
        let registry = registry();
        let station = registry.find_station("S-56").expect("S-56 should be in registry");
        assert_eq!(station.name.as_deref(), Some("Capisic Brook, below Rt 302"));
        assert_eq!(station.impervious_pct, Some(18.2));
        assert_eq!(station.statutory_class, Some(ClassGrade::C));
    }

    #[test]
    fn test_find_station_returns_none_for_unknown_id() {
        assert!(registry().find_station("S-00").is_none());
    }

    #[test]
    fn test_missing_optional_fields_are_none() {
        let registry = registry();
        let station = registry.find_station("S-90").unwrap();
        assert_eq!(station.town, None);
        assert_eq!(station.latitude, None);
        assert_eq!(station.impervious_pct, None);
        assert_eq!(station.statutory_class, Some(ClassGrade::A));
    }

    #[test]
    fn test_all_station_ids_are_sorted() {
        assert_eq!(registry().all_station_ids(), vec!["S-56", "S-71", "S-90"]);
    }

    #[test]
    fn test_info_or_bare_falls_back_to_id_only() {
        let info = registry().info_or_bare("S-12");
        assert_eq!(info, StationInfo::bare("S-12"));
    }

    #[test]
    fn test_station_table_requires_station_column() {
        let err = load_stations("Name,Town\nx,y\n").unwrap_err();
        assert!(matches!(err, AnalysisError::MissingColumn { table: "station", .. }));
    }

    #[test]
    fn test_latitudes_are_plausible_where_defined() {
        for station in registry().iter() {
            if let Some(lat) = station.latitude {
                assert!((-90.0..=90.0).contains(&lat), "latitude out of range for '{}'", station.station_id);
            }
        }
    }
}
