use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};

use crate::SearchError;

const BUNDLED_CATALOG: &str = include_str!("../data/nexrad_stations.json");

/// A WSR-88D radar site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above sea level
    pub elevation_m: f64,
}

/// Read-only table of radar sites, in the order they were loaded.
#[derive(Debug, Clone)]
pub struct StationCatalog {
    stations: Vec<Station>,
    index: HashMap<String, usize>,
}

impl StationCatalog {
    /// Builds a catalog, keeping the first entry for any repeated id.
    pub fn new(stations: Vec<Station>) -> Self {
        let mut index = HashMap::with_capacity(stations.len());
        let mut unique = Vec::with_capacity(stations.len());
        for mut station in stations {
            station.station_id = station.station_id.trim().to_uppercase();
            if index.contains_key(&station.station_id) {
                continue;
            }
            index.insert(station.station_id.clone(), unique.len());
            unique.push(station);
        }
        StationCatalog {
            stations: unique,
            index,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, SearchError> {
        let stations: Vec<Station> =
            serde_json::from_str(raw).map_err(|e| SearchError::Catalog(e.to_string()))?;
        Ok(Self::new(stations))
    }

    /// The catalog compiled into the binary
    pub fn bundled() -> Result<Self, SearchError> {
        Self::from_json(BUNDLED_CATALOG)
    }

    pub fn load(path: &Path) -> Result<Self, SearchError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| SearchError::Catalog(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    /// Case-insensitive lookup by station id
    pub fn get(&self, station_id: &str) -> Option<&Station> {
        self.index
            .get(&station_id.trim().to_uppercase())
            .and_then(|i| self.stations.get(*i))
    }

    pub fn contains(&self, station_id: &str) -> bool {
        self.get(station_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}
