use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slog::{debug, error, info, Logger};
use std::{io, sync::Arc};

use crate::{ArchiveError, HttpFetcher, RetryPolicy};

pub const IEM_NETWORK_URL: &str = "https://mesonet.agron.iastate.edu/geojson/network";

pub const DEFAULT_STATES: [&str; 50] = [
    "AK", "AL", "AR", "AZ", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "IA", "ID", "IL", "IN",
    "KS", "KY", "LA", "MA", "MD", "ME", "MI", "MN", "MO", "MS", "MT", "NC", "ND", "NE", "NH",
    "NJ", "NM", "NV", "NY", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VA",
    "VT", "WA", "WI", "WV", "WY",
];

/// A surface observing station listed in one IEM network
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkStation {
    pub network: String,
    pub station_id: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation_m: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(default)]
    coordinates: Vec<f64>,
}

/// IEM network names for the given states. Iowa keeps its AWOS sites in a
/// network of their own.
pub fn network_names(states: &[String]) -> Vec<String> {
    let mut networks = vec![];
    for state in states {
        let state = state.trim().to_uppercase();
        if state.is_empty() {
            continue;
        }
        networks.push(format!("{}_ASOS", state));
        if state == "IA" {
            networks.push("AWOS".to_string());
        }
    }
    networks
}

pub fn parse_network(network: &str, raw: &str) -> Result<Vec<NetworkStation>, ArchiveError> {
    let collection: FeatureCollection = serde_json::from_str(raw)
        .map_err(|e| ArchiveError::Malformed(format!("{} network: {}", network, e)))?;

    Ok(collection
        .features
        .into_iter()
        .filter_map(|feature| {
            let station_id = text_property(&feature.properties, "sid")?;
            let name = text_property(&feature.properties, "sname").unwrap_or_default();
            let elevation_m = number_property(&feature.properties, "elevation");
            let (longitude, latitude) = match feature.geometry {
                Some(Geometry { coordinates }) if coordinates.len() >= 2 => {
                    (Some(coordinates[0]), Some(coordinates[1]))
                }
                _ => (None, None),
            };
            Some(NetworkStation {
                network: network.to_string(),
                station_id,
                name,
                latitude,
                longitude,
                elevation_m,
            })
        })
        .collect())
}

fn text_property(properties: &serde_json::Map<String, Value>, name: &str) -> Option<String> {
    match properties.get(name)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

fn number_property(properties: &serde_json::Map<String, Value>, name: &str) -> Option<f64> {
    match properties.get(name)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Writes stations as CSV with a header row taken from the field names
pub fn write_stations_csv<W: io::Write>(
    out: W,
    stations: &[NetworkStation],
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    for station in stations {
        writer.serialize(station)?;
    }
    writer.flush()?;
    Ok(())
}

/// Where network listings are read from
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_document(&self, url: &str) -> Result<String, ArchiveError>;
}

#[async_trait]
impl DocumentSource for HttpFetcher {
    async fn fetch_document(&self, url: &str) -> Result<String, ArchiveError> {
        self.fetch_text(url, &[]).await
    }
}

pub struct AsosService {
    logger: Logger,
    fetcher: Arc<dyn DocumentSource>,
    retry: RetryPolicy,
    base_url: String,
}

impl AsosService {
    pub fn new(logger: Logger, fetcher: Arc<dyn DocumentSource>, retry: RetryPolicy) -> Self {
        Self {
            logger,
            fetcher,
            retry,
            base_url: IEM_NETWORK_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Stations of every requested state, network by network. A network that
    /// cannot be fetched is logged and left out.
    pub async fn get_network_stations(&self, states: &[String]) -> Vec<NetworkStation> {
        let mut stations = vec![];
        for network in network_names(states) {
            let url = format!("{}/{}.geojson", self.base_url, network);
            let raw = match self
                .retry
                .run(&self.logger, &network, || self.fetcher.fetch_document(&url))
                .await
            {
                Ok(raw) => raw,
                Err(err) => {
                    error!(self.logger, "error fetching {} network: {}", network, err);
                    continue;
                }
            };
            match parse_network(&network, &raw) {
                Ok(found) => {
                    debug!(self.logger, "{}: {} stations", network, found.len());
                    stations.extend(found);
                }
                Err(err) => error!(self.logger, "error parsing {} network: {}", network, err),
            }
        }
        info!(self.logger, "found {} ASOS stations", stations.len());
        stations
    }
}
