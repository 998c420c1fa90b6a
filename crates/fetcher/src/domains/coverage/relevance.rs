use slog::{debug, warn, Logger};
use std::collections::HashSet;

use crate::{
    estimate_radius, to_lat_lon, to_utm, to_utm_in_zone, SearchError, Station, StationCatalog,
    UtmCoord,
};

/// Share of a station's beam radius that counts as useful coverage
pub const RELEVANT_DISTANCE_COEFFICIENT: f64 = 0.5;

/// A lat/lon box and the altitude of interest inside it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Domain {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
    /// Meters above sea level
    pub height_m: f64,
}

/// Grid description as written in a WPS `namelist.wps`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WrfGrid {
    pub dx: f64,
    pub dy: f64,
    pub e_sn: u32,
    pub e_we: u32,
    pub ref_lat: f64,
    pub ref_lon: f64,
}

impl Domain {
    pub fn new(
        min_lat: f64,
        min_lon: f64,
        max_lat: f64,
        max_lon: f64,
        height_m: f64,
    ) -> Result<Self, SearchError> {
        if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
            return Err(SearchError::InvalidDomain(format!(
                "latitudes must be within [-90, 90], got {} and {}",
                min_lat, max_lat
            )));
        }
        if !(-180.0..=180.0).contains(&min_lon) || !(-180.0..=180.0).contains(&max_lon) {
            return Err(SearchError::InvalidDomain(format!(
                "longitudes must be within [-180, 180], got {} and {}",
                min_lon, max_lon
            )));
        }
        if min_lat >= max_lat || min_lon >= max_lon {
            return Err(SearchError::InvalidDomain(format!(
                "minimum corner ({}, {}) must be south-west of maximum corner ({}, {})",
                min_lat, min_lon, max_lat, max_lon
            )));
        }
        if !height_m.is_finite() {
            return Err(SearchError::InvalidDomain(format!(
                "height must be a number of meters, got {}",
                height_m
            )));
        }
        Ok(Domain {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
            height_m,
        })
    }

    /// Domain covered by a WRF grid centred on `ref_lat`/`ref_lon`.
    ///
    /// May be inaccurate for very large grids, the extents are laid out on
    /// the UTM plane of the grid centre.
    pub fn from_wrf_grid(grid: &WrfGrid, height_m: f64) -> Result<Self, SearchError> {
        let center = to_utm(grid.ref_lat, grid.ref_lon)?;
        let half_we = f64::from(grid.e_we) / 2.0 * grid.dx;
        let half_sn = f64::from(grid.e_sn) / 2.0 * grid.dy;

        let (max_lat, max_lon) = to_lat_lon(&center.offset(half_we, half_sn))?;
        let (min_lat, min_lon) = to_lat_lon(&center.offset(-half_we, -half_sn))?;

        Domain::new(min_lat, min_lon, max_lat, max_lon, height_m)
    }
}

/// The domain grown by one station's relevant radius
struct OuterBounds {
    min_lat: f64,
    min_lon: f64,
    max_lat: f64,
    max_lon: f64,
}

/// Stations whose beam can plausibly observe `domain.height_m` somewhere
/// inside the domain, in catalog order.
///
/// Domains that straddle a UTM zone boundary are expanded corner by corner in
/// each corner's own zone; no correction is made for the seam.
pub fn relevant_stations(
    domain: &Domain,
    catalog: &StationCatalog,
    logger: &Logger,
) -> Result<Vec<String>, SearchError> {
    if catalog.is_empty() {
        return Err(SearchError::EmptyCatalog);
    }

    let north_east = to_utm(domain.max_lat, domain.max_lon)?;
    let south_west = to_utm(domain.min_lat, domain.min_lon)?;
    if north_east.zone_number != south_west.zone_number {
        warn!(
            logger,
            "domain spans UTM zones {} to {}, relevance near the seam is approximate",
            south_west.zone_number,
            north_east.zone_number
        );
    }

    let corners = [
        north_east,
        to_utm(domain.min_lat, domain.max_lon)?,
        south_west,
        to_utm(domain.max_lat, domain.min_lon)?,
    ];

    let mut seen = HashSet::new();
    let mut relevant = vec![];
    for station in catalog.iter() {
        let Some(beam_radius) = estimate_radius(domain.height_m, station.elevation_m) else {
            debug!(
                logger,
                "{} cannot see {} m, skipping", station.station_id, domain.height_m
            );
            continue;
        };
        let radius = RELEVANT_DISTANCE_COEFFICIENT * beam_radius;

        let (max_lat, max_lon) = to_lat_lon(&north_east.offset(radius, radius))?;
        let (min_lat, min_lon) = to_lat_lon(&south_west.offset(-radius, -radius))?;
        let outer = OuterBounds {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        };

        if is_relevant(domain, &outer, &corners, station, radius, logger)
            && seen.insert(station.station_id.clone())
        {
            relevant.push(station.station_id.clone());
        }
    }

    Ok(relevant)
}

fn is_relevant(
    domain: &Domain,
    outer: &OuterBounds,
    corners: &[UtmCoord],
    station: &Station,
    radius: f64,
    logger: &Logger,
) -> bool {
    let lat = station.latitude;
    let lon = station.longitude;

    // Vertical band of the grown domain, bounded by the given longitudes
    if (outer.min_lat..=outer.max_lat).contains(&lat)
        && (domain.min_lon..=domain.max_lon).contains(&lon)
    {
        return true;
    }

    // Horizontal band of the grown domain, bounded by the given latitudes
    if (domain.min_lat..=domain.max_lat).contains(&lat)
        && (outer.min_lon..=outer.max_lon).contains(&lon)
    {
        return true;
    }

    corners
        .iter()
        .any(|corner| match in_corner_disc(corner, station, radius) {
            Ok(inside) => inside,
            Err(err) => {
                warn!(
                    logger,
                    "could not project {} for corner test: {}", station.station_id, err
                );
                false
            }
        })
}

/// Is the station within `radius` meters of the corner, measured on the
/// corner's UTM plane
fn in_corner_disc(corner: &UtmCoord, station: &Station, radius: f64) -> Result<bool, SearchError> {
    let position = to_utm_in_zone(station.latitude, station.longitude, corner.zone_number)?;
    Ok(position.distance_to(corner) <= radius)
}
