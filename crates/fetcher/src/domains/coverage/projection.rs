//! WGS84 Universal Transverse Mercator projection on top of the `utm` crate.
//!
//! The relevance search measures distances in meters, so every lat/lon it
//! touches is moved onto a UTM plane first. Inverse projection is non-strict:
//! points pushed across the equator by a search radius are re-read in the
//! other hemisphere of the same zone instead of being rejected.

const FALSE_NORTHING: f64 = 10_000_000.0;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ProjectionError {
    #[error("latitude {0} is outside the UTM range [-80, 84]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("zone number {0} is outside [1, 60]")]
    InvalidZone(u8),
    #[error("easting {0} cannot be mapped back to a lat/lon")]
    OutsideZone(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmCoord {
    pub easting: f64,
    pub northing: f64,
    pub zone_number: u8,
    pub zone_letter: char,
}

impl UtmCoord {
    pub fn is_northern(&self) -> bool {
        self.zone_letter >= 'N'
    }

    /// Same zone, shifted by the given number of meters
    pub fn offset(&self, d_easting: f64, d_northing: f64) -> UtmCoord {
        UtmCoord {
            easting: self.easting + d_easting,
            northing: self.northing + d_northing,
            ..*self
        }
    }

    /// Planar distance to another coordinate, only meaningful within one zone
    pub fn distance_to(&self, other: &UtmCoord) -> f64 {
        (self.easting - other.easting).hypot(self.northing - other.northing)
    }
}

pub use utm::lat_lon_to_zone_number;

pub fn latitude_to_zone_letter(latitude: f64) -> Option<char> {
    if (-80.0..=84.0).contains(&latitude) {
        utm::lat_to_zone_letter(latitude)
    } else {
        None
    }
}

/// Project a lat/lon into its natural UTM zone
pub fn to_utm(latitude: f64, longitude: f64) -> Result<UtmCoord, ProjectionError> {
    to_utm_with_zone(latitude, longitude, None)
}

/// Project a lat/lon into a caller chosen zone, e.g. to compare it with a
/// point that lives in a neighbouring zone
pub fn to_utm_in_zone(
    latitude: f64,
    longitude: f64,
    zone_number: u8,
) -> Result<UtmCoord, ProjectionError> {
    to_utm_with_zone(latitude, longitude, Some(zone_number))
}

fn to_utm_with_zone(
    latitude: f64,
    longitude: f64,
    force_zone: Option<u8>,
) -> Result<UtmCoord, ProjectionError> {
    let zone_letter =
        latitude_to_zone_letter(latitude).ok_or(ProjectionError::LatitudeOutOfRange(latitude))?;
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ProjectionError::LongitudeOutOfRange(longitude));
    }
    let zone_number = match force_zone {
        Some(zone) if !(1..=60).contains(&zone) => return Err(ProjectionError::InvalidZone(zone)),
        Some(zone) => zone,
        None => lat_lon_to_zone_number(latitude, longitude),
    };

    let (northing, easting, _convergence) = utm::to_utm_wgs84(latitude, longitude, zone_number);

    Ok(UtmCoord {
        easting,
        northing,
        zone_number,
        zone_letter,
    })
}

/// Inverse projection. Returns `(latitude, longitude)` in degrees.
pub fn to_lat_lon(coord: &UtmCoord) -> Result<(f64, f64), ProjectionError> {
    if !(1..=60).contains(&coord.zone_number) {
        return Err(ProjectionError::InvalidZone(coord.zone_number));
    }

    // Northings that left their hemisphere are the same point seen from the
    // other side of the equator
    let (northing, zone_letter) = match (coord.is_northern(), coord.northing) {
        (true, n) if n < 0.0 => (n + FALSE_NORTHING, 'M'),
        (false, n) if n >= FALSE_NORTHING => (n - FALSE_NORTHING, 'N'),
        (_, n) => (n, coord.zone_letter),
    };

    utm::wsg84_utm_to_lat_lon(coord.easting, northing, coord.zone_number, zone_letter)
        .map_err(|_| ProjectionError::OutsideZone(coord.easting))
}
