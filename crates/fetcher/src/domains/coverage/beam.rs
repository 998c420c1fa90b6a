//! Ground radius at which a WSR-88D beam can see a given altitude.
//!
//! The earth centre, the radar site and the point where the beam reaches the
//! target height form a triangle. Two sides are known (the distances of the
//! site and of the beam end from the earth centre) and so is the angle at the
//! site (90 degrees plus the elevation of the scan). The law of cosines gives
//! the slant range, the law of sines the angle at the earth centre, and that
//! angle times the site's radius is the ground arc.
//!
//! Spherical earth, no refraction, no beam width.

use std::f64::consts::FRAC_PI_2;

/// Mean earth radius in km
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Maximum useful slant range of a WSR-88D beam in km
pub const MAX_BEAM_RANGE_KM: f64 = 230.0;

/// Lowest elevation scan, degrees
pub const LOW_BEAM_ANGLE_DEG: f64 = 0.5;

/// Highest elevation scan, degrees
pub const HIGH_BEAM_ANGLE_DEG: f64 = 19.5;

/// Above this no volume coverage pattern scans, meters
pub const MAX_TARGET_HEIGHT_M: f64 = 90_000.0;

/// Highest station elevation considered plausible, meters
pub const MAX_STATION_ELEVATION_M: f64 = 6267.0;

/// Estimate the ground distance, in meters, within which a station at
/// `station_elevation_m` can observe `height_m` above sea level.
///
/// Returns `None` when no scan of the station can reach that height inside the
/// maximum beam range, or when the inputs are outside what a WSR-88D covers.
pub fn estimate_radius(height_m: f64, station_elevation_m: f64) -> Option<f64> {
    if height_m > MAX_TARGET_HEIGHT_M
        || station_elevation_m > MAX_STATION_ELEVATION_M
        || station_elevation_m >= height_m
    {
        return None;
    }

    let height_km = (height_m - station_elevation_m) / 1000.0;
    let localized_radius = EARTH_RADIUS_KM + station_elevation_m / 1000.0;
    let beam_end_radius = localized_radius + height_km;

    let (beam_distance, mut central_angle) = solve_at_elevation(
        localized_radius,
        beam_end_radius,
        LOW_BEAM_ANGLE_DEG.to_radians(),
    );

    if beam_distance > MAX_BEAM_RANGE_KM {
        let (beam_distance, _) = solve_at_elevation(
            localized_radius,
            beam_end_radius,
            HIGH_BEAM_ANGLE_DEG.to_radians(),
        );
        if beam_distance > MAX_BEAM_RANGE_KM {
            return None;
        }

        // Some scan between the two reaches the height exactly at max range
        central_angle = angle_between(localized_radius, beam_end_radius, MAX_BEAM_RANGE_KM);
    }

    Some(central_angle * localized_radius * 1000.0)
}

/// Returns `(slant_range, earth_central_angle)` for a beam leaving the site at
/// `elevation` radians and ending `beam_end_radius` km from the earth centre.
fn solve_at_elevation(localized_radius: f64, beam_end_radius: f64, elevation: f64) -> (f64, f64) {
    let site_angle = FRAC_PI_2 + elevation;
    let (sin_site, cos_site) = site_angle.sin_cos();

    // b^2 = a^2 + c^2 - 2ac cos(B), positive root for c
    let slant_range = localized_radius * cos_site
        + (beam_end_radius.powi(2) - (localized_radius * sin_site).powi(2)).sqrt();

    // The site angle is obtuse, so the angle at the earth centre is acute
    let central_angle = (slant_range * sin_site / beam_end_radius).asin();

    (slant_range, central_angle)
}

/// Angle at the earth centre of a triangle with all three sides known
fn angle_between(localized_radius: f64, beam_end_radius: f64, slant_range: f64) -> f64 {
    let cos_angle = (localized_radius.powi(2) + beam_end_radius.powi(2) - slant_range.powi(2))
        / (2.0 * localized_radius * beam_end_radius);
    cos_angle.clamp(-1.0, 1.0).acos()
}
