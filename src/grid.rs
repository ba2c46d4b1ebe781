//! # Grid Matching
//!
//! Translates geographic coordinates into the MERRA-2 native grid index space.
//!
//! The MERRA-2 grid has a resolution of 0.5° in latitude and 0.625° in longitude.
//! The GEOS-5 file specification numbers the points from 1 to 361 and 1 to 576;
//! the OPeNDAP server uses zero-based indices, 0 to 360 and 0 to 575.

use std::ops::RangeInclusive;

/// Latitude resolution in degrees.
pub const LAT_RESOLUTION: f64 = 0.5;
/// Longitude resolution in degrees.
pub const LON_RESOLUTION: f64 = 0.625;
/// Valid latitude indices.
pub const LAT_INDICES: RangeInclusive<usize> = 0..=360;
/// Valid longitude indices.
pub const LON_INDICES: RangeInclusive<usize> = 0..=575;

/// A snapped position on the native grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridIndex {
    pub lat_index: usize,
    pub lon_index: usize,
}

impl GridIndex {
    /// Returns the cell centre in geographic degrees as `(latitude, longitude)`.
    pub fn to_degrees(&self) -> (f64, f64) {
        (
            self.lat_index as f64 * LAT_RESOLUTION - 90.0,
            self.lon_index as f64 * LON_RESOLUTION - 180.0,
        )
    }
}

/// Converts a latitude (signed, degrees north) to the fractional native coordinate.
pub fn lat_to_native(latitude: f64) -> f64 {
    (latitude + 90.0) / LAT_RESOLUTION
}

/// Converts a longitude (signed, degrees east) to the fractional native coordinate.
pub fn lon_to_native(longitude: f64) -> f64 {
    (longitude + 180.0) / LON_RESOLUTION
}

/// Finds the index in `candidates` closest to `native`.
///
/// The scan is linear and keeps the first minimiser, so ties resolve to the
/// lower index. The range is never empty for the grid constants above; an
/// empty range yields its start.
pub fn find_closest_index(native: f64, candidates: RangeInclusive<usize>) -> usize {
    let mut best = *candidates.start();
    let mut best_distance = f64::INFINITY;

    for candidate in candidates {
        let distance = (candidate as f64 - native).abs();
        if distance < best_distance {
            best = candidate;
            best_distance = distance;
        }
    }

    best
}

/// Snaps a geographic position to the nearest grid point.
///
/// ```rust
/// use merra2station::grid::{translate, GridIndex};
///
/// let index = translate(40.0, -105.0);
/// assert_eq!(index, GridIndex { lat_index: 260, lon_index: 120 });
/// ```
pub fn translate(latitude: f64, longitude: f64) -> GridIndex {
    GridIndex {
        lat_index: find_closest_index(lat_to_native(latitude), LAT_INDICES),
        lon_index: find_closest_index(lon_to_native(longitude), LON_INDICES),
    }
}
