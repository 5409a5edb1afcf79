//! Geospatial helpers: great-circle distance and a local tangent-plane frame
//!
//! The dispersion model works in meters, so station coordinates are projected
//! into an east/north frame centred on the city centroid. Over a city-sized
//! domain (tens of kilometres) the equirectangular approximation is well
//! within the accuracy of the plume model itself.

use crate::core_types::units::Meters;
use nalgebra::Vector2;

/// Mean Earth radius (m)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// East/north offset in meters
pub type Enu = Vector2<f64>;

/// Great-circle distance between two points given in decimal degrees.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Meters {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    Meters::new(EARTH_RADIUS_M * c)
}

/// Offset a point by `north_m` / `east_m` meters (inverse of [`LocalFrame::project`]
/// around that point). Used by tests and synthetic fixtures.
pub fn offset(lat: f64, lon: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let frame = LocalFrame::new(lat, lon);
    frame.unproject(Enu::new(east_m, north_m))
}

/// Local tangent-plane (east/north) frame anchored at an origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    origin_lat: f64,
    origin_lon: f64,
    /// cos(origin latitude), shrinks longitude spacing away from the equator
    cos_lat: f64,
}

impl LocalFrame {
    pub fn new(origin_lat: f64, origin_lon: f64) -> Self {
        Self {
            origin_lat,
            origin_lon,
            cos_lat: origin_lat.to_radians().cos(),
        }
    }

    /// Frame centred on the mean of the given coordinates.
    ///
    /// Returns `None` for an empty iterator.
    pub fn centroid<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let (mut sum_lat, mut sum_lon, mut n) = (0.0, 0.0, 0usize);
        for (lat, lon) in points {
            sum_lat += lat;
            sum_lon += lon;
            n += 1;
        }
        if n == 0 {
            return None;
        }
        Some(Self::new(sum_lat / n as f64, sum_lon / n as f64))
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.origin_lat, self.origin_lon)
    }

    /// Project a lat/lon pair into east/north meters.
    pub fn project(&self, lat: f64, lon: f64) -> Enu {
        let east = (lon - self.origin_lon).to_radians() * EARTH_RADIUS_M * self.cos_lat;
        let north = (lat - self.origin_lat).to_radians() * EARTH_RADIUS_M;
        Enu::new(east, north)
    }

    /// Convert an east/north offset back to lat/lon.
    pub fn unproject(&self, p: Enu) -> (f64, f64) {
        let lat = self.origin_lat + (p.y / EARTH_RADIUS_M).to_degrees();
        let lon = if self.cos_lat.abs() < f64::EPSILON {
            self.origin_lon
        } else {
            self.origin_lon + (p.x / (EARTH_RADIUS_M * self.cos_lat)).to_degrees()
        };
        (lat, lon)
    }
}
