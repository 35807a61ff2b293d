use shape_planner_model::LatLng;

/// Mean earth radius used by web slippy maps (Leaflet's `CRS.Earth.R`).
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Point-to-point distance as measured by a rendering surface.
pub trait DistanceMetric {
    fn distance(&self, a: LatLng, b: LatLng) -> f64;
}

impl<F> DistanceMetric for F
where
    F: Fn(LatLng, LatLng) -> f64,
{
    fn distance(&self, a: LatLng, b: LatLng) -> f64 {
        self(a, b)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Haversine;

impl DistanceMetric for Haversine {
    fn distance(&self, a: LatLng, b: LatLng) -> f64 {
        haversine_meters(a.lat, a.lon, b.lat, b.lon)
    }
}

pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}
