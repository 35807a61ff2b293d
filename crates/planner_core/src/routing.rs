use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::geo::{DistanceMetric, Haversine};
use shape_planner_model::LatLng;

pub const DEFAULT_OSRM_URL: &str = "https://router.project-osrm.org";
pub const DEFAULT_OSRM_PROFILE: &str = "driving";

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("routing request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("routing engine answered {code}: {message}")]
    Engine { code: String, message: String },
    #[error("no route found between {from} and {to}")]
    NoRoute { from: LatLng, to: LatLng },
}

/// Best path returned by a routing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePath {
    pub coordinates: Vec<LatLng>,
    pub total_distance_m: f64,
    pub total_time_s: f64,
}

/// External path computation between two positions.
pub trait Router: Send + Sync {
    fn name(&self) -> &'static str;
    fn route(&self, from: LatLng, to: LatLng) -> Result<RoutePath, RoutingError>;
}

impl<R: Router + ?Sized> Router for Box<R> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn route(&self, from: LatLng, to: LatLng) -> Result<RoutePath, RoutingError> {
        (**self).route(from, to)
    }
}

/// Offline router: a straight segment split into equal steps, travelled at a
/// constant speed.
#[derive(Debug, Clone)]
pub struct StraightLineRouter {
    pub speed_mps: f64,
    pub steps: usize,
}

impl Default for StraightLineRouter {
    fn default() -> Self {
        Self {
            speed_mps: 30.0 / 3.6,
            steps: 16,
        }
    }
}

impl Router for StraightLineRouter {
    fn name(&self) -> &'static str {
        "straight"
    }

    fn route(&self, from: LatLng, to: LatLng) -> Result<RoutePath, RoutingError> {
        let steps = self.steps.max(1);
        let coordinates: Vec<LatLng> = (0..=steps)
            .map(|i| {
                let t = i as f64 / steps as f64;
                LatLng {
                    lat: from.lat + (to.lat - from.lat) * t,
                    lon: from.lon + (to.lon - from.lon) * t,
                }
            })
            .collect();
        let total_distance_m: f64 = coordinates
            .windows(2)
            .map(|pair| Haversine.distance(pair[0], pair[1]))
            .sum();
        let total_time_s = if self.speed_mps > 0.0 {
            total_distance_m / self.speed_mps
        } else {
            0.0
        };
        Ok(RoutePath {
            coordinates,
            total_distance_m,
            total_time_s,
        })
    }
}

/// Client for the OSRM `route` service.
#[derive(Debug, Clone)]
pub struct OsrmRouter {
    base_url: String,
    profile: String,
    timeout: Duration,
}

impl OsrmRouter {
    pub fn new(base_url: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: profile.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn route_url(&self, from: LatLng, to: LatLng) -> String {
        format!(
            "{}/route/v1/{}/{},{};{},{}?overview=full&geometries=geojson",
            self.base_url, self.profile, from.lon, from.lat, to.lon, to.lat
        )
    }
}

impl Default for OsrmRouter {
    fn default() -> Self {
        Self::new(DEFAULT_OSRM_URL, DEFAULT_OSRM_PROFILE)
    }
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    distance: f64,
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

impl Router for OsrmRouter {
    fn name(&self) -> &'static str {
        "osrm"
    }

    fn route(&self, from: LatLng, to: LatLng) -> Result<RoutePath, RoutingError> {
        let client = Client::builder()
            .user_agent(format!("shape-planner/{}", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .build()?;
        let url = self.route_url(from, to);
        tracing::debug!("requesting route {}", url);
        // OSRM reports NoRoute and friends with a 400 and a JSON body, so the
        // body is decoded before looking at the status.
        let response: OsrmResponse = client.get(&url).send()?.json()?;
        decode_osrm(response, from, to)
    }
}

fn decode_osrm(response: OsrmResponse, from: LatLng, to: LatLng) -> Result<RoutePath, RoutingError> {
    if response.code == "NoRoute" {
        return Err(RoutingError::NoRoute { from, to });
    }
    if response.code != "Ok" {
        return Err(RoutingError::Engine {
            code: response.code,
            message: response.message.unwrap_or_default(),
        });
    }
    let best = response
        .routes
        .into_iter()
        .next()
        .ok_or(RoutingError::NoRoute { from, to })?;
    let coordinates: Vec<LatLng> = best
        .geometry
        .coordinates
        .into_iter()
        .map(|[lon, lat]| LatLng { lat, lon })
        .collect();
    if coordinates.is_empty() {
        return Err(RoutingError::NoRoute { from, to });
    }
    Ok(RoutePath {
        coordinates,
        total_distance_m: best.distance,
        total_time_s: best.duration,
    })
}
