use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MAX_ROUTE_ID_LEN: usize = 200;
pub const ROUTE_ID_SEPARATOR: &str = "_to_";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid coordinate: {0:?}")]
    InvalidCoordinate(String),
    #[error("latitude out of range: {0}")]
    LatitudeOutOfRange(f64),
    #[error("longitude out of range: {0}")]
    LongitudeOutOfRange(f64),
    #[error("route id is empty")]
    EmptyRouteId,
    #[error("route id is {0} bytes, limit is {MAX_ROUTE_ID_LEN}")]
    RouteIdTooLong(usize),
    #[error("route id {id:?} contains forbidden character {ch:?}")]
    ForbiddenRouteIdChar { id: String, ch: char },
    #[error("route id {0:?} is a dot segment")]
    DotSegmentRouteId(String),
}

/// Parses a single decimal degree value. Surrounding whitespace is ignored,
/// anything else that is not a finite number is rejected.
pub fn parse_coordinate(value: &str) -> Result<f64, ModelError> {
    let trimmed = value.trim();
    let parsed: f64 = trimmed
        .parse()
        .map_err(|_| ModelError::InvalidCoordinate(value.to_string()))?;
    if !parsed.is_finite() {
        return Err(ModelError::InvalidCoordinate(value.to_string()));
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lon: f64,
}

impl LatLng {
    pub fn new(lat: f64, lon: f64) -> Result<Self, ModelError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(ModelError::LatitudeOutOfRange(lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(ModelError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    pub fn parse(lat: &str, lon: &str) -> Result<Self, ModelError> {
        Self::new(parse_coordinate(lat)?, parse_coordinate(lon)?)
    }
}

impl fmt::Display for LatLng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

/// A row of the stop catalog. Every field but the id is optional so that a
/// tolerant load can keep incomplete rows around for diagnostics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    pub stop_code: Option<String>,
    pub stop_name: Option<String>,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
}

impl Stop {
    pub fn has_coordinates(&self) -> bool {
        self.stop_lat.is_some() && self.stop_lon.is_some()
    }

    pub fn position(&self) -> Option<LatLng> {
        match (self.stop_lat, self.stop_lon) {
            (Some(lat), Some(lon)) => Some(LatLng { lat, lon }),
            _ => None,
        }
    }

    /// Rows offered to the route planner need an id, a name and a position.
    pub fn is_selectable(&self) -> bool {
        !self.stop_id.is_empty()
            && self.stop_name.as_deref().is_some_and(|name| !name.is_empty())
            && self.has_coordinates()
    }

    pub fn display_name(&self) -> &str {
        self.stop_name.as_deref().unwrap_or("")
    }
}

/// A parsed row of a `shapes.txt` file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Shape {
    pub shape_id: String,
    pub shape_pt_lat: f64,
    pub shape_pt_lon: f64,
    pub shape_pt_sequence: u32,
    pub shape_dist_traveled: Option<f64>,
}

/// A vertex of a planned path annotated with its position along the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapePoint {
    pub route_id: RouteId,
    pub lat: f64,
    pub lon: f64,
    pub sequence: u32,
    pub cumulative_distance_m: f64,
}

impl ShapePoint {
    pub fn position(&self) -> LatLng {
        LatLng {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

impl From<&ShapePoint> for Shape {
    fn from(point: &ShapePoint) -> Self {
        Self {
            shape_id: point.route_id.to_string(),
            shape_pt_lat: point.lat,
            shape_pt_lon: point.lon,
            shape_pt_sequence: point.sequence,
            shape_dist_traveled: Some(point.cumulative_distance_m),
        }
    }
}

/// Identifier of a planned route, `{start}_to_{end}`. Only ASCII
/// alphanumerics, `_`, `-` and `.` are accepted so the value is always safe
/// to embed in a file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteId(String);

impl RouteId {
    pub fn parse(value: &str) -> Result<Self, ModelError> {
        if value.is_empty() {
            return Err(ModelError::EmptyRouteId);
        }
        if value.len() > MAX_ROUTE_ID_LEN {
            return Err(ModelError::RouteIdTooLong(value.len()));
        }
        if value == "." || value == ".." {
            return Err(ModelError::DotSegmentRouteId(value.to_string()));
        }
        if let Some(ch) = value.chars().find(|ch| !is_route_id_char(*ch)) {
            return Err(ModelError::ForbiddenRouteIdChar {
                id: value.to_string(),
                ch,
            });
        }
        Ok(Self(value.to_string()))
    }

    pub fn derive(start_stop_id: &str, end_stop_id: &str) -> Result<Self, ModelError> {
        Self::parse(&format!(
            "{}{}{}",
            start_stop_id, ROUTE_ID_SEPARATOR, end_stop_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_route_id_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.')
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RouteId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for RouteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RouteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RouteIdVisitor;

        impl<'de> Visitor<'de> for RouteIdVisitor {
            type Value = RouteId;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a route id made of [A-Za-z0-9_.-]")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<RouteId, E> {
                RouteId::parse(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(RouteIdVisitor)
    }
}
