//! Rendering surface abstraction shared by the stop map and the planner.
//!
//! A surface holds layers (base tiles, markers, polylines) and a viewport.
//! The browser page draws [`LayerSurface`] snapshots with Leaflet.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geo::{DistanceMetric, Haversine};
use shape_planner_model::LatLng;

pub const OSM_TILE_URL: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";
pub const OSM_ATTRIBUTION: &str =
    "&copy; <a href=\"https://www.openstreetmap.org/copyright\">OpenStreetMap</a> contributors";

pub type LayerId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileLayer {
    pub url_template: String,
    pub attribution: String,
}

impl TileLayer {
    pub fn openstreetmap() -> Self {
        Self {
            url_template: OSM_TILE_URL.to_string(),
            attribution: OSM_ATTRIBUTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub position: LatLng,
    /// Hover label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Popup shown on click and dismissible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popup: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineStyle {
    pub color: &'static str,
    pub opacity: f64,
    pub weight: u32,
}

impl LineStyle {
    pub const ROUTE: LineStyle = LineStyle {
        color: "#2E64FE",
        opacity: 0.8,
        weight: 6,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polyline {
    pub points: Vec<LatLng>,
    pub style: LineStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    Tile(TileLayer),
    Marker(Marker),
    Polyline(Polyline),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: LatLng,
    pub zoom: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl Bounds {
    pub fn enclosing(points: &[LatLng]) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Bounds {
            south_west: *first,
            north_east: *first,
        };
        for point in &points[1..] {
            bounds.south_west.lat = bounds.south_west.lat.min(point.lat);
            bounds.south_west.lon = bounds.south_west.lon.min(point.lon);
            bounds.north_east.lat = bounds.north_east.lat.max(point.lat);
            bounds.north_east.lon = bounds.north_east.lon.max(point.lon);
        }
        Some(bounds)
    }
}

pub trait MapSurface {
    fn set_view(&mut self, center: LatLng, zoom: u8);
    fn fit_bounds(&mut self, bounds: Bounds);
    fn add_layer(&mut self, layer: Layer) -> LayerId;
    fn remove_layer(&mut self, id: LayerId) -> bool;
    fn layer_ids(&self) -> Vec<LayerId>;
    /// Releases the render context. The surface must not be drawn on afterwards.
    fn destroy(&mut self);

    /// Distance as the surface measures it on screen.
    fn distance(&self, a: LatLng, b: LatLng) -> f64 {
        Haversine.distance(a, b)
    }
}

/// In-memory surface; its [`MapSnapshot`] is what the browser renders.
#[derive(Debug, Default)]
pub struct LayerSurface {
    layers: BTreeMap<LayerId, Layer>,
    next_id: LayerId,
    viewport: Option<Viewport>,
    bounds: Option<Bounds>,
    destroyed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerEntry {
    pub id: LayerId,
    #[serde(flatten)]
    pub layer: Layer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<Viewport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    pub layers: Vec<LayerEntry>,
}

impl LayerSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn layers(&self) -> impl Iterator<Item = (LayerId, &Layer)> {
        self.layers.iter().map(|(id, layer)| (*id, layer))
    }

    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.layers.values().filter_map(|layer| match layer {
            Layer::Marker(marker) => Some(marker),
            _ => None,
        })
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn snapshot(&self) -> MapSnapshot {
        MapSnapshot {
            view: self.viewport,
            bounds: self.bounds,
            layers: self
                .layers
                .iter()
                .map(|(id, layer)| LayerEntry {
                    id: *id,
                    layer: layer.clone(),
                })
                .collect(),
        }
    }
}

impl MapSurface for LayerSurface {
    fn set_view(&mut self, center: LatLng, zoom: u8) {
        self.viewport = Some(Viewport { center, zoom });
    }

    fn fit_bounds(&mut self, bounds: Bounds) {
        self.bounds = Some(bounds);
    }

    fn add_layer(&mut self, layer: Layer) -> LayerId {
        if self.destroyed {
            tracing::warn!("layer added to a destroyed surface");
        }
        let id = self.next_id;
        self.next_id += 1;
        self.layers.insert(id, layer);
        id
    }

    fn remove_layer(&mut self, id: LayerId) -> bool {
        self.layers.remove(&id).is_some()
    }

    fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.keys().copied().collect()
    }

    fn destroy(&mut self) {
        self.layers.clear();
        self.viewport = None;
        self.bounds = None;
        self.destroyed = true;
    }
}
