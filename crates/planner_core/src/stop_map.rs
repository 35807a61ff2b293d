use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::catalog::StopCatalog;
use crate::map::{Layer, LayerId, MapSurface, Marker, TileLayer};
use shape_planner_model::Stop;

pub const INITIAL_ZOOM: u8 = 13;

/// Counts of a single render pass plus the stops that could not be placed.
///
/// Rows the loader dropped (malformed, no `stop_id`, or a repeated
/// `stop_id`) never reach the catalog, so they get no marker and are not
/// listed in `invalid`; markers are keyed by stop id and need it unique.
/// `dropped` carries their count.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderReport {
    pub added: usize,
    pub removed: usize,
    pub kept: usize,
    pub dropped: usize,
    /// Names (or ids, for nameless stops) of stops without a usable position.
    pub invalid: Vec<String>,
}

/// Map of every stop in the catalog. Owns its surface; redraws diff markers by
/// stop id and leave the base tile layer alone.
pub struct StopMapView<S: MapSurface> {
    surface: S,
    base_layer: LayerId,
    markers: HashMap<String, (LayerId, Marker)>,
    view_initialized: bool,
}

pub fn stop_marker(stop: &Stop) -> Option<Marker> {
    let position = stop.position()?;
    let name = stop.display_name();
    Some(Marker {
        position,
        label: Some(format!(
            "name: {}, stop code: {}",
            name,
            stop.stop_code.as_deref().unwrap_or("")
        )),
        popup: Some(name.to_string()),
    })
}

impl<S: MapSurface> StopMapView<S> {
    pub fn mount(mut surface: S) -> Self {
        let base_layer = surface.add_layer(Layer::Tile(TileLayer::openstreetmap()));
        Self {
            surface,
            base_layer,
            markers: HashMap::new(),
            view_initialized: false,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn base_layer(&self) -> LayerId {
        self.base_layer
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Brings the markers in line with `catalog`. An empty catalog (still
    /// loading) clears the markers and leaves the viewport unset.
    pub fn render(&mut self, catalog: &StopCatalog) -> RenderReport {
        let mut report = RenderReport {
            dropped: catalog.dropped_count(),
            ..RenderReport::default()
        };
        let mut wanted: HashSet<&str> = HashSet::new();

        for stop in catalog.stops() {
            let Some(marker) = stop_marker(stop) else {
                let name = stop
                    .stop_name
                    .clone()
                    .unwrap_or_else(|| stop.stop_id.clone());
                tracing::warn!("invalid coordinates for location: {}", name);
                report.invalid.push(name);
                continue;
            };
            if !self.view_initialized {
                self.surface.set_view(marker.position, INITIAL_ZOOM);
                self.view_initialized = true;
            }
            wanted.insert(stop.stop_id.as_str());

            let existing = self
                .markers
                .get(&stop.stop_id)
                .map(|(layer_id, drawn)| (*layer_id, *drawn == marker));
            match existing {
                Some((_, true)) => {
                    report.kept += 1;
                }
                Some((layer_id, false)) => {
                    self.surface.remove_layer(layer_id);
                    let layer_id = self.surface.add_layer(Layer::Marker(marker.clone()));
                    self.markers.insert(stop.stop_id.clone(), (layer_id, marker));
                    report.removed += 1;
                    report.added += 1;
                }
                None => {
                    let layer_id = self.surface.add_layer(Layer::Marker(marker.clone()));
                    self.markers.insert(stop.stop_id.clone(), (layer_id, marker));
                    report.added += 1;
                }
            }
        }

        let stale: Vec<String> = self
            .markers
            .keys()
            .filter(|stop_id| !wanted.contains(stop_id.as_str()))
            .cloned()
            .collect();
        for stop_id in stale {
            if let Some((layer_id, _)) = self.markers.remove(&stop_id) {
                self.surface.remove_layer(layer_id);
                report.removed += 1;
            }
        }

        tracing::debug!(
            "stop map render: {} added, {} removed, {} kept, {} invalid",
            report.added,
            report.removed,
            report.kept,
            report.invalid.len()
        );
        report
    }

    /// Detaches every layer, destroys the render context and hands the
    /// surface back.
    pub fn teardown(mut self) -> S {
        for (layer_id, _) in self.markers.drain().map(|(_, entry)| entry) {
            self.surface.remove_layer(layer_id);
        }
        self.surface.remove_layer(self.base_layer);
        for leftover in self.surface.layer_ids() {
            self.surface.remove_layer(leftover);
        }
        self.surface.destroy();
        self.surface
    }
}
