//! Route planner controller.
//!
//! The planner owns the start/end selection, the map overlays and the route
//! state machine. Route computations are issued as [`RouteRequest`]s tagged
//! with a [`RouteTicket`]; a result is only applied when its ticket is the
//! latest one issued, so a slow answer for an old selection can never
//! overwrite the route of a newer one.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::{PersistenceError, SaveShapesRequest, SaveShapesResponse, ShapeSink};
use crate::catalog::StopCatalog;
use crate::map::{Bounds, Layer, LayerId, LineStyle, MapSurface, Marker, Polyline, TileLayer};
use crate::routing::{RoutePath, Router, RoutingError};
use crate::shape::annotate_path;
use crate::shapes_file::format_rows;
use shape_planner_model::{LatLng, ModelError, RouteId, ShapePoint, Stop};

pub const DEFAULT_CENTER: LatLng = LatLng {
    lat: 51.505,
    lon: -0.09,
};
pub const DEFAULT_ZOOM: u8 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RouteTicket(u64);

#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub ticket: RouteTicket,
    pub route_id: RouteId,
    pub from: LatLng,
    pub to: LatLng,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlannerError {
    #[error("start and end must be different stops")]
    SameStop,
    #[error("unknown stop {0}")]
    UnknownStop(String),
    #[error("stop {0} has no name or position")]
    IncompleteStop(String),
    #[error("cannot derive a route id: {0}")]
    InvalidRouteId(#[from] ModelError),
    #[error("route computation failed: {0}")]
    RouteComputation(String),
    #[error("saving the route failed: {0}")]
    Persistence(String),
    #[error("no route request is pending")]
    NothingToPlan,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSelection {
    pub start_stop_id: Option<String>,
    pub end_stop_id: Option<String>,
}

/// What the info panel shows once a route is ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub from: String,
    pub to: String,
    /// Kilometres, rounded to two decimals.
    pub distance_km: f64,
    pub time_min: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl RouteSummary {
    pub fn new(from: &str, to: &str, total_distance_m: f64, total_time_s: f64) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            distance_km: (total_distance_m / 10.0).round() / 100.0,
            time_min: (total_time_s / 60.0).round().max(0.0) as u64,
            file_name: None,
        }
    }
}

impl fmt::Display for RouteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Route Information")?;
        writeln!(f, "From: {}  To: {}", self.from, self.to)?;
        write!(
            f,
            "Distance: {:.2} km  Est. Time: {} min",
            self.distance_km, self.time_min
        )?;
        if let Some(file_name) = &self.file_name {
            write!(f, "\nRoute saved to: {}", file_name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRoute {
    pub ticket: RouteTicket,
    pub route_id: RouteId,
    pub start: Stop,
    pub end: Stop,
    pub path: RoutePath,
    pub points: Vec<ShapePoint>,
    /// `shapes.txt` rows without the header, as sent to the sink.
    pub rows: String,
    pub saved: Option<String>,
    pub save_error: Option<String>,
}

impl PlannedRoute {
    pub fn summary(&self) -> RouteSummary {
        let mut summary = RouteSummary::new(
            self.start.display_name(),
            self.end.display_name(),
            self.path.total_distance_m,
            self.path.total_time_s,
        );
        summary.file_name = self.saved.clone();
        summary
    }

    pub fn save_request(&self) -> SaveShapesRequest {
        SaveShapesRequest {
            shapes_content: self.rows.clone(),
            route_id: self.route_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerState {
    NoSelection,
    PartialSelection,
    ComputingRoute { ticket: RouteTicket },
    RouteReady(Box<PlannedRoute>),
    RouteError(PlannerError),
}

impl PlannerState {
    pub fn name(&self) -> &'static str {
        match self {
            PlannerState::NoSelection => "no_selection",
            PlannerState::PartialSelection => "partial_selection",
            PlannerState::ComputingRoute { .. } => "computing_route",
            PlannerState::RouteReady(_) => "route_ready",
            PlannerState::RouteError(_) => "route_error",
        }
    }
}

/// Outcome of feeding a result back into the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The ticket no longer matches the latest request; nothing changed.
    Stale,
    Applied,
    Failed,
}

pub struct RoutePlanner<S: MapSurface> {
    surface: S,
    catalog: Arc<StopCatalog>,
    selection: RouteSelection,
    state: PlannerState,
    next_ticket: u64,
    latest: Option<RouteRequest>,
    endpoint_markers: Vec<LayerId>,
    route_layer: Option<LayerId>,
    base_layer: LayerId,
}

impl<S: MapSurface> RoutePlanner<S> {
    pub fn new(mut surface: S, catalog: Arc<StopCatalog>) -> Self {
        surface.set_view(DEFAULT_CENTER, DEFAULT_ZOOM);
        let base_layer = surface.add_layer(Layer::Tile(TileLayer::openstreetmap()));
        Self {
            surface,
            catalog,
            selection: RouteSelection::default(),
            state: PlannerState::NoSelection,
            next_ticket: 1,
            latest: None,
            endpoint_markers: Vec::new(),
            route_layer: None,
            base_layer,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn state(&self) -> &PlannerState {
        &self.state
    }

    pub fn selection(&self) -> &RouteSelection {
        &self.selection
    }

    /// Stops offered in the start/end lists, in catalog order.
    pub fn options(&self) -> impl Iterator<Item = &Stop> {
        self.catalog.selectable()
    }

    pub fn ready_route(&self) -> Option<&PlannedRoute> {
        match &self.state {
            PlannerState::RouteReady(route) => Some(route),
            _ => None,
        }
    }

    pub fn summary(&self) -> Option<RouteSummary> {
        self.ready_route().map(PlannedRoute::summary)
    }

    /// Swaps in a freshly loaded catalog and re-evaluates the selection.
    pub fn set_catalog(&mut self, catalog: Arc<StopCatalog>) -> Option<RouteRequest> {
        self.catalog = catalog;
        self.reevaluate()
    }

    /// An empty id clears the start.
    pub fn select_start(&mut self, stop_id: &str) -> Option<RouteRequest> {
        self.selection.start_stop_id = non_empty(stop_id);
        self.reevaluate()
    }

    /// An empty id clears the end.
    pub fn select_end(&mut self, stop_id: &str) -> Option<RouteRequest> {
        self.selection.end_stop_id = non_empty(stop_id);
        self.reevaluate()
    }

    /// Re-issues the request for the current pair after a routing failure.
    pub fn retry(&mut self) -> Option<RouteRequest> {
        match &self.state {
            PlannerState::RouteError(PlannerError::RouteComputation(_)) => self.reevaluate(),
            _ => None,
        }
    }

    fn reevaluate(&mut self) -> Option<RouteRequest> {
        self.clear_overlays();
        self.latest = None;

        let (start_id, end_id) = match (&self.selection.start_stop_id, &self.selection.end_stop_id) {
            (None, None) => {
                self.state = PlannerState::NoSelection;
                return None;
            }
            (Some(start), Some(end)) => (start.clone(), end.clone()),
            _ => {
                self.state = PlannerState::PartialSelection;
                return None;
            }
        };

        match self.resolve_pair(&start_id, &end_id) {
            Ok((start, end, route_id)) => Some(self.issue_request(start, end, route_id)),
            Err(err) => {
                tracing::info!("selection {} -> {} rejected: {}", start_id, end_id, err);
                self.state = PlannerState::RouteError(err);
                None
            }
        }
    }

    fn resolve_pair(&self, start_id: &str, end_id: &str) -> Result<(Stop, Stop, RouteId), PlannerError> {
        if start_id == end_id {
            return Err(PlannerError::SameStop);
        }
        let start = self.resolve_stop(start_id)?;
        let end = self.resolve_stop(end_id)?;
        let route_id = RouteId::derive(&start.stop_id, &end.stop_id)?;
        Ok((start, end, route_id))
    }

    fn resolve_stop(&self, stop_id: &str) -> Result<Stop, PlannerError> {
        let stop = self
            .catalog
            .get(stop_id)
            .ok_or_else(|| PlannerError::UnknownStop(stop_id.to_string()))?;
        if !stop.is_selectable() {
            return Err(PlannerError::IncompleteStop(stop_id.to_string()));
        }
        Ok(stop.clone())
    }

    fn issue_request(&mut self, start: Stop, end: Stop, route_id: RouteId) -> RouteRequest {
        let ticket = RouteTicket(self.next_ticket);
        self.next_ticket += 1;

        let mut positions = [LatLng::default(); 2];
        for (slot, (stop, prefix)) in [(&start, "Start"), (&end, "End")].into_iter().enumerate() {
            // Selectable stops always have a position.
            let position = stop.position().unwrap_or_default();
            positions[slot] = position;
            let layer_id = self.surface.add_layer(Layer::Marker(Marker {
                position,
                label: None,
                popup: Some(format!("{}: {}", prefix, stop.display_name())),
            }));
            self.endpoint_markers.push(layer_id);
        }

        let request = RouteRequest {
            ticket,
            route_id,
            from: positions[0],
            to: positions[1],
        };
        tracing::debug!(
            "route request #{} for {} ({} -> {})",
            ticket.0,
            request.route_id,
            start.stop_id,
            end.stop_id
        );
        self.latest = Some(request.clone());
        self.state = PlannerState::ComputingRoute { ticket };
        request
    }

    /// Applies a routing result. Results for any ticket other than the latest
    /// are discarded.
    pub fn complete_route(
        &mut self,
        ticket: RouteTicket,
        result: Result<RoutePath, RoutingError>,
    ) -> Completion {
        let is_current = matches!(&self.state, PlannerState::ComputingRoute { ticket: current } if *current == ticket);
        let Some(request) = self.latest.clone().filter(|_| is_current) else {
            tracing::debug!("discarding stale route result #{}", ticket.0);
            return Completion::Stale;
        };

        let path = match result {
            Ok(path) if !path.coordinates.is_empty() => path,
            Ok(_) => {
                self.state = PlannerState::RouteError(PlannerError::RouteComputation(
                    RoutingError::NoRoute {
                        from: request.from,
                        to: request.to,
                    }
                    .to_string(),
                ));
                return Completion::Failed;
            }
            Err(err) => {
                tracing::warn!("route #{} failed: {}", ticket.0, err);
                self.state =
                    PlannerState::RouteError(PlannerError::RouteComputation(err.to_string()));
                return Completion::Failed;
            }
        };

        let (Some(start), Some(end)) = (
            self.selection
                .start_stop_id
                .as_deref()
                .and_then(|id| self.catalog.get(id))
                .cloned(),
            self.selection
                .end_stop_id
                .as_deref()
                .and_then(|id| self.catalog.get(id))
                .cloned(),
        ) else {
            return Completion::Stale;
        };

        self.route_layer = Some(self.surface.add_layer(Layer::Polyline(Polyline {
            points: path.coordinates.clone(),
            style: LineStyle::ROUTE,
        })));
        if let Some(bounds) = Bounds::enclosing(&path.coordinates) {
            self.surface.fit_bounds(bounds);
        }

        let surface = &self.surface;
        let metric = |a: LatLng, b: LatLng| surface.distance(a, b);
        let points = annotate_path(&request.route_id, &path.coordinates, &metric);
        let rows = format_rows(&points);

        self.state = PlannerState::RouteReady(Box::new(PlannedRoute {
            ticket,
            route_id: request.route_id,
            start,
            end,
            path,
            points,
            rows,
            saved: None,
            save_error: None,
        }));
        Completion::Applied
    }

    /// The save request for the ready route, until a save succeeds.
    pub fn pending_save(&self) -> Option<(RouteTicket, SaveShapesRequest)> {
        self.ready_route()
            .filter(|route| route.saved.is_none())
            .map(|route| (route.ticket, route.save_request()))
    }

    /// Records the sink's answer. A failure keeps the route ready so the save
    /// can be retried without recomputing.
    pub fn record_save(
        &mut self,
        ticket: RouteTicket,
        result: Result<SaveShapesResponse, PersistenceError>,
    ) -> Completion {
        let PlannerState::RouteReady(route) = &mut self.state else {
            return Completion::Stale;
        };
        if route.ticket != ticket {
            return Completion::Stale;
        }
        match result {
            Ok(response) => {
                tracing::info!("route saved to: {}", response.file_name);
                route.saved = Some(response.file_name);
                route.save_error = None;
                Completion::Applied
            }
            Err(err) => {
                tracing::error!("error saving shapes for {}: {}", route.route_id, err);
                route.save_error = Some(err.to_string());
                Completion::Failed
            }
        }
    }

    /// Routes the latest pending request and annotates the result, without
    /// saving it.
    pub fn route_blocking<R>(&mut self, router: &R) -> Result<&PlannedRoute, PlannerError>
    where
        R: Router + ?Sized,
    {
        let request = match (&self.state, &self.latest) {
            (PlannerState::ComputingRoute { .. }, Some(request)) => request.clone(),
            (PlannerState::RouteError(err), _) => return Err(err.clone()),
            _ => return Err(PlannerError::NothingToPlan),
        };

        let result = router.route(request.from, request.to);
        self.complete_route(request.ticket, result);
        match &self.state {
            PlannerState::RouteReady(route) => Ok(&**route),
            PlannerState::RouteError(err) => Err(err.clone()),
            _ => Err(PlannerError::NothingToPlan),
        }
    }

    /// Runs the latest pending request to completion: route, annotate, save.
    pub fn plan_blocking<R, K>(&mut self, router: &R, sink: &K) -> Result<RouteSummary, PlannerError>
    where
        R: Router + ?Sized,
        K: ShapeSink + ?Sized,
    {
        self.route_blocking(router)?;

        let (ticket, save) = self
            .pending_save()
            .ok_or(PlannerError::NothingToPlan)?;
        let saved = sink.save_shapes(&save);
        if self.record_save(ticket, saved) != Completion::Applied {
            let message = self
                .ready_route()
                .and_then(|route| route.save_error.clone())
                .unwrap_or_default();
            return Err(PlannerError::Persistence(message));
        }
        self.summary().ok_or(PlannerError::NothingToPlan)
    }

    fn clear_overlays(&mut self) {
        if let Some(layer_id) = self.route_layer.take() {
            self.surface.remove_layer(layer_id);
        }
        for layer_id in self.endpoint_markers.drain(..) {
            self.surface.remove_layer(layer_id);
        }
    }

    /// Removes every overlay and the base layer and destroys the surface.
    pub fn teardown(mut self) -> S {
        self.clear_overlays();
        self.surface.remove_layer(self.base_layer);
        for leftover in self.surface.layer_ids() {
            self.surface.remove_layer(leftover);
        }
        self.surface.destroy();
        self.surface
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
