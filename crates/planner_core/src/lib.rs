pub mod api;
pub mod catalog;
pub mod geo;
pub mod map;
pub mod notice;
pub mod planner;
pub mod routing;
pub mod shape;
pub mod shapes_file;
pub mod stop_map;
pub mod store;

pub use api::{
    validate_save_request, ErrorResponse, HttpShapeSink, PersistenceError, PlanRequest,
    PlanResponse, SaveShapesRequest, SaveShapesResponse, ShapeSink,
};
pub use catalog::{
    load_catalog, load_catalog_from_bytes, load_catalog_from_path, CatalogError, CatalogOrder,
    StopCatalog,
};
pub use geo::{haversine_meters, DistanceMetric, Haversine};
pub use map::{LayerSurface, MapSnapshot, MapSurface};
pub use notice::{CatalogNotice, NoticeContainer, NoticeKind};
pub use planner::{
    Completion, PlannedRoute, PlannerError, PlannerState, RoutePlanner, RouteRequest,
    RouteSummary, RouteTicket,
};
pub use routing::{OsrmRouter, RoutePath, Router, RoutingError, StraightLineRouter};
pub use shape::annotate_path;
pub use stop_map::{RenderReport, StopMapView};
pub use store::{ShapeStore, StoreError};

pub use shape_planner_model as model;
