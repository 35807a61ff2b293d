use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use include_dir::{include_dir, Dir};
use mime_guess::MimeGuess;

use shape_planner_core::api::{PLAN_PATH, SAVE_SHAPES_PATH};
use shape_planner_core::map::{LayerSurface, MapSnapshot};
use shape_planner_core::routing::{self, OsrmRouter, StraightLineRouter};
use shape_planner_core::{
    load_catalog_from_path, validate_save_request, CatalogOrder, ErrorResponse, PlanRequest,
    PlanResponse, PlannerError, PlannerState, RoutePlanner, SaveShapesRequest, SaveShapesResponse,
    ShapeStore, StopCatalog, StopMapView, StoreError,
};
use shape_planner_model::{RouteId, Stop};

static WEB_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/web");

const BODY_LIMIT_BYTES: usize = 50 * 1024 * 1024;
const SAVE_FAILED: &str = "Failed to save shapes";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let data_dir = load_data_dir();
    let shapes_dir = data_dir.join("shapes");
    let store = ShapeStore::open(&shapes_dir)
        .with_context(|| format!("create shapes directory {}", shapes_dir.display()))?;
    tracing::info!("saving shapes under {}", shapes_dir.display());

    let stops_file = load_stops_file(&data_dir);
    let catalog = match load_catalog_from_path(&stops_file, CatalogOrder::Source) {
        Ok(catalog) => catalog,
        Err(err) => {
            // The save endpoint works without stops; only the map and planner need them.
            tracing::warn!("stop catalog unavailable: {}", err);
            StopCatalog::default()
        }
    };

    let state = AppState {
        catalog: Arc::new(catalog),
        store,
        router: load_router(),
    };
    tracing::info!("routing with {}", state.router.name());

    let app = build_app(state);
    let addr = load_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[derive(Clone)]
struct AppState {
    catalog: Arc<StopCatalog>,
    store: ShapeStore,
    router: Arc<dyn routing::Router>,
}

fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/version", get(version))
        .route(SAVE_SHAPES_PATH, post(save_shapes))
        .route(PLAN_PATH, post(plan_route))
        .route("/api/stops", get(list_stops))
        .route("/api/map/stops", get(map_stops))
        .route("/api/shapes/:route_id", get(get_shape))
        .route("/", get(index_html))
        .route("/*path", get(static_file))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    version: String,
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(error))).into_response()
}

/// The body is decoded by hand so that non-JSON payloads and wrong field
/// types all answer 400 with an `{ error }` body.
async fn save_shapes(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_save_request(&body) {
        Ok(request) => request,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };
    let route_id = match validate_save_request(&request) {
        Ok(route_id) => route_id,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        store.save(&route_id, &request.shapes_content)
    })
    .await;

    match result {
        Ok(Ok(saved)) => Json(SaveShapesResponse {
            success: true,
            file_name: saved.file_name,
        })
        .into_response(),
        Ok(Err(err)) => {
            tracing::error!("error saving shapes: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, SAVE_FAILED)
        }
        Err(err) => {
            tracing::error!("save task failed: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, SAVE_FAILED)
        }
    }
}

fn parse_save_request(body: &[u8]) -> Result<SaveShapesRequest, &'static str> {
    let value: Value = serde_json::from_slice(body).map_err(|_| "Request body must be JSON")?;
    let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
    match (field("shapesContent"), field("routeId")) {
        (Some(shapes_content), Some(route_id)) => Ok(SaveShapesRequest {
            shapes_content,
            route_id,
        }),
        _ => Err("shapesContent and routeId must be strings"),
    }
}

#[derive(Debug, Default, Deserialize)]
struct StopsQuery {
    order: Option<String>,
    selectable: Option<bool>,
}

#[derive(Debug, Serialize)]
struct StopsResponse {
    stops: Vec<Stop>,
    skipped: usize,
}

async fn list_stops(State(state): State<AppState>, Query(query): Query<StopsQuery>) -> Response {
    let order = match query.order.as_deref() {
        None | Some("source") => CatalogOrder::Source,
        Some("name") | Some("by_name") => CatalogOrder::ByName,
        Some(other) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("unknown order {:?}, expected source or name", other),
            )
        }
    };
    let mut catalog = (*state.catalog).clone();
    catalog.reorder(order);
    let stops = if query.selectable.unwrap_or(false) {
        catalog.selectable().cloned().collect()
    } else {
        catalog.stops().to_vec()
    };
    Json(StopsResponse {
        stops,
        skipped: catalog.skipped_count(),
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct MapStopsResponse {
    #[serde(flatten)]
    snapshot: MapSnapshot,
    invalid: Vec<String>,
    dropped: usize,
}

async fn map_stops(State(state): State<AppState>) -> Json<MapStopsResponse> {
    let mut view = StopMapView::mount(LayerSurface::new());
    let report = view.render(&state.catalog);
    Json(MapStopsResponse {
        snapshot: view.surface().snapshot(),
        invalid: report.invalid,
        dropped: report.dropped,
    })
}

async fn plan_route(
    State(state): State<AppState>,
    payload: Result<Json<PlanRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let result = tokio::task::spawn_blocking(move || run_plan(&state, &request)).await;
    match result {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(err)) => {
            let status = match &err {
                PlannerError::RouteComputation(_) => StatusCode::BAD_GATEWAY,
                PlannerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            };
            if status.is_server_error() {
                tracing::error!("planning failed: {}", err);
            }
            error_response(status, err.to_string())
        }
        Err(err) => {
            tracing::error!("plan task failed: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "planning failed")
        }
    }
}

fn run_plan(state: &AppState, request: &PlanRequest) -> Result<PlanResponse, PlannerError> {
    let mut planner = RoutePlanner::new(LayerSurface::new(), state.catalog.clone());
    planner.select_start(&request.start_stop_id);
    planner.select_end(&request.end_stop_id);
    if let PlannerState::PartialSelection | PlannerState::NoSelection = planner.state() {
        return Err(PlannerError::NothingToPlan);
    }

    if request.save {
        planner.plan_blocking(state.router.as_ref(), &state.store)?;
    } else {
        planner.route_blocking(state.router.as_ref())?;
    }
    let route = planner.ready_route().ok_or(PlannerError::NothingToPlan)?;
    Ok(PlanResponse {
        route_id: route.route_id.clone(),
        file_name: route.saved.clone(),
        summary: route.summary(),
        // Selectable stops always have a position.
        start: route.start.position().unwrap_or_default(),
        end: route.end.position().unwrap_or_default(),
        points: route.points.clone(),
        rows: route.rows.clone(),
    })
}

async fn get_shape(State(state): State<AppState>, AxumPath(route_id): AxumPath<String>) -> Response {
    let route_id = match RouteId::parse(&route_id) {
        Ok(route_id) => route_id,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.read_raw(&route_id)).await;
    match result {
        Ok(Ok(contents)) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            contents,
        )
            .into_response(),
        Ok(Err(err @ StoreError::NotFound(_))) => {
            error_response(StatusCode::NOT_FOUND, err.to_string())
        }
        Ok(Err(err)) => {
            tracing::error!("error reading shape: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read shape")
        }
        Err(err) => {
            tracing::error!("read task failed: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read shape")
        }
    }
}

async fn index_html() -> Response {
    serve_static_path("index.html")
}

async fn static_file(AxumPath(path): AxumPath<String>) -> Response {
    let Some(clean_path) = sanitize_path(&path) else {
        return not_found();
    };
    if clean_path.is_empty() {
        return serve_static_path("index.html");
    }
    serve_static_path(&clean_path)
}

fn sanitize_path(path: &str) -> Option<String> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            segment => segments.push(segment),
        }
    }
    Some(segments.join("/"))
}

fn serve_static_path(path: &str) -> Response {
    let Some(file) = WEB_DIR.get_file(path) else {
        return not_found();
    };
    let mime = MimeGuess::from_path(path).first_or_octet_stream();
    let mut response = Response::new(Body::from(file.contents().to_owned()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_str(mime.as_ref())
            .unwrap_or_else(|_| header::HeaderValue::from_static("application/octet-stream")),
    );
    response
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "Not Found",
    )
        .into_response()
}

fn load_addr() -> String {
    std::env::var("SHAPE_PLANNER_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string())
}

fn load_data_dir() -> PathBuf {
    std::env::var("SHAPE_PLANNER_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

fn load_stops_file(data_dir: &std::path::Path) -> PathBuf {
    std::env::var("SHAPE_PLANNER_STOPS_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join(shape_planner_core::catalog::STOPS_FILE))
}

fn load_router() -> Arc<dyn routing::Router> {
    let kind = std::env::var("SHAPE_PLANNER_ROUTER").unwrap_or_default();
    match kind.trim().to_ascii_lowercase().as_str() {
        "straight" => Arc::new(StraightLineRouter::default()),
        "" | "osrm" => {
            let url = std::env::var("SHAPE_PLANNER_OSRM_URL")
                .unwrap_or_else(|_| routing::DEFAULT_OSRM_URL.to_string());
            let profile = std::env::var("SHAPE_PLANNER_OSRM_PROFILE")
                .unwrap_or_else(|_| routing::DEFAULT_OSRM_PROFILE.to_string());
            Arc::new(OsrmRouter::new(url, profile))
        }
        other => {
            tracing::warn!("unknown router {:?}, falling back to osrm", other);
            Arc::new(OsrmRouter::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use shape_planner_core::{load_catalog, RoutePath, RoutingError};
    use shape_planner_model::LatLng;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tower::ServiceExt;

    const STOPS: &str = "stop_id,stop_code,stop_name,stop_lat,stop_lon\n\
        S2,200,market square,51.50,-0.10\n\
        S1,100,Abbey Road,51.53,-0.18\n\
        S3,,Broken,north,-0.12\n";

    struct NoRouteRouter;

    impl routing::Router for NoRouteRouter {
        fn name(&self) -> &'static str {
            "none"
        }

        fn route(&self, from: LatLng, to: LatLng) -> Result<RoutePath, RoutingError> {
            Err(RoutingError::NoRoute { from, to })
        }
    }

    fn temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), nanos))
    }

    fn state_with(store: ShapeStore, router: Arc<dyn routing::Router>) -> AppState {
        AppState {
            catalog: Arc::new(load_catalog(STOPS.as_bytes(), CatalogOrder::Source).unwrap()),
            store,
            router,
        }
    }

    fn test_state(prefix: &str) -> (AppState, PathBuf) {
        let dir = temp_dir(prefix);
        let store = ShapeStore::open(&dir).unwrap();
        (
            state_with(store, Arc::new(StraightLineRouter::default())),
            dir,
        )
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn saves_shapes_and_overwrites() {
        let (state, dir) = test_state("planner_web_save");
        let app = build_app(state);

        let body = r#"{"shapesContent":"S1_to_S2,51.53,-0.18,0,0.00\n","routeId":"S1_to_S2"}"#;
        let (status, bytes) = send(app.clone(), post_json(SAVE_SHAPES_PATH, body)).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["fileName"], "shape_S1_to_S2.txt");

        let second = r#"{"shapesContent":"S1_to_S2,1,2,0,0.00\n","routeId":"S1_to_S2"}"#;
        let (status, _) = send(app, post_json(SAVE_SHAPES_PATH, second)).await;
        assert_eq!(status, StatusCode::OK);
        let contents = std::fs::read_to_string(dir.join("shape_S1_to_S2.txt")).unwrap();
        assert_eq!(
            contents,
            "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence,shape_dist_traveled\nS1_to_S2,1,2,0,0.00\n"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn rejects_bad_save_requests() {
        let (state, dir) = test_state("planner_web_bad_save");
        let app = build_app(state);

        for body in [
            "not json",
            r#"{"routeId":"A_to_B"}"#,
            r#"{"shapesContent":5,"routeId":"A_to_B"}"#,
            r#"{"shapesContent":"x\n","routeId":"../../etc/passwd"}"#,
            r#"{"shapesContent":"x\n","routeId":"a/b"}"#,
            r#"{"shapesContent":"","routeId":"A_to_B"}"#,
        ] {
            let (status, bytes) = send(app.clone(), post_json(SAVE_SHAPES_PATH, body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
            let json: Value = serde_json::from_slice(&bytes).unwrap();
            assert!(json["error"].is_string());
        }
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn write_failure_is_500() {
        let dir = temp_dir("planner_web_write_failure");
        std::fs::create_dir_all(&dir).unwrap();
        let blocker = dir.join("not_a_dir");
        std::fs::write(&blocker, "file").unwrap();
        let state = state_with(
            ShapeStore::new(blocker.join("shapes")),
            Arc::new(StraightLineRouter::default()),
        );

        let body = r#"{"shapesContent":"x\n","routeId":"A_to_B"}"#;
        let (status, bytes) = send(build_app(state), post_json(SAVE_SHAPES_PATH, body)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], SAVE_FAILED);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn lists_stops_by_name() {
        let (state, dir) = test_state("planner_web_stops");
        let request = Request::get("/api/stops?order=name&selectable=true")
            .body(Body::empty())
            .unwrap();
        let (status, bytes) = send(build_app(state), request).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        let names: Vec<&str> = json["stops"]
            .as_array()
            .unwrap()
            .iter()
            .map(|stop| stop["stop_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Abbey Road", "market square"]);
        assert_eq!(json["skipped"], 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn map_layers_report_invalid_stops() {
        let (state, dir) = test_state("planner_web_map");
        let request = Request::get("/api/map/stops").body(Body::empty()).unwrap();
        let (status, bytes) = send(build_app(state), request).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["layers"].as_array().unwrap().len(), 3);
        assert_eq!(json["invalid"][0], "Broken");
        assert_eq!(json["view"]["zoom"], 13);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn plans_saves_and_serves_route() {
        let (state, dir) = test_state("planner_web_plan");
        let app = build_app(state);

        let body = r#"{"startStopId":"S1","endStopId":"S2"}"#;
        let (status, bytes) = send(app.clone(), post_json(PLAN_PATH, body)).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["routeId"], "S1_to_S2");
        assert_eq!(json["fileName"], "shape_S1_to_S2.txt");
        assert_eq!(json["summary"]["from"], "Abbey Road");
        assert_eq!(json["points"][0]["cumulativeDistanceM"], 0.0);

        let request = Request::get("/api/shapes/S1_to_S2").body(Body::empty()).unwrap();
        let (status, bytes) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 18);

        let missing = Request::get("/api/shapes/S2_to_S1").body(Body::empty()).unwrap();
        let (status, _) = send(app, missing).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unsaved_plan_can_be_saved_separately() {
        let (state, dir) = test_state("planner_web_plan_unsaved");
        let app = build_app(state);

        let body = r#"{"startStopId":"S1","endStopId":"S2","save":false}"#;
        let (status, bytes) = send(app.clone(), post_json(PLAN_PATH, body)).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json.get("fileName").is_none());
        assert_eq!(json["start"]["lat"], 51.53);
        assert_eq!(json["start"]["lon"], -0.18);
        assert_eq!(json["end"]["lat"], 51.50);
        let rows = json["rows"].as_str().unwrap().to_string();
        assert!(rows.starts_with("S1_to_S2,51.53,-0.18,0,0.00\n"));
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

        let save = serde_json::json!({ "shapesContent": rows, "routeId": json["routeId"] });
        let (status, bytes) = send(app, post_json(SAVE_SHAPES_PATH, &save.to_string())).await;
        assert_eq!(status, StatusCode::OK);
        let saved: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(saved["fileName"], "shape_S1_to_S2.txt");
        let contents = std::fs::read_to_string(dir.join("shape_S1_to_S2.txt")).unwrap();
        assert!(contents.ends_with(&rows));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn plan_errors_map_to_status_codes() {
        let (state, dir) = test_state("planner_web_plan_errors");
        let app = build_app(state.clone());
        let (status, _) = send(
            app.clone(),
            post_json(PLAN_PATH, r#"{"startStopId":"S1","endStopId":"S1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(
            app.clone(),
            post_json(PLAN_PATH, r#"{"startStopId":"S1","endStopId":"S3"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(app, post_json(PLAN_PATH, r#"{"startStopId":"S1"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let failing = AppState {
            router: Arc::new(NoRouteRouter),
            ..state
        };
        let (status, _) = send(
            build_app(failing),
            post_json(PLAN_PATH, r#"{"startStopId":"S1","endStopId":"S2"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn sanitize_rejects_parent_segments() {
        assert_eq!(sanitize_path("app.js").as_deref(), Some("app.js"));
        assert_eq!(sanitize_path("/./css//site.css").as_deref(), Some("css/site.css"));
        assert!(sanitize_path("../Cargo.toml").is_none());
    }

    #[tokio::test]
    async fn serves_index_page() {
        let (state, dir) = test_state("planner_web_index");
        let (status, bytes) = send(
            build_app(state),
            Request::get("/").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&bytes).contains("leaflet"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
