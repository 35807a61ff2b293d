//! Wire types of the persistence endpoint and the sinks that accept them.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::planner::RouteSummary;
use crate::store::{ShapeStore, StoreError};
use shape_planner_model::{LatLng, ModelError, RouteId, ShapePoint};

pub const SAVE_SHAPES_PATH: &str = "/api/save-shapes";
pub const PLAN_PATH: &str = "/api/plan";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveShapesRequest {
    /// Pre-formatted rows without the header.
    pub shapes_content: String,
    pub route_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveShapesResponse {
    pub success: bool,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub start_stop_id: String,
    pub end_stop_id: String,
    /// When false the route is only computed; the caller posts `rows` to
    /// the save endpoint itself and can retry that without rerouting.
    #[serde(default = "default_save")]
    pub save: bool,
}

fn default_save() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub route_id: RouteId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub summary: RouteSummary,
    /// Stop positions, which the routed path may not pass through exactly.
    pub start: LatLng,
    pub end: LatLng,
    pub points: Vec<ShapePoint>,
    /// `shapes.txt` rows without the header, ready for `shapesContent`.
    pub rows: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("invalid route id: {0}")]
    InvalidRouteId(#[from] ModelError),
    #[error("shapes content is empty")]
    EmptyContent,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("save request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected save ({status}): {error}")]
    Rejected { status: u16, error: String },
}

/// Destination of a computed shape.
pub trait ShapeSink {
    fn save_shapes(&self, request: &SaveShapesRequest)
        -> Result<SaveShapesResponse, PersistenceError>;
}

/// Checks a request the way the endpoint does before touching the disk.
pub fn validate_save_request(request: &SaveShapesRequest) -> Result<RouteId, PersistenceError> {
    let route_id = RouteId::parse(&request.route_id)?;
    if request.shapes_content.trim().is_empty() {
        return Err(PersistenceError::EmptyContent);
    }
    Ok(route_id)
}

impl ShapeSink for ShapeStore {
    fn save_shapes(
        &self,
        request: &SaveShapesRequest,
    ) -> Result<SaveShapesResponse, PersistenceError> {
        let route_id = validate_save_request(request)?;
        let saved = self.save(&route_id, &request.shapes_content)?;
        Ok(SaveShapesResponse {
            success: true,
            file_name: saved.file_name,
        })
    }
}

/// Posts shapes to a running server's `/api/save-shapes`.
#[derive(Debug, Clone)]
pub struct HttpShapeSink {
    base_url: String,
    timeout: Duration,
}

impl HttpShapeSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, SAVE_SHAPES_PATH)
    }
}

impl ShapeSink for HttpShapeSink {
    fn save_shapes(
        &self,
        request: &SaveShapesRequest,
    ) -> Result<SaveShapesResponse, PersistenceError> {
        let client = Client::builder()
            .user_agent(format!("shape-planner/{}", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .build()?;
        let response = client.post(self.endpoint()).json(request).send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json()?);
        }
        let error = response
            .json::<ErrorResponse>()
            .map(|body| body.error)
            .unwrap_or_else(|_| status.to_string());
        Err(PersistenceError::Rejected {
            status: status.as_u16(),
            error,
        })
    }
}
