//! HTTP surface of the registry.
//!
//! Spokes register, heartbeat, and deregister over these routes; anything
//! that wants a read-only view can hit discover/tools. Internal interface:
//! JSON bodies, error kinds mapped onto status codes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use finhub_core::{DiscoverFilter, HealthStatus, InstanceId, ServiceRegistration};

use crate::registry::{RegistryError, ServiceRegistry};

/// Shared state for the registry API.
#[derive(Clone)]
pub struct RegistryApiState {
    pub registry: Arc<ServiceRegistry>,
}

/// Build the registry router.
pub fn router(registry: Arc<ServiceRegistry>) -> Router {
    Router::new()
        .route("/registry/register", post(register))
        .route("/registry/:instance_id", delete(deregister))
        .route("/registry/:instance_id/heartbeat", post(heartbeat))
        .route("/registry/discover", get(discover))
        .route("/registry/tools", get(tools))
        .layer(TraceLayer::new_for_http())
        .with_state(RegistryApiState { registry })
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistryError::ToolConflict { .. } => StatusCode::CONFLICT,
            RegistryError::UnknownInstance(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn register(
    State(state): State<RegistryApiState>,
    Json(registration): Json<ServiceRegistration>,
) -> Result<impl IntoResponse, RegistryError> {
    let instance = state.registry.register(registration).await?;
    Ok(Json(instance))
}

async fn deregister(
    State(state): State<RegistryApiState>,
    Path(instance_id): Path<String>,
) -> Result<impl IntoResponse, RegistryError> {
    state
        .registry
        .deregister(&InstanceId::new(instance_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn heartbeat(
    State(state): State<RegistryApiState>,
    Path(instance_id): Path<String>,
) -> Result<impl IntoResponse, RegistryError> {
    state
        .registry
        .heartbeat(&InstanceId::new(instance_id))
        .await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct DiscoverQuery {
    name: Option<String>,
    tag: Option<String>,
    min_status: Option<String>,
}

fn parse_min_status(raw: Option<&str>) -> Result<HealthStatus, Response> {
    match raw {
        None => Ok(HealthStatus::Passing),
        Some(raw) => raw.parse::<HealthStatus>().map_err(|e| {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e }))).into_response()
        }),
    }
}

async fn discover(
    State(state): State<RegistryApiState>,
    Query(query): Query<DiscoverQuery>,
) -> Result<impl IntoResponse, Response> {
    let min_status = parse_min_status(query.min_status.as_deref())?;
    let filter = DiscoverFilter {
        name: query.name,
        tag: query.tag,
        min_status,
    };
    Ok(Json(state.registry.discover(&filter).await))
}

#[derive(Debug, Deserialize)]
struct ToolsQuery {
    min_status: Option<String>,
}

async fn tools(
    State(state): State<RegistryApiState>,
    Query(query): Query<ToolsQuery>,
) -> Result<impl IntoResponse, Response> {
    let min_status = parse_min_status(query.min_status.as_deref())?;
    Ok(Json(state.registry.list_tools(min_status).await))
}
