//! Discovery endpoints

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

use beacon_core::models::{Algorithm, InstanceId};
use beacon_registry::discovery::DiscoveryResult;
use beacon_registry::DiscoverOptions;

use crate::http::{AppJson, AppQuery, AppResult, AppState, OkResponse};

pub fn create_discovery_router() -> Router<AppState> {
    Router::new()
        .route("/discover/{name}", get(discover))
        .route("/connections/release", post(release_connection))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct DiscoverQuery {
    pub algorithm: Option<String>,
    #[serde(default = "default_true")]
    pub healthy_only: bool,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default = "default_true")]
    pub load_balancing: bool,
    pub client_ip: Option<String>,
}

/// First hop of `X-Forwarded-For`, if any
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// GET /discover/{name}?algorithm=&healthy_only=&use_cache=
pub async fn discover(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    AppQuery(query): AppQuery<DiscoverQuery>,
) -> AppResult<Json<DiscoveryResult>> {
    let algorithm = query
        .algorithm
        .as_deref()
        .map(str::parse::<Algorithm>)
        .transpose()?;

    let options = DiscoverOptions {
        use_cache: query.use_cache,
        healthy_only: query.healthy_only,
        load_balancing: query.load_balancing,
        algorithm,
        client_ip: query.client_ip.or_else(|| forwarded_for(&headers)),
    };
    Ok(Json(state.discovery.discover_service(&name, &options).await?))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub service: String,
    pub instance_id: String,
}

/// POST /connections/release
pub async fn release_connection(
    State(state): State<AppState>,
    AppJson(req): AppJson<ReleaseRequest>,
) -> AppResult<Json<OkResponse>> {
    state
        .discovery
        .release_connection(&req.service, &InstanceId::from(req.instance_id));
    Ok(Json(OkResponse::ok()))
}
