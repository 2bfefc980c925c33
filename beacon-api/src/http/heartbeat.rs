//! Heartbeat ingestion and liveness queries

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use beacon_core::models::{InstanceId, ServiceId};
use beacon_registry::discovery::InactiveService;

use crate::http::{AppJson, AppQuery, AppResult, AppState, OkResponse};

pub fn create_heartbeat_router() -> Router<AppState> {
    Router::new()
        .route("/heartbeat", post(send_heartbeat))
        .route("/heartbeat/inactive", get(inactive_services))
        .route("/heartbeat/{service_id}/active", get(is_active))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub service_id: String,
    pub instance_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// POST /heartbeat
pub async fn send_heartbeat(
    State(state): State<AppState>,
    AppJson(req): AppJson<HeartbeatRequest>,
) -> AppResult<Json<OkResponse>> {
    let instance_id = req.instance_id.map(InstanceId::from);
    state
        .heartbeats
        .send_heartbeat(&ServiceId::from(req.service_id), instance_id.as_ref(), req.metadata)
        .await?;
    Ok(Json(OkResponse::ok()))
}

#[derive(Debug, Deserialize)]
pub struct ActiveQuery {
    pub instance_id: Option<String>,
    pub timeout_minutes: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ActiveResponse {
    pub active: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// GET /heartbeat/{service_id}/active?instance_id=&timeout_minutes=
pub async fn is_active(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    AppQuery(query): AppQuery<ActiveQuery>,
) -> AppResult<Json<ActiveResponse>> {
    let service_id = ServiceId::from(service_id);
    let instance_id = query.instance_id.map(InstanceId::from);
    let timeout = query
        .timeout_minutes
        .map_or(state.heartbeats.settings().default_timeout, |m| chrono::Duration::minutes(i64::from(m)));

    Ok(Json(ActiveResponse {
        active: state
            .heartbeats
            .is_active_within(&service_id, instance_id.as_ref(), timeout),
        last_heartbeat: state.heartbeats.last_heartbeat(&service_id, instance_id.as_ref()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct InactiveQuery {
    pub timeout_minutes: Option<u32>,
}

/// GET /heartbeat/inactive?timeout_minutes=
pub async fn inactive_services(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<InactiveQuery>,
) -> AppResult<Json<Vec<InactiveService>>> {
    let timeout = query
        .timeout_minutes
        .map_or(state.heartbeats.settings().default_timeout, |m| chrono::Duration::minutes(i64::from(m)));
    Ok(Json(state.heartbeats.get_inactive_services(timeout).await?))
}
