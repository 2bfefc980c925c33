//! Registration and service lookup endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use beacon_core::models::{Instance, InstanceId, RegisterRequest, Registration, ServiceDefinition, ServiceId};
use beacon_registry::discovery::{CatalogEntry, CatalogQuery};

use crate::http::{AppJson, AppQuery, AppResult, AppState, OkResponse};

pub fn create_registry_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/deregister/{service_id}", delete(deregister))
        .route("/deregister/{service_id}/{instance_id}", delete(deregister_instance))
        .route("/service/{name}", get(get_service))
        .route("/services", get(list_services))
        .route("/catalog", get(search_catalog))
        .route("/catalog/categories", get(categories))
}

/// POST /register
pub async fn register(
    State(state): State<AppState>,
    AppJson(req): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Registration>)> {
    let registration = state.registry.register(req).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

/// DELETE /deregister/{service_id}
pub async fn deregister(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> AppResult<Json<OkResponse>> {
    state.registry.deregister(&ServiceId::from(service_id)).await?;
    Ok(Json(OkResponse::ok()))
}

/// DELETE /deregister/{service_id}/{instance_id}
pub async fn deregister_instance(
    State(state): State<AppState>,
    Path((service_id, instance_id)): Path<(String, String)>,
) -> AppResult<Json<OkResponse>> {
    state
        .registry
        .deregister_instance(&ServiceId::from(service_id), &InstanceId::from(instance_id))
        .await?;
    Ok(Json(OkResponse::ok()))
}

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    #[serde(default)]
    pub healthy_only: bool,
}

#[derive(Debug, Serialize)]
pub struct ServiceResponse {
    #[serde(flatten)]
    pub service: ServiceDefinition,
    pub instances: Vec<Instance>,
}

/// GET /service/{name}?healthy_only=bool
pub async fn get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
    AppQuery(query): AppQuery<ServiceQuery>,
) -> AppResult<Json<ServiceResponse>> {
    let record = state.registry.get_service_by_name(&name).await?;
    Ok(Json(ServiceResponse {
        service: record.definition.clone(),
        instances: record.instances_filtered(query.healthy_only),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
}

/// GET /services?category=
pub async fn list_services(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ListQuery>,
) -> AppResult<Json<Vec<ServiceDefinition>>> {
    let services = match query.category.as_deref() {
        Some(category) => state.registry.list_by_category(category).await?,
        None => state.registry.list_all().await?,
    };
    Ok(Json(services))
}

#[derive(Debug, Deserialize)]
pub struct CatalogParams {
    pub q: Option<String>,
    pub category: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub healthy_only: bool,
}

/// GET /catalog?q=&category=&tag=&healthy_only=
pub async fn search_catalog(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<CatalogParams>,
) -> AppResult<Json<Vec<CatalogEntry>>> {
    let query = CatalogQuery {
        text: params.q,
        category: params.category,
        tag: params.tag,
        healthy_only: params.healthy_only,
    };
    Ok(Json(state.catalog.search(&query).await?))
}

/// GET /catalog/categories
pub async fn categories(State(state): State<AppState>) -> AppResult<Json<BTreeMap<String, usize>>> {
    Ok(Json(state.catalog.categories().await?))
}
