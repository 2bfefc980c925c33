// Module: http
// HTTP/JSON API over the registry services

pub mod discovery;
pub mod error;
pub mod health;
pub mod health_check;
pub mod heartbeat;
pub mod registry;
pub mod stats;

use axum::{
    extract::{FromRequest, FromRequestParts},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use beacon_registry::{
    HealthCheckService, HeartbeatService, LoadBalancerService, ServiceCatalog, ServiceDiscovery, ServiceRegistry,
    Services,
};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub heartbeats: Arc<HeartbeatService>,
    pub health: Arc<HealthCheckService>,
    pub load_balancer: Arc<LoadBalancerService>,
    pub discovery: Arc<ServiceDiscovery>,
    pub catalog: Arc<ServiceCatalog>,
}

impl From<&Services> for AppState {
    fn from(services: &Services) -> Self {
        Self {
            registry: services.registry.clone(),
            heartbeats: services.heartbeats.clone(),
            health: services.health.clone(),
            load_balancer: services.load_balancer.clone(),
            discovery: services.discovery.clone(),
            catalog: services.catalog.clone(),
        }
    }
}

/// JSON body extractor whose rejection is an `AppError`
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Query string extractor whose rejection is an `AppError`
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

/// Acknowledgement body for writes with nothing else to return
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    #[must_use]
    pub const fn ok() -> Self {
        Self { ok: true }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(services: &Services) -> Router {
    let state = AppState::from(services);

    let api = Router::new()
        .merge(registry::create_registry_router())
        .merge(heartbeat::create_heartbeat_router())
        .merge(discovery::create_discovery_router())
        .merge(health_check::create_health_check_router())
        .merge(stats::create_stats_router());

    Router::new()
        // Liveness and metrics stay at the root for scrapers and probes
        .merge(health::create_health_router())
        .nest("/api/v1", api)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
