//! Aggregate counters

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;

use beacon_registry::discovery::{DiscoveryCacheStats, HeartbeatStats, LoadBalancerStats, RegistryStats};

use crate::http::{AppResult, AppState};

pub fn create_stats_router() -> Router<AppState> {
    Router::new().route("/stats", get(get_stats))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub registry: RegistryStats,
    pub heartbeat: HeartbeatStats,
    pub load_balancer: LoadBalancerStats,
    pub discovery_cache: DiscoveryCacheStats,
}

/// GET /stats
pub async fn get_stats(State(state): State<AppState>) -> AppResult<Json<StatsResponse>> {
    Ok(Json(StatsResponse {
        registry: state.registry.stats().await?,
        heartbeat: state.heartbeats.stats(),
        load_balancer: state.load_balancer.stats(),
        discovery_cache: state.discovery.cache_stats().await,
    }))
}
