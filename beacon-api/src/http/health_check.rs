//! Active health-check endpoints

use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::config::HealthCheckConfig;
use beacon_registry::discovery::{CheckOptions, HealthSweep, ServiceHealthReport};

use crate::http::{AppError, AppResult, AppState};

pub fn create_health_check_router() -> Router<AppState> {
    Router::new()
        .route("/health-check", post(check_all))
        .route("/health-check/last", get(last_results))
        .route("/health-check/{name}", post(check_service))
}

/// Overrides for the configured check settings. Durations are milliseconds;
/// `timeout` and `interval` are accepted as the short field names.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckRequest {
    #[serde(alias = "timeout")]
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    #[serde(alias = "interval")]
    pub interval_ms: Option<u64>,
}

impl CheckRequest {
    /// An empty body means "use the configured defaults".
    fn from_body(body: &Bytes) -> AppResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| AppError::bad_request(format!("Invalid request body: {e}")))
    }

    /// Merge over `defaults`, rejecting settings outside the allowed bounds
    fn options(&self, defaults: &CheckOptions) -> AppResult<CheckOptions> {
        let options = CheckOptions {
            timeout: self.timeout_ms.map_or(defaults.timeout, Duration::from_millis),
            retries: self.retries.unwrap_or(defaults.retries),
            interval: self.interval_ms.map_or(defaults.interval, Duration::from_millis),
        };

        let errors = HealthCheckConfig::check_errors(
            u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX),
            options.retries,
            u64::try_from(options.interval.as_millis()).unwrap_or(u64::MAX),
        );
        if errors.is_empty() {
            Ok(options)
        } else {
            Err(AppError::bad_request(errors.join("; ")))
        }
    }
}

/// POST /health-check/{name}
pub async fn check_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> AppResult<Json<ServiceHealthReport>> {
    let req = CheckRequest::from_body(&body)?;
    let options = req.options(state.health.default_options())?;
    Ok(Json(state.health.check_service(&name, &options).await?))
}

/// POST /health-check
pub async fn check_all(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<HealthSweep>> {
    let req = CheckRequest::from_body(&body)?;
    let options = req.options(state.health.default_options())?;
    Ok(Json(state.health.check_all_services(&options).await?))
}

/// GET /health-check/last
///
/// Serves the cached sweep; concurrent callers on a cold cache share one sweep.
pub async fn last_results(State(state): State<AppState>) -> AppResult<Json<Arc<HealthSweep>>> {
    Ok(Json(state.health.latest_or_sweep().await?))
}
