//! Active health checking
//!
//! Probes instances with retry, writes each verdict back into the registry as
//! a timestamped status signal, and keeps the latest sweep in a short-TTL cache
//! so frequent status readers don't each trigger a full probe sweep.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use beacon_core::config::HealthCheckConfig;
use beacon_core::metrics::health as metrics;
use beacon_core::models::{Instance, InstanceId, InstanceStatus, ServiceId, ServiceRecord, StatusSignal};
use beacon_core::{Error, Result};

use super::probe::{Probe, ProbeOutcome};
use super::registry::{Removal, RemovalListener, ServiceRegistry};

/// Per-check probe settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOptions {
    /// Per-attempt probe timeout
    pub timeout: Duration,
    /// Attempt budget; 0 is treated as 1
    pub retries: u32,
    /// Pause between failed attempts
    pub interval: Duration,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self::from(&HealthCheckConfig::default())
    }
}

impl From<&HealthCheckConfig> for CheckOptions {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            retries: config.retries,
            interval: Duration::from_millis(config.interval_ms),
        }
    }
}

/// Verdict for one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub instance_id: InstanceId,
    pub service_id: ServiceId,
    pub endpoint: String,
    pub status: InstanceStatus,
    /// Latency of the deciding attempt
    pub latency_ms: u64,
    pub attempts: u32,
    pub error: Option<String>,
    /// When the check began; used as the signal timestamp on write-back
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// 0 when there is nothing to check
    pub health_percentage: f64,
}

impl HealthSummary {
    fn from_results<'a>(results: impl IntoIterator<Item = &'a HealthCheckResult>) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.total += 1;
            if result.status.is_healthy() {
                summary.healthy += 1;
            } else {
                summary.unhealthy += 1;
            }
        }
        summary.health_percentage = percentage(summary.healthy, summary.total);
        summary
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealthReport {
    pub service_id: ServiceId,
    pub service: String,
    pub results: Vec<HealthCheckResult>,
    pub summary: HealthSummary,
}

/// Result of checking every registered service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSweep {
    pub services: Vec<ServiceHealthReport>,
    pub summary: HealthSummary,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Rolling statistics over the most recent checks of one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHealthStats {
    pub checks: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub last_status: InstanceStatus,
    pub last_checked_at: DateTime<Utc>,
}

pub struct HealthCheckService {
    registry: Arc<ServiceRegistry>,
    probe: Arc<dyn Probe>,
    defaults: CheckOptions,
    stats_window: usize,
    windows: DashMap<InstanceId, VecDeque<HealthCheckResult>>,
    last_sweep: moka::future::Cache<(), Arc<HealthSweep>>,
}

impl HealthCheckService {
    #[must_use]
    pub fn new(
        registry: Arc<ServiceRegistry>,
        probe: Arc<dyn Probe>,
        defaults: CheckOptions,
        stats_window: usize,
        result_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            probe,
            defaults,
            stats_window: stats_window.max(1),
            windows: DashMap::new(),
            last_sweep: moka::future::CacheBuilder::new(1).time_to_live(result_ttl).build(),
        }
    }

    #[must_use]
    pub fn from_config(registry: Arc<ServiceRegistry>, probe: Arc<dyn Probe>, config: &HealthCheckConfig) -> Self {
        Self::new(
            registry,
            probe,
            CheckOptions::from(config),
            config.stats_window,
            Duration::from_secs(config.result_ttl_secs),
        )
    }

    #[must_use]
    pub const fn default_options(&self) -> &CheckOptions {
        &self.defaults
    }

    /// Probe one instance up to `options.retries` times.
    ///
    /// Stops at the first success. If every attempt fails the verdict is
    /// unhealthy with the last error. Never fails itself.
    pub async fn check_instance(&self, instance: &Instance, options: &CheckOptions) -> HealthCheckResult {
        let checked_at = self.registry.clock().now();
        let budget = options.retries.max(1);
        let mut last = ProbeOutcome::failure(Duration::ZERO, "not probed");
        let mut attempts = 0;

        for attempt in 1..=budget {
            attempts = attempt;
            let started = Instant::now();
            let outcome = match tokio::time::timeout(options.timeout, self.probe.probe(instance, options.timeout)).await {
                Ok(outcome) => outcome,
                Err(_) => ProbeOutcome::failure(
                    started.elapsed(),
                    format!("probe timed out after {}ms", options.timeout.as_millis()),
                ),
            };

            if outcome.success {
                metrics::PROBE_ATTEMPTS.with_label_values(&["success"]).inc();
                last = outcome;
                break;
            }

            metrics::PROBE_ATTEMPTS.with_label_values(&["failure"]).inc();
            let failure = Error::ProbeFailure(format!(
                "{} ({}) attempt {attempt}/{budget}: {}",
                instance.id,
                instance.endpoint(),
                outcome.error.as_deref().unwrap_or("no success signal")
            ));
            tracing::debug!(error = %failure, "Health probe attempt failed");
            last = ProbeOutcome {
                error: Some(failure.to_string()),
                ..outcome
            };

            if attempt < budget {
                tokio::time::sleep(options.interval).await;
            }
        }

        let status = if last.success {
            InstanceStatus::Healthy
        } else {
            InstanceStatus::Unhealthy
        };
        metrics::CHECK_VERDICTS.with_label_values(&[status.as_str()]).inc();

        let result = HealthCheckResult {
            instance_id: instance.id.clone(),
            service_id: instance.service_id.clone(),
            endpoint: instance.endpoint(),
            status,
            latency_ms: u64::try_from(last.latency.as_millis()).unwrap_or(u64::MAX),
            attempts,
            error: last.error,
            checked_at,
        };
        self.record(&result);
        result
    }

    fn record(&self, result: &HealthCheckResult) {
        let mut window = self.windows.entry(result.instance_id.clone()).or_default();
        window.push_back(result.clone());
        while window.len() > self.stats_window {
            window.pop_front();
        }
    }

    /// Check every instance of the named service and write verdicts back
    pub async fn check_service(&self, name: &str, options: &CheckOptions) -> Result<ServiceHealthReport> {
        let record = self.registry.get_service_by_name(name).await?;
        Ok(self.check_record(&record, options).await)
    }

    async fn check_record(&self, record: &ServiceRecord, options: &CheckOptions) -> ServiceHealthReport {
        let results = join_all(
            record
                .instances
                .iter()
                .map(|instance| self.check_instance(instance, options)),
        )
        .await;

        for result in &results {
            let signal = StatusSignal::probe(result.status, result.checked_at);
            match self
                .registry
                .set_instance_status(&result.service_id, &result.instance_id, signal)
                .await
            {
                Ok(_) => {}
                Err(Error::NotFound(_)) => {
                    // Removal already ran its purge; drop what this check added
                    self.windows.remove(&result.instance_id);
                    tracing::warn!(
                        service_id = %result.service_id,
                        instance_id = %result.instance_id,
                        "Instance vanished before health verdict could be recorded"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        service_id = %result.service_id,
                        instance_id = %result.instance_id,
                        error = %e,
                        "Failed to record health verdict"
                    );
                }
            }
        }

        let summary = HealthSummary::from_results(&results);
        ServiceHealthReport {
            service_id: record.id().clone(),
            service: record.name().to_string(),
            results,
            summary,
        }
    }

    /// Check every registered service. One unreachable instance only yields
    /// an unhealthy verdict; it never fails the sweep.
    pub async fn check_all_services(&self, options: &CheckOptions) -> Result<HealthSweep> {
        let started_at = self.registry.clock().now();
        let started = Instant::now();
        let records = self.registry.list_records().await?;

        let services = join_all(records.iter().map(|record| self.check_record(record, options))).await;
        let summary = HealthSummary::from_results(services.iter().flat_map(|s| s.results.iter()));

        Ok(HealthSweep {
            services,
            summary,
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Run a full sweep with the default options and cache it
    pub async fn perform_periodic_health_check(&self) -> Result<Arc<HealthSweep>> {
        let sweep = Arc::new(self.check_all_services(&self.defaults).await?);
        self.last_sweep.insert((), sweep.clone()).await;

        tracing::info!(
            services = sweep.services.len(),
            instances = sweep.summary.total,
            healthy = sweep.summary.healthy,
            duration_ms = sweep.duration_ms,
            "Periodic health check completed"
        );
        Ok(sweep)
    }

    /// Most recent sweep, if still within its TTL
    pub async fn get_last_health_check_results(&self) -> Option<Arc<HealthSweep>> {
        self.last_sweep.get(&()).await
    }

    /// Cached sweep, or run one. Concurrent callers share a single sweep.
    pub async fn latest_or_sweep(&self) -> Result<Arc<HealthSweep>> {
        self.last_sweep
            .try_get_with((), async {
                self.check_all_services(&self.defaults).await.map(Arc::new)
            })
            .await
            .map_err(|e: Arc<Error>| Error::Internal(format!("health sweep failed: {e}")))
    }

    #[must_use]
    pub fn get_last_result(&self, instance_id: &InstanceId) -> Option<HealthCheckResult> {
        self.windows
            .get(instance_id)
            .and_then(|window| window.back().cloned())
    }

    #[must_use]
    pub fn get_instance_stats(&self, instance_id: &InstanceId) -> Option<InstanceHealthStats> {
        let window = self.windows.get(instance_id)?;
        let last = window.back()?;
        let checks = window.len();
        let successes = window.iter().filter(|r| r.status.is_healthy()).count();
        let total_latency: u64 = window.iter().map(|r| r.latency_ms).sum();

        Some(InstanceHealthStats {
            checks,
            successes,
            success_rate: percentage(successes, checks),
            average_latency_ms: total_latency as f64 / checks as f64,
            last_status: last.status,
            last_checked_at: last.checked_at,
        })
    }

    /// Spawn the periodic sweep loop; it stops when `cancel_token` fires.
    pub fn start(self: Arc<Self>, every: Duration, cancel_token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let mut timer = interval(every.max(Duration::from_millis(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        tracing::info!("Health check loop shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        if let Err(e) = self.perform_periodic_health_check().await {
                            tracing::error!("Periodic health check failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl RemovalListener for HealthCheckService {
    async fn on_removal(&self, removal: &Removal) {
        for instance_id in &removal.instance_ids {
            self.windows.remove(instance_id);
        }
    }
}
