//! Prometheus metrics for the registry, discovery and health checking
//!
//! All metrics live in a private registry exposed via `GET /metrics`.

use prometheus::{
    register_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, CounterVec, Encoder, IntCounter, IntGauge, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Registry mutations
pub mod registry {
    use super::{
        register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter,
        IntGauge, REGISTRY,
    };

    pub static REGISTRATIONS_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "beacon_registrations_total",
            "Total number of instance registrations",
            REGISTRY.clone()
        ).expect("Failed to register REGISTRATIONS_TOTAL")
    });

    pub static DEREGISTRATIONS_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "beacon_deregistrations_total",
            "Total number of service or instance deregistrations",
            REGISTRY.clone()
        ).expect("Failed to register DEREGISTRATIONS_TOTAL")
    });

    pub static HEARTBEATS_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "beacon_heartbeats_total",
            "Total number of heartbeats applied",
            REGISTRY.clone()
        ).expect("Failed to register HEARTBEATS_TOTAL")
    });

    pub static INSTANCES_MARKED_INACTIVE: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "beacon_instances_marked_inactive_total",
            "Instances marked inactive by the heartbeat sweep",
            REGISTRY.clone()
        ).expect("Failed to register INSTANCES_MARKED_INACTIVE")
    });

    pub static WRITE_CONFLICTS: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "beacon_registry_write_conflicts_total",
            "Optimistic write conflicts on service records",
            REGISTRY.clone()
        ).expect("Failed to register WRITE_CONFLICTS")
    });

    pub static REGISTERED_INSTANCES: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "beacon_registered_instances",
            "Current number of registered instances",
            REGISTRY.clone()
        ).expect("Failed to register REGISTERED_INSTANCES")
    });
}

/// Discovery requests and cache
pub mod discovery {
    use super::{register_counter_vec_with_registry, CounterVec, REGISTRY};

    pub static DISCOVERY_REQUESTS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "beacon_discovery_requests_total",
            "Discovery requests by outcome",
            &["outcome"],
            REGISTRY.clone()
        ).expect("Failed to register DISCOVERY_REQUESTS")
    });

    pub static CACHE_LOOKUPS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "beacon_discovery_cache_lookups_total",
            "Discovery cache lookups by result",
            &["result"],
            REGISTRY.clone()
        ).expect("Failed to register CACHE_LOOKUPS")
    });
}

/// Active health probes
pub mod health {
    use super::{register_counter_vec_with_registry, CounterVec, REGISTRY};

    pub static PROBE_ATTEMPTS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "beacon_probe_attempts_total",
            "Health probe attempts by outcome",
            &["outcome"],
            REGISTRY.clone()
        ).expect("Failed to register PROBE_ATTEMPTS")
    });

    pub static CHECK_VERDICTS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "beacon_health_check_verdicts_total",
            "Final health check verdicts per instance check",
            &["status"],
            REGISTRY.clone()
        ).expect("Failed to register CHECK_VERDICTS")
    });
}

/// Render all metrics in the Prometheus text exposition format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
