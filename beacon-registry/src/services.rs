//! Service container: builds every component from configuration

use std::sync::{Arc, Weak};
use std::time::Duration;

use beacon_core::{Config, Result, SharedClock};

use crate::discovery::{
    HealthCheckService, HeartbeatService, HeartbeatSettings, LoadBalancerService, Probe, RemovalListener,
    ServiceCatalog, ServiceDiscovery, ServiceRegistry,
};
use crate::maintenance::Maintenance;
use crate::store::{InMemoryStore, MirrorConfig, MirroredStore, RegistryStore};

/// Every registry component, wired together and shareable across handlers
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<ServiceRegistry>,
    pub heartbeats: Arc<HeartbeatService>,
    pub health: Arc<HealthCheckService>,
    pub load_balancer: Arc<LoadBalancerService>,
    pub discovery: Arc<ServiceDiscovery>,
    pub catalog: Arc<ServiceCatalog>,
    pub maintenance: Arc<Maintenance>,
}

impl Services {
    /// Build with the mirrored in-memory store described by `config`
    pub fn from_config(config: &Config, clock: SharedClock, probe: Arc<dyn Probe>) -> Result<Self> {
        let mirror = MirrorConfig {
            ttl: Duration::from_secs(config.registry.mirror_ttl_secs),
            capacity: config.registry.mirror_capacity,
            redis_url: config.registry.redis_url.clone(),
            ..MirrorConfig::default()
        };
        let store = MirroredStore::new(InMemoryStore::new(), mirror)?;
        Self::with_store(config, Arc::new(store), clock, probe)
    }

    pub fn with_store(
        config: &Config,
        store: Arc<dyn RegistryStore>,
        clock: SharedClock,
        probe: Arc<dyn Probe>,
    ) -> Result<Self> {
        let algorithm = config.load_balancer.algorithm()?;

        let registry = Arc::new(ServiceRegistry::new(store, clock, config.registry.max_write_retries));
        let heartbeats = Arc::new(HeartbeatService::new(
            registry.clone(),
            HeartbeatSettings::from(&config.heartbeat),
        ));
        let health = Arc::new(HealthCheckService::from_config(
            registry.clone(),
            probe,
            &config.health_check,
        ));
        let load_balancer = Arc::new(LoadBalancerService::new(algorithm));
        let discovery = Arc::new(ServiceDiscovery::from_config(
            registry.clone(),
            load_balancer.clone(),
            &config.discovery,
        ));
        // Every deregistration purges per-instance state in these components
        registry.subscribe(Arc::downgrade(&heartbeats) as Weak<dyn RemovalListener>);
        registry.subscribe(Arc::downgrade(&health) as Weak<dyn RemovalListener>);
        registry.subscribe(Arc::downgrade(&discovery) as Weak<dyn RemovalListener>);

        let catalog = Arc::new(ServiceCatalog::new(registry.clone()));
        let maintenance = Arc::new(Maintenance::new(
            registry.clone(),
            heartbeats.clone(),
            config.registry.heartbeat_timeout(),
            config.registry.cleanup_interval(),
            Duration::from_secs(config.heartbeat.prune_interval_secs),
        ));

        Ok(Self {
            registry,
            heartbeats,
            health,
            load_balancer,
            discovery,
            catalog,
            maintenance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoverOptions, FnProbe, TcpProbe};
    use crate::store::InMemoryStore;
    use beacon_core::models::{Algorithm, Instance, RegisterRequest};
    use beacon_core::{Error, ManualClock, SystemClock};
    use std::collections::HashMap;

    #[test]
    fn test_unknown_algorithm_is_configuration_error() {
        let mut config = Config::default();
        config.load_balancer.default_algorithm = "fastest".to_string();

        let result = Services::from_config(&config, SystemClock::shared(), Arc::new(TcpProbe));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_default_wiring() {
        let config = Config::default();
        let services = Services::from_config(&config, SystemClock::shared(), Arc::new(TcpProbe)).unwrap();
        assert_eq!(services.load_balancer.default_algorithm(), Algorithm::RoundRobin);
    }

    #[tokio::test]
    async fn test_deregistration_purges_instance_state() {
        let mut config = Config::default();
        config.health_check.interval_ms = 0;
        let services = Services::with_store(
            &config,
            Arc::new(InMemoryStore::new()),
            ManualClock::starting_now(),
            Arc::new(FnProbe::new(|_: &Instance| Ok(()))),
        )
        .unwrap();

        let a = services
            .registry
            .register(RegisterRequest::new("users", "10.0.0.1", 80))
            .await
            .unwrap();
        let b = services
            .registry
            .register(RegisterRequest::new("users", "10.0.0.2", 80))
            .await
            .unwrap();
        let service_id = a.service_id.clone();

        let options = *services.health.default_options();
        services.health.check_service("users", &options).await.unwrap();
        for instance_id in [&a.instance_id, &b.instance_id] {
            services
                .heartbeats
                .send_heartbeat(&service_id, Some(instance_id), HashMap::new())
                .await
                .unwrap();
        }
        let least = DiscoverOptions {
            algorithm: Some(Algorithm::LeastConnections),
            ..DiscoverOptions::default()
        };
        for _ in 0..2 {
            services.discovery.discover_service("users", &least).await.unwrap();
        }
        assert_eq!(services.load_balancer.open_connections("users", &a.instance_id), 1);

        services
            .registry
            .deregister_instance(&service_id, &a.instance_id)
            .await
            .unwrap();
        assert!(services.health.get_last_result(&a.instance_id).is_none());
        assert!(services.heartbeats.history(&service_id, Some(&a.instance_id)).is_empty());
        assert_eq!(services.load_balancer.open_connections("users", &a.instance_id), 0);
        assert!(services.health.get_last_result(&b.instance_id).is_some());
        assert_eq!(services.load_balancer.open_connections("users", &b.instance_id), 1);

        services.registry.deregister(&service_id).await.unwrap();
        assert!(services.health.get_last_result(&b.instance_id).is_none());
        assert!(services.heartbeats.history(&service_id, Some(&b.instance_id)).is_empty());
        assert_eq!(services.load_balancer.open_connections("users", &b.instance_id), 0);
        assert!(services.load_balancer.stats().services.is_empty());
        assert!(matches!(
            services.discovery.discover_service("users", &least).await,
            Err(Error::NotFound(_))
        ));
    }
}
