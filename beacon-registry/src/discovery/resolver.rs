//! Discovery façade
//!
//! Resolves a service name to its candidate instances through the registry
//! and picks one through the load balancer. Candidate sets are memoized in a
//! short-TTL cache keyed by `(name, healthy_only)`; selection runs on every
//! call so balancing keeps cycling while the cache is warm.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_core::config::DiscoveryConfig;
use beacon_core::metrics::discovery as metrics;
use beacon_core::models::{Algorithm, Instance, InstanceId, ServiceDefinition};
use beacon_core::{Error, Result};

use super::load_balancer::LoadBalancerService;
use super::registry::{Removal, RemovalListener, ServiceRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverOptions {
    pub use_cache: bool,
    pub healthy_only: bool,
    pub load_balancing: bool,
    /// Balancer default when `None`
    pub algorithm: Option<Algorithm>,
    pub client_ip: Option<String>,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            healthy_only: true,
            load_balancing: true,
            algorithm: None,
            client_ip: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub service: ServiceDefinition,
    /// Candidate set, in registration order
    pub instances: Vec<Instance>,
    pub selected: Option<Instance>,
    pub algorithm: Option<Algorithm>,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiscoveryCacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
struct Candidates {
    service: ServiceDefinition,
    instances: Vec<Instance>,
}

pub struct ServiceDiscovery {
    registry: Arc<ServiceRegistry>,
    load_balancer: Arc<LoadBalancerService>,
    cache: moka::future::Cache<(String, bool), Arc<Candidates>>,
    /// Bumped on every removal, before the cache is invalidated
    removals: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ServiceDiscovery {
    #[must_use]
    pub fn new(
        registry: Arc<ServiceRegistry>,
        load_balancer: Arc<LoadBalancerService>,
        cache_ttl: Duration,
        cache_capacity: u64,
    ) -> Self {
        Self {
            registry,
            load_balancer,
            cache: moka::future::CacheBuilder::new(cache_capacity)
                .time_to_live(cache_ttl)
                .build(),
            removals: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_config(
        registry: Arc<ServiceRegistry>,
        load_balancer: Arc<LoadBalancerService>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self::new(
            registry,
            load_balancer,
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_capacity,
        )
    }

    #[must_use]
    pub fn load_balancer(&self) -> &Arc<LoadBalancerService> {
        &self.load_balancer
    }

    /// Resolve `name` and, when balancing, select one instance.
    ///
    /// `NotFound` if the name is unregistered. `NoHealthyInstance` if the
    /// health filter removed every instance, `NoInstancesAvailable` if the
    /// service has none at all.
    pub async fn discover_service(&self, name: &str, options: &DiscoverOptions) -> Result<DiscoveryResult> {
        let result = self.resolve(name, options).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::DISCOVERY_REQUESTS.with_label_values(&[outcome]).inc();
        result
    }

    async fn resolve(&self, name: &str, options: &DiscoverOptions) -> Result<DiscoveryResult> {
        let key = (name.to_string(), options.healthy_only);

        let cached = if options.use_cache {
            let hit = self.cache.get(&key).await;
            self.record_lookup(hit.is_some());
            hit
        } else {
            None
        };
        let from_cache = cached.is_some();

        let candidates = match cached {
            Some(candidates) => candidates,
            None => {
                let epoch = self.removals.load(Ordering::SeqCst);
                let record = self.registry.get_service_by_name(name).await?;
                let instances = record.instances_filtered(options.healthy_only);
                if instances.is_empty() {
                    return Err(if options.healthy_only && !record.instances.is_empty() {
                        Error::NoHealthyInstance(name.to_string())
                    } else {
                        Error::NoInstancesAvailable(name.to_string())
                    });
                }

                let candidates = Arc::new(Candidates {
                    service: record.definition.clone(),
                    instances,
                });
                if options.use_cache {
                    self.cache.insert(key.clone(), candidates.clone()).await;
                    // A removal that raced this read may have invalidated
                    // before the insert landed
                    if self.removals.load(Ordering::SeqCst) != epoch {
                        self.cache.invalidate(&key).await;
                    }
                }
                candidates
            }
        };

        let (selected, algorithm) = if options.load_balancing {
            let algorithm = options.algorithm.unwrap_or(self.load_balancer.default_algorithm());
            let selected = self.load_balancer.select_instance(
                name,
                &candidates.instances,
                Some(algorithm),
                options.client_ip.as_deref(),
            )?;
            (Some(selected.clone()), Some(algorithm))
        } else {
            (None, None)
        };

        Ok(DiscoveryResult {
            service: candidates.service.clone(),
            instances: candidates.instances.clone(),
            selected,
            algorithm,
            from_cache,
        })
    }

    fn record_lookup(&self, hit: bool) {
        let (counter, label) = if hit {
            (&self.hits, "hit")
        } else {
            (&self.misses, "miss")
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::CACHE_LOOKUPS.with_label_values(&[label]).inc();
    }

    /// One healthy instance chosen by `algorithm`
    pub async fn get_load_balanced_instance(
        &self,
        name: &str,
        algorithm: Option<Algorithm>,
        client_ip: Option<&str>,
    ) -> Result<Instance> {
        let options = DiscoverOptions {
            algorithm,
            client_ip: client_ip.map(str::to_string),
            ..DiscoverOptions::default()
        };
        self.discover_service(name, &options)
            .await?
            .selected
            .ok_or_else(|| Error::NoInstancesAvailable(name.to_string()))
    }

    /// Report a finished connection for least-connections accounting
    pub fn release_connection(&self, name: &str, instance_id: &InstanceId) {
        self.load_balancer.decrement_connections(name, instance_id);
    }

    /// Every instance regardless of status, straight from the registry
    pub async fn get_all_instances(&self, name: &str) -> Result<Vec<Instance>> {
        self.registry.get_instances(name, false).await
    }

    pub async fn find_services_by_tag(&self, tag: &str) -> Result<Vec<ServiceDefinition>> {
        self.find(|d| d.has_tag(tag)).await
    }

    pub async fn find_services_by_category(&self, category: &str) -> Result<Vec<ServiceDefinition>> {
        self.registry.list_by_category(category).await
    }

    pub async fn find_services_by_version(&self, version: &str) -> Result<Vec<ServiceDefinition>> {
        self.find(|d| d.version == version).await
    }

    pub async fn find_services_by_metadata(&self, key: &str, value: &str) -> Result<Vec<ServiceDefinition>> {
        self.find(|d| d.metadata.get(key).is_some_and(|v| v == value)).await
    }

    async fn find(&self, predicate: impl Fn(&ServiceDefinition) -> bool) -> Result<Vec<ServiceDefinition>> {
        Ok(self
            .registry
            .list_all()
            .await?
            .into_iter()
            .filter(|d| predicate(d))
            .collect())
    }

    /// Drop cached candidate sets for `name`
    pub async fn invalidate(&self, name: &str) {
        self.cache.invalidate(&(name.to_string(), true)).await;
        self.cache.invalidate(&(name.to_string(), false)).await;
    }

    pub async fn cache_stats(&self) -> DiscoveryCacheStats {
        self.cache.run_pending_tasks().await;
        DiscoveryCacheStats {
            entries: self.cache.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Drops cached candidates for the name and balancer state for the removed
/// instances only, so a sibling version keeps its counters.
#[async_trait]
impl RemovalListener for ServiceDiscovery {
    async fn on_removal(&self, removal: &Removal) {
        self.removals.fetch_add(1, Ordering::SeqCst);
        self.invalidate(&removal.name).await;
        self.load_balancer.forget_instances(&removal.name, &removal.instance_ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use beacon_core::models::{InstanceStatus, RegisterRequest, StatusSignal};
    use beacon_core::{Clock, ManualClock};

    fn discovery() -> (Arc<ServiceDiscovery>, Arc<ServiceRegistry>, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        let registry = Arc::new(ServiceRegistry::new(Arc::new(InMemoryStore::new()), clock.clone(), 5));
        let discovery = Arc::new(ServiceDiscovery::new(
            registry.clone(),
            Arc::new(LoadBalancerService::default()),
            Duration::from_secs(30),
            100,
        ));
        registry.subscribe(Arc::downgrade(&discovery) as std::sync::Weak<dyn RemovalListener>);
        (discovery, registry, clock)
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let (discovery, _, _) = discovery();
        let err = discovery
            .discover_service("ghost", &DiscoverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(ref msg) if msg.contains("ghost")));
    }

    #[tokio::test]
    async fn test_all_unhealthy_is_no_healthy_instance() {
        let (discovery, registry, clock) = discovery();
        let reg = registry.register(RegisterRequest::new("users", "10.0.0.1", 80)).await.unwrap();
        registry
            .set_instance_status(
                &reg.service_id,
                &reg.instance_id,
                StatusSignal::probe(InstanceStatus::Unhealthy, clock.now()),
            )
            .await
            .unwrap();

        let err = discovery
            .discover_service("users", &DiscoverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoHealthyInstance(_)));

        // Without the filter the instance is still a candidate
        let options = DiscoverOptions {
            healthy_only: false,
            ..DiscoverOptions::default()
        };
        let result = discovery.discover_service("users", &options).await.unwrap();
        assert_eq!(result.selected.unwrap().id, reg.instance_id);
    }

    #[tokio::test]
    async fn test_empty_service_is_no_instances_available() {
        let (discovery, registry, _) = discovery();
        let reg = registry.register(RegisterRequest::new("users", "10.0.0.1", 80)).await.unwrap();
        registry
            .deregister_instance(&reg.service_id, &reg.instance_id)
            .await
            .unwrap();

        let err = discovery
            .discover_service("users", &DiscoverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoInstancesAvailable(_)));
    }

    #[tokio::test]
    async fn test_cache_hit_still_rotates_selection() {
        let (discovery, registry, _) = discovery();
        let a = registry.register(RegisterRequest::new("users", "10.0.0.1", 80)).await.unwrap();
        let b = registry.register(RegisterRequest::new("users", "10.0.0.2", 80)).await.unwrap();

        let options = DiscoverOptions::default();
        let first = discovery.discover_service("users", &options).await.unwrap();
        let second = discovery.discover_service("users", &options).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.selected.unwrap().id, a.instance_id);
        assert_eq!(second.selected.unwrap().id, b.instance_id);
        assert_eq!(second.algorithm, Some(Algorithm::RoundRobin));

        let stats = discovery.cache_stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_bypassing_cache_sees_fresh_state() {
        let (discovery, registry, _) = discovery();
        registry.register(RegisterRequest::new("users", "10.0.0.1", 80)).await.unwrap();
        discovery.discover_service("users", &DiscoverOptions::default()).await.unwrap();

        registry.register(RegisterRequest::new("users", "10.0.0.2", 80)).await.unwrap();

        let cached = discovery.discover_service("users", &DiscoverOptions::default()).await.unwrap();
        assert_eq!(cached.instances.len(), 1);

        let fresh = DiscoverOptions {
            use_cache: false,
            ..DiscoverOptions::default()
        };
        let result = discovery.discover_service("users", &fresh).await.unwrap();
        assert_eq!(result.instances.len(), 2);
        assert!(!result.from_cache);
    }

    #[tokio::test]
    async fn test_instance_removal_refreshes_cached_candidates() {
        let (discovery, registry, _) = discovery();
        let a = registry.register(RegisterRequest::new("users", "10.0.0.1", 80)).await.unwrap();
        registry.register(RegisterRequest::new("users", "10.0.0.2", 80)).await.unwrap();
        discovery.discover_service("users", &DiscoverOptions::default()).await.unwrap();

        registry.deregister_instance(&a.service_id, &a.instance_id).await.unwrap();

        let result = discovery.discover_service("users", &DiscoverOptions::default()).await.unwrap();
        assert!(!result.from_cache);
        assert_eq!(result.instances.len(), 1);
        assert_eq!(result.instances[0].address, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_removal_only_forgets_removed_instances() {
        let (discovery, registry, clock) = discovery();
        let v1 = registry
            .register(RegisterRequest::new("users", "10.0.0.1", 80).with_version("1.0.0"))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(1));
        let v2 = registry
            .register(RegisterRequest::new("users", "10.0.0.2", 80).with_version("2.0.0"))
            .await
            .unwrap();

        let options = DiscoverOptions {
            algorithm: Some(Algorithm::LeastConnections),
            ..DiscoverOptions::default()
        };
        discovery.discover_service("users", &options).await.unwrap();
        let lb = discovery.load_balancer();
        assert_eq!(lb.open_connections("users", &v2.instance_id), 1);

        // v1 was never selected; removing it leaves v2's state alone
        registry.deregister(&v1.service_id).await.unwrap();
        assert_eq!(lb.open_connections("users", &v2.instance_id), 1);

        registry.deregister(&v2.service_id).await.unwrap();
        assert_eq!(lb.open_connections("users", &v2.instance_id), 0);
        assert!(lb.stats().services.is_empty());
    }

    #[tokio::test]
    async fn test_deregister_then_discover_is_not_found() {
        let (discovery, registry, _) = discovery();
        let reg = registry.register(RegisterRequest::new("users", "10.0.0.1", 80)).await.unwrap();
        discovery.discover_service("users", &DiscoverOptions::default()).await.unwrap();

        registry.deregister(&reg.service_id).await.unwrap();

        let err = discovery
            .discover_service("users", &DiscoverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_without_balancing_nothing_is_selected() {
        let (discovery, registry, _) = discovery();
        registry.register(RegisterRequest::new("users", "10.0.0.1", 80)).await.unwrap();

        let options = DiscoverOptions {
            load_balancing: false,
            ..DiscoverOptions::default()
        };
        let result = discovery.discover_service("users", &options).await.unwrap();
        assert!(result.selected.is_none());
        assert!(result.algorithm.is_none());
        assert_eq!(result.instances.len(), 1);
    }

    #[tokio::test]
    async fn test_least_connections_release() {
        let (discovery, registry, _) = discovery();
        let a = registry.register(RegisterRequest::new("users", "10.0.0.1", 80)).await.unwrap();
        registry.register(RegisterRequest::new("users", "10.0.0.2", 80)).await.unwrap();

        let first = discovery
            .get_load_balanced_instance("users", Some(Algorithm::LeastConnections), None)
            .await
            .unwrap();
        assert_eq!(first.id, a.instance_id);
        discovery.release_connection("users", &first.id);

        let again = discovery
            .get_load_balanced_instance("users", Some(Algorithm::LeastConnections), None)
            .await
            .unwrap();
        assert_eq!(again.id, a.instance_id);
    }

    #[tokio::test]
    async fn test_find_services() {
        let (discovery, registry, _) = discovery();
        registry
            .register(
                RegisterRequest::new("users", "10.0.0.1", 80)
                    .with_tag("edge")
                    .with_version("2.1.0")
                    .with_category("core")
                    .with_metadata("team", "identity"),
            )
            .await
            .unwrap();
        registry.register(RegisterRequest::new("reports", "10.0.0.2", 80)).await.unwrap();

        assert_eq!(discovery.find_services_by_tag("EDGE").await.unwrap().len(), 1);
        assert_eq!(discovery.find_services_by_version("2.1.0").await.unwrap().len(), 1);
        assert_eq!(discovery.find_services_by_category("general").await.unwrap().len(), 1);
        assert_eq!(discovery.find_services_by_metadata("team", "identity").await.unwrap().len(), 1);
        assert!(discovery.find_services_by_metadata("team", "billing").await.unwrap().is_empty());
        assert_eq!(discovery.get_all_instances("users").await.unwrap().len(), 1);
    }
}
