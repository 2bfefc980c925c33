//! Instance selection
//!
//! Pure selection over an already health-filtered candidate list. The
//! balancer knows nothing about instance health; it only keeps per-service
//! selection counters and per-instance open-connection counts.

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use beacon_core::models::{Algorithm, Instance, InstanceId};
use beacon_core::{Error, Result};

/// Client key used by ip_hash when the caller supplies no address
const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceBalancerStats {
    pub total_selections: u64,
    pub selections: BTreeMap<InstanceId, u64>,
    pub open_connections: BTreeMap<InstanceId, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerStats {
    pub default_algorithm: Algorithm,
    pub services: BTreeMap<String, ServiceBalancerStats>,
}

pub struct LoadBalancerService {
    default_algorithm: Algorithm,
    /// Monotonic selection counter per (service, algorithm)
    counters: DashMap<(String, Algorithm), u64>,
    /// Open connections per service, per instance
    connections: DashMap<String, HashMap<InstanceId, u64>>,
    /// Selection tallies per service, per instance
    selections: DashMap<String, HashMap<InstanceId, u64>>,
}

impl Default for LoadBalancerService {
    fn default() -> Self {
        Self::new(Algorithm::default())
    }
}

impl LoadBalancerService {
    #[must_use]
    pub fn new(default_algorithm: Algorithm) -> Self {
        Self {
            default_algorithm,
            counters: DashMap::new(),
            connections: DashMap::new(),
            selections: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn default_algorithm(&self) -> Algorithm {
        self.default_algorithm
    }

    /// Pick one instance. An empty candidate list is always an error.
    pub fn select_instance<'a>(
        &self,
        service: &str,
        instances: &'a [Instance],
        algorithm: Option<Algorithm>,
        client_ip: Option<&str>,
    ) -> Result<&'a Instance> {
        if instances.is_empty() {
            return Err(Error::NoInstancesAvailable(service.to_string()));
        }

        let algorithm = algorithm.unwrap_or(self.default_algorithm);
        let index = match algorithm {
            Algorithm::RoundRobin => self.next_counter(service, algorithm) as usize % instances.len(),
            Algorithm::WeightedRoundRobin => self.weighted_index(service, instances),
            Algorithm::LeastConnections => self.least_connections_index(service, instances),
            Algorithm::Random => rand::thread_rng().gen_range(0..instances.len()),
            Algorithm::IpHash => {
                let mut hasher = DefaultHasher::new();
                client_ip.unwrap_or(UNKNOWN_CLIENT).hash(&mut hasher);
                (hasher.finish() % instances.len() as u64) as usize
            }
        };

        let selected = &instances[index];
        *self
            .selections
            .entry(service.to_string())
            .or_default()
            .entry(selected.id.clone())
            .or_insert(0) += 1;

        tracing::trace!(
            service,
            algorithm = %algorithm,
            instance_id = %selected.id,
            candidates = instances.len(),
            "Instance selected"
        );
        Ok(selected)
    }

    fn next_counter(&self, service: &str, algorithm: Algorithm) -> u64 {
        let mut counter = self.counters.entry((service.to_string(), algorithm)).or_insert(0);
        let current = *counter;
        *counter = counter.wrapping_add(1);
        current
    }

    fn weighted_index(&self, service: &str, instances: &[Instance]) -> usize {
        // All-zero weights degrade to plain round-robin
        let all_zero = instances.iter().all(|i| i.weight == 0);
        let weight_of = |i: &Instance| if all_zero { 1 } else { u64::from(i.weight) };
        let total: u64 = instances.iter().map(weight_of).sum();

        let position = self.next_counter(service, Algorithm::WeightedRoundRobin) % total;
        let mut cumulative = 0;
        for (index, instance) in instances.iter().enumerate() {
            cumulative += weight_of(instance);
            if cumulative > position {
                return index;
            }
        }
        instances.len() - 1
    }

    fn least_connections_index(&self, service: &str, instances: &[Instance]) -> usize {
        // The entry guard serializes selection per service
        let mut open = self.connections.entry(service.to_string()).or_default();
        let index = instances
            .iter()
            .enumerate()
            .min_by_key(|(_, i)| open.get(&i.id).copied().unwrap_or(0))
            .map_or(0, |(index, _)| index);

        *open.entry(instances[index].id.clone()).or_insert(0) += 1;
        index
    }

    /// Record that a connection to `instance_id` finished
    pub fn decrement_connections(&self, service: &str, instance_id: &InstanceId) {
        if let Some(mut open) = self.connections.get_mut(service) {
            if let Some(count) = open.get_mut(instance_id) {
                *count = count.saturating_sub(1);
            }
        }
    }

    #[must_use]
    pub fn open_connections(&self, service: &str, instance_id: &InstanceId) -> u64 {
        self.connections
            .get(service)
            .and_then(|open| open.get(instance_id).copied())
            .unwrap_or(0)
    }

    /// Run `algorithm` `iterations` times on a scratch balancer and return
    /// how often each instance was picked. Shared state is untouched.
    pub fn test_algorithm(
        &self,
        algorithm: Algorithm,
        instances: &[Instance],
        iterations: usize,
    ) -> Result<BTreeMap<InstanceId, usize>> {
        let scratch = Self::new(algorithm);
        let mut distribution: BTreeMap<InstanceId, usize> =
            instances.iter().map(|i| (i.id.clone(), 0)).collect();

        for i in 0..iterations {
            let client = format!("10.{}.{}.{}", (i >> 16) & 0xff, (i >> 8) & 0xff, i & 0xff);
            let selected = scratch.select_instance("test", instances, Some(algorithm), Some(&client))?;
            *distribution.entry(selected.id.clone()).or_insert(0) += 1;
        }
        Ok(distribution)
    }

    #[must_use]
    pub fn stats(&self) -> LoadBalancerStats {
        let mut services: BTreeMap<String, ServiceBalancerStats> = BTreeMap::new();

        for entry in &self.selections {
            let stats = services.entry(entry.key().clone()).or_default();
            for (id, count) in entry.value() {
                stats.total_selections += count;
                stats.selections.insert(id.clone(), *count);
            }
        }
        for entry in &self.connections {
            let stats = services.entry(entry.key().clone()).or_default();
            stats
                .open_connections
                .extend(entry.value().iter().map(|(id, count)| (id.clone(), *count)));
        }

        LoadBalancerStats {
            default_algorithm: self.default_algorithm,
            services,
        }
    }

    /// Drop connection and selection state for removed instances.
    ///
    /// Selection counters are shared by every version under the name, so they
    /// go only once nothing is tracked for the name any more.
    pub fn forget_instances(&self, service: &str, instance_ids: &[InstanceId]) {
        for per_service in [&self.connections, &self.selections] {
            if let Some(mut per_instance) = per_service.get_mut(service) {
                per_instance.retain(|id, _| !instance_ids.contains(id));
            }
            per_service.remove_if(service, |_, per_instance| per_instance.is_empty());
        }

        if !self.connections.contains_key(service) && !self.selections.contains_key(service) {
            self.counters.retain(|(name, _), _| name != service);
        }
    }
}
