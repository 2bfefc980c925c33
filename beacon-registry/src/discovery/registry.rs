//! Service registry
//!
//! Owns registration, deregistration, heartbeat application and lookups over a
//! [`RegistryStore`]. Every mutation is a read-modify-replace of one whole
//! service record; losing a revision race re-reads and retries with backoff.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::Duration as ChronoDuration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use beacon_core::metrics::registry as metrics;
use beacon_core::models::{
    Instance, InstanceId, InstanceStatus, RegisterRequest, Registration, ServiceDefinition, ServiceId,
    ServiceRecord, StatusSignal,
};
use beacon_core::{Error, Result, SharedClock};

use crate::store::RegistryStore;

/// Registry-wide counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub services: usize,
    pub instances: usize,
    pub healthy_instances: usize,
    /// Instance count per status name
    pub by_status: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

/// Instances that left the registry
#[derive(Debug, Clone)]
pub struct Removal {
    pub service_id: ServiceId,
    pub name: String,
    pub instance_ids: Vec<InstanceId>,
    /// The whole service record is gone, not just some instances
    pub service_removed: bool,
}

/// Holder of per-instance state that must be dropped on deregistration
#[async_trait]
pub trait RemovalListener: Send + Sync {
    async fn on_removal(&self, removal: &Removal);
}

/// Authoritative registry of services and their instances
pub struct ServiceRegistry {
    store: Arc<dyn RegistryStore>,
    clock: SharedClock,
    max_write_retries: usize,
    listeners: RwLock<Vec<Weak<dyn RemovalListener>>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>, clock: SharedClock, max_write_retries: usize) -> Self {
        Self {
            store,
            clock,
            max_write_retries,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Call `listener` after every deregistration.
    ///
    /// Held weakly; a dropped listener is skipped and pruned.
    pub fn subscribe(&self, listener: Weak<dyn RemovalListener>) {
        self.listeners.write().push(listener);
    }

    async fn notify_removal(&self, removal: Removal) {
        let live: Vec<Arc<dyn RemovalListener>> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.on_removal(&removal).await;
        }
    }

    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(50))
            .with_max_times(self.max_write_retries)
            .with_jitter()
    }

    /// Run a single-attempt write, retrying while it loses revision races
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        op.retry(self.backoff())
            .when(Error::is_retryable)
            .notify(|err: &Error, delay: Duration| {
                metrics::WRITE_CONFLICTS.inc();
                tracing::debug!(error = %err, delay_ms = delay.as_millis() as u64, "Retrying registry write");
            })
            .await
    }

    /// Register an instance, creating or reusing the `(name, version)` service.
    ///
    /// Each call adds a new instance. Re-registering an existing instance id
    /// refreshes that instance in place.
    pub async fn register(&self, request: RegisterRequest) -> Result<Registration> {
        request.validate()?;
        let instance_id = request
            .instance_id
            .clone()
            .map(InstanceId::from)
            .unwrap_or_default();

        let (registration, is_new) = self
            .with_retry(|| self.try_register(&request, &instance_id))
            .await?;

        metrics::REGISTRATIONS_TOTAL.inc();
        if is_new {
            metrics::REGISTERED_INSTANCES.inc();
        }
        tracing::info!(
            service = %request.name,
            service_id = %registration.service_id,
            instance_id = %registration.instance_id,
            address = %request.address,
            port = request.port,
            "Instance registered"
        );

        Ok(registration)
    }

    async fn try_register(
        &self,
        request: &RegisterRequest,
        instance_id: &InstanceId,
    ) -> Result<(Registration, bool)> {
        let now = self.clock.now();
        let version = request.version_or_default();

        let existing = self.store.find_by_key(&request.name, version).await?;
        let is_new_record = existing.is_none();
        let mut record = match existing {
            Some(record) => (*record).clone(),
            None => ServiceRecord::new(ServiceDefinition {
                id: ServiceId::new(),
                name: request.name.clone(),
                version: version.to_string(),
                category: request.category_or_default().to_string(),
                tags: Vec::new(),
                metadata: HashMap::new(),
                instance_ids: Vec::new(),
                registered_at: now,
                updated_at: now,
            }),
        };

        for tag in &request.tags {
            if !record.definition.has_tag(tag) {
                record.definition.tags.push(tag.clone());
            }
        }
        record
            .definition
            .metadata
            .extend(request.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(category) = &request.category {
            record.definition.category.clone_from(category);
        }
        record.definition.updated_at = now;

        let instance = Instance::new(
            instance_id.clone(),
            record.id().clone(),
            request.address.clone(),
            request.port,
            now,
        )
        .with_weight(request.weight.unwrap_or(1))
        .with_metadata(request.metadata.clone());

        let is_new_instance = match record.instance_mut(instance_id) {
            Some(slot) => {
                *slot = instance;
                false
            }
            None => {
                record.push_instance(instance);
                true
            }
        };

        let stored = if is_new_record {
            // Another registrant may create the same (name, version) first;
            // retry through the replace path.
            self.store.insert(record).await.map_err(|e| match e {
                Error::AlreadyExists(msg) => Error::LockConflict(msg),
                other => other,
            })?
        } else {
            self.store.replace(record).await?
        };

        Ok((
            Registration {
                service_id: stored.id().clone(),
                instance_id: instance_id.clone(),
            },
            is_new_instance,
        ))
    }

    /// Remove a service and all of its instances.
    ///
    /// Subscribed listeners drop their state for the removed instances before
    /// this returns.
    pub async fn deregister(&self, service_id: &ServiceId) -> Result<()> {
        let removed = self.store.remove(service_id).await?;

        metrics::DEREGISTRATIONS_TOTAL.inc();
        metrics::REGISTERED_INSTANCES.sub(removed.instances.len() as i64);
        tracing::info!(
            service_id = %service_id,
            service = %removed.name(),
            instances = removed.instances.len(),
            "Service deregistered"
        );

        self.notify_removal(Removal {
            service_id: service_id.clone(),
            name: removed.name().to_string(),
            instance_ids: removed.instances.iter().map(|i| i.id.clone()).collect(),
            service_removed: true,
        })
        .await;
        Ok(())
    }

    /// Remove one instance; the service definition stays even if it empties
    pub async fn deregister_instance(&self, service_id: &ServiceId, instance_id: &InstanceId) -> Result<()> {
        let (record, ()) = self.mutate(service_id, |record| {
            record
                .remove_instance(instance_id)
                .map(|_| ())
                .ok_or_else(|| Error::NotFound(format!("instance {instance_id} of service {service_id}")))
        })
        .await?;

        metrics::DEREGISTRATIONS_TOTAL.inc();
        metrics::REGISTERED_INSTANCES.dec();
        tracing::info!(service_id = %service_id, instance_id = %instance_id, "Instance deregistered");

        self.notify_removal(Removal {
            service_id: service_id.clone(),
            name: record.name().to_string(),
            instance_ids: vec![instance_id.clone()],
            service_removed: false,
        })
        .await;
        Ok(())
    }

    /// Apply a heartbeat to one instance, or to every instance of the service.
    ///
    /// Liveness is not a definition change, so `updated_at` is left alone.
    pub async fn update_heartbeat(&self, service_id: &ServiceId, instance_id: Option<&InstanceId>) -> Result<()> {
        let signal = StatusSignal::heartbeat(self.clock.now());

        self.mutate(service_id, |record| {
            match instance_id {
                Some(id) => {
                    let instance = record
                        .instance_mut(id)
                        .ok_or_else(|| Error::NotFound(format!("instance {id} of service {service_id}")))?;
                    instance.apply(&signal);
                }
                None => {
                    for instance in &mut record.instances {
                        instance.apply(&signal);
                    }
                }
            }
            Ok(())
        })
        .await?;

        metrics::HEARTBEATS_TOTAL.inc();
        tracing::trace!(service_id = %service_id, instance_id = ?instance_id, "Heartbeat applied");
        Ok(())
    }

    /// Merge a status signal into one instance.
    ///
    /// Returns whether the signal was newer than the current status and changed it.
    pub async fn set_instance_status(
        &self,
        service_id: &ServiceId,
        instance_id: &InstanceId,
        signal: StatusSignal,
    ) -> Result<bool> {
        let (_, changed) = self
            .mutate(service_id, |record| {
                let instance = record
                    .instance_mut(instance_id)
                    .ok_or_else(|| Error::NotFound(format!("instance {instance_id} of service {service_id}")))?;
                let previous = instance.status;
                let applied = instance.apply(&signal);
                if applied && previous != instance.status {
                    tracing::info!(
                        service_id = %service_id,
                        instance_id = %instance_id,
                        from = %previous,
                        to = %instance.status,
                        source = ?signal.source,
                        "Instance status changed"
                    );
                }
                Ok(applied && previous != instance.status)
            })
            .await?;
        Ok(changed)
    }

    /// Read-modify-replace one record, retrying on revision conflicts.
    ///
    /// `f` runs against a fresh snapshot on every attempt.
    async fn mutate<T, F>(&self, service_id: &ServiceId, f: F) -> Result<(Arc<ServiceRecord>, T)>
    where
        F: Fn(&mut ServiceRecord) -> Result<T> + Send + Sync,
        T: Send,
    {
        let f = &f;
        self.with_retry(|| async move {
            let current = self
                .store
                .get(service_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("service {service_id}")))?;
            let mut next = (*current).clone();
            let out = f(&mut next)?;
            let stored = self.store.replace(next).await?;
            Ok((stored, out))
        })
        .await
    }

    /// Mark every instance whose last heartbeat is older than `timeout` as
    /// inactive. Already-inactive instances are not counted again.
    ///
    /// Returns the number of instances newly marked.
    pub async fn cleanup_inactive(&self, timeout: ChronoDuration) -> Result<usize> {
        let now = self.clock.now();
        let signal = StatusSignal::sweep(now);
        let mut marked = 0;

        for record in self.store.list().await? {
            let has_candidates = record
                .instances
                .iter()
                .any(|i| i.is_stale(now, timeout) && i.status != InstanceStatus::Inactive);
            if !has_candidates {
                continue;
            }

            let result = self
                .mutate(record.id(), |next| {
                    let mut count = 0;
                    for instance in &mut next.instances {
                        if instance.is_stale(now, timeout)
                            && instance.status != InstanceStatus::Inactive
                            && instance.apply(&signal)
                        {
                            tracing::warn!(
                                service_id = %instance.service_id,
                                instance_id = %instance.id,
                                last_heartbeat = %instance.last_heartbeat,
                                "Instance marked inactive: heartbeat expired"
                            );
                            count += 1;
                        }
                    }
                    Ok(count)
                })
                .await;

            match result {
                Ok((_, count)) => marked += count,
                // Deregistered between list and mutate
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if marked > 0 {
            metrics::INSTANCES_MARKED_INACTIVE.inc_by(marked as u64);
            tracing::info!(marked, "Inactive instance sweep completed");
        }
        Ok(marked)
    }

    /// Service definition with its instances
    pub async fn get_service(&self, service_id: &ServiceId) -> Result<Arc<ServiceRecord>> {
        self.store
            .get(service_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("service {service_id}")))
    }

    /// Most recently updated service registered under `name`.
    ///
    /// Only registrations update a definition; heartbeats and status changes
    /// never move the by-name resolution to another version.
    pub async fn get_service_by_name(&self, name: &str) -> Result<Arc<ServiceRecord>> {
        self.store
            .find_by_name(name)
            .await?
            .into_iter()
            .max_by(|a, b| {
                a.definition
                    .updated_at
                    .cmp(&b.definition.updated_at)
                    .then_with(|| a.definition.registered_at.cmp(&b.definition.registered_at))
            })
            .ok_or_else(|| Error::NotFound(format!("service {name}")))
    }

    /// Every version registered under `name`
    pub async fn get_service_versions(&self, name: &str) -> Result<Vec<Arc<ServiceRecord>>> {
        let records = self.store.find_by_name(name).await?;
        if records.is_empty() {
            return Err(Error::NotFound(format!("service {name}")));
        }
        Ok(records)
    }

    /// Instances of the named service in registration order
    pub async fn get_instances(&self, name: &str, healthy_only: bool) -> Result<Vec<Instance>> {
        let record = self.get_service_by_name(name).await?;
        Ok(record.instances_filtered(healthy_only))
    }

    /// Snapshot of every record
    pub async fn list_records(&self) -> Result<Vec<Arc<ServiceRecord>>> {
        self.store.list().await
    }

    pub async fn list_all(&self) -> Result<Vec<ServiceDefinition>> {
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .map(|r| r.definition.clone())
            .collect())
    }

    pub async fn list_by_category(&self, category: &str) -> Result<Vec<ServiceDefinition>> {
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .filter(|r| r.definition.category.eq_ignore_ascii_case(category))
            .map(|r| r.definition.clone())
            .collect())
    }

    pub async fn stats(&self) -> Result<RegistryStats> {
        let records = self.store.list().await?;
        let mut stats = RegistryStats {
            services: records.len(),
            ..RegistryStats::default()
        };

        for record in &records {
            stats.instances += record.instances.len();
            stats.healthy_instances += record.healthy_count();
            *stats
                .by_category
                .entry(record.definition.category.clone())
                .or_insert(0) += 1;
            for (status, count) in record.status_counts() {
                *stats.by_status.entry(status.to_string()).or_insert(0) += count;
            }
        }

        Ok(stats)
    }
}
