//! Passive liveness tracking
//!
//! Instances push heartbeats; "active" is derived purely from the time since
//! the most recent one. Nothing here probes the network.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use async_trait::async_trait;
use std::sync::Arc;

use beacon_core::config::HeartbeatConfig;
use beacon_core::models::{InstanceId, ServiceId};
use beacon_core::{Result, SharedClock};

use super::registry::{Removal, RemovalListener, ServiceRegistry};

/// One received heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub service_id: ServiceId,
    pub instance_id: Option<InstanceId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// History key: a whole service or one of its instances
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HeartbeatKey {
    service_id: ServiceId,
    instance_id: Option<InstanceId>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    pub default_timeout: Duration,
    pub retention: Duration,
    pub history_per_target: usize,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self::from(&HeartbeatConfig::default())
    }
}

impl From<&HeartbeatConfig> for HeartbeatSettings {
    fn from(config: &HeartbeatConfig) -> Self {
        Self {
            default_timeout: Duration::minutes(clamp(config.timeout_minutes, 60_000)),
            retention: Duration::days(clamp(config.retention_days, 86_400_000)),
            history_per_target: config.history_per_target.max(1),
        }
    }
}

/// Largest count of a unit (`unit_ms` long) that fits in a chrono `Duration`
fn clamp(value: u64, unit_ms: i64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / unit_ms)
}

/// A registered service with no recent heartbeat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InactiveService {
    pub service_id: ServiceId,
    pub name: String,
    /// `None` when no heartbeat was ever received
    pub last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceHeartbeatStats {
    pub records: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub average_interval_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatStats {
    pub total_records: usize,
    pub tracked_targets: usize,
    pub services: BTreeMap<ServiceId, ServiceHeartbeatStats>,
}

pub struct HeartbeatService {
    registry: Arc<ServiceRegistry>,
    history: DashMap<HeartbeatKey, VecDeque<HeartbeatRecord>>,
    settings: HeartbeatSettings,
    clock: SharedClock,
}

impl HeartbeatService {
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>, settings: HeartbeatSettings) -> Self {
        let clock = registry.clock().clone();
        Self {
            registry,
            history: DashMap::new(),
            settings,
            clock,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &HeartbeatSettings {
        &self.settings
    }

    /// Apply a heartbeat to the registry and record it.
    ///
    /// Nothing is recorded if the registry rejects the heartbeat.
    pub async fn send_heartbeat(
        &self,
        service_id: &ServiceId,
        instance_id: Option<&InstanceId>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        self.registry.update_heartbeat(service_id, instance_id).await?;

        let record = HeartbeatRecord {
            service_id: service_id.clone(),
            instance_id: instance_id.cloned(),
            timestamp: self.clock.now(),
            metadata,
        };
        let key = HeartbeatKey {
            service_id: service_id.clone(),
            instance_id: instance_id.cloned(),
        };

        let mut entry = self.history.entry(key).or_default();
        entry.push_back(record);
        while entry.len() > self.settings.history_per_target {
            entry.pop_front();
        }
        Ok(())
    }

    /// Most recent heartbeat for the target.
    ///
    /// For an instance this includes service-wide heartbeats; for a service it
    /// includes heartbeats of any of its instances.
    #[must_use]
    pub fn last_heartbeat(&self, service_id: &ServiceId, instance_id: Option<&InstanceId>) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .filter(|entry| {
                let key = entry.key();
                &key.service_id == service_id
                    && match instance_id {
                        Some(id) => key.instance_id.is_none() || key.instance_id.as_ref() == Some(id),
                        None => true,
                    }
            })
            .filter_map(|entry| entry.value().back().map(|r| r.timestamp))
            .max()
    }

    /// Active with the configured default timeout
    #[must_use]
    pub fn is_active(&self, service_id: &ServiceId, instance_id: Option<&InstanceId>) -> bool {
        self.is_active_within(service_id, instance_id, self.settings.default_timeout)
    }

    /// True iff the latest heartbeat is no older than `timeout`.
    /// A target that never sent one is inactive.
    #[must_use]
    pub fn is_active_within(&self, service_id: &ServiceId, instance_id: Option<&InstanceId>, timeout: Duration) -> bool {
        self.last_heartbeat(service_id, instance_id)
            .is_some_and(|last| self.clock.now().signed_duration_since(last) <= timeout)
    }

    /// Registered services failing [`Self::is_active_within`]
    pub async fn get_inactive_services(&self, timeout: Duration) -> Result<Vec<InactiveService>> {
        let records = self.registry.list_records().await?;
        Ok(records
            .iter()
            .filter(|r| !self.is_active_within(r.id(), None, timeout))
            .map(|r| InactiveService {
                service_id: r.id().clone(),
                name: r.name().to_string(),
                last_heartbeat: self.last_heartbeat(r.id(), None),
            })
            .collect())
    }

    /// Recorded heartbeats for exactly this target, oldest first
    #[must_use]
    pub fn history(&self, service_id: &ServiceId, instance_id: Option<&InstanceId>) -> Vec<HeartbeatRecord> {
        let key = HeartbeatKey {
            service_id: service_id.clone(),
            instance_id: instance_id.cloned(),
        };
        self.history
            .get(&key)
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop records older than the retention window, always keeping the
    /// newest record per target. Returns the number removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.settings.retention;
        let mut removed = 0;

        for mut entry in self.history.iter_mut() {
            let records = entry.value_mut();
            while records.len() > 1 && records.front().is_some_and(|r| r.timestamp < cutoff) {
                records.pop_front();
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, cutoff = %cutoff, "Pruned heartbeat history");
        }
        removed
    }

    /// Drop history for removed instances, and the service-wide history too
    /// when the whole service went away.
    pub fn forget(&self, removal: &Removal) {
        self.history.retain(|key, _| {
            key.service_id != removal.service_id
                || match &key.instance_id {
                    Some(id) => !removal.instance_ids.contains(id),
                    None => !removal.service_removed,
                }
        });
    }

    #[must_use]
    pub fn stats(&self) -> HeartbeatStats {
        let mut per_service: BTreeMap<ServiceId, Vec<DateTime<Utc>>> = BTreeMap::new();
        let mut stats = HeartbeatStats::default();

        for entry in &self.history {
            stats.tracked_targets += 1;
            stats.total_records += entry.value().len();
            per_service
                .entry(entry.key().service_id.clone())
                .or_default()
                .extend(entry.value().iter().map(|r| r.timestamp));
        }

        for (service_id, mut timestamps) in per_service {
            timestamps.sort_unstable();
            let average_interval_secs = match (timestamps.first(), timestamps.last()) {
                (Some(first), Some(last)) if timestamps.len() > 1 => {
                    let span = last.signed_duration_since(*first).num_milliseconds() as f64 / 1000.0;
                    Some(span / (timestamps.len() - 1) as f64)
                }
                _ => None,
            };
            stats.services.insert(
                service_id,
                ServiceHeartbeatStats {
                    records: timestamps.len(),
                    first: timestamps.first().copied(),
                    last: timestamps.last().copied(),
                    average_interval_secs,
                },
            );
        }

        stats
    }
}

#[async_trait]
impl RemovalListener for HeartbeatService {
    async fn on_removal(&self, removal: &Removal) {
        self.forget(removal);
    }
}
