//! Service definitions, instances and the instance status state machine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::id::{InstanceId, ServiceId};
use crate::error::{Error, Result};

pub const DEFAULT_VERSION: &str = "1.0.0";
pub const DEFAULT_CATEGORY: &str = "general";

/// Liveness status of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Healthy,
    Unhealthy,
    Inactive,
    Unknown,
}

impl InstanceStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Inactive => "inactive",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Producer of a status signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Registration,
    Heartbeat,
    Probe,
    Sweep,
    Manual,
}

/// A timestamped liveness observation for one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSignal {
    pub status: InstanceStatus,
    pub observed_at: DateTime<Utc>,
    pub source: SignalSource,
}

impl StatusSignal {
    #[must_use]
    pub const fn new(status: InstanceStatus, observed_at: DateTime<Utc>, source: SignalSource) -> Self {
        Self {
            status,
            observed_at,
            source,
        }
    }

    #[must_use]
    pub const fn heartbeat(observed_at: DateTime<Utc>) -> Self {
        Self::new(InstanceStatus::Healthy, observed_at, SignalSource::Heartbeat)
    }

    #[must_use]
    pub const fn probe(status: InstanceStatus, observed_at: DateTime<Utc>) -> Self {
        Self::new(status, observed_at, SignalSource::Probe)
    }

    #[must_use]
    pub const fn sweep(observed_at: DateTime<Utc>) -> Self {
        Self::new(InstanceStatus::Inactive, observed_at, SignalSource::Sweep)
    }
}

/// One running, addressable replica of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub service_id: ServiceId,
    pub address: String,
    pub port: u16,
    pub status: InstanceStatus,
    /// Relative share for weighted round-robin
    pub weight: u32,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
    pub status_source: SignalSource,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Instance {
    #[must_use]
    pub fn new(
        id: InstanceId,
        service_id: ServiceId,
        address: String,
        port: u16,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            service_id,
            address,
            port,
            status: InstanceStatus::Healthy,
            weight: 1,
            registered_at: now,
            last_heartbeat: now,
            status_changed_at: now,
            status_source: SignalSource::Registration,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// `host:port`, bracketing IPv6 literals
    #[must_use]
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    /// Merge a status signal. Newest timestamp wins; an older signal never
    /// overwrites a newer status. Heartbeats always advance `last_heartbeat`.
    ///
    /// Returns `true` if the visible status or timestamps changed.
    pub fn apply(&mut self, signal: &StatusSignal) -> bool {
        let mut changed = false;

        if signal.source == SignalSource::Heartbeat && signal.observed_at > self.last_heartbeat {
            self.last_heartbeat = signal.observed_at;
            changed = true;
        }

        if signal.observed_at < self.status_changed_at {
            return changed;
        }

        if self.status != signal.status
            || self.status_changed_at != signal.observed_at
            || self.status_source != signal.source
        {
            self.status = signal.status;
            self.status_changed_at = signal.observed_at;
            self.status_source = signal.source;
            changed = true;
        }

        changed
    }

    /// Time since the last heartbeat
    #[must_use]
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_heartbeat)
    }

    /// Strictly older than `timeout`
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.heartbeat_age(now) > timeout
    }
}

/// The logical, named service owning zero or more instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: ServiceId,
    pub name: String,
    pub version: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Instance ids in registration order
    pub instance_ids: Vec<InstanceId>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceDefinition {
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// A service definition together with its instances, as stored.
///
/// Records are replaced whole; `revision` increments on each replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub definition: ServiceDefinition,
    pub instances: Vec<Instance>,
    pub revision: u64,
}

impl ServiceRecord {
    #[must_use]
    pub fn new(definition: ServiceDefinition) -> Self {
        Self {
            definition,
            instances: Vec::new(),
            revision: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ServiceId {
        &self.definition.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    #[must_use]
    pub fn instance(&self, id: &InstanceId) -> Option<&Instance> {
        self.instances.iter().find(|i| &i.id == id)
    }

    pub fn instance_mut(&mut self, id: &InstanceId) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| &i.id == id)
    }

    pub fn push_instance(&mut self, instance: Instance) {
        self.definition.instance_ids.push(instance.id.clone());
        self.instances.push(instance);
    }

    pub fn remove_instance(&mut self, id: &InstanceId) -> Option<Instance> {
        let pos = self.instances.iter().position(|i| &i.id == id)?;
        self.definition.instance_ids.retain(|i| i != id);
        Some(self.instances.remove(pos))
    }

    /// Instances in registration order, optionally only the healthy ones
    #[must_use]
    pub fn instances_filtered(&self, healthy_only: bool) -> Vec<Instance> {
        self.instances
            .iter()
            .filter(|i| !healthy_only || i.status.is_healthy())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.instances.iter().filter(|i| i.status.is_healthy()).count()
    }

    /// Count of instances per status
    #[must_use]
    pub fn status_counts(&self) -> HashMap<InstanceStatus, usize> {
        let mut counts = HashMap::new();
        for instance in &self.instances {
            *counts.entry(instance.status).or_insert(0) += 1;
        }
        counts
    }
}

/// Registration input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub weight: Option<u32>,
    /// Caller-chosen instance id; generated when absent
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl RegisterRequest {
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    #[must_use]
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn version_or_default(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_VERSION)
    }

    #[must_use]
    pub fn category_or_default(&self) -> &str {
        self.category.as_deref().unwrap_or(DEFAULT_CATEGORY)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("service name cannot be empty".to_string()));
        }
        if self.address.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "address for service {} cannot be empty",
                self.name
            )));
        }
        if self.port == 0 {
            return Err(Error::InvalidInput(format!(
                "port for service {} must be non-zero",
                self.name
            )));
        }
        if let Some(id) = &self.instance_id {
            if id.trim().is_empty() {
                return Err(Error::InvalidInput("instance id cannot be blank".to_string()));
            }
        }
        Ok(())
    }
}

/// Identifiers returned by a successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub service_id: ServiceId,
    pub instance_id: InstanceId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_at(now: DateTime<Utc>) -> Instance {
        Instance::new(
            InstanceId::from("i1"),
            ServiceId::from("s1"),
            "10.0.0.1".to_string(),
            8080,
            now,
        )
    }

    #[test]
    fn test_new_instance_is_healthy() {
        let now = Utc::now();
        let instance = instance_at(now);
        assert_eq!(instance.status, InstanceStatus::Healthy);
        assert_eq!(instance.last_heartbeat, now);
        assert_eq!(instance.weight, 1);
    }

    #[test]
    fn test_older_signal_does_not_clobber_newer_status() {
        let now = Utc::now();
        let mut instance = instance_at(now);

        assert!(instance.apply(&StatusSignal::sweep(now + Duration::seconds(10))));
        assert_eq!(instance.status, InstanceStatus::Inactive);

        // A probe that finished before the sweep must not win
        instance.apply(&StatusSignal::probe(InstanceStatus::Healthy, now + Duration::seconds(5)));
        assert_eq!(instance.status, InstanceStatus::Inactive);

        // A later heartbeat does
        assert!(instance.apply(&StatusSignal::heartbeat(now + Duration::seconds(20))));
        assert_eq!(instance.status, InstanceStatus::Healthy);
        assert_eq!(instance.last_heartbeat, now + Duration::seconds(20));
    }

    #[test]
    fn test_late_heartbeat_still_advances_last_heartbeat() {
        let now = Utc::now();
        let mut instance = instance_at(now);
        instance.apply(&StatusSignal::probe(InstanceStatus::Unhealthy, now + Duration::seconds(30)));
        instance.apply(&StatusSignal::heartbeat(now + Duration::seconds(20)));

        assert_eq!(instance.status, InstanceStatus::Unhealthy);
        assert_eq!(instance.last_heartbeat, now + Duration::seconds(20));
    }

    #[test]
    fn test_is_stale_is_strict() {
        let now = Utc::now();
        let instance = instance_at(now);
        assert!(!instance.is_stale(now + Duration::seconds(60), Duration::seconds(60)));
        assert!(instance.is_stale(now + Duration::seconds(61), Duration::seconds(60)));
    }

    #[test]
    fn test_endpoint_brackets_ipv6() {
        let now = Utc::now();
        let mut instance = instance_at(now);
        assert_eq!(instance.endpoint(), "10.0.0.1:8080");
        instance.address = "::1".to_string();
        assert_eq!(instance.endpoint(), "[::1]:8080");
    }

    #[test]
    fn test_record_instance_bookkeeping() {
        let now = Utc::now();
        let definition = ServiceDefinition {
            id: ServiceId::from("s1"),
            name: "orders".to_string(),
            version: DEFAULT_VERSION.to_string(),
            category: DEFAULT_CATEGORY.to_string(),
            tags: vec![],
            metadata: HashMap::new(),
            instance_ids: vec![],
            registered_at: now,
            updated_at: now,
        };
        let mut record = ServiceRecord::new(definition);
        record.push_instance(instance_at(now));
        assert_eq!(record.definition.instance_ids.len(), 1);

        let removed = record.remove_instance(&InstanceId::from("i1"));
        assert!(removed.is_some());
        assert!(record.definition.instance_ids.is_empty());
        assert!(record.instances.is_empty());
    }

    #[test]
    fn test_register_request_validation() {
        assert!(RegisterRequest::new("users", "10.0.0.1", 80).validate().is_ok());
        assert!(RegisterRequest::new("", "10.0.0.1", 80).validate().is_err());
        assert!(RegisterRequest::new("users", "", 80).validate().is_err());
        assert!(RegisterRequest::new("users", "10.0.0.1", 0).validate().is_err());
    }
}
