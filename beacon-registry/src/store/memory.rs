//! In-memory registry store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use beacon_core::models::{ServiceId, ServiceRecord};
use beacon_core::{Error, Result};

use super::RegistryStore;

#[derive(Default)]
struct Inner {
    records: HashMap<ServiceId, Arc<ServiceRecord>>,
    /// (name, version) -> id
    by_key: HashMap<(String, String), ServiceId>,
}

/// Records behind a read/write lock.
///
/// Readers clone `Arc` snapshots and release the lock immediately, so a read
/// never observes a half-applied write.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key_of(record: &ServiceRecord) -> (String, String) {
    (
        record.definition.name.clone(),
        record.definition.version.clone(),
    )
}

#[async_trait]
impl RegistryStore for InMemoryStore {
    async fn get(&self, id: &ServiceId) -> Result<Option<Arc<ServiceRecord>>> {
        Ok(self.inner.read().records.get(id).cloned())
    }

    async fn find_by_key(&self, name: &str, version: &str) -> Result<Option<Arc<ServiceRecord>>> {
        let inner = self.inner.read();
        Ok(inner
            .by_key
            .get(&(name.to_string(), version.to_string()))
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<Arc<ServiceRecord>>> {
        let inner = self.inner.read();
        let mut records: Vec<_> = inner
            .records
            .values()
            .filter(|r| r.definition.name == name)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.definition.registered_at.cmp(&b.definition.registered_at));
        Ok(records)
    }

    async fn list(&self) -> Result<Vec<Arc<ServiceRecord>>> {
        let mut records: Vec<_> = self.inner.read().records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.definition
                .registered_at
                .cmp(&b.definition.registered_at)
                .then_with(|| a.definition.id.cmp(&b.definition.id))
        });
        Ok(records)
    }

    async fn insert(&self, record: ServiceRecord) -> Result<Arc<ServiceRecord>> {
        let mut inner = self.inner.write();
        let key = key_of(&record);

        if inner.records.contains_key(record.id()) {
            return Err(Error::AlreadyExists(format!("service id {}", record.id())));
        }
        if inner.by_key.contains_key(&key) {
            return Err(Error::AlreadyExists(format!(
                "service {} version {}",
                key.0, key.1
            )));
        }

        let record = Arc::new(record);
        inner.by_key.insert(key, record.id().clone());
        inner.records.insert(record.id().clone(), record.clone());
        Ok(record)
    }

    async fn replace(&self, mut record: ServiceRecord) -> Result<Arc<ServiceRecord>> {
        let mut inner = self.inner.write();

        let current = inner
            .records
            .get(record.id())
            .ok_or_else(|| Error::NotFound(format!("service {}", record.id())))?;

        if current.revision != record.revision {
            return Err(Error::LockConflict(format!(
                "service {} (expected revision {}, found {})",
                record.id(),
                record.revision,
                current.revision
            )));
        }

        // Name and version are part of the identity; a replace never renames
        if key_of(current) != key_of(&record) {
            return Err(Error::InvalidInput(format!(
                "service {} cannot change name or version",
                record.id()
            )));
        }

        record.revision += 1;
        let record = Arc::new(record);
        inner.records.insert(record.id().clone(), record.clone());
        Ok(record)
    }

    async fn remove(&self, id: &ServiceId) -> Result<Arc<ServiceRecord>> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("service {id}")))?;
        inner.by_key.remove(&key_of(&record));
        Ok(record)
    }
}
