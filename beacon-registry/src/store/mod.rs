//! Storage seam for service records
//!
//! The in-memory store is the single source of truth. Every write replaces a
//! whole [`ServiceRecord`] and is checked against the record's revision, so a
//! writer holding a stale snapshot gets `LockConflict` instead of silently
//! overwriting a newer record.

pub mod memory;
pub mod mirror;

use async_trait::async_trait;
use std::sync::Arc;

use beacon_core::models::{ServiceId, ServiceRecord};
use beacon_core::Result;

pub use memory::InMemoryStore;
pub use mirror::{MirrorConfig, MirroredStore};

/// Authoritative store of service records
#[async_trait]
pub trait RegistryStore: Send + Sync + 'static {
    /// Snapshot of one record
    async fn get(&self, id: &ServiceId) -> Result<Option<Arc<ServiceRecord>>>;

    /// Record registered under `(name, version)`
    async fn find_by_key(&self, name: &str, version: &str) -> Result<Option<Arc<ServiceRecord>>>;

    /// Every record sharing `name`, any version
    async fn find_by_name(&self, name: &str) -> Result<Vec<Arc<ServiceRecord>>>;

    /// All records ordered by registration time
    async fn list(&self) -> Result<Vec<Arc<ServiceRecord>>>;

    /// Insert a new record.
    ///
    /// Fails with `AlreadyExists` if the id or `(name, version)` is taken.
    async fn insert(&self, record: ServiceRecord) -> Result<Arc<ServiceRecord>>;

    /// Replace a record whose stored revision equals `record.revision`.
    ///
    /// The stored copy gets `revision + 1`. Fails with `LockConflict` on a
    /// revision mismatch and `NotFound` if the record is gone.
    async fn replace(&self, record: ServiceRecord) -> Result<Arc<ServiceRecord>>;

    /// Remove a record, returning the last committed snapshot
    async fn remove(&self, id: &ServiceId) -> Result<Arc<ServiceRecord>>;
}
