//! Best-effort mirror of service records
//!
//! Wraps any [`RegistryStore`] and copies each committed record into a Moka
//! cache (and optionally Redis) with a multi-minute TTL. The inner store stays
//! authoritative: reads never come from the mirror and a mirror failure never
//! fails the write.

use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use beacon_core::models::{ServiceId, ServiceRecord};
use beacon_core::{Error, Result};

use super::RegistryStore;

/// Timeout for Redis operations in seconds
const REDIS_TIMEOUT_SECS: u64 = 5;

/// Mirror settings
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub ttl: Duration,
    pub capacity: u64,
    /// Redis URL for the shared tier; `None` keeps the mirror process-local
    pub redis_url: Option<String>,
    pub key_prefix: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            capacity: 10_000,
            redis_url: None,
            key_prefix: "beacon:service:".to_string(),
        }
    }
}

/// Write-through mirror decorator around a registry store
pub struct MirroredStore<S> {
    inner: S,
    local: moka::future::Cache<ServiceId, Arc<ServiceRecord>>,
    redis_client: Option<Client>,
    ttl_secs: u64,
    key_prefix: String,
}

impl<S: RegistryStore> MirroredStore<S> {
    pub fn new(inner: S, config: MirrorConfig) -> Result<Self> {
        let redis_client = match config.redis_url.as_deref() {
            Some(url) if !url.is_empty() => Some(Client::open(url).map_err(|e| {
                Error::Configuration(format!("invalid mirror Redis URL: {e}"))
            })?),
            _ => None,
        };

        let local = moka::future::CacheBuilder::new(config.capacity)
            .time_to_live(config.ttl)
            .build();

        Ok(Self {
            inner,
            local,
            redis_client,
            ttl_secs: config.ttl.as_secs().max(1),
            key_prefix: config.key_prefix,
        })
    }

    /// Mirrored copy of a record, if still within TTL
    pub async fn mirror_snapshot(&self, id: &ServiceId) -> Option<Arc<ServiceRecord>> {
        self.local.get(id).await
    }

    /// Approximate number of mirrored records
    #[must_use]
    pub fn mirror_len(&self) -> u64 {
        self.local.entry_count()
    }

    fn redis_key(&self, id: &ServiceId) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    async fn mirror_write(&self, record: &Arc<ServiceRecord>) {
        self.local.insert(record.id().clone(), record.clone()).await;

        if let Some(ref client) = self.redis_client {
            if let Err(e) = self.redis_set(client, record).await {
                tracing::warn!(
                    service_id = %record.id(),
                    error = %e,
                    "Failed to mirror service record to Redis"
                );
            }
        }
    }

    async fn mirror_remove(&self, id: &ServiceId) {
        self.local.invalidate(id).await;

        if let Some(ref client) = self.redis_client {
            if let Err(e) = self.redis_del(client, id).await {
                tracing::warn!(
                    service_id = %id,
                    error = %e,
                    "Failed to remove mirrored service record from Redis"
                );
            }
        }
    }

    async fn redis_set(&self, client: &Client, record: &ServiceRecord) -> Result<()> {
        let mut conn = timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| Error::Cache("Redis connection timed out".to_string()))?
        .map_err(|e| Error::Cache(format!("Redis connection failed: {e}")))?;

        let json = serde_json::to_string(record)?;
        let key = self.redis_key(record.id());

        timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            conn.set_ex::<_, _, ()>(&key, json, self.ttl_secs),
        )
        .await
        .map_err(|_| Error::Cache("Redis SETEX timed out".to_string()))?
        .map_err(|e| Error::Cache(format!("Redis SETEX failed: {e}")))?;

        Ok(())
    }

    async fn redis_del(&self, client: &Client, id: &ServiceId) -> Result<()> {
        let mut conn = timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| Error::Cache("Redis connection timed out".to_string()))?
        .map_err(|e| Error::Cache(format!("Redis connection failed: {e}")))?;

        timeout(
            Duration::from_secs(REDIS_TIMEOUT_SECS),
            conn.del::<_, ()>(self.redis_key(id)),
        )
        .await
        .map_err(|_| Error::Cache("Redis DEL timed out".to_string()))?
        .map_err(|e| Error::Cache(format!("Redis DEL failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl<S: RegistryStore> RegistryStore for MirroredStore<S> {
    async fn get(&self, id: &ServiceId) -> Result<Option<Arc<ServiceRecord>>> {
        self.inner.get(id).await
    }

    async fn find_by_key(&self, name: &str, version: &str) -> Result<Option<Arc<ServiceRecord>>> {
        self.inner.find_by_key(name, version).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<Arc<ServiceRecord>>> {
        self.inner.find_by_name(name).await
    }

    async fn list(&self) -> Result<Vec<Arc<ServiceRecord>>> {
        self.inner.list().await
    }

    async fn insert(&self, record: ServiceRecord) -> Result<Arc<ServiceRecord>> {
        let stored = self.inner.insert(record).await?;
        self.mirror_write(&stored).await;
        Ok(stored)
    }

    async fn replace(&self, record: ServiceRecord) -> Result<Arc<ServiceRecord>> {
        let stored = self.inner.replace(record).await?;
        self.mirror_write(&stored).await;
        Ok(stored)
    }

    async fn remove(&self, id: &ServiceId) -> Result<Arc<ServiceRecord>> {
        let removed = self.inner.remove(id).await?;
        self.mirror_remove(id).await;
        Ok(removed)
    }
}
