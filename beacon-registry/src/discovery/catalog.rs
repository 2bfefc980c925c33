//! Browsable view of the registry
//!
//! Read-only and off the discovery path. Every call rebuilds its view from a
//! fresh registry snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use beacon_core::models::{ServiceId, ServiceRecord};
use beacon_core::Result;

use super::registry::ServiceRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub service_id: ServiceId,
    pub name: String,
    pub version: String,
    pub category: String,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub instance_count: usize,
    pub healthy_count: usize,
    pub status_counts: BTreeMap<String, usize>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ServiceRecord> for CatalogEntry {
    fn from(record: &ServiceRecord) -> Self {
        let definition = &record.definition;
        Self {
            service_id: definition.id.clone(),
            name: definition.name.clone(),
            version: definition.version.clone(),
            category: definition.category.clone(),
            tags: definition.tags.clone(),
            metadata: definition.metadata.clone(),
            instance_count: record.instances.len(),
            healthy_count: record.healthy_count(),
            status_counts: record
                .status_counts()
                .into_iter()
                .map(|(status, count)| (status.to_string(), count))
                .collect(),
            registered_at: definition.registered_at,
            updated_at: definition.updated_at,
        }
    }
}

/// Catalog search filters; unset fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogQuery {
    /// Case-insensitive substring of name, category, tags or metadata values
    pub text: Option<String>,
    pub category: Option<String>,
    pub tag: Option<String>,
    /// Only services with at least one healthy instance
    pub healthy_only: bool,
}

impl CatalogQuery {
    fn matches(&self, entry: &CatalogEntry) -> bool {
        if self.healthy_only && entry.healthy_count == 0 {
            return false;
        }
        if let Some(category) = &self.category {
            if !entry.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !entry.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                return false;
            }
        }
        match &self.text {
            Some(text) if !text.is_empty() => {
                let needle = text.to_lowercase();
                entry.name.to_lowercase().contains(&needle)
                    || entry.category.to_lowercase().contains(&needle)
                    || entry.tags.iter().any(|t| t.to_lowercase().contains(&needle))
                    || entry.metadata.values().any(|v| v.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

pub struct ServiceCatalog {
    registry: Arc<ServiceRegistry>,
}

impl ServiceCatalog {
    #[must_use]
    pub const fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    pub async fn entries(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self
            .registry
            .list_records()
            .await?
            .iter()
            .map(|r| CatalogEntry::from(r.as_ref()))
            .collect())
    }

    pub async fn search(&self, query: &CatalogQuery) -> Result<Vec<CatalogEntry>> {
        let mut entries: Vec<_> = self
            .entries()
            .await?
            .into_iter()
            .filter(|e| query.matches(e))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
        Ok(entries)
    }

    /// Service count per category
    pub async fn categories(&self) -> Result<BTreeMap<String, usize>> {
        let mut categories = BTreeMap::new();
        for record in self.registry.list_records().await? {
            *categories.entry(record.definition.category.clone()).or_insert(0) += 1;
        }
        Ok(categories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use beacon_core::models::{InstanceStatus, RegisterRequest, StatusSignal};
    use beacon_core::{Clock, ManualClock};

    async fn seeded() -> (ServiceCatalog, Arc<ServiceRegistry>) {
        let clock = ManualClock::starting_now();
        let registry = Arc::new(ServiceRegistry::new(Arc::new(InMemoryStore::new()), clock.clone(), 5));
        registry
            .register(
                RegisterRequest::new("user-service", "10.0.0.1", 80)
                    .with_category("core")
                    .with_tag("auth"),
            )
            .await
            .unwrap();
        let reports = registry
            .register(RegisterRequest::new("reports", "10.0.0.2", 80).with_category("batch"))
            .await
            .unwrap();
        registry
            .set_instance_status(
                &reports.service_id,
                &reports.instance_id,
                StatusSignal::probe(InstanceStatus::Unhealthy, clock.now()),
            )
            .await
            .unwrap();
        (ServiceCatalog::new(registry.clone()), registry)
    }

    #[tokio::test]
    async fn test_entries_carry_instance_counts() {
        let (catalog, _) = seeded().await;
        let entries = catalog.entries().await.unwrap();
        assert_eq!(entries.len(), 2);

        let reports = entries.iter().find(|e| e.name == "reports").unwrap();
        assert_eq!(reports.instance_count, 1);
        assert_eq!(reports.healthy_count, 0);
        assert_eq!(reports.status_counts.get("unhealthy"), Some(&1));
    }

    #[tokio::test]
    async fn test_search_filters_combine() {
        let (catalog, _) = seeded().await;

        let by_text = catalog
            .search(&CatalogQuery {
                text: Some("USER".to_string()),
                ..CatalogQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(by_text.len(), 1);

        let healthy = catalog
            .search(&CatalogQuery {
                healthy_only: true,
                ..CatalogQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].name, "user-service");

        let none = catalog
            .search(&CatalogQuery {
                category: Some("core".to_string()),
                tag: Some("billing".to_string()),
                ..CatalogQuery::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_categories() {
        let (catalog, _) = seeded().await;
        let categories = catalog.categories().await.unwrap();
        assert_eq!(categories.get("core"), Some(&1));
        assert_eq!(categories.get("batch"), Some(&1));
    }
}
