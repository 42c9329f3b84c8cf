//! Catalogue-derived filter resolution with a two-level cache.
//!
//! Filters live at two scopes: per-item, keyed by the resource id, and
//! per-group, keyed by `<group-id>/*`. A resource inherits its group's
//! filters and may add item-level ones, so resolution returns the union of
//! whichever scopes are cached, falling back to one remote catalogue call
//! when neither is.

use std::sync::Arc;

use serde::Deserialize;

use crate::cache::SnapshotMap;
use crate::error::DxError;
use crate::ports::CatalogueClient;
use crate::Result;

/// Cache key suffix denoting group scope.
pub const GROUP_KEY_SUFFIX: &str = "/*";

/// Type segment marking an individual resource (as opposed to a group).
const RESOURCE_TYPE: &str = "Resource";

/// A catalogue item as returned by the remote registry.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogueRecord {
    pub id: String,
    #[serde(rename = "type", default)]
    pub types: Vec<String>,
    #[serde(rename = "resourceGroup", default)]
    pub resource_group: Option<String>,
    #[serde(rename = "resourceApis", default)]
    pub permitted_filters: Vec<String>,
}

impl CatalogueRecord {
    /// Type values look like `dx:Resource`; the scope is the segment after
    /// the prefix.
    pub fn is_individual_resource(&self) -> bool {
        self.types
            .iter()
            .any(|t| t.rsplit(':').next() == Some(RESOURCE_TYPE))
    }
}

/// Cache-shielded view over the catalogue.
pub struct FilterResolver {
    client: Arc<dyn CatalogueClient>,
    records: SnapshotMap<CatalogueRecord>,
    filters: SnapshotMap<Vec<String>>,
}

impl FilterResolver {
    pub fn new(client: Arc<dyn CatalogueClient>) -> Self {
        Self {
            client,
            records: SnapshotMap::new(),
            filters: SnapshotMap::new(),
        }
    }

    /// Type record for an id, cache-first with remote fallback.
    async fn record(&self, id: &str) -> Result<CatalogueRecord> {
        if let Some(rec) = self.records.get(id) {
            return Ok(rec);
        }
        let rec = self.client.lookup(id).await?;
        self.records.insert(id, rec.clone());
        Ok(rec)
    }

    /// The set of query filters the owning provider permits for `id`.
    ///
    /// Returns the union of group-scope and item-scope filters, not the
    /// first hit, deduplicated in group-then-item order.
    pub async fn resolve_filters(&self, id: &str) -> Result<Vec<String>> {
        let record = self.record(id).await?;
        let group_id = if record.is_individual_resource() {
            record.resource_group.clone().ok_or_else(|| {
                DxError::NotFound(format!("no resource group registered for {id}"))
            })?
        } else {
            id.to_string()
        };
        let group_key = format!("{group_id}{GROUP_KEY_SUFFIX}");

        let (group_filters, item_filters) = tokio::join!(
            self.cached_filters(&group_key),
            self.cached_filters(id)
        );

        if group_filters.is_none() && item_filters.is_none() {
            // Neither scope cached: one remote call for the specific id,
            // populate the cache, then answer from it.
            let fetched = self.client.lookup(id).await?;
            let key = if fetched.is_individual_resource() {
                id.to_string()
            } else {
                group_key
            };
            self.filters.insert(key, fetched.permitted_filters.clone());
            return Ok(fetched.permitted_filters);
        }

        let mut union = Vec::new();
        for filter in group_filters
            .into_iter()
            .flatten()
            .chain(item_filters.into_iter().flatten())
        {
            if !union.contains(&filter) {
                union.push(filter);
            }
        }
        Ok(union)
    }

    async fn cached_filters(&self, key: &str) -> Option<Vec<String>> {
        self.filters.get(key)
    }

    /// Seed a filter-cache entry, item-keyed or group-keyed. The remote
    /// fallback is the other writer.
    pub fn put_filters(&self, key: impl Into<String>, filters: Vec<String>) {
        self.filters.insert(key, filters);
    }

    /// Existence check over the same cached record path.
    pub async fn item_exists(&self, id: &str) -> Result<bool> {
        match self.record(id).await {
            Ok(_) => Ok(true),
            Err(DxError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All-or-nothing plural form: succeeds only when every id resolves.
    /// Ids warmed by earlier single-id checks cost no remote call.
    pub async fn all_exist(&self, ids: &[String]) -> Result<bool> {
        for id in ids {
            if !self.item_exists(id).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Registered provider for a resource; not cached, the catalogue
    /// relationship endpoint is only consulted for mutations.
    pub async fn provider_user_id(&self, id: &str) -> Result<String> {
        self.client.provider_of(id).await
    }
}
