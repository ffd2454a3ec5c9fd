//! Local mirror of each tenant's upstream catalog.
//!
//! Entries are keyed by `(shop, product_id)`. Re-ingesting the same product
//! overwrites its title, description and `synced_at`; entries that disappear
//! upstream are kept.

use crate::error::{SyncError, SyncResult};
use crate::oauth::normalize_shop;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod store;

pub use store::SqliteCatalogStore;

/// One mirrored upstream product.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub shop: String,
    /// Upstream product id, unique within a shop
    pub product_id: i64,
    pub title: String,
    /// Raw upstream description; may contain HTML
    pub description: String,
    pub synced_at: DateTime<Utc>,
}

/// Persistence for catalog entries.
///
/// Calls are blocking. `upsert` must be a single atomic operation keyed on
/// `(shop, product_id)` so that concurrent ingestion of the same shop is safe.
pub trait CatalogRepository: Send + Sync {
    fn upsert(&self, entry: &CatalogEntry) -> Result<()>;

    fn count_by_shop(&self, shop: &str) -> Result<u64>;

    /// Case-insensitive substring match over title and description, limited to
    /// one shop.
    fn search(&self, shop: &str, query: &str) -> Result<Vec<CatalogEntry>>;
}

/// Validates the parameters and runs a tenant-scoped search.
///
/// Both `shop` and `query` are required; an empty match set is not an error.
/// `shop` is normalized the same way installs store it.
pub fn search(
    repository: &dyn CatalogRepository,
    shop: &str,
    query: &str,
) -> SyncResult<Vec<CatalogEntry>> {
    let shop = normalize_shop(shop)?;
    let query = query.trim();

    if query.is_empty() {
        return Err(SyncError::InvalidInput("missing query".to_string()));
    }

    let results = repository.search(&shop, query).map_err(SyncError::storage)?;

    tracing::debug!(shop = %shop, query = %query, count = results.len(), "Catalog search");
    Ok(results)
}

/// Number of entries mirrored for `shop`.
pub fn catalog_count(repository: &dyn CatalogRepository, shop: &str) -> SyncResult<u64> {
    let shop = normalize_shop(shop)?;
    repository.count_by_shop(&shop).map_err(SyncError::storage)
}
