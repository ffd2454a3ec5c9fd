//! Per-tenant catalog ingestion.
//!
//! Pulls every page of a tenant's catalog and upserts each product into the
//! catalog repository. Pages already written stay written if a later page
//! fails.

use crate::catalog::{CatalogEntry, CatalogRepository};
use crate::error::{SyncError, SyncResult};
use crate::shopify::{CatalogSource, UpstreamProduct};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Guard against an upstream that keeps handing out cursors
pub const MAX_PAGES: usize = 1000;

/// Outcome of one ingestion cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub shop: String,
    pub pages: usize,
    /// Products received from upstream
    pub fetched: usize,
    pub upserted: usize,
    /// Products whose upsert failed (skipped, not retried)
    pub failed: usize,
}

/// Fetches a tenant's catalog and mirrors it locally.
pub struct CatalogIngestor {
    source: Arc<dyn CatalogSource>,
    catalog: Arc<dyn CatalogRepository>,
}

impl CatalogIngestor {
    pub fn new(source: Arc<dyn CatalogSource>, catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { source, catalog }
    }

    /// Runs one ingestion cycle for `shop`.
    ///
    /// Follows cursors until the upstream reports no next page or returns an
    /// empty page. Re-running over unchanged upstream data leaves the entry
    /// count unchanged.
    ///
    /// # Errors
    /// * `InvalidInput` - empty shop or access token
    /// * `UpstreamFetchFailed` - network, status or decode failure on any
    ///   page, or more than [`MAX_PAGES`] pages
    pub async fn sync_tenant(&self, shop: &str, access_token: &str) -> SyncResult<SyncReport> {
        self.sync_tenant_tracked(shop, access_token, &AtomicUsize::new(0)).await
    }

    /// Same as [`sync_tenant`](Self::sync_tenant), publishing the running
    /// upsert count to `upserted` after each page so a caller that abandons
    /// the future still knows what was written.
    pub async fn sync_tenant_tracked(
        &self,
        shop: &str,
        access_token: &str,
        upserted: &AtomicUsize,
    ) -> SyncResult<SyncReport> {
        if shop.trim().is_empty() {
            return Err(SyncError::InvalidInput("missing shop".to_string()));
        }
        if access_token.is_empty() {
            return Err(SyncError::InvalidInput(format!(
                "missing access token for {}",
                shop
            )));
        }

        let mut report = SyncReport {
            shop: shop.to_string(),
            ..SyncReport::default()
        };
        let mut cursor: Option<String> = None;

        loop {
            if report.pages >= MAX_PAGES {
                return Err(self.fetch_failed(
                    &report,
                    format!("pagination exceeded {} pages", MAX_PAGES),
                ));
            }

            let page = match self
                .source
                .fetch_page(shop, access_token, cursor.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => return Err(self.fetch_failed(&report, format!("{:#}", e))),
            };
            report.pages += 1;

            if page.products.is_empty() {
                debug!(shop = %shop, page = report.pages, "Empty page, catalog exhausted");
                break;
            }

            report.fetched += page.products.len();
            for product in &page.products {
                self.upsert_product(shop, product, &mut report);
            }
            upserted.store(report.upserted, Ordering::Release);

            debug!(
                shop = %shop,
                page = report.pages,
                products = page.products.len(),
                "Ingested catalog page"
            );

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(
            shop = %shop,
            pages = report.pages,
            fetched = report.fetched,
            upserted = report.upserted,
            failed = report.failed,
            "Catalog sync complete"
        );

        Ok(report)
    }

    fn upsert_product(&self, shop: &str, product: &UpstreamProduct, report: &mut SyncReport) {
        let entry = CatalogEntry {
            shop: shop.to_string(),
            product_id: product.id,
            title: product.title.clone().unwrap_or_default(),
            description: product.body_html.clone().unwrap_or_default(),
            synced_at: Utc::now(),
        };

        match self.catalog.upsert(&entry) {
            Ok(()) => report.upserted += 1,
            Err(e) => {
                warn!(
                    shop = %shop,
                    product_id = product.id,
                    error = %format!("{:#}", e),
                    "Failed to upsert catalog entry, skipping"
                );
                report.failed += 1;
            }
        }
    }

    fn fetch_failed(&self, report: &SyncReport, message: String) -> SyncError {
        warn!(
            shop = %report.shop,
            at = %Utc::now().to_rfc3339(),
            pages = report.pages,
            upserted = report.upserted,
            error = %message,
            "Catalog fetch failed"
        );
        SyncError::UpstreamFetchFailed {
            shop: report.shop.clone(),
            upserted: report.upserted,
            message,
        }
    }
}
