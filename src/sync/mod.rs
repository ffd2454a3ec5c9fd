//! Catalog ingestion and the scheduler that fans it out across tenants.

mod ingestor;
mod scheduler;

pub use ingestor::{CatalogIngestor, SyncReport, MAX_PAGES};
pub use scheduler::{SchedulerHandle, SyncScheduler, TenantOutcome, TickOutcome, TickReport};
