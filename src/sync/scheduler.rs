//! Periodic catalog sync across all installed tenants.
//!
//! Each tick lists every stored credential and runs one ingestion per tenant
//! with bounded parallelism. One tenant failing or timing out never stops the
//! others, and a tick never overlaps another tick.

use super::ingestor::{CatalogIngestor, SyncReport};
use crate::config::SchedulerConfig;
use crate::credentials::{CredentialStore, TenantCredential};
use crate::error::{SyncError, SyncResult};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one tenant's sync within a tick.
#[derive(Debug)]
pub struct TenantOutcome {
    pub shop: String,
    pub result: SyncResult<SyncReport>,
}

#[derive(Debug)]
pub struct TickReport {
    pub tick_id: String,
    pub tenants: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<TenantOutcome>,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Another tick was still running
    Skipped,
    Completed(TickReport),
    /// Tenants could not be listed; nothing was attempted
    Aborted(SyncError),
}

/// Timer-driven fan-out of [`CatalogIngestor::sync_tenant`].
pub struct SyncScheduler {
    credential_store: Arc<dyn CredentialStore>,
    ingestor: Arc<CatalogIngestor>,
    interval: Duration,
    sync_timeout: Duration,
    max_concurrency: usize,
    running: AtomicBool,
}

/// Clears the running flag when a tick ends, including on unwind.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncScheduler {
    pub fn new(
        credential_store: Arc<dyn CredentialStore>,
        ingestor: Arc<CatalogIngestor>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            credential_store,
            ingestor,
            interval: config.interval(),
            sync_timeout: config.sync_timeout(),
            max_concurrency: config.max_concurrency.max(1),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one sync pass over every stored tenant.
    ///
    /// Returns [`TickOutcome::Skipped`] without doing anything if a pass is
    /// already in progress.
    pub async fn run_tick(&self) -> TickOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Previous sync tick still running, skipping");
            return TickOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        let tick_id = Uuid::now_v7().to_string();

        let credentials = match self.credential_store.list_all() {
            Ok(credentials) => credentials,
            Err(e) => {
                let err = SyncError::storage(e);
                error!(tick_id = %tick_id, error = %err, "Failed to list tenants, skipping tick");
                return TickOutcome::Aborted(err);
            }
        };

        if credentials.is_empty() {
            info!(tick_id = %tick_id, "No installed tenants, nothing to sync");
            return TickOutcome::Completed(TickReport {
                tick_id,
                tenants: 0,
                succeeded: 0,
                failed: 0,
                results: Vec::new(),
            });
        }

        info!(
            tick_id = %tick_id,
            tenants = credentials.len(),
            max_concurrency = self.max_concurrency,
            "Starting sync tick"
        );

        let results: Vec<TenantOutcome> = stream::iter(credentials)
            .map(|credential| self.sync_one(credential))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let succeeded = results.iter().filter(|r| r.result.is_ok()).count();
        let report = TickReport {
            tick_id,
            tenants: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        };

        info!(
            tick_id = %report.tick_id,
            tenants = report.tenants,
            succeeded = report.succeeded,
            failed = report.failed,
            "Sync tick complete"
        );

        TickOutcome::Completed(report)
    }

    async fn sync_one(&self, credential: TenantCredential) -> TenantOutcome {
        let shop = credential.shop;
        debug!(shop = %shop, "Syncing tenant");

        let upserted = AtomicUsize::new(0);
        let result = match time::timeout(
            self.sync_timeout,
            self.ingestor.sync_tenant_tracked(&shop, &credential.access_token, &upserted),
        )
        .await
        {
            Ok(result) => result,
            // Pages finished before the deadline stay written.
            Err(_) => Err(SyncError::UpstreamFetchFailed {
                shop: shop.clone(),
                upserted: upserted.load(Ordering::Acquire),
                message: format!("sync timed out after {:?}", self.sync_timeout),
            }),
        };

        if let Err(e) = &result {
            warn!(shop = %shop, error = %e, "Tenant sync failed, will retry next tick");
        }

        TenantOutcome { shop, result }
    }

    /// Spawns the ticking task.
    ///
    /// The first pass runs one interval after start. Missed ticks are
    /// skipped rather than bunched up.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Starting sync scheduler");

            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = interval.tick() => {}
                }

                // Outside the select so shutdown cannot cut a tick short.
                self.run_tick().await;
            }

            info!("Sync scheduler stopped");
        });

        SchedulerHandle {
            shutdown_tx,
            handle,
        }
    }
}

/// Owner of a running scheduler task.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops future ticks and waits for an in-flight tick to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Sync scheduler task ended abnormally");
        }
    }
}
