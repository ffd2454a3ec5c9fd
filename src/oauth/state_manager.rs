//! OAuth state tokens for CSRF protection.
//!
//! A state token is issued per install attempt, bound to the shop it was
//! issued for, and consumed exactly once on callback.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use std::sync::Arc;

/// Random bytes per state token (encoded length is 43 chars)
const STATE_BYTES: usize = 32;

/// Pending authorization, keyed by its state token
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub shop: String,
    pub issued_at: DateTime<Utc>,
}

/// Short-lived keyed store `state token -> (shop, issued_at)`.
///
/// Cheap to clone; clones share the same map.
#[derive(Clone)]
pub struct StateManager {
    states: Arc<DashMap<String, StateEntry>>,
    ttl: Duration,
}

impl StateManager {
    /// # Arguments
    /// * `ttl_seconds` - How long an issued state stays valid (default: 600)
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            states: Arc::new(DashMap::new()),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    /// Issues a new state token for `shop` and remembers it.
    pub fn create_state(&self, shop: &str) -> String {
        let mut bytes = [0u8; STATE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let state = URL_SAFE_NO_PAD.encode(bytes);

        self.states.insert(
            state.clone(),
            StateEntry {
                shop: shop.to_string(),
                issued_at: Utc::now(),
            },
        );

        state
    }

    /// Removes `state` and returns its entry if it had not expired.
    ///
    /// The token is gone after this call whatever the outcome.
    pub fn validate_and_consume(&self, state: &str) -> Option<StateEntry> {
        let (_, entry) = self.states.remove(state)?;

        if Utc::now() - entry.issued_at > self.ttl {
            return None;
        }

        Some(entry)
    }

    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.states.retain(|_, entry| now - entry.issued_at <= self.ttl);
    }

    pub fn count(&self) -> usize {
        self.states.len()
    }

    #[cfg(test)]
    fn insert_issued_at(&self, state: &str, shop: &str, issued_at: DateTime<Utc>) {
        self.states.insert(
            state.to_string(),
            StateEntry {
                shop: shop.to_string(),
                issued_at,
            },
        );
    }
}

/// Periodically drops states that were never consumed.
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!(remaining = manager.count(), "OAuth state cleanup complete");
    }
}
