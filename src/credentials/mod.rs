//! Per-tenant access credentials.
//!
//! One record per shop. A later install overwrites the record in place; the
//! engine never deletes one.
//!
//! ```text
//! OAuthAuthenticator ──upsert──► CredentialStore ◄──list_all── SyncScheduler
//!                                      │
//!                         SqliteCredentialStore (tokens sealed
//!                         with AES-256-GCM, one nonce per row)
//! ```

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod storage;

pub use encryption::{validate_key, SealedToken, TokenCipher};
pub use storage::SqliteCredentialStore;

/// Access credential granted to this app by one storefront.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantCredential {
    /// Tenant identifier (storefront domain)
    pub shop: String,

    /// Opaque access token sent on every upstream call
    pub access_token: String,

    /// Scopes granted by the storefront, as reported by the token endpoint
    pub scope: Option<String>,

    pub installed_at: DateTime<Utc>,
}

impl TenantCredential {
    pub fn new(shop: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            shop: shop.into(),
            access_token: access_token.into(),
            scope: None,
            installed_at: Utc::now(),
        }
    }
}

// Keep tokens out of logs.
impl std::fmt::Debug for TenantCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCredential")
            .field("shop", &self.shop)
            .field("access_token", &"<redacted>")
            .field("scope", &self.scope)
            .field("installed_at", &self.installed_at)
            .finish()
    }
}

/// Persistence for tenant credentials.
///
/// Calls are blocking; implementations must make `upsert` atomic per shop.
pub trait CredentialStore: Send + Sync {
    /// Inserts or overwrites the credential for `credential.shop`.
    fn upsert(&self, credential: &TenantCredential) -> Result<()>;

    fn get(&self, shop: &str) -> Result<Option<TenantCredential>>;

    /// Every stored credential, ordered by shop.
    fn list_all(&self) -> Result<Vec<TenantCredential>>;
}
