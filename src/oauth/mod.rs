//! OAuth 2.0 authorization-code install flow.
//!
//! 1. `GET /auth?shop=...` → [`OAuthAuthenticator::begin_authorization`]
//!    issues a state token and returns the storefront's authorize URL
//! 2. Merchant approves on the storefront admin
//! 3. Storefront redirects to `/auth/callback?shop&code&state`
//! 4. [`OAuthAuthenticator::complete_authorization`] checks the state against
//!    the session, exchanges the code, stores the credential and runs the
//!    first catalog sync
//!
//! Any failure ends the flow without persisting a credential.

mod exchange;
mod provider;
mod state_manager;

pub use exchange::TokenGrant;
pub use provider::{normalize_shop, OAuthProviderConfig};
pub use state_manager::{run_state_cleanup, StateEntry, StateManager};

use crate::config::ShopifyConfig;
use crate::credentials::{CredentialStore, TenantCredential};
use crate::error::{SyncError, SyncResult};
use crate::sync::CatalogIngestor;
use anyhow::Context;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where an install attempt got to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthPhase {
    /// State token issued, waiting for the callback
    Started,
    /// Callback state matched the session
    Validated,
    /// Code exchanged for a credential
    Exchanged,
    Failed,
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthPhase::Started => "started",
            AuthPhase::Validated => "validated",
            AuthPhase::Exchanged => "exchanged",
            AuthPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Redirect target and the state token to bind to the caller's session.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub shop: String,
    pub url: String,
    pub state: String,
}

/// Drives installs from state issuance to the first catalog sync.
pub struct OAuthAuthenticator {
    provider: OAuthProviderConfig,
    upstream: ShopifyConfig,
    state_manager: StateManager,
    credential_store: Arc<dyn CredentialStore>,
    ingestor: Arc<CatalogIngestor>,
    http_client: reqwest::Client,
    sync_timeout: Duration,
}

impl OAuthAuthenticator {
    pub fn new(
        provider: OAuthProviderConfig,
        upstream: ShopifyConfig,
        state_manager: StateManager,
        credential_store: Arc<dyn CredentialStore>,
        ingestor: Arc<CatalogIngestor>,
        sync_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(upstream.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            provider,
            upstream,
            state_manager,
            credential_store,
            ingestor,
            http_client,
            sync_timeout,
        })
    }

    pub fn state_ttl_seconds(&self) -> i64 {
        self.state_manager.ttl_seconds()
    }

    /// Issues a state token for `shop` and builds the authorize URL.
    ///
    /// Does not contact the upstream.
    pub fn begin_authorization(&self, shop: &str) -> SyncResult<AuthorizationRequest> {
        let shop = normalize_shop(shop)?;
        let state = self.state_manager.create_state(&shop);
        let url = self
            .provider
            .build_auth_url(&self.upstream.shop_base_url(&shop), &state);

        info!(shop = %shop, phase = %AuthPhase::Started, "Authorization started");

        Ok(AuthorizationRequest { shop, url, state })
    }

    /// Finishes an install.
    ///
    /// `session_state` is the state bound to the caller's session when the
    /// flow began; `None` when the session carries none.
    ///
    /// # Errors
    /// * `InvalidInput` - missing or malformed shop, code or state
    /// * `StateMismatch` - returned state differs from the session, or is
    ///   unknown, expired, already used, or issued for another shop
    /// * `TokenExchangeFailed` - upstream rejected the code
    /// * `StorageFailed` - the credential could not be stored
    ///
    /// The post-install catalog sync does not affect the result.
    pub async fn complete_authorization(
        &self,
        shop: &str,
        code: &str,
        returned_state: &str,
        session_state: Option<&str>,
    ) -> SyncResult<TenantCredential> {
        let shop = normalize_shop(shop)?;
        if code.trim().is_empty() {
            return Err(SyncError::InvalidInput("missing code".to_string()));
        }
        if returned_state.is_empty() {
            return Err(SyncError::InvalidInput("missing state".to_string()));
        }

        let session_matches = session_state
            .map(|s| constant_time_eq(s.as_bytes(), returned_state.as_bytes()))
            .unwrap_or(false);
        if !session_matches {
            warn!(
                shop = %shop,
                phase = %AuthPhase::Failed,
                has_session_state = session_state.is_some(),
                "OAuth state does not match session"
            );
            return Err(SyncError::StateMismatch);
        }

        let entry = self
            .state_manager
            .validate_and_consume(returned_state)
            .ok_or_else(|| {
                warn!(shop = %shop, phase = %AuthPhase::Failed, "Unknown or expired OAuth state");
                SyncError::StateMismatch
            })?;
        if entry.shop != shop {
            warn!(
                expected = %entry.shop,
                actual = %shop,
                phase = %AuthPhase::Failed,
                "OAuth state was issued for another shop"
            );
            return Err(SyncError::StateMismatch);
        }

        debug!(shop = %shop, phase = %AuthPhase::Validated, "OAuth state validated");

        let token_url = OAuthProviderConfig::token_url(&self.upstream.shop_base_url(&shop));
        let grant = exchange::exchange_code_for_token(
            &self.http_client,
            &token_url,
            &self.provider.client_id,
            &self.provider.client_secret,
            code,
        )
        .await
        .map_err(|e| {
            error!(
                shop = %shop,
                phase = %AuthPhase::Failed,
                error = %format!("{:#}", e),
                "Token exchange failed"
            );
            SyncError::TokenExchangeFailed(format!("{:#}", e))
        })?;

        let credential = TenantCredential {
            shop: shop.clone(),
            access_token: grant.access_token,
            scope: grant.scope,
            installed_at: Utc::now(),
        };

        self.credential_store.upsert(&credential).map_err(|e| {
            let err = SyncError::storage(e);
            error!(
                shop = %shop,
                phase = %AuthPhase::Failed,
                error = %err,
                "Failed to store credential"
            );
            err
        })?;

        info!(
            shop = %shop,
            phase = %AuthPhase::Exchanged,
            scope = ?credential.scope,
            "Install complete, running initial catalog sync"
        );

        self.initial_sync(&credential).await;

        Ok(credential)
    }

    async fn initial_sync(&self, credential: &TenantCredential) {
        let sync = self
            .ingestor
            .sync_tenant(&credential.shop, &credential.access_token);

        match tokio::time::timeout(self.sync_timeout, sync).await {
            Ok(Ok(report)) => {
                info!(
                    shop = %credential.shop,
                    upserted = report.upserted,
                    "Initial catalog sync complete"
                )
            }
            Ok(Err(e)) => {
                warn!(
                    shop = %credential.shop,
                    error = %e,
                    "Initial catalog sync failed, scheduler will retry"
                )
            }
            Err(_) => warn!(
                shop = %credential.shop,
                timeout = ?self.sync_timeout,
                "Initial catalog sync timed out, scheduler will retry"
            ),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogRepository, SqliteCatalogStore};
    use crate::credentials::SqliteCredentialStore;
    use crate::shopify::CatalogClient;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use mockito::Server;

    struct Fixture {
        authenticator: OAuthAuthenticator,
        credentials: Arc<SqliteCredentialStore>,
        catalog: Arc<SqliteCatalogStore>,
    }

    fn fixture(base_url: String) -> Fixture {
        let upstream = ShopifyConfig {
            base_url_override: Some(base_url),
            ..ShopifyConfig::default()
        };
        let provider = OAuthProviderConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            scopes: vec!["read_products".to_string()],
            redirect_uri: "https://app.example/auth/callback".to_string(),
        };
        let key = BASE64.encode([0u8; 32]);
        let credentials = Arc::new(SqliteCredentialStore::new(":memory:", &key).unwrap());
        let catalog = Arc::new(SqliteCatalogStore::new(":memory:").unwrap());
        let client = Arc::new(CatalogClient::new(upstream.clone()).unwrap());
        let ingestor = Arc::new(CatalogIngestor::new(client, catalog.clone()));

        let authenticator = OAuthAuthenticator::new(
            provider,
            upstream,
            StateManager::new(600),
            credentials.clone(),
            ingestor,
            Duration::from_secs(5),
        )
        .unwrap();

        Fixture {
            authenticator,
            credentials,
            catalog,
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(AuthPhase::Started.to_string(), "started");
        assert_eq!(AuthPhase::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn test_begin_authorization() {
        let f = fixture("https://upstream.test".to_string());
        let request = f.authenticator.begin_authorization(" ACME.example ").unwrap();

        assert_eq!(request.shop, "acme.example");
        assert!(request.url.starts_with("https://upstream.test/admin/oauth/authorize?"));
        assert!(request.url.contains(&format!("state={}", request.state)));
        assert!(request.state.len() >= 22);
    }

    #[tokio::test]
    async fn test_begin_authorization_rejects_bad_shop() {
        let f = fixture("https://upstream.test".to_string());
        assert!(matches!(
            f.authenticator.begin_authorization(""),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            f.authenticator.begin_authorization("not a shop"),
            Err(SyncError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_state_mismatch_never_stores_credential() {
        let mut server = Server::new_async().await;
        let exchange = server
            .mock("POST", "/admin/oauth/access_token")
            .with_status(200)
            .with_body(r#"{"access_token":"shpat_x"}"#)
            .expect(0)
            .create_async()
            .await;
        let f = fixture(server.url());

        let request = f.authenticator.begin_authorization("acme.example").unwrap();

        let err = f
            .authenticator
            .complete_authorization("acme.example", "code", "forged", Some(request.state.as_str()))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StateMismatch));

        let err = f
            .authenticator
            .complete_authorization("acme.example", "code", &request.state, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StateMismatch));

        assert!(f.credentials.get("acme.example").unwrap().is_none());
        exchange.assert_async().await;
    }

    #[tokio::test]
    async fn test_state_for_other_shop_rejected() {
        let server = Server::new_async().await;
        let f = fixture(server.url());

        let request = f.authenticator.begin_authorization("acme.example").unwrap();
        let err = f
            .authenticator
            .complete_authorization(
                "evil.example",
                "code",
                &request.state,
                Some(request.state.as_str()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::StateMismatch));
        assert!(f.credentials.get("evil.example").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unissued_state_rejected_even_if_session_matches() {
        let server = Server::new_async().await;
        let f = fixture(server.url());

        let err = f
            .authenticator
            .complete_authorization("acme.example", "code", "made-up", Some("made-up"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StateMismatch));
    }

    #[tokio::test]
    async fn test_exchange_failure_stores_nothing_and_consumes_state() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/admin/oauth/access_token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_request"}"#)
            .create_async()
            .await;
        let f = fixture(server.url());

        let request = f.authenticator.begin_authorization("acme.example").unwrap();
        let err = f
            .authenticator
            .complete_authorization(
                "acme.example",
                "bad",
                &request.state,
                Some(request.state.as_str()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::TokenExchangeFailed(_)));
        assert!(f.credentials.get("acme.example").unwrap().is_none());

        // Replaying the same state fails on the state, not the exchange.
        let err = f
            .authenticator
            .complete_authorization(
                "acme.example",
                "bad",
                &request.state,
                Some(request.state.as_str()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StateMismatch));
    }

    #[tokio::test]
    async fn test_complete_stores_credential_and_syncs() {
        let mut server = Server::new_async().await;
        let _token = server
            .mock("POST", "/admin/oauth/access_token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"shpat_live","scope":"read_products"}"#)
            .create_async()
            .await;
        let products = server
            .mock(
                "GET",
                "/admin/api/2024-01/products.json?limit=250&fields=id,title,body_html",
            )
            .match_header("x-shopify-access-token", "shpat_live")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"products":[{"id":1,"title":"Red Shirt"}]}"#)
            .create_async()
            .await;
        let f = fixture(server.url());

        let request = f.authenticator.begin_authorization("acme.example").unwrap();
        let credential = f
            .authenticator
            .complete_authorization(
                "acme.example",
                "good",
                &request.state,
                Some(request.state.as_str()),
            )
            .await
            .unwrap();

        assert_eq!(credential.access_token, "shpat_live");
        let stored = f.credentials.get("acme.example").unwrap().unwrap();
        assert_eq!(stored.access_token, "shpat_live");
        assert_eq!(f.catalog.count_by_shop("acme.example").unwrap(), 1);
        products.assert_async().await;
    }

    #[tokio::test]
    async fn test_install_succeeds_when_initial_sync_fails() {
        let mut server = Server::new_async().await;
        let _token = server
            .mock("POST", "/admin/oauth/access_token")
            .with_status(200)
            .with_body(r#"{"access_token":"shpat_live"}"#)
            .create_async()
            .await;
        let _products = server
            .mock(
                "GET",
                "/admin/api/2024-01/products.json?limit=250&fields=id,title,body_html",
            )
            .with_status(503)
            .create_async()
            .await;
        let f = fixture(server.url());

        let request = f.authenticator.begin_authorization("acme.example").unwrap();
        let result = f
            .authenticator
            .complete_authorization(
                "acme.example",
                "good",
                &request.state,
                Some(request.state.as_str()),
            )
            .await;

        assert!(result.is_ok());
        assert!(f.credentials.get("acme.example").unwrap().is_some());
        assert_eq!(f.catalog.count_by_shop("acme.example").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_complete_rejects_missing_inputs() {
        let f = fixture("https://upstream.test".to_string());
        let cases = [
            ("", "c", "s"),
            ("acme.example", "", "s"),
            ("acme.example", "c", ""),
        ];
        for (shop, code, state) in cases {
            let err = f
                .authenticator
                .complete_authorization(shop, code, state, Some(state))
                .await
                .unwrap_err();
            assert!(matches!(err, SyncError::InvalidInput(_)), "{:?}", (shop, code, state));
        }
    }
}
