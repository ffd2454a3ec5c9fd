//! Upstream OAuth endpoints and shop identifier validation.

use crate::config::AppConfig;
use crate::error::{SyncError, SyncResult};

const MAX_SHOP_LEN: usize = 255;

/// App credentials and redirect target used for every install.
#[derive(Clone, Debug)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    /// Fixed callback URL registered with the upstream app
    pub redirect_uri: String,
}

impl OAuthProviderConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            client_id: config.shopify.client_id.clone(),
            client_secret: config.shopify.client_secret.clone(),
            scopes: config.shopify.scopes.clone(),
            redirect_uri: config.server.callback_url(),
        }
    }

    /// Authorization URL on the shop's admin for the given state token.
    pub fn build_auth_url(&self, shop_base_url: &str, state: &str) -> String {
        let scopes = self.scopes.join(",");
        format!(
            "{}/admin/oauth/authorize?client_id={}&scope={}&redirect_uri={}&state={}",
            shop_base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&scopes),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state)
        )
    }

    pub fn token_url(shop_base_url: &str) -> String {
        format!("{}/admin/oauth/access_token", shop_base_url)
    }
}

/// Trims and lower-cases a shop identifier and checks it is domain-like.
///
/// Accepts dot-separated labels of ASCII alphanumerics and hyphens, at least
/// two labels, no label starting or ending with a hyphen.
pub fn normalize_shop(input: &str) -> SyncResult<String> {
    let shop = input.trim().to_ascii_lowercase();

    if shop.is_empty() {
        return Err(SyncError::InvalidInput("missing shop".to_string()));
    }
    if shop.len() > MAX_SHOP_LEN {
        return Err(SyncError::InvalidInput("shop is too long".to_string()));
    }

    let labels: Vec<&str> = shop.split('.').collect();
    let well_formed = labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });

    if !well_formed {
        return Err(SyncError::InvalidInput(format!(
            "'{}' is not a valid shop domain",
            input.trim()
        )));
    }

    Ok(shop)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OAuthProviderConfig {
        OAuthProviderConfig {
            client_id: "app_client_id".to_string(),
            client_secret: "app_secret".to_string(),
            scopes: vec!["read_products".to_string(), "read_inventory".to_string()],
            redirect_uri: "https://app.example/auth/callback".to_string(),
        }
    }

    #[test]
    fn test_build_auth_url() {
        let url = provider().build_auth_url("https://acme.example", "st4te");

        assert!(url.starts_with("https://acme.example/admin/oauth/authorize?"));
        assert!(url.contains("client_id=app_client_id"));
        assert!(url.contains("scope=read_products%2Cread_inventory"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example%2Fauth%2Fcallback"));
        assert!(url.contains("state=st4te"));
        assert!(!url.contains("app_secret"));
    }

    #[test]
    fn test_token_url() {
        assert_eq!(
            OAuthProviderConfig::token_url("https://acme.example"),
            "https://acme.example/admin/oauth/access_token"
        );
    }

    #[test]
    fn test_normalize_shop_accepts_domains() {
        assert_eq!(normalize_shop("acme.example").unwrap(), "acme.example");
        assert_eq!(
            normalize_shop("  Acme-Store.myshopify.com ").unwrap(),
            "acme-store.myshopify.com"
        );
    }

    #[test]
    fn test_normalize_shop_rejects_malformed() {
        for bad in [
            "",
            "   ",
            "acme",
            "acme..example",
            ".acme.example",
            "-acme.example",
            "acme-.example",
            "acme.example/admin",
            "https://acme.example",
            "acme example.com",
            "acme.example?x=1",
        ] {
            assert!(
                matches!(normalize_shop(bad), Err(SyncError::InvalidInput(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_normalize_shop_rejects_overlong() {
        let long = format!("{}.example", "a".repeat(260));
        assert!(normalize_shop(&long).is_err());
    }
}
