//! Upstream catalog access.
//!
//! [`CatalogSource`] is the seam the ingestor pulls pages through;
//! [`CatalogClient`] implements it against the storefront admin REST API.

mod pagination;

pub use pagination::extract_next_cursor;

use crate::config::ShopifyConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header::HeaderMap, Client, StatusCode};
use serde::Deserialize;

/// Upstream maximum page size
pub const PAGE_SIZE: u32 = 250;

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// The product fields the mirror keeps.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UpstreamProduct {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProductsResponse {
    #[serde(default)]
    products: Vec<UpstreamProduct>,
}

/// One page of a tenant's catalog.
#[derive(Debug, Default)]
pub struct ProductPage {
    pub products: Vec<UpstreamProduct>,
    /// Cursor for the following page; `None` on the last page
    pub next_cursor: Option<String>,
}

/// Paginated read access to a tenant's upstream catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetches one page. `cursor` is `None` for the first page.
    async fn fetch_page(
        &self,
        shop: &str,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<ProductPage>;
}

/// HTTP client for the storefront products endpoint.
pub struct CatalogClient {
    http_client: Client,
    config: ShopifyConfig,
}

impl CatalogClient {
    pub fn new(config: ShopifyConfig) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("storesync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            config,
        })
    }

    fn page_url(&self, shop: &str, cursor: Option<&str>) -> String {
        let base = format!(
            "{}/admin/api/{}/products.json",
            self.config.shop_base_url(shop),
            self.config.api_version
        );
        match cursor {
            // The upstream rejects other filters alongside page_info.
            Some(cursor) => format!(
                "{}?limit={}&page_info={}",
                base,
                PAGE_SIZE,
                urlencoding::encode(cursor)
            ),
            None => format!("{}?limit={}&fields=id,title,body_html", base, PAGE_SIZE),
        }
    }
}

#[async_trait]
impl CatalogSource for CatalogClient {
    async fn fetch_page(
        &self,
        shop: &str,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<ProductPage> {
        let url = self.page_url(shop, cursor);
        let response = self
            .http_client
            .get(&url)
            .header(ACCESS_TOKEN_HEADER, access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send products request")?;

        check_response_status(response.status(), response.headers())?;

        let link = response
            .headers()
            .get("link")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body: ProductsResponse = response
            .json()
            .await
            .context("Failed to parse products response")?;

        Ok(ProductPage {
            products: body.products,
            next_cursor: extract_next_cursor(link.as_deref()),
        })
    }
}

/// Maps error statuses to descriptive errors.
///
/// - 401 → token revoked or invalid
/// - 429 → rate limited (reports `Retry-After`)
/// - Other non-2xx → generic API error
fn check_response_status(status: StatusCode, headers: &HeaderMap) -> Result<()> {
    match status {
        StatusCode::UNAUTHORIZED => Err(anyhow!(
            "Upstream auth error: access token invalid or revoked"
        )),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = headers
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            Err(anyhow!("Upstream rate limit exceeded (Retry-After: {})", retry_after))
        }
        s if !s.is_success() => Err(anyhow!("Upstream API error: {}", s)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const FIRST_PAGE: &str = "/admin/api/2024-01/products.json?limit=250&fields=id,title,body_html";

    fn client_for(server: &Server) -> CatalogClient {
        CatalogClient::new(ShopifyConfig {
            base_url_override: Some(server.url()),
            ..ShopifyConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_page_url_uses_shop_domain() {
        let client = CatalogClient::new(ShopifyConfig::default()).unwrap();
        assert_eq!(
            client.page_url("acme.example", None),
            "https://acme.example/admin/api/2024-01/products.json?limit=250&fields=id,title,body_html"
        );
        assert_eq!(
            client.page_url("acme.example", Some("abc")),
            "https://acme.example/admin/api/2024-01/products.json?limit=250&page_info=abc"
        );
    }

    #[tokio::test]
    async fn test_fetch_first_page() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", FIRST_PAGE)
            .match_header("x-shopify-access-token", "shpat_test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header(
                "link",
                r#"<https://acme.example/admin/api/2024-01/products.json?limit=250&page_info=cursor2>; rel="next""#,
            )
            .with_body(
                r#"{"products":[
                    {"id":1,"title":"Red Shirt","body_html":"<p>Cotton</p>"},
                    {"id":2,"title":"Blue Hat"}
                ]}"#,
            )
            .create_async()
            .await;

        let page = client_for(&server)
            .fetch_page("acme.example", "shpat_test", None)
            .await
            .unwrap();

        assert_eq!(page.products.len(), 2);
        assert_eq!(page.products[0].title.as_deref(), Some("Red Shirt"));
        assert!(page.products[1].body_html.is_none());
        assert_eq!(page.next_cursor.as_deref(), Some("cursor2"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_unauthorized() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_page("acme.example", "revoked", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("auth error"));
    }

    #[tokio::test]
    async fn test_fetch_rate_limited() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(429)
            .with_header("Retry-After", "2.0")
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_page("acme.example", "tok", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Retry-After: 2.0"));
    }

    #[tokio::test]
    async fn test_fetch_malformed_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let result = client_for(&server)
            .fetch_page("acme.example", "tok", None)
            .await;
        assert!(result.is_err());
    }
}
