//! Authorization code → access token exchange.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
}

/// Token endpoint response. Both fields are optional so a response without a
/// token can be told apart from an undecodable one.
#[derive(Deserialize, Debug)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// What the storefront granted.
#[derive(Debug)]
pub struct TokenGrant {
    pub access_token: String,
    pub scope: Option<String>,
}

/// Exchanges `code` at `token_url` with a single POST.
///
/// Fails on a transport error, a non-2xx status, an undecodable body or a
/// missing/empty `access_token`.
pub async fn exchange_code_for_token(
    http_client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
) -> Result<TokenGrant> {
    tracing::debug!(token_url = %token_url, "Exchanging authorization code for token");

    let response = http_client
        .post(token_url)
        .header("Accept", "application/json")
        .json(&TokenRequest {
            client_id,
            client_secret,
            code,
        })
        .send()
        .await
        .context("Failed to send token exchange request")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        return Err(anyhow!(
            "Token exchange failed with status {}: {}",
            status,
            body
        ));
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .context("Failed to parse token response")?;

    let access_token = token_response
        .access_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| anyhow!("Token response did not include an access_token"))?;

    Ok(TokenGrant {
        access_token,
        scope: token_response.scope,
    })
}
