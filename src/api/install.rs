//! Install routes: `GET /auth` and `GET /auth/callback`.
//!
//! The state token issued on `/auth` is bound to the browser with a
//! short-lived HttpOnly cookie and compared with the `state` the storefront
//! echoes back on the callback.

use super::{AppError, AppState};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

pub const STATE_COOKIE: &str = "storesync_oauth_state";

#[derive(Deserialize)]
pub struct BeginParams {
    shop: Option<String>,
}

#[derive(Deserialize)]
pub struct CallbackParams {
    shop: Option<String>,
    code: Option<String>,
    state: Option<String>,
}

/// GET /auth?shop=
///
/// Redirects to the storefront's authorize page and sets the state cookie.
pub async fn begin(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BeginParams>,
) -> Result<Response, AppError> {
    let request = state
        .authenticator
        .begin_authorization(params.shop.as_deref().unwrap_or_default())?;

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age={}",
        STATE_COOKIE,
        request.state,
        state.authenticator.state_ttl_seconds()
    );

    let mut response = Redirect::temporary(&request.url).into_response();
    set_cookie(&mut response, &cookie);
    Ok(response)
}

/// GET /auth/callback?shop=&code=&state=
///
/// Completes the install and redirects to the home view for the shop.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let session_state = read_cookie(&headers, STATE_COOKIE);
    debug!(has_session_state = session_state.is_some(), "OAuth callback received");

    let credential = state
        .authenticator
        .complete_authorization(
            params.shop.as_deref().unwrap_or_default(),
            params.code.as_deref().unwrap_or_default(),
            params.state.as_deref().unwrap_or_default(),
            session_state.as_deref(),
        )
        .await?;

    let target = format!("/?shop={}", urlencoding::encode(&credential.shop));
    let mut response = Redirect::to(&target).into_response();
    set_cookie(
        &mut response,
        &format!("{}=; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0", STATE_COOKIE),
    );
    Ok(response)
}

fn set_cookie(response: &mut Response, cookie: &str) {
    // Cookie values here are base64url, always valid header bytes.
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

/// Value of cookie `name` from the request's `Cookie` headers.
fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
}
