use super::{AppError, AppState};
use crate::catalog;
use crate::oauth::normalize_shop;
use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct HomeParams {
    shop: Option<String>,
}

/// Home/status view. Both fields are null when no shop is given.
#[derive(Serialize)]
pub struct HomeResponse {
    pub shop: Option<String>,
    pub product_count: Option<u64>,
}

/// GET /?shop=
pub async fn home(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HomeParams>,
) -> Result<Json<HomeResponse>, AppError> {
    let shop = params.shop.filter(|s| !s.trim().is_empty());

    let Some(shop) = shop else {
        return Ok(Json(HomeResponse {
            shop: None,
            product_count: None,
        }));
    };

    let shop = normalize_shop(&shop)?;
    let count = catalog::catalog_count(state.catalog.as_ref(), &shop)?;
    Ok(Json(HomeResponse {
        shop: Some(shop),
        product_count: Some(count),
    }))
}
