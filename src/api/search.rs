use super::{AppError, AppState};
use crate::catalog::{self, CatalogEntry};
use crate::oauth::normalize_shop;
use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct SearchParams {
    shop: Option<String>,
    q: Option<String>,
}

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub synced_at: String,
}

impl From<CatalogEntry> for ProductResponse {
    fn from(entry: CatalogEntry) -> Self {
        Self {
            id: entry.product_id,
            title: entry.title,
            description: entry.description,
            synced_at: entry.synced_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub shop: String,
    pub query: String,
    pub count: usize,
    pub products: Vec<ProductResponse>,
}

/// GET /search?shop=&q=
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let shop = normalize_shop(params.shop.as_deref().unwrap_or_default())?;
    let query = params.q.unwrap_or_default().trim().to_string();

    let entries = catalog::search(state.catalog.as_ref(), &shop, &query)?;
    let products: Vec<ProductResponse> = entries.into_iter().map(ProductResponse::from).collect();

    Ok(Json(SearchResponse {
        shop,
        query,
        count: products.len(),
        products,
    }))
}
