use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use banter_store::store::HistoryFilter;

use crate::AppState;

/// Upper bound on page size for a single history request.
const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    50
}

/// Paginated public history for one room. Page 1 is the newest slice
/// ("load older on scroll" walks the page number up).
pub async fn room_history(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    if !state.rooms.contains(&room).await {
        return Err(StatusCode::NOT_FOUND);
    }
    let page = state
        .store
        .query(
            &HistoryFilter::Room(room),
            query.page,
            query.page_size.min(MAX_PAGE_SIZE),
        )
        .await;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct PrivateHistoryQuery {
    pub user_a: String,
    pub user_b: String,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Paginated private history between an unordered pair of usernames.
pub async fn private_history(
    State(state): State<AppState>,
    Query(query): Query<PrivateHistoryQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    if query.user_a.trim().is_empty() || query.user_b.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let page = state
        .store
        .query(
            &HistoryFilter::Private {
                a: query.user_a,
                b: query.user_b,
            },
            query.page,
            query.page_size.min(MAX_PAGE_SIZE),
        )
        .await;
    Ok(Json(page))
}
