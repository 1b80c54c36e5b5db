//! Read-only item endpoints for the sale page

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use stockade_core::{Error, Item};

use crate::response::{ApiError, ApiResponse, Meta};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ItemListQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// GET /api/v1/items
pub async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ItemListQuery>,
) -> Result<Json<ApiResponse<Vec<Item>>>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM items WHERE status = 'ACTIVE' AND deleted_at IS NULL",
    )
    .fetch_one(state.db.pool())
    .await
    .map_err(Error::Database)?;

    let items = sqlx::query_as::<_, Item>(
        r#"
        SELECT * FROM items
        WHERE status = 'ACTIVE' AND deleted_at IS NULL
        ORDER BY created_at DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(state.db.pool())
    .await
    .map_err(Error::Database)?;

    let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
    let meta = Meta::paginated(page, limit, total, total_pages);

    Ok(Json(ApiResponse::ok_with_meta("Items", items, meta)))
}

/// GET /api/v1/items/:id
pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Item>>, ApiError> {
    let item = state.ledger.get_item(id).await?;

    Ok(Json(ApiResponse::ok("Item", item)))
}
