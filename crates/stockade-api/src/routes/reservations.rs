//! Reservation endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use stockade_core::{Pagination, Reservation, ReservationStatus};

use crate::middleware::AuthUser;
use crate::response::{validation_error, ApiError, ApiResponse, Meta};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    pub item_id: Uuid,

    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelReservationRequest {
    #[validate(length(max = 500, message = "reason too long"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub status: Option<ReservationStatus>,
}

/// POST /api/v1/reservations
pub async fn create_reservation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Reservation>>), ApiError> {
    body.validate().map_err(|e| validation_error(&e))?;

    let reservation = state
        .coordinator
        .create(&user.requester(), body.item_id, body.quantity)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("Reservation created", reservation)),
    ))
}

/// POST /api/v1/reservations/:id/checkout
pub async fn checkout_reservation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Reservation>>, ApiError> {
    let reservation = state.coordinator.checkout(id, &user.requester()).await?;

    Ok(Json(ApiResponse::ok("Reservation confirmed", reservation)))
}

/// POST /api/v1/reservations/:id/cancel
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelReservationRequest>,
) -> Result<Json<ApiResponse<Reservation>>, ApiError> {
    body.validate().map_err(|e| validation_error(&e))?;

    let reservation = state
        .coordinator
        .cancel(id, &user.requester(), body.reason.as_deref())
        .await?;

    Ok(Json(ApiResponse::ok("Reservation cancelled", reservation)))
}

/// GET /api/v1/reservations/me
pub async fn my_reservations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<Reservation>>>, ApiError> {
    let pagination = Pagination {
        page: query.page.unwrap_or(1).max(1),
        limit: query.limit.unwrap_or(20).clamp(1, 100),
    };

    let (reservations, total) = state
        .coordinator
        .list_own(&user.requester(), query.status, &pagination)
        .await?;

    let meta = Meta::paginated(
        pagination.page,
        pagination.limit,
        total,
        pagination.total_pages(total),
    );

    Ok(Json(ApiResponse::ok_with_meta(
        "Reservations",
        reservations,
        meta,
    )))
}

/// GET /api/v1/reservations/:id
pub async fn get_reservation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Reservation>>, ApiError> {
    let reservation = state.coordinator.get(id, &user.requester()).await?;

    Ok(Json(ApiResponse::ok("Reservation", reservation)))
}
