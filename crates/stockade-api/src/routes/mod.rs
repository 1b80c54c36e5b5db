//! Route modules and router assembly

pub mod items;
pub mod monitoring;
pub mod reservations;

use axum::{
    extract::{Request, State},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::middleware::{
    auth_middleware, rate_limit_checkout, rate_limit_create, rate_limit_general, require_admin,
};
use crate::response::{ApiError, ApiResponse};
use crate::state::AppState;

/// GET /health
async fn health(State(state): State<AppState>) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    state.db.health_check().await?;

    Ok(Json(ApiResponse::ok(
        "ok",
        json!({ "version": stockade_core::VERSION }),
    )))
}

pub fn build_router(state: AppState) -> Router {
    let create_route = Router::new()
        .route("/", post(reservations::create_reservation))
        .layer(from_fn_with_state(state.clone(), rate_limit_create));

    let checkout_route = Router::new()
        .route("/:id/checkout", post(reservations::checkout_reservation))
        .layer(from_fn_with_state(state.clone(), rate_limit_checkout));

    let reservations = Router::new()
        .merge(create_route)
        .merge(checkout_route)
        .route("/:id/cancel", post(reservations::cancel_reservation))
        .route("/me", get(reservations::my_reservations))
        .route("/:id", get(reservations::get_reservation))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let monitoring = Router::new()
        .route("/stock/consistency", get(monitoring::stock_consistency))
        .route("/stock/fix-consistency", post(monitoring::fix_consistency))
        .route("/scheduler", get(monitoring::scheduler_health))
        .route("/scheduler/trigger", post(monitoring::scheduler_trigger))
        .layer(from_fn(require_admin))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let items = Router::new()
        .route("/", get(items::list_items))
        .route("/:id", get(items::get_item));

    Router::new()
        .nest("/api/v1/reservations", reservations)
        .nest("/api/v1/monitoring", monitoring)
        .nest("/api/v1/items", items)
        .route("/health", get(health))
        .layer(from_fn_with_state(state.clone(), rate_limit_general))
        .with_state(state)
}
