//! Admin-only operator hooks

use axum::{extract::State, Json};
use serde::Serialize;

use stockade_core::{StockInconsistency, SweepOutcome, SweeperHealth};

use crate::response::{ApiError, ApiResponse};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub consistent: bool,
    pub violations: Vec<StockInconsistency>,
}

/// GET /api/v1/monitoring/stock/consistency
pub async fn stock_consistency(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ConsistencyReport>>, ApiError> {
    let violations = state.ledger.check_consistency().await?;

    let report = ConsistencyReport {
        consistent: violations.is_empty(),
        violations,
    };

    Ok(Json(ApiResponse::ok("Stock consistency", report)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixReport {
    pub fixed: u64,
}

/// POST /api/v1/monitoring/stock/fix-consistency
pub async fn fix_consistency(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<FixReport>>, ApiError> {
    let fixed = state.ledger.fix_consistency().await?;

    Ok(Json(ApiResponse::ok(
        "Stock consistency repaired",
        FixReport { fixed },
    )))
}

/// GET /api/v1/monitoring/scheduler
pub async fn scheduler_health(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SweeperHealth>>, ApiError> {
    let health = state.sweeper.health().await;

    Ok(Json(ApiResponse::ok("Sweeper health", health)))
}

/// POST /api/v1/monitoring/scheduler/trigger
pub async fn scheduler_trigger(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SweepOutcome>>, ApiError> {
    let outcome = state.sweeper.run_once().await?;

    Ok(Json(ApiResponse::ok("Sweeper pass finished", outcome)))
}
