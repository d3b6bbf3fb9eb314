use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::models::{BillingRun, BillingRunType};
use crate::startup::AppState;

/// Run a billing pass now, outside the timer.
pub async fn run_billing(State(state): State<AppState>) -> Result<Json<BillingRun>, AppError> {
    tracing::info!("Manual billing run requested");
    Ok(Json(state.engine.run_now(BillingRunType::Manual).await))
}

pub async fn last_run(State(state): State<AppState>) -> Result<Json<BillingRun>, AppError> {
    state
        .engine
        .last_run()
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No billing run yet")))
}
