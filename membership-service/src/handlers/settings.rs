use axum::{extract::State, Json};
use rust_decimal::Decimal;
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::UpdateSettingsRequest;
use crate::models::{GymSettings, Plan};
use crate::services::SettingsStore;
use crate::startup::AppState;

pub async fn get_settings(State(state): State<AppState>) -> Result<Json<GymSettings>, AppError> {
    Ok(Json(state.store.get_settings().await?))
}

/// Replace the settings document. New prices apply from the next billing run.
pub async fn put_settings(
    State(state): State<AppState>,
    Json(payload): Json<UpdateSettingsRequest>,
) -> Result<Json<GymSettings>, AppError> {
    payload.validate()?;

    let settings = GymSettings::from(payload);
    if let Some(plan) = Plan::ALL
        .into_iter()
        .find(|plan| settings.plan_prices.price(*plan) < Decimal::ZERO)
    {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "price for plan '{}' cannot be negative",
            plan.as_str()
        )));
    }

    let saved = state.store.put_settings(&settings).await?;
    tracing::info!(name = %saved.name, "Gym settings updated");
    Ok(Json(saved))
}
