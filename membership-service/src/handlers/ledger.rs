//! Ledger handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{CreateLedgerEntryRequest, UpdateLedgerEntryRequest};
use crate::handlers::Actor;
use crate::models::{LedgerEntry, NewLedgerEntry};
use crate::services::LedgerStore;
use crate::startup::AppState;

/// Current ledger, newest first.
pub async fn list_ledger(
    State(state): State<AppState>,
) -> Result<Json<Vec<LedgerEntry>>, AppError> {
    Ok(Json(state.store.list_ledger().await?))
}

pub async fn create_entry(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateLedgerEntryRequest>,
) -> Result<(StatusCode, Json<LedgerEntry>), AppError> {
    payload.validate()?;

    let entry = NewLedgerEntry {
        entry_id: Uuid::new_v4(),
        amount: payload.amount,
        direction: payload.direction,
        description: payload.description,
        entry_date: payload.entry_date.unwrap_or_else(|| state.clock.today()),
        category: payload.category,
        membership_id: payload.membership_id,
        membership_name: payload.membership_name,
        created_by: Some(actor.0),
    };

    let stored = state.accounts.record_entry(entry).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn update_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Json(payload): Json<UpdateLedgerEntryRequest>,
) -> Result<Json<LedgerEntry>, AppError> {
    payload.validate()?;

    tracing::info!(entry_id = %entry_id, "Updating ledger entry");
    let entry = state.accounts.edit_entry(entry_id, payload.into()).await?;
    Ok(Json(entry))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!(entry_id = %entry_id, "Deleting ledger entry");
    state.store.delete_ledger_entry(entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
