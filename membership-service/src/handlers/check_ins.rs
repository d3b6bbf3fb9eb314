//! Access-control handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{CheckInRequest, ListCheckInsQuery};
use crate::models::CheckIn;
use crate::services::{CheckInStore, MembershipStore};
use crate::startup::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

pub async fn list_check_ins(
    State(state): State<AppState>,
    Query(query): Query<ListCheckInsQuery>,
) -> Result<Json<Vec<CheckIn>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.store.list_check_ins(limit).await?))
}

/// Only active memberships may enter.
pub async fn check_in(
    State(state): State<AppState>,
    Json(payload): Json<CheckInRequest>,
) -> Result<(StatusCode, Json<CheckIn>), AppError> {
    let membership = state
        .store
        .get_membership(payload.membership_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Membership not found")))?;

    if !membership.is_active() {
        tracing::info!(
            membership_id = %membership.membership_id,
            status = membership.status.as_str(),
            "Check-in refused"
        );
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Membership is {}",
            membership.status.as_str()
        )));
    }

    let check_in = state.store.check_in(&membership).await?;
    tracing::info!(
        check_in_id = %check_in.check_in_id,
        membership_id = %membership.membership_id,
        "Checked in"
    );
    Ok((StatusCode::CREATED, Json(check_in)))
}

pub async fn check_out(
    State(state): State<AppState>,
    Path(check_in_id): Path<Uuid>,
) -> Result<Json<CheckIn>, AppError> {
    let check_in = state.store.check_out(check_in_id).await?;
    Ok(Json(check_in))
}
