//! Membership handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{
    CreateMembershipRequest, MembershipResponse, PaymentRequest, PaymentResponse,
    UpdateMembershipRequest,
};
use crate::handlers::Actor;
use crate::models::{parse_stored_date, MembershipPatch};
use crate::services::MembershipStore;
use crate::startup::AppState;

pub async fn list_memberships(
    State(state): State<AppState>,
) -> Result<Json<Vec<MembershipResponse>>, AppError> {
    let today = state.clock.today();
    let memberships = state.store.list_memberships().await?;

    Ok(Json(
        memberships
            .into_iter()
            .map(|m| MembershipResponse::new(m, today))
            .collect(),
    ))
}

pub async fn get_membership(
    State(state): State<AppState>,
    Path(membership_id): Path<Uuid>,
) -> Result<Json<MembershipResponse>, AppError> {
    let membership = state
        .store
        .get_membership(membership_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Membership not found")))?;

    Ok(Json(MembershipResponse::new(membership, state.clock.today())))
}

pub async fn create_membership(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateMembershipRequest>,
) -> Result<(StatusCode, Json<MembershipResponse>), AppError> {
    payload.validate()?;

    tracing::info!(
        name = %payload.name,
        plan = %payload.plan,
        actor = actor.as_str(),
        "Enrolling membership"
    );

    let membership = state.accounts.enroll(payload.into(), actor.as_str()).await?;

    Ok((
        StatusCode::CREATED,
        Json(MembershipResponse::new(membership, state.clock.today())),
    ))
}

pub async fn update_membership(
    State(state): State<AppState>,
    Path(membership_id): Path<Uuid>,
    Json(payload): Json<UpdateMembershipRequest>,
) -> Result<Json<MembershipResponse>, AppError> {
    payload.validate()?;

    let patch = MembershipPatch::from(payload);
    if patch.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("No fields to update")));
    }
    if let Some(join_date) = &patch.join_date {
        parse_stored_date("join_date", join_date)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;
    }
    if let Some(last) = &patch.last_membership_payment {
        parse_stored_date("last_membership_payment", last)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;
    }

    tracing::info!(membership_id = %membership_id, "Updating membership");

    let membership = state.store.update_membership(membership_id, &patch).await?;
    Ok(Json(MembershipResponse::new(membership, state.clock.today())))
}

pub async fn delete_membership(
    State(state): State<AppState>,
    Path(membership_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!(membership_id = %membership_id, "Deleting membership");
    state.store.delete_membership(membership_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn register_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(membership_id): Path<Uuid>,
    Json(payload): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), AppError> {
    payload.validate()?;

    let receipt = state
        .accounts
        .register_payment(
            membership_id,
            payload.amount,
            payload.description,
            actor.as_str(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(receipt.into())))
}
