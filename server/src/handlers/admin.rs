use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::auth::AuthUser;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: String,
}

pub async fn platform_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, AppError> {
    let stats = state.admin.stats(user.user_id).await?;
    Ok(success(stats, "Platform statistics retrieved"))
}

pub async fn event_details(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let details = state.admin.event_details(user.user_id, event_id).await?;
    Ok(success(details, "Event details retrieved"))
}

pub async fn delete_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body?;
    let deleted = state
        .admin
        .delete_event(user.user_id, event_id, &request.reason)
        .await?;
    Ok(success(deleted, "Event deleted"))
}

pub async fn blocked_users(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, AppError> {
    let blocked = state.admin.blocked_users(user.user_id).await?;
    Ok(success(blocked, "Blocked users retrieved"))
}

pub async fn block_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(target_user_id): Path<Uuid>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body?;
    let blocked = state
        .admin
        .block_user(user.user_id, target_user_id, &request.reason)
        .await?;
    Ok(success(blocked, "User blocked"))
}

pub async fn unblock_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(target_user_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let unblocked = state.admin.unblock_user(user.user_id, target_user_id).await?;
    Ok(success(unblocked, "User unblocked"))
}
