use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

use super::auth::AuthUser;
use crate::models::NewEvent;
use crate::services::events::EventFilter;
use crate::services::registration::RegistrationResult;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, png, success};

pub async fn list_events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Result<Response, AppError> {
    let events = state.events.list(&filter).await?;
    Ok(success(events, "Events retrieved successfully"))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let event = state.events.get(event_id).await?;
    Ok(success(event, "Event retrieved successfully"))
}

pub async fn create_event(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<NewEvent>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(input) = body?;
    let event = state.events.create_event(user.user_id, input).await?;
    Ok(created(event, "Event created successfully"))
}

pub async fn register_for_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let result = state
        .registrations
        .register(event_id, user.user_id, &user.email)
        .await?;

    Ok(match result {
        RegistrationResult::Confirmed { .. } => created(result, "Registration confirmed"),
        RegistrationResult::PendingPayment { .. } => {
            success(result, "Continue to checkout to complete your registration")
        }
    })
}

pub async fn get_credential(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let image = state
        .registrations
        .credential_png(event_id, user.user_id)
        .await?;
    Ok(png(image))
}
