use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::auth::AuthUser;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{empty_success, success};

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub payload: String,
}

pub async fn mark_attendance(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
    body: Result<Json<CheckInRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body?;

    if !state
        .scan_debouncer
        .admit(user.user_id, event_id, &request.payload)
    {
        return Ok(empty_success("Duplicate scan ignored"));
    }

    match state
        .attendance
        .check_in(event_id, &request.payload, user.user_id)
        .await
    {
        Ok(result) => Ok(success(result, "Attendance recorded")),
        Err(e) => {
            // Nothing was recorded, so the retry must not look like a repeat.
            if e.is_infrastructure() {
                state.scan_debouncer.forget(user.user_id);
            }
            Err(e)
        }
    }
}
