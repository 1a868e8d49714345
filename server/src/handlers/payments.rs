use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::Utc;
use tracing::{debug, info};

use super::auth::AuthUser;
use crate::gateway::webhook::{
    parse_notification, verify_signature, GatewayNotification, DEFAULT_TOLERANCE_SECS,
    SIGNATURE_HEADER,
};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{empty_success, success};

pub async fn payment_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<String>,
) -> Result<Response, AppError> {
    let view = state.payments.status_for(&session_id, user.user_id).await?;
    Ok(success(view, "Payment status retrieved"))
}

/// Gateway notifications. Anything but an infrastructure failure is
/// acknowledged so the gateway stops redelivering.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::ValidationError("Missing webhook signature".to_string()))?;

    verify_signature(
        &body,
        signature,
        &state.config.stripe_webhook_secret,
        Utc::now(),
        DEFAULT_TOLERANCE_SECS,
    )
    .map_err(|e| AppError::ValidationError(format!("Invalid webhook signature: {}", e)))?;

    let notification = parse_notification(&body)
        .map_err(|e| AppError::ValidationError(format!("Invalid webhook payload: {}", e)))?;

    let outcome = match &notification {
        GatewayNotification::CheckoutCompleted { session_id } => state
            .payments
            .confirm_payment(session_id)
            .await
            .map(|_| ()),
        GatewayNotification::CheckoutExpired { session_id } => {
            state.payments.fail_payment(session_id).await.map(|_| ())
        }
        GatewayNotification::AwaitingPayment { session_id } => {
            info!(session_id = %session_id, "Checkout finished, payment not settled yet");
            Ok(())
        }
        GatewayNotification::Ignored { kind } => {
            debug!(kind = %kind, "Ignoring webhook event");
            Ok(())
        }
    };

    match outcome {
        Ok(()) => Ok(empty_success("Webhook processed")),
        Err(e) if e.is_infrastructure() => Err(e),
        Err(e) => {
            info!(code = e.code(), notification = ?notification, "Webhook acknowledged with domain outcome");
            Ok(empty_success("Webhook acknowledged"))
        }
    }
}
