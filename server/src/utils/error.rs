use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::services::credential::RenderError;
use crate::store::StoreError;
use crate::utils::response::error as error_response;

/// Every failure a client-facing operation can report.
///
/// All variants except `Store` and `Internal` are expected domain outcomes
/// with a specific message. `Store` is the infrastructure category (store
/// unreachable, transaction aborted) and is safe for the caller to retry.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    ValidationError(String),

    #[error("Authentication required: {0}")]
    AuthError(String),

    #[error("{0}")]
    NotAuthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("You are already registered for this event")]
    DuplicateRegistration,

    #[error("Registration for this event is closed")]
    RegistrationClosed,

    #[error("This event has reached capacity")]
    EventFull,

    #[error("This event is free, no payment is required")]
    NotPayable,

    #[error("Payment could not be set up: {0}")]
    PaymentSetupFailed(String),

    #[error("Payment provider error: {0}")]
    GatewayError(String),

    #[error("This code is not a valid registration code")]
    InvalidCredential,

    #[error("This code belongs to a different event")]
    WrongEvent,

    #[error("This attendee has already been checked in")]
    AlreadyCheckedIn,

    #[error("Storage error")]
    Store(#[from] StoreError),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::ValidationError(rejection.body_text())
    }
}

impl AppError {
    /// Failures the caller may retry: the store or the process itself broke.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, AppError::Store(_) | AppError::InternalServerError(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::NotPayable => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateRegistration
            | AppError::RegistrationClosed
            | AppError::EventFull
            | AppError::AlreadyCheckedIn => StatusCode::CONFLICT,
            AppError::InvalidCredential | AppError::WrongEvent => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::PaymentSetupFailed(_) | AppError::GatewayError(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::NotAuthorized(_) => "NOT_AUTHORIZED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DuplicateRegistration => "DUPLICATE_REGISTRATION",
            AppError::RegistrationClosed => "REGISTRATION_CLOSED",
            AppError::EventFull => "EVENT_FULL",
            AppError::NotPayable => "NOT_PAYABLE",
            AppError::PaymentSetupFailed(_) => "PAYMENT_SETUP_FAILED",
            AppError::GatewayError(_) => "GATEWAY_ERROR",
            AppError::InvalidCredential => "INVALID_CREDENTIAL",
            AppError::WrongEvent => "WRONG_EVENT",
            AppError::AlreadyCheckedIn => "ALREADY_CHECKED_IN",
            AppError::Store(_) => "STORE_UNAVAILABLE",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Message safe to show the end user. Infrastructure details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::PaymentSetupFailed(_) => {
                "We could not start checkout for this event, please try again".to_string()
            }
            AppError::GatewayError(_) => {
                "The payment provider is unavailable, please try again shortly".to_string()
            }
            AppError::Store(_) => "The service is temporarily unavailable, please retry".to_string(),
            AppError::InternalServerError(_) => "An unexpected error occurred".to_string(),
            other => other.to_string(),
        }
    }

    fn log(&self) {
        match self {
            AppError::Store(e) => {
                error!(error = ?e, "Store error");
            }
            AppError::InternalServerError(msg) => {
                error!(message = %msg, "Internal error");
            }
            AppError::PaymentSetupFailed(msg) | AppError::GatewayError(msg) => {
                warn!(code = self.code(), message = %msg, "Payment gateway failure");
            }
            _ => {
                tracing::debug!(code = self.code(), message = %self, "Request rejected");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        error_response(code, self.public_message(), None, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_failures_have_specific_messages() {
        assert_eq!(
            AppError::EventFull.public_message(),
            "This event has reached capacity"
        );
        assert_eq!(
            AppError::AlreadyCheckedIn.public_message(),
            "This attendee has already been checked in"
        );
        assert_eq!(
            AppError::ValidationError("A reason is required".into()).public_message(),
            "A reason is required"
        );
    }

    #[test]
    fn test_infrastructure_details_are_not_exposed() {
        let err = AppError::Store(StoreError::Unavailable("connection refused 10.0.0.3".into()));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.public_message().contains("10.0.0.3"));

        let err = AppError::PaymentSetupFailed("sk_live_... rejected".into());
        assert!(!err.public_message().contains("sk_live"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::DuplicateRegistration.status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::WrongEvent.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            AppError::NotAuthorized("admin only".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::NotFound("event".into()).code(), "NOT_FOUND");
    }

    #[test]
    fn test_only_store_and_internal_are_infrastructure() {
        assert!(AppError::Store(StoreError::Unavailable("down".into())).is_infrastructure());
        assert!(AppError::InternalServerError("boom".into()).is_infrastructure());
        assert!(!AppError::EventFull.is_infrastructure());
        assert!(!AppError::GatewayError("timeout".into()).is_infrastructure());
    }
}
