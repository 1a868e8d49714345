use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;
use crate::utils::response::{error, success};

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
    store: &'static str,
}

/// Liveness plus a store round trip. An unreachable store answers 503.
pub async fn health_check(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => success(
            HealthPayload {
                status: "ok",
                service: "eventhub-api",
                store: "reachable",
            },
            "Health check successful",
        ),
        Err(e) => {
            warn!(error = %e, "Health check could not reach the store");
            error(
                "STORE_UNAVAILABLE",
                "Store unreachable",
                None,
                StatusCode::SERVICE_UNAVAILABLE,
            )
        }
    }
}
