use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{apply_security_headers, create_cors_layer};
use crate::handlers::{admin, attendance, events, health_check, payments};
use crate::state::AppState;

fn event_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(events::list_events).post(events::create_event))
        .route("/:id", get(events::get_event))
        .route("/:id/register", post(events::register_for_event))
        .route("/:id/credential", get(events::get_credential))
        .route("/:id/attendance", post(attendance::mark_attendance))
}

fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(payments::payment_webhook))
        .route("/:session_id", get(payments::payment_status))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(admin::platform_stats))
        .route(
            "/events/:id",
            get(admin::event_details).delete(admin::delete_event),
        )
        .route("/blocks", get(admin::blocked_users))
        .route(
            "/users/:id/block",
            post(admin::block_user).delete(admin::unblock_user),
        )
}

pub fn create_routes(state: AppState) -> Router {
    let cors = create_cors_layer(&state.config.cors_allowed_origins);
    let include_hsts = state.config.is_production;

    let router = Router::new()
        .route("/health", get(health_check))
        .nest("/api/events", event_routes())
        .nest("/api/payments", payment_routes())
        .nest("/api/admin", admin_routes());

    apply_security_headers(router, include_hsts)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
