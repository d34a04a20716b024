pub mod health;
pub mod sessions;
pub mod webhook;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    let session_api = Router::new()
        .route("/api/sessions/begin", post(sessions::begin_session))
        .route(
            "/api/sessions/:exam_id/:student_id/answers",
            patch(sessions::record_answer),
        )
        .route(
            "/api/sessions/:exam_id/:student_id/submit",
            post(sessions::submit_session),
        )
        .route(
            "/api/sessions/:exam_id/:student_id/status",
            get(sessions::get_status),
        )
        .route(
            "/api/sessions/:exam_id/:student_id/events",
            get(sessions::status_events),
        );

    Router::new()
        .route("/health", get(health::health))
        .merge(session_api)
        .route(
            "/api/webhook/session-updated",
            post(webhook::handle_session_updated),
        )
        .with_state(state)
}
