use axum::{extract::State, http::StatusCode, Json};
use subtle::ConstantTimeEq;

use crate::{
    dto::session_dto::SessionUpdatedEnvelope,
    error::{Error, Result},
    AppState,
};

pub async fn handle_session_updated(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(envelope): Json<SessionUpdatedEnvelope>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    verify_secret(&headers, &state.webhook_secret)?;
    if envelope.event != "session_updated" {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "unexpected_event" })),
        ));
    }

    let routed = state.registry.route_remote_update(envelope.payload).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "queued": true, "routed": routed })),
    ))
}

fn verify_secret(headers: &axum::http::HeaderMap, expected: &str) -> Result<()> {
    let Some(secret_hdr) = headers.get("x-webhook-secret") else {
        return Err(Error::Unauthorized("missing_webhook_secret".into()));
    };
    let provided = secret_hdr
        .to_str()
        .map_err(|_| Error::Unauthorized("invalid_secret_header".into()))?;
    if ConstantTimeEq::ct_eq(provided.as_bytes(), expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(Error::Unauthorized("invalid_webhook_secret".into()))
    }
}
