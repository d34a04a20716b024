use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use chrono::Utc;
use tokio_stream::{wrappers::WatchStream, Stream, StreamExt};
use uuid::Uuid;
use validator::Validate;

use crate::dto::session_dto::{
    BeginSessionRequest, BeginSessionResponse, RecordAnswerRequest, SaveAnswerResponse,
    SubmitSessionResponse,
};
use crate::error::{Error, Result};
use crate::models::exam_session::{SessionIdentity, SessionStatusView};
use crate::services::session_controller::SessionController;
use crate::services::submission::SubmitReason;
use crate::AppState;

fn open_controller(state: &AppState, exam_id: Uuid, student_id: Uuid) -> Result<SessionController> {
    state
        .registry
        .get(exam_id, student_id)
        .ok_or_else(|| Error::NotFound("session_not_open".into()))
}

#[axum::debug_handler]
pub async fn begin_session(
    State(state): State<AppState>,
    Json(req): Json<BeginSessionRequest>,
) -> Result<Json<BeginSessionResponse>> {
    req.validate()?;
    let identity = match req.session_token {
        Some(token) => SessionIdentity::with_token(req.exam_id, req.student_id, token),
        None => SessionIdentity::new(req.exam_id, req.student_id),
    };
    let (controller, session) = state.registry.begin(identity).await?;
    Ok(Json(BeginSessionResponse {
        session,
        answers: controller.answers(),
        status: controller.status(),
    }))
}

#[axum::debug_handler]
pub async fn record_answer(
    State(state): State<AppState>,
    Path((exam_id, student_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<RecordAnswerRequest>,
) -> Result<Json<SaveAnswerResponse>> {
    req.validate()?;
    let controller = open_controller(&state, exam_id, student_id)?;
    controller.record_answer(req.question_id.clone(), req.answer)?;
    Ok(Json(SaveAnswerResponse {
        saved: true,
        question_id: req.question_id,
        timestamp: Utc::now(),
    }))
}

#[axum::debug_handler]
pub async fn submit_session(
    State(state): State<AppState>,
    Path((exam_id, student_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<SubmitSessionResponse>> {
    let controller = open_controller(&state, exam_id, student_id)?;
    let session = controller.request_submit(SubmitReason::Manual).await?;
    Ok(Json(SubmitSessionResponse {
        session,
        status: controller.status(),
    }))
}

#[axum::debug_handler]
pub async fn get_status(
    State(state): State<AppState>,
    Path((exam_id, student_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<SessionStatusView>> {
    let controller = open_controller(&state, exam_id, student_id)?;
    Ok(Json(controller.status()))
}

pub async fn status_events(
    State(state): State<AppState>,
    Path((exam_id, student_id)): Path<(Uuid, Uuid)>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let controller = open_controller(&state, exam_id, student_id)?;
    let stream = WatchStream::new(controller.subscribe()).map(|view| {
        let event = Event::default().event("status");
        Ok(event
            .json_data(&view)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
