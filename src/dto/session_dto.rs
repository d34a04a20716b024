use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::answer::{AnswerMap, AnswerValue};
use crate::models::exam_session::{ExamSession, RemoteSessionUpdate, SessionStatusView};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BeginSessionRequest {
    pub exam_id: Uuid,
    pub student_id: Uuid,
    #[validate(length(min = 8, max = 128))]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginSessionResponse {
    pub session: ExamSession,
    pub answers: AnswerMap,
    pub status: SessionStatusView,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordAnswerRequest {
    #[validate(length(min = 1, max = 128))]
    pub question_id: String,
    pub answer: AnswerValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAnswerResponse {
    pub saved: bool,
    pub question_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitSessionResponse {
    pub session: ExamSession,
    pub status: SessionStatusView,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope<T> {
    pub event: String,
    #[serde(flatten)]
    pub payload: T,
}

pub type SessionUpdatedEnvelope = WebhookEnvelope<RemoteSessionUpdate>;
