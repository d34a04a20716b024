use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;
use crate::utils::token::generate_session_token;

const SESSION_TOKEN_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Submitted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Submitted => "submitted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Submitted)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(SessionStatus::NotStarted),
            "in_progress" => Ok(SessionStatus::InProgress),
            "submitted" => Ok(SessionStatus::Submitted),
            other => Err(Error::Internal(format!("unknown session status '{}'", other))),
        }
    }
}

/// Who is attempting which exam, and from which client instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub session_token: String,
}

impl SessionIdentity {
    pub fn new(exam_id: Uuid, student_id: Uuid) -> Self {
        Self::with_token(exam_id, student_id, generate_session_token(SESSION_TOKEN_LENGTH))
    }

    pub fn with_token(exam_id: Uuid, student_id: Uuid, session_token: impl Into<String>) -> Self {
        Self {
            exam_id,
            student_id,
            session_token: session_token.into(),
        }
    }

    pub fn key(&self) -> (Uuid, Uuid) {
        (self.exam_id, self.student_id)
    }
}

/// One attempt by one student at one exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSession {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub status: SessionStatus,
    pub session_token: String,
    pub started_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub score: Option<Decimal>,
}

impl ExamSession {
    /// Fills `deadline` from `started_at` and the exam duration. A deadline that is
    /// already present is never recomputed.
    pub fn derive_deadline(&mut self, duration_minutes: u32) {
        if self.deadline.is_some() {
            return;
        }
        self.deadline = self
            .started_at
            .map(|started| started + Duration::minutes(i64::from(duration_minutes)));
    }

    pub fn is_submitted(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ExamSessionRow {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub status: String,
    pub session_token: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub score: Option<Decimal>,
}

impl TryFrom<ExamSessionRow> for ExamSession {
    type Error = Error;

    fn try_from(row: ExamSessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            exam_id: row.exam_id,
            student_id: row.student_id,
            status: row.status.parse()?,
            session_token: row.session_token.unwrap_or_default(),
            started_at: row.started_at,
            deadline: None,
            submitted_at: row.submitted_at,
            score: row.score,
        })
    }
}

/// Partial session snapshot pushed by the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSessionUpdate {
    pub session_id: Uuid,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub score: Option<Decimal>,
}

/// What the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusView {
    pub status: SessionStatus,
    pub remaining_ms: Option<i64>,
    /// Set once the deadline has passed; no further edits are accepted.
    #[serde(default)]
    pub expired: bool,
    pub last_error: Option<String>,
    pub score: Option<Decimal>,
}

impl Default for SessionStatusView {
    fn default() -> Self {
        Self {
            status: SessionStatus::NotStarted,
            remaining_ms: None,
            expired: false,
            last_error: None,
            score: None,
        }
    }
}
