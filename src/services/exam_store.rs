use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::answer::{AnswerMap, SessionAnswerRow};
use crate::models::exam_session::{ExamSession, ExamSessionRow, SessionIdentity};

/// Durable record of exams, sessions and answers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExamStore: Send + Sync {
    /// Returns the session for the identity's (exam, student) pair, starting it at
    /// `started_at` when it is missing or not started. An existing start time is kept.
    async fn get_or_create_session(
        &self,
        identity: &SessionIdentity,
        started_at: DateTime<Utc>,
    ) -> Result<ExamSession>;

    /// Upserts one row per question. A no-op once the session is submitted.
    async fn write_answers(&self, session_id: Uuid, answers: &AnswerMap) -> Result<()>;

    async fn get_answers(&self, session_id: Uuid) -> Result<AnswerMap>;

    /// Safe to repeat: an already submitted session is returned unchanged.
    async fn mark_submitted(
        &self,
        session_id: Uuid,
        submitted_at: DateTime<Utc>,
    ) -> Result<ExamSession>;

    async fn get_exam_duration(&self, exam_id: Uuid) -> Result<u32>;
}

const SESSION_COLUMNS: &str =
    "id, exam_id, student_id, status, session_token, started_at, submitted_at, score";

#[derive(Clone)]
pub struct PgExamStore {
    pool: PgPool,
}

impl PgExamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExamStore for PgExamStore {
    async fn get_or_create_session(
        &self,
        identity: &SessionIdentity,
        started_at: DateTime<Utc>,
    ) -> Result<ExamSession> {
        let row = sqlx::query_as::<_, ExamSessionRow>(&format!(
            r#"
            INSERT INTO exam_sessions (exam_id, student_id, status, session_token, started_at)
            VALUES ($1, $2, 'in_progress', $3, $4)
            ON CONFLICT (exam_id, student_id) DO UPDATE
            SET status = CASE
                    WHEN exam_sessions.status = 'not_started' THEN 'in_progress'
                    ELSE exam_sessions.status
                END,
                started_at = COALESCE(exam_sessions.started_at, EXCLUDED.started_at),
                session_token = COALESCE(exam_sessions.session_token, EXCLUDED.session_token),
                updated_at = NOW()
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(identity.exam_id)
        .bind(identity.student_id)
        .bind(&identity.session_token)
        .bind(started_at)
        .fetch_one(&self.pool)
        .await?;

        ExamSession::try_from(row)
    }

    async fn write_answers(&self, session_id: Uuid, answers: &AnswerMap) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let status: String =
            sqlx::query_scalar(r#"SELECT status FROM exam_sessions WHERE id = $1 FOR UPDATE"#)
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await?;
        if status == "submitted" {
            tracing::debug!(%session_id, "Ignoring answer write for submitted session");
            tx.rollback().await?;
            return Ok(());
        }

        for (question_id, value) in answers {
            sqlx::query(
                r#"
                INSERT INTO session_answers (session_id, question_id, choice_id, answer_text)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (session_id, question_id) DO UPDATE
                SET choice_id = EXCLUDED.choice_id,
                    answer_text = EXCLUDED.answer_text,
                    updated_at = NOW()
                "#,
            )
            .bind(session_id)
            .bind(question_id)
            .bind(value.choice_id())
            .bind(value.answer_text())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(r#"UPDATE exam_sessions SET updated_at = NOW() WHERE id = $1"#)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_answers(&self, session_id: Uuid) -> Result<AnswerMap> {
        let rows = sqlx::query_as::<_, SessionAnswerRow>(
            r#"SELECT question_id, choice_id, answer_text FROM session_answers WHERE session_id = $1"#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(SessionAnswerRow::into_entry).collect())
    }

    async fn mark_submitted(
        &self,
        session_id: Uuid,
        submitted_at: DateTime<Utc>,
    ) -> Result<ExamSession> {
        let row = sqlx::query_as::<_, ExamSessionRow>(&format!(
            r#"
            UPDATE exam_sessions
            SET status = 'submitted',
                submitted_at = COALESCE(submitted_at, $2),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('in_progress', 'submitted')
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id)
        .bind(submitted_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => ExamSession::try_from(row),
            None => Err(Error::NotFound(format!(
                "No started session {} to submit",
                session_id
            ))),
        }
    }

    async fn get_exam_duration(&self, exam_id: Uuid) -> Result<u32> {
        let minutes: i32 =
            sqlx::query_scalar(r#"SELECT duration_minutes FROM exams WHERE id = $1"#)
                .bind(exam_id)
                .fetch_one(&self.pool)
                .await?;

        u32::try_from(minutes)
            .ok()
            .filter(|m| *m > 0)
            .ok_or_else(|| {
                Error::BadRequest(format!(
                    "Exam {} has an invalid duration of {} minutes",
                    exam_id, minutes
                ))
            })
    }
}
