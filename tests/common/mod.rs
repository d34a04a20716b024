#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use exam_session_backend::config::SessionTuning;
use exam_session_backend::error::{Error, Result};
use exam_session_backend::models::answer::AnswerMap;
use exam_session_backend::models::exam_session::{ExamSession, SessionIdentity, SessionStatus};
use exam_session_backend::services::exam_store::ExamStore;
use exam_session_backend::services::session_controller::SessionController;
use exam_session_backend::utils::time::{Clock, TokioClock};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    exams: HashMap<Uuid, u32>,
    sessions: HashMap<(Uuid, Uuid), ExamSession>,
    answers: HashMap<Uuid, AnswerMap>,
}

/// In-memory store with switchable failures and call counters.
#[derive(Default)]
pub struct MemoryExamStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicU32,
    fail_marks: AtomicU32,
    write_delay: Mutex<Duration>,
    pub write_calls: AtomicU32,
    pub mark_calls: AtomicU32,
}

impl MemoryExamStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_exam(&self, duration_minutes: u32) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().unwrap().exams.insert(id, duration_minutes);
        id
    }

    pub fn insert_session(&self, session: ExamSession) {
        self.tables
            .lock()
            .unwrap()
            .sessions
            .insert((session.exam_id, session.student_id), session);
    }

    pub fn session(&self, exam_id: Uuid, student_id: Uuid) -> Option<ExamSession> {
        self.tables.lock().unwrap().sessions.get(&(exam_id, student_id)).cloned()
    }

    pub fn stored_answers(&self, session_id: Uuid) -> AnswerMap {
        self.tables
            .lock()
            .unwrap()
            .answers
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The next `n` answer writes fail with a transient error.
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_marks(&self, n: u32) {
        self.fail_marks.store(n, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    pub fn writes(&self) -> u32 {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn marks(&self) -> u32 {
        self.mark_calls.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ExamStore for MemoryExamStore {
    async fn get_or_create_session(
        &self,
        identity: &SessionIdentity,
        started_at: DateTime<Utc>,
    ) -> Result<ExamSession> {
        let mut tables = self.tables.lock().unwrap();
        let session = tables
            .sessions
            .entry(identity.key())
            .or_insert_with(|| ExamSession {
                id: Uuid::new_v4(),
                exam_id: identity.exam_id,
                student_id: identity.student_id,
                status: SessionStatus::NotStarted,
                session_token: identity.session_token.clone(),
                started_at: None,
                deadline: None,
                submitted_at: None,
                score: None,
            });
        if session.status == SessionStatus::NotStarted {
            session.status = SessionStatus::InProgress;
            session.started_at = session.started_at.or(Some(started_at));
        }
        Ok(session.clone())
    }

    async fn write_answers(&self, session_id: Uuid, answers: &AnswerMap) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.fail_writes) {
            return Err(Error::Store("injected write failure".into()));
        }

        let mut tables = self.tables.lock().unwrap();
        let submitted = tables
            .sessions
            .values()
            .any(|s| s.id == session_id && s.status == SessionStatus::Submitted);
        if submitted {
            return Ok(());
        }
        let stored = tables.answers.entry(session_id).or_default();
        for (question_id, value) in answers {
            stored.insert(question_id.clone(), value.clone());
        }
        Ok(())
    }

    async fn get_answers(&self, session_id: Uuid) -> Result<AnswerMap> {
        Ok(self.stored_answers(session_id))
    }

    async fn mark_submitted(
        &self,
        session_id: Uuid,
        submitted_at: DateTime<Utc>,
    ) -> Result<ExamSession> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_marks) {
            return Err(Error::Store("injected mark failure".into()));
        }
        let mut tables = self.tables.lock().unwrap();
        let session = tables
            .sessions
            .values_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| Error::NotFound("exam session not found".into()))?;
        session.status = SessionStatus::Submitted;
        session.submitted_at = session.submitted_at.or(Some(submitted_at));
        Ok(session.clone())
    }

    async fn get_exam_duration(&self, exam_id: Uuid) -> Result<u32> {
        self.tables
            .lock()
            .unwrap()
            .exams
            .get(&exam_id)
            .copied()
            .ok_or_else(|| Error::NotFound("exam not found".into()))
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
}

/// Must be called inside a paused-time runtime.
pub fn clock() -> Arc<TokioClock> {
    Arc::new(TokioClock::starting_at(t0()))
}

pub fn controller(
    store: &Arc<MemoryExamStore>,
    clock: &Arc<TokioClock>,
    exam_id: Uuid,
    student_id: Uuid,
) -> SessionController {
    let store: Arc<dyn ExamStore> = store.clone();
    let clock: Arc<dyn Clock> = clock.clone();
    SessionController::new(
        SessionIdentity::new(exam_id, student_id),
        store,
        clock,
        SessionTuning::default(),
    )
}

/// Lets spawned tasks run without moving the paused clock past anything interesting.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn registry(
    store: &Arc<MemoryExamStore>,
    clock: &Arc<TokioClock>,
) -> exam_session_backend::services::session_registry::SessionRegistry {
    let store: Arc<dyn ExamStore> = store.clone();
    let clock: Arc<dyn Clock> = clock.clone();
    exam_session_backend::services::session_registry::SessionRegistry::new(
        store,
        clock,
        SessionTuning::default(),
    )
}
