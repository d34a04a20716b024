use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::SessionTuning;
use crate::error::{Error, Result};
use crate::models::answer::{AnswerDraft, AnswerMap, AnswerValue, PendingWrite};
use crate::models::exam_session::{
    ExamSession, RemoteSessionUpdate, SessionIdentity, SessionStatus, SessionStatusView,
};
use crate::services::autosave::{AutosaveScheduler, DraftSource};
use crate::services::deadline_timer::{DeadlineListener, DeadlineTimer};
use crate::services::exam_store::ExamStore;
use crate::services::submission::{
    SubmissionCoordinator, SubmissionFailure, SubmissionListener, SubmissionRequest, SubmitReason,
};
use crate::utils::time::{remaining_until, Clock};

const REMOTE_INBOX_CAPACITY: usize = 64;

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[derive(Debug, Default)]
struct LocalState {
    session: Option<ExamSession>,
    draft: AnswerDraft,
    saved_revision: u64,
    expired: bool,
    submitting: bool,
    last_error: Option<String>,
    remaining_ms: Option<i64>,
}

impl LocalState {
    fn status(&self) -> SessionStatus {
        self.session
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(SessionStatus::NotStarted)
    }

    fn view(&self) -> SessionStatusView {
        SessionStatusView {
            status: self.status(),
            remaining_ms: self.remaining_ms,
            expired: self.expired,
            last_error: self.last_error.clone(),
            score: self.session.as_ref().and_then(|s| s.score),
        }
    }
}

struct Inner {
    me: Weak<Inner>,
    identity: SessionIdentity,
    store: Arc<dyn ExamStore>,
    clock: Arc<dyn Clock>,
    tuning: SessionTuning,
    state: Mutex<LocalState>,
    transition: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    write_gate: Arc<tokio::sync::Mutex<()>>,
    preempt: Arc<Notify>,
    timer: DeadlineTimer,
    submission: SubmissionCoordinator,
    status_tx: watch::Sender<SessionStatusView>,
    remote_tx: mpsc::Sender<RemoteSessionUpdate>,
    remote_rx: Mutex<Option<mpsc::Receiver<RemoteSessionUpdate>>>,
}

/// Single authority over one student's attempt at one exam.
///
/// Only this type changes the session status. The timer, autosave and submission
/// machinery report back through it, and realtime pushes arrive on its inbox.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController").finish_non_exhaustive()
    }
}

impl SessionController {
    pub fn new(
        identity: SessionIdentity,
        store: Arc<dyn ExamStore>,
        clock: Arc<dyn Clock>,
        tuning: SessionTuning,
    ) -> Self {
        let cancel = CancellationToken::new();
        let write_gate = Arc::new(tokio::sync::Mutex::new(()));
        let preempt = Arc::new(Notify::new());
        let (status_tx, _) = watch::channel(SessionStatusView::default());
        let (remote_tx, remote_rx) = mpsc::channel(REMOTE_INBOX_CAPACITY);

        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            timer: DeadlineTimer::new(tuning.deadline_tick, cancel.child_token()),
            submission: SubmissionCoordinator::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::clone(&write_gate),
                Arc::clone(&preempt),
                tuning.submit_max_attempts,
                tuning.submit_retry_delay,
            ),
            identity,
            store,
            clock,
            tuning,
            state: Mutex::new(LocalState::default()),
            transition: tokio::sync::Mutex::new(()),
            cancel,
            write_gate,
            preempt,
            status_tx,
            remote_tx,
            remote_rx: Mutex::new(Some(remote_rx)),
        });

        Self { inner }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.inner.identity
    }

    pub fn session(&self) -> Option<ExamSession> {
        self.inner.state().session.clone()
    }

    pub fn answers(&self) -> AnswerMap {
        self.inner.state().draft.snapshot()
    }

    pub fn status(&self) -> SessionStatusView {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatusView> {
        self.inner.status_tx.subscribe()
    }

    /// Inbound channel for realtime session pushes.
    pub fn remote_updates(&self) -> mpsc::Sender<RemoteSessionUpdate> {
        self.inner.remote_tx.clone()
    }

    /// Whether both handles drive the same attempt.
    pub fn same_session(&self, other: &SessionController) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_expired(&self) -> bool {
        self.inner.state().expired
    }

    /// Starts the attempt or resumes it. Safe to call repeatedly: an in-progress
    /// session keeps its start time and deadline, a submitted one comes back read-only.
    pub async fn begin(&self) -> Result<ExamSession> {
        let inner = &self.inner;
        let _transition = inner.transition.lock().await;

        let existing = inner.state().session.clone();
        if let Some(session) = existing {
            if session.status != SessionStatus::NotStarted {
                tracing::debug!(session_id = %session.id, "Resuming attempt already open in this process");
                return Ok(session);
            }
        }

        let identity = &inner.identity;
        let mut session = inner
            .store
            .get_or_create_session(identity, inner.clock.now())
            .await?;

        if session.session_token != identity.session_token {
            tracing::warn!(
                session_id = %session.id,
                exam_id = %identity.exam_id,
                student_id = %identity.student_id,
                "Session was opened by another client, resuming it here"
            );
        }

        match session.status {
            SessionStatus::NotStarted => {
                return Err(Error::Internal(format!(
                    "store returned session {} without starting it",
                    session.id
                )));
            }
            SessionStatus::Submitted => {
                tracing::info!(session_id = %session.id, "Session already submitted, opening read-only");
                {
                    let mut state = inner.state();
                    state.session = Some(session.clone());
                    state.remaining_ms = None;
                }
                inner.cancel.cancel();
                inner.submission.settle(session.clone());
                inner.spawn_inbox();
                inner.publish();
                return Ok(session);
            }
            SessionStatus::InProgress => {}
        }

        let duration = inner.store.get_exam_duration(identity.exam_id).await?;
        session.derive_deadline(duration);
        let deadline = session.deadline.ok_or_else(|| {
            Error::Internal(format!("in-progress session {} has no start time", session.id))
        })?;
        let saved = inner.store.get_answers(session.id).await?;
        let remaining = remaining_until(deadline, inner.clock.now());

        {
            let mut state = inner.state();
            state.session = Some(session.clone());
            state.draft = AnswerDraft::from_saved(saved);
            state.saved_revision = 0;
            state.remaining_ms = Some(millis(remaining));
            state.expired = remaining.is_zero();
        }
        tracing::info!(
            session_id = %session.id,
            exam_id = %identity.exam_id,
            student_id = %identity.student_id,
            %deadline,
            "Exam session in progress"
        );

        inner.spawn_inbox();
        inner.spawn_autosave();
        inner.arm_timer(deadline);
        inner.publish();

        Ok(session)
    }

    /// Updates the in-memory draft only; autosave or submission persists it.
    pub fn record_answer(&self, question_id: impl Into<String>, value: AnswerValue) -> Result<()> {
        let mut state = self.inner.state();
        match state.status() {
            SessionStatus::NotStarted => Err(Error::IllegalOperation(
                "exam session has not been started".into(),
            )),
            SessionStatus::Submitted => Err(Error::IllegalOperation(
                "exam session is already submitted".into(),
            )),
            SessionStatus::InProgress if state.expired => Err(Error::IllegalOperation(
                "time is up for this exam session".into(),
            )),
            SessionStatus::InProgress if state.submitting => Err(Error::IllegalOperation(
                "exam session is being submitted".into(),
            )),
            SessionStatus::InProgress => {
                state.draft.record(question_id, value);
                Ok(())
            }
        }
    }

    /// Finalizes the attempt. Concurrent calls collapse into the running sequence;
    /// calls after success return the submitted session.
    pub async fn request_submit(&self, reason: SubmitReason) -> Result<ExamSession> {
        if let Some(session) = self.session().filter(ExamSession::is_submitted) {
            return Ok(session);
        }

        let inner = Arc::clone(&self.inner);
        let listener: Arc<dyn SubmissionListener> = Arc::clone(&self.inner) as _;
        inner
            .submission
            .submit(|| inner.prepare_submission(reason), listener)
            .await
    }

    /// Merges a realtime push. Core-owned fields stay local; only a terminal status
    /// and the grading score are taken from the remote side.
    pub fn apply_remote_update(&self, update: RemoteSessionUpdate) {
        self.inner.apply_remote_update(update);
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self) {
        let view = self.state().view();
        self.status_tx.send_replace(view);
    }

    fn controller(&self) -> Option<SessionController> {
        self.me.upgrade().map(|inner| SessionController { inner })
    }

    fn spawn_inbox(&self) {
        let Some(mut rx) = self.remote_rx.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            return;
        };
        let me = self.me.clone();
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let Some(inner) = me.upgrade() else { break };
                inner.apply_remote_update(update);
            }
        });
    }

    fn spawn_autosave(&self) {
        let Some(source) = self.me.upgrade() else { return };
        AutosaveScheduler::new(
            self.tuning.autosave_interval,
            self.tuning.autosave_retry_delay,
            Arc::clone(&self.store),
            Arc::clone(&self.write_gate),
            Arc::clone(&self.preempt),
            self.cancel.child_token(),
        )
        .spawn(source);
    }

    fn arm_timer(&self, deadline: chrono::DateTime<chrono::Utc>) {
        let Some(listener) = self.me.upgrade() else { return };
        if let Err(e) = self.timer.arm(deadline, Arc::clone(&self.clock), listener) {
            tracing::warn!(error = %e, "Deadline timer not armed");
        }
    }

    fn prepare_submission(&self, reason: SubmitReason) -> Result<SubmissionRequest> {
        let request = {
            let mut state = self.state();
            let session_id = match state.session.as_ref() {
                Some(s) if s.status == SessionStatus::InProgress => s.id,
                Some(s) if s.status == SessionStatus::Submitted => {
                    return Err(Error::IllegalOperation(
                        "exam session is already submitted".into(),
                    ));
                }
                _ => {
                    return Err(Error::IllegalOperation(
                        "exam session has not been started".into(),
                    ));
                }
            };
            state.submitting = true;
            state.last_error = None;
            SubmissionRequest {
                session_id,
                answers: state.draft.snapshot(),
                reason,
            }
        };
        self.publish();
        Ok(request)
    }

    fn commit_submitted(&self, stored: ExamSession) -> ExamSession {
        let committed = {
            let mut state = self.state();
            state.submitting = false;
            state.last_error = None;
            state.remaining_ms = None;
            state.saved_revision = state.draft.revision();
            let local = state.session.get_or_insert_with(|| stored.clone());
            local.status = SessionStatus::Submitted;
            local.submitted_at = local.submitted_at.or(stored.submitted_at);
            local.score = stored.score.or(local.score);
            local.clone()
        };

        self.cancel.cancel();
        self.publish();
        tracing::info!(
            session_id = %committed.id,
            submitted_at = ?committed.submitted_at,
            "Exam session is final"
        );
        committed
    }

    fn apply_remote_update(&self, update: RemoteSessionUpdate) {
        let adopted = {
            let mut state = self.state();
            let now = self.clock.now();
            let Some(local) = state.session.as_mut() else {
                tracing::debug!(session_id = %update.session_id, "No local session yet, dropping remote update");
                return;
            };
            if local.id != update.session_id {
                tracing::warn!(
                    local = %local.id,
                    remote = %update.session_id,
                    "Remote update for a different session ignored"
                );
                return;
            }

            if let Some(score) = update.score {
                local.score = Some(score);
            }

            if update.status == Some(SessionStatus::Submitted) && !local.status.is_terminal() {
                local.status = SessionStatus::Submitted;
                local.submitted_at = local.submitted_at.or(update.submitted_at).or(Some(now));
                let adopted = local.clone();
                state.remaining_ms = None;
                state.submitting = false;
                Some(adopted)
            } else {
                None
            }
        };

        if let Some(session) = adopted {
            tracing::warn!(
                session_id = %session.id,
                "Session was submitted elsewhere, stopping local timer and autosave"
            );
            self.cancel.cancel();
            self.submission.settle(session);
        }
        self.publish();
    }
}

impl DeadlineListener for Inner {
    fn on_tick(&self, remaining: Duration) {
        {
            let mut state = self.state();
            if state.status() != SessionStatus::InProgress {
                return;
            }
            state.remaining_ms = Some(millis(remaining));
        }
        self.publish();
    }

    fn on_expiry(&self) {
        {
            let mut state = self.state();
            if state.status() != SessionStatus::InProgress {
                return;
            }
            state.expired = true;
            state.remaining_ms = Some(0);
        }
        self.publish();

        let Some(controller) = self.controller() else { return };
        tracing::info!(session_id = ?controller.session().map(|s| s.id), "Deadline reached, submitting");
        tokio::spawn(async move {
            if let Err(e) = controller.request_submit(SubmitReason::Timeout).await {
                tracing::error!(error = %e, "Timed-out submission failed, waiting for a manual retry");
            }
        });
    }
}

impl DraftSource for Inner {
    fn autosave_permitted(&self) -> bool {
        let state = self.state();
        state.status() == SessionStatus::InProgress
            && !state.submitting
            && !state.expired
            && !self.cancel.is_cancelled()
    }

    fn pending_write(&self) -> Option<PendingWrite> {
        let state = self.state();
        let session = state.session.as_ref()?;
        if state.draft.revision() <= state.saved_revision {
            return None;
        }
        Some(PendingWrite::new(
            session.id,
            state.draft.snapshot(),
            state.draft.revision(),
            self.clock.now(),
        ))
    }

    fn autosave_succeeded(&self, write: &PendingWrite) {
        let mut state = self.state();
        state.saved_revision = state.saved_revision.max(write.revision);
    }
}

impl SubmissionListener for Inner {
    fn on_submitted(&self, session: ExamSession) -> ExamSession {
        self.commit_submitted(session)
    }

    fn on_submission_failed(&self, failure: &SubmissionFailure) {
        {
            let mut state = self.state();
            state.submitting = false;
            state.last_error = Some(Error::from(failure.clone()).to_string());
        }
        self.publish();
        tracing::warn!(
            session_id = ?self.state().session.as_ref().map(|s| s.id),
            attempts = failure.attempts,
            "Submission failed, session stays in progress"
        );
    }
}
