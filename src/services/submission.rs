use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::answer::AnswerMap;
use crate::models::exam_session::ExamSession;
use crate::services::exam_store::ExamStore;
use crate::utils::time::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitReason {
    Manual,
    Timeout,
}

impl fmt::Display for SubmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitReason::Manual => f.write_str("manual"),
            SubmitReason::Timeout => f.write_str("timeout"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub session_id: Uuid,
    pub answers: AnswerMap,
    pub reason: SubmitReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionFailure {
    pub attempts: u32,
    pub reason: String,
}

impl From<SubmissionFailure> for Error {
    fn from(failure: SubmissionFailure) -> Self {
        Error::SubmissionFailed {
            attempts: failure.attempts,
            reason: failure.reason,
        }
    }
}

pub type SubmissionOutcome = std::result::Result<ExamSession, SubmissionFailure>;

/// Receives the result of a finished sequence before any caller sees it.
pub trait SubmissionListener: Send + Sync + 'static {
    /// Commits the stored terminal session locally and returns the committed view.
    fn on_submitted(&self, session: ExamSession) -> ExamSession;
    fn on_submission_failed(&self, failure: &SubmissionFailure);
}

enum Slot {
    Idle,
    Running(watch::Receiver<Option<SubmissionOutcome>>),
    Settled(ExamSession),
}

/// The only path to the Submitted state.
///
/// At most one sequence runs per session. Callers arriving while one runs wait for
/// its outcome; callers arriving after success get the settled session back.
#[derive(Clone)]
pub struct SubmissionCoordinator {
    store: Arc<dyn ExamStore>,
    clock: Arc<dyn Clock>,
    write_gate: Arc<tokio::sync::Mutex<()>>,
    preempt: Arc<Notify>,
    max_attempts: u32,
    retry_delay: Duration,
    slot: Arc<Mutex<Slot>>,
}

impl SubmissionCoordinator {
    pub fn new(
        store: Arc<dyn ExamStore>,
        clock: Arc<dyn Clock>,
        write_gate: Arc<tokio::sync::Mutex<()>>,
        preempt: Arc<Notify>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            write_gate,
            preempt,
            max_attempts: max_attempts.max(1),
            retry_delay,
            slot: Arc::new(Mutex::new(Slot::Idle)),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(*self.slot(), Slot::Running(_))
    }

    /// Records a terminal session learned from elsewhere so no new sequence starts.
    pub fn settle(&self, session: ExamSession) {
        let mut slot = self.slot();
        if matches!(*slot, Slot::Idle) {
            *slot = Slot::Settled(session);
        }
    }

    /// Starts a submission sequence or joins the running one.
    ///
    /// `prepare` runs only when a new sequence starts; it snapshots the answers
    /// and may refuse with an error (e.g. the session is not started).
    pub async fn submit<F>(&self, prepare: F, listener: Arc<dyn SubmissionListener>) -> Result<ExamSession>
    where
        F: FnOnce() -> Result<SubmissionRequest>,
    {
        let mut rx = {
            let mut slot = self.slot();
            let running = match &*slot {
                Slot::Settled(session) => return Ok(session.clone()),
                Slot::Running(rx) => Some(rx.clone()),
                Slot::Idle => None,
            };
            match running {
                Some(rx) => {
                    tracing::debug!("Submission already in flight, joining it");
                    rx
                }
                None => {
                    let request = prepare()?;
                    let (tx, rx) = watch::channel(None);
                    *slot = Slot::Running(rx.clone());
                    self.start(request, tx, listener);
                    rx
                }
            }
        };

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Internal("submission ended without an outcome".into()))?
            .clone();

        match outcome {
            Some(Ok(session)) => Ok(session),
            Some(Err(failure)) => Err(failure.into()),
            None => Err(Error::Internal("submission ended without an outcome".into())),
        }
    }

    fn start(
        &self,
        request: SubmissionRequest,
        tx: watch::Sender<Option<SubmissionOutcome>>,
        listener: Arc<dyn SubmissionListener>,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = match this.run_sequence(&request).await {
                Ok(session) => Ok(listener.on_submitted(session)),
                Err(failure) => {
                    listener.on_submission_failed(&failure);
                    Err(failure)
                }
            };

            *this.slot() = match &outcome {
                Ok(session) => Slot::Settled(session.clone()),
                Err(_) => Slot::Idle,
            };
            let _ = tx.send(Some(outcome));
        });
    }

    async fn run_sequence(&self, request: &SubmissionRequest) -> SubmissionOutcome {
        let session_id = request.session_id;
        tracing::info!(
            %session_id,
            reason = %request.reason,
            answers = request.answers.len(),
            "Submitting exam session"
        );

        // Autosave gives up its retry; then wait for any write it still has in flight.
        self.preempt.notify_waiters();
        let _gate = self.write_gate.lock().await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.flush_and_mark(request).await {
                Ok(session) => {
                    tracing::info!(%session_id, attempt, "Exam session submitted");
                    return Ok(session);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(
                        %session_id,
                        attempt,
                        error = %e,
                        "Submission attempt failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(%session_id, attempt, error = %e, "Submission failed");
                    return Err(SubmissionFailure {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn flush_and_mark(&self, request: &SubmissionRequest) -> Result<ExamSession> {
        self.store
            .write_answers(request.session_id, &request.answers)
            .await?;
        self.store
            .mark_submitted(request.session_id, self.clock.now())
            .await
    }
}
