use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::answer::PendingWrite;
use crate::services::exam_store::ExamStore;

/// Where the scheduler takes its snapshots from.
pub trait DraftSource: Send + Sync + 'static {
    /// Whether the session is still in a state where autosave may write.
    fn autosave_permitted(&self) -> bool;

    /// A snapshot of unsaved edits, or `None` when the draft is clean.
    fn pending_write(&self) -> Option<PendingWrite>;

    fn autosave_succeeded(&self, write: &PendingWrite);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Saved { attempts: u32 },
    Failed,
    Abandoned,
}

/// Periodic, best-effort persistence of the answer draft.
///
/// Cycles never overlap: a tick that finds the write gate held skips its turn.
pub struct AutosaveScheduler {
    interval: Duration,
    retry_delay: Duration,
    store: Arc<dyn ExamStore>,
    write_gate: Arc<Mutex<()>>,
    preempt: Arc<Notify>,
    cancel: CancellationToken,
}

impl AutosaveScheduler {
    pub fn new(
        interval: Duration,
        retry_delay: Duration,
        store: Arc<dyn ExamStore>,
        write_gate: Arc<Mutex<()>>,
        preempt: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            interval,
            retry_delay,
            store,
            write_gate,
            preempt,
            cancel,
        }
    }

    pub fn spawn(self, source: Arc<dyn DraftSource>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if self.cancel.is_cancelled() {
                    break;
                }
                if !source.autosave_permitted() {
                    continue;
                }
                let Ok(guard) = Arc::clone(&self.write_gate).try_lock_owned() else {
                    tracing::debug!("Previous answer write still in flight, skipping autosave cycle");
                    continue;
                };
                let Some(write) = source.pending_write() else {
                    continue;
                };

                tokio::spawn(run_cycle(
                    Arc::clone(&self.store),
                    Arc::clone(&source),
                    write,
                    guard,
                    self.retry_delay,
                    Arc::clone(&self.preempt),
                    self.cancel.clone(),
                ));
            }

            tracing::debug!("Autosave stopped");
        })
    }
}

/// One write plus at most one retry. Failures are logged, never returned.
pub async fn run_cycle(
    store: Arc<dyn ExamStore>,
    source: Arc<dyn DraftSource>,
    mut write: PendingWrite,
    _gate: OwnedMutexGuard<()>,
    retry_delay: Duration,
    preempt: Arc<Notify>,
    cancel: CancellationToken,
) -> CycleOutcome {
    let session_id = write.session_id;

    // Registered before the first write so a submission that starts meanwhile is not missed.
    let preempted = preempt.notified();
    tokio::pin!(preempted);
    preempted.as_mut().enable();

    write.attempt = 1;
    match store.write_answers(session_id, &write.answers).await {
        Ok(()) => {
            source.autosave_succeeded(&write);
            tracing::debug!(%session_id, answers = write.answers.len(), "Autosaved draft");
            return CycleOutcome::Saved { attempts: 1 };
        }
        Err(e) => {
            tracing::warn!(%session_id, error = %e, "Autosave write failed, retrying once");
        }
    }

    if !source.autosave_permitted() {
        return CycleOutcome::Abandoned;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return CycleOutcome::Abandoned,
        _ = &mut preempted => return CycleOutcome::Abandoned,
        _ = tokio::time::sleep(retry_delay) => {}
    }
    if !source.autosave_permitted() {
        return CycleOutcome::Abandoned;
    }

    write.attempt = 2;
    match store.write_answers(session_id, &write.answers).await {
        Ok(()) => {
            source.autosave_succeeded(&write);
            tracing::info!(%session_id, "Autosave succeeded on retry");
            CycleOutcome::Saved { attempts: 2 }
        }
        Err(e) => {
            tracing::error!(
                %session_id,
                error = %e,
                "Autosave failed after retry, answers stay in the local draft"
            );
            CycleOutcome::Failed
        }
    }
}
