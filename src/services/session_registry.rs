use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::config::SessionTuning;
use crate::error::Result;
use crate::models::exam_session::{ExamSession, RemoteSessionUpdate, SessionIdentity};
use crate::services::exam_store::ExamStore;
use crate::services::session_controller::SessionController;
use crate::utils::time::Clock;

#[derive(Default)]
struct Index {
    by_pair: HashMap<(Uuid, Uuid), SessionController>,
    by_session: HashMap<Uuid, (Uuid, Uuid)>,
}

/// Keeps exactly one controller per (exam, student) pair in this process.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn ExamStore>,
    clock: Arc<dyn Clock>,
    tuning: SessionTuning,
    index: Arc<Mutex<Index>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn ExamStore>, clock: Arc<dyn Clock>, tuning: SessionTuning) -> Self {
        Self {
            store,
            clock,
            tuning,
            index: Arc::new(Mutex::new(Index::default())),
        }
    }

    fn index(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The controller already driving this pair, or a new one bound to `identity`.
    pub fn open(&self, identity: SessionIdentity) -> SessionController {
        let mut index = self.index();
        index
            .by_pair
            .entry(identity.key())
            .or_insert_with(|| {
                SessionController::new(
                    identity,
                    Arc::clone(&self.store),
                    Arc::clone(&self.clock),
                    self.tuning.clone(),
                )
            })
            .clone()
    }

    /// Begins or resumes through the pair's controller. Once the session is final the
    /// controller is dropped from the registry after `terminal_retention`.
    pub async fn begin(&self, identity: SessionIdentity) -> Result<(SessionController, ExamSession)> {
        let key = identity.key();
        let controller = self.open(identity);
        let session = match controller.begin().await {
            Ok(session) => session,
            Err(e) => {
                if controller.session().is_none() {
                    self.forget_unstarted(key, &controller);
                }
                return Err(e);
            }
        };

        let newly_indexed = self.index().by_session.insert(session.id, key).is_none();
        if newly_indexed {
            self.evict_when_final(key, session.id, &controller);
        }
        Ok((controller, session))
    }

    fn forget_unstarted(&self, key: (Uuid, Uuid), controller: &SessionController) {
        let mut index = self.index();
        let current = index
            .by_pair
            .get(&key)
            .is_some_and(|c| c.same_session(controller) && c.session().is_none());
        if current {
            index.by_pair.remove(&key);
        }
    }

    fn evict_when_final(&self, key: (Uuid, Uuid), session_id: Uuid, controller: &SessionController) {
        let mut status = controller.subscribe();
        let index = Arc::downgrade(&self.index);
        let retention = self.tuning.terminal_retention;

        tokio::spawn(async move {
            if status.wait_for(|view| view.status.is_terminal()).await.is_err() {
                return;
            }
            tokio::time::sleep(retention).await;

            let Some(index) = index.upgrade() else { return };
            let mut index = index.lock().unwrap_or_else(|e| e.into_inner());
            let current = index
                .by_pair
                .get(&key)
                .is_some_and(|c| c.subscribe().same_channel(&status));
            if current {
                index.by_pair.remove(&key);
                index.by_session.remove(&session_id);
                tracing::debug!(%session_id, "Released submitted session");
            }
        });
    }

    pub fn get(&self, exam_id: Uuid, student_id: Uuid) -> Option<SessionController> {
        self.index().by_pair.get(&(exam_id, student_id)).cloned()
    }

    pub fn len(&self) -> usize {
        self.index().by_pair.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find_by_session(&self, session_id: Uuid) -> Option<SessionController> {
        let index = self.index();
        let key = index.by_session.get(&session_id)?;
        index.by_pair.get(key).cloned()
    }

    /// Hands a realtime push to the controller of its session. Returns `false` when
    /// no controller in this process owns that session.
    pub async fn route_remote_update(&self, update: RemoteSessionUpdate) -> bool {
        let session_id = update.session_id;
        let Some(controller) = self.find_by_session(session_id) else {
            tracing::debug!(%session_id, "Remote update for a session not open here");
            return false;
        };
        if controller.remote_updates().send(update).await.is_err() {
            tracing::warn!(%session_id, "Session inbox closed, remote update dropped");
            return false;
        }
        true
    }
}
