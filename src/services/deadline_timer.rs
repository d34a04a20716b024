use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::utils::time::{remaining_until, Clock};

pub trait DeadlineListener: Send + Sync + 'static {
    fn on_tick(&self, remaining: Duration);
    fn on_expiry(&self);
}

#[derive(Debug)]
pub enum ArmOutcome {
    Ticking(JoinHandle<()>),
    /// The deadline had already passed; expiry was delivered before `arm` returned.
    FiredImmediately,
    /// Cancelled before arming, nothing scheduled.
    Cancelled,
}

/// Counts down to a deadline and delivers exactly one expiry.
///
/// Arming is allowed once. Cancelling makes any later tick a no-op.
pub struct DeadlineTimer {
    tick: Duration,
    armed: AtomicBool,
    fired: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl DeadlineTimer {
    pub fn new(tick: Duration, cancel: CancellationToken) -> Self {
        Self {
            tick,
            armed: AtomicBool::new(false),
            fired: Arc::new(AtomicBool::new(false)),
            cancel,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn arm(
        &self,
        deadline: DateTime<Utc>,
        clock: Arc<dyn Clock>,
        listener: Arc<dyn DeadlineListener>,
    ) -> Result<ArmOutcome> {
        if self.armed.swap(true, Ordering::SeqCst) {
            return Err(Error::IllegalOperation(
                "deadline timer can only be armed once".into(),
            ));
        }
        if self.cancel.is_cancelled() {
            return Ok(ArmOutcome::Cancelled);
        }

        let remaining = remaining_until(deadline, clock.now());
        listener.on_tick(remaining);
        if remaining.is_zero() {
            tracing::info!(%deadline, "Deadline already passed at arm time, expiring now");
            fire(&self.fired, &self.cancel, listener.as_ref());
            return Ok(ArmOutcome::FiredImmediately);
        }

        let tick = self.tick;
        let fired = Arc::clone(&self.fired);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let mut ticker = tokio::time::interval_at(start + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let expiry = tokio::time::sleep_until(start + remaining);
            tokio::pin!(expiry);
            let mut expiry_due = true;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!("Deadline timer cancelled");
                        break;
                    }
                    _ = &mut expiry, if expiry_due => {
                        expiry_due = false;
                    }
                    _ = ticker.tick() => {}
                }

                if cancel.is_cancelled() {
                    break;
                }
                let remaining = remaining_until(deadline, clock.now());
                listener.on_tick(remaining);
                if remaining.is_zero() {
                    fire(&fired, &cancel, listener.as_ref());
                    break;
                }
            }
        });

        Ok(ArmOutcome::Ticking(handle))
    }
}

fn fire(fired: &AtomicBool, cancel: &CancellationToken, listener: &dyn DeadlineListener) {
    if cancel.is_cancelled() || fired.swap(true, Ordering::SeqCst) {
        return;
    }
    listener.on_expiry();
}
