use chrono::{DateTime, Utc};
use std::time::Duration;

/// Wall-clock source for every timing decision of a session.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time that advances with tokio's clock, so it follows `tokio::time::pause`
/// and `advance` in tests and never jumps when the host clock is adjusted.
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor_wall: DateTime<Utc>,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(anchor_wall: DateTime<Utc>) -> Self {
        Self {
            anchor_wall,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.anchor);
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.anchor_wall + elapsed,
            Err(_) => self.anchor_wall,
        }
    }
}

/// Time left until `deadline`, clamped at zero.
pub fn remaining_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn remaining_is_clamped_at_zero() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            remaining_until(t0 + chrono::Duration::seconds(90), t0),
            Duration::from_secs(90)
        );
        assert_eq!(
            remaining_until(t0, t0 + chrono::Duration::seconds(5)),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let clock = TokioClock::starting_at(t0);
        assert_eq!(clock.now(), t0);

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(clock.now(), t0 + chrono::Duration::seconds(600));
    }
}
