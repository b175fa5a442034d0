use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::Instant;

/// Source of "now" for process logic.
///
/// Implementations must be driven by the host's logical time so that replays observe the
/// same timestamps the live execution recorded.
pub trait WorkflowClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

impl<C: WorkflowClock + ?Sized> WorkflowClock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Clock anchored to a wall-clock origin and advanced by the tokio runtime's instant.
///
/// Under a paused runtime (`start_paused`) time only moves when timers are due, so every
/// timestamp is reproducible.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    anchor: Instant,
}

impl TokioClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            anchor: Instant::now(),
        }
    }

    pub fn from_system_time() -> Self {
        Self::starting_at(Utc::now())
    }
}

impl WorkflowClock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.anchor);
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.origin + elapsed,
            Err(_) => self.origin,
        }
    }
}
