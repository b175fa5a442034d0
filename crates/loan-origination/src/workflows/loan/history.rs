use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{LoanApplication, LoanOriginationState};
use super::machine::{Disposition, Transition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub transition: Transition,
}

/// Ordered journal of the transitions one execution applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowHistory {
    pub input: LoanApplication,
    pub events: Vec<HistoryEvent>,
}

impl WorkflowHistory {
    pub fn new(input: LoanApplication) -> Self {
        Self {
            input,
            events: Vec::new(),
        }
    }

    pub fn record(&mut self, transition: Transition, recorded_at: DateTime<Utc>) {
        let sequence = self.events.len() as u64 + 1;
        self.events.push(HistoryEvent {
            sequence,
            recorded_at,
            transition,
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Rebuilds process state by folding the journal through the transition function.
    pub fn replay(&self) -> LoanOriginationState {
        let mut state = LoanOriginationState::start(self.input.clone());
        for event in &self.events {
            if let Disposition::Ignored(reason) = state.apply(&event.transition, event.recorded_at)
            {
                tracing::warn!(
                    sequence = event.sequence,
                    reason = reason.label(),
                    "journal entry did not apply during replay"
                );
            }
        }
        state
    }
}
