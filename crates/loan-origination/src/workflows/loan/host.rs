//! In-process host for loan origination executions.
//!
//! The host starts one task per application, routes named signals into its FIFO channels,
//! and answers queries from the latest published snapshot without touching the running loop.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::activities::LoanActivities;
use super::clock::{TokioClock, WorkflowClock};
use super::domain::{LoanApplication, LoanApplicationId, LoanOriginationState};
use super::machine::IgnoreReason;
use super::signals::{SignalName, SignalRouter};
use super::workflow::{
    signal_channels, LoanOriginationWorkflow, SignalOutbox, WorkflowOutcome, WorkflowSettings,
};

/// Name of the query returning the full process state.
pub const LOAN_APPLICATION_QUERY: &str = "getLoanApplication";

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("no loan origination process for application {0}")]
    NotFound(LoanApplicationId),
    #[error("a loan origination process for application {0} already exists")]
    AlreadyStarted(LoanApplicationId),
    #[error("the loan origination process for application {0} has completed")]
    Completed(LoanApplicationId),
    #[error("unknown query '{0}'")]
    UnknownQuery(String),
    #[error("the loan origination process for application {id} aborted: {reason}")]
    Aborted {
        id: LoanApplicationId,
        reason: String,
    },
}

/// Acknowledgement for a delivered signal.
///
/// `Accepted` means the signal is queued; it is applied once the process listens on its
/// channel. Signals for a stage that has already closed are `Dropped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignalReceipt {
    Accepted { signal: SignalName },
    Dropped { reason: String },
}

impl SignalReceipt {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

struct Execution {
    signals: SignalOutbox,
    snapshots: watch::Receiver<LoanOriginationState>,
    started: u64,
}

pub struct LoanOriginationHost<A, C = TokioClock> {
    activities: Arc<A>,
    clock: C,
    settings: WorkflowSettings,
    executions: RwLock<HashMap<LoanApplicationId, Execution>>,
}

impl<A: LoanActivities> LoanOriginationHost<A, TokioClock> {
    pub fn new(activities: Arc<A>, settings: WorkflowSettings) -> Self {
        Self::with_clock(activities, TokioClock::from_system_time(), settings)
    }
}

impl<A, C> LoanOriginationHost<A, C>
where
    A: LoanActivities,
    C: WorkflowClock + Clone + 'static,
{
    pub fn with_clock(activities: Arc<A>, clock: C, settings: WorkflowSettings) -> Self {
        Self {
            activities,
            clock,
            settings,
            executions: RwLock::new(HashMap::new()),
        }
    }

    pub fn activities(&self) -> &Arc<A> {
        &self.activities
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Spawns the process for `application`. Must be called inside a tokio runtime.
    pub fn start(&self, application: LoanApplication) -> Result<ExecutionHandle, HostError> {
        let id = application.id.clone();
        let mut executions = self
            .executions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if executions.contains_key(&id) {
            return Err(HostError::AlreadyStarted(id));
        }

        let (signals, inbox) = signal_channels();
        let (workflow, snapshots) = LoanOriginationWorkflow::new(
            application,
            Arc::clone(&self.activities),
            self.clock.clone(),
            self.settings.clone(),
            inbox,
        );
        let task = tokio::spawn(workflow.run());

        let started = executions.len() as u64;
        executions.insert(
            id.clone(),
            Execution {
                signals: signals.clone(),
                snapshots: snapshots.clone(),
                started,
            },
        );
        info!(loan_id = %id, "loan origination process started");

        Ok(ExecutionHandle {
            id,
            signals,
            snapshots,
            task,
        })
    }

    pub fn signal(
        &self,
        id: &LoanApplicationId,
        name: &str,
        payload: Value,
    ) -> Result<SignalReceipt, HostError> {
        let (signals, snapshots) = self.with_execution(id, |execution| {
            (execution.signals.clone(), execution.snapshots.clone())
        })?;
        deliver(id, &signals, &snapshots, name, payload)
    }

    pub fn query(
        &self,
        id: &LoanApplicationId,
        query: &str,
    ) -> Result<LoanOriginationState, HostError> {
        if query != LOAN_APPLICATION_QUERY {
            return Err(HostError::UnknownQuery(query.to_string()));
        }
        self.with_execution(id, |execution| execution.snapshots.borrow().clone())
    }

    /// Current state of every known execution, oldest first.
    pub fn list(&self) -> Vec<LoanOriginationState> {
        let executions = self
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(u64, LoanOriginationState)> = executions
            .values()
            .map(|execution| (execution.started, execution.snapshots.borrow().clone()))
            .collect();
        entries.sort_by_key(|(started, _)| *started);
        entries.into_iter().map(|(_, state)| state).collect()
    }

    fn with_execution<T>(
        &self,
        id: &LoanApplicationId,
        read: impl FnOnce(&Execution) -> T,
    ) -> Result<T, HostError> {
        let executions = self
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        executions
            .get(id)
            .map(read)
            .ok_or_else(|| HostError::NotFound(id.clone()))
    }
}

/// Caller-side handle to one running execution.
pub struct ExecutionHandle {
    id: LoanApplicationId,
    signals: SignalOutbox,
    snapshots: watch::Receiver<LoanOriginationState>,
    task: JoinHandle<WorkflowOutcome>,
}

impl ExecutionHandle {
    pub fn id(&self) -> &LoanApplicationId {
        &self.id
    }

    pub fn signal(&self, name: &str, payload: Value) -> Result<SignalReceipt, HostError> {
        deliver(&self.id, &self.signals, &self.snapshots, name, payload)
    }

    pub fn query(&self) -> LoanOriginationState {
        self.snapshots.borrow().clone()
    }

    /// Resolves with the first published state matching `predicate`, or with the final state
    /// if the process completes first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> LoanOriginationState
    where
        F: FnMut(&LoanOriginationState) -> bool,
    {
        loop {
            {
                let current = self.snapshots.borrow_and_update();
                if predicate(&current) {
                    return current.clone();
                }
            }
            if self.snapshots.changed().await.is_err() {
                return self.snapshots.borrow().clone();
            }
        }
    }

    pub async fn completion(self) -> Result<WorkflowOutcome, HostError> {
        self.task.await.map_err(|err| HostError::Aborted {
            id: self.id.clone(),
            reason: err.to_string(),
        })
    }
}

fn deliver(
    id: &LoanApplicationId,
    signals: &SignalOutbox,
    snapshots: &watch::Receiver<LoanOriginationState>,
    name: &str,
    payload: Value,
) -> Result<SignalReceipt, HostError> {
    if signals.is_closed() {
        return Err(HostError::Completed(id.clone()));
    }
    let event = match SignalRouter::route(name, payload) {
        Ok(event) => event,
        Err(err) => {
            warn!(loan_id = %id, signal = name, error = %err, "signal dropped");
            return Ok(SignalReceipt::Dropped {
                reason: err.to_string(),
            });
        }
    };

    let signal = event.signal_name();
    if !snapshots.borrow().accepts(signal) {
        let reason = IgnoreReason::StageClosed.label();
        warn!(loan_id = %id, %signal, reason, "signal dropped");
        return Ok(SignalReceipt::Dropped {
            reason: reason.to_string(),
        });
    }

    signals
        .dispatch(event)
        .map_err(|_| HostError::Completed(id.clone()))?;
    debug!(loan_id = %id, %signal, "signal enqueued");
    Ok(SignalReceipt::Accepted { signal })
}
