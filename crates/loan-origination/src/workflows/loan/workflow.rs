//! Control loop of the loan origination process.
//!
//! One task owns the [`LoanOriginationState`]; it is the only place state changes. The loop
//! recomputes the eligible signal channels after every transition and suspends on a single
//! biased `select!` over exactly those channels, settled activities, and the stage deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::activities::{
    ActivityRunner, AgreementRequest, CreditCheckRequest, FundingRequest, IdempotencyKey,
    LoanActivities, LoanActivityOptions,
};
use super::clock::WorkflowClock;
use super::domain::{ActivityKind, LoanApplication, LoanOriginationState, LoanStatus};
use super::history::WorkflowHistory;
use super::machine::{ActivityOutcome, Disposition, Transition};
use super::signals::{LoanEvent, SignalName};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Default bound on the document/appraisal/underwriting stage, measured from process start.
pub const STAGE_DEADLINE: Duration = Duration::from_secs(30 * SECONDS_PER_DAY);
/// Default bound on the wait for funding after approval.
pub const FUNDING_DEADLINE: Duration = Duration::from_secs(7 * SECONDS_PER_DAY);

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    pub stage_deadline: Duration,
    pub funding_deadline: Duration,
    pub activities: LoanActivityOptions,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            stage_deadline: STAGE_DEADLINE,
            funding_deadline: FUNDING_DEADLINE,
            activities: LoanActivityOptions::default(),
        }
    }
}

/// Final state plus the journal that reproduces it.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub state: LoanOriginationState,
    pub history: WorkflowHistory,
}

/// Sending half of the named signal channels, one FIFO per signal name.
#[derive(Debug, Clone)]
pub(crate) struct SignalOutbox {
    uploads: mpsc::UnboundedSender<LoanEvent>,
    verifications: mpsc::UnboundedSender<LoanEvent>,
    appraisals: mpsc::UnboundedSender<LoanEvent>,
    decisions: mpsc::UnboundedSender<LoanEvent>,
    fundings: mpsc::UnboundedSender<LoanEvent>,
}

impl SignalOutbox {
    /// Enqueues the event on its channel; hands it back if the process has finished.
    pub(crate) fn dispatch(&self, event: LoanEvent) -> Result<(), LoanEvent> {
        let channel = match event.signal_name() {
            SignalName::DocumentUploaded => &self.uploads,
            SignalName::DocumentVerified => &self.verifications,
            SignalName::AppraisalCompleted => &self.appraisals,
            SignalName::UnderwritingDecision => &self.decisions,
            SignalName::FundingCompleted => &self.fundings,
        };
        channel.send(event).map_err(|rejected| rejected.0)
    }

    /// True once the process has dropped its inbox.
    pub(crate) fn is_closed(&self) -> bool {
        self.fundings.is_closed()
    }
}

pub(crate) struct SignalInbox {
    uploads: mpsc::UnboundedReceiver<LoanEvent>,
    verifications: mpsc::UnboundedReceiver<LoanEvent>,
    appraisals: mpsc::UnboundedReceiver<LoanEvent>,
    decisions: mpsc::UnboundedReceiver<LoanEvent>,
    fundings: mpsc::UnboundedReceiver<LoanEvent>,
}

pub(crate) fn signal_channels() -> (SignalOutbox, SignalInbox) {
    let (uploads_tx, uploads) = mpsc::unbounded_channel();
    let (verifications_tx, verifications) = mpsc::unbounded_channel();
    let (appraisals_tx, appraisals) = mpsc::unbounded_channel();
    let (decisions_tx, decisions) = mpsc::unbounded_channel();
    let (fundings_tx, fundings) = mpsc::unbounded_channel();

    (
        SignalOutbox {
            uploads: uploads_tx,
            verifications: verifications_tx,
            appraisals: appraisals_tx,
            decisions: decisions_tx,
            fundings: fundings_tx,
        },
        SignalInbox {
            uploads,
            verifications,
            appraisals,
            decisions,
            fundings,
        },
    )
}

type Settlement = (ActivityKind, ActivityOutcome);

enum Wake {
    Signal(LoanEvent),
    Settled(Settlement),
    Deadline,
}

pub(crate) struct LoanOriginationWorkflow<A, C> {
    activities: Arc<A>,
    clock: C,
    settings: WorkflowSettings,
    inbox: SignalInbox,
    snapshots: watch::Sender<LoanOriginationState>,
    state: LoanOriginationState,
    history: WorkflowHistory,
}

impl<A, C> LoanOriginationWorkflow<A, C>
where
    A: LoanActivities,
    C: WorkflowClock,
{
    pub(crate) fn new(
        application: LoanApplication,
        activities: Arc<A>,
        clock: C,
        settings: WorkflowSettings,
        inbox: SignalInbox,
    ) -> (Self, watch::Receiver<LoanOriginationState>) {
        let state = LoanOriginationState::start(application.clone());
        let (snapshots, receiver) = watch::channel(state.clone());
        let workflow = Self {
            activities,
            clock,
            settings,
            inbox,
            snapshots,
            state,
            history: WorkflowHistory::new(application),
        };
        (workflow, receiver)
    }

    pub(crate) async fn run(mut self) -> WorkflowOutcome {
        let loan_id = self.state.loan_application.id.clone();
        info!(%loan_id, "starting loan origination workflow");

        let (settled_tx, mut settled_rx) = mpsc::unbounded_channel();
        self.dispatch(ActivityKind::GenerateAgreement, settled_tx.clone());
        self.dispatch(ActivityKind::CreditCheck, settled_tx);

        self.run_underwriting_stage(&mut settled_rx).await;

        if self.state.status == LoanStatus::Approved {
            self.await_funding(&mut settled_rx).await;
        }
        if self.state.status == LoanStatus::Funded {
            self.release_funds().await;
        }

        // Every dispatched activity settles before the process completes.
        while let Some(settlement) = settled_rx.recv().await {
            self.record_settlement(settlement);
        }

        info!(
            %loan_id,
            status = self.state.status.label(),
            "loan origination workflow completed"
        );
        WorkflowOutcome {
            state: self.state,
            history: self.history,
        }
    }

    async fn run_underwriting_stage(
        &mut self,
        settled: &mut mpsc::UnboundedReceiver<Settlement>,
    ) {
        let deadline = sleep(self.settings.stage_deadline);
        tokio::pin!(deadline);

        while !self.state.underwriting_complete() {
            let waits = self.state.wait_set();

            let wake = tokio::select! {
                biased;
                Some(event) = self.inbox.verifications.recv(), if waits.verification => {
                    Wake::Signal(event)
                }
                Some(event) = self.inbox.uploads.recv(), if waits.upload => Wake::Signal(event),
                Some(event) = self.inbox.appraisals.recv(), if waits.appraisal => {
                    Wake::Signal(event)
                }
                Some(event) = self.inbox.decisions.recv(), if waits.underwriting => {
                    Wake::Signal(event)
                }
                Some(settlement) = settled.recv() => Wake::Settled(settlement),
                () = &mut deadline => Wake::Deadline,
            };

            match wake {
                Wake::Signal(event) => {
                    self.transition(Transition::Signal(event));
                }
                Wake::Settled(settlement) => self.record_settlement(settlement),
                Wake::Deadline => {
                    error!("workflow timeout - completing with current state");
                    self.transition(Transition::StageDeadlineElapsed);
                }
            }
        }
    }

    async fn await_funding(&mut self, settled: &mut mpsc::UnboundedReceiver<Settlement>) {
        let deadline = sleep(self.settings.funding_deadline);
        tokio::pin!(deadline);

        while self.state.status == LoanStatus::Approved {
            let wake = tokio::select! {
                biased;
                Some(event) = self.inbox.fundings.recv() => Wake::Signal(event),
                Some(settlement) = settled.recv() => Wake::Settled(settlement),
                () = &mut deadline => Wake::Deadline,
            };

            match wake {
                Wake::Signal(event) => {
                    self.transition(Transition::Signal(event));
                }
                Wake::Settled(settlement) => self.record_settlement(settlement),
                Wake::Deadline => {
                    error!("timeout waiting for funding completion");
                    self.transition(Transition::FundingDeadlineElapsed);
                }
            }
        }
    }

    async fn release_funds(&mut self) {
        let kind = ActivityKind::ReleaseFunds;
        if self.transition(Transition::ActivityScheduled(kind)) != Disposition::Applied {
            return;
        }

        let runner = ActivityRunner::new(self.settings.activities.for_kind(kind).clone());
        let key = IdempotencyKey::for_step(&self.state.loan_application.workflow_id, kind);
        let outcome = execute_activity(
            self.activities.as_ref(),
            &runner,
            kind,
            key,
            &self.state.loan_application,
        )
        .await;
        self.record_settlement((kind, outcome));
    }

    /// Schedules an activity that runs out-of-line; its result comes back on `settled`.
    fn dispatch(&mut self, kind: ActivityKind, settled: mpsc::UnboundedSender<Settlement>) {
        if self.transition(Transition::ActivityScheduled(kind)) != Disposition::Applied {
            return;
        }

        let runner = ActivityRunner::new(self.settings.activities.for_kind(kind).clone());
        let key = IdempotencyKey::for_step(&self.state.loan_application.workflow_id, kind);
        let application = self.state.loan_application.clone();
        let activities = Arc::clone(&self.activities);

        tokio::spawn(async move {
            let outcome =
                execute_activity(activities.as_ref(), &runner, kind, key, &application).await;
            if settled.send((kind, outcome)).is_err() {
                warn!(activity = %kind, "process gone before activity settled");
            }
        });
    }

    fn record_settlement(&mut self, (kind, outcome): Settlement) {
        self.transition(Transition::ActivitySettled { kind, outcome });
    }

    fn transition(&mut self, transition: Transition) -> Disposition {
        let at = self.clock.now();
        let disposition = self.state.apply(&transition, at);

        match disposition {
            Disposition::Applied => {
                log_applied(&transition, &self.state);
                self.history.record(transition, at);
                self.snapshots.send_replace(self.state.clone());
            }
            Disposition::Ignored(reason) => {
                warn!(
                    reason = reason.label(),
                    transition = ?transition,
                    "transition ignored"
                );
            }
        }
        disposition
    }
}

async fn execute_activity<A: LoanActivities>(
    activities: &A,
    runner: &ActivityRunner,
    kind: ActivityKind,
    key: IdempotencyKey,
    application: &LoanApplication,
) -> ActivityOutcome {
    let loan_application_id = application.id.clone();
    let result = match kind {
        ActivityKind::GenerateAgreement => {
            let request = AgreementRequest {
                loan_application_id,
            };
            runner
                .run(kind, key, move |context| {
                    activities.generate_agreement(context, request.clone())
                })
                .await
                .map(|run| ActivityOutcome::Completed {
                    attempts: run.attempts,
                    reference: run.value.agreement_id,
                })
        }
        ActivityKind::CreditCheck => {
            let request = CreditCheckRequest {
                loan_application_id,
                borrower_name: application.borrower_name.clone(),
            };
            runner
                .run(kind, key, move |context| {
                    activities.check_credit(context, request.clone())
                })
                .await
                .map(|run| ActivityOutcome::Scored {
                    attempts: run.attempts,
                    score: run.value.credit_score,
                })
        }
        ActivityKind::ReleaseFunds => {
            let request = FundingRequest {
                loan_application_id,
            };
            runner
                .run(kind, key, move |context| {
                    activities.release_funds(context, request.clone())
                })
                .await
                .map(|run| ActivityOutcome::Completed {
                    attempts: run.attempts,
                    reference: run.value.transfer_id,
                })
        }
    };

    result.unwrap_or_else(|failure| {
        error!(
            activity = %kind,
            attempts = failure.attempts,
            error = %failure.error,
            "activity failed"
        );
        ActivityOutcome::Failed {
            attempts: failure.attempts,
            error: failure.error.to_string(),
        }
    })
}

fn log_applied(transition: &Transition, state: &LoanOriginationState) {
    match transition {
        Transition::Signal(LoanEvent::DocumentUploaded(signal)) => info!(
            document_id = %signal.document_id,
            document_type = %signal.document_type,
            count = state.documents.len(),
            "document uploaded"
        ),
        Transition::Signal(LoanEvent::DocumentVerified(signal)) => info!(
            document_id = %signal.document_id,
            status = ?signal.verification_status,
            pending = state.pending_documents(),
            rejected = state.rejected_documents(),
            "document verification recorded"
        ),
        Transition::Signal(LoanEvent::AppraisalCompleted(signal)) => info!(
            property_value = signal.property_value,
            appraiser_id = %signal.appraiser_id,
            "appraisal completed"
        ),
        Transition::Signal(LoanEvent::UnderwritingDecision(signal)) => info!(
            decision = signal.decision.label(),
            required_documents = state.required_documents,
            "underwriting decision received"
        ),
        Transition::Signal(LoanEvent::FundingCompleted(signal)) => info!(
            fund_manager_id = %signal.fund_manager_id,
            amount = signal.funding_amount,
            "funding completed"
        ),
        Transition::ActivityScheduled(kind) => debug!(activity = %kind, "activity scheduled"),
        Transition::ActivitySettled { kind, outcome } => {
            debug!(activity = %kind, outcome = ?outcome, "activity settled")
        }
        Transition::StageDeadlineElapsed | Transition::FundingDeadlineElapsed => info!(
            status = state.status.label(),
            "deadline elapsed"
        ),
    }
}
