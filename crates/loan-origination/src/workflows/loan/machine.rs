//! Pure transition function for the loan origination process.
//!
//! Every mutation of [`LoanOriginationState`] goes through [`LoanOriginationState::apply`],
//! which takes the timestamp from the caller instead of reading a clock. The live control loop
//! and journal replay therefore produce identical state for identical input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    ActivityKind, ActivityRecord, ActivityStatus, Appraisal, AppraisalStatus, Decision, Document,
    FundingRecord, LoanApplication, LoanOriginationState, LoanStatus, NextStep,
    UnderwritingDecision, VerificationStatus, INITIAL_REQUIRED_DOCUMENTS,
};
use super::signals::{
    AppraisalCompleted, DocumentUploaded, DocumentVerified, FundingCompleted, LoanEvent,
    SignalName, UnderwritingDecided,
};

/// Signal channels the control loop listens on for the current state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitSet {
    pub verification: bool,
    pub upload: bool,
    pub appraisal: bool,
    pub underwriting: bool,
}

impl WaitSet {
    /// True when only the stage deadline can wake the loop.
    pub fn is_empty(&self) -> bool {
        !(self.verification || self.upload || self.appraisal || self.underwriting)
    }
}

/// Settled result of an out-of-line activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActivityOutcome {
    Completed { attempts: u32, reference: String },
    Scored { attempts: u32, score: u16 },
    Failed { attempts: u32, error: String },
}

/// Everything that can change process state, in journal form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Transition {
    Signal(LoanEvent),
    ActivityScheduled(ActivityKind),
    ActivitySettled {
        kind: ActivityKind,
        outcome: ActivityOutcome,
    },
    StageDeadlineElapsed,
    FundingDeadlineElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    Ignored(IgnoreReason),
}

/// Why a transition left the state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    DuplicateDocument,
    UnknownDocument,
    AlreadyVerified,
    DocumentsNotExpected,
    AppraisalRecorded,
    AppraisalNotReady,
    UnderwritingNotReady,
    FundingNotExpected,
    ActivityAlreadyScheduled,
    ActivityNotScheduled,
    StageClosed,
}

impl IgnoreReason {
    pub const fn label(self) -> &'static str {
        match self {
            Self::DuplicateDocument => "document already uploaded",
            Self::UnknownDocument => "no document with that id",
            Self::AlreadyVerified => "document verification already settled",
            Self::DocumentsNotExpected => "no further documents required",
            Self::AppraisalRecorded => "appraisal already recorded",
            Self::AppraisalNotReady => "documents still outstanding",
            Self::UnderwritingNotReady => "underwriting preconditions not met",
            Self::FundingNotExpected => "process is not awaiting funding",
            Self::ActivityAlreadyScheduled => "activity already scheduled",
            Self::ActivityNotScheduled => "activity not awaiting a result",
            Self::StageClosed => "stage already closed",
        }
    }
}

impl LoanOriginationState {
    /// Initial state of a freshly started process.
    pub fn start(mut application: LoanApplication) -> Self {
        application.status = LoanStatus::Processing;
        let mut state = Self {
            loan_application: application,
            documents: Vec::new(),
            appraisal: None,
            underwriting_decision: None,
            information_requests: Vec::new(),
            required_documents: INITIAL_REQUIRED_DOCUMENTS,
            funding: None,
            credit_score: None,
            activities: Vec::new(),
            status: LoanStatus::Processing,
            next_step: NextStep::Complete,
        };
        state.next_step = state.derive_next_step();
        state
    }

    /// Signal channels that are meaningful right now, evaluated as a priority cascade.
    pub fn wait_set(&self) -> WaitSet {
        if self.status != LoanStatus::Processing {
            return WaitSet::default();
        }

        let verification = self.total_documents() > 0 && self.pending_documents() > 0;
        let upload = self.net_documents() < self.required_documents;

        if verification || upload {
            WaitSet {
                verification,
                upload,
                ..WaitSet::default()
            }
        } else if self.appraisal.is_none() {
            WaitSet {
                appraisal: true,
                ..WaitSet::default()
            }
        } else {
            // Net documents at the requirement imply the total is too, so an open stage
            // always has a listenable channel.
            WaitSet {
                underwriting: true,
                ..WaitSet::default()
            }
        }
    }

    /// Whether a signal delivered now can still be consumed by the process.
    pub fn accepts(&self, signal: SignalName) -> bool {
        match self.status {
            LoanStatus::Pending | LoanStatus::Processing => true,
            LoanStatus::Approved => signal == SignalName::FundingCompleted,
            _ => false,
        }
    }

    pub fn underwriting_complete(&self) -> bool {
        self.status != LoanStatus::Processing
    }

    pub fn apply(&mut self, transition: &Transition, at: DateTime<Utc>) -> Disposition {
        let disposition = match transition {
            Transition::Signal(event) => self.apply_event(event, at),
            Transition::ActivityScheduled(kind) => self.schedule_activity(*kind, at),
            Transition::ActivitySettled { kind, outcome } => {
                self.settle_activity(*kind, outcome, at)
            }
            Transition::StageDeadlineElapsed => self.close_stage(),
            Transition::FundingDeadlineElapsed => self.expire_funding(),
        };

        if disposition == Disposition::Applied {
            self.loan_application.updated_at = at;
            self.next_step = self.derive_next_step();
        }
        disposition
    }

    fn apply_event(&mut self, event: &LoanEvent, at: DateTime<Utc>) -> Disposition {
        match event {
            LoanEvent::DocumentUploaded(signal) => self.record_upload(signal, at),
            LoanEvent::DocumentVerified(signal) => self.record_verification(signal, at),
            LoanEvent::AppraisalCompleted(signal) => self.record_appraisal(signal, at),
            LoanEvent::UnderwritingDecision(signal) => self.record_decision(signal, at),
            LoanEvent::FundingCompleted(signal) => self.record_funding(signal, at),
        }
    }

    fn record_upload(&mut self, signal: &DocumentUploaded, at: DateTime<Utc>) -> Disposition {
        if self.document(&signal.document_id).is_some() {
            return Disposition::Ignored(IgnoreReason::DuplicateDocument);
        }
        if !self.wait_set().upload {
            return Disposition::Ignored(IgnoreReason::DocumentsNotExpected);
        }

        let file_name = signal
            .file_name
            .clone()
            .unwrap_or_else(|| format!("{}_document.pdf", signal.document_type));
        let file_path = signal
            .file_path
            .clone()
            .unwrap_or_else(|| format!("/uploads/{}", signal.document_id));

        self.documents.push(Document {
            id: signal.document_id.clone(),
            document_type: signal.document_type.clone(),
            file_name,
            file_path,
            verification_status: VerificationStatus::Pending,
            verification_details: None,
            uploaded_at: at,
            verified_at: None,
        });
        Disposition::Applied
    }

    fn record_verification(&mut self, signal: &DocumentVerified, at: DateTime<Utc>) -> Disposition {
        if self.status != LoanStatus::Processing {
            return Disposition::Ignored(IgnoreReason::StageClosed);
        }
        let Some(document) = self
            .documents
            .iter_mut()
            .find(|doc| doc.id == signal.document_id)
        else {
            return Disposition::Ignored(IgnoreReason::UnknownDocument);
        };

        // First writer wins: a settled document never changes again.
        if !document.is_pending() {
            return Disposition::Ignored(IgnoreReason::AlreadyVerified);
        }

        document.verification_status = signal.verification_status.into();
        document.verification_details = signal.verification_details.clone();
        document.verified_at = Some(at);
        Disposition::Applied
    }

    fn record_appraisal(&mut self, signal: &AppraisalCompleted, at: DateTime<Utc>) -> Disposition {
        if self.appraisal.is_some() {
            return Disposition::Ignored(IgnoreReason::AppraisalRecorded);
        }
        if self.status != LoanStatus::Processing {
            return Disposition::Ignored(IgnoreReason::StageClosed);
        }
        if !self.wait_set().appraisal {
            return Disposition::Ignored(IgnoreReason::AppraisalNotReady);
        }

        self.appraisal = Some(Appraisal {
            id: format!("appraisal-{}", self.loan_application.id),
            property_value: signal.property_value,
            appraisal_notes: signal.appraisal_notes.clone(),
            appraiser_id: signal.appraiser_id.clone(),
            status: AppraisalStatus::Completed,
            created_at: at,
            completed_at: Some(at),
        });
        Disposition::Applied
    }

    fn record_decision(&mut self, signal: &UnderwritingDecided, at: DateTime<Utc>) -> Disposition {
        if !self.wait_set().underwriting {
            return Disposition::Ignored(IgnoreReason::UnderwritingNotReady);
        }

        let decision = UnderwritingDecision {
            id: format!("decision-{}", self.loan_application.id),
            decision: signal.decision,
            comments: signal.comments.clone(),
            underwriter_id: signal.underwriter_id.clone(),
            decision_date: at,
        };

        if !decision.decision.is_terminal() {
            self.information_requests.push(decision);
            self.required_documents += 1;
            return Disposition::Applied;
        }

        let status = match decision.decision {
            Decision::Approved => LoanStatus::Approved,
            _ => LoanStatus::Rejected,
        };
        self.underwriting_decision = Some(decision);
        self.set_status(status);
        Disposition::Applied
    }

    fn record_funding(&mut self, signal: &FundingCompleted, at: DateTime<Utc>) -> Disposition {
        if self.status != LoanStatus::Approved || self.funding.is_some() {
            return Disposition::Ignored(IgnoreReason::FundingNotExpected);
        }

        self.funding = Some(FundingRecord {
            fund_manager_id: signal.fund_manager_id.clone(),
            funding_amount: signal.funding_amount,
            funding_notes: signal.funding_notes.clone(),
            funded_at: at,
        });
        self.set_status(LoanStatus::Funded);
        Disposition::Applied
    }

    fn schedule_activity(&mut self, kind: ActivityKind, at: DateTime<Utc>) -> Disposition {
        if self.activity(kind).is_some() {
            return Disposition::Ignored(IgnoreReason::ActivityAlreadyScheduled);
        }
        if kind == ActivityKind::ReleaseFunds && self.status != LoanStatus::Funded {
            return Disposition::Ignored(IgnoreReason::FundingNotExpected);
        }

        self.activities.push(ActivityRecord {
            kind,
            status: ActivityStatus::Scheduled,
            attempts: 0,
            reference: None,
            error: None,
            scheduled_at: at,
            settled_at: None,
        });
        Disposition::Applied
    }

    fn settle_activity(
        &mut self,
        kind: ActivityKind,
        outcome: &ActivityOutcome,
        at: DateTime<Utc>,
    ) -> Disposition {
        let Some(record) = self
            .activities
            .iter_mut()
            .find(|record| record.kind == kind && record.status == ActivityStatus::Scheduled)
        else {
            return Disposition::Ignored(IgnoreReason::ActivityNotScheduled);
        };

        record.settled_at = Some(at);
        match outcome {
            ActivityOutcome::Completed {
                attempts,
                reference,
            } => {
                record.status = ActivityStatus::Completed;
                record.attempts = *attempts;
                record.reference = Some(reference.clone());
            }
            ActivityOutcome::Scored { attempts, score } => {
                record.status = ActivityStatus::Completed;
                record.attempts = *attempts;
                record.reference = Some(format!("score:{score}"));
                self.credit_score = Some(*score);
            }
            ActivityOutcome::Failed { attempts, error } => {
                record.status = ActivityStatus::Failed;
                record.attempts = *attempts;
                record.error = Some(error.clone());
            }
        }
        Disposition::Applied
    }

    fn close_stage(&mut self) -> Disposition {
        if self.status != LoanStatus::Processing {
            return Disposition::Ignored(IgnoreReason::StageClosed);
        }
        // The loop exits on the first terminal decision, so an open stage has none.
        self.set_status(LoanStatus::Incomplete);
        Disposition::Applied
    }

    fn expire_funding(&mut self) -> Disposition {
        if self.status != LoanStatus::Approved {
            return Disposition::Ignored(IgnoreReason::FundingNotExpected);
        }
        self.set_status(LoanStatus::FundingTimeout);
        Disposition::Applied
    }

    fn set_status(&mut self, status: LoanStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.loan_application.status = status;
    }

    fn derive_next_step(&self) -> NextStep {
        match self.status {
            LoanStatus::Pending | LoanStatus::Processing => {
                let waits = self.wait_set();
                if waits.upload {
                    NextStep::AwaitingDocuments {
                        remaining: self.required_documents - self.net_documents(),
                    }
                } else if waits.verification {
                    NextStep::AwaitingVerification
                } else if waits.appraisal {
                    NextStep::AwaitingAppraisal
                } else {
                    NextStep::AwaitingUnderwriting
                }
            }
            LoanStatus::Approved => NextStep::AwaitingFunding,
            LoanStatus::Funded => match self.activity(ActivityKind::ReleaseFunds) {
                Some(record) if record.status != ActivityStatus::Scheduled => NextStep::Complete,
                _ => NextStep::ReleasingFunds,
            },
            LoanStatus::Rejected | LoanStatus::Incomplete | LoanStatus::FundingTimeout => {
                NextStep::Complete
            }
        }
    }
}
