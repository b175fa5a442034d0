//! Durable loan origination process.
//!
//! A single task owns each application's [`LoanOriginationState`] and advances it through
//! document collection, verification, appraisal, underwriting, and funding. Callers interact
//! only through named signals and the `getLoanApplication` query exposed by
//! [`LoanOriginationHost`].

pub mod activities;
pub mod clock;
pub mod domain;
pub mod history;
pub mod host;
pub mod machine;
pub mod router;
pub mod signals;
mod workflow;

#[cfg(test)]
mod tests;

pub use activities::{
    ActivityContext, ActivityError, ActivityOptions, ActivityRunner, IdempotencyKey,
    LoanActivities, LoanActivityOptions, RetryPolicy, SimulatedCreditBureau,
    SimulatedLoanActivities,
};
pub use clock::{TokioClock, WorkflowClock};
pub use domain::{
    ActivityKind, ActivityRecord, ActivityStatus, Appraisal, BorrowerContact, Decision, Document,
    FundingRecord, LoanApplication, LoanApplicationId, LoanOriginationState, LoanStatus,
    NextStep, UnderwritingDecision, VerificationStatus,
};
pub use history::{HistoryEvent, WorkflowHistory};
pub use host::{
    ExecutionHandle, HostError, LoanOriginationHost, SignalReceipt, LOAN_APPLICATION_QUERY,
};
pub use machine::{ActivityOutcome, Disposition, IgnoreReason, Transition, WaitSet};
pub use router::{loan_router, LoanIntake};
pub use signals::{LoanEvent, RouteError, SignalName, SignalRouter};
pub use workflow::{WorkflowOutcome, WorkflowSettings, FUNDING_DEADLINE, STAGE_DEADLINE};
