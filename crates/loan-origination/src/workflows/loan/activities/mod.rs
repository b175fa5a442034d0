//! Side-effect activities dispatched by the loan process.
//!
//! Activities run out-of-line from the control loop and may be retried, so every
//! implementation must treat the [`IdempotencyKey`] as the identity of the external effect:
//! repeating a key must never produce a second agreement, transfer, or bureau charge.

mod retry;
mod simulated;

pub use retry::{
    ActivityFailure, ActivityOptions, ActivityRun, ActivityRunner, LoanActivityOptions,
    RetryPolicy,
};
pub use simulated::{SimulatedCreditBureau, SimulatedLoanActivities};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::domain::{ActivityKind, LoanApplicationId};

/// Stable identity of one logical activity step, shared by all of its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn for_step(workflow_id: &str, activity: ActivityKind) -> Self {
        Self(format!("{workflow_id}/{}", activity.name()))
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-attempt information handed to an activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityContext {
    pub key: IdempotencyKey,
    /// 1-based attempt number.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementRequest {
    pub loan_application_id: LoanApplicationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementReceipt {
    pub agreement_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRequest {
    pub loan_application_id: LoanApplicationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingReceipt {
    pub transfer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCheckRequest {
    pub loan_application_id: LoanApplicationId,
    pub borrower_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditCheckStatus {
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCheckResult {
    /// Bureau score in `0..=1000`.
    pub credit_score: u16,
    pub status: CreditCheckStatus,
}

/// Failure of a single activity attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivityError {
    #[error("{0}")]
    Unavailable(String),
    #[error("activity did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ActivityError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Worker-side implementations of the loan activities.
#[async_trait]
pub trait LoanActivities: Send + Sync + 'static {
    async fn generate_agreement(
        &self,
        context: ActivityContext,
        request: AgreementRequest,
    ) -> Result<AgreementReceipt, ActivityError>;

    async fn release_funds(
        &self,
        context: ActivityContext,
        request: FundingRequest,
    ) -> Result<FundingReceipt, ActivityError>;

    async fn check_credit(
        &self,
        context: ActivityContext,
        request: CreditCheckRequest,
    ) -> Result<CreditCheckResult, ActivityError>;
}
