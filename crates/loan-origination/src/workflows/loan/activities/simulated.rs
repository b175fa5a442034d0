use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;
use tracing::debug;

use super::{
    ActivityContext, ActivityError, AgreementReceipt, AgreementRequest, CreditCheckRequest,
    CreditCheckResult, CreditCheckStatus, FundingReceipt, FundingRequest, IdempotencyKey,
    LoanActivities,
};
use crate::workflows::loan::domain::ActivityKind;

const BUREAU_SEED: u64 = 0x5eed;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Credit bureau stand-in that is unavailable for the first `failures_before_success`
/// attempts of every request.
#[derive(Debug)]
pub struct SimulatedCreditBureau {
    failures_before_success: u32,
    rng: Mutex<StdRng>,
    scores: Mutex<HashMap<IdempotencyKey, u16>>,
}

impl SimulatedCreditBureau {
    pub fn new(failures_before_success: u32, seed: u64) -> Self {
        Self {
            failures_before_success,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            scores: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_failures(failures_before_success: u32) -> Self {
        Self::new(failures_before_success, BUREAU_SEED)
    }

    pub fn failures_before_success(&self) -> u32 {
        self.failures_before_success
    }

    pub fn score(&self, context: &ActivityContext) -> Result<CreditCheckResult, ActivityError> {
        if context.attempt <= self.failures_before_success {
            return Err(ActivityError::Unavailable(format!(
                "credit score API temporarily unavailable (attempt {}/{})",
                context.attempt,
                self.failures_before_success + 1
            )));
        }

        let mut scores = lock(&self.scores);
        let credit_score = *scores
            .entry(context.key.clone())
            .or_insert_with(|| lock(&self.rng).gen_range(0..=1000));

        Ok(CreditCheckResult {
            credit_score,
            status: CreditCheckStatus::Completed,
        })
    }
}

impl Default for SimulatedCreditBureau {
    fn default() -> Self {
        Self::with_failures(2)
    }
}

/// In-process activity worker used by the demo service and tests.
///
/// Agreements and transfers are keyed by idempotency key, so a retried or replayed request
/// returns the stored receipt instead of repeating the effect.
#[derive(Debug)]
pub struct SimulatedLoanActivities {
    latency: Duration,
    credit: SimulatedCreditBureau,
    agreements: Mutex<HashMap<IdempotencyKey, AgreementReceipt>>,
    transfers: Mutex<HashMap<IdempotencyKey, FundingReceipt>>,
    attempts: Mutex<HashMap<ActivityKind, u32>>,
    unavailable: Mutex<HashSet<ActivityKind>>,
}

impl SimulatedLoanActivities {
    pub fn new(latency: Duration, credit: SimulatedCreditBureau) -> Self {
        Self {
            latency,
            credit,
            agreements: Mutex::new(HashMap::new()),
            transfers: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            unavailable: Mutex::new(HashSet::new()),
        }
    }

    /// Makes every attempt of `kind` fail with a retryable error.
    pub fn take_offline(&self, kind: ActivityKind) {
        lock(&self.unavailable).insert(kind);
    }

    /// Total attempts observed for `kind`, retries included.
    pub fn attempts(&self, kind: ActivityKind) -> u32 {
        lock(&self.attempts).get(&kind).copied().unwrap_or(0)
    }

    pub fn agreements_issued(&self) -> usize {
        lock(&self.agreements).len()
    }

    pub fn transfers_made(&self) -> usize {
        lock(&self.transfers).len()
    }

    async fn begin_attempt(
        &self,
        kind: ActivityKind,
        context: &ActivityContext,
    ) -> Result<(), ActivityError> {
        *lock(&self.attempts).entry(kind).or_insert(0) += 1;
        debug!(
            activity = %kind,
            key = %context.key,
            attempt = context.attempt,
            "activity attempt started"
        );
        sleep(self.latency).await;

        if lock(&self.unavailable).contains(&kind) {
            return Err(ActivityError::Unavailable(format!("{kind} backend offline")));
        }
        Ok(())
    }
}

impl Default for SimulatedLoanActivities {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), SimulatedCreditBureau::default())
    }
}

#[async_trait]
impl LoanActivities for SimulatedLoanActivities {
    async fn generate_agreement(
        &self,
        context: ActivityContext,
        request: AgreementRequest,
    ) -> Result<AgreementReceipt, ActivityError> {
        self.begin_attempt(ActivityKind::GenerateAgreement, &context).await?;

        let receipt = lock(&self.agreements)
            .entry(context.key)
            .or_insert_with(|| AgreementReceipt {
                agreement_id: format!("agreement-{}", request.loan_application_id),
            })
            .clone();
        Ok(receipt)
    }

    async fn release_funds(
        &self,
        context: ActivityContext,
        request: FundingRequest,
    ) -> Result<FundingReceipt, ActivityError> {
        self.begin_attempt(ActivityKind::ReleaseFunds, &context).await?;

        let receipt = lock(&self.transfers)
            .entry(context.key)
            .or_insert_with(|| FundingReceipt {
                transfer_id: format!("transfer-{}", request.loan_application_id),
            })
            .clone();
        Ok(receipt)
    }

    async fn check_credit(
        &self,
        context: ActivityContext,
        request: CreditCheckRequest,
    ) -> Result<CreditCheckResult, ActivityError> {
        self.begin_attempt(ActivityKind::CreditCheck, &context).await?;
        debug!(borrower = %request.borrower_name, "scoring borrower");
        self.credit.score(&context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::loan::domain::LoanApplicationId;

    fn context(attempt: u32) -> ActivityContext {
        ActivityContext {
            key: IdempotencyKey("loan-origination-42/credit_check".to_string()),
            attempt,
        }
    }

    #[test]
    fn bureau_fails_until_configured_attempt() {
        let bureau = SimulatedCreditBureau::new(2, 7);

        let first = bureau.score(&context(1)).expect_err("first attempt fails");
        assert_eq!(
            first.to_string(),
            "credit score API temporarily unavailable (attempt 1/3)"
        );
        assert!(bureau.score(&context(2)).is_err());

        let result = bureau.score(&context(3)).expect("third attempt succeeds");
        assert!(result.credit_score <= 1000);
        assert_eq!(result.status, CreditCheckStatus::Completed);
    }

    #[test]
    fn bureau_returns_stable_score_per_key() {
        let bureau = SimulatedCreditBureau::new(0, 11);
        let first = bureau.score(&context(1)).expect("score");
        let repeat = bureau.score(&context(2)).expect("score");
        assert_eq!(first, repeat);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_agreement_key_issues_one_agreement() {
        let activities = SimulatedLoanActivities::default();
        let request = AgreementRequest {
            loan_application_id: LoanApplicationId("42".to_string()),
        };
        let context = ActivityContext {
            key: IdempotencyKey("loan-origination-42/generate_agreement".to_string()),
            attempt: 1,
        };

        let first = activities
            .generate_agreement(context.clone(), request.clone())
            .await
            .expect("agreement generated");
        let second = activities
            .generate_agreement(ActivityContext { attempt: 2, ..context }, request)
            .await
            .expect("agreement replayed");

        assert_eq!(first, second);
        assert_eq!(activities.agreements_issued(), 1);
        assert_eq!(activities.attempts(ActivityKind::GenerateAgreement), 2);
    }
}
