use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Number of accepted documents underwriting needs before any information request.
pub const INITIAL_REQUIRED_DOCUMENTS: u32 = 2;

/// Identifier wrapper for loan applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoanApplicationId(pub String);

impl LoanApplicationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Execution id of the process hosting this application.
    pub fn workflow_id(&self) -> String {
        format!("loan-origination-{}", self.0)
    }
}

impl fmt::Display for LoanApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Processing,
    Approved,
    Rejected,
    Incomplete,
    Funded,
    FundingTimeout,
}

impl LoanStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Incomplete => "incomplete",
            Self::Funded => "funded",
            Self::FundingTimeout => "funding_timeout",
        }
    }

    /// Statuses that end the process; once reached they are never overwritten.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Incomplete | Self::Funded | Self::FundingTimeout
        )
    }
}

/// Borrower contact details captured at intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowerContact {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// The application a process is started for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub id: LoanApplicationId,
    pub borrower_name: String,
    pub borrower_email: String,
    pub borrower_phone: String,
    pub loan_amount: f64,
    pub loan_purpose: String,
    pub status: LoanStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub workflow_id: String,
}

impl LoanApplication {
    pub fn new(
        id: LoanApplicationId,
        borrower: BorrowerContact,
        loan_amount: f64,
        loan_purpose: impl Into<String>,
        created_by: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let workflow_id = id.workflow_id();
        Self {
            id,
            borrower_name: borrower.name,
            borrower_email: borrower.email,
            borrower_phone: borrower.phone,
            loan_amount,
            loan_purpose: loan_purpose.into(),
            status: LoanStatus::Pending,
            created_by: created_by.into(),
            created_at,
            updated_at: created_at,
            workflow_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub document_type: String,
    pub file_name: String,
    pub file_path: String,
    pub verification_status: VerificationStatus,
    pub verification_details: Option<Map<String, Value>>,
    pub uploaded_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn is_pending(&self) -> bool {
        self.verification_status == VerificationStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppraisalStatus {
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appraisal {
    pub id: String,
    pub property_value: f64,
    pub appraisal_notes: String,
    pub appraiser_id: String,
    pub status: AppraisalStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
    NeedsMoreInfo,
}

impl Decision {
    /// `needs_more_info` keeps the underwriting stage open.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::NeedsMoreInfo)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NeedsMoreInfo => "needs_more_info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderwritingDecision {
    pub id: String,
    pub decision: Decision,
    pub comments: String,
    pub underwriter_id: String,
    pub decision_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRecord {
    pub fund_manager_id: String,
    pub funding_amount: f64,
    pub funding_notes: String,
    pub funded_at: DateTime<Utc>,
}

/// Side-effect activities the process dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    GenerateAgreement,
    CreditCheck,
    ReleaseFunds,
}

impl ActivityKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::GenerateAgreement => "generate_agreement",
            Self::CreditCheck => "credit_check",
            Self::ReleaseFunds => "release_funds",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Scheduled,
    Completed,
    Failed,
}

/// Audit entry for one dispatched activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub kind: ActivityKind,
    pub status: ActivityStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Human-readable descriptor of what the process waits on next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum NextStep {
    AwaitingDocuments { remaining: u32 },
    AwaitingVerification,
    AwaitingAppraisal,
    AwaitingUnderwriting,
    AwaitingFunding,
    ReleasingFunds,
    Complete,
}

impl fmt::Display for NextStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingDocuments { remaining } => {
                write!(f, "Waiting for customer documents: {remaining} more required")
            }
            Self::AwaitingVerification => f.write_str("Waiting for document verification"),
            Self::AwaitingAppraisal => f.write_str("Waiting for appraisal"),
            Self::AwaitingUnderwriting => f.write_str("Waiting for underwriting decision"),
            Self::AwaitingFunding => f.write_str("Waiting for funding"),
            Self::ReleasingFunds => f.write_str("Releasing funds"),
            Self::Complete => f.write_str("n/a"),
        }
    }
}

impl From<NextStep> for String {
    fn from(value: NextStep) -> Self {
        value.to_string()
    }
}

/// Queryable aggregate of one loan origination process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanOriginationState {
    pub loan_application: LoanApplication,
    pub documents: Vec<Document>,
    pub appraisal: Option<Appraisal>,
    pub underwriting_decision: Option<UnderwritingDecision>,
    pub information_requests: Vec<UnderwritingDecision>,
    pub required_documents: u32,
    pub funding: Option<FundingRecord>,
    pub credit_score: Option<u16>,
    pub activities: Vec<ActivityRecord>,
    pub status: LoanStatus,
    pub next_step: NextStep,
}

impl LoanOriginationState {
    pub fn document(&self, document_id: &str) -> Option<&Document> {
        self.documents.iter().find(|doc| doc.id == document_id)
    }

    pub fn activity(&self, kind: ActivityKind) -> Option<&ActivityRecord> {
        self.activities.iter().find(|record| record.kind == kind)
    }

    pub fn rejected_documents(&self) -> u32 {
        self.count_documents(VerificationStatus::Rejected)
    }

    pub fn pending_documents(&self) -> u32 {
        self.count_documents(VerificationStatus::Pending)
    }

    /// Documents that still count towards the requirement.
    pub fn net_documents(&self) -> u32 {
        self.total_documents() - self.rejected_documents()
    }

    pub fn total_documents(&self) -> u32 {
        self.documents.len() as u32
    }

    fn count_documents(&self, status: VerificationStatus) -> u32 {
        self.documents
            .iter()
            .filter(|doc| doc.verification_status == status)
            .count() as u32
    }
}
