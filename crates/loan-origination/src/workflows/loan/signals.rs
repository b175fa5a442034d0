//! Inbound signal routing.
//!
//! Signals arrive as a name plus a JSON payload. The router turns them into typed
//! [`LoanEvent`]s or explains why the delivery was dropped; it never touches process state.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::domain::{Decision, VerificationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalName {
    DocumentUploaded,
    DocumentVerified,
    AppraisalCompleted,
    UnderwritingDecision,
    FundingCompleted,
}

impl SignalName {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DocumentUploaded => "document-uploaded",
            Self::DocumentVerified => "document-verified",
            Self::AppraisalCompleted => "appraisal-completed",
            Self::UnderwritingDecision => "underwriting-decision",
            Self::FundingCompleted => "funding-completed",
        }
    }
}

impl fmt::Display for SignalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalName {
    type Err = RouteError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "document-uploaded" => Ok(Self::DocumentUploaded),
            "document-verified" => Ok(Self::DocumentVerified),
            "appraisal-completed" => Ok(Self::AppraisalCompleted),
            "underwriting-decision" => Ok(Self::UnderwritingDecision),
            "funding-completed" => Ok(Self::FundingCompleted),
            other => Err(RouteError::UnknownSignal(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUploaded {
    pub document_id: String,
    pub document_type: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Settled verification result; `pending` is not a valid verification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    Rejected,
}

impl From<VerificationOutcome> for VerificationStatus {
    fn from(value: VerificationOutcome) -> Self {
        match value {
            VerificationOutcome::Verified => VerificationStatus::Verified,
            VerificationOutcome::Rejected => VerificationStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentVerified {
    pub document_id: String,
    pub verification_status: VerificationOutcome,
    #[serde(default)]
    pub verification_details: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppraisalCompleted {
    pub property_value: f64,
    #[serde(default)]
    pub appraisal_notes: String,
    pub appraiser_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderwritingDecided {
    pub decision: Decision,
    #[serde(default)]
    pub comments: String,
    pub underwriter_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingCompleted {
    pub fund_manager_id: String,
    pub funding_amount: f64,
    #[serde(default)]
    pub funding_notes: String,
}

/// Typed event consumed by the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "payload", rename_all = "kebab-case")]
pub enum LoanEvent {
    DocumentUploaded(DocumentUploaded),
    DocumentVerified(DocumentVerified),
    AppraisalCompleted(AppraisalCompleted),
    UnderwritingDecision(UnderwritingDecided),
    FundingCompleted(FundingCompleted),
}

impl LoanEvent {
    pub fn signal_name(&self) -> SignalName {
        match self {
            Self::DocumentUploaded(_) => SignalName::DocumentUploaded,
            Self::DocumentVerified(_) => SignalName::DocumentVerified,
            Self::AppraisalCompleted(_) => SignalName::AppraisalCompleted,
            Self::UnderwritingDecision(_) => SignalName::UnderwritingDecision,
            Self::FundingCompleted(_) => SignalName::FundingCompleted,
        }
    }
}

/// Reasons a delivery never reaches the state machine.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("unknown signal '{0}'")]
    UnknownSignal(String),
    #[error("malformed {signal} payload: {source}")]
    Malformed {
        signal: SignalName,
        source: serde_json::Error,
    },
    #[error("invalid {signal} payload: {reason}")]
    Invalid {
        signal: SignalName,
        reason: &'static str,
    },
}

pub struct SignalRouter;

impl SignalRouter {
    pub fn route(name: &str, payload: Value) -> Result<LoanEvent, RouteError> {
        let signal = name.parse::<SignalName>()?;
        let event = match signal {
            SignalName::DocumentUploaded => {
                let body: DocumentUploaded = decode(signal, payload)?;
                require_id(signal, &body.document_id, "document_id must not be empty")?;
                require_id(signal, &body.document_type, "document_type must not be empty")?;
                LoanEvent::DocumentUploaded(body)
            }
            SignalName::DocumentVerified => {
                let body: DocumentVerified = decode(signal, payload)?;
                require_id(signal, &body.document_id, "document_id must not be empty")?;
                LoanEvent::DocumentVerified(body)
            }
            SignalName::AppraisalCompleted => {
                let body: AppraisalCompleted = decode(signal, payload)?;
                require_amount(signal, body.property_value, "property_value must be >= 0")?;
                require_id(signal, &body.appraiser_id, "appraiser_id must not be empty")?;
                LoanEvent::AppraisalCompleted(body)
            }
            SignalName::UnderwritingDecision => {
                let body: UnderwritingDecided = decode(signal, payload)?;
                require_id(signal, &body.underwriter_id, "underwriter_id must not be empty")?;
                LoanEvent::UnderwritingDecision(body)
            }
            SignalName::FundingCompleted => {
                let body: FundingCompleted = decode(signal, payload)?;
                require_amount(signal, body.funding_amount, "funding_amount must be >= 0")?;
                require_id(signal, &body.fund_manager_id, "fund_manager_id must not be empty")?;
                LoanEvent::FundingCompleted(body)
            }
        };

        Ok(event)
    }
}

fn decode<T: DeserializeOwned>(signal: SignalName, payload: Value) -> Result<T, RouteError> {
    serde_json::from_value(payload).map_err(|source| RouteError::Malformed { signal, source })
}

fn require_id(signal: SignalName, value: &str, reason: &'static str) -> Result<(), RouteError> {
    if value.trim().is_empty() {
        return Err(RouteError::Invalid { signal, reason });
    }
    Ok(())
}

fn require_amount(signal: SignalName, value: f64, reason: &'static str) -> Result<(), RouteError> {
    if !value.is_finite() || value < 0.0 {
        return Err(RouteError::Invalid { signal, reason });
    }
    Ok(())
}
