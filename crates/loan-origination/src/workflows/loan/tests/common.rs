use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

use crate::workflows::loan::domain::{
    BorrowerContact, Decision, LoanApplication, LoanApplicationId, LoanOriginationState,
};
use crate::workflows::loan::machine::{Disposition, Transition};
use crate::workflows::loan::signals::{
    AppraisalCompleted, DocumentUploaded, DocumentVerified, FundingCompleted, LoanEvent,
    UnderwritingDecided, VerificationOutcome,
};

pub(super) fn opened_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn minutes(offset: i64) -> DateTime<Utc> {
    opened_at() + Duration::minutes(offset)
}

pub(super) fn application(id: &str) -> LoanApplication {
    LoanApplication::new(
        LoanApplicationId(id.to_string()),
        BorrowerContact {
            name: "Dana Whitfield".to_string(),
            email: "dana@example.com".to_string(),
            phone: "555-0142".to_string(),
        },
        250_000.0,
        "home purchase",
        "loan-officer-7",
        opened_at(),
    )
}

pub(super) fn started() -> LoanOriginationState {
    LoanOriginationState::start(application("loan-100"))
}

pub(super) fn upload(document_id: &str) -> Transition {
    Transition::Signal(LoanEvent::DocumentUploaded(DocumentUploaded {
        document_id: document_id.to_string(),
        document_type: "paystub".to_string(),
        file_name: None,
        file_path: None,
    }))
}

pub(super) fn verify(document_id: &str, outcome: VerificationOutcome) -> Transition {
    Transition::Signal(LoanEvent::DocumentVerified(DocumentVerified {
        document_id: document_id.to_string(),
        verification_status: outcome,
        verification_details: None,
    }))
}

pub(super) fn appraisal() -> Transition {
    Transition::Signal(LoanEvent::AppraisalCompleted(AppraisalCompleted {
        property_value: 310_000.0,
        appraisal_notes: "comparable sales support value".to_string(),
        appraiser_id: "appraiser-3".to_string(),
    }))
}

pub(super) fn decision(decision: Decision) -> Transition {
    Transition::Signal(LoanEvent::UnderwritingDecision(UnderwritingDecided {
        decision,
        comments: String::new(),
        underwriter_id: "underwriter-1".to_string(),
    }))
}

pub(super) fn funding() -> Transition {
    Transition::Signal(LoanEvent::FundingCompleted(FundingCompleted {
        fund_manager_id: "fund-manager-2".to_string(),
        funding_amount: 250_000.0,
        funding_notes: "wire sent".to_string(),
    }))
}

/// Applies every transition, asserting each one takes effect.
pub(super) fn apply_all(state: &mut LoanOriginationState, transitions: &[Transition]) {
    for (offset, transition) in transitions.iter().enumerate() {
        let disposition = state.apply(transition, minutes(offset as i64 + 1));
        assert_eq!(
            disposition,
            Disposition::Applied,
            "transition {transition:?} was not applied"
        );
    }
}

/// State with two verified documents and a completed appraisal.
pub(super) fn ready_for_underwriting() -> LoanOriginationState {
    let mut state = started();
    apply_all(
        &mut state,
        &[
            upload("doc-1"),
            upload("doc-2"),
            verify("doc-1", VerificationOutcome::Verified),
            verify("doc-2", VerificationOutcome::Verified),
            appraisal(),
        ],
    );
    state
}

pub(super) fn upload_payload(document_id: &str) -> Value {
    json!({ "document_id": document_id, "document_type": "bank_statement" })
}
