use super::common::*;

use crate::workflows::loan::domain::{
    ActivityKind, ActivityStatus, Decision, LoanOriginationState, LoanStatus, NextStep,
    VerificationStatus,
};
use crate::workflows::loan::history::WorkflowHistory;
use crate::workflows::loan::machine::{
    ActivityOutcome, Disposition, IgnoreReason, Transition, WaitSet,
};
use crate::workflows::loan::signals::VerificationOutcome;

#[test]
fn fresh_process_waits_for_two_documents() {
    let state = started();

    assert_eq!(state.status, LoanStatus::Processing);
    assert_eq!(state.loan_application.status, LoanStatus::Processing);
    assert_eq!(state.required_documents, 2);
    assert_eq!(
        state.wait_set(),
        WaitSet {
            upload: true,
            ..WaitSet::default()
        }
    );
    assert_eq!(
        state.next_step.to_string(),
        "Waiting for customer documents: 2 more required"
    );
}

#[test]
fn cascade_moves_from_documents_to_appraisal_to_underwriting() {
    let mut state = started();
    apply_all(&mut state, &[upload("doc-1")]);
    assert_eq!(
        state.wait_set(),
        WaitSet {
            verification: true,
            upload: true,
            ..WaitSet::default()
        }
    );

    apply_all(&mut state, &[upload("doc-2")]);
    assert_eq!(
        state.wait_set(),
        WaitSet {
            verification: true,
            ..WaitSet::default()
        }
    );
    assert_eq!(state.next_step, NextStep::AwaitingVerification);

    apply_all(
        &mut state,
        &[
            verify("doc-1", VerificationOutcome::Verified),
            verify("doc-2", VerificationOutcome::Verified),
        ],
    );
    assert_eq!(
        state.wait_set(),
        WaitSet {
            appraisal: true,
            ..WaitSet::default()
        }
    );
    assert_eq!(state.next_step.to_string(), "Waiting for appraisal");

    apply_all(&mut state, &[appraisal()]);
    assert_eq!(
        state.wait_set(),
        WaitSet {
            underwriting: true,
            ..WaitSet::default()
        }
    );
    assert_eq!(state.next_step, NextStep::AwaitingUnderwriting);
}

#[test]
fn uploads_fill_defaults_and_reject_duplicates() {
    let mut state = started();
    apply_all(&mut state, &[upload("doc-1")]);

    let document = state.document("doc-1").expect("document recorded");
    assert_eq!(document.file_name, "paystub_document.pdf");
    assert_eq!(document.file_path, "/uploads/doc-1");
    assert_eq!(document.verification_status, VerificationStatus::Pending);
    assert_eq!(document.uploaded_at, minutes(1));

    let before = state.clone();
    assert_eq!(
        state.apply(&upload("doc-1"), minutes(5)),
        Disposition::Ignored(IgnoreReason::DuplicateDocument)
    );
    assert_eq!(state, before);
}

#[test]
fn uploads_beyond_requirement_are_ignored() {
    let mut state = started();
    apply_all(&mut state, &[upload("doc-1"), upload("doc-2")]);

    assert_eq!(
        state.apply(&upload("doc-3"), minutes(10)),
        Disposition::Ignored(IgnoreReason::DocumentsNotExpected)
    );
    assert_eq!(state.total_documents(), 2);
}

#[test]
fn duplicate_verification_is_idempotent() {
    let mut once = started();
    apply_all(
        &mut once,
        &[
            upload("doc-1"),
            verify("doc-1", VerificationOutcome::Verified),
        ],
    );

    let mut twice = once.clone();
    assert_eq!(
        twice.apply(&verify("doc-1", VerificationOutcome::Verified), minutes(30)),
        Disposition::Ignored(IgnoreReason::AlreadyVerified)
    );
    assert_eq!(
        twice.apply(&verify("doc-1", VerificationOutcome::Rejected), minutes(31)),
        Disposition::Ignored(IgnoreReason::AlreadyVerified)
    );

    assert_eq!(twice, once);
    let document = twice.document("doc-1").expect("document");
    assert_eq!(document.verification_status, VerificationStatus::Verified);
    assert_eq!(document.verified_at, Some(minutes(2)));
}

#[test]
fn verification_for_unknown_document_is_ignored() {
    let mut state = started();
    assert_eq!(
        state.apply(&verify("ghost", VerificationOutcome::Verified), minutes(1)),
        Disposition::Ignored(IgnoreReason::UnknownDocument)
    );
}

#[test]
fn rejected_document_reopens_upload() {
    let mut state = started();
    apply_all(
        &mut state,
        &[
            upload("doc-1"),
            upload("doc-2"),
            verify("doc-1", VerificationOutcome::Verified),
            verify("doc-2", VerificationOutcome::Rejected),
        ],
    );

    assert_eq!(state.rejected_documents(), 1);
    assert_eq!(
        state.wait_set(),
        WaitSet {
            upload: true,
            ..WaitSet::default()
        }
    );
    assert_eq!(
        state.next_step,
        NextStep::AwaitingDocuments { remaining: 1 }
    );

    apply_all(&mut state, &[upload("doc-3")]);
    assert!(state.wait_set().verification);
    assert!(!state.wait_set().upload);
}

#[test]
fn decision_requires_documents_and_appraisal() {
    let mut state = started();
    apply_all(
        &mut state,
        &[
            upload("doc-1"),
            upload("doc-2"),
            verify("doc-1", VerificationOutcome::Verified),
            verify("doc-2", VerificationOutcome::Verified),
        ],
    );

    assert_eq!(
        state.apply(&decision(Decision::Approved), minutes(20)),
        Disposition::Ignored(IgnoreReason::UnderwritingNotReady)
    );
    assert!(state.underwriting_decision.is_none());
    assert_eq!(state.status, LoanStatus::Processing);

    apply_all(&mut state, &[appraisal()]);
    assert_eq!(
        state.apply(&decision(Decision::Approved), minutes(21)),
        Disposition::Applied
    );
    assert_eq!(state.status, LoanStatus::Approved);
    assert_eq!(state.next_step.to_string(), "Waiting for funding");
}

#[test]
fn appraisal_waits_for_settled_documents() {
    let mut state = started();
    apply_all(&mut state, &[upload("doc-1"), upload("doc-2")]);

    assert_eq!(
        state.apply(&appraisal(), minutes(10)),
        Disposition::Ignored(IgnoreReason::AppraisalNotReady)
    );
    assert!(state.appraisal.is_none());

    apply_all(
        &mut state,
        &[
            verify("doc-1", VerificationOutcome::Verified),
            verify("doc-2", VerificationOutcome::Rejected),
        ],
    );
    assert_eq!(
        state.apply(&appraisal(), minutes(11)),
        Disposition::Ignored(IgnoreReason::AppraisalNotReady)
    );

    apply_all(
        &mut state,
        &[upload("doc-3"), verify("doc-3", VerificationOutcome::Verified)],
    );
    assert_eq!(state.apply(&appraisal(), minutes(20)), Disposition::Applied);
    assert_eq!(state.next_step.to_string(), "Waiting for underwriting decision");
}

#[test]
fn appraisal_is_recorded_once() {
    let mut state = ready_for_underwriting();
    let appraisal_record = state.appraisal.clone().expect("appraisal");
    assert_eq!(appraisal_record.id, "appraisal-loan-100");

    assert_eq!(
        state.apply(&appraisal(), minutes(40)),
        Disposition::Ignored(IgnoreReason::AppraisalRecorded)
    );
    assert_eq!(state.appraisal, Some(appraisal_record));
}

#[test]
fn needs_more_info_raises_requirement_and_reopens_uploads() {
    let mut state = ready_for_underwriting();
    apply_all(&mut state, &[decision(Decision::NeedsMoreInfo)]);

    assert_eq!(state.required_documents, 3);
    assert_eq!(state.status, LoanStatus::Processing);
    assert!(state.underwriting_decision.is_none());
    assert_eq!(state.information_requests.len(), 1);
    assert_eq!(
        state.next_step.to_string(),
        "Waiting for customer documents: 1 more required"
    );
    assert_eq!(
        state.apply(&decision(Decision::Approved), minutes(50)),
        Disposition::Ignored(IgnoreReason::UnderwritingNotReady)
    );

    apply_all(
        &mut state,
        &[
            upload("doc-3"),
            verify("doc-3", VerificationOutcome::Verified),
        ],
    );
    assert!(state.wait_set().underwriting);

    apply_all(&mut state, &[decision(Decision::Rejected)]);
    assert_eq!(state.status, LoanStatus::Rejected);
    assert_eq!(state.required_documents, 3);
    assert_eq!(state.next_step, NextStep::Complete);
}

#[test]
fn stage_deadline_closes_open_process_as_incomplete() {
    let mut state = ready_for_underwriting();
    apply_all(
        &mut state,
        &[
            decision(Decision::NeedsMoreInfo),
            Transition::StageDeadlineElapsed,
        ],
    );

    assert_eq!(state.status, LoanStatus::Incomplete);
    assert_eq!(state.loan_application.status, LoanStatus::Incomplete);
    assert_eq!(state.wait_set(), WaitSet::default());
}

#[test]
fn terminal_status_is_never_overwritten() {
    let mut state = ready_for_underwriting();
    apply_all(&mut state, &[decision(Decision::Rejected)]);
    let rejected = state.clone();

    assert_eq!(
        state.apply(&Transition::StageDeadlineElapsed, minutes(60)),
        Disposition::Ignored(IgnoreReason::StageClosed)
    );
    assert_eq!(
        state.apply(&funding(), minutes(61)),
        Disposition::Ignored(IgnoreReason::FundingNotExpected)
    );
    assert_eq!(
        state.apply(&Transition::FundingDeadlineElapsed, minutes(62)),
        Disposition::Ignored(IgnoreReason::FundingNotExpected)
    );
    assert_eq!(state, rejected);
}

#[test]
fn funding_deadline_only_expires_approved_loans() {
    let mut state = ready_for_underwriting();
    apply_all(
        &mut state,
        &[
            decision(Decision::Approved),
            Transition::FundingDeadlineElapsed,
        ],
    );
    assert_eq!(state.status, LoanStatus::FundingTimeout);
    assert_eq!(
        state.apply(&Transition::ActivityScheduled(ActivityKind::ReleaseFunds), minutes(90)),
        Disposition::Ignored(IgnoreReason::FundingNotExpected)
    );
}

#[test]
fn funding_then_release_completes_the_process() {
    let mut state = ready_for_underwriting();
    apply_all(
        &mut state,
        &[
            decision(Decision::Approved),
            funding(),
            Transition::ActivityScheduled(ActivityKind::ReleaseFunds),
        ],
    );
    assert_eq!(state.status, LoanStatus::Funded);
    assert_eq!(state.next_step.to_string(), "Releasing funds");
    assert_eq!(
        state.apply(&funding(), minutes(70)),
        Disposition::Ignored(IgnoreReason::FundingNotExpected)
    );

    apply_all(
        &mut state,
        &[Transition::ActivitySettled {
            kind: ActivityKind::ReleaseFunds,
            outcome: ActivityOutcome::Completed {
                attempts: 1,
                reference: "transfer-loan-100".to_string(),
            },
        }],
    );
    let release = state
        .activity(ActivityKind::ReleaseFunds)
        .expect("release recorded");
    assert_eq!(release.status, ActivityStatus::Completed);
    assert_eq!(release.reference.as_deref(), Some("transfer-loan-100"));
    assert_eq!(state.next_step, NextStep::Complete);
}

#[test]
fn activities_settle_once_and_record_credit_score() {
    let mut state = started();
    apply_all(
        &mut state,
        &[Transition::ActivityScheduled(ActivityKind::CreditCheck)],
    );
    assert_eq!(
        state.apply(
            &Transition::ActivityScheduled(ActivityKind::CreditCheck),
            minutes(3)
        ),
        Disposition::Ignored(IgnoreReason::ActivityAlreadyScheduled)
    );

    let scored = Transition::ActivitySettled {
        kind: ActivityKind::CreditCheck,
        outcome: ActivityOutcome::Scored {
            attempts: 3,
            score: 712,
        },
    };
    assert_eq!(state.apply(&scored, minutes(4)), Disposition::Applied);
    assert_eq!(state.credit_score, Some(712));
    let record = state.activity(ActivityKind::CreditCheck).expect("record");
    assert_eq!(record.attempts, 3);
    assert_eq!(record.reference.as_deref(), Some("score:712"));
    assert_eq!(record.settled_at, Some(minutes(4)));

    assert_eq!(
        state.apply(&scored, minutes(5)),
        Disposition::Ignored(IgnoreReason::ActivityNotScheduled)
    );
}

#[test]
fn failed_activity_is_recorded_without_touching_status() {
    let mut state = started();
    apply_all(
        &mut state,
        &[
            Transition::ActivityScheduled(ActivityKind::GenerateAgreement),
            Transition::ActivitySettled {
                kind: ActivityKind::GenerateAgreement,
                outcome: ActivityOutcome::Failed {
                    attempts: 5,
                    error: "document service offline".to_string(),
                },
            },
        ],
    );

    let record = state
        .activity(ActivityKind::GenerateAgreement)
        .expect("record");
    assert_eq!(record.status, ActivityStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("document service offline"));
    assert_eq!(state.status, LoanStatus::Processing);
}

#[test]
fn replay_reproduces_live_state() {
    let application = application("loan-100");
    let mut live = LoanOriginationState::start(application.clone());
    let mut history = WorkflowHistory::new(application);

    let transitions = [
        Transition::ActivityScheduled(ActivityKind::GenerateAgreement),
        upload("doc-1"),
        upload("doc-2"),
        verify("doc-1", VerificationOutcome::Verified),
        verify("doc-2", VerificationOutcome::Verified),
        appraisal(),
        decision(Decision::Approved),
        funding(),
    ];
    for (offset, transition) in transitions.into_iter().enumerate() {
        let at = minutes(offset as i64 * 7);
        assert_eq!(live.apply(&transition, at), Disposition::Applied);
        history.record(transition, at);
    }

    assert_eq!(history.len(), 8);
    assert_eq!(history.events[0].sequence, 1);
    assert_eq!(history.replay(), live);
}

/// Explores every applicable signal order up to a bounded depth and checks the invariants
/// that must hold for each step.
#[test]
fn explored_signal_orders_preserve_invariants() {
    let alphabet = vec![
        upload("doc-1"),
        upload("doc-2"),
        upload("doc-3"),
        verify("doc-1", VerificationOutcome::Verified),
        verify("doc-1", VerificationOutcome::Rejected),
        verify("doc-2", VerificationOutcome::Verified),
        verify("doc-2", VerificationOutcome::Rejected),
        verify("doc-3", VerificationOutcome::Verified),
        appraisal(),
        decision(Decision::Approved),
        decision(Decision::Rejected),
        decision(Decision::NeedsMoreInfo),
    ];

    let mut visited = 0usize;
    explore(&started(), &alphabet, 8, &mut visited);
    assert!(visited > 100, "exploration covered {visited} states");
}

fn explore(
    state: &LoanOriginationState,
    alphabet: &[Transition],
    depth: usize,
    visited: &mut usize,
) {
    *visited += 1;
    if state.status == LoanStatus::Processing {
        assert!(
            !state.wait_set().is_empty(),
            "no listenable signal while processing: {state:?}"
        );
    }
    if depth == 0 {
        return;
    }

    for transition in alphabet {
        let mut next = state.clone();
        if next.apply(transition, minutes(depth as i64)) != Disposition::Applied {
            assert_eq!(&next, state, "ignored transition changed state");
            continue;
        }

        assert!(next.required_documents >= state.required_documents);
        for before in &state.documents {
            let after = next.document(&before.id).expect("documents are never removed");
            if before.verification_status != VerificationStatus::Pending {
                assert_eq!(after.verification_status, before.verification_status);
            }
        }
        if state.appraisal.is_none() && next.appraisal.is_some() {
            assert_eq!(state.pending_documents(), 0);
            assert!(state.net_documents() >= state.required_documents);
        }
        if state.underwriting_decision.is_none() && next.underwriting_decision.is_some() {
            assert!(state.total_documents() >= state.required_documents);
            assert!(state.appraisal.is_some());
        }

        explore(&next, alphabet, depth - 1, visited);
    }
}
