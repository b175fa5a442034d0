use crate::infra::{host_with, simulated_activities, LoanHost};
use clap::Args;
use loan_origination::error::AppError;
use loan_origination::workflows::loan::{
    ActivityKind, ActivityOptions, BorrowerContact, ExecutionHandle, LoanActivityOptions,
    LoanApplication, LoanApplicationId, LoanOriginationState, LoanStatus, RetryPolicy,
    WorkflowClock, WorkflowSettings,
};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Stage deadline in seconds (30 days in production)
    #[arg(long, default_value_t = 3)]
    pub(crate) stage_deadline_secs: u64,
    /// Funding deadline in seconds (7 days in production)
    #[arg(long, default_value_t = 2)]
    pub(crate) funding_deadline_secs: u64,
    /// Simulated latency of each activity call, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub(crate) latency_ms: u64,
    /// Attempts the simulated credit bureau fails before answering
    #[arg(long, default_value_t = 2)]
    pub(crate) credit_check_failures: u32,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    ApprovedAndFunded,
    Rejected,
    NeedsMoreInfo,
    FundingTimeout,
    StageTimeout,
}

impl Scenario {
    const ALL: [Scenario; 5] = [
        Scenario::ApprovedAndFunded,
        Scenario::Rejected,
        Scenario::NeedsMoreInfo,
        Scenario::FundingTimeout,
        Scenario::StageTimeout,
    ];

    fn title(self) -> &'static str {
        match self {
            Scenario::ApprovedAndFunded => "A: approved and funded",
            Scenario::Rejected => "B: rejected by underwriting",
            Scenario::NeedsMoreInfo => "C: extra document requested, then approved",
            Scenario::FundingTimeout => "D: approved but never funded",
            Scenario::StageTimeout => "E: no underwriting decision before the stage deadline",
        }
    }

    fn loan_id(self, index: usize) -> LoanApplicationId {
        LoanApplicationId(format!("demo-{}", index + 1))
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let retry = RetryPolicy {
        initial_interval: Duration::from_millis(100),
        maximum_interval: Duration::from_secs(1),
        ..RetryPolicy::default()
    };
    let settings = WorkflowSettings {
        stage_deadline: Duration::from_secs(args.stage_deadline_secs),
        funding_deadline: Duration::from_secs(args.funding_deadline_secs),
        activities: LoanActivityOptions::uniform(ActivityOptions {
            retry,
            ..ActivityOptions::default()
        }),
    };
    let host = host_with(
        simulated_activities(
            Duration::from_millis(args.latency_ms),
            args.credit_check_failures,
        ),
        settings,
    );

    println!("Loan origination demo");
    println!(
        "  stage deadline {}s, funding deadline {}s, activity latency {}ms",
        args.stage_deadline_secs, args.funding_deadline_secs, args.latency_ms
    );

    for (index, scenario) in Scenario::ALL.into_iter().enumerate() {
        println!("\nScenario {}", scenario.title());
        let application = demo_application(&host, scenario.loan_id(index));
        let mut handle = host.start(application)?;
        drive(scenario, &mut handle).await?;

        let outcome = handle.completion().await?;
        render_outcome(&outcome.state, outcome.history.len());
        if outcome.history.replay() != outcome.state {
            println!("  replay diverged from live state");
        }
    }

    println!("\nHosted processes");
    for state in host.list() {
        println!(
            "  {:<8} {:<16} {}",
            state.loan_application.id,
            state.status.label(),
            state.next_step
        );
    }

    Ok(())
}

fn demo_application(host: &LoanHost, id: LoanApplicationId) -> LoanApplication {
    LoanApplication::new(
        id,
        BorrowerContact {
            name: "Jordan Alvarez".to_string(),
            email: "jordan.alvarez@example.com".to_string(),
            phone: "555-0107".to_string(),
        },
        275_000.0,
        "primary residence purchase",
        "demo-loan-officer",
        host.clock().now(),
    )
}

async fn drive(scenario: Scenario, handle: &mut ExecutionHandle) -> Result<(), AppError> {
    collect_documents(handle, &["paystub", "bank_statement"]).await?;
    signal(
        handle,
        "appraisal-completed",
        json!({
            "property_value": 310000.0,
            "appraisal_notes": "comparable sales support value",
            "appraiser_id": "appraiser-12"
        }),
    )?;
    handle.wait_for(|state| state.appraisal.is_some()).await;

    match scenario {
        Scenario::ApprovedAndFunded => {
            decide(handle, "approved").await?;
            fund(handle)?;
        }
        Scenario::Rejected => {
            decide(handle, "rejected").await?;
        }
        Scenario::NeedsMoreInfo => {
            decide(handle, "needs_more_info").await?;
            report(&handle.query());
            collect_documents(handle, &["tax_return"]).await?;
            decide(handle, "approved").await?;
            fund(handle)?;
        }
        Scenario::FundingTimeout => {
            decide(handle, "approved").await?;
            println!("  waiting for the funding deadline");
        }
        Scenario::StageTimeout => {
            report(&handle.query());
            println!("  waiting for the stage deadline");
        }
    }
    Ok(())
}

async fn collect_documents(
    handle: &mut ExecutionHandle,
    document_types: &[&str],
) -> Result<(), AppError> {
    for document_type in document_types {
        let document_id = format!("{}-{document_type}", handle.id());
        signal(
            handle,
            "document-uploaded",
            json!({ "document_id": document_id, "document_type": document_type }),
        )?;
        handle
            .wait_for(|state| state.document(&document_id).is_some())
            .await;

        signal(
            handle,
            "document-verified",
            json!({ "document_id": document_id, "verification_status": "verified" }),
        )?;
        handle
            .wait_for(|state| {
                state
                    .document(&document_id)
                    .is_some_and(|document| !document.is_pending())
            })
            .await;
    }
    report(&handle.query());
    Ok(())
}

async fn decide(handle: &mut ExecutionHandle, decision: &str) -> Result<(), AppError> {
    let before = handle.query();
    signal(
        handle,
        "underwriting-decision",
        json!({ "decision": decision, "underwriter_id": "underwriter-4" }),
    )?;
    let after = handle
        .wait_for(|state| {
            state.status != LoanStatus::Processing
                || state.information_requests.len() > before.information_requests.len()
        })
        .await;
    report(&after);
    Ok(())
}

fn fund(handle: &ExecutionHandle) -> Result<(), AppError> {
    signal(
        handle,
        "funding-completed",
        json!({
            "fund_manager_id": "fund-manager-9",
            "funding_amount": 275000.0,
            "funding_notes": "wire released"
        }),
    )
}

fn signal(handle: &ExecutionHandle, name: &str, payload: Value) -> Result<(), AppError> {
    let receipt = handle.signal(name, payload)?;
    if !receipt.is_accepted() {
        println!("  {name} not delivered: {receipt:?}");
    }
    Ok(())
}

fn report(state: &LoanOriginationState) {
    println!(
        "  status={:<11} documents={}/{} next: {}",
        state.status.label(),
        state.net_documents(),
        state.required_documents,
        state.next_step
    );
}

fn render_outcome(state: &LoanOriginationState, journal_len: usize) {
    println!(
        "  final status: {} ({} journal entries)",
        state.status.label(),
        journal_len
    );
    if let Some(score) = state.credit_score {
        println!("  credit score: {score}");
    }
    for kind in [
        ActivityKind::GenerateAgreement,
        ActivityKind::CreditCheck,
        ActivityKind::ReleaseFunds,
    ] {
        if let Some(record) = state.activity(kind) {
            println!(
                "  {:<18} {:?} after {} attempt(s)",
                kind.name(),
                record.status,
                record.attempts
            );
        }
    }
}
