use loan_origination::config::WorkflowConfig;
use loan_origination::workflows::loan::{
    LoanOriginationHost, SimulatedCreditBureau, SimulatedLoanActivities, WorkflowSettings,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Latency of each simulated agreement, bureau, and transfer call.
pub(crate) const ACTIVITY_LATENCY: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type LoanHost = LoanOriginationHost<SimulatedLoanActivities>;

pub(crate) fn simulated_activities(
    latency: Duration,
    credit_check_failures: u32,
) -> SimulatedLoanActivities {
    SimulatedLoanActivities::new(
        latency,
        SimulatedCreditBureau::with_failures(credit_check_failures),
    )
}

pub(crate) fn build_host(config: &WorkflowConfig) -> Arc<LoanHost> {
    host_with(
        simulated_activities(ACTIVITY_LATENCY, config.credit_check_failures),
        config.settings(),
    )
}

pub(crate) fn host_with(
    activities: SimulatedLoanActivities,
    settings: WorkflowSettings,
) -> Arc<LoanHost> {
    Arc::new(LoanOriginationHost::new(Arc::new(activities), settings))
}
