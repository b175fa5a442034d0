use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::activities::LoanActivities;
use super::clock::WorkflowClock;
use super::domain::{BorrowerContact, LoanApplication, LoanApplicationId};
use super::host::{LoanOriginationHost, SignalReceipt, LOAN_APPLICATION_QUERY};
use crate::error::AppError;

/// Intake payload accepted by `POST /api/v1/loans`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoanIntake {
    #[serde(default)]
    pub id: Option<String>,
    pub borrower_name: String,
    pub borrower_email: String,
    #[serde(default)]
    pub borrower_phone: String,
    pub loan_amount: f64,
    pub loan_purpose: String,
    pub created_by: String,
}

impl LoanIntake {
    fn into_application(self, now: DateTime<Utc>) -> Result<LoanApplication, AppError> {
        if self.borrower_name.trim().is_empty() {
            return Err(AppError::Validation("borrower_name is required".to_string()));
        }
        if !self.loan_amount.is_finite() || self.loan_amount <= 0.0 {
            return Err(AppError::Validation(
                "loan_amount must be a positive number".to_string(),
            ));
        }

        let id = match self.id {
            Some(id) if !id.trim().is_empty() => LoanApplicationId(id),
            _ => LoanApplicationId::generate(),
        };
        Ok(LoanApplication::new(
            id,
            BorrowerContact {
                name: self.borrower_name,
                email: self.borrower_email,
                phone: self.borrower_phone,
            },
            self.loan_amount,
            self.loan_purpose,
            self.created_by,
            now,
        ))
    }
}

/// Router exposing process start, signal delivery, and queries over HTTP.
pub fn loan_router<A, C>(host: Arc<LoanOriginationHost<A, C>>) -> Router
where
    A: LoanActivities,
    C: WorkflowClock + Clone + 'static,
{
    Router::new()
        .route(
            "/api/v1/loans",
            post(start_handler::<A, C>).get(list_handler::<A, C>),
        )
        .route("/api/v1/loans/:loan_id", get(loan_handler::<A, C>))
        .route(
            "/api/v1/loans/:loan_id/queries/:query",
            get(query_handler::<A, C>),
        )
        .route(
            "/api/v1/loans/:loan_id/signals/:signal",
            post(signal_handler::<A, C>),
        )
        .with_state(host)
}

pub(crate) async fn start_handler<A, C>(
    State(host): State<Arc<LoanOriginationHost<A, C>>>,
    Json(intake): Json<LoanIntake>,
) -> Result<Response, AppError>
where
    A: LoanActivities,
    C: WorkflowClock + Clone + 'static,
{
    let application = intake.into_application(host.clock().now())?;
    let handle = host.start(application)?;
    Ok((StatusCode::CREATED, Json(handle.query())).into_response())
}

pub(crate) async fn list_handler<A, C>(
    State(host): State<Arc<LoanOriginationHost<A, C>>>,
) -> Response
where
    A: LoanActivities,
    C: WorkflowClock + Clone + 'static,
{
    (StatusCode::OK, Json(host.list())).into_response()
}

pub(crate) async fn loan_handler<A, C>(
    State(host): State<Arc<LoanOriginationHost<A, C>>>,
    Path(loan_id): Path<String>,
) -> Result<Response, AppError>
where
    A: LoanActivities,
    C: WorkflowClock + Clone + 'static,
{
    let state = host.query(&LoanApplicationId(loan_id), LOAN_APPLICATION_QUERY)?;
    Ok((StatusCode::OK, Json(state)).into_response())
}

pub(crate) async fn query_handler<A, C>(
    State(host): State<Arc<LoanOriginationHost<A, C>>>,
    Path((loan_id, query)): Path<(String, String)>,
) -> Result<Response, AppError>
where
    A: LoanActivities,
    C: WorkflowClock + Clone + 'static,
{
    let state = host.query(&LoanApplicationId(loan_id), &query)?;
    Ok((StatusCode::OK, Json(state)).into_response())
}

pub(crate) async fn signal_handler<A, C>(
    State(host): State<Arc<LoanOriginationHost<A, C>>>,
    Path((loan_id, signal)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Result<Response, AppError>
where
    A: LoanActivities,
    C: WorkflowClock + Clone + 'static,
{
    let receipt = host.signal(&LoanApplicationId(loan_id), &signal, payload)?;
    let status = match receipt {
        SignalReceipt::Accepted { .. } => StatusCode::ACCEPTED,
        SignalReceipt::Dropped { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    };
    Ok((status, Json(receipt)).into_response())
}
