//! Inbound screening routes: the vendor response webhook, applicant data
//! changes from the leasing platform and party decision reads.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use leasecheck_core::domain::applicant::PartyId;
use leasecheck_core::errors::{ApplicationError, InterfaceError};
use leasecheck_core::screening::PartyScreeningDecision;
use leasecheck_worker::{ApplicantDataChange, HandlingOutcome, VendorDelivery};
use serde::Serialize;
use tracing::{info, warn};

use crate::runtime::{CommandSender, RuntimeError, ScreeningServices};

#[derive(Clone)]
pub struct ScreeningState {
    commands: CommandSender,
    services: Arc<ScreeningServices>,
}

impl ScreeningState {
    pub fn new(commands: CommandSender, services: Arc<ScreeningServices>) -> Self {
        Self { commands, services }
    }
}

pub fn router(state: ScreeningState) -> Router {
    Router::new()
        .route("/webhooks/screening-response", post(screening_response))
        .route("/applicant-data-changes", post(applicant_data_changed))
        .route("/parties/{party_id}/screening-decisions", get(party_decisions))
        .with_state(state)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn from_runtime(error: RuntimeError, correlation_id: &str) -> Self {
        let application = match error {
            RuntimeError::Screening(error) => ApplicationError::from(error),
            other => ApplicationError::Integration(other.to_string()),
        };
        Self(application.into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            detail: self.0.to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn screening_response(
    State(state): State<ScreeningState>,
    body: String,
) -> Result<Json<HandlingOutcome>, ApiError> {
    let delivery = VendorDelivery::parse(body).map_err(|error| {
        warn!(
            event_name = "screening.webhook.undecodable",
            correlation_id = "unassigned",
            error = %error,
            "vendor response body could not be decoded"
        );
        ApiError(InterfaceError::BadRequest {
            message: error.to_string(),
            correlation_id: "unassigned".to_string(),
        })
    })?;
    let correlation_id =
        delivery.response.submission_id().map(|id| id.0).unwrap_or_else(|| "unassigned".to_string());

    info!(
        event_name = "screening.webhook.received",
        correlation_id = %correlation_id,
        status = %delivery.response.status,
        "vendor response received"
    );

    let outcome = state
        .commands
        .handle_response(delivery)
        .await
        .map_err(|error| ApiError::from_runtime(error, &correlation_id))?;
    Ok(Json(outcome))
}

async fn applicant_data_changed(
    State(state): State<ScreeningState>,
    Json(change): Json<ApplicantDataChange>,
) -> Result<StatusCode, ApiError> {
    let correlation_id = change.applicant_id.0.clone();
    state
        .commands
        .submit_report(change)
        .await
        .map_err(|error| ApiError::from_runtime(error, &correlation_id))?;
    Ok(StatusCode::ACCEPTED)
}

async fn party_decisions(
    State(state): State<ScreeningState>,
    Path(party_id): Path<String>,
) -> Result<Json<Vec<PartyScreeningDecision>>, ApiError> {
    let party_id = PartyId(party_id);
    let decisions = state
        .services
        .parties
        .decisions(&party_id, Utc::now())
        .await
        .map_err(|error| ApiError::from_runtime(error.into(), &party_id.0))?;
    Ok(Json(decisions))
}
