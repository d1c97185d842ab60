//! Vendor response ingestion.
//!
//! A response is classified, audited and applied in one store transaction.
//! Follow-up work (resubmission, submitting the promoted report, notifying
//! parties) runs after the commit; its failures are logged and reported in the
//! outcome rather than failing a response that is already recorded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use leasecheck_core::domain::applicant::ApplicantId;
use leasecheck_core::domain::report::ApplicantReport;
use leasecheck_core::domain::tracking::{
    ReportResponse, ReportResponseId, RequestType, ScreeningResponseStatus,
};
use leasecheck_core::errors::DomainError;
use leasecheck_core::screening::lifecycle::ensure_transition;
use leasecheck_core::screening::{classify, Resolution};
use leasecheck_core::vendor::{payload_fingerprint, VendorResponse};
use leasecheck_db::repositories::{
    ApplicantReportRepository, PartyRepository, ReportUpdate, ResponseApplication,
};

use crate::errors::ScreeningError;
use crate::outbound::ReportStatusNotifier;
use crate::requester::ReportRequester;

/// Raw vendor payload together with its decoded document.
#[derive(Clone, Debug)]
pub struct VendorDelivery {
    pub raw: String,
    pub response: VendorResponse,
}

impl VendorDelivery {
    pub fn parse(raw: impl Into<String>) -> Result<Self, serde_json::Error> {
        let raw = raw.into();
        let response = serde_json::from_str(&raw)?;
        Ok(Self { raw, response })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlingOutcome {
    pub request_id: String,
    pub report_id: String,
    pub response_status: ScreeningResponseStatus,
    pub resolution: &'static str,
    /// The report left PENDING/COMPILING because of this response.
    pub transitioned: bool,
    /// Same payload was already recorded for this request.
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resubmitted_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted_report_id: Option<String>,
    pub notified_parties: usize,
    pub follow_up_failed: bool,
}

pub struct ResponseHandler {
    reports: Arc<dyn ApplicantReportRepository>,
    parties: Arc<dyn PartyRepository>,
    requester: Arc<ReportRequester>,
    notifier: Arc<dyn ReportStatusNotifier>,
}

impl ResponseHandler {
    pub fn new(
        reports: Arc<dyn ApplicantReportRepository>,
        parties: Arc<dyn PartyRepository>,
        requester: Arc<ReportRequester>,
        notifier: Arc<dyn ReportStatusNotifier>,
    ) -> Self {
        Self { reports, parties, requester, notifier }
    }

    pub async fn handle(
        &self,
        delivery: &VendorDelivery,
        now: DateTime<Utc>,
    ) -> Result<HandlingOutcome, ScreeningError> {
        let response = &delivery.response;
        let request_id = response.submission_id().ok_or(ScreeningError::MissingSubmissionId)?;
        let request = self
            .reports
            .find_request(&request_id)
            .await?
            .ok_or_else(|| ScreeningError::UnknownSubmission(request_id.0.clone()))?;
        let report = self.reports.find_report(&request.report_id).await?.ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "submission `{}` points at missing report `{}`",
                request.id.0, request.report_id
            ))
        })?;

        let classification = classify(response);
        let fingerprint = payload_fingerprint(&delivery.raw);
        let duplicate = self
            .reports
            .list_responses(&request.id)
            .await?
            .iter()
            .any(|earlier| earlier.payload_fingerprint == fingerprint);
        if duplicate {
            warn!(
                event_name = "screening.response.duplicate",
                correlation_id = %request.id.0,
                report_id = %report.id,
                fingerprint = %fingerprint,
                "vendor delivered an identical response again"
            );
        }

        let resolution = self.requester.lifecycle().resolve_response(
            &report,
            &request,
            &classification,
            response,
            now,
        );
        let update = match &resolution {
            Resolution::Terminate(termination) => {
                ensure_transition(report.status, termination.status)?;
                ReportUpdate::Terminate(termination.clone())
            }
            Resolution::StillCompiling => ReportUpdate::MarkCompiling,
            Resolution::Resubmit | Resolution::AlreadyResolved | Resolution::Stale => {
                ReportUpdate::Unchanged
            }
        };

        let audit = ReportResponse {
            id: ReportResponseId(Uuid::new_v4().to_string()),
            request_id: request.id.clone(),
            raw_response: delivery.raw.clone(),
            payload_fingerprint: fingerprint,
            status: classification.status(),
            service_status: response.service_status_map(),
            blocked_reason: classification.blocked_reason(),
            service_blocked_status: response.blocked_text().map(str::to_string),
            created_at: now,
        };
        let application = ResponseApplication {
            response: audit,
            report_id: report.id.clone(),
            applicant_id: report.applicant_id.clone(),
            report_kind: report.report_kind,
            update,
            now,
        };
        let draft = self.requester.draft(RequestType::New, now);
        let applied = self.reports.apply_response(&application, &draft).await?;

        info!(
            event_name = "screening.response.applied",
            correlation_id = %request.id.0,
            report_id = %report.id,
            applicant_id = %report.applicant_id,
            response_status = classification.status().as_str(),
            resolution = resolution.label(),
            transitioned = applied.transitioned,
            "vendor response applied"
        );

        let mut outcome = HandlingOutcome {
            request_id: request.id.0.clone(),
            report_id: report.id.0.clone(),
            response_status: classification.status(),
            resolution: resolution.label(),
            transitioned: applied.transitioned,
            duplicate,
            resubmitted_request_id: None,
            promoted_report_id: applied
                .promoted
                .as_ref()
                .map(|promoted| promoted.report.id.0.clone()),
            notified_parties: 0,
            follow_up_failed: false,
        };

        if matches!(resolution, Resolution::Resubmit) {
            match self.requester.submit(&report, RequestType::Resubmit, now).await {
                Ok(resubmitted) => outcome.resubmitted_request_id = Some(resubmitted.id.0),
                Err(error) => {
                    outcome.follow_up_failed = true;
                    log_follow_up_failure("resubmit", &report, &error);
                }
            }
        }

        // The promoted report's tracking row committed with the response, so
        // a failed publish leaves an orphaned request for reconciliation.
        if let Some(promoted) = &applied.promoted {
            if let Err(error) = self.requester.publish(promoted).await {
                outcome.follow_up_failed = true;
                log_follow_up_failure("publish_promoted", &promoted.report, &error);
            }
        }

        match self.notify_parties(&report.applicant_id).await {
            Ok(notified) => outcome.notified_parties = notified,
            Err(error) => {
                outcome.follow_up_failed = true;
                log_follow_up_failure("notify", &report, &error);
            }
        }

        Ok(outcome)
    }

    async fn notify_parties(&self, applicant_id: &ApplicantId) -> Result<usize, ScreeningError> {
        let party_ids = self.parties.active_parties_for_applicant(applicant_id).await?;
        for party_id in &party_ids {
            self.notifier.applicant_reports_updated(party_id, applicant_id).await?;
        }
        Ok(party_ids.len())
    }
}

fn log_follow_up_failure(step: &'static str, report: &ApplicantReport, error: &ScreeningError) {
    warn!(
        event_name = "screening.response.follow_up_failed",
        correlation_id = %report.id,
        applicant_id = %report.applicant_id,
        step,
        retriable = error.is_retriable(),
        error = %error,
        "follow-up after vendor response failed"
    );
}
