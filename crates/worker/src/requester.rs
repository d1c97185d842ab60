use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use leasecheck_core::domain::applicant::{ApplicantId, ApplicationData, PropertyId, TenantId};
use leasecheck_core::domain::report::{ApplicantReport, ReportKind};
use leasecheck_core::domain::tracking::{ReportRequest, ReportRequestId, RequestType};
use leasecheck_core::screening::{NewReportRequest, ReportLifecycle};
use leasecheck_db::repositories::{
    ApplicantReportRepository, PartyRepository, RepositoryError, RequestDraft, Submission,
};

use crate::errors::ScreeningError;
use crate::outbound::{ApplicantReportRequest, ReportRequestPublisher};
use crate::party::report_required;

/// New or changed application data for one applicant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicantDataChange {
    pub applicant_id: ApplicantId,
    pub application_data: ApplicationData,
    #[serde(default)]
    pub property_id: Option<PropertyId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestOutcome {
    pub report: ApplicantReport,
    /// Submission made right away; `None` when the report is terminal or queued.
    pub submitted: Option<ReportRequest>,
}

pub struct ReportRequester {
    reports: Arc<dyn ApplicantReportRepository>,
    parties: Arc<dyn PartyRepository>,
    publisher: Arc<dyn ReportRequestPublisher>,
    lifecycle: ReportLifecycle,
    tenant_id: TenantId,
}

impl ReportRequester {
    pub fn new(
        reports: Arc<dyn ApplicantReportRepository>,
        parties: Arc<dyn PartyRepository>,
        publisher: Arc<dyn ReportRequestPublisher>,
        lifecycle: ReportLifecycle,
        tenant_id: TenantId,
    ) -> Self {
        Self { reports, parties, publisher, lifecycle, tenant_id }
    }

    pub fn lifecycle(&self) -> &ReportLifecycle {
        &self.lifecycle
    }

    /// Starts a new report of every kind for the applicant.
    pub async fn request_applicant_reports(
        &self,
        change: ApplicantDataChange,
        now: DateTime<Utc>,
    ) -> Result<Vec<RequestOutcome>, ScreeningError> {
        let mut outcomes = Vec::with_capacity(ReportKind::ALL.len());
        for kind in ReportKind::ALL {
            let required = report_required(self.parties.as_ref(), &change.applicant_id, kind).await?;
            let outcome = self
                .request_report(
                    NewReportRequest {
                        applicant_id: change.applicant_id.clone(),
                        report_kind: kind,
                        application_data: change.application_data.clone(),
                        property_id: change.property_id.clone(),
                        required,
                    },
                    now,
                )
                .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Creates the next report of the pair and submits whatever the pair can
    /// run now.
    pub async fn request_report(
        &self,
        request: NewReportRequest,
        now: DateTime<Utc>,
    ) -> Result<RequestOutcome, ScreeningError> {
        let applicant_id = request.applicant_id.clone();
        let kind = request.report_kind;

        let head = self.reports.chain_head(&applicant_id, kind).await?;
        let plan = self.lifecycle.plan_new_report(request, head.as_ref(), now);
        self.reports.create_report(&plan, now).await?;

        info!(
            event_name = "screening.report.created",
            correlation_id = %plan.report.id,
            applicant_id = %applicant_id,
            report_kind = kind.as_str(),
            status = plan.report.status.as_str(),
            superseded = plan.supersedes.is_some(),
            canceled = plan.cancels.len(),
            "applicant report created"
        );

        let submitted = if plan.needs_submission {
            self.promote_and_submit(&applicant_id, kind, now).await?
        } else {
            None
        };

        Ok(RequestOutcome { report: plan.report, submitted })
    }

    /// Promotes the queued report of the pair, if the pair has room, and
    /// submits it. The promotion and its tracking row commit together; only
    /// the publish happens afterwards.
    pub async fn promote_and_submit(
        &self,
        applicant_id: &ApplicantId,
        kind: ReportKind,
        now: DateTime<Utc>,
    ) -> Result<Option<ReportRequest>, ScreeningError> {
        let draft = self.draft(RequestType::New, now);
        match self.reports.promote_next_pending(applicant_id, kind, &draft, now).await? {
            Some(submission) => {
                self.publish(&submission).await?;
                Ok(Some(submission.request))
            }
            None => Ok(None),
        }
    }

    /// Records another submission of a report that is already COMPILING and
    /// hands it to the publisher. The tracking row is written first so a fast
    /// response always finds it.
    pub async fn submit(
        &self,
        report: &ApplicantReport,
        request_type: RequestType,
        now: DateTime<Utc>,
    ) -> Result<ReportRequest, ScreeningError> {
        let request = self.draft(request_type, now).draft(report)?;
        self.reports.record_request(&request).await?;

        let submission = Submission { report: report.clone(), request };
        self.publish(&submission).await?;
        Ok(submission.request)
    }

    pub fn draft(&self, request_type: RequestType, now: DateTime<Utc>) -> SubmissionDraft<'_> {
        SubmissionDraft { tenant_id: &self.tenant_id, request_type, now }
    }

    /// Sends a recorded submission to the vendor.
    pub async fn publish(&self, submission: &Submission) -> Result<(), ScreeningError> {
        let Submission { report, request } = submission;
        let outbound =
            outbound_request(&self.tenant_id, report, request.id.clone(), request.request_type);
        self.publisher.publish(&outbound).await?;

        info!(
            event_name = "screening.request.submitted",
            correlation_id = %request.id.0,
            report_id = %report.id,
            applicant_id = %report.applicant_id,
            report_kind = report.report_kind.as_str(),
            request_type = request.request_type.as_str(),
            "report submitted to vendor"
        );
        Ok(())
    }
}

/// Builds the tracking row of one vendor submission. The raw request stored
/// with it is the masked outbound message.
pub struct SubmissionDraft<'a> {
    tenant_id: &'a TenantId,
    request_type: RequestType,
    now: DateTime<Utc>,
}

impl RequestDraft for SubmissionDraft<'_> {
    fn draft(&self, report: &ApplicantReport) -> Result<ReportRequest, RepositoryError> {
        let request_id = ReportRequestId(Uuid::new_v4().to_string());
        let outbound = outbound_request(self.tenant_id, report, request_id, self.request_type);
        let raw_request = serde_json::to_string(&outbound.masked())
            .map_err(|error| RepositoryError::Encode(error.to_string()))?;

        Ok(ReportRequest {
            id: outbound.request_id,
            report_id: report.id.clone(),
            applicant_id: report.applicant_id.clone(),
            report_kind: report.report_kind,
            property_id: report.property_id.clone(),
            request_type: self.request_type,
            raw_request,
            is_obsolete: false,
            request_ended_at: None,
            created_at: self.now,
        })
    }
}

fn outbound_request(
    tenant_id: &TenantId,
    report: &ApplicantReport,
    request_id: ReportRequestId,
    request_type: RequestType,
) -> ApplicantReportRequest {
    ApplicantReportRequest {
        tenant_id: tenant_id.clone(),
        applicant_id: report.applicant_id.clone(),
        report_kind: report.report_kind,
        application_data: report.application_data.clone(),
        report_id: report.id.clone(),
        request_id,
        request_type,
        property_id: report.property_id.clone(),
    }
}
