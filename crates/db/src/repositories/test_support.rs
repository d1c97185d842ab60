use std::path::Path;

use chrono::{DateTime, Utc};

use leasecheck_core::domain::applicant::{ApplicantId, ApplicationData, PropertyId};
use leasecheck_core::domain::report::{ApplicantReport, ApplicantReportId, ReportKind, ReportStatus};
use leasecheck_core::domain::tracking::{
    ReportRequest, ReportRequestId, ReportResponse, ReportResponseId, RequestType,
    ScreeningResponseStatus, ServiceStatusMap,
};
use leasecheck_core::screening::ReportPlan;

use super::{RepositoryError, RequestDraft};
use crate::{connect_with_settings, migrations, DbPool};

pub(crate) async fn setup_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
    migrations::run_pending(&pool).await.expect("run migrations");
    pool
}

/// File-backed store so that several pooled connections share one database.
pub(crate) async fn setup_file_pool(dir: &Path, max_connections: u32) -> DbPool {
    let url = format!("sqlite://{}?mode=rwc", dir.join("leasecheck.db").display());
    let pool = connect_with_settings(&url, max_connections, 30).await.expect("connect file pool");
    migrations::run_pending(&pool).await.expect("run migrations");
    pool
}

/// Drafts a fixed submission for whichever report gets promoted.
pub(crate) struct FixedDraft {
    pub id: &'static str,
    pub at: &'static str,
}

impl RequestDraft for FixedDraft {
    fn draft(&self, report: &ApplicantReport) -> Result<ReportRequest, RepositoryError> {
        Ok(request(self.id, report, self.at))
    }
}

pub(crate) struct FailingDraft;

impl RequestDraft for FailingDraft {
    fn draft(&self, _report: &ApplicantReport) -> Result<ReportRequest, RepositoryError> {
        Err(RepositoryError::Encode("outbound payload rejected".to_string()))
    }
}

pub(crate) fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
}

pub(crate) fn application_data() -> ApplicationData {
    ApplicationData {
        first_name: "Dana".to_string(),
        last_name: "Reyes".to_string(),
        middle_name: None,
        email: Some("dana@example.com".to_string()),
        date_of_birth: Some("1990-04-12".to_string()),
        ssn: Some("***-**-6789".to_string()),
        address_line: Some("12 Harbor St".to_string()),
        city: Some("Portland".to_string()),
        state: Some("OR".to_string()),
        zip_code: Some("97201".to_string()),
        have_international_address: false,
        gross_income_monthly: None,
    }
}

pub(crate) fn report(
    id: &str,
    applicant: &str,
    kind: ReportKind,
    status: ReportStatus,
    created_at: &str,
) -> ApplicantReport {
    ApplicantReport {
        id: ApplicantReportId(id.to_string()),
        applicant_id: ApplicantId(applicant.to_string()),
        report_kind: kind,
        status,
        report_data: None,
        application_data: application_data(),
        property_id: Some(PropertyId("prop-1".to_string())),
        external_report_id: None,
        valid_until: None,
        obsoleted_by: None,
        completed_at: None,
        created_at: parse_ts(created_at),
        updated_at: parse_ts(created_at),
    }
}

pub(crate) fn plan(report: ApplicantReport, supersedes: Option<&str>, cancels: &[&str]) -> ReportPlan {
    ReportPlan {
        needs_submission: report.status == ReportStatus::Pending,
        report,
        supersedes: supersedes.map(|id| ApplicantReportId(id.to_string())),
        cancels: cancels.iter().map(|id| ApplicantReportId(id.to_string())).collect(),
    }
}

pub(crate) fn request(id: &str, report: &ApplicantReport, created_at: &str) -> ReportRequest {
    ReportRequest {
        id: ReportRequestId(id.to_string()),
        report_id: report.id.clone(),
        applicant_id: report.applicant_id.clone(),
        report_kind: report.report_kind,
        property_id: report.property_id.clone(),
        request_type: RequestType::New,
        raw_request: "{}".to_string(),
        is_obsolete: false,
        request_ended_at: None,
        created_at: parse_ts(created_at),
    }
}

pub(crate) fn response(
    id: &str,
    request_id: &str,
    status: ScreeningResponseStatus,
    service_status: ServiceStatusMap,
    created_at: &str,
) -> ReportResponse {
    ReportResponse {
        id: ReportResponseId(id.to_string()),
        request_id: ReportRequestId(request_id.to_string()),
        raw_response: format!("{{\"response\":\"{id}\"}}"),
        payload_fingerprint: format!("sha256:{id}"),
        status,
        service_status,
        blocked_reason: None,
        service_blocked_status: None,
        created_at: parse_ts(created_at),
    }
}
