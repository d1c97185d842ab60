use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use leasecheck_core::config::{ConfigError, ReconciliationConfig, ScreeningConfig};
use leasecheck_core::domain::applicant::ApplicantId;
use leasecheck_core::domain::report::{ApplicantReportId, ReportKind};
use leasecheck_core::domain::tracking::{
    all_services_completed, ReportRequest, ReportResponse, RequestType, ScreeningResponseStatus,
};
use leasecheck_db::repositories::{ReconciliationRepository, ScanWindow};

use crate::errors::ScreeningError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanSettings {
    pub min_age: Duration,
    pub max_age: Duration,
    /// Latest non-COMPLETE responses younger than this are still settling.
    pub min_orphaned_response_age: Duration,
}

impl ScanSettings {
    pub fn from_config(
        reconciliation: &ReconciliationConfig,
        screening: &ScreeningConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            min_age: Duration::hours(i64::from(reconciliation.min_age_hours)),
            max_age: Duration::hours(i64::from(reconciliation.max_age_hours)),
            min_orphaned_response_age: Duration::minutes(i64::from(
                screening.min_orphaned_response_age_minutes()?,
            )),
        })
    }

    /// `[now - max_age, now - min_age]`
    pub fn window(&self, now: DateTime<Utc>) -> ScanWindow {
        ScanWindow { from: now - self.max_age, to: now - self.min_age }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFinding {
    pub request_id: String,
    pub report_id: ApplicantReportId,
    pub applicant_id: ApplicantId,
    pub report_kind: ReportKind,
    pub request_type: RequestType,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_response_status: Option<ScreeningResponseStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_response_at: Option<DateTime<Utc>>,
}

impl RequestFinding {
    fn new(request: &ReportRequest, latest_response: Option<&ReportResponse>) -> Self {
        Self {
            request_id: request.id.0.clone(),
            report_id: request.report_id.clone(),
            applicant_id: request.applicant_id.clone(),
            report_kind: request.report_kind,
            request_type: request.request_type,
            created_at: request.created_at,
            latest_response_status: latest_response.map(|response| response.status),
            latest_response_at: latest_response.map(|response| response.created_at),
        }
    }
}

/// Advisory findings; acting on them is left to the operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub scanned_at: DateTime<Utc>,
    pub window_from: DateTime<Utc>,
    pub window_to: DateTime<Utc>,
    pub orphaned: Vec<RequestFinding>,
    pub orphaned_incomplete: Vec<RequestFinding>,
    /// Subset of `orphaned_incomplete` whose services all finished.
    pub stuck: Vec<RequestFinding>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty() && self.orphaned_incomplete.is_empty()
    }
}

pub struct ReconciliationScanner {
    repository: Arc<dyn ReconciliationRepository>,
    settings: ScanSettings,
}

impl ReconciliationScanner {
    pub fn new(repository: Arc<dyn ReconciliationRepository>, settings: ScanSettings) -> Self {
        Self { repository, settings }
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub async fn scan(&self, now: DateTime<Utc>) -> Result<ReconciliationReport, ScreeningError> {
        let window = self.settings.window(now);
        let responded_before = now - self.settings.min_orphaned_response_age;

        let orphaned: Vec<RequestFinding> = self
            .repository
            .orphaned_requests(window)
            .await?
            .iter()
            .map(|request| RequestFinding::new(request, None))
            .collect();

        let incomplete = self.repository.incomplete_requests(window, responded_before).await?;
        let stuck: Vec<RequestFinding> = incomplete
            .iter()
            .filter(|entry| all_services_completed(&entry.latest_response.service_status))
            .map(|entry| RequestFinding::new(&entry.request, Some(&entry.latest_response)))
            .collect();
        let orphaned_incomplete: Vec<RequestFinding> = incomplete
            .iter()
            .map(|entry| RequestFinding::new(&entry.request, Some(&entry.latest_response)))
            .collect();

        let report = ReconciliationReport {
            scanned_at: now,
            window_from: window.from,
            window_to: window.to,
            orphaned,
            orphaned_incomplete,
            stuck,
        };

        if report.is_clean() {
            info!(
                event_name = "screening.reconciliation.clean",
                correlation_id = "reconciliation",
                "no orphaned or stuck requests"
            );
        } else {
            warn!(
                event_name = "screening.reconciliation.findings",
                correlation_id = "reconciliation",
                orphaned = report.orphaned.len(),
                orphaned_incomplete = report.orphaned_incomplete.len(),
                stuck = report.stuck.len(),
                "reconciliation found requests needing attention"
            );
        }
        Ok(report)
    }
}
