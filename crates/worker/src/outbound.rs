//! Outbound seams: vendor submissions and party notifications.
//!
//! Transports live outside this workspace. The runtime wires the logging
//! implementations; tests wire the recording ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use leasecheck_core::domain::applicant::{ApplicantId, ApplicationData, PartyId, PropertyId, TenantId};
use leasecheck_core::domain::report::{ApplicantReportId, ReportKind};
use leasecheck_core::domain::tracking::{ReportRequestId, RequestType};

/// Message asking the vendor dispatch layer to run one report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicantReportRequest {
    pub tenant_id: TenantId,
    pub applicant_id: ApplicantId,
    pub report_kind: ReportKind,
    pub application_data: ApplicationData,
    pub report_id: ApplicantReportId,
    pub request_id: ReportRequestId,
    pub request_type: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<PropertyId>,
}

impl ApplicantReportRequest {
    /// Copy safe to persist as the raw request of the tracking row.
    pub fn masked(&self) -> Self {
        Self { application_data: self.application_data.masked(), ..self.clone() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("outbound transport failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait ReportRequestPublisher: Send + Sync {
    async fn publish(&self, request: &ApplicantReportRequest) -> Result<(), PublishError>;
}

#[async_trait]
pub trait ReportStatusNotifier: Send + Sync {
    async fn applicant_reports_updated(
        &self,
        party_id: &PartyId,
        applicant_id: &ApplicantId,
    ) -> Result<(), PublishError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl ReportRequestPublisher for LoggingPublisher {
    async fn publish(&self, request: &ApplicantReportRequest) -> Result<(), PublishError> {
        info!(
            event_name = "screening.request.published",
            correlation_id = %request.request_id.0,
            report_id = %request.report_id,
            applicant_id = %request.applicant_id,
            report_kind = request.report_kind.as_str(),
            request_type = request.request_type.as_str(),
            "applicant report request published"
        );
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl ReportStatusNotifier for LoggingNotifier {
    async fn applicant_reports_updated(
        &self,
        party_id: &PartyId,
        applicant_id: &ApplicantId,
    ) -> Result<(), PublishError> {
        info!(
            event_name = "screening.party.notified",
            correlation_id = %party_id,
            applicant_id = %applicant_id,
            "applicant reports updated"
        );
        Ok(())
    }
}

/// Keeps every published request in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<ApplicantReportRequest>>,
}

impl RecordingPublisher {
    pub async fn published(&self) -> Vec<ApplicantReportRequest> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl ReportRequestPublisher for RecordingPublisher {
    async fn publish(&self, request: &ApplicantReportRequest) -> Result<(), PublishError> {
        self.published.lock().await.push(request.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<(PartyId, ApplicantId)>>,
}

impl RecordingNotifier {
    pub async fn notifications(&self) -> Vec<(PartyId, ApplicantId)> {
        self.notifications.lock().await.clone()
    }
}

#[async_trait]
impl ReportStatusNotifier for RecordingNotifier {
    async fn applicant_reports_updated(
        &self,
        party_id: &PartyId,
        applicant_id: &ApplicantId,
    ) -> Result<(), PublishError> {
        self.notifications.lock().await.push((party_id.clone(), applicant_id.clone()));
        Ok(())
    }
}


/// Accepts the first `accepted` requests, then fails like a downed queue.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FlakyPublisher {
    accepted: usize,
    seen: Mutex<usize>,
}

#[cfg(test)]
impl FlakyPublisher {
    pub(crate) fn accepting(accepted: usize) -> Self {
        Self { accepted, seen: Mutex::new(0) }
    }
}

#[cfg(test)]
#[async_trait]
impl ReportRequestPublisher for FlakyPublisher {
    async fn publish(&self, _request: &ApplicantReportRequest) -> Result<(), PublishError> {
        let mut seen = self.seen.lock().await;
        *seen += 1;
        if *seen > self.accepted {
            return Err(PublishError::Transport("queue unavailable".to_string()));
        }
        Ok(())
    }
}
