use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use leasecheck_core::domain::applicant::{ApplicantId, LeaseType, PartyId, PropertyId};
use leasecheck_core::domain::party::{
    Party, PartyMember, PropertyApplicationSettings, PublishedQuote, ScreeningCriteria,
};
use leasecheck_core::domain::report::{ApplicantReport, ApplicantReportId, ReportKind};
use leasecheck_core::domain::tracking::{ReportRequest, ReportRequestId, ReportResponse};
use leasecheck_core::screening::{ApplicantReportSnapshot, ChainHead, ReportPlan, Termination};

mod codec;
pub mod memory;
pub mod party;
pub mod reconciliation;
pub mod report;
#[cfg(test)]
mod test_support;

pub use memory::{InMemoryApplicantReportRepository, InMemoryPartyRepository};
pub use party::SqlPartyRepository;
pub use reconciliation::SqlReconciliationRepository;
pub use report::SqlApplicantReportRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}

/// Builds the tracking row for a report that is moving to COMPILING. The
/// store writes it in the same transaction as the promotion.
pub trait RequestDraft: Send + Sync {
    fn draft(&self, report: &ApplicantReport) -> Result<ReportRequest, RepositoryError>;
}

/// A report promoted to COMPILING together with its recorded submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub report: ApplicantReport,
    pub request: ReportRequest,
}

/// Report change applied together with a response audit row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportUpdate {
    Terminate(Termination),
    MarkCompiling,
    /// Audit only: stale, duplicate or resubmitted responses.
    Unchanged,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseApplication {
    pub response: ReportResponse,
    pub report_id: ApplicantReportId,
    pub applicant_id: ApplicantId,
    pub report_kind: ReportKind,
    pub update: ReportUpdate,
    pub now: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppliedResponse {
    /// The report left PENDING/COMPILING because of this response.
    pub transitioned: bool,
    /// Queued report moved to COMPILING in the same transaction, with its
    /// tracking row already written.
    pub promoted: Option<Submission>,
}

/// Creation-time window `[from, to]` of the requests a scan looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl ScanWindow {
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.from <= timestamp && timestamp <= self.to
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncompleteRequest {
    pub request: ReportRequest,
    pub latest_response: ReportResponse,
}

#[async_trait]
pub trait ApplicantReportRepository: Send + Sync {
    async fn find_report(
        &self,
        id: &ApplicantReportId,
    ) -> Result<Option<ApplicantReport>, RepositoryError>;

    async fn chain_head(
        &self,
        applicant_id: &ApplicantId,
        kind: ReportKind,
    ) -> Result<Option<ChainHead>, RepositoryError>;

    /// Every report of the pair, newest first.
    async fn list_reports(
        &self,
        applicant_id: &ApplicantId,
        kind: ReportKind,
    ) -> Result<Vec<ApplicantReport>, RepositoryError>;

    /// Inserts the planned report as the new chain head, supersedes the
    /// previous head and cancels the planned reports in one transaction.
    async fn create_report(
        &self,
        plan: &ReportPlan,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Moves the newest PENDING report of the pair to COMPILING unless a
    /// COMPILING report already exists, and records the drafted submission
    /// in the same transaction. Nothing changes when the draft fails.
    async fn promote_next_pending(
        &self,
        applicant_id: &ApplicantId,
        kind: ReportKind,
        draft: &dyn RequestDraft,
        now: DateTime<Utc>,
    ) -> Result<Option<Submission>, RepositoryError>;

    /// Records a submission and obsoletes every earlier submission of the
    /// pair.
    async fn record_request(&self, request: &ReportRequest) -> Result<(), RepositoryError>;

    async fn find_request(
        &self,
        id: &ReportRequestId,
    ) -> Result<Option<ReportRequest>, RepositoryError>;

    /// Records the response, applies the report update and promotes the
    /// next queued report of the pair, all in one transaction.
    async fn apply_response(
        &self,
        application: &ResponseApplication,
        draft: &dyn RequestDraft,
    ) -> Result<AppliedResponse, RepositoryError>;

    /// Responses recorded for a request, oldest first.
    async fn list_responses(
        &self,
        request_id: &ReportRequestId,
    ) -> Result<Vec<ReportResponse>, RepositoryError>;

    /// Chain heads of every kind for the applicant, each with the breakdown
    /// of its latest vendor response.
    async fn current_snapshots(
        &self,
        applicant_id: &ApplicantId,
    ) -> Result<Vec<ApplicantReportSnapshot>, RepositoryError>;
}

#[async_trait]
pub trait ReconciliationRepository: Send + Sync {
    /// Non-obsolete, non-reset requests created inside the window that never
    /// received a response.
    async fn orphaned_requests(
        &self,
        window: ScanWindow,
    ) -> Result<Vec<ReportRequest>, RepositoryError>;

    /// Non-obsolete, non-reset requests created inside the window whose latest
    /// response is not COMPLETE and was recorded before `responded_before`.
    async fn incomplete_requests(
        &self,
        window: ScanWindow,
        responded_before: DateTime<Utc>,
    ) -> Result<Vec<IncompleteRequest>, RepositoryError>;
}

#[async_trait]
pub trait PartyRepository: Send + Sync {
    async fn find_party(&self, id: &PartyId) -> Result<Option<Party>, RepositoryError>;

    async fn active_members(&self, party_id: &PartyId)
        -> Result<Vec<PartyMember>, RepositoryError>;

    async fn active_parties_for_applicant(
        &self,
        applicant_id: &ApplicantId,
    ) -> Result<Vec<PartyId>, RepositoryError>;

    /// Settings for each requested property, in request order. Properties
    /// without rows come back with empty settings.
    async fn application_settings(
        &self,
        property_ids: &[PropertyId],
    ) -> Result<Vec<PropertyApplicationSettings>, RepositoryError>;

    /// Active criteria of the given properties for one lease type.
    async fn screening_criteria(
        &self,
        property_ids: &[PropertyId],
        lease_type: LeaseType,
    ) -> Result<Vec<ScreeningCriteria>, RepositoryError>;

    async fn published_quotes(
        &self,
        party_id: &PartyId,
    ) -> Result<Vec<PublishedQuote>, RepositoryError>;

    async fn save_party(
        &self,
        party: &Party,
        members: &[PartyMember],
    ) -> Result<(), RepositoryError>;

    async fn save_application_settings(
        &self,
        settings: &PropertyApplicationSettings,
    ) -> Result<(), RepositoryError>;

    async fn save_screening_criteria(
        &self,
        criteria: &ScreeningCriteria,
    ) -> Result<(), RepositoryError>;

    async fn save_published_quote(
        &self,
        party_id: &PartyId,
        quote: &PublishedQuote,
    ) -> Result<(), RepositoryError>;
}
