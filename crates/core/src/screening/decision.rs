//! Party screening decision records.
//!
//! Joins each party member's current reports with the property application
//! settings and screening criteria into one decision record per property.
//! Everything here is pure; loading the inputs is the caller's job.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::applicant::{ApplicantId, ApplicationData, LeaseType, MemberType, PropertyId};
use crate::domain::party::{Party, PropertyApplicationSettings, PublishedQuote, ScreeningCriteria};
use crate::domain::report::{
    ApplicantReport, CreditReportData, CriminalReportData, ReportKind, ReportStatus,
};
use crate::domain::tracking::ServiceStatusMap;
use crate::screening::blocked_services::{service_error_flags, ServiceErrorFlags};

/// Chain-head report of one kind together with its latest vendor response
/// breakdown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicantReportSnapshot {
    pub report: ApplicantReport,
    pub service_status: Option<ServiceStatusMap>,
    pub service_blocked_status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartyApplicant {
    pub applicant_id: ApplicantId,
    pub member_type: MemberType,
    pub credit: Option<ApplicantReportSnapshot>,
    pub criminal: Option<ApplicantReportSnapshot>,
}

impl PartyApplicant {
    pub fn snapshot(&self, kind: ReportKind) -> Option<&ApplicantReportSnapshot> {
        match kind {
            ReportKind::Credit => self.credit.as_ref(),
            ReportKind::Criminal => self.criminal.as_ref(),
        }
    }

    fn application_data(&self) -> Option<&ApplicationData> {
        self.credit
            .as_ref()
            .or(self.criminal.as_ref())
            .map(|snapshot| &snapshot.report.application_data)
    }
}

#[derive(Clone, Debug)]
pub struct PartyScreeningInput {
    pub party: Party,
    pub applicants: Vec<PartyApplicant>,
    /// One entry per property the party is being screened for.
    pub settings: Vec<PropertyApplicationSettings>,
    pub criteria: Vec<ScreeningCriteria>,
    pub quotes: Vec<PublishedQuote>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyScreeningDecision {
    pub decision_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<PropertyId>,
    pub applicants: Vec<ApplicantScreeningData>,
    pub quotes: Vec<PublishedQuote>,
    pub criteria: Option<Map<String, Value>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatusFlags {
    pub has_completed_credit_report: Option<bool>,
    pub has_completed_criminal_report: Option<bool>,
    pub has_compiling_credit_report: Option<bool>,
    pub has_compiling_criminal_report: Option<bool>,
    pub has_pending_credit_report: Option<bool>,
    pub has_pending_criminal_report: Option<bool>,
    pub has_credit_freeze: Option<bool>,
    pub has_disputed_credit_report: Option<bool>,
    pub has_disputed_criminal_report: Option<bool>,
    pub has_address_errored_credit_report: Option<bool>,
    pub has_address_errored_criminal_report: Option<bool>,
    pub has_errored_credit_report: Option<bool>,
    pub has_errored_criminal_report: Option<bool>,
    pub has_expired_credit_report: Option<bool>,
    pub has_expired_criminal_report: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicantScreeningData {
    pub member_type: String,
    pub applicant_id: ApplicantId,
    pub credit_status: ReportStatus,
    pub criminal_status: ReportStatus,
    #[serde(flatten)]
    pub status_flags: ReportStatusFlags,
    pub has_international_address: Option<bool>,
    pub monthly_income: Option<Decimal>,
    #[serde(flatten)]
    pub credit: CreditReportData,
    #[serde(flatten)]
    pub criminal: CriminalReportData,
    #[serde(flatten)]
    pub credit_service_errors: ServiceErrorFlags,
    #[serde(flatten)]
    pub criminal_service_errors: ServiceErrorFlags,
}

pub fn build_party_decisions(
    input: &PartyScreeningInput,
    now: DateTime<Utc>,
) -> Vec<PartyScreeningDecision> {
    let lease_type = input.party.lease_type;

    input
        .settings
        .iter()
        .map(|settings| PartyScreeningDecision {
            decision_id: Uuid::new_v4().to_string(),
            property_id: settings.property_id.clone(),
            applicants: input
                .applicants
                .iter()
                .map(|applicant| applicant_screening_data(applicant, settings, lease_type, now))
                .collect(),
            quotes: quotes_for(settings.property_id.as_ref(), &input.quotes),
            criteria: criteria_for(settings.property_id.as_ref(), lease_type, &input.criteria),
        })
        .collect()
}

/// Status shown for one kind: NOT_APPLICABLE when the settings do not require
/// it, else the report status, PENDING when no report exists yet.
pub fn applicant_report_status(
    snapshot: Option<&ApplicantReportSnapshot>,
    required: bool,
) -> ReportStatus {
    if !required {
        return ReportStatus::NotApplicable;
    }
    snapshot.map(|snapshot| snapshot.report.status).unwrap_or(ReportStatus::Pending)
}

fn applicant_screening_data(
    applicant: &PartyApplicant,
    settings: &PropertyApplicationSettings,
    lease_type: LeaseType,
    now: DateTime<Utc>,
) -> ApplicantScreeningData {
    let requirements = settings.requirements(lease_type, applicant.member_type);
    let credit_status = applicant_report_status(
        applicant.credit.as_ref(),
        requirements.requires(ReportKind::Credit),
    );
    let criminal_status = applicant_report_status(
        applicant.criminal.as_ref(),
        requirements.requires(ReportKind::Criminal),
    );
    let application_data = applicant.application_data();

    ApplicantScreeningData {
        member_type: applicant.member_type.as_str().to_ascii_lowercase(),
        applicant_id: applicant.applicant_id.clone(),
        credit_status,
        criminal_status,
        status_flags: status_flags(applicant, credit_status, criminal_status, now),
        has_international_address: application_data
            .filter(|data| data.have_international_address)
            .map(|_| true),
        monthly_income: application_data.and_then(|data| data.gross_income_monthly),
        credit: applicable_data(applicant.credit.as_ref(), credit_status)
            .and_then(|report| report.report_data.as_ref())
            .and_then(|data| data.credit())
            .cloned()
            .unwrap_or_default(),
        criminal: applicable_data(applicant.criminal.as_ref(), criminal_status)
            .and_then(|report| report.report_data.as_ref())
            .and_then(|data| data.criminal())
            .cloned()
            .unwrap_or_default(),
        credit_service_errors: snapshot_service_errors(ReportKind::Credit, applicant.credit.as_ref()),
        criminal_service_errors: snapshot_service_errors(
            ReportKind::Criminal,
            applicant.criminal.as_ref(),
        ),
    }
}

fn status_flags(
    applicant: &PartyApplicant,
    credit: ReportStatus,
    criminal: ReportStatus,
    now: DateTime<Utc>,
) -> ReportStatusFlags {
    ReportStatusFlags {
        has_completed_credit_report: has_status(credit, ReportStatus::Completed),
        has_completed_criminal_report: has_status(criminal, ReportStatus::Completed),
        has_compiling_credit_report: has_status(credit, ReportStatus::Compiling),
        has_compiling_criminal_report: has_status(criminal, ReportStatus::Compiling),
        has_pending_credit_report: has_status(credit, ReportStatus::Pending),
        has_pending_criminal_report: has_status(criminal, ReportStatus::Pending),
        has_credit_freeze: has_status(credit, ReportStatus::BlockedCreditFreeze),
        has_disputed_credit_report: has_status(credit, ReportStatus::BlockedDispute),
        has_disputed_criminal_report: has_status(criminal, ReportStatus::BlockedDispute),
        has_address_errored_credit_report: has_status(credit, ReportStatus::BlockedAddress),
        has_address_errored_criminal_report: has_status(criminal, ReportStatus::BlockedAddress),
        has_errored_credit_report: has_status(credit, ReportStatus::Error),
        has_errored_criminal_report: has_status(criminal, ReportStatus::Error),
        has_expired_credit_report: has_expired(applicant.credit.as_ref(), credit, now),
        has_expired_criminal_report: has_expired(applicant.criminal.as_ref(), criminal, now),
    }
}

fn has_status(status: ReportStatus, expected: ReportStatus) -> Option<bool> {
    (status != ReportStatus::NotApplicable).then_some(status == expected)
}

fn has_expired(
    snapshot: Option<&ApplicantReportSnapshot>,
    status: ReportStatus,
    now: DateTime<Utc>,
) -> Option<bool> {
    if status == ReportStatus::NotApplicable {
        return None;
    }
    snapshot.map(|snapshot| snapshot.report.is_expired(now))
}

fn applicable_data(
    snapshot: Option<&ApplicantReportSnapshot>,
    status: ReportStatus,
) -> Option<&ApplicantReport> {
    (status != ReportStatus::NotApplicable)
        .then_some(snapshot)
        .flatten()
        .map(|snapshot| &snapshot.report)
}

fn snapshot_service_errors(
    kind: ReportKind,
    snapshot: Option<&ApplicantReportSnapshot>,
) -> ServiceErrorFlags {
    service_error_flags(
        kind,
        snapshot.and_then(|snapshot| snapshot.service_status.as_ref()),
        snapshot.and_then(|snapshot| snapshot.service_blocked_status.as_deref()),
    )
}

fn quotes_for(property_id: Option<&PropertyId>, quotes: &[PublishedQuote]) -> Vec<PublishedQuote> {
    quotes.iter().filter(|quote| Some(&quote.property_id) == property_id).cloned().collect()
}

fn criteria_for(
    property_id: Option<&PropertyId>,
    lease_type: LeaseType,
    criteria: &[ScreeningCriteria],
) -> Option<Map<String, Value>> {
    criteria
        .iter()
        .find(|criteria| {
            Some(&criteria.property_id) == property_id && criteria.lease_type == lease_type
        })
        .map(ScreeningCriteria::decision_view)
}
