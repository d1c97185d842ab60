//! Report lifecycle engine
//!
//! Pure state machine for applicant reports. It decides what a new report
//! looks like, which queued report gets promoted, and how a vendor response
//! resolves a report. Persistence applies these decisions atomically.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::applicant::{ApplicantId, ApplicationData, PropertyId};
use crate::domain::report::{
    ApplicantReport, ApplicantReportId, BlockedReason, ReportData, ReportKind, ReportStatus,
};
use crate::domain::tracking::ReportRequest;
use crate::errors::DomainError;
use crate::screening::classifier::{Classification, ErrorClass};
use crate::screening::report_data::build_report_data;
use crate::vendor::VendorResponse;

pub const DEFAULT_GRACE_PERIOD_DAYS: u32 = 30;
/// Custom record naming the vendor-side applicant a report was run for.
pub const SCREENING_APPLICANT_ID_RECORD: &str = "screeningApplicantId";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindGracePeriods {
    pub credit_days: Option<u32>,
    pub criminal_days: Option<u32>,
}

impl KindGracePeriods {
    pub fn days(&self, kind: ReportKind) -> Option<u32> {
        match kind {
            ReportKind::Credit => self.credit_days,
            ReportKind::Criminal => self.criminal_days,
        }
    }
}

/// Validity of completed reports: per-property days win over the global
/// per-kind days, which win over [`DEFAULT_GRACE_PERIOD_DAYS`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GracePeriods {
    pub defaults: KindGracePeriods,
    pub per_property: BTreeMap<PropertyId, KindGracePeriods>,
}

impl GracePeriods {
    pub fn days_for(&self, property_id: Option<&PropertyId>, kind: ReportKind) -> u32 {
        property_id
            .and_then(|property_id| self.per_property.get(property_id))
            .and_then(|overrides| overrides.days(kind))
            .or_else(|| self.defaults.days(kind))
            .unwrap_or(DEFAULT_GRACE_PERIOD_DAYS)
    }
}

#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    /// How long a submitted report may wait for the vendor before a newer
    /// report is allowed to replace it.
    pub vendor_api_timeout_minutes: u32,
    pub grace_periods: GracePeriods,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewReportRequest {
    pub applicant_id: ApplicantId,
    pub report_kind: ReportKind,
    pub application_data: ApplicationData,
    pub property_id: Option<PropertyId>,
    /// Whether any of the applicant's properties requires this kind.
    pub required: bool,
}

/// Current chain head of an (applicant, kind) pair with the time its latest
/// vendor submission was recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainHead {
    pub report: ApplicantReport,
    pub requested_at: Option<DateTime<Utc>>,
    /// The pair's COMPILING report. A queued head can sit on top of it, so it
    /// is not necessarily `report`.
    pub in_flight: Option<InFlight>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InFlight {
    pub report_id: ApplicantReportId,
    /// Latest request time, or the report's `updated_at` when none was recorded.
    pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportPlan {
    pub report: ApplicantReport,
    /// Previous chain head; it gets `obsoleted_by` pointing at the new report.
    pub supersedes: Option<ApplicantReportId>,
    /// Reports to cancel: a queued head, and the in-flight report once it is
    /// past its response window, whether or not it is still the head.
    pub cancels: Vec<ApplicantReportId>,
    pub needs_submission: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Promotion {
    pub promote: ApplicantReportId,
    pub cancel: Vec<ApplicantReportId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Termination {
    pub status: ReportStatus,
    pub report_data: ReportData,
    pub external_report_id: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Terminate(Termination),
    /// Expired vendor result; the same report goes back to the vendor.
    Resubmit,
    StillCompiling,
    /// The report already reached a terminal status; nothing changes.
    AlreadyResolved,
    /// The response belongs to a request that a newer one replaced.
    Stale,
}

impl Resolution {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Terminate(_) => "terminate",
            Self::Resubmit => "resubmit",
            Self::StillCompiling => "still_compiling",
            Self::AlreadyResolved => "already_resolved",
            Self::Stale => "stale",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReportLifecycle {
    config: LifecycleConfig,
}

impl ReportLifecycle {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn plan_new_report(
        &self,
        request: NewReportRequest,
        head: Option<&ChainHead>,
        now: DateTime<Utc>,
    ) -> ReportPlan {
        let (status, report_data, completed_at) = if !request.required {
            (ReportStatus::NotApplicable, None, None)
        } else if request.application_data.have_international_address {
            (ReportStatus::Completed, Some(ReportData::international_address()), Some(now))
        } else {
            (ReportStatus::Pending, None, None)
        };

        let report = ApplicantReport {
            id: ApplicantReportId(Uuid::new_v4().to_string()),
            applicant_id: request.applicant_id,
            report_kind: request.report_kind,
            status,
            report_data,
            application_data: request.application_data,
            property_id: request.property_id,
            external_report_id: None,
            valid_until: None,
            obsoleted_by: None,
            completed_at,
            created_at: now,
            updated_at: now,
        };

        let mut cancels = Vec::new();
        if let Some(head) = head {
            if head.report.status == ReportStatus::Pending {
                cancels.push(head.report.id.clone());
            }
            if let Some(in_flight) = &head.in_flight {
                if !self.is_within_response_window(in_flight, now) {
                    cancels.push(in_flight.report_id.clone());
                }
            }
        }

        ReportPlan {
            supersedes: head.map(|head| head.report.id.clone()),
            cancels,
            needs_submission: status == ReportStatus::Pending,
            report,
        }
    }

    pub fn is_within_response_window(&self, in_flight: &InFlight, now: DateTime<Utc>) -> bool {
        let window = Duration::minutes(i64::from(self.config.vendor_api_timeout_minutes));
        now - in_flight.submitted_at <= window
    }

    pub fn resolve_response(
        &self,
        report: &ApplicantReport,
        request: &ReportRequest,
        classification: &Classification,
        response: &VendorResponse,
        now: DateTime<Utc>,
    ) -> Resolution {
        if report.status.is_terminal() {
            return Resolution::AlreadyResolved;
        }
        if request.is_obsolete {
            return Resolution::Stale;
        }

        match classification {
            Classification::Complete { disputed: true } => {
                Resolution::Terminate(blocked(BlockedReason::Dispute, now))
            }
            Classification::Complete { disputed: false } => {
                let grace_days = self
                    .config
                    .grace_periods
                    .days_for(report.property_id.as_ref(), report.report_kind);
                let applicant = response.custom_record(SCREENING_APPLICANT_ID_RECORD);
                Resolution::Terminate(Termination {
                    status: ReportStatus::Completed,
                    report_data: build_report_data(report.report_kind, response, applicant),
                    external_report_id: response.document_reference().map(str::to_string),
                    valid_until: Some(now + Duration::days(i64::from(grace_days))),
                    completed_at: now,
                })
            }
            Classification::Error { class: ErrorClass::Expired } => Resolution::Resubmit,
            Classification::Error { class: ErrorClass::Address } => {
                Resolution::Terminate(blocked(BlockedReason::Address, now))
            }
            Classification::Error { class: ErrorClass::Unclassified } => {
                Resolution::Terminate(blocked(BlockedReason::Error, now))
            }
            Classification::Incomplete { credit_freeze: true } => {
                Resolution::Terminate(blocked(BlockedReason::CreditFreeze, now))
            }
            Classification::Incomplete { credit_freeze: false } => Resolution::StillCompiling,
        }
    }
}

/// Picks the most recent pending report and cancels the rest. Nothing is
/// promoted while another report of the pair is still compiling.
pub fn select_promotion(reports: &[ApplicantReport]) -> Option<Promotion> {
    if reports.iter().any(|report| report.status == ReportStatus::Compiling) {
        return None;
    }

    let mut pending: Vec<&ApplicantReport> =
        reports.iter().filter(|report| report.status == ReportStatus::Pending).collect();
    pending.sort_by(|left, right| right.created_at.cmp(&left.created_at));

    let (newest, rest) = pending.split_first()?;
    Some(Promotion {
        promote: newest.id.clone(),
        cancel: rest.iter().map(|report| report.id.clone()).collect(),
    })
}

pub fn can_transition(from: ReportStatus, to: ReportStatus) -> bool {
    use ReportStatus::*;

    match (from, to) {
        (Pending, Compiling) | (Compiling, Compiling) => true,
        (Pending | Compiling, Canceled) => true,
        (Compiling, Completed | BlockedAddress | BlockedCreditFreeze | BlockedDispute | Error) => {
            true
        }
        _ => false,
    }
}

pub fn ensure_transition(from: ReportStatus, to: ReportStatus) -> Result<(), DomainError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(DomainError::InvalidReportTransition { from, to })
    }
}

fn blocked(reason: BlockedReason, now: DateTime<Utc>) -> Termination {
    Termination {
        status: reason.report_status(),
        report_data: ReportData::blocked(reason),
        external_report_id: None,
        valid_until: None,
        completed_at: now,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::{
        can_transition, ensure_transition, select_promotion, ChainHead, GracePeriods, InFlight,
        KindGracePeriods, LifecycleConfig, NewReportRequest, ReportLifecycle, Resolution,
    };
    use crate::domain::applicant::{ApplicantId, ApplicationData, PropertyId};
    use crate::domain::report::{
        ApplicantReport, ApplicantReportId, BlockedReason, ReportData, ReportKind, ReportStatus,
    };
    use crate::domain::tracking::{ReportRequest, ReportRequestId, RequestType};
    use crate::errors::DomainError;
    use crate::screening::classifier::{classify, Classification, ErrorClass};
    use crate::vendor::VendorResponse;

    fn lifecycle() -> ReportLifecycle {
        ReportLifecycle::new(LifecycleConfig {
            vendor_api_timeout_minutes: 60,
            grace_periods: GracePeriods::default(),
        })
    }

    fn application(international: bool) -> ApplicationData {
        ApplicationData {
            first_name: "Ari".to_string(),
            last_name: "Lund".to_string(),
            middle_name: None,
            email: None,
            date_of_birth: None,
            ssn: Some("111-22-3333".to_string()),
            address_line: None,
            city: None,
            state: None,
            zip_code: None,
            have_international_address: international,
            gross_income_monthly: None,
        }
    }

    fn new_request(international: bool) -> NewReportRequest {
        NewReportRequest {
            applicant_id: ApplicantId("A-1".to_string()),
            report_kind: ReportKind::Credit,
            application_data: application(international),
            property_id: Some(PropertyId("P-1".to_string())),
            required: true,
        }
    }

    fn report(id: &str, status: ReportStatus, created_at: DateTime<Utc>) -> ApplicantReport {
        ApplicantReport {
            id: ApplicantReportId(id.to_string()),
            applicant_id: ApplicantId("A-1".to_string()),
            report_kind: ReportKind::Credit,
            status,
            report_data: None,
            application_data: application(false),
            property_id: Some(PropertyId("P-1".to_string())),
            external_report_id: None,
            valid_until: None,
            obsoleted_by: None,
            completed_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    fn request_for(report: &ApplicantReport, is_obsolete: bool) -> ReportRequest {
        ReportRequest {
            id: ReportRequestId("req-1".to_string()),
            report_id: report.id.clone(),
            applicant_id: report.applicant_id.clone(),
            report_kind: report.report_kind,
            property_id: report.property_id.clone(),
            request_type: RequestType::New,
            raw_request: "{}".to_string(),
            is_obsolete,
            request_ended_at: None,
            created_at: report.created_at,
        }
    }

    fn compiling_head(id: &str, submitted_at: DateTime<Utc>) -> ChainHead {
        ChainHead {
            report: report(id, ReportStatus::Compiling, submitted_at),
            requested_at: Some(submitted_at),
            in_flight: Some(InFlight {
                report_id: ApplicantReportId(id.to_string()),
                submitted_at,
            }),
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-18T12:00:00Z").expect("valid rfc3339").with_timezone(&Utc)
    }

    #[test]
    fn first_report_is_pending_and_needs_submission() {
        let plan = lifecycle().plan_new_report(new_request(false), None, now());
        assert_eq!(plan.report.status, ReportStatus::Pending);
        assert!(plan.needs_submission);
        assert_eq!(plan.supersedes, None);
        assert!(plan.cancels.is_empty());
    }

    #[test]
    fn international_address_completes_without_submission() {
        let plan = lifecycle().plan_new_report(new_request(true), None, now());
        assert_eq!(plan.report.status, ReportStatus::Completed);
        assert_eq!(plan.report.report_data, Some(ReportData::international_address()));
        assert_eq!(plan.report.completed_at, Some(now()));
        assert!(!plan.needs_submission);
    }

    #[test]
    fn kind_not_required_is_not_applicable() {
        let mut request = new_request(false);
        request.required = false;
        let plan = lifecycle().plan_new_report(request, None, now());
        assert_eq!(plan.report.status, ReportStatus::NotApplicable);
        assert!(!plan.needs_submission);
    }

    #[test]
    fn in_flight_report_within_window_is_left_alone() {
        let head = compiling_head("R-1", now() - Duration::minutes(20));
        let plan = lifecycle().plan_new_report(new_request(false), Some(&head), now());

        assert_eq!(plan.report.status, ReportStatus::Pending);
        assert_eq!(plan.supersedes, Some(ApplicantReportId("R-1".to_string())));
        assert!(plan.cancels.is_empty());
    }

    #[test]
    fn in_flight_report_past_window_is_canceled() {
        let head = compiling_head("R-1", now() - Duration::minutes(61));
        let plan = lifecycle().plan_new_report(new_request(false), Some(&head), now());
        assert_eq!(plan.cancels, vec![ApplicantReportId("R-1".to_string())]);
    }

    #[test]
    fn expired_in_flight_report_under_a_queued_head_is_canceled_too() {
        let head = ChainHead {
            report: report("R-2", ReportStatus::Pending, now() - Duration::hours(5)),
            requested_at: None,
            in_flight: Some(InFlight {
                report_id: ApplicantReportId("R-1".to_string()),
                submitted_at: now() - Duration::hours(5) - Duration::minutes(5),
            }),
        };
        let plan = lifecycle().plan_new_report(new_request(false), Some(&head), now());

        assert_eq!(plan.supersedes, Some(ApplicantReportId("R-2".to_string())));
        assert_eq!(
            plan.cancels,
            vec![ApplicantReportId("R-2".to_string()), ApplicantReportId("R-1".to_string())]
        );
    }

    #[test]
    fn in_flight_report_under_a_queued_head_within_window_survives() {
        let head = ChainHead {
            report: report("R-2", ReportStatus::Pending, now() - Duration::minutes(5)),
            requested_at: None,
            in_flight: Some(InFlight {
                report_id: ApplicantReportId("R-1".to_string()),
                submitted_at: now() - Duration::minutes(10),
            }),
        };
        let plan = lifecycle().plan_new_report(new_request(false), Some(&head), now());
        assert_eq!(plan.cancels, vec![ApplicantReportId("R-2".to_string())]);
    }

    #[test]
    fn queued_head_is_canceled_and_completed_head_only_superseded() {
        let pending = ChainHead {
            report: report("R-1", ReportStatus::Pending, now() - Duration::minutes(1)),
            requested_at: None,
            in_flight: None,
        };
        let plan = lifecycle().plan_new_report(new_request(false), Some(&pending), now());
        assert_eq!(plan.cancels, vec![ApplicantReportId("R-1".to_string())]);

        let completed = ChainHead {
            report: report("R-2", ReportStatus::Completed, now() - Duration::days(40)),
            requested_at: None,
            in_flight: None,
        };
        let plan = lifecycle().plan_new_report(new_request(false), Some(&completed), now());
        assert_eq!(plan.supersedes, Some(ApplicantReportId("R-2".to_string())));
        assert!(plan.cancels.is_empty());
    }

    #[test]
    fn promotion_picks_most_recent_pending_and_cancels_the_rest() {
        let reports = vec![
            report("R-1", ReportStatus::Pending, now() - Duration::minutes(3)),
            report("R-3", ReportStatus::Pending, now() - Duration::minutes(1)),
            report("R-2", ReportStatus::Pending, now() - Duration::minutes(2)),
            report("R-0", ReportStatus::Completed, now() - Duration::days(2)),
        ];
        let promotion = select_promotion(&reports).expect("promotion");
        assert_eq!(promotion.promote, ApplicantReportId("R-3".to_string()));
        assert_eq!(
            promotion.cancel,
            vec![ApplicantReportId("R-2".to_string()), ApplicantReportId("R-1".to_string())]
        );
    }

    #[test]
    fn promotion_waits_for_compiling_report() {
        let reports = vec![
            report("R-1", ReportStatus::Compiling, now() - Duration::minutes(3)),
            report("R-2", ReportStatus::Pending, now() - Duration::minutes(1)),
        ];
        assert_eq!(select_promotion(&reports), None);
        assert_eq!(select_promotion(&[]), None);
    }

    #[test]
    fn completed_response_sets_validity_from_grace_period() {
        let compiling = report("R-1", ReportStatus::Compiling, now());
        let response = VendorResponse {
            status: "COMPLETE".to_string(),
            report_id: Some("doc-1".to_string()),
            ..VendorResponse::default()
        };
        let resolution = lifecycle().resolve_response(
            &compiling,
            &request_for(&compiling, false),
            &classify(&response),
            &response,
            now(),
        );

        let Resolution::Terminate(termination) = resolution else {
            panic!("expected termination");
        };
        assert_eq!(termination.status, ReportStatus::Completed);
        assert_eq!(termination.external_report_id.as_deref(), Some("doc-1"));
        assert_eq!(termination.valid_until, Some(termination.completed_at + Duration::days(30)));
        assert!(matches!(termination.report_data, ReportData::Credit(_)));
    }

    #[test]
    fn grace_period_prefers_property_then_kind_then_default() {
        let mut grace = GracePeriods {
            defaults: KindGracePeriods { credit_days: Some(45), criminal_days: None },
            ..GracePeriods::default()
        };
        grace.per_property.insert(
            PropertyId("P-9".to_string()),
            KindGracePeriods { credit_days: None, criminal_days: Some(10) },
        );

        let p9 = PropertyId("P-9".to_string());
        assert_eq!(grace.days_for(Some(&p9), ReportKind::Criminal), 10);
        assert_eq!(grace.days_for(Some(&p9), ReportKind::Credit), 45);
        assert_eq!(grace.days_for(None, ReportKind::Criminal), 30);
    }

    #[test]
    fn dispute_terminates_without_document_reference() {
        let compiling = report("R-1", ReportStatus::Compiling, now());
        let response = VendorResponse {
            status: "COMPLETE".to_string(),
            application_decision: Some("DISPUTED".to_string()),
            report_id: Some("doc-1".to_string()),
            ..VendorResponse::default()
        };
        let resolution = lifecycle().resolve_response(
            &compiling,
            &request_for(&compiling, false),
            &classify(&response),
            &response,
            now(),
        );

        let Resolution::Terminate(termination) = resolution else {
            panic!("expected termination");
        };
        assert_eq!(termination.status, ReportStatus::BlockedDispute);
        assert_eq!(termination.report_data, ReportData::blocked(BlockedReason::Dispute));
        assert_eq!(termination.external_report_id, None);
        assert_eq!(termination.valid_until, None);
    }

    #[test]
    fn error_and_incomplete_outcomes() {
        let compiling = report("R-1", ReportStatus::Compiling, now());
        let request = request_for(&compiling, false);
        let response = VendorResponse::default();
        let engine = lifecycle();

        let expired = Classification::Error { class: ErrorClass::Expired };
        assert_eq!(
            engine.resolve_response(&compiling, &request, &expired, &response, now()),
            Resolution::Resubmit
        );

        let still = Classification::Incomplete { credit_freeze: false };
        assert_eq!(
            engine.resolve_response(&compiling, &request, &still, &response, now()),
            Resolution::StillCompiling
        );

        let frozen = Classification::Incomplete { credit_freeze: true };
        assert!(matches!(
            engine.resolve_response(&compiling, &request, &frozen, &response, now()),
            Resolution::Terminate(ref termination)
                if termination.status == ReportStatus::BlockedCreditFreeze
        ));

        let address = Classification::Error { class: ErrorClass::Address };
        assert!(matches!(
            engine.resolve_response(&compiling, &request, &address, &response, now()),
            Resolution::Terminate(ref termination)
                if termination.report_data == ReportData::blocked(BlockedReason::Address)
        ));
    }

    #[test]
    fn terminal_reports_and_obsolete_requests_are_not_touched() {
        let completed = report("R-1", ReportStatus::Completed, now());
        let engine = lifecycle();
        let complete = Classification::Complete { disputed: false };
        let response = VendorResponse::default();

        assert_eq!(
            engine.resolve_response(&completed, &request_for(&completed, false), &complete, &response, now()),
            Resolution::AlreadyResolved
        );

        let compiling = report("R-2", ReportStatus::Compiling, now());
        assert_eq!(
            engine.resolve_response(&compiling, &request_for(&compiling, true), &complete, &response, now()),
            Resolution::Stale
        );
    }

    #[test]
    fn transition_table_rejects_leaving_terminal_states() {
        assert!(can_transition(ReportStatus::Pending, ReportStatus::Compiling));
        assert!(can_transition(ReportStatus::Compiling, ReportStatus::BlockedDispute));
        assert!(!can_transition(ReportStatus::Pending, ReportStatus::Completed));
        assert_eq!(
            ensure_transition(ReportStatus::Completed, ReportStatus::Compiling),
            Err(DomainError::InvalidReportTransition {
                from: ReportStatus::Completed,
                to: ReportStatus::Compiling,
            })
        );
    }
}
