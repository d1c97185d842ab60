use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use leasecheck_core::domain::applicant::{ApplicantId, LeaseType, PartyId, PropertyId};
use leasecheck_core::domain::party::{
    Party, PartyMember, PropertyApplicationSettings, PublishedQuote, ScreeningCriteria,
};
use leasecheck_core::domain::report::{
    ApplicantReport, ApplicantReportId, ReportKind, ReportStatus,
};
use leasecheck_core::domain::tracking::{ReportRequest, ReportRequestId, ReportResponse};
use leasecheck_core::screening::lifecycle::select_promotion;
use leasecheck_core::screening::{ApplicantReportSnapshot, ChainHead, InFlight, ReportPlan};

use super::{
    AppliedResponse, ApplicantReportRepository, PartyRepository, RepositoryError, ReportUpdate,
    RequestDraft, ResponseApplication, Submission,
};

/// Multi-step writes run against a clone that replaces the tables only when
/// every step succeeded.
#[derive(Clone, Default)]
struct ReportTables {
    /// Insertion order doubles as the row id tie-breaker.
    reports: Vec<ApplicantReport>,
    requests: Vec<ReportRequest>,
    responses: Vec<ReportResponse>,
}

impl ReportTables {
    fn report_mut(&mut self, id: &ApplicantReportId) -> Option<&mut ApplicantReport> {
        self.reports.iter_mut().find(|report| &report.id == id)
    }

    /// Reports of the pair, newest first.
    fn pair(&self, applicant_id: &ApplicantId, kind: ReportKind) -> Vec<ApplicantReport> {
        let mut reports: Vec<(usize, &ApplicantReport)> = self
            .reports
            .iter()
            .enumerate()
            .filter(|(_, report)| &report.applicant_id == applicant_id && report.report_kind == kind)
            .collect();
        reports.sort_by(|(left_idx, left), (right_idx, right)| {
            (right.created_at, right_idx).cmp(&(left.created_at, left_idx))
        });
        reports.into_iter().map(|(_, report)| report.clone()).collect()
    }

    fn requested_at(&self, report_id: &ApplicantReportId) -> Option<DateTime<Utc>> {
        self.requests
            .iter()
            .filter(|request| &request.report_id == report_id)
            .map(|request| request.created_at)
            .max()
    }

    fn insert_request(&mut self, request: &ReportRequest) {
        for earlier in self.requests.iter_mut().filter(|earlier| {
            earlier.applicant_id == request.applicant_id
                && earlier.report_kind == request.report_kind
                && earlier.id != request.id
        }) {
            earlier.is_obsolete = true;
        }
        self.requests.push(request.clone());
    }

    fn latest_response_for_report(&self, report_id: &ApplicantReportId) -> Option<&ReportResponse> {
        self.responses
            .iter()
            .enumerate()
            .filter(|(_, response)| {
                self.requests.iter().any(|request| {
                    request.id == response.request_id && &request.report_id == report_id
                })
            })
            .max_by_key(|(idx, response)| (response.created_at, *idx))
            .map(|(_, response)| response)
    }

    fn promote(
        &mut self,
        applicant_id: &ApplicantId,
        kind: ReportKind,
        draft: &dyn RequestDraft,
        now: DateTime<Utc>,
    ) -> Result<Option<Submission>, RepositoryError> {
        let Some(promotion) = select_promotion(&self.pair(applicant_id, kind)) else {
            return Ok(None);
        };

        for canceled in &promotion.cancel {
            if let Some(report) = self.report_mut(canceled) {
                report.status = ReportStatus::Canceled;
                report.obsoleted_by = Some(promotion.promote.clone());
                report.updated_at = now;
            }
        }

        let Some(promoted) = self.report_mut(&promotion.promote) else {
            return Ok(None);
        };
        promoted.status = ReportStatus::Compiling;
        promoted.updated_at = now;
        let report = promoted.clone();

        let request = draft.draft(&report)?;
        self.insert_request(&request);
        Ok(Some(Submission { report, request }))
    }
}

#[derive(Default)]
pub struct InMemoryApplicantReportRepository {
    tables: RwLock<ReportTables>,
}

#[async_trait::async_trait]
impl ApplicantReportRepository for InMemoryApplicantReportRepository {
    async fn find_report(
        &self,
        id: &ApplicantReportId,
    ) -> Result<Option<ApplicantReport>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.reports.iter().find(|report| &report.id == id).cloned())
    }

    async fn chain_head(
        &self,
        applicant_id: &ApplicantId,
        kind: ReportKind,
    ) -> Result<Option<ChainHead>, RepositoryError> {
        let tables = self.tables.read().await;
        let head = tables.pair(applicant_id, kind).into_iter().find(|report| report.is_chain_head());
        let Some(report) = head else {
            return Ok(None);
        };

        let in_flight = tables
            .pair(applicant_id, kind)
            .into_iter()
            .find(|report| report.status == ReportStatus::Compiling)
            .map(|compiling| InFlight {
                submitted_at: tables.requested_at(&compiling.id).unwrap_or(compiling.updated_at),
                report_id: compiling.id,
            });
        let requested_at = tables.requested_at(&report.id);
        Ok(Some(ChainHead { report, requested_at, in_flight }))
    }

    async fn list_reports(
        &self,
        applicant_id: &ApplicantId,
        kind: ReportKind,
    ) -> Result<Vec<ApplicantReport>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.pair(applicant_id, kind))
    }

    async fn create_report(
        &self,
        plan: &ReportPlan,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let report = &plan.report;

        for head in tables.reports.iter_mut().filter(|existing| {
            existing.applicant_id == report.applicant_id
                && existing.report_kind == report.report_kind
                && existing.is_chain_head()
        }) {
            head.obsoleted_by = Some(report.id.clone());
            if head.status == ReportStatus::Pending {
                head.status = ReportStatus::Canceled;
            }
            head.updated_at = now;
        }

        for canceled in &plan.cancels {
            if let Some(stale) = tables.report_mut(canceled) {
                if stale.status.is_active() {
                    stale.status = ReportStatus::Canceled;
                    stale.obsoleted_by.get_or_insert_with(|| report.id.clone());
                    stale.updated_at = now;
                }
            }
            for request in tables
                .requests
                .iter_mut()
                .filter(|request| &request.report_id == canceled && !request.is_obsolete)
            {
                request.is_obsolete = true;
                request.request_ended_at.get_or_insert(now);
            }
        }

        let mut inserted = report.clone();
        inserted.obsoleted_by = None;
        tables.reports.push(inserted);
        Ok(())
    }

    async fn promote_next_pending(
        &self,
        applicant_id: &ApplicantId,
        kind: ReportKind,
        draft: &dyn RequestDraft,
        now: DateTime<Utc>,
    ) -> Result<Option<Submission>, RepositoryError> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let promoted = staged.promote(applicant_id, kind, draft, now)?;
        *tables = staged;
        Ok(promoted)
    }

    async fn record_request(&self, request: &ReportRequest) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.insert_request(request);
        Ok(())
    }

    async fn find_request(
        &self,
        id: &ReportRequestId,
    ) -> Result<Option<ReportRequest>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.requests.iter().find(|request| &request.id == id).cloned())
    }

    async fn apply_response(
        &self,
        application: &ResponseApplication,
        draft: &dyn RequestDraft,
    ) -> Result<AppliedResponse, RepositoryError> {
        let mut guard = self.tables.write().await;
        let mut tables = guard.clone();
        let now = application.now;
        tables.responses.push(application.response.clone());

        let transitioned = match &application.update {
            ReportUpdate::Terminate(termination) => {
                let transitioned = match tables.report_mut(&application.report_id) {
                    Some(report) if report.status.is_active() => {
                        report.status = termination.status;
                        report.report_data = Some(termination.report_data.clone());
                        report.external_report_id = termination.external_report_id.clone();
                        report.valid_until = termination.valid_until;
                        report.completed_at = Some(termination.completed_at);
                        report.updated_at = now;
                        true
                    }
                    _ => false,
                };
                if transitioned {
                    if let Some(request) = tables
                        .requests
                        .iter_mut()
                        .find(|request| request.id == application.response.request_id)
                    {
                        request.request_ended_at.get_or_insert(now);
                    }
                }
                transitioned
            }
            ReportUpdate::MarkCompiling => {
                if let Some(report) = tables.report_mut(&application.report_id) {
                    if report.status.is_active() {
                        report.status = ReportStatus::Compiling;
                        report.updated_at = now;
                    }
                }
                false
            }
            ReportUpdate::Unchanged => false,
        };

        let promoted =
            tables.promote(&application.applicant_id, application.report_kind, draft, now)?;
        *guard = tables;
        Ok(AppliedResponse { transitioned, promoted })
    }

    async fn list_responses(
        &self,
        request_id: &ReportRequestId,
    ) -> Result<Vec<ReportResponse>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut responses: Vec<ReportResponse> = tables
            .responses
            .iter()
            .filter(|response| &response.request_id == request_id)
            .cloned()
            .collect();
        responses.sort_by_key(|response| response.created_at);
        Ok(responses)
    }

    async fn current_snapshots(
        &self,
        applicant_id: &ApplicantId,
    ) -> Result<Vec<ApplicantReportSnapshot>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut snapshots: Vec<ApplicantReportSnapshot> = tables
            .reports
            .iter()
            .filter(|report| &report.applicant_id == applicant_id && report.is_chain_head())
            .map(|report| {
                let latest = tables.latest_response_for_report(&report.id);
                ApplicantReportSnapshot {
                    report: report.clone(),
                    service_status: latest.map(|response| response.service_status.clone()),
                    service_blocked_status: latest
                        .and_then(|response| response.service_blocked_status.clone()),
                }
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.report.report_kind);
        Ok(snapshots)
    }
}

#[derive(Default)]
pub struct InMemoryPartyRepository {
    parties: RwLock<HashMap<String, Party>>,
    /// Members with their active flag, in insertion order.
    members: RwLock<Vec<(PartyMember, bool)>>,
    settings: RwLock<HashMap<String, PropertyApplicationSettings>>,
    criteria: RwLock<HashMap<(String, LeaseType), ScreeningCriteria>>,
    quotes: RwLock<Vec<(PartyId, PublishedQuote)>>,
}

#[async_trait::async_trait]
impl PartyRepository for InMemoryPartyRepository {
    async fn find_party(&self, id: &PartyId) -> Result<Option<Party>, RepositoryError> {
        let parties = self.parties.read().await;
        Ok(parties.get(&id.0).cloned())
    }

    async fn active_members(
        &self,
        party_id: &PartyId,
    ) -> Result<Vec<PartyMember>, RepositoryError> {
        let members = self.members.read().await;
        Ok(members
            .iter()
            .filter(|(member, active)| *active && &member.party_id == party_id)
            .map(|(member, _)| member.clone())
            .collect())
    }

    async fn active_parties_for_applicant(
        &self,
        applicant_id: &ApplicantId,
    ) -> Result<Vec<PartyId>, RepositoryError> {
        let parties = self.parties.read().await;
        let members = self.members.read().await;
        let mut ids: Vec<PartyId> = members
            .iter()
            .filter(|(member, active)| *active && &member.applicant_id == applicant_id)
            .filter(|(member, _)| {
                parties.get(&member.party_id.0).map(|party| party.is_active).unwrap_or(false)
            })
            .map(|(member, _)| member.party_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn application_settings(
        &self,
        property_ids: &[PropertyId],
    ) -> Result<Vec<PropertyApplicationSettings>, RepositoryError> {
        let settings = self.settings.read().await;
        Ok(property_ids
            .iter()
            .map(|property_id| {
                settings
                    .get(&property_id.0)
                    .cloned()
                    .unwrap_or_else(|| PropertyApplicationSettings::new(property_id.clone()))
            })
            .collect())
    }

    async fn screening_criteria(
        &self,
        property_ids: &[PropertyId],
        lease_type: LeaseType,
    ) -> Result<Vec<ScreeningCriteria>, RepositoryError> {
        let criteria = self.criteria.read().await;
        Ok(property_ids
            .iter()
            .filter_map(|property_id| criteria.get(&(property_id.0.clone(), lease_type)).cloned())
            .collect())
    }

    async fn published_quotes(
        &self,
        party_id: &PartyId,
    ) -> Result<Vec<PublishedQuote>, RepositoryError> {
        let quotes = self.quotes.read().await;
        Ok(quotes
            .iter()
            .filter(|(owner, _)| owner == party_id)
            .map(|(_, quote)| quote.clone())
            .collect())
    }

    async fn save_party(
        &self,
        party: &Party,
        members: &[PartyMember],
    ) -> Result<(), RepositoryError> {
        self.parties.write().await.insert(party.id.0.clone(), party.clone());

        let mut stored = self.members.write().await;
        stored.retain(|(member, _)| member.party_id != party.id);
        stored.extend(members.iter().map(|member| {
            (PartyMember { party_id: party.id.clone(), ..member.clone() }, true)
        }));
        Ok(())
    }

    async fn save_application_settings(
        &self,
        settings: &PropertyApplicationSettings,
    ) -> Result<(), RepositoryError> {
        let property_id = settings.property_id.as_ref().ok_or_else(|| {
            RepositoryError::Decode("application settings need a property id".to_string())
        })?;
        let mut stored = self.settings.write().await;
        let entry = stored
            .entry(property_id.0.clone())
            .or_insert_with(|| PropertyApplicationSettings::new(property_id.clone()));
        for (lease_type, by_member) in &settings.settings {
            for (member_type, requirements) in by_member {
                entry.settings.entry(*lease_type).or_default().insert(*member_type, *requirements);
            }
        }
        Ok(())
    }

    async fn save_screening_criteria(
        &self,
        criteria: &ScreeningCriteria,
    ) -> Result<(), RepositoryError> {
        let mut stored = self.criteria.write().await;
        stored.insert((criteria.property_id.0.clone(), criteria.lease_type), criteria.clone());
        Ok(())
    }

    async fn save_published_quote(
        &self,
        party_id: &PartyId,
        quote: &PublishedQuote,
    ) -> Result<(), RepositoryError> {
        let mut stored = self.quotes.write().await;
        stored.retain(|(_, existing)| existing.quote_id != quote.quote_id);
        stored.push((party_id.clone(), quote.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use leasecheck_core::domain::applicant::{ApplicantId, PropertyId};
    use leasecheck_core::domain::report::{ApplicantReportId, ReportKind, ReportStatus};
    use leasecheck_core::domain::tracking::ReportRequestId;
    use leasecheck_core::screening::{
        GracePeriods, LifecycleConfig, NewReportRequest, ReportLifecycle,
    };

    use super::InMemoryApplicantReportRepository;
    use crate::repositories::test_support::{
        application_data, parse_ts, plan, report, request, FailingDraft, FixedDraft,
    };
    use crate::repositories::{ApplicantReportRepository, RepositoryError};

    fn applicant() -> ApplicantId {
        ApplicantId("app-1".to_string())
    }

    async fn request_credit(repo: &InMemoryApplicantReportRepository, at: &str) -> ApplicantReportId {
        let lifecycle = ReportLifecycle::new(LifecycleConfig {
            vendor_api_timeout_minutes: 60,
            grace_periods: GracePeriods::default(),
        });
        let head = repo.chain_head(&applicant(), ReportKind::Credit).await.expect("load head");
        let plan = lifecycle.plan_new_report(
            NewReportRequest {
                applicant_id: applicant(),
                report_kind: ReportKind::Credit,
                application_data: application_data(),
                property_id: Some(PropertyId("prop-1".to_string())),
                required: true,
            },
            head.as_ref(),
            parse_ts(at),
        );
        repo.create_report(&plan, parse_ts(at)).await.expect("create report");
        plan.report.id
    }

    async fn status_of(repo: &InMemoryApplicantReportRepository, id: &ApplicantReportId) -> ReportStatus {
        repo.find_report(id).await.expect("find report").expect("report exists").status
    }

    #[tokio::test]
    async fn in_memory_promotion_matches_sql_semantics() {
        let repo = InMemoryApplicantReportRepository::default();
        let applicant = applicant();
        let first =
            report("rep-1", "app-1", ReportKind::Credit, ReportStatus::Compiling, "2026-03-01T10:00:00Z");
        repo.create_report(&plan(first.clone(), None, &[]), parse_ts("2026-03-01T10:00:00Z"))
            .await
            .expect("create first");
        repo.record_request(&request("req-1", &first, "2026-03-01T10:00:01Z"))
            .await
            .expect("record request");

        let queued =
            report("rep-2", "app-1", ReportKind::Credit, ReportStatus::Pending, "2026-03-01T10:05:00Z");
        repo.create_report(&plan(queued, Some("rep-1"), &[]), parse_ts("2026-03-01T10:05:00Z"))
            .await
            .expect("create queued");

        let none = repo
            .promote_next_pending(
                &applicant,
                ReportKind::Credit,
                &FixedDraft { id: "req-2", at: "2026-03-01T10:05:01Z" },
                parse_ts("2026-03-01T10:05:01Z"),
            )
            .await
            .expect("attempt promotion");
        assert_eq!(none, None);

        let head = repo
            .chain_head(&applicant, ReportKind::Credit)
            .await
            .expect("load head")
            .expect("head exists");
        assert_eq!(head.report.id.0, "rep-2");
        assert_eq!(
            head.in_flight.map(|in_flight| (in_flight.report_id.0, in_flight.submitted_at)),
            Some(("rep-1".to_string(), parse_ts("2026-03-01T10:00:01Z")))
        );

        let superseded = repo.list_reports(&applicant, ReportKind::Credit).await.expect("list");
        assert_eq!(superseded[1].status, ReportStatus::Compiling);
        assert_eq!(superseded[1].obsoleted_by.as_ref().map(|id| id.0.as_str()), Some("rep-2"));
    }

    #[tokio::test]
    async fn expired_in_flight_report_below_a_queued_head_is_canceled() {
        let repo = InMemoryApplicantReportRepository::default();

        let first = request_credit(&repo, "2026-03-01T10:00:00Z").await;
        repo.promote_next_pending(
            &applicant(),
            ReportKind::Credit,
            &FixedDraft { id: "req-1", at: "2026-03-01T10:00:00Z" },
            parse_ts("2026-03-01T10:00:00Z"),
        )
        .await
        .expect("promote first")
        .expect("first promoted");
        let second = request_credit(&repo, "2026-03-01T10:05:00Z").await;
        let third = request_credit(&repo, "2026-03-01T15:05:00Z").await;

        assert_eq!(status_of(&repo, &first).await, ReportStatus::Canceled);
        assert_eq!(status_of(&repo, &second).await, ReportStatus::Canceled);
        let closed = repo
            .find_request(&ReportRequestId("req-1".to_string()))
            .await
            .expect("find request")
            .expect("request exists");
        assert!(closed.is_obsolete);

        let promoted = repo
            .promote_next_pending(
                &applicant(),
                ReportKind::Credit,
                &FixedDraft { id: "req-3", at: "2026-03-01T15:05:00Z" },
                parse_ts("2026-03-01T15:05:00Z"),
            )
            .await
            .expect("promote third")
            .expect("third promoted");
        assert_eq!(promoted.report.id, third);
    }

    #[tokio::test]
    async fn failed_draft_changes_nothing() {
        let repo = InMemoryApplicantReportRepository::default();
        let queued =
            report("rep-1", "app-1", ReportKind::Credit, ReportStatus::Pending, "2026-03-01T10:00:00Z");
        repo.create_report(&plan(queued.clone(), None, &[]), parse_ts("2026-03-01T10:00:00Z"))
            .await
            .expect("create report");

        let error = repo
            .promote_next_pending(
                &applicant(),
                ReportKind::Credit,
                &FailingDraft,
                parse_ts("2026-03-01T10:00:01Z"),
            )
            .await
            .expect_err("draft failure surfaces");
        assert!(matches!(error, RepositoryError::Encode(_)));
        assert_eq!(status_of(&repo, &queued.id).await, ReportStatus::Pending);
    }
}
