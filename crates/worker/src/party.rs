use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use leasecheck_core::domain::applicant::{ApplicantId, PartyId, PropertyId};
use leasecheck_core::domain::party::{Party, PropertyApplicationSettings, PublishedQuote};
use leasecheck_core::domain::report::ReportKind;
use leasecheck_core::screening::{
    build_party_decisions, PartyApplicant, PartyScreeningDecision, PartyScreeningInput,
};
use leasecheck_db::repositories::{ApplicantReportRepository, PartyRepository, RepositoryError};

use crate::errors::ScreeningError;

/// Quotes of a party and the settings of every property it is screened for.
pub(crate) struct ScreeningScope {
    pub quotes: Vec<PublishedQuote>,
    pub settings: Vec<PropertyApplicationSettings>,
}

/// Properties of the published quotes in publication order, else the
/// assigned property. A party with neither gets a single unscoped entry.
pub(crate) async fn screening_scope(
    parties: &dyn PartyRepository,
    party: &Party,
) -> Result<ScreeningScope, RepositoryError> {
    let quotes = parties.published_quotes(&party.id).await?;

    let mut property_ids: Vec<PropertyId> = Vec::new();
    for quote in &quotes {
        if !property_ids.contains(&quote.property_id) {
            property_ids.push(quote.property_id.clone());
        }
    }
    if property_ids.is_empty() {
        property_ids.extend(party.assigned_property_id.clone());
    }

    let settings = if property_ids.is_empty() {
        vec![PropertyApplicationSettings::default()]
    } else {
        parties.application_settings(&property_ids).await?
    };

    Ok(ScreeningScope { quotes, settings })
}

/// Whether any active party of the applicant requires the report kind for the
/// applicant's member type. Applicants outside every party get all reports.
pub(crate) async fn report_required(
    parties: &dyn PartyRepository,
    applicant_id: &ApplicantId,
    kind: ReportKind,
) -> Result<bool, RepositoryError> {
    let party_ids = parties.active_parties_for_applicant(applicant_id).await?;
    if party_ids.is_empty() {
        return Ok(true);
    }

    for party_id in &party_ids {
        let Some(party) = parties.find_party(party_id).await? else {
            continue;
        };
        let members = parties.active_members(party_id).await?;
        let Some(member) = members.iter().find(|member| &member.applicant_id == applicant_id)
        else {
            continue;
        };

        let scope = screening_scope(parties, &party).await?;
        if scope
            .settings
            .iter()
            .any(|settings| settings.requires(party.lease_type, member.member_type, kind))
        {
            return Ok(true);
        }
    }

    Ok(false)
}

pub struct PartyScreeningService {
    parties: Arc<dyn PartyRepository>,
    reports: Arc<dyn ApplicantReportRepository>,
}

impl PartyScreeningService {
    pub fn new(
        parties: Arc<dyn PartyRepository>,
        reports: Arc<dyn ApplicantReportRepository>,
    ) -> Self {
        Self { parties, reports }
    }

    pub async fn load_input(&self, party_id: &PartyId) -> Result<PartyScreeningInput, ScreeningError> {
        let party = self
            .parties
            .find_party(party_id)
            .await?
            .ok_or_else(|| ScreeningError::UnknownParty(party_id.0.clone()))?;

        let mut applicants = Vec::new();
        for member in self.parties.active_members(party_id).await? {
            let mut applicant = PartyApplicant {
                applicant_id: member.applicant_id.clone(),
                member_type: member.member_type,
                credit: None,
                criminal: None,
            };
            for snapshot in self.reports.current_snapshots(&member.applicant_id).await? {
                match snapshot.report.report_kind {
                    ReportKind::Credit => applicant.credit = Some(snapshot),
                    ReportKind::Criminal => applicant.criminal = Some(snapshot),
                }
            }
            applicants.push(applicant);
        }

        let scope = screening_scope(self.parties.as_ref(), &party).await?;
        let property_ids: Vec<PropertyId> = scope
            .settings
            .iter()
            .filter_map(|settings| settings.property_id.clone())
            .collect();
        let criteria = if property_ids.is_empty() {
            Vec::new()
        } else {
            self.parties.screening_criteria(&property_ids, party.lease_type).await?
        };

        Ok(PartyScreeningInput {
            party,
            applicants,
            settings: scope.settings,
            criteria,
            quotes: scope.quotes,
        })
    }

    /// One decision record per property the party is screened for.
    pub async fn decisions(
        &self,
        party_id: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PartyScreeningDecision>, ScreeningError> {
        let input = self.load_input(party_id).await?;
        let decisions = build_party_decisions(&input, now);

        info!(
            event_name = "screening.party.decisions_built",
            correlation_id = %party_id,
            applicants = input.applicants.len(),
            decisions = decisions.len(),
            "party screening decisions built"
        );
        Ok(decisions)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Utc};
    use serde_json::{json, Map};

    use leasecheck_core::domain::applicant::{
        ApplicantId, ApplicationData, LeaseType, MemberType, PartyId, PropertyId,
    };
    use leasecheck_core::domain::party::{
        Party, PartyMember, PropertyApplicationSettings, PublishedQuote, ReportRequirements,
        ScreeningCriteria,
    };
    use leasecheck_core::domain::report::{
        ApplicantReport, ApplicantReportId, ReportKind, ReportStatus,
    };
    use leasecheck_core::screening::ReportPlan;
    use leasecheck_db::repositories::{
        ApplicantReportRepository, InMemoryApplicantReportRepository, InMemoryPartyRepository,
        PartyRepository,
    };

    use super::{report_required, PartyScreeningService};
    use crate::errors::ScreeningError;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-05T09:00:00Z").expect("timestamp").with_timezone(&Utc)
    }

    fn application() -> ApplicationData {
        ApplicationData {
            first_name: "Mika".to_string(),
            last_name: "Sato".to_string(),
            middle_name: None,
            email: None,
            date_of_birth: None,
            ssn: Some("222-33-4444".to_string()),
            address_line: Some("5 Elm Ct".to_string()),
            city: None,
            state: None,
            zip_code: None,
            have_international_address: false,
            gross_income_monthly: None,
        }
    }

    fn party() -> Party {
        Party {
            id: PartyId("party-1".to_string()),
            lease_type: LeaseType::Traditional,
            assigned_property_id: Some(PropertyId("P-assigned".to_string())),
            is_active: true,
        }
    }

    fn member(applicant: &str, member_type: MemberType) -> PartyMember {
        PartyMember {
            party_id: PartyId("party-1".to_string()),
            applicant_id: ApplicantId(applicant.to_string()),
            member_type,
        }
    }

    fn compiling_report(applicant: &str, kind: ReportKind) -> ReportPlan {
        ReportPlan {
            report: ApplicantReport {
                id: ApplicantReportId(format!("rep-{applicant}-{}", kind.as_str())),
                applicant_id: ApplicantId(applicant.to_string()),
                report_kind: kind,
                status: ReportStatus::Compiling,
                report_data: None,
                application_data: application(),
                property_id: None,
                external_report_id: None,
                valid_until: None,
                obsoleted_by: None,
                completed_at: None,
                created_at: now(),
                updated_at: now(),
            },
            supersedes: None,
            cancels: Vec::new(),
            needs_submission: false,
        }
    }

    #[tokio::test]
    async fn decisions_follow_published_quote_properties() {
        let parties = Arc::new(InMemoryPartyRepository::default());
        let reports = Arc::new(InMemoryApplicantReportRepository::default());

        parties
            .save_party(
                &party(),
                &[member("app-1", MemberType::Resident), member("app-2", MemberType::Guarantor)],
            )
            .await
            .expect("save party");
        parties
            .save_application_settings(&PropertyApplicationSettings::new(PropertyId("P-2".to_string())).with(
                LeaseType::Traditional,
                MemberType::Guarantor,
                ReportRequirements {
                    credit_report_required_flag: true,
                    criminal_report_required_flag: false,
                },
            ))
            .await
            .expect("save settings");
        parties
            .save_screening_criteria(&ScreeningCriteria {
                property_id: PropertyId("P-2".to_string()),
                lease_type: LeaseType::Traditional,
                criteria: Map::from_iter([("monthlyResidentIncomeDebtMultiple".to_string(), json!(3))]),
            })
            .await
            .expect("save criteria");
        for (quote_id, property) in [("Q-1", "P-1"), ("Q-2", "P-2"), ("Q-3", "P-1")] {
            parties
                .save_published_quote(
                    &PartyId("party-1".to_string()),
                    &PublishedQuote {
                        quote_id: quote_id.to_string(),
                        property_id: PropertyId(property.to_string()),
                        lease_start_date: None,
                        terms: json!([]),
                    },
                )
                .await
                .expect("save quote");
        }
        reports
            .create_report(&compiling_report("app-1", ReportKind::Credit), now())
            .await
            .expect("create report");

        let service = PartyScreeningService::new(parties, reports);
        let decisions =
            service.decisions(&PartyId("party-1".to_string()), now()).await.expect("decisions");

        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].property_id, Some(PropertyId("P-1".to_string())));
        assert_eq!(decisions[0].quotes.len(), 2);
        assert!(decisions[0].criteria.is_none());

        let second = &decisions[1];
        assert_eq!(second.property_id, Some(PropertyId("P-2".to_string())));
        assert_eq!(second.quotes.len(), 1);
        let criteria = second.criteria.as_ref().expect("criteria for P-2");
        assert_eq!(criteria["guarantorResidentRelationship"], json!("INDIVIDUAL_GUARANTORS"));

        let resident = &second.applicants[0];
        assert_eq!(resident.credit_status, ReportStatus::Compiling);
        assert_eq!(resident.criminal_status, ReportStatus::Pending);
        let guarantor = &second.applicants[1];
        assert_eq!(guarantor.credit_status, ReportStatus::Pending);
        assert_eq!(guarantor.criminal_status, ReportStatus::NotApplicable);
    }

    #[tokio::test]
    async fn party_without_quotes_uses_assigned_property() {
        let parties = Arc::new(InMemoryPartyRepository::default());
        parties
            .save_party(&party(), &[member("app-1", MemberType::Resident)])
            .await
            .expect("save party");

        let service =
            PartyScreeningService::new(parties, Arc::new(InMemoryApplicantReportRepository::default()));
        let decisions =
            service.decisions(&PartyId("party-1".to_string()), now()).await.expect("decisions");

        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].property_id, Some(PropertyId("P-assigned".to_string())));
        assert!(decisions[0].quotes.is_empty());
    }

    #[tokio::test]
    async fn unknown_party_is_a_protocol_error() {
        let service = PartyScreeningService::new(
            Arc::new(InMemoryPartyRepository::default()),
            Arc::new(InMemoryApplicantReportRepository::default()),
        );

        let error = service
            .decisions(&PartyId("missing".to_string()), now())
            .await
            .expect_err("unknown party");
        assert!(matches!(error, ScreeningError::UnknownParty(_)));
        assert!(!error.is_retriable());
    }

    #[tokio::test]
    async fn requirement_follows_member_type_settings() {
        let parties = InMemoryPartyRepository::default();
        parties
            .save_party(&party(), &[member("app-2", MemberType::Guarantor)])
            .await
            .expect("save party");
        parties
            .save_application_settings(
                &PropertyApplicationSettings::new(PropertyId("P-assigned".to_string())).with(
                    LeaseType::Traditional,
                    MemberType::Guarantor,
                    ReportRequirements {
                        credit_report_required_flag: true,
                        criminal_report_required_flag: false,
                    },
                ),
            )
            .await
            .expect("save settings");

        let guarantor = ApplicantId("app-2".to_string());
        assert!(report_required(&parties, &guarantor, ReportKind::Credit).await.expect("credit"));
        assert!(!report_required(&parties, &guarantor, ReportKind::Criminal).await.expect("criminal"));
        assert!(report_required(&parties, &ApplicantId("loner".to_string()), ReportKind::Criminal)
            .await
            .expect("no party"));
    }
}
