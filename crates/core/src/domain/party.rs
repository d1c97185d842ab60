use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::applicant::{ApplicantId, LeaseType, MemberType, PartyId, PropertyId};
use crate::domain::report::ReportKind;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub lease_type: LeaseType,
    pub assigned_property_id: Option<PropertyId>,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyMember {
    pub party_id: PartyId,
    pub applicant_id: ApplicantId,
    pub member_type: MemberType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequirements {
    pub credit_report_required_flag: bool,
    pub criminal_report_required_flag: bool,
}

impl ReportRequirements {
    pub const ALL_REQUIRED: Self =
        Self { credit_report_required_flag: true, criminal_report_required_flag: true };

    pub fn requires(&self, kind: ReportKind) -> bool {
        match kind {
            ReportKind::Credit => self.credit_report_required_flag,
            ReportKind::Criminal => self.criminal_report_required_flag,
        }
    }
}

/// Required-report settings of one property, per lease type and member type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyApplicationSettings {
    pub property_id: Option<PropertyId>,
    pub settings: BTreeMap<LeaseType, BTreeMap<MemberType, ReportRequirements>>,
}

impl PropertyApplicationSettings {
    pub fn new(property_id: PropertyId) -> Self {
        Self { property_id: Some(property_id), settings: BTreeMap::new() }
    }

    pub fn with(
        mut self,
        lease_type: LeaseType,
        member_type: MemberType,
        requirements: ReportRequirements,
    ) -> Self {
        self.settings.entry(lease_type).or_default().insert(member_type, requirements);
        self
    }

    /// Unconfigured combinations require both kinds.
    pub fn requirements(&self, lease_type: LeaseType, member_type: MemberType) -> ReportRequirements {
        self.settings
            .get(&lease_type)
            .and_then(|by_member| by_member.get(&member_type))
            .copied()
            .unwrap_or(ReportRequirements::ALL_REQUIRED)
    }

    pub fn requires(&self, lease_type: LeaseType, member_type: MemberType, kind: ReportKind) -> bool {
        self.requirements(lease_type, member_type).requires(kind)
    }
}

pub const DEFAULT_GUARANTOR_RESIDENT_RELATIONSHIP: &str = "INDIVIDUAL_GUARANTORS";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScreeningCriteria {
    pub property_id: PropertyId,
    pub lease_type: LeaseType,
    pub criteria: Map<String, Value>,
}

impl ScreeningCriteria {
    /// Criteria document as handed to approval rules.
    pub fn decision_view(&self) -> Map<String, Value> {
        let mut view = self.criteria.clone();
        view.entry("guarantorResidentRelationship".to_string()).or_insert_with(|| {
            Value::String(DEFAULT_GUARANTOR_RESIDENT_RELATIONSHIP.to_string())
        });
        view
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedQuote {
    pub quote_id: String,
    #[serde(skip_serializing)]
    pub property_id: PropertyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_start_date: Option<String>,
    #[serde(default)]
    pub terms: Value,
}
