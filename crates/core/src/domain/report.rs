use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::applicant::{ApplicantId, ApplicationData, PropertyId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicantReportId(pub String);

impl fmt::Display for ApplicantReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Credit,
    Criminal,
}

impl ReportKind {
    pub const ALL: [ReportKind; 2] = [ReportKind::Credit, ReportKind::Criminal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Criminal => "criminal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "credit" => Some(Self::Credit),
            "criminal" => Some(Self::Criminal),
            _ => None,
        }
    }

    /// Service name the vendor uses in its per-service status breakdown.
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::Credit => "Credit",
            Self::Criminal => "Criminal",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Pending,
    Compiling,
    Completed,
    BlockedAddress,
    BlockedCreditFreeze,
    BlockedDispute,
    Error,
    Canceled,
    NotApplicable,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Compiling => "COMPILING",
            Self::Completed => "COMPLETED",
            Self::BlockedAddress => "BLOCKED_ADDRESS",
            Self::BlockedCreditFreeze => "BLOCKED_CREDIT_FREEZE",
            Self::BlockedDispute => "BLOCKED_DISPUTE",
            Self::Error => "ERROR",
            Self::Canceled => "CANCELED",
            Self::NotApplicable => "NOT_APPLICABLE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "COMPILING" => Some(Self::Compiling),
            "COMPLETED" => Some(Self::Completed),
            "BLOCKED_ADDRESS" => Some(Self::BlockedAddress),
            "BLOCKED_CREDIT_FREEZE" => Some(Self::BlockedCreditFreeze),
            "BLOCKED_DISPUTE" => Some(Self::BlockedDispute),
            "ERROR" => Some(Self::Error),
            "CANCELED" => Some(Self::Canceled),
            "NOT_APPLICABLE" => Some(Self::NotApplicable),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Compiling)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockedReason {
    Address,
    CreditFreeze,
    Dispute,
    Error,
}

impl BlockedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Address => "ADDRESS",
            Self::CreditFreeze => "CREDIT_FREEZE",
            Self::Dispute => "DISPUTE",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADDRESS" => Some(Self::Address),
            "CREDIT_FREEZE" => Some(Self::CreditFreeze),
            "DISPUTE" => Some(Self::Dispute),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn report_status(&self) -> ReportStatus {
        match self {
            Self::Address => ReportStatus::BlockedAddress,
            Self::CreditFreeze => ReportStatus::BlockedCreditFreeze,
            Self::Dispute => ReportStatus::BlockedDispute,
            Self::Error => ReportStatus::Error,
        }
    }
}

/// Flags derived from the credit section of a vendor response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreditReportData {
    pub credit_score: Option<i32>,
    pub has_no_established_credit: Option<bool>,
    pub has_bankruptcy: Option<bool>,
    pub has_foreclosure: Option<bool>,
    pub has_legal_items: Option<bool>,
    pub has_tax_liens: Option<bool>,
    pub has_mortgage_debt: Option<bool>,
    pub has_property_rental_debt: Option<bool>,
    pub has_utility_debt: Option<bool>,
    pub has_rental_collections: Option<bool>,
    pub has_nsf_or_late_pay_min: Option<bool>,
    pub has_nsf_or_late_pay_max: Option<bool>,
    pub has_eviction_notice: Option<bool>,
    pub has_lease_violation: Option<bool>,
    pub has_suspicious_ssn: Option<bool>,
    pub has_required_ssn_response: Option<bool>,
}

/// Flags derived from the criminal section of a vendor response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CriminalReportData {
    pub has_drugs_felony: Option<bool>,
    pub has_drugs_misdemeanor: Option<bool>,
    pub has_dui_felony: Option<bool>,
    pub has_dui_misdemeanor: Option<bool>,
    pub has_unclassified_felony: Option<bool>,
    pub has_unclassified_misdemeanor: Option<bool>,
    pub has_property_felony: Option<bool>,
    pub has_property_misdemeanor: Option<bool>,
    pub has_sex_felony: Option<bool>,
    pub has_sex_misdemeanor: Option<bool>,
    pub has_theft_felony: Option<bool>,
    pub has_theft_misdemeanor: Option<bool>,
    pub has_theft_by_check_felony: Option<bool>,
    pub has_theft_by_check_misdemeanor: Option<bool>,
    pub has_traffic_felony: Option<bool>,
    pub has_traffic_misdemeanor: Option<bool>,
    pub has_violent_crime_felony: Option<bool>,
    pub has_violent_crime_misdemeanor: Option<bool>,
    pub has_weapons_felony: Option<bool>,
    pub has_weapons_misdemeanor: Option<bool>,
    pub has_registered_sex_offender: Option<bool>,
    pub has_registered_sex_offender_dob_only: Option<bool>,
    pub has_global_sanctions: Option<bool>,
    pub has_global_sanctions_fuzzy: Option<bool>,
    pub has_eviction_records_min: Option<bool>,
    pub has_eviction_records_max: Option<bool>,
    pub has_eviction_filings_min: Option<bool>,
    pub has_eviction_filings_max: Option<bool>,
}

/// Payload stored on a report. Sentinels come first so that an untagged
/// decode never mistakes them for an all-null flag record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportData {
    Blocked {
        #[serde(rename = "blockedBy")]
        blocked_by: BlockedReason,
    },
    InternationalAddress {
        #[serde(rename = "hasInternationalAddress")]
        has_international_address: bool,
    },
    Credit(CreditReportData),
    Criminal(CriminalReportData),
}

impl ReportData {
    pub fn blocked(reason: BlockedReason) -> Self {
        Self::Blocked { blocked_by: reason }
    }

    pub fn international_address() -> Self {
        Self::InternationalAddress { has_international_address: true }
    }

    pub fn credit(&self) -> Option<&CreditReportData> {
        match self {
            Self::Credit(data) => Some(data),
            _ => None,
        }
    }

    pub fn criminal(&self) -> Option<&CriminalReportData> {
        match self {
            Self::Criminal(data) => Some(data),
            _ => None,
        }
    }

    pub fn blocked_by(&self) -> Option<BlockedReason> {
        match self {
            Self::Blocked { blocked_by } => Some(*blocked_by),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantReport {
    pub id: ApplicantReportId,
    pub applicant_id: ApplicantId,
    pub report_kind: ReportKind,
    pub status: ReportStatus,
    pub report_data: Option<ReportData>,
    pub application_data: ApplicationData,
    pub property_id: Option<PropertyId>,
    pub external_report_id: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    pub obsoleted_by: Option<ApplicantReportId>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicantReport {
    pub fn is_chain_head(&self) -> bool {
        self.obsoleted_by.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReportStatus::Completed
            && self.valid_until.map(|valid_until| valid_until <= now).unwrap_or(false)
    }
}
