use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::applicant::{ApplicantId, PropertyId};
use crate::domain::report::{ApplicantReportId, BlockedReason, ReportKind};

/// Submission identifier. Sent to the vendor inside the custom records of the
/// request and echoed back on every response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportRequestId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportResponseId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    New,
    /// Credit reset. Excluded from reconciliation scans.
    Reset,
    Resubmit,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Reset => "reset",
            Self::Resubmit => "resubmit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "reset" => Some(Self::Reset),
            "resubmit" => Some(Self::Resubmit),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub id: ReportRequestId,
    pub report_id: ApplicantReportId,
    pub applicant_id: ApplicantId,
    pub report_kind: ReportKind,
    pub property_id: Option<PropertyId>,
    pub request_type: RequestType,
    pub raw_request: String,
    pub is_obsolete: bool,
    pub request_ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScreeningResponseStatus {
    Complete,
    Error,
    Incomplete,
}

impl ScreeningResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Incomplete => "INCOMPLETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "COMPLETE" => Some(Self::Complete),
            "ERROR" => Some(Self::Error),
            "INCOMPLETE" => Some(Self::Incomplete),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    InProcess,
    Incomplete,
    Completed,
    Blocked,
}

impl ServiceState {
    /// Vendor text is free-form; anything mentioning a block is a block and
    /// anything unrecognized is still being worked on.
    pub fn from_vendor(value: &str) -> Self {
        let normalized = value.trim().to_ascii_uppercase().replace(' ', "_");
        if normalized.contains("BLOCKED") {
            return Self::Blocked;
        }
        match normalized.as_str() {
            "IN_PROCESS" | "INPROCESS" => Self::InProcess,
            "COMPLETED" | "COMPLETE" => Self::Completed,
            _ => Self::Incomplete,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatusEntry {
    pub status: ServiceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-service breakdown keyed by vendor service name (`Credit`, `Criminal`).
pub type ServiceStatusMap = BTreeMap<String, ServiceStatusEntry>;

pub fn all_services_completed(service_status: &ServiceStatusMap) -> bool {
    !service_status.is_empty()
        && service_status.values().all(|entry| entry.status == ServiceState::Completed)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResponse {
    pub id: ReportResponseId,
    pub request_id: ReportRequestId,
    pub raw_response: String,
    pub payload_fingerprint: String,
    pub status: ScreeningResponseStatus,
    pub service_status: ServiceStatusMap,
    pub blocked_reason: Option<BlockedReason>,
    pub service_blocked_status: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{
        all_services_completed, RequestType, ScreeningResponseStatus, ServiceState,
        ServiceStatusEntry, ServiceStatusMap,
    };

    #[test]
    fn vendor_service_states_normalize() {
        assert_eq!(ServiceState::from_vendor("In Process"), ServiceState::InProcess);
        assert_eq!(ServiceState::from_vendor("completed"), ServiceState::Completed);
        assert_eq!(ServiceState::from_vendor("Blocked - Freeze"), ServiceState::Blocked);
        assert_eq!(ServiceState::from_vendor("???"), ServiceState::Incomplete);
    }

    #[test]
    fn all_completed_requires_a_populated_breakdown() {
        let mut services = ServiceStatusMap::new();
        assert!(!all_services_completed(&services));

        services.insert(
            "Credit".to_string(),
            ServiceStatusEntry { status: ServiceState::Completed, updated_at: None },
        );
        assert!(all_services_completed(&services));

        services.insert(
            "Criminal".to_string(),
            ServiceStatusEntry { status: ServiceState::InProcess, updated_at: None },
        );
        assert!(!all_services_completed(&services));
    }

    #[test]
    fn tracking_enums_round_trip_storage_encoding() {
        for request_type in [RequestType::New, RequestType::Reset, RequestType::Resubmit] {
            assert_eq!(RequestType::parse(request_type.as_str()), Some(request_type));
        }
        for status in [
            ScreeningResponseStatus::Complete,
            ScreeningResponseStatus::Error,
            ScreeningResponseStatus::Incomplete,
        ] {
            assert_eq!(ScreeningResponseStatus::parse(status.as_str()), Some(status));
        }
    }
}
