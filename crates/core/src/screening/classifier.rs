use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::domain::report::{BlockedReason, ReportKind};
use crate::domain::tracking::{ScreeningResponseStatus, ServiceState};
use crate::vendor::{ApplicationDecision, VendorResponse};

/// Vendor error codes raised when the applicant address cannot be used.
pub const ADDRESS_ERROR_CODES: &[&str] = &["10026", "10027", "10031"];
/// Vendor error code raised when a finished result aged out before delivery.
pub const EXPIRED_RESULT_CODE: &str = "10029";
/// Older vendor payloads carry no code, only this description prefix.
pub const ADDRESS_ERROR_DESCRIPTION_PREFIX: &str = "unparsable address";

const CREDIT_FREEZE_PATTERN: &str = r"\b(security\s+freeze|credit\s+freeze|file\s+frozen|frozen)\b";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Address,
    Expired,
    Unclassified,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Classification {
    Complete { disputed: bool },
    Error { class: ErrorClass },
    Incomplete { credit_freeze: bool },
}

impl Classification {
    pub fn status(&self) -> ScreeningResponseStatus {
        match self {
            Self::Complete { .. } => ScreeningResponseStatus::Complete,
            Self::Error { .. } => ScreeningResponseStatus::Error,
            Self::Incomplete { .. } => ScreeningResponseStatus::Incomplete,
        }
    }

    /// Reason recorded on the audit row; expired results are retried, not blocked.
    pub fn blocked_reason(&self) -> Option<BlockedReason> {
        match self {
            Self::Complete { disputed: true } => Some(BlockedReason::Dispute),
            Self::Error { class: ErrorClass::Address } => Some(BlockedReason::Address),
            Self::Error { class: ErrorClass::Unclassified } => Some(BlockedReason::Error),
            Self::Incomplete { credit_freeze: true } => Some(BlockedReason::CreditFreeze),
            _ => None,
        }
    }
}

pub fn classify(response: &VendorResponse) -> Classification {
    match response.parsed_status() {
        ScreeningResponseStatus::Complete => {
            Classification::Complete { disputed: is_disputed(response.application_decision()) }
        }
        ScreeningResponseStatus::Error => {
            let code = response.error_code.as_deref();
            let class = if is_expired_result(code) {
                ErrorClass::Expired
            } else if is_address_error(code, response.error_description.as_deref()) {
                ErrorClass::Address
            } else {
                ErrorClass::Unclassified
            };
            Classification::Error { class }
        }
        ScreeningResponseStatus::Incomplete => Classification::Incomplete {
            credit_freeze: is_credit_freeze(
                response.service_state(ReportKind::Credit.service_name()),
                response.blocked_text(),
            ),
        },
    }
}

pub fn is_address_error(code: Option<&str>, description: Option<&str>) -> bool {
    let by_code = code.map(str::trim).map(|code| ADDRESS_ERROR_CODES.contains(&code)).unwrap_or(false);
    let by_description = description
        .map(|description| {
            description.trim().to_ascii_lowercase().starts_with(ADDRESS_ERROR_DESCRIPTION_PREFIX)
        })
        .unwrap_or(false);
    by_code || by_description
}

pub fn is_expired_result(code: Option<&str>) -> bool {
    code.map(str::trim) == Some(EXPIRED_RESULT_CODE)
}

pub fn is_credit_freeze(credit_service: Option<ServiceState>, blocked_text: Option<&str>) -> bool {
    if credit_service != Some(ServiceState::Blocked) {
        return false;
    }
    let Some(text) = blocked_text else {
        return false;
    };
    credit_freeze_regex().map(|regex| regex.is_match(text)).unwrap_or(false)
}

pub fn is_disputed(decision: Option<ApplicationDecision>) -> bool {
    decision == Some(ApplicationDecision::Disputed)
}

fn credit_freeze_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| RegexBuilder::new(CREDIT_FREEZE_PATTERN).case_insensitive(true).build().ok())
        .as_ref()
}

#[cfg(test)]
mod tests {
    use super::{
        classify, is_address_error, is_credit_freeze, is_expired_result, Classification,
        ErrorClass,
    };
    use crate::domain::report::BlockedReason;
    use crate::domain::tracking::ServiceState;
    use crate::vendor::{VendorResponse, VendorServiceStatus};

    fn response(status: &str) -> VendorResponse {
        VendorResponse { status: status.to_string(), ..VendorResponse::default() }
    }

    #[test]
    fn complete_with_dispute_decision_is_blocked_dispute() {
        let mut disputed = response("COMPLETE");
        disputed.application_decision = Some("Dispute Blocked".to_string());

        let classification = classify(&disputed);
        assert_eq!(classification, Classification::Complete { disputed: true });
        assert_eq!(classification.blocked_reason(), Some(BlockedReason::Dispute));

        let mut approved = response("Complete");
        approved.application_decision = Some("APPROVED".to_string());
        assert_eq!(classify(&approved), Classification::Complete { disputed: false });
    }

    #[test]
    fn error_codes_select_error_class() {
        let mut address = response("ERROR");
        address.error_code = Some("10026".to_string());
        assert_eq!(classify(&address), Classification::Error { class: ErrorClass::Address });
        assert_eq!(classify(&address).blocked_reason(), Some(BlockedReason::Address));

        let mut expired = response("ERROR");
        expired.error_code = Some(" 10029 ".to_string());
        assert_eq!(classify(&expired), Classification::Error { class: ErrorClass::Expired });
        assert_eq!(classify(&expired).blocked_reason(), None);

        let mut other = response("ERROR");
        other.error_code = Some("500".to_string());
        assert_eq!(classify(&other), Classification::Error { class: ErrorClass::Unclassified });
        assert_eq!(classify(&other).blocked_reason(), Some(BlockedReason::Error));
    }

    #[test]
    fn address_errors_match_code_or_legacy_description() {
        assert!(is_address_error(Some("10031"), None));
        assert!(is_address_error(None, Some("Unparsable address: 1 Main")));
        assert!(!is_address_error(Some("10029"), Some("timeout")));
        assert!(is_expired_result(Some("10029")));
        assert!(!is_expired_result(None));
    }

    #[test]
    fn credit_freeze_needs_blocked_credit_service_and_freeze_text() {
        assert!(is_credit_freeze(Some(ServiceState::Blocked), Some("Consumer file has SECURITY FREEZE")));
        assert!(!is_credit_freeze(Some(ServiceState::InProcess), Some("security freeze")));
        assert!(!is_credit_freeze(Some(ServiceState::Blocked), Some("bureau unavailable")));
        assert!(!is_credit_freeze(Some(ServiceState::Blocked), None));
        assert!(!is_credit_freeze(None, Some("security freeze")));
    }

    #[test]
    fn incomplete_response_detects_freeze_from_service_breakdown() {
        let mut frozen = response("Incomplete");
        frozen.blocked_status = Some("Credit: file frozen by consumer".to_string());
        frozen.service_status = vec![VendorServiceStatus {
            name: "Credit".to_string(),
            status: "BLOCKED".to_string(),
            updated: None,
        }];
        assert_eq!(classify(&frozen), Classification::Incomplete { credit_freeze: true });
        assert_eq!(classify(&frozen).blocked_reason(), Some(BlockedReason::CreditFreeze));

        let in_flight = response("in process");
        assert_eq!(classify(&in_flight), Classification::Incomplete { credit_freeze: false });
    }
}
