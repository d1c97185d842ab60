//! Vendor block messages translated into per-service error flags.
//!
//! When a vendor service (Credit, Criminal) reports BLOCKED, its blocked
//! status text is matched against a fixed table of known messages. Matching
//! flags are raised and the raw message is carried along; an unmatched block
//! raises the service's catch-all flag instead.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::domain::report::ReportKind;
use crate::domain::tracking::{ServiceState, ServiceStatusMap};

pub struct BlockedServiceTable {
    pub kind: ReportKind,
    pub message_field: &'static str,
    pub unknown_flag: &'static str,
    pub patterns: &'static [(&'static str, &'static [&'static str])],
}

pub const CREDIT_BLOCKED_SERVICE: BlockedServiceTable = BlockedServiceTable {
    kind: ReportKind::Credit,
    message_field: "creditBlockedStatus",
    unknown_flag: "hasUnknownCreditError",
    patterns: &[
        (
            "hasCreditBureauError",
            &["CREDIT BUREAU UNAVAILABLE", "BUREAU NOT RESPONDING", "UNABLE TO ACCESS CREDIT"],
        ),
        ("hasCreditFreezeError", &["SECURITY FREEZE", "CREDIT FREEZE", "FILE FROZEN"]),
        ("hasSsnRequiredError", &["SS# REQUIRED"]),
    ],
};

pub const CRIMINAL_BLOCKED_SERVICE: BlockedServiceTable = BlockedServiceTable {
    kind: ReportKind::Criminal,
    message_field: "criminalBlockedStatus",
    unknown_flag: "hasUnknownCriminalError",
    patterns: &[
        (
            "hasCriminalJurisdictionError",
            &["JURISDICTION UNAVAILABLE", "COUNTY SEARCH DELAYED", "COURT CLOSED"],
        ),
        ("hasCriminalIdentityError", &["DATE OF BIRTH REQUIRED", "IDENTITY NOT VERIFIED"]),
    ],
};

pub fn table_for(kind: ReportKind) -> &'static BlockedServiceTable {
    match kind {
        ReportKind::Credit => &CREDIT_BLOCKED_SERVICE,
        ReportKind::Criminal => &CRIMINAL_BLOCKED_SERVICE,
    }
}

/// Error flags for one service. Serializes as a flat object holding every
/// flag of the table plus the blocked message field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceErrorFlags {
    pub message_field: &'static str,
    pub flags: BTreeMap<&'static str, Option<bool>>,
    pub message: Option<String>,
}

impl ServiceErrorFlags {
    fn filled(table: &BlockedServiceTable, value: Option<bool>) -> Self {
        let flags = table
            .patterns
            .iter()
            .map(|(flag, _)| *flag)
            .chain(std::iter::once(table.unknown_flag))
            .map(|flag| (flag, value))
            .collect();
        Self { message_field: table.message_field, flags, message: None }
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.flags.get(name).copied().flatten()
    }
}

impl Serialize for ServiceErrorFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.flags.len() + 1))?;
        for (flag, value) in &self.flags {
            map.serialize_entry(flag, value)?;
        }
        map.serialize_entry(self.message_field, &self.message)?;
        map.end()
    }
}

/// Flags for `kind` given the latest response's service breakdown and
/// blocked text. No breakdown or no text means nothing is known: every flag
/// is null.
pub fn service_error_flags(
    kind: ReportKind,
    service_status: Option<&ServiceStatusMap>,
    blocked_text: Option<&str>,
) -> ServiceErrorFlags {
    let table = table_for(kind);
    let (Some(service_status), Some(blocked_text)) = (service_status, blocked_text) else {
        return ServiceErrorFlags::filled(table, None);
    };

    let blocked = service_status
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(kind.service_name()))
        .map(|(_, entry)| entry.status == ServiceState::Blocked)
        .unwrap_or(false);

    let mut flags = ServiceErrorFlags::filled(table, Some(false));
    if !blocked {
        return flags;
    }

    // Case-insensitive on purpose. The vendor's own table is matched
    // case-sensitively, so "Credit bureau unavailable" only raises a flag here.
    let text = blocked_text.to_ascii_uppercase();
    for (flag, messages) in table.patterns {
        if messages.iter().any(|message| text.contains(*message)) {
            flags.flags.insert(*flag, Some(true));
        }
    }
    if !flags.flags.values().any(|value| *value == Some(true)) {
        flags.flags.insert(table.unknown_flag, Some(true));
    }
    flags.message = Some(blocked_text.to_string());
    flags
}

#[cfg(test)]
mod tests {
    use super::service_error_flags;
    use crate::domain::report::ReportKind;
    use crate::domain::tracking::{ServiceState, ServiceStatusEntry, ServiceStatusMap};

    fn breakdown(credit: ServiceState, criminal: ServiceState) -> ServiceStatusMap {
        [("Credit", credit), ("Criminal", criminal)]
            .into_iter()
            .map(|(name, status)| (name.to_string(), ServiceStatusEntry { status, updated_at: None }))
            .collect()
    }

    #[test]
    fn missing_breakdown_or_text_yields_all_null() {
        let flags = service_error_flags(ReportKind::Credit, None, Some("blocked"));
        assert!(flags.flags.values().all(Option::is_none));
        assert_eq!(flags.message, None);

        let services = breakdown(ServiceState::Blocked, ServiceState::Completed);
        let flags = service_error_flags(ReportKind::Criminal, Some(&services), None);
        assert!(flags.flags.values().all(Option::is_none));
    }

    #[test]
    fn service_not_blocked_yields_all_false() {
        let services = breakdown(ServiceState::Completed, ServiceState::Blocked);
        let flags = service_error_flags(ReportKind::Credit, Some(&services), Some("Criminal: court closed"));
        assert!(flags.flags.values().all(|value| *value == Some(false)));
        assert_eq!(flags.message, None);
    }

    #[test]
    fn known_message_raises_matching_flag() {
        let services = breakdown(ServiceState::Blocked, ServiceState::Completed);
        let text = "Credit bureau unavailable, please retry";
        let flags = service_error_flags(ReportKind::Credit, Some(&services), Some(text));

        assert_eq!(flags.flag("hasCreditBureauError"), Some(true));
        assert_eq!(flags.flag("hasCreditFreezeError"), Some(false));
        assert_eq!(flags.flag("hasUnknownCreditError"), Some(false));
        assert_eq!(flags.message.as_deref(), Some(text));
    }

    #[test]
    fn unknown_message_raises_catch_all_flag() {
        let services = breakdown(ServiceState::Completed, ServiceState::Blocked);
        let flags = service_error_flags(ReportKind::Criminal, Some(&services), Some("something odd"));

        assert_eq!(flags.flag("hasUnknownCriminalError"), Some(true));
        assert_eq!(flags.flag("hasCriminalJurisdictionError"), Some(false));
        assert_eq!(flags.message.as_deref(), Some("something odd"));
    }

    #[test]
    fn serializes_as_flat_object_with_message_field() {
        let services = breakdown(ServiceState::Blocked, ServiceState::Completed);
        let flags = service_error_flags(ReportKind::Credit, Some(&services), Some("SS# REQUIRED"));
        let value = serde_json::to_value(&flags).expect("serialize flags");

        assert_eq!(value["hasSsnRequiredError"], serde_json::json!(true));
        assert_eq!(value["creditBlockedStatus"], serde_json::json!("SS# REQUIRED"));
        assert_eq!(value.as_object().map(|object| object.len()), Some(5));
    }
}
