use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyId(pub String);

impl fmt::Display for ApplicantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberType {
    Resident,
    Occupant,
    Guarantor,
}

impl MemberType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resident => "RESIDENT",
            Self::Occupant => "OCCUPANT",
            Self::Guarantor => "GUARANTOR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RESIDENT" => Some(Self::Resident),
            "OCCUPANT" => Some(Self::Occupant),
            "GUARANTOR" => Some(Self::Guarantor),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseType {
    Traditional,
    Corporate,
}

impl LeaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Traditional => "TRADITIONAL",
            Self::Corporate => "CORPORATE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TRADITIONAL" => Some(Self::Traditional),
            "CORPORATE" => Some(Self::Corporate),
            _ => None,
        }
    }
}

/// Snapshot of what the applicant submitted, carried on every report and
/// forwarded to the vendor when the report is submitted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationData {
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub have_international_address: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gross_income_monthly: Option<Decimal>,
}

impl ApplicationData {
    pub fn full_name(&self) -> String {
        match &self.middle_name {
            Some(middle) if !middle.trim().is_empty() => {
                format!("{} {} {}", self.first_name, middle, self.last_name)
            }
            _ => format!("{} {}", self.first_name, self.last_name),
        }
    }

    /// Copy safe to persist: the SSN keeps only its last four digits.
    pub fn masked(&self) -> Self {
        Self { ssn: self.ssn.as_deref().map(mask_ssn), ..self.clone() }
    }
}

impl fmt::Debug for ApplicationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationData")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("ssn", &self.ssn.as_deref().map(mask_ssn))
            .field("have_international_address", &self.have_international_address)
            .field("gross_income_monthly", &self.gross_income_monthly)
            .finish_non_exhaustive()
    }
}

pub fn mask_ssn(ssn: &str) -> String {
    let digits: Vec<char> = ssn.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return "***".to_string();
    }
    let last_four: String = digits[digits.len() - 4..].iter().collect();
    format!("***-**-{last_four}")
}
