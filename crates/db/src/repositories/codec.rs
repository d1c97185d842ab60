use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use leasecheck_core::domain::report::{ReportData, ReportKind};

use super::RepositoryError;

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn optional_timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(timestamp)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_enum<T>(
    column: &str,
    value: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(value).ok_or_else(|| RepositoryError::Decode(format!("unknown {column} `{value}`")))
}

pub(crate) fn encode_json<T: Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("cannot encode `{column}`: {error}")))
}

pub(crate) fn decode_json<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

/// Flag records carry no discriminator, so the report kind decides which one
/// a stored payload is. Sentinel payloads are recognized by their single key.
pub(crate) fn decode_report_data(kind: ReportKind, raw: &str) -> Result<ReportData, RepositoryError> {
    let value: Value = decode_json("report_data", raw)?;
    let is_sentinel =
        value.get("blockedBy").is_some() || value.get("hasInternationalAddress").is_some();

    let decoded = if is_sentinel {
        serde_json::from_value(value)
    } else {
        match kind {
            ReportKind::Credit => serde_json::from_value(value).map(ReportData::Credit),
            ReportKind::Criminal => serde_json::from_value(value).map(ReportData::Criminal),
        }
    };
    decoded.map_err(|error| RepositoryError::Decode(format!("invalid `report_data`: {error}")))
}
