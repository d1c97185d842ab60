use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leasecheck_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let sources = Sources { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    let optional = |value: Option<u32>| value.map_or_else(|| "<unset>".to_string(), |v| v.to_string());

    let fields: Vec<(&str, String)> = vec![
        ("database.url", redact_url(&config.database.url)),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("screening.tenant_id", config.screening.tenant_id.clone()),
        (
            "screening.vendor_api_timeout_minutes",
            optional(config.screening.vendor_api_timeout_minutes),
        ),
        (
            "screening.min_orphaned_response_age_minutes",
            optional(config.screening.min_orphaned_response_age_minutes),
        ),
        ("screening.credit_grace_days", optional(config.screening.credit_grace_days)),
        ("screening.criminal_grace_days", optional(config.screening.criminal_grace_days)),
        ("reconciliation.enabled", config.reconciliation.enabled.to_string()),
        ("reconciliation.interval_secs", config.reconciliation.interval_secs.to_string()),
        ("reconciliation.min_age_hours", config.reconciliation.min_age_hours.to_string()),
        ("reconciliation.max_age_hours", config.reconciliation.max_age_hours.to_string()),
        ("worker.concurrency", config.worker.concurrency.to_string()),
        ("worker.queue_capacity", config.worker.queue_capacity.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format)),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        fields.iter().map(|(key, value)| render_line(key, value, sources.field_source(key))),
    );
    for property_id in config.screening.property_overrides.keys() {
        lines.push(format!("- screening.property_overrides.{property_id} (source: file)"));
    }

    lines.join("\n")
}

struct Sources<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

impl Sources<'_> {
    fn field_source(&self, key_path: &str) -> String {
        let env_key = env_key(key_path);
        if env::var_os(&env_key).is_some() {
            return format!("env ({env_key})");
        }

        if let Some(doc) = self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

/// `screening.tenant_id` -> `LEASECHECK_SCREENING_TENANT_ID`
pub fn env_key(key_path: &str) -> String {
    format!("LEASECHECK_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os("LEASECHECK_CONFIG").map(PathBuf::from) {
        return path.exists().then_some(path);
    }

    [PathBuf::from("leasecheck.toml"), PathBuf::from("config/leasecheck.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Hides credentials embedded in a connection URL.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}"),
        None => url.to_string(),
    }
}
