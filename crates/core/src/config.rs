use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::applicant::PropertyId;
use crate::screening::lifecycle::{GracePeriods, KindGracePeriods, LifecycleConfig};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub screening: ScreeningConfig,
    pub reconciliation: ReconciliationConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ScreeningConfig {
    pub tenant_id: String,
    /// Required; there is no sensible default for the vendor response window.
    pub vendor_api_timeout_minutes: Option<u32>,
    /// Required; minimum age of the latest non-complete response before the
    /// request counts as orphaned.
    pub min_orphaned_response_age_minutes: Option<u32>,
    pub credit_grace_days: Option<u32>,
    pub criminal_grace_days: Option<u32>,
    pub property_overrides: BTreeMap<String, PropertyGraceOverride>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PropertyGraceOverride {
    pub credit_grace_days: Option<u32>,
    pub criminal_grace_days: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub min_age_hours: u32,
    pub max_age_hours: u32,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub queue_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub tenant_id: Option<String>,
    pub vendor_api_timeout_minutes: Option<u32>,
    pub min_orphaned_response_age_minutes: Option<u32>,
    pub reconciliation_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://leasecheck.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            screening: ScreeningConfig {
                tenant_id: "default".to_string(),
                vendor_api_timeout_minutes: None,
                min_orphaned_response_age_minutes: None,
                credit_grace_days: None,
                criminal_grace_days: None,
                property_overrides: BTreeMap::new(),
            },
            reconciliation: ReconciliationConfig {
                enabled: true,
                interval_secs: 900,
                min_age_hours: 1,
                max_age_hours: 48,
            },
            worker: WorkerConfig { concurrency: 4, queue_capacity: 256 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl ScreeningConfig {
    pub fn grace_periods(&self) -> GracePeriods {
        GracePeriods {
            defaults: KindGracePeriods {
                credit_days: self.credit_grace_days,
                criminal_days: self.criminal_grace_days,
            },
            per_property: self
                .property_overrides
                .iter()
                .map(|(property_id, grace)| {
                    (
                        PropertyId(property_id.clone()),
                        KindGracePeriods {
                            credit_days: grace.credit_grace_days,
                            criminal_days: grace.criminal_grace_days,
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn lifecycle_config(&self) -> Result<LifecycleConfig, ConfigError> {
        let vendor_api_timeout_minutes = self.vendor_api_timeout_minutes.ok_or_else(|| {
            ConfigError::Validation(
                "screening.vendor_api_timeout_minutes is required (env LEASECHECK_SCREENING_VENDOR_API_TIMEOUT_MINUTES)"
                    .to_string(),
            )
        })?;
        Ok(LifecycleConfig { vendor_api_timeout_minutes, grace_periods: self.grace_periods() })
    }

    pub fn min_orphaned_response_age_minutes(&self) -> Result<u32, ConfigError> {
        self.min_orphaned_response_age_minutes.ok_or_else(|| {
            ConfigError::Validation(
                "screening.min_orphaned_response_age_minutes is required (env LEASECHECK_SCREENING_MIN_ORPHANED_RESPONSE_AGE_MINUTES)"
                    .to_string(),
            )
        })
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("leasecheck.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(screening) = patch.screening {
            if let Some(tenant_id) = screening.tenant_id {
                self.screening.tenant_id = tenant_id;
            }
            if let Some(minutes) = screening.vendor_api_timeout_minutes {
                self.screening.vendor_api_timeout_minutes = Some(minutes);
            }
            if let Some(minutes) = screening.min_orphaned_response_age_minutes {
                self.screening.min_orphaned_response_age_minutes = Some(minutes);
            }
            if let Some(days) = screening.credit_grace_days {
                self.screening.credit_grace_days = Some(days);
            }
            if let Some(days) = screening.criminal_grace_days {
                self.screening.criminal_grace_days = Some(days);
            }
            self.screening.property_overrides.extend(screening.property_overrides);
        }

        if let Some(reconciliation) = patch.reconciliation {
            if let Some(enabled) = reconciliation.enabled {
                self.reconciliation.enabled = enabled;
            }
            if let Some(interval_secs) = reconciliation.interval_secs {
                self.reconciliation.interval_secs = interval_secs;
            }
            if let Some(min_age_hours) = reconciliation.min_age_hours {
                self.reconciliation.min_age_hours = min_age_hours;
            }
            if let Some(max_age_hours) = reconciliation.max_age_hours {
                self.reconciliation.max_age_hours = max_age_hours;
            }
        }

        if let Some(worker) = patch.worker {
            if let Some(concurrency) = worker.concurrency {
                self.worker.concurrency = concurrency;
            }
            if let Some(queue_capacity) = worker.queue_capacity {
                self.worker.queue_capacity = queue_capacity;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEASECHECK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEASECHECK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEASECHECK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEASECHECK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEASECHECK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEASECHECK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEASECHECK_SERVER_PORT") {
            self.server.port = parse_u16("LEASECHECK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEASECHECK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEASECHECK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("LEASECHECK_SCREENING_TENANT_ID") {
            self.screening.tenant_id = value;
        }
        if let Some(value) = read_env("LEASECHECK_SCREENING_VENDOR_API_TIMEOUT_MINUTES") {
            self.screening.vendor_api_timeout_minutes =
                Some(parse_u32("LEASECHECK_SCREENING_VENDOR_API_TIMEOUT_MINUTES", &value)?);
        }
        if let Some(value) = read_env("LEASECHECK_SCREENING_MIN_ORPHANED_RESPONSE_AGE_MINUTES") {
            self.screening.min_orphaned_response_age_minutes = Some(parse_u32(
                "LEASECHECK_SCREENING_MIN_ORPHANED_RESPONSE_AGE_MINUTES",
                &value,
            )?);
        }
        if let Some(value) = read_env("LEASECHECK_SCREENING_CREDIT_GRACE_DAYS") {
            self.screening.credit_grace_days =
                Some(parse_u32("LEASECHECK_SCREENING_CREDIT_GRACE_DAYS", &value)?);
        }
        if let Some(value) = read_env("LEASECHECK_SCREENING_CRIMINAL_GRACE_DAYS") {
            self.screening.criminal_grace_days =
                Some(parse_u32("LEASECHECK_SCREENING_CRIMINAL_GRACE_DAYS", &value)?);
        }

        if let Some(value) = read_env("LEASECHECK_RECONCILIATION_ENABLED") {
            self.reconciliation.enabled = parse_bool("LEASECHECK_RECONCILIATION_ENABLED", &value)?;
        }
        if let Some(value) = read_env("LEASECHECK_RECONCILIATION_INTERVAL_SECS") {
            self.reconciliation.interval_secs =
                parse_u64("LEASECHECK_RECONCILIATION_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("LEASECHECK_RECONCILIATION_MIN_AGE_HOURS") {
            self.reconciliation.min_age_hours =
                parse_u32("LEASECHECK_RECONCILIATION_MIN_AGE_HOURS", &value)?;
        }
        if let Some(value) = read_env("LEASECHECK_RECONCILIATION_MAX_AGE_HOURS") {
            self.reconciliation.max_age_hours =
                parse_u32("LEASECHECK_RECONCILIATION_MAX_AGE_HOURS", &value)?;
        }

        if let Some(value) = read_env("LEASECHECK_WORKER_CONCURRENCY") {
            self.worker.concurrency = parse_usize("LEASECHECK_WORKER_CONCURRENCY", &value)?;
        }
        if let Some(value) = read_env("LEASECHECK_WORKER_QUEUE_CAPACITY") {
            self.worker.queue_capacity = parse_usize("LEASECHECK_WORKER_QUEUE_CAPACITY", &value)?;
        }

        let log_level =
            read_env("LEASECHECK_LOGGING_LEVEL").or_else(|| read_env("LEASECHECK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEASECHECK_LOGGING_FORMAT").or_else(|| read_env("LEASECHECK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(tenant_id) = overrides.tenant_id {
            self.screening.tenant_id = tenant_id;
        }
        if let Some(minutes) = overrides.vendor_api_timeout_minutes {
            self.screening.vendor_api_timeout_minutes = Some(minutes);
        }
        if let Some(minutes) = overrides.min_orphaned_response_age_minutes {
            self.screening.min_orphaned_response_age_minutes = Some(minutes);
        }
        if let Some(enabled) = overrides.reconciliation_enabled {
            self.reconciliation.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_screening(&self.screening)?;
        validate_reconciliation(&self.reconciliation)?;
        validate_worker(&self.worker)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }
    if let Some(path) = read_env("LEASECHECK_CONFIG").map(PathBuf::from) {
        return path.exists().then_some(path);
    }

    [PathBuf::from("leasecheck.toml"), PathBuf::from("config/leasecheck.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_screening(screening: &ScreeningConfig) -> Result<(), ConfigError> {
    if screening.tenant_id.trim().is_empty() {
        return Err(ConfigError::Validation("screening.tenant_id must not be empty".to_string()));
    }

    if screening.lifecycle_config()?.vendor_api_timeout_minutes == 0 {
        return Err(ConfigError::Validation(
            "screening.vendor_api_timeout_minutes must be greater than zero".to_string(),
        ));
    }
    screening.min_orphaned_response_age_minutes()?;

    let zero_grace = [screening.credit_grace_days, screening.criminal_grace_days]
        .into_iter()
        .chain(screening.property_overrides.values().flat_map(|grace| {
            [grace.credit_grace_days, grace.criminal_grace_days]
        }))
        .any(|days| days == Some(0));
    if zero_grace {
        return Err(ConfigError::Validation(
            "screening grace periods must be at least one day".to_string(),
        ));
    }

    Ok(())
}

fn validate_reconciliation(reconciliation: &ReconciliationConfig) -> Result<(), ConfigError> {
    if reconciliation.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "reconciliation.interval_secs must be greater than zero".to_string(),
        ));
    }

    if reconciliation.min_age_hours >= reconciliation.max_age_hours {
        return Err(ConfigError::Validation(
            "reconciliation.min_age_hours must be lower than reconciliation.max_age_hours"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_worker(worker: &WorkerConfig) -> Result<(), ConfigError> {
    if worker.concurrency == 0 || worker.queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "worker.concurrency and worker.queue_capacity must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    screening: Option<ScreeningPatch>,
    reconciliation: Option<ReconciliationPatch>,
    worker: Option<WorkerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ScreeningPatch {
    tenant_id: Option<String>,
    vendor_api_timeout_minutes: Option<u32>,
    min_orphaned_response_age_minutes: Option<u32>,
    credit_grace_days: Option<u32>,
    criminal_grace_days: Option<u32>,
    #[serde(default)]
    property_overrides: BTreeMap<String, PropertyGraceOverride>,
}

#[derive(Debug, Default, Deserialize)]
struct ReconciliationPatch {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    min_age_hours: Option<u32>,
    max_age_hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkerPatch {
    concurrency: Option<usize>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
