use std::env;
use std::sync::{Mutex, OnceLock};

use leasecheck_cli::commands::{config, migrate, scan};
use serde_json::Value;

const VALID_SCREENING: [(&str, &str); 2] = [
    ("LEASECHECK_SCREENING_VENDOR_API_TIMEOUT_MINUTES", "60"),
    ("LEASECHECK_SCREENING_MIN_ORPHANED_RESPONSE_AGE_MINUTES", "30"),
];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&with_screening(&[("LEASECHECK_DATABASE_URL", "sqlite::memory:")]), || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_without_vendor_timeout() {
    with_env(&[("LEASECHECK_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"]
            .as_str()
            .unwrap_or_default()
            .contains("vendor_api_timeout_minutes"));
    });
}

#[test]
fn scan_of_a_migrated_store_is_clean() {
    let dir = tempfile::tempdir().expect("scratch dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("leasecheck.db").display());

    with_env(&with_screening(&[("LEASECHECK_DATABASE_URL", url.as_str())]), || {
        assert_eq!(migrate::run().exit_code, 0, "migrate before scanning");

        let result = scan::run();
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "scan");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["report"]["orphaned"], Value::Array(Vec::new()));
        assert_eq!(payload["report"]["stuck"], Value::Array(Vec::new()));
    });
}

#[test]
fn scan_reports_a_query_failure_on_an_unmigrated_store() {
    with_env(&with_screening(&[("LEASECHECK_DATABASE_URL", "sqlite::memory:")]), || {
        let result = scan::run();
        assert_eq!(result.exit_code, 6, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "scan");
    });
}

#[test]
fn scan_requires_the_orphaned_response_age() {
    with_env(
        &[
            ("LEASECHECK_DATABASE_URL", "sqlite::memory:"),
            ("LEASECHECK_SCREENING_VENDOR_API_TIMEOUT_MINUTES", "60"),
        ],
        || {
            let result = scan::run();
            assert_eq!(result.exit_code, 2);
            assert_eq!(parse_payload(&result.output)["error_class"], "config_validation");
        },
    );
}

#[test]
fn config_attributes_env_sources() {
    with_env(
        &with_screening(&[
            ("LEASECHECK_DATABASE_URL", "sqlite::memory:"),
            ("LEASECHECK_WORKER_CONCURRENCY", "8"),
        ]),
        || {
            let output = config::run();

            assert!(output.contains(
                "- worker.concurrency = 8 (source: env (LEASECHECK_WORKER_CONCURRENCY))"
            ));
            assert!(output.contains("- worker.queue_capacity = 256 (source: default)"));
            assert!(output.contains("- screening.vendor_api_timeout_minutes = 60"));
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_screening<'a>(vars: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
    VALID_SCREENING.iter().copied().chain(vars.iter().copied()).collect()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "LEASECHECK_CONFIG",
        "LEASECHECK_DATABASE_URL",
        "LEASECHECK_DATABASE_MAX_CONNECTIONS",
        "LEASECHECK_DATABASE_TIMEOUT_SECS",
        "LEASECHECK_SERVER_BIND_ADDRESS",
        "LEASECHECK_SERVER_PORT",
        "LEASECHECK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "LEASECHECK_SCREENING_TENANT_ID",
        "LEASECHECK_SCREENING_VENDOR_API_TIMEOUT_MINUTES",
        "LEASECHECK_SCREENING_MIN_ORPHANED_RESPONSE_AGE_MINUTES",
        "LEASECHECK_SCREENING_CREDIT_GRACE_DAYS",
        "LEASECHECK_SCREENING_CRIMINAL_GRACE_DAYS",
        "LEASECHECK_RECONCILIATION_ENABLED",
        "LEASECHECK_RECONCILIATION_INTERVAL_SECS",
        "LEASECHECK_RECONCILIATION_MIN_AGE_HOURS",
        "LEASECHECK_RECONCILIATION_MAX_AGE_HOURS",
        "LEASECHECK_WORKER_CONCURRENCY",
        "LEASECHECK_WORKER_QUEUE_CAPACITY",
        "LEASECHECK_LOGGING_LEVEL",
        "LEASECHECK_LOGGING_FORMAT",
        "LEASECHECK_LOG_LEVEL",
        "LEASECHECK_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
