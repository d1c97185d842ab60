use std::sync::Arc;

use chrono::Utc;
use leasecheck_db::connect_with_config;
use leasecheck_db::repositories::SqlReconciliationRepository;
use leasecheck_worker::{ReconciliationScanner, ScanSettings};

use crate::commands::{prepare, CommandResult};

/// Exit code when the scan succeeded but found requests needing attention.
pub const FINDINGS_EXIT_CODE: u8 = 1;

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("scan") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let settings = match ScanSettings::from_config(&config.reconciliation, &config.screening) {
        Ok(settings) => settings,
        Err(error) => {
            return CommandResult::failure(
                "scan",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let scanner = ReconciliationScanner::new(
            Arc::new(SqlReconciliationRepository::new(pool.clone())),
            settings,
        );
        let report = scanner
            .scan(Utc::now())
            .await
            .map_err(|error| ("scan", error.to_string(), 6u8));
        pool.close().await;
        report
    });

    let report = match result {
        Ok(report) => report,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("scan", error_class, message, exit_code);
        }
    };

    let message = format!(
        "{} orphaned, {} orphaned incomplete, {} stuck",
        report.orphaned.len(),
        report.orphaned_incomplete.len(),
        report.stuck.len()
    );
    let (status, exit_code) =
        if report.is_clean() { ("ok", 0) } else { ("findings", FINDINGS_EXIT_CODE) };

    match serde_json::to_value(&report) {
        Ok(report) => CommandResult::report("scan", status, message, report, exit_code),
        Err(error) => CommandResult::failure("scan", "serialization", error.to_string(), 7),
    }
}
