//! Worker runtime.
//!
//! Commands arrive on a bounded channel and each runs in its own task, at most
//! `worker.concurrency` at a time. Response handling replies through a
//! oneshot so the webhook can answer the vendor with the outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use leasecheck_core::config::{AppConfig, ConfigError, ReconciliationConfig, WorkerConfig};
use leasecheck_core::domain::applicant::TenantId;
use leasecheck_core::screening::ReportLifecycle;
use leasecheck_db::repositories::{
    SqlApplicantReportRepository, SqlPartyRepository, SqlReconciliationRepository,
};
use leasecheck_db::DbPool;
use leasecheck_worker::{
    ApplicantDataChange, HandlingOutcome, LoggingNotifier, LoggingPublisher,
    PartyScreeningService, ReconciliationScanner, ReportRequestPublisher, ReportRequester,
    ReportStatusNotifier, ResponseHandler, ScanSettings, ScreeningError, VendorDelivery,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub struct ScreeningServices {
    pub requester: Arc<ReportRequester>,
    pub handler: ResponseHandler,
    pub scanner: Arc<ReconciliationScanner>,
    pub parties: PartyScreeningService,
}

impl ScreeningServices {
    pub fn from_pool(db_pool: &DbPool, config: &AppConfig) -> Result<Self, ConfigError> {
        Self::with_outbound(
            db_pool,
            config,
            Arc::new(LoggingPublisher),
            Arc::new(LoggingNotifier),
        )
    }

    pub fn with_outbound(
        db_pool: &DbPool,
        config: &AppConfig,
        publisher: Arc<dyn ReportRequestPublisher>,
        notifier: Arc<dyn ReportStatusNotifier>,
    ) -> Result<Self, ConfigError> {
        let reports = Arc::new(SqlApplicantReportRepository::new(db_pool.clone()));
        let parties = Arc::new(SqlPartyRepository::new(db_pool.clone()));

        let requester = Arc::new(ReportRequester::new(
            reports.clone(),
            parties.clone(),
            publisher,
            ReportLifecycle::new(config.screening.lifecycle_config()?),
            TenantId(config.screening.tenant_id.clone()),
        ));
        let handler =
            ResponseHandler::new(reports.clone(), parties.clone(), requester.clone(), notifier);
        let scanner = Arc::new(ReconciliationScanner::new(
            Arc::new(SqlReconciliationRepository::new(db_pool.clone())),
            ScanSettings::from_config(&config.reconciliation, &config.screening)?,
        ));
        let parties = PartyScreeningService::new(parties, reports);

        Ok(Self { requester, handler, scanner, parties })
    }
}

pub enum ScreeningCommand {
    SubmitReport {
        change: ApplicantDataChange,
    },
    HandleResponse {
        delivery: VendorDelivery,
        reply: oneshot::Sender<Result<HandlingOutcome, ScreeningError>>,
    },
}

impl ScreeningCommand {
    fn label(&self) -> &'static str {
        match self {
            Self::SubmitReport { .. } => "submit_report",
            Self::HandleResponse { .. } => "handle_response",
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("worker runtime is not accepting commands")]
    Closed,
    #[error("worker runtime dropped the reply")]
    ReplyDropped,
    #[error(transparent)]
    Screening(#[from] ScreeningError),
}

#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<ScreeningCommand>,
}

impl CommandSender {
    pub fn is_accepting(&self) -> bool {
        !self.tx.is_closed()
    }

    pub async fn submit_report(&self, change: ApplicantDataChange) -> Result<(), RuntimeError> {
        self.tx
            .send(ScreeningCommand::SubmitReport { change })
            .await
            .map_err(|_| RuntimeError::Closed)
    }

    pub async fn handle_response(
        &self,
        delivery: VendorDelivery,
    ) -> Result<HandlingOutcome, RuntimeError> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(ScreeningCommand::HandleResponse { delivery, reply })
            .await
            .map_err(|_| RuntimeError::Closed)?;
        outcome.await.map_err(|_| RuntimeError::ReplyDropped)?.map_err(RuntimeError::from)
    }
}

pub fn spawn(
    services: Arc<ScreeningServices>,
    config: &WorkerConfig,
) -> (CommandSender, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let permits = Arc::new(Semaphore::new(config.concurrency));
    let handle = tokio::spawn(run(rx, services, permits));
    (CommandSender { tx }, handle)
}

async fn run(
    mut rx: mpsc::Receiver<ScreeningCommand>,
    services: Arc<ScreeningServices>,
    permits: Arc<Semaphore>,
) {
    info!(
        event_name = "system.worker.start",
        correlation_id = "worker",
        concurrency = permits.available_permits(),
        "worker runtime started"
    );

    while let Some(command) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let services = services.clone();
        tokio::spawn(async move {
            let _permit = permit;
            execute(&services, command).await;
        });
    }

    info!(
        event_name = "system.worker.stopped",
        correlation_id = "worker",
        "worker runtime stopped"
    );
}

async fn execute(services: &ScreeningServices, command: ScreeningCommand) {
    let label = command.label();
    match command {
        ScreeningCommand::SubmitReport { change } => {
            let applicant_id = change.applicant_id.clone();
            if let Err(error) =
                services.requester.request_applicant_reports(change, Utc::now()).await
            {
                error!(
                    event_name = "system.worker.command_failed",
                    correlation_id = %applicant_id,
                    command = label,
                    retriable = error.is_retriable(),
                    error = %error,
                    "screening command failed"
                );
            }
        }
        ScreeningCommand::HandleResponse { delivery, reply } => {
            let result = services.handler.handle(&delivery, Utc::now()).await;
            if let Err(error) = &result {
                let submission =
                    delivery.response.submission_id().map(|id| id.0).unwrap_or_default();
                warn!(
                    event_name = "system.worker.command_failed",
                    correlation_id = %submission,
                    command = label,
                    retriable = error.is_retriable(),
                    error = %error,
                    "screening command failed"
                );
            }
            if reply.send(result).is_err() {
                warn!(
                    event_name = "system.worker.reply_dropped",
                    correlation_id = "worker",
                    command = label,
                    "caller went away before the outcome was ready"
                );
            }
        }
    }
}

/// Runs the reconciliation scan on a fixed interval. Findings are logged by
/// the scanner; the loop never stops on a failed scan.
pub fn spawn_reconciliation(
    scanner: Arc<ReconciliationScanner>,
    config: &ReconciliationConfig,
) -> Option<JoinHandle<()>> {
    if !config.enabled {
        info!(
            event_name = "system.reconciliation.disabled",
            correlation_id = "reconciliation",
            "reconciliation loop disabled"
        );
        return None;
    }

    let period = Duration::from_secs(config.interval_secs);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(error) = scanner.scan(Utc::now()).await {
                error!(
                    event_name = "system.reconciliation.failed",
                    correlation_id = "reconciliation",
                    error = %error,
                    "reconciliation scan failed"
                );
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use leasecheck_core::config::AppConfig;
    use leasecheck_core::domain::applicant::{ApplicantId, ApplicationData};
    use leasecheck_core::domain::report::{ReportKind, ReportStatus};
    use leasecheck_db::repositories::{ApplicantReportRepository, SqlApplicantReportRepository};
    use leasecheck_db::{connect_with_settings, migrations, DbPool};
    use leasecheck_worker::{
        ApplicantDataChange, RecordingNotifier, RecordingPublisher, ScreeningError,
        VendorDelivery,
    };
    use serde_json::json;

    use super::{spawn, RuntimeError, ScreeningServices};

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.screening.vendor_api_timeout_minutes = Some(60);
        config.screening.min_orphaned_response_age_minutes = Some(30);
        config
    }

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    fn change() -> ApplicantDataChange {
        ApplicantDataChange {
            applicant_id: ApplicantId("app-1".to_string()),
            application_data: ApplicationData {
                first_name: "Rosa".to_string(),
                last_name: "Lindqvist".to_string(),
                middle_name: None,
                email: None,
                date_of_birth: None,
                ssn: Some("101-20-3040".to_string()),
                address_line: Some("3 Pier Ln".to_string()),
                city: None,
                state: None,
                zip_code: None,
                have_international_address: false,
                gross_income_monthly: None,
            },
            property_id: None,
        }
    }

    #[tokio::test]
    async fn commands_flow_from_submission_to_vendor_response() {
        let pool = pool().await;
        let config = test_config();
        let publisher = Arc::new(RecordingPublisher::default());
        let services = Arc::new(
            ScreeningServices::with_outbound(
                &pool,
                &config,
                publisher.clone(),
                Arc::new(RecordingNotifier::default()),
            )
            .expect("services"),
        );
        let (commands, _worker) = spawn(services, &config.worker);

        commands.submit_report(change()).await.expect("enqueue submission");
        let mut published = Vec::new();
        for _ in 0..50 {
            published = publisher.published().await;
            if published.len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(published.len(), 2, "credit and criminal submissions");

        let credit = published
            .iter()
            .find(|request| request.report_kind == ReportKind::Credit)
            .expect("credit submission");
        let body = json!({
            "CustomRecords": { "screeningRequestId": credit.request_id.0 },
            "Status": "Complete",
            "ApplicationDecision": "APPROVED"
        });
        let outcome = commands
            .handle_response(VendorDelivery::parse(body.to_string()).expect("parse"))
            .await
            .expect("handle response");
        assert!(outcome.transitioned);

        let report = SqlApplicantReportRepository::new(pool)
            .find_report(&credit.report_id)
            .await
            .expect("find")
            .expect("report");
        assert_eq!(report.status, ReportStatus::Completed);
    }

    #[tokio::test]
    async fn protocol_errors_come_back_through_the_reply() {
        let pool = pool().await;
        let config = test_config();
        let services =
            Arc::new(ScreeningServices::from_pool(&pool, &config).expect("services"));
        let (commands, _worker) = spawn(services, &config.worker);

        let body = json!({ "CustomRecords": { "screeningRequestId": "req-unknown" }, "Status": "Complete" });
        let error = commands
            .handle_response(VendorDelivery::parse(body.to_string()).expect("parse"))
            .await
            .expect_err("unknown submission");

        assert!(matches!(
            error,
            RuntimeError::Screening(ScreeningError::UnknownSubmission(ref id)) if id == "req-unknown"
        ));
    }
}
