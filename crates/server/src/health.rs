use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use leasecheck_db::DbPool;
use serde::Serialize;

use crate::runtime::CommandSender;

const READY: &str = "ready";
const DEGRADED: &str = "degraded";

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    worker: CommandSender,
}

impl HealthState {
    pub fn new(db_pool: DbPool, worker: CommandSender) -> Self {
        Self { db_pool, worker }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentStatus {
    pub status: &'static str,
    pub detail: String,
}

impl ComponentStatus {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: READY, detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: DEGRADED, detail: detail.into() }
    }

    fn is_ready(&self) -> bool {
        self.status == READY
    }
}

/// Readiness of the store and the command worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub database: ComponentStatus,
    pub worker: ComponentStatus,
    pub checked_at: DateTime<Utc>,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let database = probe_store(&state.db_pool).await;
    let worker = if state.worker.is_accepting() {
        ComponentStatus::ready("accepting screening commands")
    } else {
        ComponentStatus::degraded("worker runtime has stopped")
    };

    let ready = database.is_ready() && worker.is_ready();
    let report = HealthReport {
        status: if ready { READY } else { DEGRADED },
        database,
        worker,
        checked_at: Utc::now(),
    };

    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(report))
}

async fn probe_store(pool: &DbPool) -> ComponentStatus {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM applicant_report").fetch_one(pool).await
    {
        Ok(_) => ComponentStatus::ready("screening store reachable"),
        Err(error) => ComponentStatus::degraded(format!("screening store probe failed: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use leasecheck_core::config::AppConfig;
    use leasecheck_db::{connect_with_settings, migrations, DbPool};

    use super::{health, HealthState};
    use crate::runtime::{spawn, ScreeningServices};

    async fn state() -> (HealthState, DbPool) {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrate");

        let mut config = AppConfig::default();
        config.screening.vendor_api_timeout_minutes = Some(60);
        config.screening.min_orphaned_response_age_minutes = Some(30);
        let services = Arc::new(ScreeningServices::from_pool(&pool, &config).expect("services"));
        let (commands, _worker) = spawn(services, &config.worker);

        (HealthState::new(pool.clone(), commands), pool)
    }

    #[tokio::test]
    async fn migrated_store_and_running_worker_are_ready() {
        let (state, pool) = state().await;

        let (code, Json(report)) = health(State(state)).await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(report.status, "ready");
        assert_eq!(report.database.status, "ready");
        assert_eq!(report.worker.status, "ready");

        pool.close().await;
    }

    #[tokio::test]
    async fn closed_store_degrades_readiness() {
        let (state, pool) = state().await;
        pool.close().await;

        let (code, Json(report)) = health(State(state)).await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, "degraded");
        assert_eq!(report.database.status, "degraded");
        assert_eq!(report.worker.status, "ready");
    }

    #[tokio::test]
    async fn unmigrated_store_is_not_ready() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        let (ready_state, ready_pool) = state().await;
        let state = HealthState::new(pool, ready_state.worker.clone());

        let (code, Json(report)) = health(State(state)).await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(report.database.detail.contains("probe failed"), "{}", report.database.detail);
        ready_pool.close().await;
    }
}
