use std::sync::Arc;

use leasecheck_core::config::{AppConfig, ConfigError};
use leasecheck_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::runtime::ScreeningServices;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: Arc<ScreeningServices>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        tenant_id = %config.screening.tenant_id,
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let services = Arc::new(ScreeningServices::from_pool(&db_pool, &config)?);

    Ok(Application { config, db_pool, services })
}

#[cfg(test)]
mod tests {
    use leasecheck_core::config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};

    use super::{bootstrap_with_config, Application, BootstrapError};

    async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
        bootstrap_with_config(AppConfig::load(options)?).await
    }

    fn overrides(vendor_api_timeout_minutes: Option<u32>) -> LoadOptions {
        LoadOptions {
            config_path: None,
            require_file: false,
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                vendor_api_timeout_minutes,
                min_orphaned_response_age_minutes: Some(30),
                ..ConfigOverrides::default()
            },
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_vendor_timeout() {
        let result = bootstrap(overrides(None)).await;

        match result {
            Err(BootstrapError::Config(ConfigError::Validation(message))) => {
                assert!(message.contains("vendor_api_timeout_minutes"), "{message}");
            }
            Err(other) => panic!("unexpected bootstrap error: {other}"),
            Ok(_) => panic!("bootstrap should reject a missing vendor timeout"),
        }
    }

    #[tokio::test]
    async fn bootstrap_migrates_the_screening_store() {
        let app = bootstrap(overrides(Some(60))).await.expect("bootstrap");

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&app.db_pool)
        .await
        .expect("list tables");

        assert!(tables.iter().any(|name| name == "applicant_report"), "{tables:?}");
        assert!(tables.iter().any(|name| name == "report_request"), "{tables:?}");
        assert_eq!(app.config.screening.vendor_api_timeout_minutes, Some(60));

        app.db_pool.close().await;
    }
}
