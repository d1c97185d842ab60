use chrono::{DateTime, Utc};

use leasecheck_core::domain::tracking::ReportRequest;

use super::codec::timestamp;
use super::report::{request_from_row, response_from_row, REQUEST_COLUMNS, RESPONSE_COLUMNS};
use super::{IncompleteRequest, ReconciliationRepository, RepositoryError, ScanWindow};
use crate::DbPool;

/// Read-only queries behind the reconciliation scan.
pub struct SqlReconciliationRepository {
    pool: DbPool,
}

impl SqlReconciliationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReconciliationRepository for SqlReconciliationRepository {
    async fn orphaned_requests(
        &self,
        window: ScanWindow,
    ) -> Result<Vec<ReportRequest>, RepositoryError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS}
             FROM report_request q
             WHERE q.is_obsolete = 0
               AND q.request_type <> 'reset'
               AND q.created_at BETWEEN ? AND ?
               AND NOT EXISTS (SELECT 1 FROM report_response res WHERE res.request_id = q.id)
             ORDER BY q.created_at ASC, q.rowid ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(timestamp(window.from))
            .bind(timestamp(window.to))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(request_from_row).collect()
    }

    async fn incomplete_requests(
        &self,
        window: ScanWindow,
        responded_before: DateTime<Utc>,
    ) -> Result<Vec<IncompleteRequest>, RepositoryError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS}, {RESPONSE_COLUMNS}
             FROM report_request q
             JOIN report_response res ON res.id = (
                 SELECT latest.id
                 FROM report_response latest
                 WHERE latest.request_id = q.id
                 ORDER BY latest.created_at DESC, latest.rowid DESC
                 LIMIT 1
             )
             WHERE q.is_obsolete = 0
               AND q.request_type <> 'reset'
               AND q.created_at BETWEEN ? AND ?
               AND res.status <> 'COMPLETE'
               AND res.created_at < ?
             ORDER BY q.created_at ASC, q.rowid ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(timestamp(window.from))
            .bind(timestamp(window.to))
            .bind(timestamp(responded_before))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<IncompleteRequest, RepositoryError> {
                Ok(IncompleteRequest {
                    request: request_from_row(row)?,
                    latest_response: response_from_row(row)?,
                })
            })
            .collect()
    }
}
