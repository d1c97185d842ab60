use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use leasecheck_core::domain::applicant::{ApplicantId, ApplicationData, PropertyId};
use leasecheck_core::domain::report::{
    ApplicantReport, ApplicantReportId, BlockedReason, ReportKind, ReportStatus,
};
use leasecheck_core::domain::tracking::{
    ReportRequest, ReportRequestId, ReportResponse, ReportResponseId, RequestType,
    ScreeningResponseStatus, ServiceStatusMap,
};
use leasecheck_core::screening::{ApplicantReportSnapshot, ChainHead, InFlight, ReportPlan};

use super::codec::{
    decode_json, decode_report_data, encode_json, optional_timestamp, parse_enum,
    parse_optional_timestamp, parse_timestamp, timestamp,
};
use super::{
    AppliedResponse, ApplicantReportRepository, RepositoryError, ReportUpdate, RequestDraft,
    ResponseApplication, Submission,
};
use crate::DbPool;

const REPORT_COLUMNS: &str = "r.id, r.applicant_id, r.report_kind, r.status, r.report_data,
    r.application_data, r.property_id, r.external_report_id, r.valid_until, r.obsoleted_by,
    r.completed_at, r.created_at, r.updated_at";

pub(crate) const REQUEST_COLUMNS: &str = "q.id, q.report_id, q.applicant_id, q.report_kind, q.property_id,
    q.request_type, q.raw_request, q.is_obsolete, q.request_ended_at, q.created_at";

pub(crate) const RESPONSE_COLUMNS: &str = "res.id AS response_id, res.request_id,
    res.raw_response, res.payload_fingerprint, res.status AS response_status,
    res.service_status, res.blocked_reason, res.service_blocked_status,
    res.created_at AS response_created_at";

pub struct SqlApplicantReportRepository {
    pool: DbPool,
}

impl SqlApplicantReportRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ApplicantReportRepository for SqlApplicantReportRepository {
    async fn find_report(
        &self,
        id: &ApplicantReportId,
    ) -> Result<Option<ApplicantReport>, RepositoryError> {
        let sql = format!("SELECT {REPORT_COLUMNS} FROM applicant_report r WHERE r.id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;
        row.as_ref().map(report_from_row).transpose()
    }

    async fn chain_head(
        &self,
        applicant_id: &ApplicantId,
        kind: ReportKind,
    ) -> Result<Option<ChainHead>, RepositoryError> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS},
                (SELECT MAX(q.created_at) FROM report_request q WHERE q.report_id = r.id)
                    AS requested_at
             FROM applicant_report r
             WHERE r.applicant_id = ? AND r.report_kind = ? AND r.obsoleted_by IS NULL"
        );
        let row = sqlx::query(&sql)
            .bind(&applicant_id.0)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let in_flight = sqlx::query(
            "SELECT r.id,
                COALESCE(
                    (SELECT MAX(q.created_at) FROM report_request q WHERE q.report_id = r.id),
                    r.updated_at
                ) AS submitted_at
             FROM applicant_report r
             WHERE r.applicant_id = ? AND r.report_kind = ? AND r.status = 'COMPILING'
             ORDER BY r.created_at DESC, r.rowid DESC
             LIMIT 1",
        )
        .bind(&applicant_id.0)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(|row| -> Result<InFlight, RepositoryError> {
            Ok(InFlight {
                report_id: ApplicantReportId(row.try_get("id")?),
                submitted_at: parse_timestamp("submitted_at", row.try_get("submitted_at")?)?,
            })
        })
        .transpose()?;

        Ok(Some(ChainHead {
            report: report_from_row(&row)?,
            requested_at: parse_optional_timestamp("requested_at", row.try_get("requested_at")?)?,
            in_flight,
        }))
    }

    async fn list_reports(
        &self,
        applicant_id: &ApplicantId,
        kind: ReportKind,
    ) -> Result<Vec<ApplicantReport>, RepositoryError> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS}
             FROM applicant_report r
             WHERE r.applicant_id = ? AND r.report_kind = ?
             ORDER BY r.created_at DESC, r.rowid DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(&applicant_id.0)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(report_from_row).collect()
    }

    async fn create_report(
        &self,
        plan: &ReportPlan,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let report = &plan.report;
        let now = timestamp(now);
        let mut tx = self.pool.begin().await?;

        // The new id is inserted below; the obsoleted_by foreign key is
        // checked at commit.
        sqlx::query(
            "UPDATE applicant_report
             SET obsoleted_by = ?,
                 status = CASE WHEN status = 'PENDING' THEN 'CANCELED' ELSE status END,
                 updated_at = ?
             WHERE applicant_id = ? AND report_kind = ? AND obsoleted_by IS NULL",
        )
        .bind(&report.id.0)
        .bind(&now)
        .bind(&report.applicant_id.0)
        .bind(report.report_kind.as_str())
        .execute(&mut *tx)
        .await?;

        // A canceled in-flight report may already sit below a queued head.
        for canceled in &plan.cancels {
            sqlx::query(
                "UPDATE applicant_report
                 SET status = 'CANCELED', obsoleted_by = COALESCE(obsoleted_by, ?), updated_at = ?
                 WHERE id = ? AND status IN ('PENDING', 'COMPILING')",
            )
            .bind(&report.id.0)
            .bind(&now)
            .bind(&canceled.0)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE report_request
                 SET is_obsolete = 1, request_ended_at = COALESCE(request_ended_at, ?)
                 WHERE report_id = ? AND is_obsolete = 0",
            )
            .bind(&now)
            .bind(&canceled.0)
            .execute(&mut *tx)
            .await?;
        }

        let report_data =
            report.report_data.as_ref().map(|data| encode_json("report_data", data)).transpose()?;
        sqlx::query(
            "INSERT INTO applicant_report (
                id, applicant_id, report_kind, status, report_data, application_data,
                property_id, external_report_id, valid_until, obsoleted_by, completed_at,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)",
        )
        .bind(&report.id.0)
        .bind(&report.applicant_id.0)
        .bind(report.report_kind.as_str())
        .bind(report.status.as_str())
        .bind(report_data)
        .bind(encode_json("application_data", &report.application_data)?)
        .bind(report.property_id.as_ref().map(|id| id.0.as_str()))
        .bind(report.external_report_id.as_deref())
        .bind(optional_timestamp(report.valid_until))
        .bind(optional_timestamp(report.completed_at))
        .bind(timestamp(report.created_at))
        .bind(timestamp(report.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn promote_next_pending(
        &self,
        applicant_id: &ApplicantId,
        kind: ReportKind,
        draft: &dyn RequestDraft,
        now: DateTime<Utc>,
    ) -> Result<Option<Submission>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let promoted = promote_pending(&mut *tx, applicant_id, kind, draft, now).await?;
        tx.commit().await?;
        Ok(promoted)
    }

    async fn record_request(&self, request: &ReportRequest) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        insert_request(&mut *tx, request).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_request(
        &self,
        id: &ReportRequestId,
    ) -> Result<Option<ReportRequest>, RepositoryError> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM report_request q WHERE q.id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;
        row.as_ref().map(request_from_row).transpose()
    }

    async fn apply_response(
        &self,
        application: &ResponseApplication,
        draft: &dyn RequestDraft,
    ) -> Result<AppliedResponse, RepositoryError> {
        let now = timestamp(application.now);
        let mut tx = self.pool.begin().await?;

        insert_response(&mut *tx, &application.response).await?;

        let transitioned = match &application.update {
            ReportUpdate::Terminate(termination) => {
                let result = sqlx::query(
                    "UPDATE applicant_report
                     SET status = ?, report_data = ?, external_report_id = ?, valid_until = ?,
                         completed_at = ?, updated_at = ?
                     WHERE id = ? AND status IN ('PENDING', 'COMPILING')",
                )
                .bind(termination.status.as_str())
                .bind(encode_json("report_data", &termination.report_data)?)
                .bind(termination.external_report_id.as_deref())
                .bind(optional_timestamp(termination.valid_until))
                .bind(timestamp(termination.completed_at))
                .bind(&now)
                .bind(&application.report_id.0)
                .execute(&mut *tx)
                .await?;

                let transitioned = result.rows_affected() == 1;
                if transitioned {
                    sqlx::query(
                        "UPDATE report_request SET request_ended_at = ?
                         WHERE id = ? AND request_ended_at IS NULL",
                    )
                    .bind(&now)
                    .bind(&application.response.request_id.0)
                    .execute(&mut *tx)
                    .await?;
                }
                transitioned
            }
            ReportUpdate::MarkCompiling => {
                sqlx::query(
                    "UPDATE applicant_report SET status = 'COMPILING', updated_at = ?
                     WHERE id = ? AND status IN ('PENDING', 'COMPILING')",
                )
                .bind(&now)
                .bind(&application.report_id.0)
                .execute(&mut *tx)
                .await?;
                false
            }
            ReportUpdate::Unchanged => false,
        };

        let promoted = promote_pending(
            &mut *tx,
            &application.applicant_id,
            application.report_kind,
            draft,
            application.now,
        )
        .await?;

        tx.commit().await?;
        Ok(AppliedResponse { transitioned, promoted })
    }

    async fn list_responses(
        &self,
        request_id: &ReportRequestId,
    ) -> Result<Vec<ReportResponse>, RepositoryError> {
        let sql = format!(
            "SELECT {RESPONSE_COLUMNS}
             FROM report_response res
             WHERE res.request_id = ?
             ORDER BY res.created_at ASC, res.rowid ASC"
        );
        let rows = sqlx::query(&sql).bind(&request_id.0).fetch_all(&self.pool).await?;
        rows.iter().map(response_from_row).collect()
    }

    async fn current_snapshots(
        &self,
        applicant_id: &ApplicantId,
    ) -> Result<Vec<ApplicantReportSnapshot>, RepositoryError> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS},
                latest.service_status AS latest_service_status,
                latest.service_blocked_status AS latest_service_blocked_status
             FROM applicant_report r
             LEFT JOIN report_response latest ON latest.id = (
                 SELECT res.id
                 FROM report_response res
                 JOIN report_request q ON q.id = res.request_id
                 WHERE q.report_id = r.id
                 ORDER BY res.created_at DESC, res.rowid DESC
                 LIMIT 1
             )
             WHERE r.applicant_id = ? AND r.obsoleted_by IS NULL
             ORDER BY r.report_kind ASC"
        );
        let rows = sqlx::query(&sql).bind(&applicant_id.0).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<ApplicantReportSnapshot, RepositoryError> {
                let service_status = row
                    .try_get::<Option<String>, _>("latest_service_status")?
                    .map(|raw| decode_json::<ServiceStatusMap>("service_status", &raw))
                    .transpose()?;
                Ok(ApplicantReportSnapshot {
                    report: report_from_row(row)?,
                    service_status,
                    service_blocked_status: row.try_get("latest_service_blocked_status")?,
                })
            })
            .collect()
    }
}

/// Compare-and-set promotion: the newest PENDING report of the pair becomes
/// COMPILING only while no report of the pair is COMPILING. Older PENDING
/// reports are canceled in favor of the promoted one, and the drafted
/// submission is recorded on the same connection.
async fn promote_pending(
    conn: &mut SqliteConnection,
    applicant_id: &ApplicantId,
    kind: ReportKind,
    draft: &dyn RequestDraft,
    now: DateTime<Utc>,
) -> Result<Option<Submission>, RepositoryError> {
    let now = timestamp(now);
    let promoted = sqlx::query(
        "UPDATE applicant_report
         SET status = 'COMPILING', updated_at = ?
         WHERE id = (
             SELECT id FROM applicant_report
             WHERE applicant_id = ? AND report_kind = ? AND status = 'PENDING'
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1
         )
           AND status = 'PENDING'
           AND NOT EXISTS (
             SELECT 1 FROM applicant_report
             WHERE applicant_id = ? AND report_kind = ? AND status = 'COMPILING'
         )
         RETURNING id",
    )
    .bind(&now)
    .bind(&applicant_id.0)
    .bind(kind.as_str())
    .bind(&applicant_id.0)
    .bind(kind.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = promoted else {
        return Ok(None);
    };
    let promoted_id: String = row.try_get("id")?;

    sqlx::query(
        "UPDATE applicant_report
         SET status = 'CANCELED', obsoleted_by = ?, updated_at = ?
         WHERE applicant_id = ? AND report_kind = ? AND status = 'PENDING' AND id <> ?",
    )
    .bind(&promoted_id)
    .bind(&now)
    .bind(&applicant_id.0)
    .bind(kind.as_str())
    .bind(&promoted_id)
    .execute(&mut *conn)
    .await?;

    let sql = format!("SELECT {REPORT_COLUMNS} FROM applicant_report r WHERE r.id = ?");
    let row = sqlx::query(&sql).bind(&promoted_id).fetch_one(&mut *conn).await?;
    let report = report_from_row(&row)?;

    let request = draft.draft(&report)?;
    insert_request(&mut *conn, &request).await?;
    Ok(Some(Submission { report, request }))
}

/// Inserts a submission and obsoletes every other live submission of the
/// pair.
async fn insert_request(
    conn: &mut SqliteConnection,
    request: &ReportRequest,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE report_request
         SET is_obsolete = 1
         WHERE applicant_id = ? AND report_kind = ? AND is_obsolete = 0 AND id <> ?",
    )
    .bind(&request.applicant_id.0)
    .bind(request.report_kind.as_str())
    .bind(&request.id.0)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO report_request (
            id, report_id, applicant_id, report_kind, property_id, request_type,
            raw_request, is_obsolete, request_ended_at, created_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.id.0)
    .bind(&request.report_id.0)
    .bind(&request.applicant_id.0)
    .bind(request.report_kind.as_str())
    .bind(request.property_id.as_ref().map(|id| id.0.as_str()))
    .bind(request.request_type.as_str())
    .bind(&request.raw_request)
    .bind(request.is_obsolete)
    .bind(optional_timestamp(request.request_ended_at))
    .bind(timestamp(request.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_response(
    conn: &mut SqliteConnection,
    response: &ReportResponse,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO report_response (
            id, request_id, raw_response, payload_fingerprint, status, service_status,
            blocked_reason, service_blocked_status, created_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&response.id.0)
    .bind(&response.request_id.0)
    .bind(&response.raw_response)
    .bind(&response.payload_fingerprint)
    .bind(response.status.as_str())
    .bind(encode_json("service_status", &response.service_status)?)
    .bind(response.blocked_reason.map(|reason| reason.as_str()))
    .bind(response.service_blocked_status.as_deref())
    .bind(timestamp(response.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) fn report_from_row(row: &SqliteRow) -> Result<ApplicantReport, RepositoryError> {
    let kind = parse_enum("report kind", &row.try_get::<String, _>("report_kind")?, ReportKind::parse)?;
    let status =
        parse_enum("report status", &row.try_get::<String, _>("status")?, ReportStatus::parse)?;
    let report_data = row
        .try_get::<Option<String>, _>("report_data")?
        .map(|raw| decode_report_data(kind, &raw))
        .transpose()?;
    let application_data: ApplicationData =
        decode_json("application_data", &row.try_get::<String, _>("application_data")?)?;

    Ok(ApplicantReport {
        id: ApplicantReportId(row.try_get("id")?),
        applicant_id: ApplicantId(row.try_get("applicant_id")?),
        report_kind: kind,
        status,
        report_data,
        application_data,
        property_id: row.try_get::<Option<String>, _>("property_id")?.map(PropertyId),
        external_report_id: row.try_get("external_report_id")?,
        valid_until: parse_optional_timestamp("valid_until", row.try_get("valid_until")?)?,
        obsoleted_by: row.try_get::<Option<String>, _>("obsoleted_by")?.map(ApplicantReportId),
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub(crate) fn request_from_row(row: &SqliteRow) -> Result<ReportRequest, RepositoryError> {
    Ok(ReportRequest {
        id: ReportRequestId(row.try_get("id")?),
        report_id: ApplicantReportId(row.try_get("report_id")?),
        applicant_id: ApplicantId(row.try_get("applicant_id")?),
        report_kind: parse_enum(
            "report kind",
            &row.try_get::<String, _>("report_kind")?,
            ReportKind::parse,
        )?,
        property_id: row.try_get::<Option<String>, _>("property_id")?.map(PropertyId),
        request_type: parse_enum(
            "request type",
            &row.try_get::<String, _>("request_type")?,
            RequestType::parse,
        )?,
        raw_request: row.try_get("raw_request")?,
        is_obsolete: row.try_get("is_obsolete")?,
        request_ended_at: parse_optional_timestamp(
            "request_ended_at",
            row.try_get("request_ended_at")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

/// Decodes the aliased columns of [`RESPONSE_COLUMNS`].
pub(crate) fn response_from_row(row: &SqliteRow) -> Result<ReportResponse, RepositoryError> {
    Ok(ReportResponse {
        id: ReportResponseId(row.try_get("response_id")?),
        request_id: ReportRequestId(row.try_get("request_id")?),
        raw_response: row.try_get("raw_response")?,
        payload_fingerprint: row.try_get("payload_fingerprint")?,
        status: parse_enum(
            "response status",
            &row.try_get::<String, _>("response_status")?,
            ScreeningResponseStatus::parse,
        )?,
        service_status: decode_json("service_status", &row.try_get::<String, _>("service_status")?)?,
        blocked_reason: row
            .try_get::<Option<String>, _>("blocked_reason")?
            .map(|raw| parse_enum("blocked reason", &raw, BlockedReason::parse))
            .transpose()?,
        service_blocked_status: row.try_get("service_blocked_status")?,
        created_at: parse_timestamp("response_created_at", row.try_get("response_created_at")?)?,
    })
}
