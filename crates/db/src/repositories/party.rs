use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use leasecheck_core::domain::applicant::{ApplicantId, LeaseType, MemberType, PartyId, PropertyId};
use leasecheck_core::domain::party::{
    Party, PartyMember, PropertyApplicationSettings, PublishedQuote, ReportRequirements,
    ScreeningCriteria,
};

use super::codec::{decode_json, encode_json, parse_enum, timestamp};
use super::{PartyRepository, RepositoryError};
use crate::DbPool;

/// Party directory tables. They are owned by the party and quote services;
/// the write methods exist for seeding and operator tooling.
pub struct SqlPartyRepository {
    pool: DbPool,
}

impl SqlPartyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PartyRepository for SqlPartyRepository {
    async fn find_party(&self, id: &PartyId) -> Result<Option<Party>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, lease_type, assigned_property_id, is_active FROM party WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(party_from_row).transpose()
    }

    async fn active_members(
        &self,
        party_id: &PartyId,
    ) -> Result<Vec<PartyMember>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT party_id, applicant_id, member_type
             FROM party_member
             WHERE party_id = ? AND is_active = 1
             ORDER BY rowid ASC",
        )
        .bind(&party_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(member_from_row).collect()
    }

    async fn active_parties_for_applicant(
        &self,
        applicant_id: &ApplicantId,
    ) -> Result<Vec<PartyId>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT p.id
             FROM party p
             JOIN party_member m ON m.party_id = p.id
             WHERE m.applicant_id = ? AND m.is_active = 1 AND p.is_active = 1
             ORDER BY p.id ASC",
        )
        .bind(&applicant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PartyId, RepositoryError> { Ok(PartyId(row.try_get("id")?)) })
            .collect()
    }

    async fn application_settings(
        &self,
        property_ids: &[PropertyId],
    ) -> Result<Vec<PropertyApplicationSettings>, RepositoryError> {
        let mut all = Vec::with_capacity(property_ids.len());
        for property_id in property_ids {
            let rows = sqlx::query(
                "SELECT lease_type, member_type, credit_report_required, criminal_report_required
                 FROM property_application_settings
                 WHERE property_id = ?",
            )
            .bind(&property_id.0)
            .fetch_all(&self.pool)
            .await?;

            let mut settings = PropertyApplicationSettings::new(property_id.clone());
            for row in &rows {
                settings = settings.with(
                    parse_enum(
                        "lease type",
                        &row.try_get::<String, _>("lease_type")?,
                        LeaseType::parse,
                    )?,
                    parse_enum(
                        "member type",
                        &row.try_get::<String, _>("member_type")?,
                        MemberType::parse,
                    )?,
                    ReportRequirements {
                        credit_report_required_flag: row.try_get("credit_report_required")?,
                        criminal_report_required_flag: row.try_get("criminal_report_required")?,
                    },
                );
            }
            all.push(settings);
        }
        Ok(all)
    }

    async fn screening_criteria(
        &self,
        property_ids: &[PropertyId],
        lease_type: LeaseType,
    ) -> Result<Vec<ScreeningCriteria>, RepositoryError> {
        let mut all = Vec::new();
        for property_id in property_ids {
            let row = sqlx::query(
                "SELECT criteria
                 FROM property_screening_criteria
                 WHERE property_id = ? AND lease_type = ? AND inactive = 0",
            )
            .bind(&property_id.0)
            .bind(lease_type.as_str())
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                let criteria: Map<String, Value> =
                    decode_json("criteria", &row.try_get::<String, _>("criteria")?)?;
                all.push(ScreeningCriteria {
                    property_id: property_id.clone(),
                    lease_type,
                    criteria,
                });
            }
        }
        Ok(all)
    }

    async fn published_quotes(
        &self,
        party_id: &PartyId,
    ) -> Result<Vec<PublishedQuote>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, property_id, lease_start_date, terms
             FROM party_quote
             WHERE party_id = ?
             ORDER BY published_at ASC, id ASC",
        )
        .bind(&party_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(quote_from_row).collect()
    }

    async fn save_party(
        &self,
        party: &Party,
        members: &[PartyMember],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO party (id, lease_type, assigned_property_id, is_active, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                lease_type = excluded.lease_type,
                assigned_property_id = excluded.assigned_property_id,
                is_active = excluded.is_active",
        )
        .bind(&party.id.0)
        .bind(party.lease_type.as_str())
        .bind(party.assigned_property_id.as_ref().map(|id| id.0.as_str()))
        .bind(party.is_active)
        .bind(timestamp(Utc::now()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE party_member SET is_active = 0 WHERE party_id = ?")
            .bind(&party.id.0)
            .execute(&mut *tx)
            .await?;

        for member in members {
            sqlx::query(
                "INSERT INTO party_member (party_id, applicant_id, member_type, is_active)
                 VALUES (?, ?, ?, 1)
                 ON CONFLICT(party_id, applicant_id) DO UPDATE SET
                    member_type = excluded.member_type,
                    is_active = 1",
            )
            .bind(&party.id.0)
            .bind(&member.applicant_id.0)
            .bind(member.member_type.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_application_settings(
        &self,
        settings: &PropertyApplicationSettings,
    ) -> Result<(), RepositoryError> {
        let property_id = settings.property_id.as_ref().ok_or_else(|| {
            RepositoryError::Decode("application settings need a property id".to_string())
        })?;
        let mut tx = self.pool.begin().await?;

        for (lease_type, by_member) in &settings.settings {
            for (member_type, requirements) in by_member {
                sqlx::query(
                    "INSERT INTO property_application_settings (
                        property_id, lease_type, member_type, credit_report_required,
                        criminal_report_required
                     ) VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT(property_id, lease_type, member_type) DO UPDATE SET
                        credit_report_required = excluded.credit_report_required,
                        criminal_report_required = excluded.criminal_report_required",
                )
                .bind(&property_id.0)
                .bind(lease_type.as_str())
                .bind(member_type.as_str())
                .bind(requirements.credit_report_required_flag)
                .bind(requirements.criminal_report_required_flag)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_screening_criteria(
        &self,
        criteria: &ScreeningCriteria,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO property_screening_criteria (property_id, lease_type, criteria, inactive)
             VALUES (?, ?, ?, 0)
             ON CONFLICT(property_id, lease_type) DO UPDATE SET
                criteria = excluded.criteria,
                inactive = 0",
        )
        .bind(&criteria.property_id.0)
        .bind(criteria.lease_type.as_str())
        .bind(encode_json("criteria", &criteria.criteria)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_published_quote(
        &self,
        party_id: &PartyId,
        quote: &PublishedQuote,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO party_quote (id, party_id, property_id, lease_start_date, terms, published_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                property_id = excluded.property_id,
                lease_start_date = excluded.lease_start_date,
                terms = excluded.terms",
        )
        .bind(&quote.quote_id)
        .bind(&party_id.0)
        .bind(&quote.property_id.0)
        .bind(quote.lease_start_date.as_deref())
        .bind(encode_json("terms", &quote.terms)?)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn party_from_row(row: &SqliteRow) -> Result<Party, RepositoryError> {
    Ok(Party {
        id: PartyId(row.try_get("id")?),
        lease_type: parse_enum(
            "lease type",
            &row.try_get::<String, _>("lease_type")?,
            LeaseType::parse,
        )?,
        assigned_property_id: row
            .try_get::<Option<String>, _>("assigned_property_id")?
            .map(PropertyId),
        is_active: row.try_get("is_active")?,
    })
}

fn member_from_row(row: &SqliteRow) -> Result<PartyMember, RepositoryError> {
    Ok(PartyMember {
        party_id: PartyId(row.try_get("party_id")?),
        applicant_id: ApplicantId(row.try_get("applicant_id")?),
        member_type: parse_enum(
            "member type",
            &row.try_get::<String, _>("member_type")?,
            MemberType::parse,
        )?,
    })
}

fn quote_from_row(row: &SqliteRow) -> Result<PublishedQuote, RepositoryError> {
    Ok(PublishedQuote {
        quote_id: row.try_get("id")?,
        property_id: PropertyId(row.try_get("property_id")?),
        lease_start_date: row.try_get("lease_start_date")?,
        terms: decode_json("terms", &row.try_get::<String, _>("terms")?)?,
    })
}
