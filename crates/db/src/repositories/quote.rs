use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use sokoni_core::domain::quote::{Quote, QuoteId, QuoteStatus, VendorContact};
use sokoni_core::domain::session::SessionId;

use super::{QuoteRepository, RepositoryError};
use crate::DbPool;

const QUOTE_COLUMNS: &str = "id, session_id, vendor_id, vendor_type, vendor_name, \
     vendor_contact, offer_data, status, responded_at, expires_at, ranking_score, \
     created_at, updated_at";

pub struct SqlQuoteRepository {
    pool: DbPool,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl QuoteRepository for SqlQuoteRepository {
    async fn upsert_offer(&self, candidate: Quote) -> Result<(Quote, bool), RepositoryError> {
        // A resubmission from the same contact supersedes the earlier offer
        // in place, unless that offer already left the open statuses.
        let row = sqlx::query(&format!(
            "INSERT INTO quotes (id, session_id, vendor_id, vendor_type, vendor_name, \
             vendor_contact, offer_data, status, responded_at, expires_at, ranking_score, \
             created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(session_id, vendor_contact) DO UPDATE SET \
                vendor_id = excluded.vendor_id, \
                vendor_type = excluded.vendor_type, \
                vendor_name = excluded.vendor_name, \
                offer_data = excluded.offer_data, \
                status = 'counter_offered', \
                responded_at = excluded.responded_at, \
                expires_at = excluded.expires_at, \
                ranking_score = excluded.ranking_score, \
                updated_at = excluded.updated_at \
             WHERE quotes.status IN ('pending', 'received', 'counter_offered') \
             RETURNING {QUOTE_COLUMNS}",
        ))
        .bind(&candidate.id.0)
        .bind(&candidate.session_id.0)
        .bind(&candidate.vendor_id)
        .bind(&candidate.vendor_type)
        .bind(&candidate.vendor_name)
        .bind(&candidate.vendor_contact.0)
        .bind(candidate.offer_data.to_string())
        .bind(candidate.status.as_str())
        .bind(candidate.responded_at)
        .bind(candidate.expires_at)
        .bind(candidate.ranking_score)
        .bind(candidate.created_at)
        .bind(candidate.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let stored = quote_from_row(row)?;
                let created = stored.id == candidate.id;
                Ok((stored, created))
            }
            // The conflict target matched but the settled status blocked the
            // update; hand back the existing row untouched.
            None => {
                let existing = self
                    .find_by_contact(&candidate.session_id, &candidate.vendor_contact)
                    .await?
                    .ok_or_else(|| {
                        RepositoryError::Decode(
                            "upsert returned no row and no existing quote".to_string(),
                        )
                    })?;
                Ok((existing, false))
            }
        }
    }

    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM quotes WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(quote_from_row).transpose()
    }

    async fn list_ranked(&self, session_id: &SessionId) -> Result<Vec<Quote>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes \
             WHERE session_id = ? \
             ORDER BY ranking_score IS NULL, ranking_score DESC, responded_at ASC",
        ))
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(quote_from_row).collect()
    }

    async fn set_status_guarded(
        &self,
        id: &QuoteId,
        from: &[QuoteStatus],
        to: QuoteStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let guard = from.iter().map(|status| format!("'{}'", status.as_str())).collect::<Vec<_>>();
        let result = sqlx::query(&format!(
            "UPDATE quotes SET status = ?, updated_at = ? \
             WHERE id = ? AND status IN ({})",
            guard.join(", "),
        ))
        .bind(to.as_str())
        .bind(updated_at)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_expired(
        &self,
        session_id: &SessionId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE quotes SET status = 'expired', updated_at = ? \
             WHERE session_id = ? \
               AND status IN ('pending', 'received') \
               AND expires_at IS NOT NULL \
               AND expires_at <= ?",
        )
        .bind(cutoff)
        .bind(&session_id.0)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

impl SqlQuoteRepository {
    async fn find_by_contact(
        &self,
        session_id: &SessionId,
        contact: &VendorContact,
    ) -> Result<Option<Quote>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes WHERE session_id = ? AND vendor_contact = ?",
        ))
        .bind(&session_id.0)
        .bind(&contact.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(quote_from_row).transpose()
    }
}

fn quote_from_row(row: SqliteRow) -> Result<Quote, RepositoryError> {
    let status_raw: String = row.get("status");
    let status = QuoteStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown quote status `{status_raw}`")))?;

    let offer_data_raw: String = row.get("offer_data");
    let offer_data = serde_json::from_str(&offer_data_raw)
        .map_err(|error| RepositoryError::Decode(format!("offer_data: {error}")))?;

    Ok(Quote {
        id: QuoteId(row.get("id")),
        session_id: SessionId(row.get("session_id")),
        vendor_id: row.get("vendor_id"),
        vendor_type: row.get("vendor_type"),
        vendor_name: row.get("vendor_name"),
        vendor_contact: VendorContact(row.get("vendor_contact")),
        offer_data,
        status,
        responded_at: row.get::<DateTime<Utc>, _>("responded_at"),
        expires_at: row.get::<Option<DateTime<Utc>>, _>("expires_at"),
        ranking_score: row.get("ranking_score"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}
