use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use sokoni_core::domain::idempotency::{
    IdempotencyKey, IdempotencyRecord, IdempotencyState, StoredResponse,
};

use super::{IdempotencyRepository, PurgeOutcome, RepositoryError, ReserveOutcome};
use crate::DbPool;

/// Body stored when a pending execution never finalized within the TTL.
pub const SYNTHETIC_TIMEOUT_STATUS: u16 = 504;
pub const SYNTHETIC_TIMEOUT_BODY: &str =
    r#"{"error":"the original request did not complete in time"}"#;

pub struct SqlIdempotencyRepository {
    pool: DbPool,
}

impl SqlIdempotencyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IdempotencyRepository for SqlIdempotencyRepository {
    async fn try_reserve(
        &self,
        key: &IdempotencyKey,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO idempotency_records (key, state, payload_hash, created_at) \
             VALUES (?, 'pending', ?, ?) \
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(key.as_str())
        .bind(payload_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(ReserveOutcome::Reserved);
        }

        let existing = self.find(key).await?.ok_or_else(|| {
            RepositoryError::Decode("idempotency record vanished during reserve".to_string())
        })?;
        Ok(ReserveOutcome::Existing(existing))
    }

    async fn find(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT key, state, payload_hash, response_status, response_body, created_at, \
             finalized_at FROM idempotency_records WHERE key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn finalize(
        &self,
        key: &IdempotencyKey,
        response: &StoredResponse,
        finalized_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE idempotency_records \
             SET state = 'completed', response_status = ?, response_body = ?, finalized_at = ? \
             WHERE key = ? AND state = 'pending'",
        )
        .bind(i64::from(response.status))
        .bind(response.body.to_string())
        .bind(finalized_at)
        .bind(key.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge(
        &self,
        now: DateTime<Utc>,
        success_ttl: Duration,
        pending_ttl: Duration,
    ) -> Result<PurgeOutcome, RepositoryError> {
        let pending_cutoff = now - pending_ttl;
        let resolved = sqlx::query(
            "UPDATE idempotency_records \
             SET state = 'completed', response_status = ?, response_body = ?, finalized_at = ? \
             WHERE state = 'pending' AND created_at <= ?",
        )
        .bind(i64::from(SYNTHETIC_TIMEOUT_STATUS))
        .bind(SYNTHETIC_TIMEOUT_BODY)
        .bind(now)
        .bind(pending_cutoff)
        .execute(&self.pool)
        .await?;

        let success_cutoff = now - success_ttl;
        let purged = sqlx::query(
            "DELETE FROM idempotency_records \
             WHERE state = 'completed' AND finalized_at IS NOT NULL AND finalized_at <= ?",
        )
        .bind(success_cutoff)
        .execute(&self.pool)
        .await?;

        Ok(PurgeOutcome {
            resolved_pending: resolved.rows_affected(),
            purged: purged.rows_affected(),
        })
    }
}

fn record_from_row(row: SqliteRow) -> Result<IdempotencyRecord, RepositoryError> {
    let key_raw: String = row.get("key");
    let key = IdempotencyKey::new(key_raw).map_err(RepositoryError::Decode)?;

    let state_raw: String = row.get("state");
    let state = IdempotencyState::parse(&state_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown idempotency state `{state_raw}`"))
    })?;

    let response_status: Option<i64> = row.get("response_status");
    let response_body: Option<String> = row.get("response_body");
    let response = match (response_status, response_body) {
        (Some(status), Some(body)) => {
            let status = u16::try_from(status)
                .map_err(|_| RepositoryError::Decode("response_status out of range".to_string()))?;
            let body = serde_json::from_str(&body)
                .map_err(|error| RepositoryError::Decode(format!("response_body: {error}")))?;
            Some(StoredResponse { status, body })
        }
        _ => None,
    };

    Ok(IdempotencyRecord {
        key,
        state,
        payload_hash: row.get("payload_hash"),
        response,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        finalized_at: row.get::<Option<DateTime<Utc>>, _>("finalized_at"),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use sokoni_core::domain::idempotency::{
        hash_payload, IdempotencyKey, IdempotencyState, StoredResponse,
    };

    use super::SqlIdempotencyRepository;
    use crate::repositories::{IdempotencyRepository, ReserveOutcome};
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlIdempotencyRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlIdempotencyRepository::new(pool)
    }

    fn key(value: &str) -> IdempotencyKey {
        IdempotencyKey::new(value.to_string()).expect("valid key")
    }

    #[tokio::test]
    async fn first_reserve_wins_and_replays_thereafter() {
        let repo = repo().await;
        let key = key("submit-quote-000000001");
        let hash = hash_payload("{\"offer\":1}");
        let now = Utc::now();

        let first = repo.try_reserve(&key, &hash, now).await.expect("reserve");
        assert_eq!(first, ReserveOutcome::Reserved);

        let second = repo.try_reserve(&key, &hash, now).await.expect("second reserve");
        let ReserveOutcome::Existing(record) = second else {
            panic!("second caller must observe the pending record");
        };
        assert_eq!(record.state, IdempotencyState::Pending);
        assert!(record.response.is_none());
    }

    #[tokio::test]
    async fn finalize_stores_the_replayable_response() {
        let repo = repo().await;
        let key = key("select-quote-000000001");
        let now = Utc::now();

        repo.try_reserve(&key, &hash_of("{}"), now).await.expect("reserve");
        repo.finalize(
            &key,
            &StoredResponse { status: 200, body: serde_json::json!({"quoteId": "Q-1"}) },
            now,
        )
        .await
        .expect("finalize");

        let record = repo.find(&key).await.expect("find").expect("present");
        assert_eq!(record.state, IdempotencyState::Completed);
        let response = record.response.expect("stored response");
        assert_eq!(response.status, 200);
        assert_eq!(response.body["quoteId"], "Q-1");
    }

    #[tokio::test]
    async fn purge_resolves_stale_pending_and_drops_expired_success() {
        let repo = repo().await;
        let now = Utc::now();
        let stale_key = key("stale-pending-00000001");
        let old_key = key("old-success-0000000001");
        let fresh_key = key("fresh-pending-00000001");

        repo.try_reserve(&stale_key, &hash_of("a"), now - Duration::seconds(120))
            .await
            .expect("stale reserve");
        repo.try_reserve(&old_key, &hash_of("b"), now - Duration::hours(30))
            .await
            .expect("old reserve");
        repo.finalize(
            &old_key,
            &StoredResponse { status: 200, body: serde_json::json!({}) },
            now - Duration::hours(25),
        )
        .await
        .expect("finalize old");
        repo.try_reserve(&fresh_key, &hash_of("c"), now).await.expect("fresh reserve");

        let outcome = repo
            .purge(now, Duration::hours(24), Duration::seconds(60))
            .await
            .expect("purge");
        assert_eq!(outcome.resolved_pending, 1);
        assert_eq!(outcome.purged, 1);

        let stale = repo.find(&stale_key).await.expect("find").expect("still present");
        assert_eq!(stale.state, IdempotencyState::Completed);
        assert_eq!(stale.response.expect("synthetic response").status, 504);

        assert!(repo.find(&old_key).await.expect("find").is_none());

        let fresh = repo.find(&fresh_key).await.expect("find").expect("present");
        assert_eq!(fresh.state, IdempotencyState::Pending);
    }

    fn hash_of(payload: &str) -> String {
        hash_payload(payload)
    }
}
