use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;

use sokoni_core::domain::ledger::{
    CommissionRecord, CommissionStatus, LedgerAccount, LedgerEntry, LedgerEntryId, ProfileId,
};
use sokoni_core::domain::session::SessionId;

use super::{LedgerRepository, RepositoryError, TransferOutcome};
use crate::DbPool;

pub struct SqlLedgerRepository {
    pool: DbPool,
}

impl SqlLedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LedgerRepository for SqlLedgerRepository {
    async fn get_account(
        &self,
        profile_id: &ProfileId,
    ) -> Result<Option<LedgerAccount>, RepositoryError> {
        let row = sqlx::query(
            "SELECT profile_id, balance, pending, updated_at \
             FROM ledger_accounts WHERE profile_id = ?",
        )
        .bind(&profile_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(account_from_row))
    }

    async fn apply_delta(
        &self,
        profile_id: &ProfileId,
        delta: i64,
        entry_type: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(i64, Option<LedgerEntryId>), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let applied = apply_delta_on(&mut tx, profile_id, delta, entry_type, metadata, now).await?;
        tx.commit().await?;
        Ok(applied)
    }

    async fn transfer(
        &self,
        from: &ProfileId,
        to: &ProfileId,
        amount: i64,
        reason: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<TransferOutcome, RepositoryError> {
        // Debit then credit in one transaction; any failure rolls both back.
        let mut tx = self.pool.begin().await?;

        let (from_balance, entry_from) =
            apply_delta_on(&mut tx, from, -amount, reason, metadata.clone(), now).await?;
        let (to_balance, entry_to) =
            apply_delta_on(&mut tx, to, amount, reason, metadata, now).await?;

        let (entry_from, entry_to) = match (entry_from, entry_to) {
            (Some(entry_from), Some(entry_to)) => (entry_from, entry_to),
            _ => {
                return Err(RepositoryError::Decode(
                    "transfer of zero tokens records no entries".to_string(),
                ));
            }
        };

        tx.commit().await?;

        Ok(TransferOutcome { from_balance, to_balance, entry_from, entry_to })
    }

    async fn reserve(
        &self,
        profile_id: &ProfileId,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<LedgerAccount, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        ensure_account(&mut tx, profile_id, now).await?;

        let result = sqlx::query(
            "UPDATE ledger_accounts \
             SET balance = balance - ?, pending = pending + ?, updated_at = ? \
             WHERE profile_id = ? AND balance - ? >= 0",
        )
        .bind(amount)
        .bind(amount)
        .bind(now)
        .bind(&profile_id.0)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let balance = current_balance(&mut tx, profile_id).await?;
            return Err(RepositoryError::InsufficientBalance {
                profile_id: profile_id.0.clone(),
                balance,
                delta: -amount,
            });
        }

        insert_entry(&mut tx, profile_id, -amount, "reserve", serde_json::json!({}), now).await?;
        let account = fetch_account(&mut tx, profile_id).await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn release(
        &self,
        profile_id: &ProfileId,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<LedgerAccount, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        ensure_account(&mut tx, profile_id, now).await?;

        let result = sqlx::query(
            "UPDATE ledger_accounts \
             SET balance = balance + ?, pending = pending - ?, updated_at = ? \
             WHERE profile_id = ? AND pending - ? >= 0",
        )
        .bind(amount)
        .bind(amount)
        .bind(now)
        .bind(&profile_id.0)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let balance = current_balance(&mut tx, profile_id).await?;
            return Err(RepositoryError::InsufficientBalance {
                profile_id: profile_id.0.clone(),
                balance,
                delta: -amount,
            });
        }

        insert_entry(&mut tx, profile_id, amount, "release", serde_json::json!({}), now).await?;
        let account = fetch_account(&mut tx, profile_id).await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn entries_for_profile(
        &self,
        profile_id: &ProfileId,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, profile_id, delta, entry_type, metadata, created_at \
             FROM ledger_entries WHERE profile_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(&profile_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn insert_commission(&self, record: CommissionRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO commission_records (id, session_id, vendor_profile_id, \
             broker_profile_id, amount, status, created_at, paid_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.session_id.0)
        .bind(&record.vendor_profile_id.0)
        .bind(&record.broker_profile_id.0)
        .bind(record.amount)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.paid_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_commission_paid(
        &self,
        id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE commission_records SET status = 'paid', paid_at = ? \
             WHERE id = ? AND status = 'due'",
        )
        .bind(paid_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_commissions(
        &self,
        status: Option<CommissionStatus>,
    ) -> Result<Vec<CommissionRecord>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(
                "SELECT id, session_id, vendor_profile_id, broker_profile_id, amount, status, \
                 created_at, paid_at FROM commission_records WHERE status = ? \
                 ORDER BY created_at ASC",
            )
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, session_id, vendor_profile_id, broker_profile_id, amount, status, \
                 created_at, paid_at FROM commission_records ORDER BY created_at ASC",
            )
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(commission_from_row).collect()
    }
}

async fn ensure_account(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    profile_id: &ProfileId,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO ledger_accounts (profile_id, balance, pending, updated_at) \
         VALUES (?, 0, 0, ?) ON CONFLICT(profile_id) DO NOTHING",
    )
    .bind(&profile_id.0)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn current_balance(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    profile_id: &ProfileId,
) -> Result<i64, RepositoryError> {
    let balance: i64 =
        sqlx::query_scalar("SELECT balance FROM ledger_accounts WHERE profile_id = ?")
            .bind(&profile_id.0)
            .fetch_one(&mut **tx)
            .await?;
    Ok(balance)
}

async fn fetch_account(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    profile_id: &ProfileId,
) -> Result<LedgerAccount, RepositoryError> {
    let row = sqlx::query(
        "SELECT profile_id, balance, pending, updated_at FROM ledger_accounts \
         WHERE profile_id = ?",
    )
    .bind(&profile_id.0)
    .fetch_one(&mut **tx)
    .await?;
    Ok(account_from_row(row))
}

async fn insert_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    profile_id: &ProfileId,
    delta: i64,
    entry_type: &str,
    metadata: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<LedgerEntryId, RepositoryError> {
    let entry_id = LedgerEntryId(Uuid::new_v4().to_string());
    sqlx::query(
        "INSERT INTO ledger_entries (id, profile_id, delta, entry_type, metadata, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry_id.0)
    .bind(&profile_id.0)
    .bind(delta)
    .bind(entry_type)
    .bind(metadata.to_string())
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(entry_id)
}

async fn apply_delta_on(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    profile_id: &ProfileId,
    delta: i64,
    entry_type: &str,
    metadata: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<(i64, Option<LedgerEntryId>), RepositoryError> {
    ensure_account(tx, profile_id, now).await?;

    // Zero deltas read the balance but are never recorded.
    if delta == 0 {
        return Ok((current_balance(tx, profile_id).await?, None));
    }

    let result = sqlx::query(
        "UPDATE ledger_accounts SET balance = balance + ?, updated_at = ? \
         WHERE profile_id = ? AND balance + ? >= 0",
    )
    .bind(delta)
    .bind(now)
    .bind(&profile_id.0)
    .bind(delta)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        let balance = current_balance(tx, profile_id).await?;
        return Err(RepositoryError::InsufficientBalance {
            profile_id: profile_id.0.clone(),
            balance,
            delta,
        });
    }

    let entry_id = insert_entry(tx, profile_id, delta, entry_type, metadata, now).await?;
    let balance = current_balance(tx, profile_id).await?;
    Ok((balance, Some(entry_id)))
}

fn account_from_row(row: SqliteRow) -> LedgerAccount {
    LedgerAccount {
        profile_id: ProfileId(row.get("profile_id")),
        balance: row.get("balance"),
        pending: row.get("pending"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

fn entry_from_row(row: SqliteRow) -> Result<LedgerEntry, RepositoryError> {
    let metadata_raw: String = row.get("metadata");
    let metadata = serde_json::from_str(&metadata_raw)
        .map_err(|error| RepositoryError::Decode(format!("ledger entry metadata: {error}")))?;

    Ok(LedgerEntry {
        id: LedgerEntryId(row.get("id")),
        profile_id: ProfileId(row.get("profile_id")),
        delta: row.get("delta"),
        entry_type: row.get("entry_type"),
        metadata,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

fn commission_from_row(row: SqliteRow) -> Result<CommissionRecord, RepositoryError> {
    let status_raw: String = row.get("status");
    let status = CommissionStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown commission status `{status_raw}`"))
    })?;

    Ok(CommissionRecord {
        id: row.get("id"),
        session_id: SessionId(row.get("session_id")),
        vendor_profile_id: ProfileId(row.get("vendor_profile_id")),
        broker_profile_id: ProfileId(row.get("broker_profile_id")),
        amount: row.get("amount"),
        status,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        paid_at: row.get::<Option<DateTime<Utc>>, _>("paid_at"),
    })
}
