use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "sessions",
        "quotes",
        "idempotency_records",
        "ledger_accounts",
        "ledger_entries",
        "commission_records",
        "idx_sessions_status",
        "idx_sessions_requester_id",
        "idx_sessions_deadline_at",
        "idx_quotes_session_id",
        "idx_quotes_status",
        "idx_idempotency_records_state",
        "idx_idempotency_records_created_at",
        "idx_ledger_entries_profile_id",
        "idx_ledger_entries_created_at",
        "idx_commission_records_session_id",
        "idx_commission_records_status",
    ];

    #[tokio::test]
    async fn migrations_create_every_managed_object() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master \
                 WHERE type IN ('table', 'index') AND name = ?",
            )
            .bind(object)
            .fetch_one(&pool)
            .await
            .expect("check schema object")
            .get::<i64, _>("count");

            assert_eq!(count, 1, "expected schema object `{object}` after migrations");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run is a no-op");
    }

    #[tokio::test]
    async fn vendor_uniqueness_is_enforced_by_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query(
            "INSERT INTO sessions (id, requester_id, flow_type, agent_type, status, \
             request_data, started_at, deadline_at, updated_at) \
             VALUES ('S-1', 'u-1', 'ride', 'driver', 'searching', '{}', \
             '2026-01-01T10:00:00Z', '2026-01-01T10:05:00Z', '2026-01-01T10:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert session");

        let insert_quote = |id: &'static str| {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    "INSERT INTO quotes (id, session_id, vendor_type, vendor_name, \
                     vendor_contact, offer_data, status, responded_at, created_at, updated_at) \
                     VALUES (?, 'S-1', 'driver', 'Juma', '+254700000001', '{}', 'received', \
                     '2026-01-01T10:01:00Z', '2026-01-01T10:01:00Z', '2026-01-01T10:01:00Z')",
                )
                .bind(id)
                .execute(&pool)
                .await
            }
        };

        insert_quote("Q-1").await.expect("first quote");
        let error = insert_quote("Q-2").await.expect_err("duplicate vendor contact");
        assert!(error.to_string().to_lowercase().contains("unique"));
    }
}
