use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use sokoni_core::domain::session::{
    FlowType, Session, SessionId, SessionStatus, SettlementTerms,
};

use super::{RepositoryError, SessionRepository, SessionTransition};
use crate::DbPool;

const SESSION_COLUMNS: &str = "id, requester_id, flow_type, agent_type, status, request_data, \
     started_at, deadline_at, extensions_count, max_extensions, selected_quote_id, \
     cancellation_reason, error_message, settlement_json, state_version, updated_at";

const ACTIVE_STATUSES: &str = "'searching', 'negotiating', 'presenting'";

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn insert(&self, session: Session) -> Result<(), RepositoryError> {
        let settlement_json = session
            .settlement
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO sessions (id, requester_id, flow_type, agent_type, status, \
             request_data, started_at, deadline_at, extensions_count, max_extensions, \
             selected_quote_id, cancellation_reason, error_message, settlement_json, \
             state_version, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id.0)
        .bind(&session.requester_id)
        .bind(session.flow_type.as_str())
        .bind(&session.agent_type)
        .bind(session.status.as_str())
        .bind(session.request_data.to_string())
        .bind(session.started_at)
        .bind(session.deadline_at)
        .bind(i64::from(session.extensions_count))
        .bind(i64::from(session.max_extensions))
        .bind(&session.selected_quote_id)
        .bind(&session.cancellation_reason)
        .bind(&session.error_message)
        .bind(settlement_json)
        .bind(session.state_version)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(session_from_row).transpose()
    }

    async fn find_active_for_requester(
        &self,
        requester_id: &str,
        flow_type: FlowType,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE requester_id = ? AND flow_type = ? AND status IN ({ACTIVE_STATUSES}) \
             ORDER BY started_at DESC LIMIT 1",
        ))
        .bind(requester_id)
        .bind(flow_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Session>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE status IN ({ACTIVE_STATUSES}) \
             ORDER BY deadline_at ASC, started_at ASC",
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(session_from_row).collect()
    }

    async fn apply_transition(
        &self,
        transition: SessionTransition,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE sessions SET \
                status = ?, \
                deadline_at = COALESCE(?, deadline_at), \
                extensions_count = COALESCE(?, extensions_count), \
                selected_quote_id = COALESCE(?, selected_quote_id), \
                cancellation_reason = COALESCE(?, cancellation_reason), \
                error_message = COALESCE(?, error_message), \
                state_version = state_version + 1, \
                updated_at = ? \
             WHERE id = ? AND state_version = ?",
        )
        .bind(transition.status.as_str())
        .bind(transition.deadline_at)
        .bind(transition.extensions_count.map(i64::from))
        .bind(transition.selected_quote_id)
        .bind(transition.cancellation_reason)
        .bind(transition.error_message)
        .bind(transition.updated_at)
        .bind(&transition.id.0)
        .bind(transition.expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn session_from_row(row: SqliteRow) -> Result<Session, RepositoryError> {
    let flow_type_raw: String = row.get("flow_type");
    let flow_type = FlowType::parse(&flow_type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown flow_type `{flow_type_raw}`")))?;

    let status_raw: String = row.get("status");
    let status = SessionStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown session status `{status_raw}`")))?;

    let request_data_raw: String = row.get("request_data");
    let request_data = serde_json::from_str(&request_data_raw)
        .map_err(|error| RepositoryError::Decode(format!("request_data: {error}")))?;

    let settlement = row
        .get::<Option<String>, _>("settlement_json")
        .map(|raw| serde_json::from_str::<SettlementTerms>(&raw))
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("settlement_json: {error}")))?;

    let extensions_count: i64 = row.get("extensions_count");
    let max_extensions: i64 = row.get("max_extensions");

    Ok(Session {
        id: SessionId(row.get("id")),
        requester_id: row.get("requester_id"),
        flow_type,
        agent_type: row.get("agent_type"),
        status,
        request_data,
        started_at: row.get::<DateTime<Utc>, _>("started_at"),
        deadline_at: row.get::<DateTime<Utc>, _>("deadline_at"),
        extensions_count: u32::try_from(extensions_count)
            .map_err(|_| RepositoryError::Decode("negative extensions_count".to_string()))?,
        max_extensions: u32::try_from(max_extensions)
            .map_err(|_| RepositoryError::Decode("negative max_extensions".to_string()))?,
        selected_quote_id: row.get("selected_quote_id"),
        cancellation_reason: row.get("cancellation_reason"),
        error_message: row.get("error_message"),
        settlement,
        state_version: row.get("state_version"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use sokoni_core::domain::session::{FlowType, Session, SessionId, SessionStatus};

    use super::SqlSessionRepository;
    use crate::repositories::{SessionRepository, SessionTransition};
    use crate::{connect_with_settings, migrations};

    async fn repo() -> SqlSessionRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlSessionRepository::new(pool)
    }

    fn session(id: &str) -> Session {
        let started_at = Utc::now();
        Session {
            id: SessionId(id.to_string()),
            requester_id: "user-1".to_string(),
            flow_type: FlowType::Ride,
            agent_type: "driver".to_string(),
            status: SessionStatus::Searching,
            request_data: serde_json::json!({"pickup": "CBD"}),
            started_at,
            deadline_at: started_at + Duration::minutes(5),
            extensions_count: 0,
            max_extensions: 2,
            selected_quote_id: None,
            cancellation_reason: None,
            error_message: None,
            settlement: None,
            state_version: 1,
            updated_at: started_at,
        }
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let repo = repo().await;
        let session = session("S-sql-1");

        repo.insert(session.clone()).await.expect("insert");
        let found = repo.find_by_id(&session.id).await.expect("find").expect("present");

        assert_eq!(found.id, session.id);
        assert_eq!(found.status, SessionStatus::Searching);
        assert_eq!(found.request_data, session.request_data);
        assert_eq!(found.state_version, 1);
    }

    #[tokio::test]
    async fn transition_lands_once_per_version() {
        let repo = repo().await;
        let session = session("S-sql-2");
        repo.insert(session.clone()).await.expect("insert");

        let now = Utc::now();
        let first = SessionTransition::new(&session, SessionStatus::Cancelled, now);
        let second = SessionTransition::new(&session, SessionStatus::Completed, now);

        assert!(repo.apply_transition(first).await.expect("first write"));
        assert!(
            !repo.apply_transition(second).await.expect("second write"),
            "stale version must lose the race"
        );

        let stored = repo.find_by_id(&session.id).await.expect("find").expect("present");
        assert_eq!(stored.status, SessionStatus::Cancelled);
        assert_eq!(stored.state_version, 2);
    }

    #[tokio::test]
    async fn one_active_session_per_requester_and_flow() {
        let repo = repo().await;
        let session = session("S-sql-3");
        repo.insert(session.clone()).await.expect("insert");

        let found = repo
            .find_active_for_requester("user-1", FlowType::Ride)
            .await
            .expect("query")
            .expect("active session");
        assert_eq!(found.id, session.id);

        assert!(repo
            .find_active_for_requester("user-1", FlowType::Pharmacy)
            .await
            .expect("query")
            .is_none());

        let done = SessionTransition::new(&session, SessionStatus::Cancelled, Utc::now());
        assert!(repo.apply_transition(done).await.expect("cancel"));
        assert!(repo
            .find_active_for_requester("user-1", FlowType::Ride)
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn extension_transition_updates_deadline_and_count() {
        let repo = repo().await;
        let session = session("S-sql-4");
        repo.insert(session.clone()).await.expect("insert");

        let now = Utc::now();
        let mut extend = SessionTransition::new(&session, session.status, now);
        extend.deadline_at = Some(session.deadline_at + Duration::seconds(120));
        extend.extensions_count = Some(1);

        assert!(repo.apply_transition(extend).await.expect("extend"));

        let stored = repo.find_by_id(&session.id).await.expect("find").expect("present");
        assert_eq!(stored.extensions_count, 1);
        assert!(stored.deadline_at > session.deadline_at);
        assert_eq!(stored.state_version, 2);
    }
}
