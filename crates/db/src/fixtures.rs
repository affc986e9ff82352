use chrono::{Duration, Utc};

use sokoni_core::domain::ledger::ProfileId;
use sokoni_core::domain::quote::{Quote, QuoteId, QuoteStatus, VendorContact};
use sokoni_core::domain::session::{
    FlowType, Session, SessionId, SessionStatus, SettlementTerms,
};

use crate::repositories::{
    LedgerRepository, QuoteRepository, RepositoryError, SessionRepository, SqlLedgerRepository,
    SqlQuoteRepository, SqlSessionRepository,
};
use crate::DbPool;

/// Deterministic demo fixtures for `sokoni seed`: a funded broker and two
/// vendors, one in-flight pharmacy negotiation, and a pair of open quotes.
pub struct SeedDataset;

const SEED_SESSION_ID: &str = "session-demo-pharmacy-001";
const SEED_BROKER: &str = "profile-broker-001";
const SEED_VENDORS: &[(&str, &str, &str)] = &[
    ("profile-vendor-001", "Mama Safi Chemist", "+254700000101"),
    ("profile-vendor-002", "Afya Plus Pharmacy", "+254700000102"),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub sessions: usize,
    pub quotes: usize,
    pub funded_accounts: usize,
}

impl SeedDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let sessions = SqlSessionRepository::new(pool.clone());
        let quotes = SqlQuoteRepository::new(pool.clone());
        let ledger = SqlLedgerRepository::new(pool.clone());
        let now = Utc::now();

        if sessions.find_by_id(&SessionId(SEED_SESSION_ID.to_string())).await?.is_some() {
            return Ok(SeedResult { sessions: 0, quotes: 0, funded_accounts: 0 });
        }

        let mut funded_accounts = 0;
        for (profile_id, _, _) in SEED_VENDORS {
            ledger
                .apply_delta(
                    &ProfileId((*profile_id).to_string()),
                    1_000,
                    "seed_grant",
                    serde_json::json!({"source": "seed"}),
                    now,
                )
                .await?;
            funded_accounts += 1;
        }
        ledger
            .apply_delta(
                &ProfileId(SEED_BROKER.to_string()),
                0,
                "seed_grant",
                serde_json::json!({"source": "seed"}),
                now,
            )
            .await?;
        funded_accounts += 1;

        let session = Session {
            id: SessionId(SEED_SESSION_ID.to_string()),
            requester_id: "profile-requester-001".to_string(),
            flow_type: FlowType::Pharmacy,
            agent_type: "pharmacy".to_string(),
            status: SessionStatus::Negotiating,
            request_data: serde_json::json!({
                "item": "amoxicillin 500mg x21",
                "delivery": "Kilimani"
            }),
            started_at: now,
            deadline_at: now + Duration::minutes(5),
            extensions_count: 0,
            max_extensions: 2,
            selected_quote_id: None,
            cancellation_reason: None,
            error_message: None,
            settlement: Some(SettlementTerms {
                broker_profile_id: SEED_BROKER.to_string(),
                commission_tokens: 25,
            }),
            state_version: 1,
            updated_at: now,
        };
        sessions.insert(session).await?;

        let mut seeded_quotes = 0;
        for (index, (profile_id, name, contact)) in SEED_VENDORS.iter().enumerate() {
            let quote = Quote {
                id: QuoteId(format!("quote-demo-{:03}", index + 1)),
                session_id: SessionId(SEED_SESSION_ID.to_string()),
                vendor_id: Some((*profile_id).to_string()),
                vendor_type: "pharmacy".to_string(),
                vendor_name: (*name).to_string(),
                vendor_contact: VendorContact((*contact).to_string()),
                offer_data: serde_json::json!({"price": 450 + (index as i64) * 70}),
                status: QuoteStatus::Received,
                responded_at: now + Duration::seconds(index as i64 + 1),
                expires_at: None,
                ranking_score: None,
                created_at: now,
                updated_at: now,
            };
            quotes.upsert_offer(quote).await?;
            seeded_quotes += 1;
        }

        Ok(SeedResult { sessions: 1, quotes: seeded_quotes, funded_accounts })
    }
}

#[cfg(test)]
mod tests {
    use super::{SeedDataset, SeedResult};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seed_is_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = SeedDataset::load(&pool).await.expect("first seed");
        assert_eq!(first, SeedResult { sessions: 1, quotes: 2, funded_accounts: 3 });

        let second = SeedDataset::load(&pool).await.expect("second seed");
        assert_eq!(second, SeedResult { sessions: 0, quotes: 0, funded_accounts: 0 });
    }
}
