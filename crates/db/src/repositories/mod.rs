use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use sokoni_core::domain::idempotency::{IdempotencyKey, IdempotencyRecord, StoredResponse};
use sokoni_core::domain::ledger::{
    CommissionRecord, CommissionStatus, LedgerAccount, LedgerEntry, LedgerEntryId, ProfileId,
};
use sokoni_core::domain::quote::{Quote, QuoteId, QuoteStatus};
use sokoni_core::domain::session::{FlowType, Session, SessionId, SessionStatus};
use sokoni_core::errors::EngineError;

pub mod idempotency;
pub mod ledger;
pub mod memory;
pub mod quote;
pub mod session;

pub use idempotency::SqlIdempotencyRepository;
pub use ledger::SqlLedgerRepository;
pub use memory::{
    InMemoryIdempotencyRepository, InMemoryLedgerRepository, InMemoryQuoteRepository,
    InMemorySessionRepository,
};
pub use quote::SqlQuoteRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("insufficient balance on {profile_id}: balance {balance}, delta {delta}")]
    InsufficientBalance { profile_id: String, balance: i64, delta: i64 },
}

impl From<RepositoryError> for EngineError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::InsufficientBalance { profile_id, balance, delta } => {
                EngineError::InsufficientBalance { profile_id, balance, delta }
            }
            other => EngineError::Persistence(other.to_string()),
        }
    }
}

/// One guarded session write. `expected_version` is the version the caller
/// read; the write lands only if it still matches, so two racing callers
/// cannot both win.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionTransition {
    pub id: SessionId,
    pub expected_version: i64,
    pub status: SessionStatus,
    pub deadline_at: Option<DateTime<Utc>>,
    pub extensions_count: Option<u32>,
    pub selected_quote_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionTransition {
    pub fn new(session: &Session, status: SessionStatus, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: session.id.clone(),
            expected_version: session.state_version,
            status,
            deadline_at: None,
            extensions_count: None,
            selected_quote_id: None,
            cancellation_reason: None,
            error_message: None,
            updated_at,
        }
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: Session) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError>;

    /// The open session for a `(requester, flow)` pair, if any. The engine
    /// allows at most one.
    async fn find_active_for_requester(
        &self,
        requester_id: &str,
        flow_type: FlowType,
    ) -> Result<Option<Session>, RepositoryError>;

    async fn list_active(&self) -> Result<Vec<Session>, RepositoryError>;

    /// Returns false when the version guard did not match; the caller maps
    /// that to `StateConflict`.
    async fn apply_transition(
        &self,
        transition: SessionTransition,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait QuoteRepository: Send + Sync {
    /// Insert a fresh quote, or fold a resubmission from the same vendor
    /// contact into the existing row as a counter-offer. Returns the stored
    /// quote and whether a new row was created.
    async fn upsert_offer(&self, candidate: Quote) -> Result<(Quote, bool), RepositoryError>;

    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError>;

    /// Quotes for a session ordered by ranking score descending (nulls
    /// last), ties broken by earliest response.
    async fn list_ranked(&self, session_id: &SessionId) -> Result<Vec<Quote>, RepositoryError>;

    /// Guarded status change; false when the quote was not in one of the
    /// `from` statuses.
    async fn set_status_guarded(
        &self,
        id: &QuoteId,
        from: &[QuoteStatus],
        to: QuoteStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Expire open quotes whose offer expiry is at or before the cutoff.
    /// Returns the number of quotes transitioned.
    async fn mark_expired(
        &self,
        session_id: &SessionId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferOutcome {
    pub from_balance: i64,
    pub to_balance: i64,
    pub entry_from: LedgerEntryId,
    pub entry_to: LedgerEntryId,
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn get_account(
        &self,
        profile_id: &ProfileId,
    ) -> Result<Option<LedgerAccount>, RepositoryError>;

    /// Atomic balance mutation: the new balance and (for non-zero deltas)
    /// exactly one ledger entry land together or not at all. Debits that
    /// would go negative fail with `InsufficientBalance` and write nothing.
    async fn apply_delta(
        &self,
        profile_id: &ProfileId,
        delta: i64,
        entry_type: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(i64, Option<LedgerEntryId>), RepositoryError>;

    /// Debit + credit in one transaction; no partial transfer is ever
    /// observable.
    async fn transfer(
        &self,
        from: &ProfileId,
        to: &ProfileId,
        amount: i64,
        reason: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<TransferOutcome, RepositoryError>;

    /// Move spendable balance into the pending (reserved) column.
    async fn reserve(
        &self,
        profile_id: &ProfileId,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<LedgerAccount, RepositoryError>;

    /// Return previously reserved tokens to the spendable balance.
    async fn release(
        &self,
        profile_id: &ProfileId,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<LedgerAccount, RepositoryError>;

    async fn entries_for_profile(
        &self,
        profile_id: &ProfileId,
    ) -> Result<Vec<LedgerEntry>, RepositoryError>;

    async fn insert_commission(&self, record: CommissionRecord) -> Result<(), RepositoryError>;

    /// False when the record was already paid (or missing); paying is
    /// exactly-once.
    async fn mark_commission_paid(
        &self,
        id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn list_commissions(
        &self,
        status: Option<CommissionStatus>,
    ) -> Result<Vec<CommissionRecord>, RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// This caller owns the execution; run the operation and finalize.
    Reserved,
    /// Another caller got there first; join or replay its result.
    Existing(IdempotencyRecord),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Stale pending records resolved to the synthetic timeout failure.
    pub resolved_pending: u64,
    /// Finalized records dropped after the success TTL.
    pub purged: u64,
}

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    async fn try_reserve(
        &self,
        key: &IdempotencyKey,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome, RepositoryError>;

    async fn find(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, RepositoryError>;

    async fn finalize(
        &self,
        key: &IdempotencyKey,
        response: &StoredResponse,
        finalized_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn purge(
        &self,
        now: DateTime<Utc>,
        success_ttl: Duration,
        pending_ttl: Duration,
    ) -> Result<PurgeOutcome, RepositoryError>;
}
