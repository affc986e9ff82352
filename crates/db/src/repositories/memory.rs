use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use sokoni_core::domain::idempotency::{
    IdempotencyKey, IdempotencyRecord, IdempotencyState, StoredResponse,
};
use sokoni_core::domain::ledger::{
    CommissionRecord, CommissionStatus, LedgerAccount, LedgerEntry, LedgerEntryId, ProfileId,
};
use sokoni_core::domain::quote::{Quote, QuoteId, QuoteStatus};
use sokoni_core::domain::session::{FlowType, Session, SessionId};

use super::{
    idempotency::{SYNTHETIC_TIMEOUT_BODY, SYNTHETIC_TIMEOUT_STATUS},
    IdempotencyRepository, LedgerRepository, PurgeOutcome, QuoteRepository, RepositoryError,
    ReserveOutcome, SessionRepository, SessionTransition, TransferOutcome,
};

/// In-memory doubles for the repository traits. The session store applies
/// its guarded write under one lock so races resolve exactly as the SQL
/// version does: one winner, every stale version loses.
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: Mutex<HashMap<String, Session>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session.id.0.clone(), session);
        Ok(())
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(&id.0).cloned())
    }

    async fn find_active_for_requester(
        &self,
        requester_id: &str,
        flow_type: FlowType,
    ) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .values()
            .filter(|session| {
                session.requester_id == requester_id
                    && session.flow_type == flow_type
                    && session.status.is_active()
            })
            .max_by_key(|session| session.started_at)
            .cloned())
    }

    async fn list_active(&self) -> Result<Vec<Session>, RepositoryError> {
        let sessions = self.sessions.lock().await;
        let mut active: Vec<Session> =
            sessions.values().filter(|session| session.status.is_active()).cloned().collect();
        active.sort_by_key(|session| (session.deadline_at, session.started_at));
        Ok(active)
    }

    async fn apply_transition(
        &self,
        transition: SessionTransition,
    ) -> Result<bool, RepositoryError> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&transition.id.0) else {
            return Ok(false);
        };
        if session.state_version != transition.expected_version {
            return Ok(false);
        }

        session.status = transition.status;
        if let Some(deadline_at) = transition.deadline_at {
            session.deadline_at = deadline_at;
        }
        if let Some(extensions_count) = transition.extensions_count {
            session.extensions_count = extensions_count;
        }
        if let Some(selected_quote_id) = transition.selected_quote_id {
            session.selected_quote_id = Some(selected_quote_id);
        }
        if let Some(cancellation_reason) = transition.cancellation_reason {
            session.cancellation_reason = Some(cancellation_reason);
        }
        if let Some(error_message) = transition.error_message {
            session.error_message = Some(error_message);
        }
        session.state_version += 1;
        session.updated_at = transition.updated_at;
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryQuoteRepository {
    quotes: Mutex<HashMap<String, Quote>>,
}

#[async_trait::async_trait]
impl QuoteRepository for InMemoryQuoteRepository {
    async fn upsert_offer(&self, candidate: Quote) -> Result<(Quote, bool), RepositoryError> {
        let mut quotes = self.quotes.lock().await;

        let existing_id = quotes
            .values()
            .find(|quote| {
                quote.session_id == candidate.session_id
                    && quote.vendor_contact == candidate.vendor_contact
            })
            .map(|quote| quote.id.0.clone());

        match existing_id {
            None => {
                quotes.insert(candidate.id.0.clone(), candidate.clone());
                Ok((candidate, true))
            }
            Some(id) => {
                let existing = quotes.get_mut(&id).expect("existing quote");
                if matches!(
                    existing.status,
                    QuoteStatus::Pending | QuoteStatus::Received | QuoteStatus::CounterOffered
                ) {
                    existing.vendor_id = candidate.vendor_id;
                    existing.vendor_type = candidate.vendor_type;
                    existing.vendor_name = candidate.vendor_name;
                    existing.offer_data = candidate.offer_data;
                    existing.status = QuoteStatus::CounterOffered;
                    existing.responded_at = candidate.responded_at;
                    existing.expires_at = candidate.expires_at;
                    existing.ranking_score = candidate.ranking_score;
                    existing.updated_at = candidate.updated_at;
                }
                Ok((existing.clone(), false))
            }
        }
    }

    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let quotes = self.quotes.lock().await;
        Ok(quotes.get(&id.0).cloned())
    }

    async fn list_ranked(&self, session_id: &SessionId) -> Result<Vec<Quote>, RepositoryError> {
        let quotes = self.quotes.lock().await;
        let mut ranked: Vec<Quote> =
            quotes.values().filter(|quote| &quote.session_id == session_id).cloned().collect();

        ranked.sort_by(|a, b| match (a.ranking_score, b.ranking_score) {
            (Some(left), Some(right)) => right
                .partial_cmp(&left)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.responded_at.cmp(&b.responded_at)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.responded_at.cmp(&b.responded_at),
        });
        Ok(ranked)
    }

    async fn set_status_guarded(
        &self,
        id: &QuoteId,
        from: &[QuoteStatus],
        to: QuoteStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut quotes = self.quotes.lock().await;
        let Some(quote) = quotes.get_mut(&id.0) else {
            return Ok(false);
        };
        if !from.contains(&quote.status) {
            return Ok(false);
        }
        quote.status = to;
        quote.updated_at = updated_at;
        Ok(true)
    }

    async fn mark_expired(
        &self,
        session_id: &SessionId,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut quotes = self.quotes.lock().await;
        let mut expired = 0;
        for quote in quotes.values_mut() {
            if &quote.session_id == session_id && quote.expired_by(cutoff) {
                quote.status = QuoteStatus::Expired;
                quote.updated_at = cutoff;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<String, LedgerAccount>,
    entries: Vec<LedgerEntry>,
    commissions: Vec<CommissionRecord>,
}

impl LedgerState {
    fn account_mut(&mut self, profile_id: &ProfileId, now: DateTime<Utc>) -> &mut LedgerAccount {
        self.accounts
            .entry(profile_id.0.clone())
            .or_insert_with(|| LedgerAccount::opened(profile_id.clone(), now))
    }

    fn apply(
        &mut self,
        profile_id: &ProfileId,
        delta: i64,
        entry_type: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(i64, Option<LedgerEntryId>), RepositoryError> {
        let account = self.account_mut(profile_id, now);
        if delta == 0 {
            return Ok((account.balance, None));
        }
        if account.balance + delta < 0 {
            return Err(RepositoryError::InsufficientBalance {
                profile_id: profile_id.0.clone(),
                balance: account.balance,
                delta,
            });
        }

        account.balance += delta;
        account.updated_at = now;
        let balance = account.balance;

        let entry_id = LedgerEntryId(Uuid::new_v4().to_string());
        self.entries.push(LedgerEntry {
            id: entry_id.clone(),
            profile_id: profile_id.clone(),
            delta,
            entry_type: entry_type.to_string(),
            metadata,
            created_at: now,
        });
        Ok((balance, Some(entry_id)))
    }
}

/// One lock over the whole ledger: per-account exclusivity and transfer
/// atomicity both follow from it.
#[derive(Default)]
pub struct InMemoryLedgerRepository {
    state: Mutex<LedgerState>,
}

#[async_trait::async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn get_account(
        &self,
        profile_id: &ProfileId,
    ) -> Result<Option<LedgerAccount>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(&profile_id.0).cloned())
    }

    async fn apply_delta(
        &self,
        profile_id: &ProfileId,
        delta: i64,
        entry_type: &str,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(i64, Option<LedgerEntryId>), RepositoryError> {
        let mut state = self.state.lock().await;
        state.apply(profile_id, delta, entry_type, metadata, now)
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
        let mut state = self.state.lock().await;

        // The debit is validated before anything mutates, so a failed
        // transfer leaves no partial state behind.
        let from_balance = state.account_mut(from, now).balance;
        if from_balance - amount < 0 {
            return Err(RepositoryError::InsufficientBalance {
                profile_id: from.0.clone(),
                balance: from_balance,
                delta: -amount,
            });
        }

        let (from_balance, entry_from) =
            state.apply(from, -amount, reason, metadata.clone(), now)?;
        let (to_balance, entry_to) = state.apply(to, amount, reason, metadata, now)?;

        let (entry_from, entry_to) = match (entry_from, entry_to) {
            (Some(entry_from), Some(entry_to)) => (entry_from, entry_to),
            _ => {
                return Err(RepositoryError::Decode(
                    "transfer of zero tokens records no entries".to_string(),
                ));
            }
        };

        Ok(TransferOutcome { from_balance, to_balance, entry_from, entry_to })
    }

    async fn reserve(
        &self,
        profile_id: &ProfileId,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<LedgerAccount, RepositoryError> {
        let mut state = self.state.lock().await;
        let account = state.account_mut(profile_id, now);
        if account.balance - amount < 0 {
            return Err(RepositoryError::InsufficientBalance {
                profile_id: profile_id.0.clone(),
                balance: account.balance,
                delta: -amount,
            });
        }
        account.balance -= amount;
        account.pending += amount;
        account.updated_at = now;
        let snapshot = account.clone();

        let entry_id = LedgerEntryId(Uuid::new_v4().to_string());
        state.entries.push(LedgerEntry {
            id: entry_id,
            profile_id: profile_id.clone(),
            delta: -amount,
            entry_type: "reserve".to_string(),
            metadata: serde_json::json!({}),
            created_at: now,
        });
        Ok(snapshot)
    }

    async fn release(
        &self,
        profile_id: &ProfileId,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<LedgerAccount, RepositoryError> {
        let mut state = self.state.lock().await;
        let account = state.account_mut(profile_id, now);
        if account.pending - amount < 0 {
            return Err(RepositoryError::InsufficientBalance {
                profile_id: profile_id.0.clone(),
                balance: account.pending,
                delta: -amount,
            });
        }
        account.pending -= amount;
        account.balance += amount;
        account.updated_at = now;
        let snapshot = account.clone();

        let entry_id = LedgerEntryId(Uuid::new_v4().to_string());
        state.entries.push(LedgerEntry {
            id: entry_id,
            profile_id: profile_id.clone(),
            delta: amount,
            entry_type: "release".to_string(),
            metadata: serde_json::json!({}),
            created_at: now,
        });
        Ok(snapshot)
    }

    async fn entries_for_profile(
        &self,
        profile_id: &ProfileId,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|entry| &entry.profile_id == profile_id)
            .cloned()
            .collect())
    }

    async fn insert_commission(&self, record: CommissionRecord) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        state.commissions.push(record);
        Ok(())
    }

    async fn mark_commission_paid(
        &self,
        id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        let Some(record) = state
            .commissions
            .iter_mut()
            .find(|record| record.id == id && record.status == CommissionStatus::Due)
        else {
            return Ok(false);
        };
        record.status = CommissionStatus::Paid;
        record.paid_at = Some(paid_at);
        Ok(true)
    }

    async fn list_commissions(
        &self,
        status: Option<CommissionStatus>,
    ) -> Result<Vec<CommissionRecord>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .commissions
            .iter()
            .filter(|record| status.map_or(true, |status| record.status == status))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryIdempotencyRepository {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

#[async_trait::async_trait]
impl IdempotencyRepository for InMemoryIdempotencyRepository {
    async fn try_reserve(
        &self,
        key: &IdempotencyKey,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome, RepositoryError> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get(key.as_str()) {
            return Ok(ReserveOutcome::Existing(existing.clone()));
        }
        records.insert(
            key.as_str().to_string(),
            IdempotencyRecord {
                key: key.clone(),
                state: IdempotencyState::Pending,
                payload_hash: payload_hash.to_string(),
                response: None,
                created_at: now,
                finalized_at: None,
            },
        );
        Ok(ReserveOutcome::Reserved)
    }

    async fn find(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, RepositoryError> {
        let records = self.records.lock().await;
        Ok(records.get(key.as_str()).cloned())
    }

    async fn finalize(
        &self,
        key: &IdempotencyKey,
        response: &StoredResponse,
        finalized_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(key.as_str()) {
            if record.state == IdempotencyState::Pending {
                record.state = IdempotencyState::Completed;
                record.response = Some(response.clone());
                record.finalized_at = Some(finalized_at);
            }
        }
        Ok(())
    }

    async fn purge(
        &self,
        now: DateTime<Utc>,
        success_ttl: Duration,
        pending_ttl: Duration,
    ) -> Result<PurgeOutcome, RepositoryError> {
        let mut records = self.records.lock().await;
        let mut outcome = PurgeOutcome::default();

        for record in records.values_mut() {
            if record.stale_pending(now, pending_ttl) {
                record.state = IdempotencyState::Completed;
                record.response = Some(StoredResponse {
                    status: SYNTHETIC_TIMEOUT_STATUS,
                    body: serde_json::from_str(SYNTHETIC_TIMEOUT_BODY)
                        .unwrap_or(serde_json::Value::Null),
                });
                record.finalized_at = Some(now);
                outcome.resolved_pending += 1;
            }
        }

        let before = records.len();
        records.retain(|_, record| !record.expired(now, success_ttl));
        outcome.purged = (before - records.len()) as u64;

        Ok(outcome)
    }
}
