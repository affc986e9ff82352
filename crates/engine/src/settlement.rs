use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use sokoni_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use sokoni_core::domain::ledger::{CommissionRecord, CommissionStatus, ProfileId};
use sokoni_core::domain::quote::Quote;
use sokoni_core::domain::session::Session;
use sokoni_core::errors::EngineError;
use sokoni_db::repositories::{LedgerRepository, RepositoryError};

/// Runs the vendor→broker commission transfer after a session completes.
/// A failed transfer never unwinds the completion: the commission stays
/// `due` and is retried out-of-band.
pub struct SettlementEngine {
    ledger: Arc<dyn LedgerRepository>,
    audit: Arc<dyn AuditSink>,
}

impl SettlementEngine {
    pub fn new(ledger: Arc<dyn LedgerRepository>, audit: Arc<dyn AuditSink>) -> Self {
        Self { ledger, audit }
    }

    pub async fn settle(
        &self,
        session: &Session,
        quote: &Quote,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CommissionRecord>, EngineError> {
        let Some(terms) = &session.settlement else {
            return Ok(None);
        };
        // Anonymous vendors have no account to draw from; no commission is
        // owed for them.
        let Some(vendor_profile) = &quote.vendor_id else {
            return Ok(None);
        };

        let vendor = ProfileId(vendor_profile.clone());
        let broker = ProfileId(terms.broker_profile_id.clone());
        let record = CommissionRecord {
            id: Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            vendor_profile_id: vendor.clone(),
            broker_profile_id: broker.clone(),
            amount: terms.commission_tokens,
            status: CommissionStatus::Due,
            created_at: now,
            paid_at: None,
        };
        self.ledger.insert_commission(record.clone()).await?;

        match self
            .ledger
            .transfer(
                &vendor,
                &broker,
                terms.commission_tokens,
                "commission",
                serde_json::json!({
                    "session_id": session.id.0,
                    "quote_id": quote.id.0,
                    "commission_id": record.id,
                }),
                now,
            )
            .await
        {
            Ok(outcome) => {
                if !self.ledger.mark_commission_paid(&record.id, now).await? {
                    // An out-of-band retry beat us to it; undo the duplicate
                    // legs.
                    self.ledger
                        .transfer(
                            &broker,
                            &vendor,
                            terms.commission_tokens,
                            "commission_reversal",
                            serde_json::json!({"commission_id": record.id}),
                            now,
                        )
                        .await?;
                }
                self.audit.emit(
                    AuditEvent::new(
                        Some(session.id.clone()),
                        correlation_id,
                        "settlement.commission_paid",
                        AuditCategory::Settlement,
                        "settlement-engine",
                        AuditOutcome::Success,
                    )
                    .with_metadata("amount", terms.commission_tokens.to_string())
                    .with_metadata("vendor_balance", outcome.from_balance.to_string()),
                );
                Ok(Some(CommissionRecord {
                    status: CommissionStatus::Paid,
                    paid_at: Some(now),
                    ..record
                }))
            }
            Err(RepositoryError::InsufficientBalance { balance, .. }) => {
                // Reported to the operational channel, never to the
                // requester.
                tracing::warn!(
                    event_name = "settlement.commission_due",
                    correlation_id,
                    session_id = %session.id.0,
                    vendor = %vendor.0,
                    amount = terms.commission_tokens,
                    vendor_balance = balance,
                    "vendor balance cannot cover the commission; left due for retry"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(session.id.clone()),
                        correlation_id,
                        "settlement.commission_due",
                        AuditCategory::Settlement,
                        "settlement-engine",
                        AuditOutcome::Failed,
                    )
                    .with_metadata("amount", terms.commission_tokens.to_string())
                    .with_metadata("vendor_balance", balance.to_string()),
                );
                Ok(Some(record))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Out-of-band retry for commissions still `due`, typically driven by
    /// the sweeper loop.
    pub async fn retry_due(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let due = self.ledger.list_commissions(Some(CommissionStatus::Due)).await?;
        let mut paid = 0;

        for record in due {
            let transferred = self
                .ledger
                .transfer(
                    &record.vendor_profile_id,
                    &record.broker_profile_id,
                    record.amount,
                    "commission",
                    serde_json::json!({
                        "session_id": record.session_id.0,
                        "commission_id": record.id,
                        "retry": true,
                    }),
                    now,
                )
                .await;

            match transferred {
                Ok(_) => {
                    if self.ledger.mark_commission_paid(&record.id, now).await? {
                        paid += 1;
                    } else {
                        // Another worker settled this record between the
                        // listing and our transfer; undo the duplicate legs.
                        self.ledger
                            .transfer(
                                &record.broker_profile_id,
                                &record.vendor_profile_id,
                                record.amount,
                                "commission_reversal",
                                serde_json::json!({"commission_id": record.id}),
                                now,
                            )
                            .await?;
                    }
                }
                Err(RepositoryError::InsufficientBalance { .. }) => continue,
                Err(other) => return Err(other.into()),
            }
        }

        Ok(paid)
    }
}
