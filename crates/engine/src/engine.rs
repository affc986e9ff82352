use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use sokoni_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use sokoni_core::domain::quote::{Quote, QuoteId, QuoteStatus, VendorContact};
use sokoni_core::domain::session::{
    FlowType, Session, SessionId, SessionStatus, SettlementTerms,
};
use sokoni_core::errors::EngineError;
use sokoni_core::lifecycle::{self, SessionEvent, TransitionEffect, TransitionError};
use sokoni_core::scoring::OfferScorer;
use sokoni_db::repositories::{
    QuoteRepository, SessionRepository, SessionTransition,
};

use crate::settlement::SettlementEngine;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub default_sla_minutes: u32,
    pub extension_increment_secs: u64,
    pub default_max_extensions: u32,
    /// Guarded-write retries before a lost race is surfaced as
    /// `StateConflict`.
    pub transition_retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_sla_minutes: 5,
            extension_increment_secs: 120,
            default_max_extensions: 2,
            transition_retry_attempts: 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CreateSessionRequest {
    pub requester_id: String,
    pub flow_type: FlowType,
    pub agent_type: String,
    pub request_data: serde_json::Value,
    pub sla_minutes: Option<u32>,
    pub max_extensions: Option<u32>,
    pub settlement: Option<SettlementTerms>,
    pub correlation_id: String,
}

#[derive(Clone, Debug)]
pub struct SubmitQuoteRequest {
    pub session_id: SessionId,
    pub vendor_id: Option<String>,
    pub vendor_type: String,
    pub vendor_name: String,
    pub vendor_contact: VendorContact,
    pub offer_data: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionDetail {
    pub session: Session,
    pub quotes: Vec<Quote>,
}

/// Orchestrates the session state machine over the repositories. Every
/// mutation runs the pure lifecycle rules first, then lands exactly one
/// guarded write; lost races re-read and retry a bounded number of times.
pub struct SessionEngine {
    sessions: Arc<dyn SessionRepository>,
    quotes: Arc<dyn QuoteRepository>,
    scorer: Arc<dyn OfferScorer>,
    settlement: SettlementEngine,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
}

impl SessionEngine {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        quotes: Arc<dyn QuoteRepository>,
        scorer: Arc<dyn OfferScorer>,
        settlement: SettlementEngine,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        Self { sessions, quotes, scorer, settlement, audit, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
        now: DateTime<Utc>,
    ) -> Result<Session, EngineError> {
        if request.requester_id.trim().is_empty() {
            return Err(EngineError::Validation("requester_id is required".to_string()));
        }
        if request.agent_type.trim().is_empty() {
            return Err(EngineError::Validation("agent_type is required".to_string()));
        }
        let sla_minutes = request.sla_minutes.unwrap_or(self.config.default_sla_minutes);
        if sla_minutes == 0 || sla_minutes > 24 * 60 {
            return Err(EngineError::Validation(format!(
                "sla_minutes must be in range 1..=1440, got {sla_minutes}"
            )));
        }
        if let Some(terms) = &request.settlement {
            if terms.broker_profile_id.trim().is_empty() || terms.commission_tokens <= 0 {
                return Err(EngineError::Validation(
                    "settlement terms need a broker profile and a positive commission".to_string(),
                ));
            }
        }

        // One outstanding negotiation per requester and vertical.
        if let Some(open) = self
            .sessions
            .find_active_for_requester(&request.requester_id, request.flow_type)
            .await?
        {
            return Err(EngineError::Validation(format!(
                "requester already has an active {} session ({})",
                request.flow_type.as_str(),
                open.id.0
            )));
        }

        let session = Session {
            id: SessionId(Uuid::new_v4().to_string()),
            requester_id: request.requester_id,
            flow_type: request.flow_type,
            agent_type: request.agent_type,
            status: SessionStatus::Searching,
            request_data: request.request_data,
            started_at: now,
            deadline_at: now + Duration::minutes(i64::from(sla_minutes)),
            extensions_count: 0,
            max_extensions: request
                .max_extensions
                .unwrap_or(self.config.default_max_extensions),
            selected_quote_id: None,
            cancellation_reason: None,
            error_message: None,
            settlement: request.settlement,
            state_version: 1,
            updated_at: now,
        };
        self.sessions.insert(session.clone()).await?;

        self.audit.emit(
            AuditEvent::new(
                Some(session.id.clone()),
                request.correlation_id,
                "session.created",
                AuditCategory::Session,
                &session.requester_id,
                AuditOutcome::Success,
            )
            .with_metadata("flow_type", session.flow_type.as_str())
            .with_metadata("deadline_at", session.deadline_at.to_rfc3339()),
        );

        Ok(session)
    }

    pub async fn submit_quote(
        &self,
        request: SubmitQuoteRequest,
        now: DateTime<Utc>,
    ) -> Result<Quote, EngineError> {
        if request.vendor_contact.0.trim().is_empty() {
            return Err(EngineError::Validation("vendor_contact is required".to_string()));
        }
        if request.vendor_name.trim().is_empty() {
            return Err(EngineError::Validation("vendor_name is required".to_string()));
        }

        let session = self.load_session(&request.session_id).await?;
        let outcome = lifecycle::apply(&session, &SessionEvent::QuoteReceived, now)
            .map_err(|error| map_rules_error(&session, error))?;

        // The first response moves the search forward before the quote row
        // lands; concurrent first responses race on the version guard.
        if outcome.to != session.status {
            self.transition_with_retry(
                &request.session_id,
                &SessionEvent::QuoteReceived,
                now,
                |session, _outcome| SessionTransition::new(session, SessionStatus::Negotiating, now),
            )
            .await?;
        }

        let candidate = Quote {
            id: QuoteId(Uuid::new_v4().to_string()),
            session_id: request.session_id.clone(),
            vendor_id: request.vendor_id,
            vendor_type: request.vendor_type,
            vendor_name: request.vendor_name,
            vendor_contact: request.vendor_contact,
            ranking_score: self.scorer.score(&request.offer_data),
            offer_data: request.offer_data,
            status: QuoteStatus::Received,
            responded_at: now,
            expires_at: request.expires_at,
            created_at: now,
            updated_at: now,
        };
        let (stored, created) = self.quotes.upsert_offer(candidate).await?;

        self.audit.emit(
            AuditEvent::new(
                Some(request.session_id),
                request.correlation_id,
                if created { "quote.submitted" } else { "quote.countered" },
                AuditCategory::Quote,
                &stored.vendor_contact.0,
                AuditOutcome::Success,
            )
            .with_metadata("quote_id", stored.id.0.clone()),
        );

        Ok(stored)
    }

    pub async fn select_quote(
        &self,
        session_id: &SessionId,
        quote_id: &QuoteId,
        actor: &str,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionDetail, EngineError> {
        let quote = self
            .quotes
            .find_by_id(quote_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { entity: "quote", id: quote_id.0.clone() })?;
        if &quote.session_id != session_id {
            return Err(EngineError::Validation(format!(
                "quote {} does not belong to session {}",
                quote_id.0, session_id.0
            )));
        }
        if !quote.is_selectable() {
            return Err(EngineError::Validation(format!(
                "quote {} is no longer selectable ({})",
                quote_id.0,
                quote.status.as_str()
            )));
        }

        let event = SessionEvent::QuoteSelected { quote_id: quote_id.0.clone() };
        let (session, outcome) = self
            .transition_with_retry(session_id, &event, now, |session, _outcome| {
                let mut transition =
                    SessionTransition::new(session, SessionStatus::Completed, now);
                transition.selected_quote_id = Some(quote_id.0.clone());
                transition
            })
            .await?;

        // The selection won; the quote acceptance is best-effort bookkeeping
        // on an already-decided session.
        let accepted = self
            .quotes
            .set_status_guarded(
                quote_id,
                &[QuoteStatus::Pending, QuoteStatus::Received, QuoteStatus::CounterOffered],
                QuoteStatus::Accepted,
                now,
            )
            .await?;
        if !accepted {
            tracing::warn!(
                event_name = "session.select.quote_status_moved",
                correlation_id,
                session_id = %session_id.0,
                quote_id = %quote_id.0,
                "selected quote left the open statuses between guard and accept"
            );
        }

        self.audit.emit(
            AuditEvent::new(
                Some(session_id.clone()),
                correlation_id,
                "session.quote_selected",
                AuditCategory::Session,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("quote_id", quote_id.0.clone()),
        );

        if outcome.effects.contains(&TransitionEffect::RunSettlement) {
            if let Err(error) =
                self.settlement.settle(&session, &quote, correlation_id, now).await
            {
                // Completion stands; the commission is recorded as due and
                // retried out-of-band.
                tracing::warn!(
                    event_name = "settlement.deferred",
                    correlation_id,
                    session_id = %session_id.0,
                    error = %error,
                    "settlement failed after completion"
                );
            }
        }

        self.detail(session_id).await
    }

    pub async fn extend_deadline(
        &self,
        session_id: &SessionId,
        actor: &str,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, EngineError> {
        let increment = Duration::seconds(self.config.extension_increment_secs as i64);
        let (session, _outcome) = self
            .transition_with_retry(session_id, &SessionEvent::DeadlineExtended, now, {
                move |session, outcome| {
                    let mut transition = SessionTransition::new(session, outcome.to, now);
                    transition.deadline_at = Some(session.deadline_at + increment);
                    transition.extensions_count = Some(session.extensions_count + 1);
                    transition
                }
            })
            .await?;

        self.audit.emit(
            AuditEvent::new(
                Some(session_id.clone()),
                correlation_id,
                "session.deadline_extended",
                AuditCategory::Session,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("extensions_count", (session.extensions_count + 1).to_string()),
        );

        self.load_session(session_id).await
    }

    pub async fn cancel(
        &self,
        session_id: &SessionId,
        reason: &str,
        actor: &str,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::Validation("cancellation reason is required".to_string()));
        }

        let event = SessionEvent::CancelRequested { reason: reason.to_string() };
        self.transition_with_retry(session_id, &event, now, |session, _outcome| {
            let mut transition = SessionTransition::new(session, SessionStatus::Cancelled, now);
            transition.cancellation_reason = Some(reason.to_string());
            transition
        })
        .await?;

        self.audit.emit(
            AuditEvent::new(
                Some(session_id.clone()),
                correlation_id,
                "session.cancelled",
                AuditCategory::Session,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("reason", reason),
        );

        self.load_session(session_id).await
    }

    pub async fn mark_presenting(
        &self,
        session_id: &SessionId,
        actor: &str,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, EngineError> {
        self.transition_with_retry(session_id, &SessionEvent::QuotesPresented, now, {
            |session, _outcome| SessionTransition::new(session, SessionStatus::Presenting, now)
        })
        .await?;

        self.audit.emit(AuditEvent::new(
            Some(session_id.clone()),
            correlation_id,
            "session.presenting",
            AuditCategory::Session,
            actor,
            AuditOutcome::Success,
        ));

        self.load_session(session_id).await
    }

    /// Move an active session to `error` after an unrecoverable fault, so it
    /// never sits stuck with no deadline progress.
    pub async fn fail_session(
        &self,
        session_id: &SessionId,
        message: &str,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, EngineError> {
        let event = SessionEvent::FaultDetected { message: message.to_string() };
        self.transition_with_retry(session_id, &event, now, |session, _outcome| {
            let mut transition = SessionTransition::new(session, SessionStatus::Error, now);
            transition.error_message = Some(message.to_string());
            transition
        })
        .await?;

        self.audit.emit(
            AuditEvent::new(
                Some(session_id.clone()),
                correlation_id,
                "session.errored",
                AuditCategory::Session,
                "engine",
                AuditOutcome::Failed,
            )
            .with_metadata("error", message),
        );

        self.load_session(session_id).await
    }

    /// The sweeper's timeout attempt. Already-terminal sessions and lost
    /// races return `None`: someone else handled it.
    pub async fn timeout_session(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionId>, EngineError> {
        let session = self.load_session(session_id).await?;
        let outcome = match lifecycle::apply(&session, &SessionEvent::DeadlinePassed, now) {
            Ok(outcome) => outcome,
            Err(TransitionError::SessionClosed { .. })
            | Err(TransitionError::DeadlineNotReached { .. }) => return Ok(None),
            Err(error) => return Err(EngineError::Transition(error)),
        };

        let transition = SessionTransition::new(&session, outcome.to, now);
        if !self.sessions.apply_transition(transition).await? {
            return Ok(None);
        }

        if outcome.effects.contains(&TransitionEffect::ExpireOpenQuotes) {
            let expired = self.quotes.mark_expired(session_id, now).await?;
            if expired > 0 {
                tracing::debug!(
                    event_name = "sweep.quotes_expired",
                    session_id = %session_id.0,
                    expired,
                    "expired open quotes on timed-out session"
                );
            }
        }

        self.audit.emit(AuditEvent::new(
            Some(session_id.clone()),
            "sweep",
            "session.timed_out",
            AuditCategory::Sweep,
            "sweeper",
            AuditOutcome::Success,
        ));

        Ok(Some(session_id.clone()))
    }

    pub async fn detail(&self, session_id: &SessionId) -> Result<SessionDetail, EngineError> {
        let session = self.load_session(session_id).await?;
        let quotes = self.quotes.list_ranked(session_id).await?;
        Ok(SessionDetail { session, quotes })
    }

    pub async fn list_active_sessions(&self) -> Result<Vec<Session>, EngineError> {
        Ok(self.sessions.list_active().await?)
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<Session, EngineError> {
        self.sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { entity: "session", id: session_id.0.clone() })
    }

    /// Read, check the rules, attempt the guarded write; on a lost race,
    /// re-read and try again up to the configured attempts.
    async fn transition_with_retry<F>(
        &self,
        session_id: &SessionId,
        event: &SessionEvent,
        now: DateTime<Utc>,
        build: F,
    ) -> Result<(Session, sokoni_core::lifecycle::TransitionOutcome), EngineError>
    where
        F: Fn(&Session, &sokoni_core::lifecycle::TransitionOutcome) -> SessionTransition,
    {
        for _attempt in 0..self.config.transition_retry_attempts.max(1) {
            let session = self.load_session(session_id).await?;
            let outcome = lifecycle::apply(&session, event, now)
                .map_err(|error| map_rules_error(&session, error))?;

            let transition = build(&session, &outcome);
            if self.sessions.apply_transition(transition).await? {
                return Ok((session, outcome));
            }

            self.audit.emit(
                AuditEvent::new(
                    Some(session_id.clone()),
                    "retry",
                    "session.transition_rejected",
                    AuditCategory::Session,
                    "engine",
                    AuditOutcome::Rejected,
                )
                .with_metadata("event", event.name()),
            );
        }

        Err(EngineError::StateConflict { session_id: session_id.0.clone() })
    }
}

fn map_rules_error(session: &Session, error: TransitionError) -> EngineError {
    match error {
        TransitionError::SessionClosed { status } => EngineError::SessionNotActive {
            session_id: session.id.0.clone(),
            status,
        },
        TransitionError::DeadlineExpired { .. } => EngineError::SessionNotActive {
            session_id: session.id.0.clone(),
            status: session.status,
        },
        other => EngineError::Transition(other),
    }
}
