use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::session::{Session, SessionStatus};
use crate::lifecycle::events::{SessionEvent, TransitionEffect, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("session is closed ({status:?})")]
    SessionClosed { status: SessionStatus },
    #[error("session deadline {deadline_at} has passed")]
    DeadlineExpired { deadline_at: DateTime<Utc> },
    #[error("session deadline {deadline_at} has not been reached")]
    DeadlineNotReached { deadline_at: DateTime<Utc> },
    #[error("extension limit reached: {extensions_count} of {max_extensions}")]
    ExtensionLimitReached { extensions_count: u32, max_extensions: u32 },
}

/// Pure transition rules for the session state machine. The decision here is
/// advisory: the winning write is the guarded compare-and-swap in the store,
/// so two callers may both pass these rules and only one will land.
pub fn apply(
    session: &Session,
    event: &SessionEvent,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, TransitionError> {
    use SessionStatus::{Cancelled, Completed, Error, Negotiating, Presenting, Timeout};
    use TransitionEffect::{ExpireOpenQuotes, NotifyRequester, RunSettlement};

    if session.status.is_terminal() {
        return Err(TransitionError::SessionClosed { status: session.status });
    }

    let (to, effects) = match event {
        SessionEvent::QuoteReceived => {
            if session.deadline_passed(now) {
                return Err(TransitionError::DeadlineExpired { deadline_at: session.deadline_at });
            }
            // First response moves the search forward; later ones land in place.
            match session.status {
                SessionStatus::Searching => (Negotiating, Vec::new()),
                other => (other, Vec::new()),
            }
        }
        SessionEvent::QuotesPresented => {
            if session.deadline_passed(now) {
                return Err(TransitionError::DeadlineExpired { deadline_at: session.deadline_at });
            }
            (Presenting, Vec::new())
        }
        // No deadline guard: a selection racing the sweeper is settled by
        // whichever guarded write lands first.
        SessionEvent::QuoteSelected { .. } => (Completed, vec![RunSettlement, NotifyRequester]),
        SessionEvent::DeadlineExtended => {
            if session.extensions_count >= session.max_extensions {
                return Err(TransitionError::ExtensionLimitReached {
                    extensions_count: session.extensions_count,
                    max_extensions: session.max_extensions,
                });
            }
            (session.status, Vec::new())
        }
        SessionEvent::CancelRequested { .. } => (Cancelled, vec![NotifyRequester]),
        SessionEvent::DeadlinePassed => {
            if !session.deadline_passed(now) {
                return Err(TransitionError::DeadlineNotReached {
                    deadline_at: session.deadline_at,
                });
            }
            (Timeout, vec![ExpireOpenQuotes, NotifyRequester])
        }
        SessionEvent::FaultDetected { .. } => (Error, vec![NotifyRequester]),
    };

    Ok(TransitionOutcome { from: session.status, to, event: event.clone(), effects })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::domain::session::{FlowType, Session, SessionId, SessionStatus};
    use crate::lifecycle::events::{SessionEvent, TransitionEffect};
    use crate::lifecycle::rules::{apply, TransitionError};

    fn session(status: SessionStatus) -> Session {
        let started_at = Utc::now();
        Session {
            id: SessionId("S-rules".to_string()),
            requester_id: "user-1".to_string(),
            flow_type: FlowType::Ride,
            agent_type: "driver".to_string(),
            status,
            request_data: serde_json::json!({"pickup": "CBD", "dropoff": "Westlands"}),
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

    #[test]
    fn first_quote_moves_searching_to_negotiating() {
        let session = session(SessionStatus::Searching);
        let outcome = apply(&session, &SessionEvent::QuoteReceived, session.started_at)
            .expect("searching -> negotiating");

        assert_eq!(outcome.to, SessionStatus::Negotiating);
        assert!(outcome.effects.is_empty());
    }

    #[test]
    fn later_quotes_keep_the_current_active_status() {
        for status in [SessionStatus::Negotiating, SessionStatus::Presenting] {
            let session = session(status);
            let outcome = apply(&session, &SessionEvent::QuoteReceived, session.started_at)
                .expect("quote lands in place");
            assert_eq!(outcome.to, status);
        }
    }

    #[test]
    fn quotes_after_the_deadline_are_rejected() {
        let session = session(SessionStatus::Negotiating);
        let error = apply(&session, &SessionEvent::QuoteReceived, session.deadline_at)
            .expect_err("deadline passed");

        assert!(matches!(error, TransitionError::DeadlineExpired { .. }));
    }

    #[test]
    fn selection_completes_and_triggers_settlement() {
        for status in
            [SessionStatus::Searching, SessionStatus::Negotiating, SessionStatus::Presenting]
        {
            let session = session(status);
            let outcome = apply(
                &session,
                &SessionEvent::QuoteSelected { quote_id: "Q-2".to_string() },
                session.started_at,
            )
            .expect("selection completes");

            assert_eq!(outcome.to, SessionStatus::Completed);
            assert!(outcome.effects.contains(&TransitionEffect::RunSettlement));
        }
    }

    #[test]
    fn selection_is_allowed_past_the_deadline() {
        // The race against the sweeper is decided by the guarded write, not
        // by these rules.
        let session = session(SessionStatus::Negotiating);
        let outcome = apply(
            &session,
            &SessionEvent::QuoteSelected { quote_id: "Q-1".to_string() },
            session.deadline_at + Duration::seconds(30),
        )
        .expect("selection still passes the rules");

        assert_eq!(outcome.to, SessionStatus::Completed);
    }

    #[test]
    fn extension_is_refused_at_the_cap() {
        let mut session = session(SessionStatus::Negotiating);
        session.extensions_count = 2;

        let error = apply(&session, &SessionEvent::DeadlineExtended, session.started_at)
            .expect_err("cap reached");
        assert_eq!(
            error,
            TransitionError::ExtensionLimitReached { extensions_count: 2, max_extensions: 2 }
        );
    }

    #[test]
    fn extension_keeps_the_current_status() {
        let session = session(SessionStatus::Presenting);
        let outcome = apply(&session, &SessionEvent::DeadlineExtended, session.started_at)
            .expect("extension allowed");

        assert_eq!(outcome.from, outcome.to);
    }

    #[test]
    fn sweep_before_the_deadline_is_refused() {
        let session = session(SessionStatus::Searching);
        let error = apply(
            &session,
            &SessionEvent::DeadlinePassed,
            session.deadline_at - Duration::seconds(1),
        )
        .expect_err("too early");

        assert!(matches!(error, TransitionError::DeadlineNotReached { .. }));
    }

    #[test]
    fn sweep_at_the_deadline_times_the_session_out() {
        let session = session(SessionStatus::Negotiating);
        let outcome = apply(&session, &SessionEvent::DeadlinePassed, session.deadline_at)
            .expect("deadline reached");

        assert_eq!(outcome.to, SessionStatus::Timeout);
        assert!(outcome.effects.contains(&TransitionEffect::ExpireOpenQuotes));
    }

    #[test]
    fn every_event_is_refused_on_terminal_sessions() {
        let events = [
            SessionEvent::QuoteReceived,
            SessionEvent::QuotesPresented,
            SessionEvent::QuoteSelected { quote_id: "Q-1".to_string() },
            SessionEvent::DeadlineExtended,
            SessionEvent::CancelRequested { reason: "changed my mind".to_string() },
            SessionEvent::DeadlinePassed,
            SessionEvent::FaultDetected { message: "boom".to_string() },
        ];

        for status in [
            SessionStatus::Completed,
            SessionStatus::Timeout,
            SessionStatus::Cancelled,
            SessionStatus::Error,
        ] {
            let session = session(status);
            for event in &events {
                let error = apply(&session, event, session.deadline_at + Duration::hours(1))
                    .expect_err("terminal sessions are immutable");
                assert_eq!(error, TransitionError::SessionClosed { status });
            }
        }
    }

    #[test]
    fn faults_move_any_active_session_to_error() {
        for status in
            [SessionStatus::Searching, SessionStatus::Negotiating, SessionStatus::Presenting]
        {
            let session = session(status);
            let outcome = apply(
                &session,
                &SessionEvent::FaultDetected { message: "storage write failed".to_string() },
                session.started_at,
            )
            .expect("fault transition");
            assert_eq!(outcome.to, SessionStatus::Error);
        }
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let run = || {
            let mut session = session(SessionStatus::Searching);
            let mut trace = Vec::new();
            let events = [
                SessionEvent::QuoteReceived,
                SessionEvent::QuotesPresented,
                SessionEvent::QuoteSelected { quote_id: "Q-7".to_string() },
            ];
            for event in &events {
                let outcome =
                    apply(&session, event, session.started_at).expect("deterministic run");
                session.status = outcome.to;
                trace.push((outcome.from, outcome.to, outcome.effects.clone()));
            }
            trace
        };

        assert_eq!(run(), run());
    }
}
