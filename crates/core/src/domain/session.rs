use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// The vertical a session negotiates in. Matching/search for each vertical
/// happens outside the engine; the engine only routes and labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Ride,
    Pharmacy,
    Hardware,
    Errand,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ride => "ride",
            Self::Pharmacy => "pharmacy",
            Self::Hardware => "hardware",
            Self::Errand => "errand",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ride" => Some(Self::Ride),
            "pharmacy" => Some(Self::Pharmacy),
            "hardware" => Some(Self::Hardware),
            "errand" => Some(Self::Errand),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Searching,
    Negotiating,
    Presenting,
    Completed,
    Timeout,
    Cancelled,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Searching => "searching",
            Self::Negotiating => "negotiating",
            Self::Presenting => "presenting",
            Self::Completed => "completed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "searching" => Some(Self::Searching),
            "negotiating" => Some(Self::Negotiating),
            "presenting" => Some(Self::Presenting),
            "completed" => Some(Self::Completed),
            "timeout" => Some(Self::Timeout),
            "cancelled" => Some(Self::Cancelled),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Timeout | Self::Cancelled | Self::Error)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// Broker relationship carried in session metadata. Present iff completing
/// the session owes a commission transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementTerms {
    pub broker_profile_id: String,
    pub commission_tokens: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub requester_id: String,
    pub flow_type: FlowType,
    pub agent_type: String,
    pub status: SessionStatus,
    /// Opaque payload describing what is being negotiated. The engine
    /// stores and returns it, never inspects it.
    pub request_data: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub extensions_count: u32,
    pub max_extensions: u32,
    pub selected_quote_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub error_message: Option<String>,
    pub settlement: Option<SettlementTerms>,
    /// Bumped on every landed write; the token the guarded compare-and-swap
    /// matches on.
    pub state_version: i64,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline_at
    }

    /// Time left before the sweeper may claim the session. Zero once the
    /// deadline has passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline_at - now).max(Duration::zero())
    }

    pub fn can_extend(&self) -> bool {
        self.status.is_active() && self.extensions_count < self.max_extensions
    }

    /// Whether a vendor submission can still land on this session.
    pub fn accepts_quotes(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && !self.deadline_passed(now)
    }

    pub fn validate_invariants(&self) -> Result<(), String> {
        if self.deadline_at <= self.started_at {
            return Err(format!(
                "deadline_at {} must be after started_at {}",
                self.deadline_at, self.started_at
            ));
        }
        if self.extensions_count > self.max_extensions {
            return Err(format!(
                "extensions_count {} exceeds max_extensions {}",
                self.extensions_count, self.max_extensions
            ));
        }
        if self.selected_quote_id.is_some() && self.status != SessionStatus::Completed {
            return Err("selected_quote_id is only set on completed sessions".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{FlowType, Session, SessionId, SessionStatus};

    fn session(status: SessionStatus) -> Session {
        let started_at = Utc::now();
        Session {
            id: SessionId("S-1".to_string()),
            requester_id: "user-7".to_string(),
            flow_type: FlowType::Pharmacy,
            agent_type: "pharmacy".to_string(),
            status,
            request_data: serde_json::json!({"item": "amoxicillin 500mg"}),
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
    fn terminal_statuses_are_exactly_the_four_end_states() {
        let terminal = [
            SessionStatus::Completed,
            SessionStatus::Timeout,
            SessionStatus::Cancelled,
            SessionStatus::Error,
        ];
        let active =
            [SessionStatus::Searching, SessionStatus::Negotiating, SessionStatus::Presenting];

        for status in terminal {
            assert!(status.is_terminal(), "{status:?} should be terminal");
        }
        for status in active {
            assert!(status.is_active(), "{status:?} should be active");
        }
    }

    #[test]
    fn status_round_trips_from_storage_encoding() {
        let cases = [
            SessionStatus::Searching,
            SessionStatus::Negotiating,
            SessionStatus::Presenting,
            SessionStatus::Completed,
            SessionStatus::Timeout,
            SessionStatus::Cancelled,
            SessionStatus::Error,
        ];
        for status in cases {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("negotiatin"), None);
    }

    #[test]
    fn flow_type_round_trips_from_storage_encoding() {
        for flow in [FlowType::Ride, FlowType::Pharmacy, FlowType::Hardware, FlowType::Errand] {
            assert_eq!(FlowType::parse(flow.as_str()), Some(flow));
        }
    }

    #[test]
    fn accepts_quotes_until_the_deadline() {
        let session = session(SessionStatus::Searching);
        let before = session.deadline_at - Duration::seconds(1);
        let at = session.deadline_at;

        assert!(session.accepts_quotes(before));
        assert!(!session.accepts_quotes(at));
    }

    #[test]
    fn terminal_sessions_never_accept_quotes() {
        let session = session(SessionStatus::Cancelled);
        assert!(!session.accepts_quotes(session.started_at));
    }

    #[test]
    fn extension_allowance_is_capped() {
        let mut session = session(SessionStatus::Negotiating);
        assert!(session.can_extend());

        session.extensions_count = 2;
        assert!(!session.can_extend());
    }

    #[test]
    fn invariants_reject_deadline_before_start() {
        let mut session = session(SessionStatus::Searching);
        session.deadline_at = session.started_at - Duration::seconds(1);

        let error = session.validate_invariants().expect_err("must reject inverted deadline");
        assert!(error.contains("deadline_at"));
    }

    #[test]
    fn invariants_reject_selection_on_active_session() {
        let mut session = session(SessionStatus::Negotiating);
        session.selected_quote_id = Some("Q-9".to_string());

        assert!(session.validate_invariants().is_err());
    }
}
