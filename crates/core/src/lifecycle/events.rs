use serde::{Deserialize, Serialize};

use crate::domain::session::SessionStatus;

/// Everything that can move a session. Callers and the sweeper use the same
/// event set; there is no privileged bypass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A vendor responded with an offer.
    QuoteReceived,
    /// The presentation layer started showing collected quotes.
    QuotesPresented,
    /// The requester picked a quote.
    QuoteSelected { quote_id: String },
    /// The requester or an admin pushed the deadline out.
    DeadlineExtended,
    /// The requester or an admin abandoned the session.
    CancelRequested { reason: String },
    /// The sweeper found the deadline passed.
    DeadlinePassed,
    /// An unrecoverable fault inside a transition.
    FaultDetected { message: String },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::QuoteReceived => "quote_received",
            Self::QuotesPresented => "quotes_presented",
            Self::QuoteSelected { .. } => "quote_selected",
            Self::DeadlineExtended => "deadline_extended",
            Self::CancelRequested { .. } => "cancel_requested",
            Self::DeadlinePassed => "deadline_passed",
            Self::FaultDetected { .. } => "fault_detected",
        }
    }
}

/// Side effects the engine runs after the guarded write lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionEffect {
    RunSettlement,
    ExpireOpenQuotes,
    NotifyRequester,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub event: SessionEvent,
    pub effects: Vec<TransitionEffect>,
}
