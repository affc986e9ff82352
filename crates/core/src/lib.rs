pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod scoring;

pub use chrono;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::idempotency::{IdempotencyKey, IdempotencyRecord, IdempotencyState, StoredResponse};
pub use domain::ledger::{
    CommissionRecord, CommissionStatus, LedgerAccount, LedgerEntry, LedgerEntryId, ProfileId,
};
pub use domain::quote::{Quote, QuoteId, QuoteStatus, VendorContact};
pub use domain::session::{FlowType, Session, SessionId, SessionStatus, SettlementTerms};
pub use errors::{EngineError, InterfaceError};
pub use lifecycle::{SessionEvent, TransitionEffect, TransitionError, TransitionOutcome};
pub use scoring::{NoScorer, OfferScorer, PriceScorer};
