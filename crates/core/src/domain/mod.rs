pub mod idempotency;
pub mod ledger;
pub mod quote;
pub mod session;
