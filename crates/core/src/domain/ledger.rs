use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::SessionId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerEntryId(pub String);

/// Token balance for one profile. `pending` holds reserved tokens that are
/// still owned by the profile but not spendable. Both columns stay
/// non-negative; mutations go through the ledger repository only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAccount {
    pub profile_id: ProfileId,
    pub balance: i64,
    pub pending: i64,
    pub updated_at: DateTime<Utc>,
}

impl LedgerAccount {
    pub fn opened(profile_id: ProfileId, now: DateTime<Utc>) -> Self {
        Self { profile_id, balance: 0, pending: 0, updated_at: now }
    }
}

/// One immutable record per applied non-zero delta.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub profile_id: ProfileId,
    pub delta: i64,
    pub entry_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Due,
    Paid,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Due => "due",
            Self::Paid => "paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "due" => Some(Self::Due),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

/// Commission owed by a vendor to a broker for a completed session.
/// Created at settlement time; moved to `paid` exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: String,
    pub session_id: SessionId,
    pub vendor_profile_id: ProfileId,
    pub broker_profile_id: ProfileId,
    pub amount: i64,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}
