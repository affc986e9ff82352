use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::SessionId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

/// The vendor's reachable address on the messaging channel (phone number or
/// channel handle). Required even for anonymous offers; unique per session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VendorContact(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Pending,
    Received,
    Accepted,
    Rejected,
    Expired,
    Withdrawn,
    CounterOffered,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Received => "received",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Withdrawn => "withdrawn",
            Self::CounterOffered => "counter_offered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "received" => Some(Self::Received),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            "withdrawn" => Some(Self::Withdrawn),
            "counter_offered" => Some(Self::CounterOffered),
            _ => None,
        }
    }

    /// Statuses a requester may still select.
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Pending | Self::Received | Self::CounterOffered)
    }

    /// Statuses the sweeper may move to `expired`.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Received)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub session_id: SessionId,
    /// Profile reference when the vendor is registered; anonymous offers
    /// carry only the contact.
    pub vendor_id: Option<String>,
    pub vendor_type: String,
    pub vendor_name: String,
    pub vendor_contact: VendorContact,
    /// Opaque offer payload (price, ETA, terms) owned by the caller.
    pub offer_data: serde_json::Value,
    pub status: QuoteStatus,
    pub responded_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ranking_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn is_selectable(&self) -> bool {
        self.status.is_selectable()
    }

    pub fn expired_by(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.is_open()
            && self.expires_at.is_some_and(|expires_at| expires_at <= cutoff)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{Quote, QuoteId, QuoteStatus, VendorContact};
    use crate::domain::session::SessionId;

    fn quote(status: QuoteStatus) -> Quote {
        let now = Utc::now();
        Quote {
            id: QuoteId("Q-1".to_string()),
            session_id: SessionId("S-1".to_string()),
            vendor_id: Some("vendor-3".to_string()),
            vendor_type: "pharmacy".to_string(),
            vendor_name: "Mama Safi Chemist".to_string(),
            vendor_contact: VendorContact("+254700000001".to_string()),
            offer_data: serde_json::json!({"price": 450, "eta_minutes": 20}),
            status,
            responded_at: now,
            expires_at: None,
            ranking_score: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_round_trips_from_storage_encoding() {
        let cases = [
            QuoteStatus::Pending,
            QuoteStatus::Received,
            QuoteStatus::Accepted,
            QuoteStatus::Rejected,
            QuoteStatus::Expired,
            QuoteStatus::Withdrawn,
            QuoteStatus::CounterOffered,
        ];
        for status in cases {
            assert_eq!(QuoteStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn only_open_and_countered_quotes_are_selectable() {
        assert!(quote(QuoteStatus::Pending).is_selectable());
        assert!(quote(QuoteStatus::Received).is_selectable());
        assert!(quote(QuoteStatus::CounterOffered).is_selectable());

        assert!(!quote(QuoteStatus::Accepted).is_selectable());
        assert!(!quote(QuoteStatus::Rejected).is_selectable());
        assert!(!quote(QuoteStatus::Expired).is_selectable());
        assert!(!quote(QuoteStatus::Withdrawn).is_selectable());
    }

    #[test]
    fn quotes_without_offer_expiry_never_expire_on_their_own() {
        let quote = quote(QuoteStatus::Received);
        assert!(!quote.expired_by(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn open_quotes_expire_at_the_cutoff() {
        let mut q = quote(QuoteStatus::Received);
        let cutoff = Utc::now();
        q.expires_at = Some(cutoff - Duration::seconds(5));

        assert!(q.expired_by(cutoff));

        q.status = QuoteStatus::Accepted;
        assert!(!q.expired_by(cutoff), "settled quotes are not swept");
    }
}
