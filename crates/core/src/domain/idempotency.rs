use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const KEY_MIN_LEN: usize = 16;
pub const KEY_MAX_LEN: usize = 255;

/// Client-supplied deduplication token for a mutating call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        let len = value.chars().count();
        if !(KEY_MIN_LEN..=KEY_MAX_LEN).contains(&len) {
            return Err(format!(
                "idempotency key must be {KEY_MIN_LEN}-{KEY_MAX_LEN} characters, got {len}"
            ));
        }
        if value.chars().any(char::is_whitespace) {
            return Err("idempotency key must not contain whitespace".to_string());
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyState {
    Pending,
    Completed,
}

impl IdempotencyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// The stored outcome of the guarded operation, replayed verbatim to every
/// caller presenting the same key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub state: IdempotencyState,
    /// SHA-256 of the request payload; a replay with a different payload is
    /// logged before the stored result is returned.
    pub payload_hash: String,
    pub response: Option<StoredResponse>,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    /// A pending record whose execution never finalized within the pending
    /// TTL. Joiners stop waiting on it and it resolves to a synthetic
    /// timeout failure.
    pub fn stale_pending(&self, now: DateTime<Utc>, pending_ttl: Duration) -> bool {
        self.state == IdempotencyState::Pending && now - self.created_at >= pending_ttl
    }

    /// A finalized record past the success TTL; eligible for purge.
    pub fn expired(&self, now: DateTime<Utc>, success_ttl: Duration) -> bool {
        match (self.state, self.finalized_at) {
            (IdempotencyState::Completed, Some(finalized_at)) => {
                now - finalized_at >= success_ttl
            }
            _ => false,
        }
    }
}

/// Canonical payload fingerprint for idempotency checking.
pub fn hash_payload(payload: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{
        hash_payload, IdempotencyKey, IdempotencyRecord, IdempotencyState, StoredResponse,
    };

    fn record(state: IdempotencyState) -> IdempotencyRecord {
        let now = Utc::now();
        IdempotencyRecord {
            key: IdempotencyKey::new("client-key-0000000001").expect("valid key"),
            state,
            payload_hash: hash_payload("{}"),
            response: match state {
                IdempotencyState::Completed => Some(StoredResponse {
                    status: 200,
                    body: serde_json::json!({"ok": true}),
                }),
                IdempotencyState::Pending => None,
            },
            created_at: now,
            finalized_at: match state {
                IdempotencyState::Completed => Some(now),
                IdempotencyState::Pending => None,
            },
        }
    }

    #[test]
    fn key_length_bounds_are_enforced() {
        assert!(IdempotencyKey::new("short").is_err());
        assert!(IdempotencyKey::new("a".repeat(16)).is_ok());
        assert!(IdempotencyKey::new("a".repeat(255)).is_ok());
        assert!(IdempotencyKey::new("a".repeat(256)).is_err());
        assert!(IdempotencyKey::new("has whitespace inside!").is_err());
    }

    #[test]
    fn state_round_trips_from_storage_encoding() {
        for state in [IdempotencyState::Pending, IdempotencyState::Completed] {
            assert_eq!(IdempotencyState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn pending_records_go_stale_after_the_pending_ttl() {
        let mut pending = record(IdempotencyState::Pending);
        let ttl = Duration::seconds(60);

        assert!(!pending.stale_pending(pending.created_at + Duration::seconds(59), ttl));
        assert!(pending.stale_pending(pending.created_at + Duration::seconds(60), ttl));

        pending.state = IdempotencyState::Completed;
        assert!(!pending.stale_pending(pending.created_at + Duration::hours(1), ttl));
    }

    #[test]
    fn completed_records_expire_after_the_success_ttl() {
        let completed = record(IdempotencyState::Completed);
        let ttl = Duration::hours(24);
        let finalized_at = completed.finalized_at.expect("finalized");

        assert!(!completed.expired(finalized_at + Duration::hours(23), ttl));
        assert!(completed.expired(finalized_at + Duration::hours(24), ttl));
    }

    #[test]
    fn payload_hash_is_stable_and_content_sensitive() {
        assert_eq!(hash_payload("{\"a\":1}"), hash_payload("{\"a\":1}"));
        assert_ne!(hash_payload("{\"a\":1}"), hash_payload("{\"a\":2}"));
    }
}
