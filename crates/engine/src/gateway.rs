use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use sokoni_core::domain::idempotency::{
    hash_payload, IdempotencyKey, IdempotencyState, StoredResponse,
};
use sokoni_core::errors::EngineError;
use sokoni_db::repositories::{
    idempotency::{SYNTHETIC_TIMEOUT_BODY, SYNTHETIC_TIMEOUT_STATUS},
    IdempotencyRepository, ReserveOutcome,
};

/// What the gateway hands back: the stored (or fresh) response plus whether
/// it was replayed from a previous execution. Replay is a signal, not an
/// error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: serde_json::Value,
    pub replayed: bool,
}

impl GatewayResponse {
    fn fresh(response: StoredResponse) -> Self {
        Self { status: response.status, body: response.body, replayed: false }
    }

    fn replay(response: StoredResponse) -> Self {
        Self { status: response.status, body: response.body, replayed: true }
    }
}

/// Fronts every externally triggered mutation. At most one execution per
/// key; joiners wait for the original execution and receive its stored
/// result; keys absent from the request pass through unguarded (logged).
pub struct IdempotencyGateway {
    records: Arc<dyn IdempotencyRepository>,
    success_ttl: Duration,
    pending_ttl: Duration,
    poll_interval: std::time::Duration,
}

impl IdempotencyGateway {
    pub fn new(
        records: Arc<dyn IdempotencyRepository>,
        success_ttl_secs: u64,
        pending_ttl_secs: u64,
    ) -> Self {
        Self {
            records,
            success_ttl: Duration::seconds(success_ttl_secs as i64),
            pending_ttl: Duration::seconds(pending_ttl_secs as i64),
            poll_interval: std::time::Duration::from_millis(100),
        }
    }

    pub fn success_ttl(&self) -> Duration {
        self.success_ttl
    }

    pub fn pending_ttl(&self) -> Duration {
        self.pending_ttl
    }

    pub async fn execute<F, Fut>(
        &self,
        key: Option<IdempotencyKey>,
        payload: &str,
        correlation_id: &str,
        now: DateTime<Utc>,
        operation: F,
    ) -> Result<GatewayResponse, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoredResponse>,
    {
        let Some(key) = key else {
            tracing::debug!(
                event_name = "gateway.unguarded_mutation",
                correlation_id,
                "mutation executed without an idempotency key"
            );
            return Ok(GatewayResponse::fresh(operation().await));
        };

        let payload_hash = hash_payload(payload);
        match self.records.try_reserve(&key, &payload_hash, now).await? {
            ReserveOutcome::Reserved => {
                let response = operation().await;
                self.records.finalize(&key, &response, Utc::now()).await?;
                Ok(GatewayResponse::fresh(response))
            }
            ReserveOutcome::Existing(record) => {
                if record.payload_hash != payload_hash {
                    tracing::warn!(
                        event_name = "gateway.payload_mismatch",
                        correlation_id,
                        key = key.as_str(),
                        "idempotency key reused with a different payload; replaying stored result"
                    );
                }
                self.join(&key, record.state, record.created_at, now).await
            }
        }
    }

    /// Wait for the original execution to resolve, or declare it dead once
    /// the pending TTL is spent and replay the synthetic timeout failure.
    async fn join(
        &self,
        key: &IdempotencyKey,
        state: IdempotencyState,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<GatewayResponse, EngineError> {
        if state == IdempotencyState::Pending && now - created_at >= self.pending_ttl {
            let synthetic = synthetic_timeout();
            self.records.finalize(key, &synthetic, Utc::now()).await?;
            return Ok(GatewayResponse::replay(synthetic));
        }

        loop {
            let record = self.records.find(key).await?.ok_or_else(|| {
                EngineError::Persistence("idempotency record vanished while joining".to_string())
            })?;

            if let Some(response) = record.response {
                return Ok(GatewayResponse::replay(response));
            }

            if record.stale_pending(Utc::now(), self.pending_ttl) {
                let synthetic = synthetic_timeout();
                self.records.finalize(key, &synthetic, Utc::now()).await?;
                return Ok(GatewayResponse::replay(synthetic));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn synthetic_timeout() -> StoredResponse {
    StoredResponse {
        status: SYNTHETIC_TIMEOUT_STATUS,
        body: serde_json::from_str(SYNTHETIC_TIMEOUT_BODY).unwrap_or(serde_json::Value::Null),
    }
}
