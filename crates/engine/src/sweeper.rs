use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use sokoni_core::domain::session::{Session, SessionId};
use sokoni_core::errors::EngineError;
use sokoni_db::repositories::IdempotencyRepository;

use crate::engine::SessionEngine;
use crate::settlement::SettlementEngine;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub transitioned: Vec<SessionId>,
    pub skipped: usize,
    pub commissions_retried: usize,
    pub idempotency_purged: u64,
}

/// Periodically times out past-deadline sessions. Each attempt is the same
/// guarded transition external callers use, so any number of concurrent
/// sweepers produce at most one timeout per session; the rest skip.
pub struct DeadlineSweeper {
    engine: Arc<SessionEngine>,
    settlement: Arc<SettlementEngine>,
    idempotency: Arc<dyn IdempotencyRepository>,
    success_ttl: Duration,
    pending_ttl: Duration,
    warning_window: Duration,
}

impl DeadlineSweeper {
    pub fn new(
        engine: Arc<SessionEngine>,
        settlement: Arc<SettlementEngine>,
        idempotency: Arc<dyn IdempotencyRepository>,
        success_ttl_secs: u64,
        pending_ttl_secs: u64,
        warning_window_minutes: u32,
    ) -> Self {
        Self {
            engine,
            settlement,
            idempotency,
            success_ttl: Duration::seconds(success_ttl_secs as i64),
            pending_ttl: Duration::seconds(pending_ttl_secs as i64),
            warning_window: Duration::minutes(i64::from(warning_window_minutes)),
        }
    }

    /// Active sessions whose deadline falls inside the warning window; the
    /// presentation layer turns these into countdown warnings.
    pub async fn list_expiring(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, EngineError> {
        let horizon = now + self.warning_window;
        let active = self.engine.list_active_sessions().await?;
        Ok(active
            .into_iter()
            .filter(|session| session.deadline_at > now && session.deadline_at <= horizon)
            .collect())
    }

    /// One sweep pass: timeout expired sessions, retry due commissions, and
    /// purge idempotency records past their TTLs.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();

        for session in self.engine.list_active_sessions().await? {
            if !session.deadline_passed(now) {
                continue;
            }
            match self.engine.timeout_session(&session.id, now).await? {
                Some(id) => report.transitioned.push(id),
                None => report.skipped += 1,
            }
        }

        report.commissions_retried = self.settlement.retry_due(now).await?;
        let purge = self.idempotency.purge(now, self.success_ttl, self.pending_ttl).await?;
        report.idempotency_purged = purge.resolved_pending + purge.purged;

        if !report.transitioned.is_empty() {
            tracing::info!(
                event_name = "sweep.completed",
                correlation_id = "sweep",
                transitioned = report.transitioned.len(),
                skipped = report.skipped,
                "sweep pass timed out sessions"
            );
        }

        Ok(report)
    }

    /// Background loop for the server: a sweep pass on every tick until
    /// shutdown is signalled.
    pub async fn run(
        &self,
        interval_secs: u64,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep(Utc::now()).await {
                        tracing::error!(
                            event_name = "sweep.failed",
                            correlation_id = "sweep",
                            error = %error,
                            "sweep pass failed; will retry on next tick"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(
                            event_name = "sweep.stopped",
                            correlation_id = "shutdown",
                            "sweeper loop stopping"
                        );
                        return;
                    }
                }
            }
        }
    }
}
