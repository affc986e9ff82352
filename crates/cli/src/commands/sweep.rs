use std::sync::Arc;

use chrono::Utc;

use crate::commands::CommandResult;
use sokoni_core::audit::TracingAuditSink;
use sokoni_core::config::{AppConfig, LoadOptions};
use sokoni_core::scoring::NoScorer;
use sokoni_db::repositories::{
    IdempotencyRepository, LedgerRepository, QuoteRepository, SessionRepository,
    SqlIdempotencyRepository, SqlLedgerRepository, SqlQuoteRepository, SqlSessionRepository,
};
use sokoni_db::{connect_with_settings, migrations};
use sokoni_engine::{
    DeadlineSweeper, EngineConfig, SessionEngine, SettlementEngine, SweepReport,
};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let sessions = Arc::new(SqlSessionRepository::new(pool.clone()));
        let quotes = Arc::new(SqlQuoteRepository::new(pool.clone()));
        let ledger: Arc<dyn LedgerRepository> = Arc::new(SqlLedgerRepository::new(pool.clone()));
        let idempotency: Arc<dyn IdempotencyRepository> =
            Arc::new(SqlIdempotencyRepository::new(pool.clone()));
        let audit = Arc::new(TracingAuditSink);

        let engine = Arc::new(SessionEngine::new(
            sessions as Arc<dyn SessionRepository>,
            quotes as Arc<dyn QuoteRepository>,
            Arc::new(NoScorer),
            SettlementEngine::new(ledger.clone(), audit.clone()),
            audit.clone(),
            EngineConfig {
                default_sla_minutes: config.session.default_sla_minutes,
                extension_increment_secs: config.session.extension_increment_secs,
                default_max_extensions: config.session.default_max_extensions,
                ..EngineConfig::default()
            },
        ));
        let sweeper = DeadlineSweeper::new(
            engine,
            Arc::new(SettlementEngine::new(ledger, audit)),
            idempotency,
            config.idempotency.success_ttl_secs,
            config.idempotency.pending_ttl_secs,
            config.sweeper.warning_window_minutes,
        );

        let report =
            sweeper.sweep(Utc::now()).await.map_err(|error| ("sweep", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<SweepReport, (&'static str, String, u8)>(report)
    });

    match result {
        Ok(report) => CommandResult::success(
            "sweep",
            format!(
                "timed out {} session(s), skipped {}, retried {} commission(s), purged {} idempotency record(s)",
                report.transitioned.len(),
                report.skipped,
                report.commissions_retried,
                report.idempotency_purged
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}
