use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use sokoni_core::audit::TracingAuditSink;
use sokoni_core::config::{AppConfig, ConfigError, LoadOptions};
use sokoni_core::scoring::PriceScorer;
use sokoni_db::repositories::{
    IdempotencyRepository, LedgerRepository, QuoteRepository, SessionRepository,
    SqlIdempotencyRepository, SqlLedgerRepository, SqlQuoteRepository, SqlSessionRepository,
};
use sokoni_db::{connect_with_settings, migrations, DbPool};
use sokoni_engine::{
    DeadlineSweeper, EngineConfig, IdempotencyGateway, SessionEngine, SettlementEngine,
};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<SessionEngine>,
    pub gateway: Arc<IdempotencyGateway>,
    pub sweeper: Arc<DeadlineSweeper>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        session_id = "unknown",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        session_id = "unknown",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        session_id = "unknown",
        "database migrations applied"
    );

    let sessions = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let quotes = Arc::new(SqlQuoteRepository::new(db_pool.clone()));
    let ledger: Arc<dyn LedgerRepository> =
        Arc::new(SqlLedgerRepository::new(db_pool.clone()));
    let idempotency: Arc<dyn IdempotencyRepository> =
        Arc::new(SqlIdempotencyRepository::new(db_pool.clone()));
    let audit = Arc::new(TracingAuditSink);

    let engine = Arc::new(SessionEngine::new(
        sessions as Arc<dyn SessionRepository>,
        quotes as Arc<dyn QuoteRepository>,
        Arc::new(PriceScorer),
        SettlementEngine::new(ledger.clone(), audit.clone()),
        audit.clone(),
        EngineConfig {
            default_sla_minutes: config.session.default_sla_minutes,
            extension_increment_secs: config.session.extension_increment_secs,
            default_max_extensions: config.session.default_max_extensions,
            ..EngineConfig::default()
        },
    ));

    let gateway = Arc::new(IdempotencyGateway::new(
        idempotency.clone(),
        config.idempotency.success_ttl_secs,
        config.idempotency.pending_ttl_secs,
    ));

    let sweeper = Arc::new(DeadlineSweeper::new(
        engine.clone(),
        Arc::new(SettlementEngine::new(ledger, audit)),
        idempotency,
        config.idempotency.success_ttl_secs,
        config.idempotency.pending_ttl_secs,
        config.sweeper.warning_window_minutes,
    ));

    Ok(Application { config, db_pool, engine, gateway, sweeper })
}
