mod bootstrap;
mod health;
mod routes;

use anyhow::Result;
use sokoni_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use sokoni_core::config::LogFormat::{Compact, Json, Pretty};
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = app.sweeper.clone();
    let sweep_interval = app.config.sweeper.interval_secs;
    let sweeper_task = tokio::spawn(async move {
        sweeper.run(sweep_interval, shutdown_rx).await;
    });
    tracing::info!(
        event_name = "system.sweeper.started",
        correlation_id = "bootstrap",
        session_id = "unknown",
        interval_secs = sweep_interval,
        "deadline sweeper loop started"
    );

    let state = routes::AppState {
        engine: app.engine.clone(),
        gateway: app.gateway.clone(),
        sweeper: app.sweeper.clone(),
        admin_token: app.config.server.admin_token.clone(),
    };
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        session_id = "unknown",
        bind_address = %address,
        "sokoni-server started"
    );

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        session_id = "unknown",
        "sokoni-server stopping"
    );
    let _ = shutdown_tx.send(true);
    let _ = sweeper_task.await;

    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
