use secrecy::ExposeSecret;
use sokoni_core::config::{AppConfig, LoadOptions};

/// Render the effective configuration. Secrets are redacted; precedence is
/// env > file > default, resolved by the loader itself.
pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let admin_token = config
        .server
        .admin_token
        .as_ref()
        .map(|token| redact(token.expose_secret()))
        .unwrap_or_else(|| "(unset)".to_string());

    [
        "effective config (source precedence: env > file > default):".to_string(),
        format!("  database.url                      = {}", config.database.url),
        format!("  database.max_connections          = {}", config.database.max_connections),
        format!("  database.timeout_secs             = {}", config.database.timeout_secs),
        format!("  server.bind_address               = {}", config.server.bind_address),
        format!("  server.port                       = {}", config.server.port),
        format!("  server.health_check_port          = {}", config.server.health_check_port),
        format!("  server.admin_token                = {admin_token}"),
        format!("  session.default_sla_minutes       = {}", config.session.default_sla_minutes),
        format!(
            "  session.extension_increment_secs  = {}",
            config.session.extension_increment_secs
        ),
        format!(
            "  session.default_max_extensions    = {}",
            config.session.default_max_extensions
        ),
        format!("  sweeper.interval_secs             = {}", config.sweeper.interval_secs),
        format!(
            "  sweeper.warning_window_minutes    = {}",
            config.sweeper.warning_window_minutes
        ),
        format!("  idempotency.success_ttl_secs      = {}", config.idempotency.success_ttl_secs),
        format!("  idempotency.pending_ttl_secs      = {}", config.idempotency.pending_ttl_secs),
        format!("  logging.level                     = {}", config.logging.level),
        format!("  logging.format                    = {:?}", config.logging.format),
    ]
    .join("\n")
}

fn redact(value: &str) -> String {
    if value.len() <= 4 {
        return "****".to_string();
    }
    format!("{}****", &value[..4])
}
