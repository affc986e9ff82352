use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub sweeper: SweeperConfig,
    pub idempotency: IdempotencyConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
    /// Required for the sweep and admin endpoints when set.
    pub admin_token: Option<SecretString>,
}

/// Negotiation policy defaults applied when a create request omits them.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub default_sla_minutes: u32,
    pub extension_increment_secs: u64,
    pub default_max_extensions: u32,
}

#[derive(Clone, Debug)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    pub warning_window_minutes: u32,
}

#[derive(Clone, Debug)]
pub struct IdempotencyConfig {
    pub success_ttl_secs: u64,
    pub pending_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub admin_token: Option<String>,
    pub sweeper_interval_secs: Option<u64>,
    pub default_sla_minutes: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://sokoni.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8090,
                health_check_port: 8091,
                graceful_shutdown_secs: 15,
                admin_token: None,
            },
            session: SessionConfig {
                default_sla_minutes: 5,
                extension_increment_secs: 120,
                default_max_extensions: 2,
            },
            sweeper: SweeperConfig { interval_secs: 30, warning_window_minutes: 1 },
            idempotency: IdempotencyConfig {
                success_ttl_secs: 24 * 60 * 60,
                pending_ttl_secs: 60,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    session: Option<SessionPatch>,
    sweeper: Option<SweeperPatch>,
    idempotency: Option<IdempotencyPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    admin_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    default_sla_minutes: Option<u32>,
    extension_increment_secs: Option<u64>,
    default_max_extensions: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SweeperPatch {
    interval_secs: Option<u64>,
    warning_window_minutes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct IdempotencyPatch {
    success_ttl_secs: Option<u64>,
    pending_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("sokoni.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(admin_token_value) = server.admin_token {
                self.server.admin_token = Some(secret_value(admin_token_value));
            }
        }

        if let Some(session) = patch.session {
            if let Some(default_sla_minutes) = session.default_sla_minutes {
                self.session.default_sla_minutes = default_sla_minutes;
            }
            if let Some(extension_increment_secs) = session.extension_increment_secs {
                self.session.extension_increment_secs = extension_increment_secs;
            }
            if let Some(default_max_extensions) = session.default_max_extensions {
                self.session.default_max_extensions = default_max_extensions;
            }
        }

        if let Some(sweeper) = patch.sweeper {
            if let Some(interval_secs) = sweeper.interval_secs {
                self.sweeper.interval_secs = interval_secs;
            }
            if let Some(warning_window_minutes) = sweeper.warning_window_minutes {
                self.sweeper.warning_window_minutes = warning_window_minutes;
            }
        }

        if let Some(idempotency) = patch.idempotency {
            if let Some(success_ttl_secs) = idempotency.success_ttl_secs {
                self.idempotency.success_ttl_secs = success_ttl_secs;
            }
            if let Some(pending_ttl_secs) = idempotency.pending_ttl_secs {
                self.idempotency.pending_ttl_secs = pending_ttl_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SOKONI_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SOKONI_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("SOKONI_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SOKONI_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SOKONI_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SOKONI_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SOKONI_SERVER_PORT") {
            self.server.port = parse_u16("SOKONI_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SOKONI_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("SOKONI_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("SOKONI_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SOKONI_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("SOKONI_SERVER_ADMIN_TOKEN") {
            self.server.admin_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("SOKONI_SESSION_DEFAULT_SLA_MINUTES") {
            self.session.default_sla_minutes =
                parse_u32("SOKONI_SESSION_DEFAULT_SLA_MINUTES", &value)?;
        }
        if let Some(value) = read_env("SOKONI_SESSION_EXTENSION_INCREMENT_SECS") {
            self.session.extension_increment_secs =
                parse_u64("SOKONI_SESSION_EXTENSION_INCREMENT_SECS", &value)?;
        }
        if let Some(value) = read_env("SOKONI_SESSION_DEFAULT_MAX_EXTENSIONS") {
            self.session.default_max_extensions =
                parse_u32("SOKONI_SESSION_DEFAULT_MAX_EXTENSIONS", &value)?;
        }

        if let Some(value) = read_env("SOKONI_SWEEPER_INTERVAL_SECS") {
            self.sweeper.interval_secs = parse_u64("SOKONI_SWEEPER_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("SOKONI_SWEEPER_WARNING_WINDOW_MINUTES") {
            self.sweeper.warning_window_minutes =
                parse_u32("SOKONI_SWEEPER_WARNING_WINDOW_MINUTES", &value)?;
        }

        if let Some(value) = read_env("SOKONI_IDEMPOTENCY_SUCCESS_TTL_SECS") {
            self.idempotency.success_ttl_secs =
                parse_u64("SOKONI_IDEMPOTENCY_SUCCESS_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("SOKONI_IDEMPOTENCY_PENDING_TTL_SECS") {
            self.idempotency.pending_ttl_secs =
                parse_u64("SOKONI_IDEMPOTENCY_PENDING_TTL_SECS", &value)?;
        }

        let log_level = read_env("SOKONI_LOGGING_LEVEL").or_else(|| read_env("SOKONI_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SOKONI_LOGGING_FORMAT").or_else(|| read_env("SOKONI_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(admin_token) = overrides.admin_token {
            self.server.admin_token = Some(secret_value(admin_token));
        }
        if let Some(interval_secs) = overrides.sweeper_interval_secs {
            self.sweeper.interval_secs = interval_secs;
        }
        if let Some(default_sla_minutes) = overrides.default_sla_minutes {
            self.session.default_sla_minutes = default_sla_minutes;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_session(&self.session)?;
        validate_sweeper(&self.sweeper)?;
        validate_idempotency(&self.idempotency)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("sokoni.toml"), PathBuf::from("config/sokoni.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if let Some(token) = &server.admin_token {
        if token.expose_secret().trim().len() < 16 {
            return Err(ConfigError::Validation(
                "server.admin_token must be at least 16 characters when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.default_sla_minutes == 0 || session.default_sla_minutes > 24 * 60 {
        return Err(ConfigError::Validation(
            "session.default_sla_minutes must be in range 1..=1440".to_string(),
        ));
    }

    if session.extension_increment_secs == 0 {
        return Err(ConfigError::Validation(
            "session.extension_increment_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_sweeper(sweeper: &SweeperConfig) -> Result<(), ConfigError> {
    if sweeper.interval_secs == 0 || sweeper.interval_secs > 3600 {
        return Err(ConfigError::Validation(
            "sweeper.interval_secs must be in range 1..=3600".to_string(),
        ));
    }

    Ok(())
}

fn validate_idempotency(idempotency: &IdempotencyConfig) -> Result<(), ConfigError> {
    if idempotency.pending_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "idempotency.pending_ttl_secs must be greater than zero".to_string(),
        ));
    }

    if idempotency.success_ttl_secs <= idempotency.pending_ttl_secs {
        return Err(ConfigError::Validation(
            "idempotency.success_ttl_secs must exceed idempotency.pending_ttl_secs".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}
