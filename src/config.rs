use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_LEAD_DAYS: u32 = 7;
const DEFAULT_PAYMENT_CAPTURE_DELAY_MS: u64 = 2000;
const DEFAULT_OUTBOX_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_OUTBOX_BATCH_SIZE: u64 = 50;
const DEFAULT_OUTBOX_RETENTION_HOURS: u64 = 168;
const DEFAULT_CHECKOUT_SESSION_TTL_SECS: u64 = 1800;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Maximum pooled database connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1, max = 200))]
    pub db_max_connections: u32,

    /// JWT secret key (minimum 64 characters)
    #[validate(custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Server host address
    pub host: String,

    /// Server port (1024-65535)
    #[serde(default = "default_port")]
    #[validate(range(min = 1024))]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Per-request timeout applied by the HTTP layer
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Lead time used for categories the catalog has no value for
    #[serde(default = "default_lead_days")]
    #[validate(range(min = 1, max = 365))]
    pub default_lead_days: u32,

    /// Category lead times seeded into the in-memory catalog
    #[serde(default)]
    pub lead_times: HashMap<String, u32>,

    /// Simulated capture delay for non-COD payments
    #[serde(default = "default_payment_capture_delay_ms")]
    pub payment_capture_delay_ms: u64,

    /// Idle checkout sessions are discarded after this many seconds
    #[serde(default = "default_checkout_session_ttl_secs")]
    #[validate(range(min = 60))]
    pub checkout_session_ttl_secs: u64,

    /// How often the outbox relay polls for pending events
    #[serde(default = "default_outbox_poll_interval_ms")]
    #[validate(range(min = 10))]
    pub outbox_poll_interval_ms: u64,

    /// Maximum events relayed per poll
    #[serde(default = "default_outbox_batch_size")]
    #[validate(range(min = 1, max = 1000))]
    pub outbox_batch_size: u64,

    /// Relayed or failed outbox rows are deleted after this many hours
    #[serde(default = "default_outbox_retention_hours")]
    #[validate(range(min = 1))]
    pub outbox_retention_hours: u64,

    /// Customer notification endpoint; notifications are only logged when unset
    #[serde(default)]
    pub notification_webhook_url: Option<String>,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the
    /// connection string and signing secret.
    pub fn new(database_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            db_max_connections: default_db_max_connections(),
            jwt_secret: jwt_secret.into(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            request_timeout_secs: default_request_timeout_secs(),
            default_lead_days: default_lead_days(),
            lead_times: HashMap::new(),
            payment_capture_delay_ms: default_payment_capture_delay_ms(),
            checkout_session_ttl_secs: default_checkout_session_ttl_secs(),
            outbox_poll_interval_ms: default_outbox_poll_interval_ms(),
            outbox_batch_size: default_outbox_batch_size(),
            outbox_retention_hours: default_outbox_retention_hours(),
            notification_webhook_url: None,
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn payment_capture_delay(&self) -> Duration {
        Duration::from_millis(self.payment_capture_delay_ms)
    }

    pub fn outbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.outbox_poll_interval_ms)
    }

    pub fn outbox_retention(&self) -> Duration {
        Duration::from_secs(self.outbox_retention_hours * 3600)
    }

    pub fn checkout_session_ttl(&self) -> Duration {
        Duration::from_secs(self.checkout_session_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if let Some((category, _)) = self.lead_times.iter().find(|(_, days)| **days == 0) {
            let mut err = ValidationError::new("lead_times");
            err.message = Some(format!("lead time for '{}' must be at least one day", category).into());
            errors.add("lead_times", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_lead_days() -> u32 {
    DEFAULT_LEAD_DAYS
}

fn default_payment_capture_delay_ms() -> u64 {
    DEFAULT_PAYMENT_CAPTURE_DELAY_MS
}

fn default_checkout_session_ttl_secs() -> u64 {
    DEFAULT_CHECKOUT_SESSION_TTL_SECS
}

fn default_outbox_poll_interval_ms() -> u64 {
    DEFAULT_OUTBOX_POLL_INTERVAL_MS
}

fn default_outbox_batch_size() -> u64 {
    DEFAULT_OUTBOX_BATCH_SIZE
}

fn default_outbox_retention_hours() -> u64 {
    DEFAULT_OUTBOX_RETENTION_HOURS
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 64 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must be at least 64 characters for adequate security".into());
        return Err(err);
    }

    let lower = trimmed.to_ascii_lowercase();
    let weak_fragments = ["changeme", "password", "your-secret-key", "12345"];
    if weak_fragments.iter().any(|pattern| lower.contains(pattern)) {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some(
            "JWT secret appears to be weak; use a cryptographically strong random string".into(),
        );
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("furnish_orders={},tower_http=debug", level);
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(default_directive));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] but reading files from `dir`.
pub fn load_config_from(dir: &Path) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            dir.display()
        );
    }

    // jwt_secret has no default and must come from a file or APP__JWT_SECRET.
    let config = Config::builder()
        .set_default("database_url", "sqlite://furnish-orders.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET to a secure random string (minimum 64 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
