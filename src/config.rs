use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_VNPAY_PAYMENT_URL: &str = "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html";
const DEV_DEFAULT_VNPAY_SECRET: &str = "aims_development_vnpay_hash_secret_do_not_ship";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
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

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default = "default_false_bool")]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,
    /// Statement timeout (seconds), 0 = disabled
    #[serde(default)]
    pub db_statement_timeout_secs: Option<u64>,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Storefront base URL, used for post-payment browser redirects
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,

    /// Cart session lifetime in minutes
    #[serde(default = "default_cart_session_ttl_minutes")]
    pub cart_session_ttl_minutes: u64,

    /// Interval (seconds) between expired-cart sweeps
    #[serde(default = "default_cart_sweep_interval_secs")]
    pub cart_sweep_interval_secs: u64,

    // ========== VNPay Configuration ==========
    /// VNPay merchant terminal code
    #[serde(default = "default_vnpay_tmn_code")]
    pub vnpay_tmn_code: String,

    /// VNPay HMAC secret for URL signing and callback verification
    #[validate(length(min = 16), custom = "validate_vnpay_secret")]
    pub vnpay_hash_secret: String,

    /// VNPay hosted payment page URL
    #[serde(default = "default_vnpay_payment_url")]
    pub vnpay_payment_url: String,

    /// URL the gateway redirects the customer back to
    #[serde(default)]
    pub vnpay_return_url: Option<String>,

    // ========== API Pagination Configuration ==========
    /// Default page size for paginated API responses
    #[serde(default = "default_api_page_size")]
    pub api_default_page_size: u32,

    /// Maximum page size allowed for paginated API responses
    #[serde(default = "default_api_max_page_size")]
    pub api_max_page_size: u32,
}

impl AppConfig {
    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Creates a new configuration with defaults for everything optional
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            db_statement_timeout_secs: None,
            event_channel_capacity: default_event_channel_capacity(),
            frontend_url: default_frontend_url(),
            cart_session_ttl_minutes: default_cart_session_ttl_minutes(),
            cart_sweep_interval_secs: default_cart_sweep_interval_secs(),
            vnpay_tmn_code: default_vnpay_tmn_code(),
            vnpay_hash_secret: DEV_DEFAULT_VNPAY_SECRET.to_string(),
            vnpay_payment_url: default_vnpay_payment_url(),
            vnpay_return_url: None,
            api_default_page_size: default_api_page_size(),
            api_max_page_size: default_api_max_page_size(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// The URL VNPay sends the customer back to after paying
    pub fn vnpay_return_url(&self) -> String {
        self.vnpay_return_url.clone().unwrap_or_else(|| {
            format!("http://{}:{}/api/v1/payments/return", self.host, self.port)
        })
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.vnpay_hash_secret.trim() == DEV_DEFAULT_VNPAY_SECRET {
            let mut err = ValidationError::new("vnpay_hash_secret_default_dev");
            err.message = Some(
                "The bundled development VNPay secret must not be used outside development. Set APP__VNPAY_HASH_SECRET to the merchant secret issued by VNPay."
                    .into(),
            );
            errors.add("vnpay_hash_secret", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Cart session lifetime as a chrono duration
    pub fn cart_session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cart_session_ttl_minutes as i64)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_false_bool() -> bool {
    false
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_cart_session_ttl_minutes() -> u64 {
    1440 // 24 hours
}

fn default_cart_sweep_interval_secs() -> u64 {
    3600
}

fn default_vnpay_tmn_code() -> String {
    "DEMOV210".to_string()
}

fn default_vnpay_payment_url() -> String {
    DEFAULT_VNPAY_PAYMENT_URL.to_string()
}

fn default_api_page_size() -> u32 {
    20
}

fn default_api_max_page_size() -> u32 {
    100
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

fn validate_vnpay_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    // Reject obvious placeholders
    const DISALLOWED: [&str; 3] = [
        "CHANGE_THIS_SECRET_IN_PRODUCTION",
        "your-secret-key",
        "default-secret-key",
    ];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("vnpay_hash_secret");
        err.message =
            Some("VNPay hash secret must be overridden with the merchant secret".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("vnpay_hash_secret");
            err.message =
                Some("VNPay hash secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("aims_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Docker config (config/docker.toml) if DOCKER env var is set
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !std::path::Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // NOTE: vnpay_hash_secret has no default outside development - it MUST be
    // provided via environment variable or config file.
    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://aims.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    if env::var("DOCKER").is_ok() {
        info!("Docker environment detected");
        builder =
            builder.add_source(File::with_name(&format!("{}/docker", CONFIG_DIR)).required(false));
    }

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // Check for the signing secret before deserialization to provide a clear error
    if config.get_string("vnpay_hash_secret").is_err() {
        if run_env == DEFAULT_ENV {
            info!("vnpay_hash_secret not configured; using the development placeholder");
        } else {
            error!("VNPay hash secret is not configured. Set APP__VNPAY_HASH_SECRET to the merchant secret issued by VNPay.");
            return Err(AppConfigError::Load(ConfigError::NotFound(
                "vnpay_hash_secret is required but not configured. Set APP__VNPAY_HASH_SECRET environment variable."
                    .into(),
            )));
        }
    }

    let config = Config::builder()
        .add_source(config)
        .set_default("vnpay_hash_secret", DEV_DEFAULT_VNPAY_SECRET)?
        .build()?;

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

#[cfg(test)]
mod validation_tests {
    use super::*;

    fn base_config() -> AppConfig {
        let mut cfg = AppConfig::new(
            "sqlite://aims.db?mode=memory".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        );
        cfg.vnpay_hash_secret = "a_real_merchant_secret_0123456789".into();
        cfg
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_allows_override_flag() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn development_allows_permissive_by_default() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_rejects_bundled_vnpay_secret() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        cfg.vnpay_hash_secret = DEV_DEFAULT_VNPAY_SECRET.into();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn zero_event_channel_capacity_fails_validation() {
        assert!(validate_event_channel_capacity(0).is_err());
        assert!(validate_event_channel_capacity(1024).is_ok());

        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        cfg.event_channel_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn repeated_character_secret_is_rejected() {
        assert!(validate_vnpay_secret("aaaaaaaaaaaaaaaaaaaa").is_err());
        assert!(validate_vnpay_secret("a_real_merchant_secret_0123456789").is_ok());
    }

    #[test]
    fn return_url_falls_back_to_host_and_port() {
        let cfg = base_config();
        assert_eq!(
            cfg.vnpay_return_url(),
            "http://127.0.0.1:8080/api/v1/payments/return"
        );
    }
}

#[cfg(all(test, feature = "mock-tests"))]
mod env_tests {
    use super::*;

    #[test]
    fn env_overrides_defaults() {
        env::set_var("APP__DATABASE_URL", "sqlite://override.db?mode=rwc");
        env::set_var("APP__VNPAY_HASH_SECRET", "env_secret_value_0123456789abcdef");
        env::set_var("RUN_ENV", "development");

        let config = load_config().unwrap();

        assert_eq!(config.database_url, "sqlite://override.db?mode=rwc");
        assert_eq!(config.environment, "development");

        env::remove_var("APP__DATABASE_URL");
        env::remove_var("APP__VNPAY_HASH_SECRET");
        env::remove_var("RUN_ENV");
    }
}
