//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CART_API_BASE_URL` - Base URL of the remote cart backend
//!
//! ## Optional
//! - `CART_STORE_PATH` - Guest cart file (default: .cart/guest_cart.json)
//! - `CART_REQUEST_TIMEOUT_SECS` - Per-request timeout (default: 10)
//! - `CART_SNAPSHOT_TTL_SECS` - How long a confirmed remote snapshot may be
//!   served without a round trip (default: 30)
//! - `CART_LOG_FORMAT` - `pretty` or `json` (default: pretty)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_STORE_PATH: &str = ".cart/guest_cart.json";
const DEFAULT_REQUEST_TIMEOUT_SECS: &str = "10";
const DEFAULT_SNAPSHOT_TTL_SECS: &str = "30";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{other}'")),
        }
    }
}

/// Cart engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Remote cart gateway settings
    pub gateway: GatewayConfig,
    /// Local guest cart file
    pub store_path: PathBuf,
    /// Time-to-live of cached remote snapshots
    pub snapshot_ttl: Duration,
    /// Log output format
    pub log_format: LogFormat,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Remote cart backend configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL; cart routes are resolved relative to it
    pub base_url: Url,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let gateway = GatewayConfig::from_env()?;
        let store_path = PathBuf::from(get_env_or_default("CART_STORE_PATH", DEFAULT_STORE_PATH));
        let snapshot_ttl = get_secs("CART_SNAPSHOT_TTL_SECS", DEFAULT_SNAPSHOT_TTL_SECS)?;
        let log_format = get_env_or_default("CART_LOG_FORMAT", "pretty")
            .parse::<LogFormat>()
            .map_err(|e| ConfigError::InvalidEnvVar("CART_LOG_FORMAT".to_string(), e))?;

        Ok(Self {
            gateway,
            store_path,
            snapshot_ttl,
            log_format,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }
}

impl GatewayConfig {
    /// Build a gateway configuration directly.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `base_url` is not an absolute URL.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url("CART_API_BASE_URL", base_url)?,
            request_timeout,
        })
    }

    fn from_env() -> Result<Self, ConfigError> {
        let raw = get_required_env("CART_API_BASE_URL")?;
        Ok(Self {
            base_url: parse_base_url("CART_API_BASE_URL", &raw)?,
            request_timeout: get_secs("CART_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable, treating blank as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a whole number of seconds.
fn get_secs(key: &str, default: &str) -> Result<Duration, ConfigError> {
    get_env_or_default(key, default)
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse the backend base URL.
///
/// A trailing slash is appended so relative joins keep any path prefix
/// (`https://api.example.com/v1` + `cart` = `.../v1/cart`).
fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let mut url =
        Url::parse(raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be an absolute http(s) URL".to_string(),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_url_appends_slash() {
        let url = parse_base_url("K", "https://api.example.com/v1").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/");
        assert_eq!(url.join("cart").unwrap().as_str(), "https://api.example.com/v1/cart");
    }

    #[test]
    fn test_parse_base_url_root() {
        let url = parse_base_url("K", "http://127.0.0.1:8000").unwrap();
        assert_eq!(url.join("cart/add").unwrap().as_str(), "http://127.0.0.1:8000/cart/add");
    }

    #[test]
    fn test_parse_base_url_rejects_garbage() {
        let err = parse_base_url("K", "not a url").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));

        let err = parse_base_url("K", "mailto:cart@example.com").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_gateway_config_new() {
        let config = GatewayConfig::new("http://localhost:8000/api", Duration::from_secs(5)).unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:8000/api/");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}
