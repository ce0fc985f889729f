//! Configuration for the gateway.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    /// Static backend pool. Order matters: it is the tie-break iteration order.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub access_log: AccessLogConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalancerConfig {
    /// Attempts per logical request, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Upper bound for a single-shot generation call.
    #[serde(default = "default_generate_timeout")]
    pub generate_timeout_secs: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            generate_timeout_secs: default_generate_timeout(),
        }
    }
}

impl BalancerConfig {
    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,
    /// Per-probe timeout, independent for every backend.
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_probe_interval(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One inference backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Soft cap: backends under it are preferred by the selector.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl BackendConfig {
    pub fn new(name: &str, host: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
            max_concurrency: None,
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessLogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_access_log_dir")]
    pub dir: String,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_access_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute per client. 0 disables rate limiting.
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Comma-separated allowed origins, or `*`.
    #[serde(default = "default_cors_origins")]
    pub origins: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: default_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_attempts() -> usize {
    2
}
fn default_generate_timeout() -> u64 {
    300
}
fn default_probe_interval() -> u64 {
    10
}
fn default_probe_timeout() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_access_log_dir() -> String {
    "logs".to_string()
}
fn default_per_minute() -> u32 {
    122
}
fn default_cors_origins() -> String {
    "*".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("No backends configured")]
    NoBackends,
    #[error("Duplicate backend name: {0}")]
    DuplicateBackend(String),
    #[error("Invalid value for {0}")]
    InvalidValue(&'static str),
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (GATEWAY__SECTION__KEY format)
    /// 2. gateway.toml, or the file named by GATEWAY_CONFIG (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "gateway".to_string());

        let config: Config = ConfigLoader::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.name.as_str()) {
                return Err(ConfigError::DuplicateBackend(backend.name.clone()));
            }
        }

        if self.balancer.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("balancer.max_attempts"));
        }
        if self.health.interval_secs == 0 {
            return Err(ConfigError::InvalidValue("health.interval_secs"));
        }
        if self.health.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("health.timeout_secs"));
        }

        Ok(())
    }
}
