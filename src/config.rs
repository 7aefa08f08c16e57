//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::data::RetryPolicy;
use crate::error::AppError;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "videos.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://videos.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
    /// Pool size
    pub max_connections: u32,
}

/// Federation behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Preferred username of the instance (system) actor
    pub system_actor_name: String,
    /// Attempts per transaction before a conflict is surfaced
    pub transaction_retries: u32,
    /// Linear backoff step between attempts
    pub retry_backoff_ms: u64,
    /// Deadline for resolving a remote object
    pub fetch_timeout_seconds: u64,
    /// Period of the bad-follow eviction sweep
    pub eviction_interval_seconds: u64,
    /// Accept follows of the instance actor without moderation
    pub auto_accept_instance_follows: bool,
    /// User-Agent sent when fetching remote objects
    pub user_agent: String,
    pub score: ScoreConfig,
}

impl FederationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.transaction_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

/// Follow score tuning
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScoreConfig {
    /// Score of a new edge
    pub base: i64,
    /// Saturation ceiling
    pub max: i64,
    /// Added per successful delivery
    pub bonus: i64,
    /// Added per failed delivery (negative)
    pub penalty: i64,
    /// Lowest score a penalty can reach
    pub floor: i64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            base: 1000,
            max: 10000,
            bonus: 10,
            penalty: -10,
            floor: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

/// Hard ceiling enforced by the schema
const SCORE_CEILING: i64 = 10000;

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (VIDFED__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost:8080")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/vidfed.db")?
            .set_default("database.max_connections", 8)?
            .set_default("federation.system_actor_name", "instance")?
            .set_default("federation.transaction_retries", 5)?
            .set_default("federation.retry_backoff_ms", 20)?
            .set_default("federation.fetch_timeout_seconds", 10)?
            .set_default("federation.eviction_interval_seconds", 3600)?
            .set_default("federation.auto_accept_instance_follows", true)?
            .set_default(
                "federation.user_agent",
                concat!("vidfed/", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("federation.score.base", 1000)?
            .set_default("federation.score.max", 10000)?
            .set_default("federation.score.bonus", 10)?
            .set_default("federation.score.penalty", -10)?
            .set_default("federation.score.floor", 0)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (VIDFED__*)
            .add_source(
                Environment::with_prefix("VIDFED")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let score = &self.federation.score;

        if score.max > SCORE_CEILING {
            return Err(AppError::Config(format!(
                "federation.score.max must not exceed {}",
                SCORE_CEILING
            )));
        }

        // Eviction selects edges at score <= 0, which the floor must allow.
        if score.floor > 0 {
            return Err(AppError::Config(
                "federation.score.floor must not be greater than 0".to_string(),
            ));
        }

        if score.floor >= score.max {
            return Err(AppError::Config(
                "federation.score.floor must be lower than federation.score.max".to_string(),
            ));
        }

        if score.base > score.max || score.base <= score.floor {
            return Err(AppError::Config(
                "federation.score.base must lie in (floor, max]".to_string(),
            ));
        }

        if score.bonus <= 0 {
            return Err(AppError::Config(
                "federation.score.bonus must be greater than 0".to_string(),
            ));
        }

        if score.penalty >= 0 {
            return Err(AppError::Config(
                "federation.score.penalty must be negative".to_string(),
            ));
        }

        if self.federation.transaction_retries == 0 {
            return Err(AppError::Config(
                "federation.transaction_retries must be greater than 0".to_string(),
            ));
        }

        if self.federation.fetch_timeout_seconds == 0 {
            return Err(AppError::Config(
                "federation.fetch_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.federation.system_actor_name.trim().is_empty() {
            return Err(AppError::Config(
                "federation.system_actor_name must not be empty".to_string(),
            ));
        }

        if self.server.protocol != "http" && self.server.protocol != "https" {
            return Err(AppError::Config(
                "server.protocol must be http or https".to_string(),
            ));
        }

        Ok(())
    }
}
