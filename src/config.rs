//! # Configuration Management Module
//!
//! ## Purpose
//! Centralized configuration for the voter registry service, loaded from TOML
//! files with environment variable overrides and validation.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration files (TOML), environment variables
//! - **Output**: Validated configuration structs with defaults and overrides
//! - **Validation**: Type checking, range validation, cap ordering
//!
//! ## Configuration Sources (in order of precedence)
//! 1. Environment variables (highest priority)
//! 2. Configuration files
//! 3. Default values (lowest priority)
//!
//! ## Usage
//! ```rust,no_run
//! use voter_registry_search::config::Config;
//!
//! let config = Config::from_file("config.toml").unwrap();
//! println!("Server port: {}", config.server.port);
//! ```

use crate::errors::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure containing all system settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server and API configuration
    pub server: ServerConfig,
    /// Storage and database settings
    pub storage: StorageConfig,
    /// Search engine behavior
    pub search: SearchConfig,
    /// Autocomplete suggestion behavior
    pub suggestions: SuggestionConfig,
    /// Per-endpoint request quotas
    pub rate_limit: RateLimitConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server and API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// API key granting trusted-caller limits (optional; absent means all
    /// callers are treated as public)
    pub api_key: Option<String>,
}

/// Storage and database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path
    pub db_path: PathBuf,
}

/// Search engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Hard result cap for public callers
    pub public_result_cap: usize,
    /// Hard result cap for trusted callers
    pub trusted_result_cap: usize,
    /// Default result count when the caller supplies no limit
    pub default_limit: usize,
    /// Minimum query length for public callers
    pub public_min_query_len: usize,
    /// Minimum query length for trusted callers
    pub trusted_min_query_len: usize,
    /// Maximum query length accepted before truncating scan work
    pub max_query_length: usize,
    /// Page size for the filtered listing endpoint
    pub page_size: usize,
}

/// Suggestion engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionConfig {
    /// Result cap for public callers
    pub public_limit_cap: usize,
    /// Result cap for trusted callers
    pub trusted_limit_cap: usize,
    /// Default suggestion count when the caller supplies no limit
    pub default_limit: usize,
    /// Minimum query length before any store access happens
    pub min_query_length: usize,
}

/// Rate limiting configuration; all quotas are per client per window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in seconds
    pub window_seconds: u64,
    /// Public search / suggestions / categories endpoints
    pub public_api_rpm: u32,
    /// Public filtered listing page
    pub public_page_rpm: u32,
    /// Trusted search endpoints
    pub trusted_api_rpm: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable structured JSON logging
    pub json_format: bool,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    /// Load configuration from a specific file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!("Configuration file not found: {:?}, using defaults", path);
            let mut config = Self::default();
            config.apply_env_overrides()?;
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Config {
            message: format!("Failed to read config file {:?}: {}", path, e),
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| RegistryError::Config {
            message: format!("Failed to parse config file {:?}: {}", path, e),
        })?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("VOTER_REGISTRY_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("VOTER_REGISTRY_PORT") {
            self.server.port = port.parse().map_err(|_| RegistryError::Config {
                message: "Invalid port number in VOTER_REGISTRY_PORT".to_string(),
            })?;
        }
        if let Ok(api_key) = std::env::var("VOTER_REGISTRY_API_KEY") {
            self.server.api_key = Some(api_key);
        }
        if let Ok(db_path) = std::env::var("VOTER_REGISTRY_DB_PATH") {
            self.storage.db_path = PathBuf::from(db_path);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(RegistryError::validation(
                "server.port",
                "Port cannot be zero",
            ));
        }

        if self.search.public_result_cap > self.search.trusted_result_cap {
            return Err(RegistryError::validation(
                "search.public_result_cap",
                "Public result cap cannot exceed the trusted cap",
            ));
        }

        if self.search.public_min_query_len < self.search.trusted_min_query_len {
            return Err(RegistryError::validation(
                "search.public_min_query_len",
                "Public minimum query length cannot be below the trusted minimum",
            ));
        }

        if self.suggestions.public_limit_cap > self.suggestions.trusted_limit_cap {
            return Err(RegistryError::validation(
                "suggestions.public_limit_cap",
                "Public suggestion cap cannot exceed the trusted cap",
            ));
        }

        if self.rate_limit.window_seconds == 0 {
            return Err(RegistryError::validation(
                "rate_limit.window_seconds",
                "Rate limit window must be greater than zero",
            ));
        }

        if self.search.page_size == 0 {
            return Err(RegistryError::validation(
                "search.page_size",
                "Page size must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Get configuration as TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RegistryError::Config {
            message: format!("Failed to serialize config to TOML: {}", e),
        })
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                enable_cors: true,
                api_key: None,
            },
            storage: StorageConfig {
                db_path: PathBuf::from("./data/voter_registry.db"),
            },
            search: SearchConfig {
                public_result_cap: 20,
                trusted_result_cap: 50,
                default_limit: 10,
                public_min_query_len: 2,
                trusted_min_query_len: 1,
                max_query_length: 200,
                page_size: 50,
            },
            suggestions: SuggestionConfig {
                public_limit_cap: 10,
                trusted_limit_cap: 15,
                default_limit: 10,
                min_query_length: 2,
            },
            rate_limit: RateLimitConfig {
                window_seconds: 60,
                public_api_rpm: 60,
                public_page_rpm: 30,
                trusted_api_rpm: 120,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search.public_result_cap, 20);
        assert_eq!(config.search.trusted_result_cap, 50);
        assert_eq!(config.rate_limit.window_seconds, 60);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let toml_str = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.suggestions.public_limit_cap, 10);
    }

    #[test]
    fn test_validation_rejects_inverted_caps() {
        let mut config = Config::default();
        config.search.public_result_cap = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_window() {
        let mut config = Config::default();
        config.rate_limit.window_seconds = 0;
        assert!(config.validate().is_err());
    }
}
