//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub run_migrations: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Farmer ledger settings
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Share of delivered revenue retained by the platform, in [0, 1)
    pub platform_fee_rate: Decimal,
}

/// Background worker settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub correlation_sweep_enabled: bool,
    pub correlation_ttl: Duration,
    pub correlation_sweep_interval: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("HOST cannot be empty".to_string()));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            run_migrations: env::var("DB_RUN_MIGRATIONS")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = env::var("PLATFORM_FEE_RATE").unwrap_or_else(|_| "0.10".to_string());
        Ok(LedgerConfig {
            platform_fee_rate: Decimal::from_str(raw.trim())
                .map_err(|_| ConfigError::InvalidValue("PLATFORM_FEE_RATE".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform_fee_rate < Decimal::ZERO || self.platform_fee_rate >= Decimal::ONE {
            return Err(ConfigError::ValidationFailed(
                "PLATFORM_FEE_RATE must be in [0, 1)".to_string(),
            ));
        }

        Ok(())
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WorkerConfig {
            correlation_sweep_enabled: env::var("CORRELATION_SWEEP_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                != "false",
            correlation_ttl: Duration::from_secs(
                env::var("CORRELATION_TTL_SECS")
                    .unwrap_or_else(|_| "86400".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("CORRELATION_TTL_SECS".to_string()))?,
            ),
            correlation_sweep_interval: Duration::from_secs(
                env::var("CORRELATION_SWEEP_INTERVAL_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .map_err(|_| {
                        ConfigError::InvalidValue("CORRELATION_SWEEP_INTERVAL_SECS".to_string())
                    })?,
            ),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.correlation_sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "CORRELATION_SWEEP_INTERVAL_SECS".to_string(),
            ));
        }

        // A callback can legitimately arrive minutes after the STK prompt
        if self.correlation_ttl < Duration::from_secs(600) {
            return Err(ConfigError::ValidationFailed(
                "CORRELATION_TTL_SECS must be at least 600".to_string(),
            ));
        }

        Ok(())
    }
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when running without external services
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub ledger: LedgerConfig,
    pub workers: WorkerConfig,
    pub skip_externals: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let skip_externals = env::var("SKIP_EXTERNALS")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let database = if skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            logging: LoggingConfig::from_env()?,
            ledger: LedgerConfig::from_env()?,
            workers: WorkerConfig::from_env()?,
            skip_externals,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.ledger.validate()?;
        self.workers.validate()?;
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 5000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_host_validation() {
        let config = ServerConfig {
            host: "".to_string(),
            port: 5000,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fee_rate_bounds() {
        let ok = LedgerConfig {
            platform_fee_rate: Decimal::new(10, 2),
        };
        assert!(ok.validate().is_ok());

        let negative = LedgerConfig {
            platform_fee_rate: Decimal::new(-1, 2),
        };
        assert!(negative.validate().is_err());

        let everything = LedgerConfig {
            platform_fee_rate: Decimal::ONE,
        };
        assert!(everything.validate().is_err());
    }

    #[test]
    fn test_worker_config_rejects_short_ttl() {
        let config = WorkerConfig {
            correlation_sweep_enabled: true,
            correlation_ttl: Duration::from_secs(60),
            correlation_sweep_interval: Duration::from_secs(3600),
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_logging_level_validation() {
        let mut config = LoggingConfig::default();
        assert!(config.validate().is_ok());

        config.level = "chatty".to_string();
        assert!(config.validate().is_err());
    }
}
