//! Configuration management

use chunkload_common::env;
use serde::{Deserialize, Serialize};

use crate::ingest::DEFAULT_MAX_EVENT_AGE_SECS;
use crate::store::DEFAULT_MAX_TRANSACTION_ATTEMPTS;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/chunkload";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default warehouse project identifier, used in table names in logs.
pub const DEFAULT_WAREHOUSE_PROJECT_ID: &str = "local";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub warehouse: WarehouseConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database holding the ingestion state documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Delivery handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Events older than this are dropped and their object marked failed
    pub max_event_age_secs: u64,
    /// Bound on optimistic retries of one state transaction
    pub max_transaction_attempts: usize,
}

/// Destination of the loads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub project_id: String,
    pub dataset_id: String,
    /// Warehouse connection; the state database when unset
    pub database_url: Option<String>,
}

impl WarehouseConfig {
    pub fn database_url<'a>(&'a self, database: &'a DatabaseConfig) -> &'a str {
        self.database_url.as_deref().unwrap_or(&database.url)
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: env::var_or("CHUNKLOAD_HOST", DEFAULT_SERVER_HOST),
                port: env::parse_var_or("CHUNKLOAD_PORT", DEFAULT_SERVER_PORT)?,
                shutdown_timeout_secs: env::parse_var_or(
                    "CHUNKLOAD_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                )?,
            },
            database: DatabaseConfig {
                url: env::var_or("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env::parse_var_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                min_connections: env::parse_var_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                )?,
                connect_timeout_secs: env::parse_var_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
                idle_timeout_secs: env::parse_var_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                )?,
            },
            ingest: IngestConfig {
                max_event_age_secs: env::parse_var_or(
                    "MAX_EVENT_AGE_SECS",
                    DEFAULT_MAX_EVENT_AGE_SECS,
                )?,
                max_transaction_attempts: env::parse_var_or(
                    "STATE_TX_MAX_ATTEMPTS",
                    DEFAULT_MAX_TRANSACTION_ATTEMPTS,
                )?,
            },
            warehouse: WarehouseConfig {
                project_id: env::var_or("WAREHOUSE_PROJECT_ID", DEFAULT_WAREHOUSE_PROJECT_ID),
                dataset_id: env::require_var("WAREHOUSE_DATASET_ID")?,
                database_url: env::var("WAREHOUSE_DATABASE_URL"),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.ingest.max_event_age_secs == 0 {
            anyhow::bail!("MAX_EVENT_AGE_SECS must be greater than 0");
        }

        if self.ingest.max_transaction_attempts == 0 {
            anyhow::bail!("STATE_TX_MAX_ATTEMPTS must be greater than 0");
        }

        if self.warehouse.dataset_id.trim().is_empty() {
            anyhow::bail!("WAREHOUSE_DATASET_ID cannot be empty");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            ingest: IngestConfig {
                max_event_age_secs: DEFAULT_MAX_EVENT_AGE_SECS,
                max_transaction_attempts: DEFAULT_MAX_TRANSACTION_ATTEMPTS,
            },
            warehouse: WarehouseConfig {
                project_id: DEFAULT_WAREHOUSE_PROJECT_ID.to_string(),
                dataset_id: "exports".to_string(),
                database_url: None,
            },
        }
    }
}
