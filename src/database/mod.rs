pub mod callback_log_repository;
pub mod error;
pub mod memory;
pub mod mpesa_request_repository;
pub mod order_repository;
pub mod payout_repository;
pub mod refund_repository;
pub mod repository;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error as log_error, info, warn};

use self::callback_log_repository::CallbackLogRepository;
use self::error::{DatabaseError, DatabaseErrorKind};
use self::memory::MemoryStore;
use self::mpesa_request_repository::MpesaRequestRepository;
use self::order_repository::OrderRepository;
use self::payout_repository::PayoutRepository;
use self::refund_repository::RefundRepository;
use self::repository::{CallbackLog, CorrelationStore, OrderStore, PayoutStore, RefundStore};
use crate::config::DatabaseConfig;

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 5,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Initialize the database connection pool
pub async fn init_pool(
    database_url: &str,
    config: Option<PoolConfig>,
) -> Result<PgPool, DatabaseError> {
    let config = config.unwrap_or_default();

    info!(
        "Initializing database pool: max_connections={}, min_connections={}, connection_timeout={:?}",
        config.max_connections, config.min_connections, config.connection_timeout
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(|e| {
            log_error!("Failed to initialize database pool: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

    pool.acquire().await.map_err(|e| {
        log_error!("Failed to acquire test connection: {}", e);
        DatabaseError::from_sqlx(e)
    })?;

    info!("Database pool initialized successfully");
    Ok(pool)
}

/// Connection pool health check
pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!("Health check failed: {}", e);
        DatabaseError::from_sqlx(e)
    })?;

    Ok(())
}

/// Initialize the database pool from application configuration
pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    let pool_config = PoolConfig {
        max_connections: config.max_connections,
        min_connections: config.min_connections,
        connection_timeout: Duration::from_secs(config.connection_timeout),
        idle_timeout: Duration::from_secs(config.idle_timeout.unwrap_or(600)),
        max_lifetime: Duration::from_secs(1800),
    };

    init_pool(&config.url, Some(pool_config)).await
}

/// Apply the embedded schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        log_error!("Failed to run migrations: {}", e);
        DatabaseError::new(DatabaseErrorKind::MigrationError {
            message: e.to_string(),
        })
    })?;

    info!("Database migrations applied");
    Ok(())
}

/// Every store the services depend on, behind trait objects
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub payouts: Arc<dyn PayoutStore>,
    pub correlations: Arc<dyn CorrelationStore>,
    pub refunds: Arc<dyn RefundStore>,
    pub callback_log: Arc<dyn CallbackLog>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            orders: Arc::new(OrderRepository::new(pool.clone())),
            payouts: Arc::new(PayoutRepository::new(pool.clone())),
            correlations: Arc::new(MpesaRequestRepository::new(pool.clone())),
            refunds: Arc::new(RefundRepository::new(pool.clone())),
            callback_log: Arc::new(CallbackLogRepository::new(pool)),
        }
    }

    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            orders: store.clone(),
            payouts: store.clone(),
            correlations: store.clone(),
            refunds: store.clone(),
            callback_log: store,
        }
    }
}
