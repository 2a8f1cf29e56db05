use farmconnect_backend::api::{build_router, AppServices};
use farmconnect_backend::config::AppConfig;
use farmconnect_backend::database::{
    init_pool_from_config, memory::MemoryStore, run_migrations, Stores,
};
use farmconnect_backend::health::HealthChecker;
use farmconnect_backend::logging::init_tracing;
use farmconnect_backend::payments::provider::PaymentGateway;
use farmconnect_backend::payments::providers::mpesa::MpesaProvider;
use farmconnect_backend::services::ledger::FeePolicy;
use farmconnect_backend::services::payment_initiation::InitiationSettings;
use farmconnect_backend::workers::correlation_sweeper::CorrelationSweeper;

use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate().map_err(|e| {
        error!("❌ Invalid configuration: {}", e);
        e
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting FarmConnect payment service"
    );
    info!(
        host = %config.server.host,
        port = config.server.port,
        platform_fee_rate = %config.ledger.platform_fee_rate,
        "Server configuration loaded"
    );

    // Storage
    let (db_pool, stores) = match &config.database {
        None => {
            warn!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true), using an unseeded in-memory store for local testing");
            (None, Stores::in_memory(Arc::new(MemoryStore::new())))
        }
        Some(db_config) => {
            info!("📊 Initializing database connection pool...");
            let pool = init_pool_from_config(db_config).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "✅ Database connection pool initialized"
            );

            if db_config.run_migrations {
                info!("🗄️  Running database migrations...");
                run_migrations(&pool).await.map_err(|e| {
                    error!("❌ Database migrations failed: {}", e);
                    e
                })?;
                info!("✅ Database migrations applied");
            }

            (Some(pool.clone()), Stores::postgres(pool))
        }
    };

    // Payment gateway
    let gateway = if config.skip_externals {
        info!("⏭️  Skipping M-Pesa initialization (SKIP_EXTERNALS=true)");
        None
    } else {
        info!("📱 Initializing M-Pesa client...");
        let provider = MpesaProvider::from_env().map_err(|e| {
            error!("❌ Failed to load M-Pesa configuration: {}", e);
            e
        })?;
        info!(
            base_url = %provider.config().base_url,
            shortcode = %provider.config().shortcode,
            timeout_secs = provider.config().timeout_secs,
            "✅ M-Pesa client initialized"
        );
        let settings = InitiationSettings::from_mpesa(provider.config());
        Some((Arc::new(provider) as Arc<dyn PaymentGateway>, settings))
    };

    info!("🏥 Initializing health checker...");
    let health_checker = HealthChecker::new(db_pool);

    let fees = FeePolicy::new(config.ledger.platform_fee_rate);
    let services = AppServices::new(&stores, fees, gateway, health_checker);

    // Workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let sweeper_handle = if config.workers.correlation_sweep_enabled {
        let sweeper = CorrelationSweeper::new(
            stores.correlations.clone(),
            config.workers.correlation_ttl,
            config.workers.correlation_sweep_interval,
        );
        info!("✅ Correlation sweeper started");
        Some(tokio::spawn(sweeper.run(worker_shutdown_rx)))
    } else {
        info!("Correlation sweeper disabled (CORRELATION_SWEEP_ENABLED=false)");
        None
    };

    info!("🛣️  Setting up application routes...");
    let app = build_router(services);
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║          🌽 FARMCONNECT PAYMENT SERVICE IS RUNNING 🌽         ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  🌐 Server Address:  http://{}", addr);
    println!("║                                                              ║");
    println!("║  POST /api/payments/stkpush       - Prompt buyer to pay      ║");
    println!("║  POST /api/payments/callback      - M-Pesa result callback   ║");
    println!("║  GET  /api/payouts/summary        - Farmer earnings          ║");
    println!("║  POST /api/payouts/request        - Request a withdrawal     ║");
    println!("║  GET  /health                     - Health check             ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = sweeper_handle {
        if let Err(e) = tokio::time::timeout(Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for correlation sweeper shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
