//! Chunkload Server - Main entry point

use anyhow::{Context, Result};
use chunkload_common::logging::{init_logging, LogConfig};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

use chunkload_server::{
    api::{self, AppState},
    config::Config,
    db,
    ingest::{ChunkDescriptor, ChunkIngestor, DeliveryPolicy, IngestionCoordinator},
    storage::{ObjectStore, S3ObjectStore, StorageConfig},
    store::{MemoryStateStore, PgStateStore, StateStore},
    warehouse::{PgTableLoader, WarehouseTarget},
};

#[derive(Parser, Debug)]
#[command(name = "chunkload-server")]
#[command(author, version, about = "Loads chunked CSV exports into warehouse tables")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the delivery endpoint
    Serve {
        /// Keep ingest state in process memory instead of PostgreSQL
        #[arg(long)]
        in_memory_state: bool,
    },

    /// Check an object name against the naming convention
    Parse {
        /// Object name, e.g. user__append/2025-01-01_00:00:00__0001_1000.csv
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        log_file_prefix: "chunkload-server".to_string(),
        filter_directives: Some("sqlx=warn,aws_config=warn".to_string()),
        ..LogConfig::default()
    }
    .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    match cli.command {
        Command::Serve { in_memory_state } => serve(in_memory_state).await,
        Command::Parse { name } => parse(&name),
    }
}

fn parse(name: &str) -> Result<()> {
    let chunk = ChunkDescriptor::parse(name).with_context(|| format!("{name:?} is malformed"))?;
    info!(
        table_id = chunk.table_id(),
        write_mode = %chunk.write_mode(),
        export_timestamp = %chunk.export_timestamp(),
        chunk_key = %chunk.chunk_key(),
        rows = chunk.row_count(),
        "Object name is valid"
    );
    Ok(())
}

async fn serve(in_memory_state: bool) -> Result<()> {
    info!("Starting chunkload server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let state_pool = db::create_pool(&config.database, &config.database.url)
        .await
        .context("Failed to connect to the state database")?;

    sqlx::migrate!("../../migrations")
        .run(&state_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    info!("Database migrations completed");

    let warehouse_url = config.warehouse.database_url(&config.database);
    let warehouse_pool = if warehouse_url == config.database.url {
        state_pool.clone()
    } else {
        db::create_pool(&config.database, warehouse_url)
            .await
            .context("Failed to connect to the warehouse")?
    };

    let store: Arc<dyn StateStore> = if in_memory_state {
        info!("Keeping ingest state in memory");
        Arc::new(MemoryStateStore::new())
    } else {
        Arc::new(PgStateStore::new(state_pool.clone()))
    };

    let objects: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(StorageConfig::from_env()?));

    let ingestor = ChunkIngestor::new(
        IngestionCoordinator::new(store)
            .with_max_attempts(config.ingest.max_transaction_attempts),
        objects.clone(),
        Arc::new(PgTableLoader::new(warehouse_pool, objects)),
        WarehouseTarget {
            project_id: config.warehouse.project_id.clone(),
            dataset_id: config.warehouse.dataset_id.clone(),
        },
        DeliveryPolicy::new(Duration::from_secs(config.ingest.max_event_age_secs)),
    );

    let app = api::create_router(AppState::new(ingestor).with_db(state_pool));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Loads in flight finish or are redelivered
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
