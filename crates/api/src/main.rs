use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use journal_db::memory::{InMemoryArtifactStore, InMemoryCreditStore, InMemoryJobStore};
use journal_db::repositories::{
    ArtifactStore, CreditStore, JobStore, PgArtifactStore, PgCreditStore, PgJobStore,
};
use journal_db::DbPool;
use journal_pipeline::engine::JobEngine;
use journal_pipeline::executor::create_executor;
use journal_pipeline::subscribers::SubscriberRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use journal_api::config::ServerConfig;
use journal_api::router::build_app_router;
use journal_api::state::AppState;
use journal_api::ws;

struct Stores {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    credits: Arc<dyn CreditStore>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "journal_api=debug,journal_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Storage ---
    let (pool, stores) = match config.database_url.as_deref() {
        Some(url) => {
            let pool = connect_database(url).await;
            let stores = Stores {
                jobs: Arc::new(PgJobStore::new(pool.clone())),
                artifacts: Arc::new(PgArtifactStore::new(pool.clone())),
                credits: Arc::new(PgCreditStore::new(pool.clone())),
            };
            (Some(pool), stores)
        }
        None => {
            tracing::warn!(
                initial_credits = config.jobs.dev_initial_credits,
                "DATABASE_URL not set, using in-memory stores",
            );
            let stores = Stores {
                jobs: Arc::new(InMemoryJobStore::new()),
                artifacts: Arc::new(InMemoryArtifactStore::new()),
                credits: Arc::new(InMemoryCreditStore::with_default_balance(
                    config.jobs.dev_initial_credits,
                )),
            };
            (None, stores)
        }
    };

    // --- Job engine ---
    let executor =
        create_executor(&config.jobs.executor_config()).expect("Failed to create stage executor");
    tracing::info!(executor = executor.name(), "Stage executor ready");

    let subscribers = Arc::new(SubscriberRegistry::new());
    let engine = Arc::new(JobEngine::new(
        stores.jobs,
        stores.artifacts,
        stores.credits,
        executor,
        Arc::clone(&subscribers),
        config.jobs.engine_config(),
    ));

    let recovered = engine
        .recover_interrupted()
        .await
        .expect("Failed to recover interrupted jobs");
    tracing::info!(recovered, "Interrupted job recovery finished");

    // --- Heartbeat ---
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&subscribers));

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        engine: Arc::clone(&engine),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, draining jobs");

    let drained = engine
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    if drained {
        tracing::info!("All running jobs finished");
    }

    heartbeat_handle.abort();
    tracing::info!("Heartbeat task stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Connect, verify and migrate the database. Any failure aborts startup.
async fn connect_database(url: &str) -> DbPool {
    let pool = journal_db::create_pool(url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    journal_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    journal_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    pool
}

/// Wait for SIGINT or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
