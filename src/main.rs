use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use content_queue::config::Config;
use content_queue::db::PgStore;
use content_queue::pipeline::http::HttpServices;
use content_queue::pipeline::services::Collaborators;
use content_queue::worker::{self, PoolSettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("Starting content queue");

    let pool = PgPoolOptions::new()
        .max_connections((config.worker_count * config.concurrency + 4) as u32)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Migrations applied");

    let http = Arc::new(HttpServices::new(
        &config.service.url,
        config.service.token.clone(),
        config.phase_timeout,
    )?);
    let services = Collaborators {
        generation: http.clone(),
        assets: http.clone(),
        publishing: http.clone(),
        configurations: http,
    };

    let state = content_queue::build_state(
        Arc::new(PgStore::new(pool.clone())),
        services,
        config.settings(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool_handle = worker::run_pool(
        state.orchestrator.clone(),
        shutdown_rx,
        PoolSettings {
            worker_count: config.worker_count,
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
        },
    )?;

    let addr = SocketAddr::new(config.host, config.port);
    let app = content_queue::build_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Workers finish their current batch before exiting.
    let _ = shutdown_tx.send(true);
    tokio::task::spawn_blocking(move || pool_handle.join())
        .await?
        .map_err(|_| "worker pool panicked")?;

    pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

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

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
