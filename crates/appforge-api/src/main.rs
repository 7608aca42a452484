//! AppForge API Server

use appforge_api::{AppState, routes};
use appforge_config::{SystemConfig, load_system_config};
use appforge_db::{create_pool, run_migrations};
use appforge_orchestrator::Reconciler;
use std::path::Path;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("APPFORGE_CONFIG").unwrap_or_else(|_| "appforge.kdl".to_string());
    let config_found = Path::new(&config_path).exists();
    let mut config = if config_found {
        load_system_config(&config_path)?
    } else {
        SystemConfig::default()
    };
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.database.url = url;
    }

    init_tracing(config.server.json_logs);
    if config_found {
        info!(path = %config_path, "Loaded configuration");
    } else {
        warn!(path = %config_path, "Configuration file not found, using defaults");
    }
    if config.image_build.is_none() {
        warn!("No image-build section configured, builds stop after generation");
    }

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, config.database.max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let state = AppState::from_config(&config, pool);

    let reconciler = Reconciler::new(state.orchestrator.clone(), config.reconciler.interval);
    let (stop_reconciler, mut reconciler_stopped) = tokio::sync::watch::channel(false);
    let reconciler_task = tokio::spawn(async move {
        reconciler
            .run_until(async move {
                let _ = reconciler_stopped.changed().await;
            })
            .await;
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.server.listen);
    let listener = TcpListener::bind(&config.server.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_reconciler.send(true);
    reconciler_task.await?;
    info!("Server stopped");

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
