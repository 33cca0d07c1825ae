use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use orbit_gateway::config::Settings;
use orbit_gateway::server::{create_app, AppState};
use orbit_gateway::shutdown::GracefulShutdown;
use orbit_gateway::tasks::{LivenessTask, RecoverySweeper};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Create application state
    let state = AppState::new(settings.clone());
    tracing::info!("Application state initialized");

    // Shutdown signal shared by all background tasks
    let (shutdown_tx, _) = broadcast::channel(1);

    // Start liveness task in background
    let liveness_task = LivenessTask::new(
        settings.heartbeat.clone(),
        state.registry.clone(),
        shutdown_tx.subscribe(),
    );
    let liveness_handle = tokio::spawn(async move {
        liveness_task.run().await;
    });

    // Start recovery sweeper in background
    let sweeper = RecoverySweeper::new(
        settings.sweeper.clone(),
        state.registry.clone(),
        state.store.clone(),
        shutdown_tx.subscribe(),
    );
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run().await;
    });

    // Create Axum app
    let registry = state.registry.clone();
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler())
        .await?;

    // Tear down sessions and stop background tasks
    let shutdown = GracefulShutdown::new(registry, shutdown_tx);
    shutdown.execute("process shutdown").await;

    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(liveness_handle, sweeper_handle);

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
