// ============================================================================
// IMPORTS
// ============================================================================

use std::sync::Arc;

use canvas_collab_backend::collab::Collab;
use canvas_collab_backend::config::Config;
use canvas_collab_backend::session::start_heartbeat_task;
use canvas_collab_backend::create_app;

// ============================================================================
// MAIN FUNCTION - Entry point of the collaboration backend
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .init();

    tracing::info!("Starting collaborative canvas backend");

    let config = Config::from_env();

    tracing::info!("Connecting to event store at {}", config.database_url);
    let collab = match Collab::new(config.clone()).await {
        Ok(collab) => Arc::new(collab),
        Err(e) => {
            tracing::error!("Failed to initialize event store: {:?}", e);
            panic!("event store initialization failed");
        }
    };

    tracing::info!("Starting heartbeat task (interval {:?})", config.heartbeat_interval);
    let heartbeat_collab = collab.clone();
    tokio::spawn(async move {
        start_heartbeat_task(heartbeat_collab).await;
    });

    let app = create_app((*collab).clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap();

    tracing::info!("Server running on {}", config.bind_addr);
    tracing::info!("Available endpoints:");
    tracing::info!("   - GET  {}     - Canvas collaboration WebSocket", config.websocket_path);
    tracing::info!("   - GET  /health - Liveness/room-count report");
    tracing::info!("Debug tip: set RUST_LOG=debug for detailed logging");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .await
        .unwrap();
}
