// ============================================================================
// TEST UTILITIES - Common helpers for integration tests
// ============================================================================

use std::net::SocketAddr;

use axum::serve;
use canvas_collab_backend::collab::Collab;
use canvas_collab_backend::config::Config;
use canvas_collab_backend::create_app;
use tokio::net::TcpListener;

/// Builds a [`Collab`] backed by a fresh in-memory database, so canvases
/// created in one test never leak into another.
pub async fn test_collab() -> Collab {
    Collab::new(Config::default())
        .await
        .expect("in-memory event store should initialise")
}

// Spawn a test server and return its address
pub async fn spawn_test_server(collab: Collab) -> SocketAddr {
    let app = create_app(collab);

    // Find a free port
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to a port");

    let addr = listener.local_addr()
        .expect("Failed to get local address");

    // Start the server in the background
    tokio::spawn(async move {
        serve(listener, app)
            .await
            .expect("Failed to start test server");
    });

    // Give the server a moment to start
    tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;

    addr
}

// Create a test HTTP client
pub fn create_test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("Failed to create HTTP client")
}

// Helper to build test URLs
pub fn test_url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

// Helper to build test WebSocket URLs
pub fn test_ws_url(addr: SocketAddr, path: &str) -> String {
    format!("ws://{}{}", addr, path)
}
