// ============================================================================
// LIB.RS - library exports for the binary and for integration tests
// ============================================================================

pub mod api;
pub mod client;
pub mod collab;
pub mod config;
pub mod conflict;
pub mod error;
pub mod event;
pub mod room;
pub mod session;
pub mod session_protocol;
pub mod store;
pub mod vector_clock;

use axum::routing::{get, Router};
use tower_http::trace::TraceLayer;

use collab::Collab;

/// Builds the full router: the websocket session endpoint at
/// `collab.config.websocket_path`, mounted against the shared [`Collab`]
/// state that every handler reaches through axum's `State` extractor.
pub fn create_app(collab: Collab) -> Router {
    let ws_path = collab.config.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(session::session_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(collab)
}

async fn health_handler(
    axum::extract::State(collab): axum::extract::State<Collab>,
) -> axum::Json<api::HealthReport> {
    axum::Json(api::health(&collab).await)
}
