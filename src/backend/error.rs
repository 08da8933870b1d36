// Error types shared across the collaboration engine.

use thiserror::Error;

/// Failures from the persistent event store or the room/session layers.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("canvas not found: {0}")]
    CanvasNotFound(String),

    #[error("shape not found: {0}")]
    ShapeNotFound(String),

    #[error("event kind is not storable: {0}")]
    NotStorable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("version conflict on canvas {canvas_id}: expected {expected}, store has {actual}")]
    VersionConflict {
        canvas_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("malformed timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

/// Failures that occur while handling one message on the session protocol.
///
/// A `ProtocolError` never tears down the connection; the handler reports it
/// back to the sender as an `ERROR` envelope and keeps listening.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("{0} requires an active canvas join")]
    NotJoined(&'static str),

    #[error("event kind {0} cannot be submitted as a SHAPE_EVENT")]
    RejectedKind(String),

    #[error(transparent)]
    Store(#[from] CollabError),
}
