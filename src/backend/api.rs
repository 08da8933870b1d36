// Thin read/write functions backing the HTTP companion surface. These are
// plain async functions rather than a wired-up router: the websocket
// session is the primary interface, and HTTP exists only for snapshot
// reads and REST-style writes that don't need a live connection.

use serde::{Deserialize, Serialize};

use crate::collab::Collab;
use crate::error::CollabError;
use crate::event::{EventPayload, StoredEvent};
use crate::store::{BatchItem, CanvasMeta, CanvasState, StoreOutcome};

#[derive(Debug, Deserialize)]
pub struct CreateCanvasRequest {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub user_id: String,
    pub events: Vec<SyncRequestEvent>,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequestEvent {
    pub local_event_id: Option<String>,
    pub event_type: String,
    pub shape_id: Option<String>,
    pub payload: EventPayload,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub stored: Vec<StoreOutcome>,
    pub conflicts: Vec<StoreOutcome>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub open_rooms: usize,
}

pub async fn create_canvas(collab: &Collab, req: CreateCanvasRequest) -> Result<CanvasMeta, CollabError> {
    collab.store.get_or_create_canvas(&req.id, req.name.as_deref()).await
}

pub async fn get_canvas(collab: &Collab, canvas_id: &str) -> Result<CanvasMeta, CollabError> {
    collab
        .store
        .get_canvas(canvas_id)
        .await?
        .ok_or_else(|| CollabError::CanvasNotFound(canvas_id.to_string()))
}

pub async fn get_canvas_state(collab: &Collab, canvas_id: &str) -> Result<CanvasState, CollabError> {
    collab.store.get_canvas_state(canvas_id).await
}

pub async fn get_events_since(
    collab: &Collab,
    canvas_id: &str,
    since_version: i64,
) -> Result<Vec<StoredEvent>, CollabError> {
    collab.store.events_since(canvas_id, since_version).await
}

/// Applies a batch of events submitted out-of-band from any live
/// websocket session — the REST equivalent of `BATCH_SYNC`, used by
/// clients that reconnect through HTTP before re-establishing a socket.
pub async fn sync_canvas(
    collab: &Collab,
    canvas_id: &str,
    req: SyncRequest,
) -> Result<SyncResponse, CollabError> {
    let kinds: Result<Vec<_>, _> = req
        .events
        .into_iter()
        .map(|event| {
            crate::session_protocol::parse_writable_kind(&event.event_type)
                .map(|kind| BatchItem {
                    local_event_id: event.local_event_id,
                    user_id: req.user_id.clone(),
                    kind,
                    shape_id: event.shape_id,
                    payload: event.payload,
                })
                .map_err(CollabError::NotStorable)
        })
        .collect();

    let items = kinds?;
    let result = collab.store.store_batch(canvas_id, items).await?;
    Ok(SyncResponse {
        stored: result.stored,
        conflicts: result.conflicts,
    })
}

pub async fn health(collab: &Collab) -> HealthReport {
    HealthReport {
        status: "ok",
        open_rooms: collab.rooms.room_count().await,
    }
}
