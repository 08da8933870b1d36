// Wire messages for the session protocol: the JSON envelopes exchanged
// over one client<->server duplex channel.

use serde::{Deserialize, Serialize};

use crate::event::{EphemeralKind, EventKind, EventPayload};
use crate::room::RoomUser;
use crate::store::{CanvasState, Shape, StoreOutcome};

/// Inbound messages, tagged on `type` the same way the device protocol
/// this engine grew out of tags its own envelopes.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "JOIN_CANVAS")]
    JoinCanvas {
        #[serde(rename = "canvasId")]
        canvas_id: String,
        username: Option<String>,
    },
    #[serde(rename = "LEAVE_CANVAS")]
    LeaveCanvas,
    #[serde(rename = "SHAPE_EVENT")]
    ShapeEvent {
        #[serde(rename = "localEventId")]
        local_event_id: Option<String>,
        #[serde(rename = "eventType")]
        event_type: String,
        #[serde(rename = "shapeId")]
        shape_id: Option<String>,
        payload: EventPayload,
    },
    #[serde(rename = "BATCH_SYNC")]
    BatchSync {
        events: Vec<BatchSyncEvent>,
        #[serde(rename = "lastKnownVersion")]
        last_known_version: i64,
    },
    #[serde(rename = "GET_STATE")]
    GetState {
        #[serde(rename = "sinceVersion")]
        since_version: Option<i64>,
    },
    #[serde(rename = "CURSOR_MOVE")]
    CursorMove { x: f64, y: f64 },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchSyncEvent {
    #[serde(rename = "localEventId")]
    pub local_event_id: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "shapeId")]
    pub shape_id: Option<String>,
    pub payload: EventPayload,
    pub timestamp: i64,
}

/// Outbound messages. `Clone` because the same instance is fanned out to
/// every member of a room's broadcast list.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "JOIN_SUCCESS")]
    JoinSuccess {
        #[serde(rename = "canvasId")]
        canvas_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        username: Option<String>,
    },
    #[serde(rename = "JOIN_ERROR")]
    JoinError {
        #[serde(rename = "canvasId")]
        canvas_id: String,
        error: String,
    },
    #[serde(rename = "CANVAS_STATE")]
    CanvasState {
        shapes: Vec<Shape>,
        version: i64,
        users: Vec<RoomUser>,
    },
    #[serde(rename = "INCREMENTAL_UPDATE")]
    IncrementalUpdate {
        events: Vec<crate::event::StoredEvent>,
    },
    #[serde(rename = "USER_JOINED")]
    UserJoined {
        #[serde(rename = "userId")]
        user_id: String,
        username: Option<String>,
    },
    #[serde(rename = "USER_LEFT")]
    UserLeft {
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename = "EVENT_ACK")]
    EventAck {
        #[serde(rename = "localEventId")]
        local_event_id: Option<String>,
        #[serde(rename = "eventId")]
        event_id: String,
        version: i64,
        stored: bool,
        #[serde(rename = "hadConflict")]
        had_conflict: bool,
    },
    #[serde(rename = "SHAPE_EVENT")]
    ShapeEvent {
        #[serde(rename = "eventType")]
        event_type: String,
        #[serde(rename = "shapeId")]
        shape_id: Option<String>,
        payload: EventPayload,
        version: i64,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "hadConflict")]
        had_conflict: bool,
    },
    #[serde(rename = "BATCH_SYNC_RESULT")]
    BatchSyncResult {
        success: bool,
        #[serde(rename = "storedEvents")]
        stored_events: Vec<crate::event::StoredEvent>,
        #[serde(rename = "missedEvents")]
        missed_events: Vec<crate::event::StoredEvent>,
        #[serde(rename = "currentState")]
        current_state: CanvasState,
        conflicts: Vec<crate::event::StoredEvent>,
        message: Option<String>,
    },
    #[serde(rename = "CURSOR_MOVE")]
    CursorMove {
        #[serde(rename = "userId")]
        user_id: String,
        username: Option<String>,
        x: f64,
        y: f64,
    },
    #[serde(rename = "ERROR")]
    Error { error: String },
    #[serde(rename = "PING")]
    Ping,
}

impl ServerMessage {
    pub fn ack(local_event_id: Option<String>, outcome: &StoreOutcome) -> Self {
        ServerMessage::EventAck {
            local_event_id,
            event_id: outcome.event_id.clone(),
            version: outcome.version,
            stored: outcome.stored,
            had_conflict: outcome.had_conflict,
        }
    }
}

/// Parses the `eventType` string of an inbound `SHAPE_EVENT`, rejecting
/// anything that is not in the writable [`EventKind`] set — ephemeral
/// kinds travel only over their own dedicated message type.
pub fn parse_writable_kind(event_type: &str) -> Result<EventKind, String> {
    use EventKind::*;
    Ok(match event_type {
        "USER_CONNECTED" => UserConnected,
        "USER_DISCONNECTED" => UserDisconnected,
        "POINTER_DOWN" => PointerDown,
        "DRAG_START" => DragStart,
        "DRAG_END" => DragEnd,
        "SHAPE_CREATED" => ShapeCreated,
        "SHAPE_EDITED" => ShapeEdited,
        "SHAPE_MOVED" => ShapeMoved,
        "SHAPE_DELETED" => ShapeDeleted,
        other if is_ephemeral(other) => return Err(format!("{} is ephemeral, use CURSOR_MOVE", other)),
        other => return Err(format!("unknown or legacy event kind: {}", other)),
    })
}

fn is_ephemeral(raw: &str) -> bool {
    matches!(
        serde_json::from_value::<EphemeralKind>(serde_json::json!(raw)),
        Ok(_)
    )
}
