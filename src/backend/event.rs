// Event taxonomy: the closed set of shape/canvas event kinds, their payload
// shapes, and the storable/ephemeral distinction the rest of the engine
// dispatches on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A point on the canvas, accepted in either nested (`{position: {x, y}}`)
/// or flat (`{x, y}`) form on input and always emitted in nested form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Arbitrary per-shape styling/geometry properties. Kept as a JSON map
/// rather than a fixed struct because the shape-geometry library that owns
/// rendering defines the actual property set per shape type.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// The canonical, currently-writable event kinds. Matching on this enum is
/// exhaustive by design: a new event kind is a deliberate addition here, not
/// an open string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    UserConnected,
    UserDisconnected,
    PointerDown,
    DragStart,
    DragEnd,
    ShapeCreated,
    ShapeEdited,
    ShapeMoved,
    ShapeDeleted,
}

/// Kinds accepted when replaying history written by an older server, but
/// rejected on the write path (`SHAPE_EVENT`). Steers all new writes onto
/// [`EventKind`] while still folding events a previous server version wrote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegacyEventKind {
    ShapeUpdated,
    ShapeResized,
    ShapeRotated,
    ShapeRestored,
    ZIndexChanged,
}

/// Any event kind the store can see on read, storable or legacy-storable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredKind {
    Current(EventKind),
    Legacy(LegacyEventKind),
}

impl StoredKind {
    /// Every `StoredKind` is storable and contributes to the projection;
    /// only kinds reachable through [`EventKind`] may be freshly written.
    pub fn is_storable(&self) -> bool {
        true
    }

    pub fn as_wire_str(&self) -> &'static str {
        match self {
            StoredKind::Current(k) => k.as_wire_str(),
            StoredKind::Legacy(k) => k.as_wire_str(),
        }
    }
}

impl EventKind {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            EventKind::UserConnected => "USER_CONNECTED",
            EventKind::UserDisconnected => "USER_DISCONNECTED",
            EventKind::PointerDown => "POINTER_DOWN",
            EventKind::DragStart => "DRAG_START",
            EventKind::DragEnd => "DRAG_END",
            EventKind::ShapeCreated => "SHAPE_CREATED",
            EventKind::ShapeEdited => "SHAPE_EDITED",
            EventKind::ShapeMoved => "SHAPE_MOVED",
            EventKind::ShapeDeleted => "SHAPE_DELETED",
        }
    }

    /// Whether this kind, once applied, changes the materialised shape
    /// projection. `false` kinds are audit-only (presence, pointer intent).
    pub fn affects_projection(&self) -> bool {
        matches!(
            self,
            EventKind::ShapeCreated
                | EventKind::ShapeEdited
                | EventKind::ShapeMoved
                | EventKind::ShapeDeleted
                | EventKind::DragEnd
        )
    }
}

impl LegacyEventKind {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            LegacyEventKind::ShapeUpdated => "SHAPE_UPDATED",
            LegacyEventKind::ShapeResized => "SHAPE_RESIZED",
            LegacyEventKind::ShapeRotated => "SHAPE_ROTATED",
            LegacyEventKind::ShapeRestored => "SHAPE_RESTORED",
            LegacyEventKind::ZIndexChanged => "Z_INDEX_CHANGED",
        }
    }
}

/// Kinds that are never persisted; they are fanned out to the room and
/// discarded. Carried separately from [`EventKind`] so the type system
/// keeps the two sets from ever being confused at a call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EphemeralKind {
    CursorMove,
}

/// A vector clock carried on an outgoing edit, used by the conflict
/// resolver. Absent on events that don't declare causal context.
pub type WireVectorClock = HashMap<String, u64>;

/// A per-property wall-clock timestamp map, used to break merge ties.
pub type PropertyTimestamps = HashMap<String, i64>;

/// The payload carried by a storable event, after normalising the
/// nested/flat position and property forms described in the design notes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub shape_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_clock: Option<WireVectorClock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_timestamps: Option<PropertyTimestamps>,
}

impl EventPayload {
    pub fn validate(&self, kind: &EventKind) -> Result<(), String> {
        match kind {
            EventKind::ShapeCreated => {
                if self.shape_type.is_none() {
                    return Err("SHAPE_CREATED requires a shape type".to_string());
                }
                if self.properties.is_none() {
                    return Err("SHAPE_CREATED requires properties".to_string());
                }
                Ok(())
            }
            EventKind::ShapeEdited => {
                if self.properties.is_none() {
                    return Err("SHAPE_EDITED requires a properties patch".to_string());
                }
                Ok(())
            }
            EventKind::ShapeMoved => {
                if self.position.is_none() {
                    return Err("SHAPE_MOVED requires a position".to_string());
                }
                Ok(())
            }
            EventKind::DragEnd => {
                if self.start_position.is_none() && self.end_position.is_none() {
                    return Err("DRAG_END requires at least one of start/end position".to_string());
                }
                Ok(())
            }
            EventKind::ShapeDeleted
            | EventKind::PointerDown
            | EventKind::DragStart
            | EventKind::UserConnected
            | EventKind::UserDisconnected => Ok(()),
        }
    }
}

/// A fully-formed storable event, as persisted and as replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: String,
    pub canvas_id: String,
    pub shape_id: Option<String>,
    pub user_id: String,
    pub kind: StoredKind,
    pub payload: EventPayload,
    pub version: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub had_conflict: bool,
}
