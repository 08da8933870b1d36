// ============================================================================
// FIXTURES - Shared builders for unit and integration tests
// ============================================================================

use canvas_collab_backend::event::{EventPayload, Position};

pub fn shape_created_payload(shape_type: &str, x: f64, y: f64) -> EventPayload {
    let mut properties = serde_json::Map::new();
    properties.insert("x".to_string(), serde_json::json!(x));
    properties.insert("y".to_string(), serde_json::json!(y));
    EventPayload {
        shape_type: Some(shape_type.to_string()),
        properties: Some(properties),
        ..Default::default()
    }
}

pub fn shape_moved_payload(x: f64, y: f64) -> EventPayload {
    EventPayload {
        position: Some(Position { x, y }),
        ..Default::default()
    }
}

pub fn shape_edited_payload(key: &str, value: serde_json::Value) -> EventPayload {
    let mut properties = serde_json::Map::new();
    properties.insert(key.to_string(), value);
    EventPayload {
        properties: Some(properties),
        ..Default::default()
    }
}
