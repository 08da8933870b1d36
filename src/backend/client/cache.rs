// Client local cache: the last known server snapshot overlaid with
// whatever local edits haven't been acknowledged yet, so the UI can
// render optimistically without waiting on a round trip.

use std::collections::HashMap;

use serde_json::Value;

use crate::client::durable_queue::PendingEvent;
use crate::conflict::{self, Resolution, ShapeSide};
use crate::event::{EventKind, Position, PropertyTimestamps};
use crate::store::{CanvasState, Shape};
use crate::vector_clock::VectorClock;

/// Snapshot plus an overlay of not-yet-acknowledged local edits. Call
/// [`LocalCache::apply_snapshot`] whenever a `CANVAS_STATE` or
/// `INCREMENTAL_UPDATE` arrives, and [`LocalCache::apply_pending`] with
/// whatever the durable queue currently holds to compute what the UI
/// should actually draw.
#[derive(Debug, Default, Clone)]
pub struct LocalCache {
    shapes: HashMap<String, Shape>,
    version: i64,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Replaces the cache with a freshly fetched canvas state.
    pub fn apply_snapshot(&mut self, state: CanvasState) {
        self.shapes = state.shapes.into_iter().map(|s| (s.id.clone(), s)).collect();
        self.version = state.version;
    }

    /// Applies one already-confirmed shape to the snapshot, bumping the
    /// cache's version if the event is newer. Used for live fan-out
    /// updates delivered outside a full resync.
    ///
    /// The cache tracks no per-shape vector clock of its own, so neither
    /// side is allowed to claim causal dominance here; both are given a
    /// distinct, divergent clock entry so [`conflict::resolve`] always
    /// falls through to the same per-property timestamp merge the server
    /// uses, rather than one side blindly clobbering the other.
    pub fn apply_confirmed(&mut self, mut shape: Option<Shape>, version: i64) {
        if version <= self.version {
            return;
        }
        if let Some(incoming) = &mut shape {
            if let Some(existing) = self.shapes.get(&incoming.id) {
                let mut local_clock = VectorClock::new();
                local_clock.inc("__local__");
                let mut remote_clock = VectorClock::new();
                remote_clock.inc("__remote__");

                let local = ShapeSide {
                    properties: existing.properties.clone(),
                    vector_clock: local_clock,
                    property_timestamps: property_timestamps_at(existing),
                };
                let remote = ShapeSide {
                    properties: incoming.properties.clone(),
                    vector_clock: remote_clock,
                    property_timestamps: property_timestamps_at(incoming),
                };

                if let Resolution::Merge { properties, .. } = conflict::resolve(&local, &remote) {
                    incoming.properties = properties;
                }
            }
        }
        match shape {
            Some(shape) => {
                self.shapes.insert(shape.id.clone(), shape);
            }
            None => {}
        }
        self.version = version;
    }

    pub fn remove_shape(&mut self, shape_id: &str, version: i64) {
        if version <= self.version {
            return;
        }
        self.shapes.remove(shape_id);
        self.version = version;
    }

    /// Computes the effective render state: the confirmed snapshot with
    /// every still-pending local edit folded on top, using the same
    /// projection rules the server applies to the event log.
    pub fn effective_state(&self, pending: &[PendingEvent]) -> Vec<Shape> {
        let mut shapes = self.shapes.clone();
        for event in pending {
            apply_pending(&mut shapes, event);
        }
        let mut out: Vec<Shape> = shapes.into_values().collect();
        out.sort_by_key(|s| s.z_index);
        out
    }
}

/// Stands in for per-property timestamps the cache doesn't track: every
/// property on `shape` is considered last touched at `shape.updated_at`.
fn property_timestamps_at(shape: &Shape) -> PropertyTimestamps {
    let ts = shape.updated_at.timestamp_millis();
    shape.properties.keys().map(|k| (k.clone(), ts)).collect()
}

fn apply_pending(shapes: &mut HashMap<String, Shape>, event: &PendingEvent) {
    let Some(shape_id) = event.shape_id.clone() else {
        return;
    };
    let kind = match parse_kind(&event.event_type) {
        Some(kind) => kind,
        None => return,
    };
    match kind {
        EventKind::ShapeCreated => {
            let Some(shape_type) = event.payload.shape_type.clone() else {
                return;
            };
            let properties = event.payload.properties.clone().unwrap_or_default();
            let z_index = event.payload.z_index.unwrap_or(0);
            shapes
                .entry(shape_id.clone())
                .or_insert_with(|| Shape {
                    id: shape_id,
                    shape_type,
                    properties,
                    z_index,
                    created_at: chrono::Utc::now(),
                    updated_at: chrono::Utc::now(),
                });
        }
        EventKind::ShapeEdited => {
            if let (Some(shape), Some(patch)) = (shapes.get_mut(&shape_id), &event.payload.properties) {
                for (k, v) in patch {
                    shape.properties.insert(k.clone(), v.clone());
                }
            }
        }
        EventKind::ShapeMoved => {
            if let (Some(shape), Some(position)) = (shapes.get_mut(&shape_id), &event.payload.position) {
                patch_position(shape, position);
            }
        }
        EventKind::DragEnd => {
            if let (Some(shape), Some(position)) = (shapes.get_mut(&shape_id), &event.payload.end_position) {
                patch_position(shape, position);
            }
        }
        EventKind::ShapeDeleted => {
            shapes.remove(&shape_id);
        }
        _ => {}
    }
}

fn patch_position(shape: &mut Shape, position: &Position) {
    shape.properties.insert("x".to_string(), Value::from(position.x));
    shape.properties.insert("y".to_string(), Value::from(position.y));
}

fn parse_kind(event_type: &str) -> Option<EventKind> {
    crate::session_protocol::parse_writable_kind(event_type).ok()
}
