// Persistent event store: the append-only event log, the materialised
// shape projection, and the atomic per-canvas write path.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::conflict::{self, Resolution, ShapeSide};
use crate::error::CollabError;
use crate::event::{EventKind, EventPayload, Properties, PropertyTimestamps, StoredEvent, StoredKind};
use crate::vector_clock::VectorClock;

/// A live (non-deleted) shape as materialised from the event log.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Shape {
    pub id: String,
    pub shape_type: String,
    pub properties: Properties,
    pub z_index: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CanvasState {
    pub shapes: Vec<Shape>,
    pub version: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CanvasMeta {
    pub id: String,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Result of storing one event.
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub event_id: String,
    pub shape_id: Option<String>,
    pub kind: StoredKind,
    pub version: i64,
    pub payload: EventPayload,
    pub stored: bool,
    pub had_conflict: bool,
}

/// A single item handed to [`EventStore::store_batch`].
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub local_event_id: Option<String>,
    pub user_id: String,
    pub kind: EventKind,
    pub shape_id: Option<String>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub stored: Vec<StoreOutcome>,
    pub conflicts: Vec<StoreOutcome>,
}

/// Wraps the `SqlitePool` plus a per-canvas lock used to serialise version
/// allocation + insert + projection + commit. SQLite has no row-level
/// locking, so a `tokio::sync::Mutex` scoped to the canvas id stands in for
/// `SELECT FOR UPDATE`; writes against different canvases never contend.
pub struct EventStore {
    pool: SqlitePool,
    canvas_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EventStore {
    pub async fn connect(database_url: &str) -> Result<Self, CollabError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self {
            pool,
            canvas_locks: Mutex::new(HashMap::new()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            canvas_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn init_schema(&self) -> Result<(), CollabError> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS canvases (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shapes (
                id TEXT PRIMARY KEY,
                canvas_id TEXT NOT NULL,
                type TEXT NOT NULL,
                properties TEXT NOT NULL,
                z_index INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                FOREIGN KEY (canvas_id) REFERENCES canvases (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                canvas_id TEXT NOT NULL,
                shape_id TEXT,
                user_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (canvas_id, version),
                FOREIGN KEY (canvas_id) REFERENCES canvases (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_canvas_version ON events (canvas_id, version)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_shape ON events (shape_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_shapes_canvas ON shapes (canvas_id)")
            .execute(&self.pool)
            .await?;

        // Migration: local_event_id was added after the first release; tolerate
        // re-running init against an older database file.
        let migration_result = sqlx::query("ALTER TABLE events ADD COLUMN local_event_id TEXT")
            .execute(&self.pool)
            .await;
        match migration_result {
            Ok(_) => tracing::info!("migrated events table: added local_event_id"),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("duplicate column") || msg.contains("already exists") {
                    tracing::debug!("events.local_event_id already present");
                } else {
                    tracing::warn!("events migration warning: {}", msg);
                }
            }
        }

        Ok(())
    }

    async fn lock_for(&self, canvas_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.canvas_locks.lock().await;
        locks
            .entry(canvas_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn get_or_create_canvas(&self, id: &str, name: Option<&str>) -> Result<CanvasMeta, CollabError> {
        let now = Utc::now();
        if let Some(existing) = self.get_canvas(id).await? {
            sqlx::query("UPDATE canvases SET updated_at = ? WHERE id = ?")
                .bind(now.to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await?;
            return Ok(CanvasMeta {
                updated_at: now,
                ..existing
            });
        }

        let name = name.unwrap_or("untitled").to_string();
        sqlx::query("INSERT INTO canvases (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(&name)
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(CanvasMeta {
            id: id.to_string(),
            name,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_canvas(&self, id: &str) -> Result<Option<CanvasMeta>, CollabError> {
        let row = sqlx::query("SELECT * FROM canvases WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(CanvasMeta {
            id: row.get("id"),
            name: row.get("name"),
            created_at: parse_ts(row.get("created_at"))?,
            updated_at: parse_ts(row.get("updated_at"))?,
        }))
    }

    /// Stores one event inside its own transaction, guarded by the
    /// canvas-scoped lock so version allocation is atomic with the insert.
    pub async fn store_event(
        &self,
        canvas_id: &str,
        user_id: &str,
        kind: EventKind,
        shape_id: Option<String>,
        payload: EventPayload,
        local_event_id: Option<&str>,
    ) -> Result<StoreOutcome, CollabError> {
        let lock = self.lock_for(canvas_id).await;
        let _guard = lock.lock().await;
        self.store_event_locked(canvas_id, user_id, kind, shape_id, payload, local_event_id)
            .await
    }

    async fn store_event_locked(
        &self,
        canvas_id: &str,
        user_id: &str,
        kind: EventKind,
        shape_id: Option<String>,
        mut payload: EventPayload,
        local_event_id: Option<&str>,
    ) -> Result<StoreOutcome, CollabError> {
        if let Some(local_id) = local_event_id {
            if let Some(existing) = self.find_by_local_id(canvas_id, local_id).await? {
                return Ok(StoreOutcome {
                    event_id: existing.id,
                    shape_id: existing.shape_id,
                    kind: existing.kind,
                    version: existing.version,
                    payload: existing.payload,
                    stored: false,
                    had_conflict: existing.had_conflict,
                });
            }
        }

        let mut tx = self.pool.begin().await?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE canvas_id = ?")
                .bind(canvas_id)
                .fetch_one(&mut *tx)
                .await?;
        let next_version = current_version.unwrap_or(0) + 1;

        let mut had_conflict = false;
        if kind.affects_projection() {
            if let Some(ref shape_id) = shape_id {
                had_conflict = self
                    .apply_conflict_resolution(&mut tx, canvas_id, shape_id, user_id, &kind, &mut payload)
                    .await?;
            }
        }

        let event_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let payload_json = serde_json::to_string(&payload)?;

        sqlx::query(
            "INSERT INTO events (id, canvas_id, shape_id, user_id, event_type, payload, version, created_at, local_event_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event_id)
        .bind(canvas_id)
        .bind(&shape_id)
        .bind(user_id)
        .bind(kind.as_wire_str())
        .bind(&payload_json)
        .bind(next_version)
        .bind(now.to_rfc3339())
        .bind(local_event_id)
        .execute(&mut *tx)
        .await?;

        if kind.affects_projection() {
            self.apply_projection(&mut tx, canvas_id, shape_id.as_deref(), &kind, &payload, now)
                .await?;
        }

        sqlx::query("UPDATE canvases SET updated_at = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(canvas_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(StoreOutcome {
            event_id,
            shape_id,
            kind: StoredKind::Current(kind),
            version: next_version,
            payload,
            stored: true,
            had_conflict,
        })
    }

    /// Applies the server-side conflict check ahead of writing a shape
    /// event. Uses the payload's vector clock when the caller supplied
    /// one; otherwise falls back to the recency heuristic.
    async fn apply_conflict_resolution(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        canvas_id: &str,
        shape_id: &str,
        user_id: &str,
        kind: &EventKind,
        payload: &mut EventPayload,
    ) -> Result<bool, CollabError> {
        if !matches!(kind, EventKind::ShapeEdited) {
            return Ok(false);
        }
        let Some(incoming_props) = payload.properties.clone() else {
            return Ok(false);
        };

        let row = sqlx::query("SELECT properties, updated_at FROM shapes WHERE id = ? AND canvas_id = ?")
            .bind(shape_id)
            .bind(canvas_id)
            .fetch_optional(&mut **tx)
            .await?;
        let Some(row) = row else { return Ok(false) };

        let existing_props: Properties = serde_json::from_str(row.get::<String, _>("properties").as_str())?;
        let updated_at = parse_ts(row.get("updated_at"))?;
        let now = Utc::now();

        let has_vector_clock = payload.vector_clock.is_some();
        let conflict_possible = if has_vector_clock {
            true
        } else {
            conflict::within_conflict_window(updated_at.timestamp_millis(), now.timestamp_millis())
        };
        if !conflict_possible {
            return Ok(false);
        }

        let remote_timestamps = payload.property_timestamps.clone().unwrap_or_default();

        if !has_vector_clock {
            // No causal context to compare, so don't invent one: a clock
            // synthesized on our side would trivially dominate the remote's
            // empty clock and make every such edit look causally stale.
            // Merge by per-property recency instead, same as a genuinely
            // concurrent edit would resolve.
            let local = ShapeSide {
                properties: existing_props,
                vector_clock: VectorClock::new(),
                property_timestamps: PropertyTimestamps::new(),
            };
            let remote = ShapeSide {
                properties: incoming_props,
                vector_clock: VectorClock::new(),
                property_timestamps: remote_timestamps,
            };
            let (properties, property_timestamps) = conflict::merge_by_property_timestamp(&local, &remote);
            payload.properties = Some(properties);
            payload.property_timestamps = Some(property_timestamps);
            return Ok(true);
        }

        let remote_clock = payload
            .vector_clock
            .clone()
            .map(VectorClock::from_entries)
            .unwrap_or_default();
        let mut local_clock = VectorClock::new();
        local_clock.inc("__server__");

        let local = ShapeSide {
            properties: existing_props,
            vector_clock: local_clock.clone(),
            property_timestamps: PropertyTimestamps::new(),
        };
        let remote = ShapeSide {
            properties: incoming_props,
            vector_clock: remote_clock.clone(),
            property_timestamps: remote_timestamps,
        };

        match conflict::resolve(&local, &remote) {
            Resolution::KeepLocal => {
                payload.properties = Some(local.properties);
                Ok(true)
            }
            Resolution::ApplyRemote => Ok(false),
            Resolution::Merge {
                properties,
                property_timestamps,
            } => {
                payload.properties = Some(properties);
                payload.property_timestamps = Some(property_timestamps);
                payload.vector_clock = Some(local_clock.merged(&remote_clock).into_entries());
                Ok(true)
            }
        }
    }

    async fn apply_projection(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        canvas_id: &str,
        shape_id: Option<&str>,
        kind: &EventKind,
        payload: &EventPayload,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), CollabError> {
        let Some(shape_id) = shape_id else { return Ok(()) };

        match kind {
            EventKind::ShapeCreated => {
                let shape_type = payload.shape_type.clone().unwrap_or_default();
                let properties = serde_json::to_string(&payload.properties.clone().unwrap_or_default())?;
                let z_index = payload.z_index.unwrap_or(0);
                sqlx::query(
                    "INSERT INTO shapes (id, canvas_id, type, properties, z_index, created_at, updated_at, deleted_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, NULL) \
                     ON CONFLICT(id) DO UPDATE SET type=excluded.type, properties=excluded.properties, \
                     z_index=excluded.z_index, updated_at=excluded.updated_at, deleted_at=NULL",
                )
                .bind(shape_id)
                .bind(canvas_id)
                .bind(&shape_type)
                .bind(&properties)
                .bind(z_index)
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .execute(&mut **tx)
                .await?;
            }
            EventKind::ShapeEdited => {
                if let Some(patch) = &payload.properties {
                    self.merge_properties(tx, canvas_id, shape_id, patch, now).await?;
                }
            }
            EventKind::ShapeMoved => {
                if let Some(pos) = payload.position {
                    let mut patch = Properties::new();
                    patch.insert("x".to_string(), Value::from(pos.x));
                    patch.insert("y".to_string(), Value::from(pos.y));
                    self.merge_properties(tx, canvas_id, shape_id, &patch, now).await?;
                }
            }
            EventKind::DragEnd => {
                if let Some(pos) = payload.end_position {
                    let mut patch = Properties::new();
                    patch.insert("x".to_string(), Value::from(pos.x));
                    patch.insert("y".to_string(), Value::from(pos.y));
                    self.merge_properties(tx, canvas_id, shape_id, &patch, now).await?;
                }
            }
            EventKind::ShapeDeleted => {
                sqlx::query("UPDATE shapes SET deleted_at = ?, updated_at = ? WHERE id = ? AND canvas_id = ?")
                    .bind(now.to_rfc3339())
                    .bind(now.to_rfc3339())
                    .bind(shape_id)
                    .bind(canvas_id)
                    .execute(&mut **tx)
                    .await?;
            }
            EventKind::PointerDown
            | EventKind::DragStart
            | EventKind::UserConnected
            | EventKind::UserDisconnected => {}
        }
        Ok(())
    }

    async fn merge_properties(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        canvas_id: &str,
        shape_id: &str,
        patch: &Properties,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), CollabError> {
        let row = sqlx::query("SELECT properties FROM shapes WHERE id = ? AND canvas_id = ?")
            .bind(shape_id)
            .bind(canvas_id)
            .fetch_optional(&mut **tx)
            .await?;
        let Some(row) = row else {
            tracing::warn!("edit for unknown shape {} on canvas {}", shape_id, canvas_id);
            return Ok(());
        };
        let mut properties: Properties = serde_json::from_str(row.get::<String, _>("properties").as_str())?;
        for (k, v) in patch {
            properties.insert(k.clone(), v.clone());
        }
        let properties_json = serde_json::to_string(&properties)?;
        sqlx::query("UPDATE shapes SET properties = ?, updated_at = ? WHERE id = ? AND canvas_id = ?")
            .bind(&properties_json)
            .bind(now.to_rfc3339())
            .bind(shape_id)
            .bind(canvas_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn find_by_local_id(&self, canvas_id: &str, local_event_id: &str) -> Result<Option<StoredEvent>, CollabError> {
        let row = sqlx::query("SELECT * FROM events WHERE canvas_id = ? AND local_event_id = ?")
            .bind(canvas_id)
            .bind(local_event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_event).transpose()
    }

    /// Stores a batch of events in one transaction, running the per-event
    /// conflict check against the state as it stands mid-batch.
    pub async fn store_batch(&self, canvas_id: &str, items: Vec<BatchItem>) -> Result<BatchResult, CollabError> {
        let lock = self.lock_for(canvas_id).await;
        let _guard = lock.lock().await;

        let mut stored = Vec::new();
        let mut conflicts = Vec::new();
        for item in items {
            let outcome = self
                .store_event_locked(
                    canvas_id,
                    &item.user_id,
                    item.kind,
                    item.shape_id,
                    item.payload,
                    item.local_event_id.as_deref(),
                )
                .await?;
            if outcome.had_conflict {
                conflicts.push(outcome.clone());
            }
            stored.push(outcome);
        }
        Ok(BatchResult { stored, conflicts })
    }

    pub async fn get_canvas_state(&self, canvas_id: &str) -> Result<CanvasState, CollabError> {
        let rows = sqlx::query(
            "SELECT * FROM shapes WHERE canvas_id = ? AND deleted_at IS NULL ORDER BY z_index ASC",
        )
        .bind(canvas_id)
        .fetch_all(&self.pool)
        .await?;

        let mut shapes = Vec::with_capacity(rows.len());
        for row in rows {
            shapes.push(row_to_shape(row)?);
        }

        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM events WHERE canvas_id = ?")
            .bind(canvas_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(CanvasState {
            shapes,
            version: version.unwrap_or(0),
        })
    }

    pub async fn events_since(&self, canvas_id: &str, since_version: i64) -> Result<Vec<StoredEvent>, CollabError> {
        let rows = sqlx::query(
            "SELECT * FROM events WHERE canvas_id = ? AND version > ? ORDER BY version ASC",
        )
        .bind(canvas_id)
        .bind(since_version)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_event).collect()
    }
}

fn parse_ts(raw: String) -> Result<chrono::DateTime<Utc>, CollabError> {
    Ok(chrono::DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))
}

fn row_to_shape(row: sqlx::sqlite::SqliteRow) -> Result<Shape, CollabError> {
    let properties: Properties = serde_json::from_str(row.get::<String, _>("properties").as_str())?;
    Ok(Shape {
        id: row.get("id"),
        shape_type: row.get("type"),
        properties,
        z_index: row.get("z_index"),
        created_at: parse_ts(row.get("created_at"))?,
        updated_at: parse_ts(row.get("updated_at"))?,
    })
}

fn row_to_event(row: sqlx::sqlite::SqliteRow) -> Result<StoredEvent, CollabError> {
    let payload: EventPayload = serde_json::from_str(row.get::<String, _>("payload").as_str())?;
    let kind_str: String = row.get("event_type");
    let kind = parse_stored_kind(&kind_str)?;
    Ok(StoredEvent {
        id: row.get("id"),
        canvas_id: row.get("canvas_id"),
        shape_id: row.get("shape_id"),
        user_id: row.get("user_id"),
        kind,
        payload,
        version: row.get("version"),
        created_at: parse_ts(row.get("created_at"))?,
        had_conflict: false,
    })
}

fn parse_stored_kind(raw: &str) -> Result<StoredKind, CollabError> {
    use crate::event::LegacyEventKind::*;
    use crate::event::EventKind::*;
    Ok(match raw {
        "USER_CONNECTED" => StoredKind::Current(UserConnected),
        "USER_DISCONNECTED" => StoredKind::Current(UserDisconnected),
        "POINTER_DOWN" => StoredKind::Current(PointerDown),
        "DRAG_START" => StoredKind::Current(DragStart),
        "DRAG_END" => StoredKind::Current(DragEnd),
        "SHAPE_CREATED" => StoredKind::Current(ShapeCreated),
        "SHAPE_EDITED" => StoredKind::Current(ShapeEdited),
        "SHAPE_MOVED" => StoredKind::Current(ShapeMoved),
        "SHAPE_DELETED" => StoredKind::Current(ShapeDeleted),
        "SHAPE_UPDATED" => StoredKind::Legacy(ShapeUpdated),
        "SHAPE_RESIZED" => StoredKind::Legacy(ShapeResized),
        "SHAPE_ROTATED" => StoredKind::Legacy(ShapeRotated),
        "SHAPE_RESTORED" => StoredKind::Legacy(ShapeRestored),
        "Z_INDEX_CHANGED" => StoredKind::Legacy(ZIndexChanged),
        other => return Err(CollabError::NotStorable(other.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Position;

    async fn test_store() -> EventStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = EventStore::from_pool(pool);
        store.init_schema().await.unwrap();
        store
    }

    fn shape_created_payload() -> EventPayload {
        let mut props = Properties::new();
        props.insert("x".into(), Value::from(10));
        props.insert("y".into(), Value::from(20));
        EventPayload {
            shape_type: Some("rectangle".to_string()),
            properties: Some(props),
            z_index: Some(0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_then_snapshot_scenario() {
        let store = test_store().await;
        store.get_or_create_canvas("c1", Some("demo")).await.unwrap();

        let outcome = store
            .store_event(
                "c1",
                "alice",
                EventKind::ShapeCreated,
                Some("s1".to_string()),
                shape_created_payload(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.version, 1);
        assert!(outcome.stored);

        let state = store.get_canvas_state("c1").await.unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(state.shapes.len(), 1);
        assert_eq!(state.shapes[0].id, "s1");
    }

    #[tokio::test]
    async fn version_is_monotone_per_canvas() {
        let store = test_store().await;
        store.get_or_create_canvas("c1", None).await.unwrap();

        for i in 0..3 {
            let outcome = store
                .store_event(
                    "c1",
                    "alice",
                    EventKind::ShapeCreated,
                    Some(format!("s{}", i)),
                    shape_created_payload(),
                    None,
                )
                .await
                .unwrap();
            assert_eq!(outcome.version, i as i64 + 1);
        }
    }

    #[tokio::test]
    async fn delete_is_a_tombstone_not_an_erasure() {
        let store = test_store().await;
        store.get_or_create_canvas("c1", None).await.unwrap();
        store
            .store_event("c1", "alice", EventKind::ShapeCreated, Some("s1".to_string()), shape_created_payload(), None)
            .await
            .unwrap();
        store
            .store_event(
                "c1",
                "alice",
                EventKind::ShapeDeleted,
                Some("s1".to_string()),
                EventPayload::default(),
                None,
            )
            .await
            .unwrap();

        let state = store.get_canvas_state("c1").await.unwrap();
        assert!(state.shapes.is_empty());

        let history = store.events_since("c1", 0).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn idempotent_replay_by_local_event_id() {
        let store = test_store().await;
        store.get_or_create_canvas("c1", None).await.unwrap();

        let first = store
            .store_event(
                "c1",
                "alice",
                EventKind::ShapeCreated,
                Some("s1".to_string()),
                shape_created_payload(),
                Some("local-1"),
            )
            .await
            .unwrap();
        let second = store
            .store_event(
                "c1",
                "alice",
                EventKind::ShapeCreated,
                Some("s1".to_string()),
                shape_created_payload(),
                Some("local-1"),
            )
            .await
            .unwrap();

        assert_eq!(first.event_id, second.event_id);
        assert!(!second.stored);

        let history = store.events_since("c1", 0).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn shape_moved_patches_position_only() {
        let store = test_store().await;
        store.get_or_create_canvas("c1", None).await.unwrap();
        store
            .store_event("c1", "alice", EventKind::ShapeCreated, Some("s1".to_string()), shape_created_payload(), None)
            .await
            .unwrap();
        store
            .store_event(
                "c1",
                "alice",
                EventKind::ShapeMoved,
                Some("s1".to_string()),
                EventPayload {
                    position: Some(Position { x: 100.0, y: 200.0 }),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        let state = store.get_canvas_state("c1").await.unwrap();
        let shape = &state.shapes[0];
        assert_eq!(shape.properties.get("x").unwrap(), &Value::from(100.0));
        assert_eq!(shape.properties.get("y").unwrap(), &Value::from(200.0));
    }

    #[tokio::test]
    async fn events_since_is_strictly_ascending_and_exclusive() {
        let store = test_store().await;
        store.get_or_create_canvas("c1", None).await.unwrap();
        for i in 0..3 {
            store
                .store_event(
                    "c1",
                    "alice",
                    EventKind::ShapeCreated,
                    Some(format!("s{}", i)),
                    shape_created_payload(),
                    None,
                )
                .await
                .unwrap();
        }
        let tail = store.events_since("c1", 1).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert!(tail.windows(2).all(|w| w[0].version < w[1].version));
    }
}
