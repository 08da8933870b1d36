// Durable storage for pending client events: survives process restarts so
// an offline edit is never lost between enqueue and successful sync.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::event::EventPayload;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEvent {
    pub local_event_id: String,
    pub canvas_id: String,
    pub event_type: String,
    pub shape_id: Option<String>,
    pub payload: EventPayload,
    pub user_id: String,
    pub timestamp: i64,
}

/// Durable storage for pending events, keyed by `localEventId`. A real
/// client backs this with its platform's local storage; tests and the
/// in-process demo back it with an in-memory map.
pub trait DurableQueue: Send + Sync {
    fn enqueue(&self, event: PendingEvent);
    fn pending_for(&self, canvas_id: &str) -> Vec<PendingEvent>;
    fn clear(&self, canvas_id: &str, local_event_ids: &[String]);
}

#[derive(Default)]
pub struct InMemoryDurableQueue {
    events: Mutex<HashMap<String, PendingEvent>>,
}

impl InMemoryDurableQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableQueue for InMemoryDurableQueue {
    fn enqueue(&self, event: PendingEvent) {
        self.events.lock().unwrap().insert(event.local_event_id.clone(), event);
    }

    fn pending_for(&self, canvas_id: &str) -> Vec<PendingEvent> {
        let mut events: Vec<_> = self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.canvas_id == canvas_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        events
    }

    fn clear(&self, canvas_id: &str, local_event_ids: &[String]) {
        let mut events = self.events.lock().unwrap();
        for id in local_event_ids {
            if let Some(e) = events.get(id) {
                if e.canvas_id == canvas_id {
                    events.remove(id);
                }
            }
        }
    }
}

/// Append-only JSON-lines queue backed by a file. Enqueues append a line;
/// clearing rewrites the file with the surviving lines. Synchronous file
/// access keeps the implementation simple since the queue is touched only
/// at throttled edit points, never on a hot path.
pub struct FileDurableQueue {
    path: std::path::PathBuf,
    lock: Mutex<()>,
}

impl FileDurableQueue {
    pub fn open(path: impl Into<std::path::PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        OpenOptions::new().append(true).create(true).open(&path)?;
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    fn read_all(&self) -> Vec<PendingEvent> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };
        BufReader::new(file)
            .lines()
            .filter_map(|line| line.ok())
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect()
    }

    fn write_all(&self, events: &[PendingEvent]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&self.path)?;
        for event in events {
            let line = serde_json::to_string(event)?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }
}

impl DurableQueue for FileDurableQueue {
    fn enqueue(&self, event: PendingEvent) {
        let _guard = self.lock.lock().unwrap();
        let mut file = match OpenOptions::new().append(true).open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!("failed to open durable queue file: {}", e);
                return;
            }
        };
        match serde_json::to_string(&event) {
            Ok(line) => {
                if let Err(e) = writeln!(file, "{}", line) {
                    tracing::error!("failed to append pending event: {}", e);
                }
            }
            Err(e) => tracing::error!("failed to serialize pending event: {}", e),
        }
    }

    fn pending_for(&self, canvas_id: &str) -> Vec<PendingEvent> {
        let _guard = self.lock.lock().unwrap();
        let mut events: Vec<_> = self
            .read_all()
            .into_iter()
            .filter(|e| e.canvas_id == canvas_id)
            .collect();
        events.sort_by_key(|e| e.timestamp);
        events
    }

    fn clear(&self, canvas_id: &str, local_event_ids: &[String]) {
        let _guard = self.lock.lock().unwrap();
        let remaining: Vec<_> = self
            .read_all()
            .into_iter()
            .filter(|e| !(e.canvas_id == canvas_id && local_event_ids.contains(&e.local_event_id)))
            .collect();
        if let Err(e) = self.write_all(&remaining) {
            tracing::error!("failed to rewrite durable queue file: {}", e);
        }
    }
}
