// Client sync queue: throttles/debounces outgoing edits, waits for acks
// with a fallback to durable offline storage, and replays the durable
// queue through BATCH_SYNC on reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::client::durable_queue::{DurableQueue, PendingEvent};
use crate::event::EventPayload;
use crate::session_protocol::{BatchSyncEvent, ClientMessage, ServerMessage};
use crate::vector_clock::VectorClock;

const CURSOR_THROTTLE: Duration = Duration::from_millis(50); // ~20/s
const EDIT_DEBOUNCE: Duration = Duration::from_millis(300);

struct Coalesced {
    shape_id: Option<String>,
    payload: EventPayload,
    generation: u64,
}

/// Per-canvas sync queue. One instance is owned by the UI layer for the
/// canvas currently open; switching canvases means dropping this and
/// creating a fresh one.
pub struct SyncQueue {
    canvas_id: String,
    user_id: String,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    durable: Arc<dyn DurableQueue>,
    ack_waiters: Mutex<HashMap<String, oneshot::Sender<ServerMessage>>>,
    batch_waiter: Mutex<Option<oneshot::Sender<ServerMessage>>>,
    coalesced: Mutex<HashMap<String, Coalesced>>,
    generation: AtomicU64,
    last_cursor_sent: Mutex<Option<Instant>>,
    ack_timeout: Duration,
    local_clock: Mutex<VectorClock>,
}

impl SyncQueue {
    pub fn new(
        canvas_id: String,
        user_id: String,
        outbound: mpsc::UnboundedSender<ClientMessage>,
        durable: Arc<dyn DurableQueue>,
        ack_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            canvas_id,
            user_id,
            outbound,
            durable,
            ack_waiters: Mutex::new(HashMap::new()),
            batch_waiter: Mutex::new(None),
            coalesced: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            last_cursor_sent: Mutex::new(None),
            ack_timeout,
            local_clock: Mutex::new(VectorClock::new()),
        })
    }

    /// Routes a server message arriving on the connection back into the
    /// queue: resolves whichever ack or batch-sync waiter it answers.
    pub fn handle_server_message(&self, message: ServerMessage) {
        match &message {
            ServerMessage::EventAck { local_event_id: Some(id), .. } => {
                if let Some(waiter) = self.ack_waiters.lock().unwrap().remove(id) {
                    let _ = waiter.send(message);
                }
            }
            ServerMessage::BatchSyncResult { .. } => {
                if let Some(waiter) = self.batch_waiter.lock().unwrap().take() {
                    let _ = waiter.send(message);
                }
            }
            _ => {}
        }
    }

    /// Submits a non-coalesced event (create, move, delete, drag
    /// start/end, pointer-down): sent immediately, acked or durably
    /// enqueued on timeout.
    pub async fn submit(self: &Arc<Self>, event_type: &str, shape_id: Option<String>, payload: EventPayload) {
        self.send_tracked(event_type.to_string(), shape_id, payload).await;
    }

    /// Submits a SHAPE_EDITED patch, coalescing rapid edits to the same
    /// shape into one flush ~300ms after the last touch.
    pub fn submit_shape_edited(self: &Arc<Self>, shape_id: String, payload: EventPayload) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut coalesced = self.coalesced.lock().unwrap();
            let entry = coalesced.entry(shape_id.clone()).or_insert_with(|| Coalesced {
                shape_id: Some(shape_id.clone()),
                payload: EventPayload::default(),
                generation,
            });
            if let Some(patch) = payload.properties {
                let merged = entry.payload.properties.get_or_insert_with(Default::default);
                for (k, v) in patch {
                    merged.insert(k, v);
                }
            }
            entry.generation = generation;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(EDIT_DEBOUNCE).await;
            this.flush_if_current("shape_edited_key_unused", &shape_id, generation).await;
        });
    }

    async fn flush_if_current(self: &Arc<Self>, _unused: &str, shape_id: &str, generation: u64) {
        let to_send = {
            let mut coalesced = self.coalesced.lock().unwrap();
            match coalesced.get(shape_id) {
                Some(entry) if entry.generation == generation => coalesced.remove(shape_id),
                _ => None,
            }
        };
        if let Some(entry) = to_send {
            self.send_tracked("SHAPE_EDITED".to_string(), entry.shape_id, entry.payload)
                .await;
        }
    }

    /// Cursor moves are ephemeral and never durably enqueued; a throttled
    /// move that doesn't clear the interval is simply dropped.
    pub fn submit_cursor_move(&self, x: f64, y: f64) {
        let mut last = self.last_cursor_sent.lock().unwrap();
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < CURSOR_THROTTLE {
                return;
            }
        }
        *last = Some(now);
        let _ = self.outbound.send(ClientMessage::CursorMove { x, y });
    }

    async fn send_tracked(self: &Arc<Self>, event_type: String, shape_id: Option<String>, mut payload: EventPayload) {
        if event_type == "SHAPE_EDITED" {
            self.attach_causal_context(&mut payload);
        }

        let local_event_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.ack_waiters
            .lock()
            .unwrap()
            .insert(local_event_id.clone(), tx);

        let sent = self
            .outbound
            .send(ClientMessage::ShapeEvent {
                local_event_id: Some(local_event_id.clone()),
                event_type: event_type.clone(),
                shape_id: shape_id.clone(),
                payload: payload.clone(),
            })
            .is_ok();

        let acked = sent
            && tokio::time::timeout(self.ack_timeout, rx).await.is_ok();

        if !acked {
            self.ack_waiters.lock().unwrap().remove(&local_event_id);
            self.durable.enqueue(PendingEvent {
                local_event_id,
                canvas_id: self.canvas_id.clone(),
                event_type,
                shape_id,
                payload,
                user_id: self.user_id.clone(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
        }
    }

    /// Stamps an outgoing edit with this client's causal context: its own
    /// vector clock entry, advanced once per edit, and a wall-clock
    /// timestamp for every touched property that doesn't already carry one.
    /// Without this the server has nothing but the recency heuristic to
    /// decide whether the edit conflicts with what it already has stored.
    fn attach_causal_context(&self, payload: &mut EventPayload) {
        let mut clock = self.local_clock.lock().unwrap();
        clock.inc(&self.user_id);
        payload.vector_clock = Some(clock.entries().clone());

        if let Some(properties) = &payload.properties {
            let now = chrono::Utc::now().timestamp_millis();
            let timestamps = payload.property_timestamps.get_or_insert_with(Default::default);
            for key in properties.keys() {
                timestamps.entry(key.clone()).or_insert(now);
            }
        }
    }

    /// Flushes any outstanding coalesced edits, then replays every
    /// durably-queued event for this canvas through BATCH_SYNC.
    pub async fn resync(self: &Arc<Self>, last_known_version: i64) -> Result<ServerMessage, String> {
        let pending_shapes: Vec<String> = self.coalesced.lock().unwrap().keys().cloned().collect();
        for shape_id in pending_shapes {
            let generation = self
                .coalesced
                .lock()
                .unwrap()
                .get(&shape_id)
                .map(|e| e.generation)
                .unwrap_or(0);
            self.flush_if_current("", &shape_id, generation).await;
        }

        let pending = self.durable.pending_for(&self.canvas_id);
        let local_ids: Vec<String> = pending.iter().map(|e| e.local_event_id.clone()).collect();
        let events: Vec<BatchSyncEvent> = pending
            .into_iter()
            .map(|e| BatchSyncEvent {
                local_event_id: e.local_event_id,
                event_type: e.event_type,
                shape_id: e.shape_id,
                payload: e.payload,
                timestamp: e.timestamp,
            })
            .collect();

        let (tx, rx) = oneshot::channel();
        *self.batch_waiter.lock().unwrap() = Some(tx);

        self.outbound
            .send(ClientMessage::BatchSync {
                events,
                last_known_version,
            })
            .map_err(|e| format!("transport closed: {}", e))?;

        let response = rx.await.map_err(|_| "batch sync timed out".to_string())?;
        if let ServerMessage::BatchSyncResult { success: true, .. } = &response {
            self.durable.clear(&self.canvas_id, &local_ids);
        }
        Ok(response)
    }
}
