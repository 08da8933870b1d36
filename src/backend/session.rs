// Session protocol handler: upgrades a WebSocket connection, dispatches
// inbound envelopes, and drives the per-connection outgoing task.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collab::Collab;
use crate::error::ProtocolError;
use crate::event::EventKind;
use crate::session_protocol::{parse_writable_kind, BatchSyncEvent, ClientMessage, ServerMessage};
use crate::store::{BatchItem, CanvasState};

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

pub async fn session_handler(
    ws: WebSocketUpgrade,
    State(collab): State<Collab>,
    Query(params): Query<ConnectParams>,
) -> Response {
    let user_id = params.user_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let connection_id = Uuid::new_v4().to_string();
    info!("session {} opening for user {}", connection_id, user_id);

    ws.on_upgrade(move |socket| handle_connection(socket, collab, connection_id, user_id))
}

async fn handle_connection(socket: WebSocket, collab: Collab, connection_id: String, user_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let outgoing_connection_id = connection_id.clone();
    let outgoing_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if let Err(e) = sender.send(Message::Text(json)).await {
                        error!("failed to send to {}: {}", outgoing_connection_id, e);
                        break;
                    }
                }
                Err(e) => error!("failed to serialize outbound message: {}", e),
            }
        }
        debug!("outgoing task ended for {}", outgoing_connection_id);
    });

    collab.rooms.register(connection_id.clone(), user_id.clone(), tx.clone()).await;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) =
                    dispatch(&text, &collab, &connection_id, &user_id, &tx).await
                {
                    warn!("protocol error from {}: {}", connection_id, e);
                    let _ = tx.send(ServerMessage::Error { error: e.to_string() });
                }
            }
            Ok(Message::Close(_)) => {
                info!("session {} closed by peer", connection_id);
                break;
            }
            Ok(Message::Ping(_)) => {}
            Ok(Message::Pong(_)) => {
                collab.rooms.mark_alive(&connection_id).await;
            }
            Ok(Message::Binary(_)) => {
                warn!("unexpected binary frame on session {}", connection_id);
            }
            Err(e) => {
                error!("transport error on session {}: {}", connection_id, e);
                break;
            }
        }
    }

    if let Some(canvas_id) = collab.rooms.unregister(&connection_id).await {
        collab
            .rooms
            .broadcast(
                &canvas_id,
                ServerMessage::UserLeft {
                    user_id: user_id.clone(),
                },
                None,
            )
            .await;
    }
    outgoing_task.abort();
    info!("session {} torn down for user {}", connection_id, user_id);
}

async fn dispatch(
    raw: &str,
    collab: &Collab,
    connection_id: &str,
    user_id: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Result<(), ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let message_type = value.get("type").and_then(|t| t.as_str());

    if message_type == Some("ping") {
        collab.rooms.mark_alive(connection_id).await;
        return Ok(());
    }
    if !matches!(
        message_type,
        Some("JOIN_CANVAS" | "LEAVE_CANVAS" | "SHAPE_EVENT" | "BATCH_SYNC" | "GET_STATE" | "CURSOR_MOVE")
    ) {
        return Err(ProtocolError::UnknownType(
            message_type.unwrap_or("<missing>").to_string(),
        ));
    }

    let message: ClientMessage = serde_json::from_value(value)?;

    match message {
        ClientMessage::JoinCanvas { canvas_id, username } => {
            handle_join(collab, connection_id, user_id, canvas_id, username, tx).await
        }
        ClientMessage::LeaveCanvas => handle_leave(collab, connection_id, user_id).await,
        ClientMessage::ShapeEvent {
            local_event_id,
            event_type,
            shape_id,
            payload,
        } => {
            handle_shape_event(
                collab,
                connection_id,
                user_id,
                local_event_id,
                event_type,
                shape_id,
                payload,
                tx,
            )
            .await
        }
        ClientMessage::BatchSync {
            events,
            last_known_version,
        } => handle_batch_sync(collab, connection_id, user_id, events, last_known_version, tx).await,
        ClientMessage::GetState { since_version } => {
            handle_get_state(collab, connection_id, since_version, tx).await
        }
        ClientMessage::CursorMove { x, y } => handle_cursor_move(collab, connection_id, user_id, x, y).await,
    }
}

async fn handle_join(
    collab: &Collab,
    connection_id: &str,
    user_id: &str,
    canvas_id: String,
    username: Option<String>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Result<(), ProtocolError> {
    if let Err(e) = collab.store.get_or_create_canvas(&canvas_id, None).await {
        let _ = tx.send(ServerMessage::JoinError {
            canvas_id,
            error: e.to_string(),
        });
        return Ok(());
    }

    collab.rooms.attach(connection_id, &canvas_id, username.clone()).await;

    let _ = tx.send(ServerMessage::JoinSuccess {
        canvas_id: canvas_id.clone(),
        user_id: user_id.to_string(),
        username: username.clone(),
    });

    let state = collab.store.get_canvas_state(&canvas_id).await?;
    let users = collab.rooms.users_of(&canvas_id).await;
    let _ = tx.send(ServerMessage::CanvasState {
        shapes: state.shapes,
        version: state.version,
        users,
    });

    collab
        .rooms
        .broadcast(
            &canvas_id,
            ServerMessage::UserJoined {
                user_id: user_id.to_string(),
                username,
            },
            Some(connection_id),
        )
        .await;

    Ok(())
}

async fn handle_leave(collab: &Collab, connection_id: &str, user_id: &str) -> Result<(), ProtocolError> {
    if let Some(canvas_id) = collab.rooms.detach(connection_id).await {
        collab
            .rooms
            .broadcast(
                &canvas_id,
                ServerMessage::UserLeft {
                    user_id: user_id.to_string(),
                },
                None,
            )
            .await;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_shape_event(
    collab: &Collab,
    connection_id: &str,
    user_id: &str,
    local_event_id: Option<String>,
    event_type: String,
    shape_id: Option<String>,
    payload: crate::event::EventPayload,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Result<(), ProtocolError> {
    let canvas_id = collab
        .rooms
        .canvas_of(connection_id)
        .await
        .ok_or(ProtocolError::NotJoined("SHAPE_EVENT"))?;

    let kind: EventKind =
        parse_writable_kind(&event_type).map_err(ProtocolError::RejectedKind)?;

    let outcome = collab
        .store
        .store_event(&canvas_id, user_id, kind, shape_id.clone(), payload.clone(), local_event_id.as_deref())
        .await?;

    let _ = tx.send(ServerMessage::ack(local_event_id, &outcome));

    collab
        .rooms
        .broadcast(
            &canvas_id,
            ServerMessage::ShapeEvent {
                event_type,
                shape_id,
                payload: outcome.payload,
                version: outcome.version,
                user_id: user_id.to_string(),
                had_conflict: outcome.had_conflict,
            },
            Some(connection_id),
        )
        .await;

    Ok(())
}

async fn handle_batch_sync(
    collab: &Collab,
    connection_id: &str,
    user_id: &str,
    events: Vec<BatchSyncEvent>,
    last_known_version: i64,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Result<(), ProtocolError> {
    let canvas_id = collab
        .rooms
        .canvas_of(connection_id)
        .await
        .ok_or(ProtocolError::NotJoined("BATCH_SYNC"))?;

    let missed = collab.store.events_since(&canvas_id, last_known_version).await?;

    let mut items = Vec::with_capacity(events.len());
    for event in &events {
        let kind = match parse_writable_kind(&event.event_type) {
            Ok(kind) => kind,
            Err(e) => {
                let _ = tx.send(ServerMessage::BatchSyncResult {
                    success: false,
                    stored_events: vec![],
                    missed_events: missed,
                    current_state: empty_state(),
                    conflicts: vec![],
                    message: Some(e),
                });
                return Ok(());
            }
        };
        items.push(BatchItem {
            local_event_id: Some(event.local_event_id.clone()),
            user_id: user_id.to_string(),
            kind,
            shape_id: event.shape_id.clone(),
            payload: event.payload.clone(),
        });
    }

    let result = match collab.store.store_batch(&canvas_id, items).await {
        Ok(result) => result,
        Err(e) => {
            let _ = tx.send(ServerMessage::BatchSyncResult {
                success: false,
                stored_events: vec![],
                missed_events: missed,
                current_state: empty_state(),
                conflicts: vec![],
                message: Some(e.to_string()),
            });
            return Ok(());
        }
    };

    let current_state = collab.store.get_canvas_state(&canvas_id).await?;

    for outcome in &result.stored {
        if !outcome.stored {
            continue;
        }
        collab
            .rooms
            .broadcast(
                &canvas_id,
                ServerMessage::ShapeEvent {
                    event_type: "SHAPE_EVENT".to_string(),
                    shape_id: None,
                    payload: outcome.payload.clone(),
                    version: outcome.version,
                    user_id: user_id.to_string(),
                    had_conflict: outcome.had_conflict,
                },
                Some(connection_id),
            )
            .await;
    }

    let _ = tx.send(ServerMessage::BatchSyncResult {
        success: true,
        stored_events: outcomes_to_stored(&canvas_id, user_id, &result.stored),
        missed_events: missed,
        current_state,
        conflicts: outcomes_to_stored(&canvas_id, user_id, &result.conflicts),
        message: None,
    });

    Ok(())
}

fn outcomes_to_stored(
    canvas_id: &str,
    user_id: &str,
    outcomes: &[crate::store::StoreOutcome],
) -> Vec<crate::event::StoredEvent> {
    outcomes
        .iter()
        .map(|o| crate::event::StoredEvent {
            id: o.event_id.clone(),
            canvas_id: canvas_id.to_string(),
            shape_id: o.shape_id.clone(),
            user_id: user_id.to_string(),
            kind: o.kind.clone(),
            payload: o.payload.clone(),
            version: o.version,
            created_at: chrono::Utc::now(),
            had_conflict: o.had_conflict,
        })
        .collect()
}

fn empty_state() -> CanvasState {
    CanvasState {
        shapes: vec![],
        version: 0,
    }
}

async fn handle_get_state(
    collab: &Collab,
    connection_id: &str,
    since_version: Option<i64>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Result<(), ProtocolError> {
    let canvas_id = collab
        .rooms
        .canvas_of(connection_id)
        .await
        .ok_or(ProtocolError::NotJoined("GET_STATE"))?;

    if let Some(since) = since_version {
        let events = collab.store.events_since(&canvas_id, since).await?;
        let _ = tx.send(ServerMessage::IncrementalUpdate { events });
    } else {
        let state = collab.store.get_canvas_state(&canvas_id).await?;
        let users = collab.rooms.users_of(&canvas_id).await;
        let _ = tx.send(ServerMessage::CanvasState {
            shapes: state.shapes,
            version: state.version,
            users,
        });
    }
    Ok(())
}

async fn handle_cursor_move(
    collab: &Collab,
    connection_id: &str,
    user_id: &str,
    x: f64,
    y: f64,
) -> Result<(), ProtocolError> {
    let Some(canvas_id) = collab.rooms.canvas_of(connection_id).await else {
        return Ok(());
    };
    collab
        .rooms
        .broadcast(
            &canvas_id,
            ServerMessage::CursorMove {
                user_id: user_id.to_string(),
                username: None,
                x,
                y,
            },
            Some(connection_id),
        )
        .await;
    Ok(())
}

/// Background liveness loop: every `collab.config.heartbeat_interval`,
/// pings all sessions and reaps anything that missed the previous ping.
pub async fn start_heartbeat_task(collab: Arc<Collab>) {
    let mut interval = tokio::time::interval(collab.config.heartbeat_interval);
    loop {
        interval.tick().await;
        let dead = collab
            .rooms
            .sweep_stale(|| ServerMessage::Ping)
            .await;
        if !dead.is_empty() {
            info!("heartbeat reaped {} stale sessions", dead.len());
        } else {
            debug!("heartbeat: no stale sessions");
        }
    }
}
