//! WebSocket join handler.
//!
//! Upgrades `/ws/{room_id}`, wires the socket into the core engine, and
//! replays recent history into the client's outbound queue before the
//! pumps start. The split socket halves are exposed to the engine through
//! its `FrameReceiver`/`FrameSender` capability.

use crate::auth::AuthUser;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::AppState;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_core::{format_with_author, Client, ConnectionError, FrameReceiver, FrameSender, Identity, MessageStore};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Upgrade handler for room joins.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    let Ok(room_uuid) = Uuid::parse_str(&room_id) else {
        return (StatusCode::BAD_REQUEST, "invalid room id").into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, room_uuid, user, state))
}

async fn handle_socket(socket: WebSocket, room_uuid: Uuid, user: AuthUser, state: AppState) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let room_row = match state.store.get_or_create_room(room_uuid).await {
        Ok(row) => row,
        Err(err) => {
            error!(room = %room_uuid, error = %err, "failed to resolve room");
            return;
        }
    };

    if let Err(err) = state.store.add_member(room_row.id, user.id).await {
        warn!(room = %room_uuid, error = %err, "failed to add room member");
    }

    let room = state.hub.get_or_create_room(room_uuid);
    metrics::set_active_rooms(state.hub.room_count());

    let (client, outbox) = Client::new(
        room_uuid,
        Identity {
            user_id: user.id,
            room_row_id: room_row.id,
            display_name: user.name,
        },
        state.config.hub.outbound_capacity,
    );
    room.add(client.clone());
    debug!(room = %room_uuid, client = %client.id(), "client joined");

    send_history(&state, &client, room_row.id).await;

    let (sink, stream) = socket.split();
    let store: Arc<dyn MessageStore> = Arc::new(state.store.clone());
    client
        .run(
            SocketReader { stream },
            SocketWriter { sink },
            outbox,
            room.clone(),
            store,
        )
        .await;

    room.remove(&client);
    debug!(room = %room_uuid, client = %client.id(), "client left");
}

/// Replay recent messages, oldest first, into the client's queue.
///
/// The rows come back newest-first; they go out pre-formatted in
/// chronological order, exactly like live traffic.
async fn send_history(state: &AppState, client: &Client, room_row_id: i64) {
    let messages = match state
        .store
        .messages_by_room(room_row_id, state.config.limits.message_history_limit, 0)
        .await
    {
        Ok(messages) => messages,
        Err(err) => {
            warn!(error = %err, "failed to load message history");
            return;
        }
    };

    metrics::record_history_replayed(messages.len());
    for message in messages.iter().rev() {
        client.send_raw(format_with_author(&message.sender_name, &message.content));
    }
}

struct SocketReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReceiver for SocketReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(Bytes::from(text.into_bytes()))),
                Some(Ok(Message::Binary(data))) => return Ok(Some(Bytes::from(data))),
                // axum answers pings itself; pongs carry no payload we use.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Err(err)) => return Err(ConnectionError::ReceiveFailed(err.to_string())),
                None => return Ok(None),
            }
        }
    }
}

struct SocketWriter {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSender for SocketWriter {
    async fn send(&mut self, frame: Bytes) -> Result<(), ConnectionError> {
        let text = String::from_utf8_lossy(&frame).into_owned();
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|err| ConnectionError::SendFailed(err.to_string()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|err| ConnectionError::SendFailed(err.to_string()))
    }
}
