//! Per-connection task: registers the connection, sends the initial
//! snapshots, runs the inbound/outbound loop, and tears down on close
//! (spec.md §4.1 "Per-connection startup" / "Close").
//!
//! Grounded on the teacher's `handle_multiplexed_ws` (socket split, an
//! `mpsc` outbound channel drained by a dedicated sender task, `tokio::
//! select!` racing sender against receiver), narrowed to this domain: no
//! auth handshake over the socket (auth already resolved at upgrade time
//! in `server::upgrade_handler`), no RPC dispatch — replaced by the
//! presence/storage/live-state init sequence and `ws::dispatch`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::RoomServerConfig;
use crate::hooks::Hooks;
use crate::ids::ConnectionId;
use crate::metrics::ServerMetrics;
use crate::presence::PresenceUser;
use crate::room::{Connection, Room, RoomManager};
use crate::ids::RoomId;

use super::auth::Identity;
use super::dispatch::{dispatch_frame, ConnectionContext};
use super::protocol;

/// Drives one accepted WebSocket connection from registration to close.
#[allow(clippy::too_many_arguments)]
pub async fn run_connection(
    socket: WebSocket,
    room_id: RoomId,
    identity: Identity,
    room: Arc<Room>,
    manager: Arc<RoomManager>,
    hooks: Arc<Hooks>,
    config: Arc<RoomServerConfig>,
    metrics: Arc<ServerMetrics>,
) {
    metrics.connection_opened();

    let connection_id = ConnectionId::new();
    let presence = PresenceUser::new(&identity.user_id, identity.display_name.clone());
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let conn = Connection { id: connection_id, user_id: identity.user_id.clone(), presence, tx };
    if room.add_connection(conn, config.max_connections).await.is_err() {
        // Lost the race against a capacity check done at upgrade time; the
        // socket is already upgraded, so close it rather than 503ing.
        metrics.upgrade_rejected();
        metrics.connection_closed();
        return;
    }

    info!(room = %room_id, connection = %connection_id, user = %identity.user_id, "connection joined");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // 3. Broadcast updated presence to everyone, including the new arrival.
    room.broadcast(&room.presence_message().await, None).await;

    // 4. storage:init — to the new connection only.
    let snapshot = room.ensure_storage_initialized(|| hooks.call_initial_storage(room_id.clone())).await;
    let storage_init = protocol::storage_init_envelope(snapshot.as_ref());
    room.send_to(connection_id, &storage_init).await;

    // 5. state:init — only when the room already has live-state.
    let live_state = room.live_state_snapshot().await;
    if !live_state.is_empty() {
        room.send_to(connection_id, &protocol::state_init_envelope(&live_state)).await;
    }

    // 6. onJoin, fire-and-forget.
    hooks.fire_on_join(room_id.clone(), connection_id, identity.user_id.clone());

    let ctx = ConnectionContext {
        room_id: room_id.clone(),
        connection_id,
        room: room.clone(),
        hooks: hooks.clone(),
        metrics: metrics.clone(),
    };

    let metrics_sender = metrics.clone();
    let sender_task = async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
            metrics_sender.message_sent();
        }
    };

    let metrics_input = metrics.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    metrics_input.message_received();
                    dispatch_frame(&ctx, &text).await;
                }
                Ok(Message::Close(_)) => {
                    debug!(connection = %ctx.connection_id, "client closed connection");
                    break;
                }
                Err(_) => {
                    metrics_input.transport_error();
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => {}
        _ = input_task => {}
    }

    room.remove_connection(connection_id).await;
    hooks.fire_on_leave(room_id.clone(), connection_id, identity.user_id.clone());
    if room.is_empty().await {
        manager.schedule_cleanup(room_id, config.cleanup_timeout_ms);
    }
    room.broadcast(&room.presence_message().await, None).await;
    metrics.connection_closed();

    info!(connection = %connection_id, "connection closed");
}
