//! Inbound frame dispatch: one function per wire frame type (spec.md §4.1's
//! dispatch table), shared by every transport-specific connection loop.
//!
//! Grounded on the pattern of a per-connection context struct carrying
//! everything a handler needs (room, hooks, identity) and a single dispatch
//! entry point matching on message discriminant.

use std::sync::Arc;

use serde_json::Value as Json;
use tracing::trace;

use crate::hooks::Hooks;
use crate::ids::{ConnectionId, RoomId};
use crate::metrics::ServerMetrics;
use crate::presence::{now_ms, PresenceUpdate};
use crate::room::Room;

use super::protocol::{
    self, CursorData, CursorUpdateFrame, StateUpdateFrame, StorageInitFrame, StorageOpsFrame,
};

/// Per-connection context shared by the dispatcher.
pub struct ConnectionContext {
    pub room_id: RoomId,
    pub connection_id: ConnectionId,
    pub room: Arc<Room>,
    pub hooks: Arc<Hooks>,
    pub metrics: Arc<ServerMetrics>,
}

/// Parses `text` as a frame and dispatches it. Malformed JSON or a missing
/// `type` field is a protocol error: silently dropped, socket stays open
/// (spec.md §7, category 1).
pub async fn dispatch_frame(ctx: &ConnectionContext, text: &str) {
    let Ok(frame) = serde_json::from_str::<Json>(text) else {
        trace!(connection = %ctx.connection_id, "dropping non-JSON frame");
        ctx.metrics.message_dropped();
        return;
    };
    let Some(ty) = protocol::frame_type(&frame).map(str::to_string) else {
        trace!(connection = %ctx.connection_id, "dropping frame with no type");
        ctx.metrics.message_dropped();
        return;
    };

    match ty.as_str() {
        protocol::TYPE_STORAGE_INIT => handle_storage_init(ctx, frame).await,
        protocol::TYPE_STORAGE_OPS => handle_storage_ops(ctx, frame).await,
        protocol::TYPE_STATE_UPDATE => handle_state_update(ctx, frame).await,
        protocol::TYPE_HEARTBEAT => handle_heartbeat(ctx).await,
        protocol::TYPE_PRESENCE_UPDATE => handle_presence_update(ctx, frame).await,
        protocol::TYPE_CURSOR_UPDATE => handle_cursor_update(ctx, frame).await,
        _ => handle_custom(ctx, frame).await,
    }
}

async fn handle_storage_init(ctx: &ConnectionContext, frame: Json) {
    let Ok(parsed) = serde_json::from_value::<StorageInitFrame>(frame) else { return };
    if !ctx.room.accept_client_storage_init(parsed.root).await {
        return; // room already initialized: later inits are ignored
    }
    let snapshot = ctx.room.storage_snapshot().await;
    let envelope = protocol::storage_init_envelope(snapshot.as_ref());
    ctx.room.broadcast(&envelope, None).await; // including the sender, per the echo contract
}

async fn handle_storage_ops(ctx: &ConnectionContext, frame: Json) {
    if !ctx.room.is_storage_initialized().await {
        return;
    }
    let Ok(parsed) = serde_json::from_value::<StorageOpsFrame>(frame) else { return };
    if parsed.ops.is_empty() {
        return;
    }
    let (accepted, clock) = ctx.room.apply_storage_ops(parsed.ops).await;
    if accepted.is_empty() {
        return;
    }
    let envelope = protocol::storage_ops_envelope(&accepted, clock);
    ctx.room.broadcast(&envelope, None).await;
    ctx.hooks.fire_on_storage_change(ctx.room_id.clone(), accepted);
}

async fn handle_state_update(ctx: &ConnectionContext, frame: Json) {
    let Ok(parsed) = serde_json::from_value::<StateUpdateFrame>(frame) else { return };
    let Some(user_id) = ctx.room.connection_user_id(ctx.connection_id).await else { return };
    let merge = parsed.merge.unwrap_or(false);
    let accepted = ctx
        .room
        .set_live_state(&parsed.key, parsed.value.clone(), parsed.timestamp, &user_id, merge)
        .await;
    if !accepted {
        return;
    }
    let envelope = protocol::state_update_envelope(&parsed.key, &parsed.value, parsed.timestamp, user_id.as_str());
    ctx.room.broadcast(&envelope, None).await;
}

async fn handle_heartbeat(ctx: &ConnectionContext) {
    ctx.room.touch_heartbeat(ctx.connection_id).await;
}

async fn handle_presence_update(ctx: &ConnectionContext, frame: Json) {
    let Ok(update) = serde_json::from_value::<PresenceUpdate>(frame) else { return };
    if !ctx.room.update_presence(ctx.connection_id, &update).await {
        return;
    }
    let envelope = ctx.room.presence_message().await;
    ctx.room.broadcast(&envelope, None).await;
}

async fn handle_cursor_update(ctx: &ConnectionContext, frame: Json) {
    let Ok(parsed) = serde_json::from_value::<CursorUpdateFrame>(frame) else { return };
    if !parsed.is_valid() {
        return;
    }
    // Enrich from this connection's own presence entry, not an arbitrary
    // same-userId entry — a user id may have several concurrent connections.
    let Some(presence) = ctx.room.connection_presence(ctx.connection_id).await else { return };

    let cursor = CursorData {
        user_id: presence.user_id,
        display_name: presence.display_name,
        color: presence.color,
        x: parsed.x,
        y: parsed.y,
        last_update: now_ms(),
        viewport_pos: parsed.viewport_pos,
        viewport_scale: parsed.viewport_scale,
    };
    let envelope = protocol::cursor_update_envelope(&cursor);
    ctx.room.broadcast(&envelope, Some(ctx.connection_id)).await; // relay to all except sender
}

async fn handle_custom(ctx: &ConnectionContext, frame: Json) {
    ctx.hooks.fire_on_message(ctx.room_id.clone(), ctx.connection_id, frame.clone());
    ctx.room.broadcast(&frame, Some(ctx.connection_id)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::SerializedCrdt;
    use crate::ids::UserId;
    use crate::presence::PresenceUser;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn context() -> ConnectionContext {
        let room = Arc::new(Room::new(RoomId::new("r1")));
        ConnectionContext {
            room_id: RoomId::new("r1"),
            connection_id: ConnectionId::new(),
            room,
            hooks: Arc::new(Hooks::default()),
            metrics: Arc::new(ServerMetrics::new()),
        }
    }

    async fn join(ctx: &ConnectionContext, user: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let user_id = UserId::new(user);
        let presence = PresenceUser::new(&user_id, user.to_string());
        ctx.room
            .add_connection(
                crate::room::Connection { id: ctx.connection_id, user_id, presence, tx },
                10,
            )
            .await
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn malformed_json_is_silently_dropped() {
        let ctx = context();
        dispatch_frame(&ctx, "not json").await; // must not panic
        assert_eq!(ctx.metrics.messages_dropped.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn frame_with_no_type_counts_as_dropped() {
        let ctx = context();
        dispatch_frame(&ctx, &json!({"foo": "bar"}).to_string()).await;
        assert_eq!(ctx.metrics.messages_dropped.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn storage_ops_are_rejected_before_init() {
        let ctx = context();
        let mut rx = join(&ctx, "alice").await;
        dispatch_frame(&ctx, &json!({"type": "storage:ops", "ops": [{"op":"set","path":[],"key":"x","value":1,"clock":1}]}).to_string()).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn storage_init_is_broadcast_including_sender() {
        let ctx = context();
        let mut rx = join(&ctx, "alice").await;
        let root = json!({"type": "LiveObject", "data": {}});
        dispatch_frame(&ctx, &json!({"type": "storage:init", "root": root}).to_string()).await;
        let msg = rx.try_recv().unwrap();
        assert!(msg.contains("\"type\":\"storage:init\""));
    }

    #[tokio::test]
    async fn second_storage_init_is_ignored() {
        let ctx = context();
        let mut rx = join(&ctx, "alice").await;
        let root = SerializedCrdt::LiveObject { data: Default::default() };
        ctx.room.accept_client_storage_init(Some(root)).await;
        rx.try_recv().ok(); // drain nothing expected here
        dispatch_frame(&ctx, &json!({"type": "storage:init", "root": null}).to_string()).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cursor_update_excludes_sender_and_carries_identity() {
        let ctx = context();
        let mut rx_self = join(&ctx, "alice").await;
        let other_ctx = ConnectionContext {
            room_id: ctx.room_id.clone(),
            connection_id: ConnectionId::new(),
            room: ctx.room.clone(),
            hooks: ctx.hooks.clone(),
            metrics: ctx.metrics.clone(),
        };
        let mut rx_other = join(&other_ctx, "bob").await;

        dispatch_frame(&ctx, &json!({"type": "cursor:update", "x": 1.0, "y": 2.0}).to_string()).await;

        assert!(rx_self.try_recv().is_err());
        let received = rx_other.try_recv().unwrap();
        let v: Json = serde_json::from_str(&received).unwrap();
        assert_eq!(v["cursor"]["userId"], json!("alice"));
    }

    #[tokio::test]
    async fn unknown_frame_type_relays_to_others_and_fires_on_message() {
        let ctx = context();
        let mut rx_self = join(&ctx, "alice").await;
        let other_ctx = ConnectionContext {
            room_id: ctx.room_id.clone(),
            connection_id: ConnectionId::new(),
            room: ctx.room.clone(),
            hooks: ctx.hooks.clone(),
            metrics: ctx.metrics.clone(),
        };
        let mut rx_other = join(&other_ctx, "bob").await;

        dispatch_frame(&ctx, &json!({"type": "app:custom", "foo": "bar"}).to_string()).await;

        assert!(rx_self.try_recv().is_err());
        assert!(rx_other.try_recv().is_ok());
    }

    #[tokio::test]
    async fn cursor_update_enriches_from_the_sending_connection_not_a_same_user_id_match() {
        // Two connections share a userId; the second registered has a
        // different displayName. The cursor broadcast must reflect the
        // sending connection's own presence entry, never the other one.
        let ctx = context();
        let (tx, _rx) = mpsc::unbounded_channel();
        let user_id = UserId::new("alice");
        let mut presence = PresenceUser::new(&user_id, "Alice Tab One".to_string());
        presence.display_name = "Alice Tab One".to_string();
        ctx.room
            .add_connection(crate::room::Connection { id: ctx.connection_id, user_id: user_id.clone(), presence, tx }, 10)
            .await
            .unwrap();

        let other_conn_id = ConnectionId::new();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let presence2 = PresenceUser::new(&user_id, "Alice Tab Two".to_string());
        ctx.room
            .add_connection(crate::room::Connection { id: other_conn_id, user_id, presence: presence2, tx: tx2 }, 10)
            .await
            .unwrap();

        dispatch_frame(&ctx, &json!({"type": "cursor:update", "x": 1.0, "y": 2.0}).to_string()).await;

        let received = rx2.try_recv().unwrap();
        let v: Json = serde_json::from_str(&received).unwrap();
        assert_eq!(v["cursor"]["displayName"], json!("Alice Tab One"));
    }

    #[tokio::test]
    async fn heartbeat_refreshes_liveness_without_broadcast() {
        let ctx = context();
        let mut rx = join(&ctx, "alice").await;
        dispatch_frame(&ctx, &json!({"type": "heartbeat"}).to_string()).await;
        assert!(rx.try_recv().is_err());
    }
}
