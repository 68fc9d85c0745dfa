//! Wire protocol: inbound frame parsing helpers and outbound envelope
//! builders (spec.md §6). Frames travel as JSON text; outbound envelopes are
//! built as `serde_json::Value` so `Room::broadcast`/`send_to` can serialize
//! once and fan out to many sockets without per-connection typed encoding.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use crate::crdt::{SerializedCrdt, StorageOp};
use crate::live_state::LiveStateEntry;
use crate::presence::PresenceUser;

pub const TYPE_STORAGE_INIT: &str = "storage:init";
pub const TYPE_STORAGE_OPS: &str = "storage:ops";
pub const TYPE_STATE_INIT: &str = "state:init";
pub const TYPE_STATE_UPDATE: &str = "state:update";
pub const TYPE_PRESENCE: &str = "presence";
pub const TYPE_PRESENCE_UPDATE: &str = "presence:update";
pub const TYPE_CURSOR_UPDATE: &str = "cursor:update";
pub const TYPE_HEARTBEAT: &str = "heartbeat";

/// `{userId, displayName, color, x, y, lastUpdate, viewportPos?, viewportScale?}`.
/// The server always overwrites the identity fields on the way out — a
/// client cannot impersonate a peer (spec.md §3, "Cursor rule").
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorData {
    pub user_id: String,
    pub display_name: String,
    pub color: &'static str,
    pub x: f64,
    pub y: f64,
    pub last_update: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport_pos: Option<ViewportPos>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport_scale: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ViewportPos {
    pub x: f64,
    pub y: f64,
}

/// Fields accepted from an inbound `cursor:update` frame, before identity
/// enrichment.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdateFrame {
    pub x: f64,
    pub y: f64,
    pub viewport_pos: Option<ViewportPos>,
    pub viewport_scale: Option<f64>,
}

impl CursorUpdateFrame {
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.viewport_pos.as_ref().is_none_or(|p| p.x.is_finite() && p.y.is_finite())
            && self.viewport_scale.is_none_or(f64::is_finite)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInitFrame {
    pub root: Option<SerializedCrdt>,
}

#[derive(Debug, Deserialize)]
pub struct StorageOpsFrame {
    pub ops: Vec<StorageOp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdateFrame {
    pub key: String,
    pub value: Json,
    pub timestamp: u64,
    pub merge: Option<bool>,
}

pub fn frame_type(frame: &Json) -> Option<&str> {
    frame.get("type").and_then(Json::as_str)
}

pub fn presence_envelope(users: &[&PresenceUser]) -> Json {
    json!({ "type": TYPE_PRESENCE, "users": users })
}

pub fn storage_init_envelope(root: Option<&SerializedCrdt>) -> Json {
    json!({ "type": TYPE_STORAGE_INIT, "root": root })
}

pub fn storage_ops_envelope(ops: &[StorageOp], clock: u64) -> Json {
    json!({ "type": TYPE_STORAGE_OPS, "ops": ops, "clock": clock })
}

pub fn state_init_envelope(states: &std::collections::HashMap<String, LiveStateEntry>) -> Json {
    json!({ "type": TYPE_STATE_INIT, "states": states })
}

pub fn state_update_envelope(key: &str, value: &Json, timestamp: u64, user_id: &str) -> Json {
    json!({ "type": TYPE_STATE_UPDATE, "key": key, "value": value, "timestamp": timestamp, "userId": user_id })
}

pub fn cursor_update_envelope(cursor: &CursorData) -> Json {
    json!({ "type": TYPE_CURSOR_UPDATE, "cursor": cursor })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_frame_rejects_non_finite_coordinates() {
        let frame = CursorUpdateFrame { x: f64::NAN, y: 1.0, viewport_pos: None, viewport_scale: None };
        assert!(!frame.is_valid());
    }

    #[test]
    fn cursor_frame_accepts_finite_viewport() {
        let frame = CursorUpdateFrame {
            x: 1.0,
            y: 2.0,
            viewport_pos: Some(ViewportPos { x: 0.0, y: 0.0 }),
            viewport_scale: Some(1.5),
        };
        assert!(frame.is_valid());
    }

    #[test]
    fn frame_type_reads_the_type_field() {
        let v = json!({"type": "heartbeat"});
        assert_eq!(frame_type(&v), Some("heartbeat"));
        assert_eq!(frame_type(&json!({})), None);
    }
}
