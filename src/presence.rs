//! Presence: per-connection identity + status broadcast to a room.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::color::color_for_user;
use crate::ids::UserId;

pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    Online,
    Away,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub user_id: String,
    pub display_name: String,
    pub color: &'static str,
    pub connected_at: u64,
    pub online_status: OnlineStatus,
    pub last_active_at: u64,
    pub is_idle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Json>,
    /// Reaper liveness clock, refreshed only by `touch()` on a `heartbeat`
    /// frame. Distinct from `last_active_at`, which any presence-affecting
    /// frame bumps for display purposes; not part of the broadcast wire
    /// shape.
    #[serde(skip)]
    pub last_heartbeat: u64,
}

impl PresenceUser {
    pub fn new(user_id: &UserId, display_name: String) -> Self {
        let now = now_ms();
        Self {
            user_id: user_id.as_str().to_string(),
            display_name,
            color: color_for_user(user_id.as_str()),
            connected_at: now,
            online_status: OnlineStatus::Online,
            last_active_at: now,
            is_idle: false,
            location: None,
            metadata: None,
            last_heartbeat: now,
        }
    }

    /// Applies a `presence:update` frame's accepted fields. Unset fields are
    /// left untouched.
    pub fn apply_update(&mut self, update: &PresenceUpdate) {
        if let Some(status) = update.online_status {
            self.online_status = status;
        }
        if let Some(is_idle) = update.is_idle {
            self.is_idle = is_idle;
        }
        if let Some(location) = update.location.clone() {
            self.location = Some(location);
        }
        if let Some(metadata) = update.metadata.clone() {
            self.metadata = Some(metadata);
        }
        self.last_active_at = now_ms();
    }

    /// Heartbeat reaper transition: no socket activity within the timeout.
    pub fn mark_offline(&mut self) {
        self.online_status = OnlineStatus::Offline;
    }

    /// Refreshes liveness on a received `heartbeat` frame.
    pub fn touch(&mut self) {
        self.last_heartbeat = now_ms();
    }

    pub fn is_stale(&self, timeout_ms: u64) -> bool {
        self.online_status != OnlineStatus::Offline && now_ms().saturating_sub(self.last_heartbeat) > timeout_ms
    }
}

/// Accepted fields of an inbound `presence:update` frame.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub online_status: Option<OnlineStatus>,
    pub is_idle: Option<bool>,
    pub location: Option<Json>,
    pub metadata: Option<Json>,
}
