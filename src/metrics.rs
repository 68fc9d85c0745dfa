//! Server metrics for observability.
//!
//! Provides runtime counters for monitoring server health, exposed via the
//! health endpoint's snapshot.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Currently open WebSocket connections.
    pub active_connections: AtomicU64,
    /// Total connections accepted since server start.
    pub total_connections: AtomicU64,
    /// Rooms currently tracked by the room manager (set by the caller on
    /// each snapshot, since the manager — not this struct — owns the map).
    pub active_rooms: AtomicU64,

    /// Frames received from clients.
    pub messages_received: AtomicU64,
    /// Frames sent to clients (broadcast fan-out counts once per recipient).
    pub messages_sent: AtomicU64,
    /// Frames dropped as protocol errors (malformed JSON, missing `type`).
    pub messages_dropped: AtomicU64,

    /// Upgrade attempts rejected: 401/404/400/503 combined.
    pub upgrade_rejections: AtomicU64,
    /// Transport-level errors (send/read failures), isolated per connection.
    pub transport_errors: AtomicU64,

    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self { start_time: Some(Instant::now()), ..Default::default() }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upgrade_rejected(&self) {
        self.upgrade_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_rooms(&self, count: u64) {
        self.active_rooms.store(count, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            rooms: self.active_rooms.load(Ordering::Relaxed),
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                sent: self.messages_sent.load(Ordering::Relaxed),
                dropped: self.messages_dropped.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                upgrade_rejections: self.upgrade_rejections.load(Ordering::Relaxed),
                transport: self.transport_errors.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub rooms: u64,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub sent: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub upgrade_rejections: u64,
    pub transport: u64,
}
