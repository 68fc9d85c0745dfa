//! Optional callback surface. Reified as boxed async closures rather than a
//! trait object per callback, since each caller only ever needs at most one
//! implementation per hook (spec.md §9 "callbacks -> tagged variants or
//! interfaces").
//!
//! Every hook is invoked on its own `tokio::spawn`'d task: a panicking hook
//! fails only that task (observed as a dropped `JoinError`, discarded) and
//! never the connection loop that triggered it (spec.md §7, "hook failure").
//! `initial_storage` is the sole hook whose *result* the caller needs, so it
//! is awaited via the spawned task's `JoinHandle` rather than fire-and-forget.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::crdt::{SerializedCrdt, StorageOp};
use crate::ids::{ConnectionId, RoomId, UserId};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub type OnJoin = Arc<dyn Fn(RoomId, ConnectionId, UserId) -> BoxFuture<()> + Send + Sync>;
pub type OnLeave = Arc<dyn Fn(RoomId, ConnectionId, UserId) -> BoxFuture<()> + Send + Sync>;
pub type OnMessage = Arc<dyn Fn(RoomId, ConnectionId, Json) -> BoxFuture<()> + Send + Sync>;
pub type OnStorageChange = Arc<dyn Fn(RoomId, Vec<StorageOp>) -> BoxFuture<()> + Send + Sync>;
pub type InitialStorage = Arc<dyn Fn(RoomId) -> BoxFuture<Option<SerializedCrdt>> + Send + Sync>;
pub type InitialYjs = Arc<dyn Fn(RoomId) -> BoxFuture<Option<Vec<u8>>> + Send + Sync>;
pub type OnYjsChange = Arc<dyn Fn(RoomId, Vec<u8>) -> BoxFuture<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    pub on_join: Option<OnJoin>,
    pub on_leave: Option<OnLeave>,
    pub on_message: Option<OnMessage>,
    pub on_storage_change: Option<OnStorageChange>,
    pub initial_storage: Option<InitialStorage>,
    pub initial_yjs: Option<InitialYjs>,
    pub on_yjs_change: Option<OnYjsChange>,
}

impl Hooks {
    pub fn fire_on_join(&self, room: RoomId, conn: ConnectionId, user: UserId) {
        if let Some(hook) = self.on_join.clone() {
            tokio::spawn(hook(room, conn, user));
        }
    }

    pub fn fire_on_leave(&self, room: RoomId, conn: ConnectionId, user: UserId) {
        if let Some(hook) = self.on_leave.clone() {
            tokio::spawn(hook(room, conn, user));
        }
    }

    pub fn fire_on_message(&self, room: RoomId, conn: ConnectionId, frame: Json) {
        if let Some(hook) = self.on_message.clone() {
            tokio::spawn(hook(room, conn, frame));
        }
    }

    pub fn fire_on_storage_change(&self, room: RoomId, ops: Vec<StorageOp>) {
        if ops.is_empty() {
            return;
        }
        if let Some(hook) = self.on_storage_change.clone() {
            tokio::spawn(hook(room, ops));
        }
    }

    pub fn fire_on_yjs_change(&self, room: RoomId, update: Vec<u8>) {
        if let Some(hook) = self.on_yjs_change.clone() {
            tokio::spawn(hook(room, update));
        }
    }

    /// Awaited directly by the first-arrival barrier in `Room`: its result
    /// determines the initial storage root. A panic inside the hook is
    /// caught (via the spawned task boundary) and treated as `None`.
    pub async fn call_initial_storage(&self, room: RoomId) -> Option<SerializedCrdt> {
        match &self.initial_storage {
            Some(hook) => tokio::spawn(hook(room)).await.unwrap_or(None),
            None => None,
        }
    }

    pub async fn call_initial_yjs(&self, room: RoomId) -> Option<Vec<u8>> {
        match &self.initial_yjs {
            Some(hook) => tokio::spawn(hook(room)).await.unwrap_or(None),
            None => None,
        }
    }
}
