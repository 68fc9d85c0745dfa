//! Storage document: the CRDT tree rooted at a `LiveObject`, with clock
//! merge, subscription dispatch, and undo/redo wired in one place.
//!
//! Path resolution model: a nested container lives as a
//! `CrdtValue::Crdt(SerializedCrdt)` inside its parent's slot (see
//! `crate::crdt` module docs). Applying an op at a non-empty path means
//! materializing each container along the path into a live `LiveNode`,
//! recursing, and writing the (possibly changed) subtree back into the
//! parent slot — a full subtree re-serialize per op, traded for not needing
//! an arena of live nodes with back-references.

use serde_json::Value as Json;

use crate::clock::LamportClock;
use crate::crdt::{
    CrdtValue, Depth, LiveList, LiveMap, LiveNode, LiveObject, Path, SerializedCrdt,
    StorageOp, Subscriber, SubscriberId, SubscriptionRegistry,
};

use super::history::HistoryManager;

pub struct StorageDocument {
    root: LiveObject,
    clock: LamportClock,
    history: HistoryManager,
    subscriptions: SubscriptionRegistry,
}

impl StorageDocument {
    pub fn new() -> Self {
        Self {
            root: LiveObject::new(),
            clock: LamportClock::new(),
            history: HistoryManager::default(),
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    pub fn clock(&self) -> u64 {
        self.clock.current()
    }

    pub fn root(&self) -> &LiveObject {
        &self.root
    }

    pub fn serialize(&self) -> SerializedCrdt {
        SerializedCrdt::LiveObject { data: self.root.serialize() }
    }

    /// Fresh document from a snapshot. Per the documented Open Question
    /// resolution, the Lamport counter starts at zero — this path is for
    /// cold-loading persisted state, not for in-place reconnection (see
    /// `apply_snapshot`).
    pub fn deserialize(data: SerializedCrdt) -> Self {
        let mut doc = Self::new();
        if let SerializedCrdt::LiveObject { data } = data {
            doc.root.apply_snapshot(data);
        }
        doc
    }

    /// Rehydrates the root in place (reconnect: the `StorageDocument`
    /// instance, and any `Arc` held to it, stays valid). Unlike
    /// `deserialize`, the Lamport clock is merged forward to the highest
    /// clock found in the incoming tree rather than reset, so mutations
    /// issued right after reconnecting can't collide with already-stored
    /// field clocks.
    pub fn apply_snapshot(&mut self, data: SerializedCrdt) {
        let incoming_high_water = max_clock(&data);
        if let SerializedCrdt::LiveObject { data } = data {
            self.root.apply_snapshot(data);
        }
        self.clock.merge(incoming_high_water);
    }

    /// Apply ops received from a client. Merges the document's Lamport
    /// clock with each op's clock before applying (invariant 4) and
    /// captures undo history for each accepted op.
    pub fn apply_remote_ops(&mut self, ops: Vec<StorageOp>) -> Vec<StorageOp> {
        let mut accepted = Vec::with_capacity(ops.len());
        for op in ops {
            self.clock.merge(op.clock());
            if let Some(applied) = self.apply_one(op, true) {
                accepted.push(applied);
            }
        }
        accepted
    }

    /// Runs `f` with history capture paused, so hook-originated mutations
    /// (e.g. `onStorageChange`, `initialStorage`) never populate the undo
    /// stack. `f` is responsible for collecting the ops it wants broadcast
    /// from the return values of the mutation methods it calls.
    pub fn mutate_storage<F>(&mut self, f: F) -> Vec<StorageOp>
    where
        F: FnOnce(&mut StorageDocument) -> Vec<Option<StorageOp>>,
    {
        self.history.pause();
        let ops = f(self);
        self.history.resume();
        ops.into_iter().flatten().collect()
    }

    pub fn set(&mut self, path: Path, key: &str, value: Json) -> Option<StorageOp> {
        self.apply_local(StorageOp::Set { path, key: key.to_string(), value: CrdtValue::Json(value), clock: 0 })
    }

    pub fn set_crdt(&mut self, path: Path, key: &str, value: SerializedCrdt) -> Option<StorageOp> {
        self.apply_local(StorageOp::Set { path, key: key.to_string(), value: CrdtValue::Crdt(value), clock: 0 })
    }

    pub fn delete(&mut self, path: Path, key: &str) -> Option<StorageOp> {
        self.apply_local(StorageOp::Delete { path, key: key.to_string(), clock: 0 })
    }

    pub fn list_insert(&mut self, path: Path, id: &str, position: &str, value: Json) -> Option<StorageOp> {
        self.apply_local(StorageOp::ListInsert {
            path,
            id: id.to_string(),
            position: position.to_string(),
            value: CrdtValue::Json(value),
            clock: 0,
        })
    }

    pub fn list_delete(&mut self, path: Path, id: &str) -> Option<StorageOp> {
        self.apply_local(StorageOp::ListDelete { path, id: id.to_string(), clock: 0 })
    }

    pub fn list_move(&mut self, path: Path, id: &str, position: &str) -> Option<StorageOp> {
        self.apply_local(StorageOp::ListMove { path, id: id.to_string(), position: position.to_string(), clock: 0 })
    }

    pub fn start_batch(&mut self) {
        self.history.start_batch();
    }

    pub fn end_batch(&mut self) {
        self.history.end_batch();
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Replays the top undo batch as a fresh local mutation, capturing the
    /// ops it generates onto the redo stack instead of clearing it.
    pub fn undo(&mut self) -> Vec<StorageOp> {
        let Some(batch) = self.history.pop_undo() else { return Vec::new() };
        self.history.begin_capture();
        let applied: Vec<StorageOp> = batch.into_iter().filter_map(|op| self.apply_local(op)).collect();
        let captured = self.history.end_capture();
        self.history.push_redo(captured);
        applied
    }

    pub fn redo(&mut self) -> Vec<StorageOp> {
        let Some(batch) = self.history.pop_redo() else { return Vec::new() };
        self.history.begin_capture();
        let applied: Vec<StorageOp> = batch.into_iter().filter_map(|op| self.apply_local(op)).collect();
        let captured = self.history.end_capture();
        self.history.push_undo_from_redo(captured);
        applied
    }

    pub fn subscribe(&mut self, path: &Path, depth: Depth, callback: Subscriber) -> SubscriberId {
        self.subscriptions.subscribe(path, depth, callback)
    }

    pub fn unsubscribe(&mut self, path: &Path, id: SubscriberId) {
        self.subscriptions.unsubscribe(path, id);
    }

    /// Ticks a fresh clock for a locally originated op and applies it.
    fn apply_local(&mut self, op: StorageOp) -> Option<StorageOp> {
        let clock = self.clock.tick();
        self.apply_one(op.with_clock(clock), true)
    }

    fn apply_one(&mut self, op: StorageOp, capture_history: bool) -> Option<StorageOp> {
        let mut root_node = LiveNode::Object(std::mem::take(&mut self.root));
        let (accepted, inverse) = apply_recursive(&mut root_node, op.path(), &op);
        if let LiveNode::Object(o) = root_node {
            self.root = o;
        }
        if !accepted {
            return None;
        }
        if capture_history {
            if let Some(inv) = inverse {
                self.history.record(inv);
            }
        }
        let mut changed_path = op.path().clone();
        changed_path.push(leaf_key(&op).to_string());
        self.subscriptions.notify(&changed_path);
        Some(op)
    }
}

impl Default for StorageDocument {
    fn default() -> Self {
        Self::new()
    }
}

fn leaf_key(op: &StorageOp) -> &str {
    match op {
        StorageOp::Set { key, .. } | StorageOp::Delete { key, .. } => key,
        StorageOp::ListInsert { id, .. } | StorageOp::ListDelete { id, .. } | StorageOp::ListMove { id, .. } => id,
    }
}

fn max_clock(node: &SerializedCrdt) -> u64 {
    fn field(v: &CrdtValue) -> u64 {
        match v {
            CrdtValue::Crdt(c) => max_clock(c),
            CrdtValue::Json(_) => 0,
        }
    }
    match node {
        SerializedCrdt::LiveObject { data } => {
            data.values().map(|f| f.clock.max(field(&f.value))).max().unwrap_or(0)
        }
        SerializedCrdt::LiveMap { entries } => {
            entries.values().map(|e| e.clock.max(field(&e.value))).max().unwrap_or(0)
        }
        SerializedCrdt::LiveList { items } => {
            items.iter().map(|i| i.clock.max(field(&i.value))).max().unwrap_or(0)
        }
    }
}

/// Walks `path` from `node`, applying `op` at the container it resolves to.
/// Returns whether the op was accepted and, if so, the op that would undo
/// it (computed from state just before the mutation).
fn apply_recursive(node: &mut LiveNode, path: &[String], op: &StorageOp) -> (bool, Option<StorageOp>) {
    if path.is_empty() {
        let inverse = compute_inverse(node, op);
        let accepted = node.apply_leaf(op);
        return (accepted, if accepted { inverse } else { None });
    }
    let key = &path[0];
    let Some(child_value) = node.get_child(key) else { return (false, None) };
    let CrdtValue::Crdt(child_crdt) = child_value else { return (false, None) };
    let mut child_node = LiveNode::from_serialized(child_crdt);
    let (accepted, inverse) = apply_recursive(&mut child_node, &path[1..], op);
    if accepted {
        node.set_child_raw(key, CrdtValue::Crdt(child_node.to_serialized()));
    }
    (accepted, inverse)
}

fn compute_inverse(node: &LiveNode, op: &StorageOp) -> Option<StorageOp> {
    match (node, op) {
        (LiveNode::Object(o), StorageOp::Set { key, .. }) => match o.get(key) {
            Some(old) => Some(StorageOp::Set { path: op.path().clone(), key: key.clone(), value: old.clone(), clock: 0 }),
            None => Some(StorageOp::Delete { path: op.path().clone(), key: key.clone(), clock: 0 }),
        },
        (LiveNode::Object(o), StorageOp::Delete { key, .. }) => o
            .get(key)
            .map(|old| StorageOp::Set { path: op.path().clone(), key: key.clone(), value: old.clone(), clock: 0 }),
        (LiveNode::Map(m), StorageOp::Set { key, .. }) => match m.get(key) {
            Some(old) => Some(StorageOp::Set { path: op.path().clone(), key: key.clone(), value: old.clone(), clock: 0 }),
            None => Some(StorageOp::Delete { path: op.path().clone(), key: key.clone(), clock: 0 }),
        },
        (LiveNode::Map(m), StorageOp::Delete { key, .. }) => m
            .get(key)
            .map(|old| StorageOp::Set { path: op.path().clone(), key: key.clone(), value: old.clone(), clock: 0 }),
        (LiveNode::List(l), StorageOp::ListInsert { id, .. }) => match l.get(id) {
            Some(item) => Some(StorageOp::ListInsert {
                path: op.path().clone(),
                id: id.clone(),
                position: item.position.clone(),
                value: item.value.clone(),
                clock: 0,
            }),
            None => Some(StorageOp::ListDelete { path: op.path().clone(), id: id.clone(), clock: 0 }),
        },
        (LiveNode::List(l), StorageOp::ListDelete { id, .. }) => l.get(id).map(|item| StorageOp::ListInsert {
            path: op.path().clone(),
            id: id.clone(),
            position: item.position.clone(),
            value: item.value.clone(),
            clock: 0,
        }),
        (LiveNode::List(l), StorageOp::ListMove { id, .. }) => l.get(id).map(|item| StorageOp::ListMove {
            path: op.path().clone(),
            id: id.clone(),
            position: item.position.clone(),
            clock: 0,
        }),
        _ => None,
    }
}

/// Convenience constructors for empty nested containers, used by callers
/// setting up a field that should hold a `LiveMap`/`LiveList`/`LiveObject`.
pub fn empty_object() -> SerializedCrdt {
    SerializedCrdt::LiveObject { data: LiveObject::new().serialize() }
}

pub fn empty_map() -> SerializedCrdt {
    SerializedCrdt::LiveMap { entries: LiveMap::new().serialize() }
}

pub fn empty_list() -> SerializedCrdt {
    SerializedCrdt::LiveList { items: LiveList::new().serialize() }
}
