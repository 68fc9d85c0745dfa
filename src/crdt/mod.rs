//! CRDT primitives: `LiveObject`, `LiveMap`, `LiveList` nested arbitrarily
//! under a document root, plus the fractional-index list, the storage op
//! wire form, and the subscription registry.
//!
//! Nesting model: a nested CRDT lives as a `CrdtValue::Crdt(SerializedCrdt)`
//! inside its parent's value slot. Mutating a nested node means
//! materializing it into a live `LiveNode`, recursing, and writing the
//! (possibly changed) serialized form back into the parent slot without
//! disturbing the parent slot's own clock — the slot's clock tracks when
//! *that reference* was last assigned, not the mutation history of the
//! subtree it points to (spec.md §3 invariant 5: a node's path is derived
//! from how the root reaches it, independent of its own internal clock).

pub mod list;
pub mod map;
pub mod object;
pub mod op;
pub mod subscribe;
pub mod value;

pub use list::{generate_key_between, generate_n_keys_between, LiveList};
pub use map::LiveMap;
pub use object::LiveObject;
pub use op::{Path, StorageOp};
pub use subscribe::{Depth, Subscriber, SubscriberId, SubscriptionRegistry};
pub use value::{CrdtValue, SerializedCrdt, SerializedEntry, SerializedField};

/// A live, mutable view of any one of the three CRDT primitives, used while
/// walking a path through nested containers.
#[derive(Debug, Clone)]
pub enum LiveNode {
    Object(LiveObject),
    Map(LiveMap),
    List(LiveList),
}

impl LiveNode {
    pub fn from_serialized(s: SerializedCrdt) -> Self {
        match s {
            SerializedCrdt::LiveObject { data } => {
                let mut o = LiveObject::new();
                o.apply_snapshot(data);
                LiveNode::Object(o)
            }
            SerializedCrdt::LiveMap { entries } => {
                let mut m = LiveMap::new();
                m.apply_snapshot(entries);
                LiveNode::Map(m)
            }
            SerializedCrdt::LiveList { items } => {
                let mut l = LiveList::new();
                l.apply_snapshot(items);
                LiveNode::List(l)
            }
        }
    }

    pub fn to_serialized(&self) -> SerializedCrdt {
        match self {
            LiveNode::Object(o) => SerializedCrdt::LiveObject { data: o.serialize() },
            LiveNode::Map(m) => SerializedCrdt::LiveMap { entries: m.serialize() },
            LiveNode::List(l) => SerializedCrdt::LiveList { items: l.serialize() },
        }
    }

    /// Value at `key` (a field/entry name for object/map, an item id for
    /// list). Returns `None` if the key/id is absent or, for lists,
    /// tombstoned — callers resolving a path treat both as "path does not
    /// resolve" per spec.md §4.2.
    pub fn get_child(&self, key: &str) -> Option<CrdtValue> {
        match self {
            LiveNode::Object(o) => o.get(key).cloned(),
            LiveNode::Map(m) => m.get(key).cloned(),
            LiveNode::List(l) => l.get(key).filter(|i| !i.deleted).map(|i| i.value.clone()),
        }
    }

    /// Apply a leaf-level mutation (the op's final segment targets a field
    /// directly inside this node). Returns whether the write was accepted.
    pub fn apply_leaf(&mut self, op: &StorageOp) -> bool {
        match (self, op) {
            (LiveNode::Object(o), StorageOp::Set { key, value, clock, .. }) => {
                o.set(key, value.clone(), *clock)
            }
            (LiveNode::Object(o), StorageOp::Delete { key, clock, .. }) => o.delete(key, *clock),
            (LiveNode::Map(m), StorageOp::Set { key, value, clock, .. }) => {
                m.set(key, value.clone(), *clock)
            }
            (LiveNode::Map(m), StorageOp::Delete { key, clock, .. }) => m.delete(key, *clock),
            (LiveNode::List(l), StorageOp::ListInsert { id, position, value, clock, .. }) => {
                l.insert(id, position, value.clone(), *clock)
            }
            (LiveNode::List(l), StorageOp::ListDelete { id, clock, .. }) => l.delete(id, *clock),
            (LiveNode::List(l), StorageOp::ListMove { id, position, clock, .. }) => {
                l.move_item(id, position, *clock)
            }
            _ => false,
        }
    }

    /// Overwrite a child slot's value in place without touching its clock —
    /// used when writing a nested container back after a deeper mutation.
    pub fn set_child_raw(&mut self, key: &str, value: CrdtValue) {
        match self {
            LiveNode::Object(o) => o.set_raw(key, value),
            LiveNode::Map(m) => m.set_raw(key, value),
            LiveNode::List(l) => l.set_value_raw(key, value),
        }
    }
}
