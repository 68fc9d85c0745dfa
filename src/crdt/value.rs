//! Dynamic value carried by CRDT fields, plus the tagged snapshot tree used
//! by `serialize`/`deserialize`/`applySnapshot`.
//!
//! Primitives travel as plain `serde_json::Value`; CRDT-valued fields are
//! represented as a nested `SerializedCrdt` tagged union so a snapshot can be
//! rehydrated without type information from the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::list::SerializedListItem;

/// A value stored at a `LiveObject`/`LiveMap` field or `LiveList` item:
/// either an opaque JSON primitive/array/object, or a nested CRDT subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CrdtValue {
    Crdt(SerializedCrdt),
    Json(Json),
}

impl CrdtValue {
    pub fn as_json(&self) -> Json {
        match self {
            CrdtValue::Crdt(c) => serde_json::to_value(c).unwrap_or(Json::Null),
            CrdtValue::Json(v) => v.clone(),
        }
    }
}

/// Tagged snapshot of a CRDT subtree, sufficient to rehydrate a fresh node
/// (or, via `applySnapshot`, to rehydrate an existing node in place).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SerializedCrdt {
    LiveObject { data: std::collections::BTreeMap<String, SerializedField> },
    LiveMap { entries: std::collections::BTreeMap<String, SerializedEntry> },
    LiveList { items: Vec<SerializedListItem> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedField {
    pub value: CrdtValue,
    pub clock: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEntry {
    pub value: CrdtValue,
    pub clock: u64,
    pub deleted: bool,
}
