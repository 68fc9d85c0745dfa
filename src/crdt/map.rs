//! `LiveMap`: string-keyed CRDT map with per-entry LWW-by-clock semantics
//! and retained tombstones.
//!
//! Accept-if-newer pattern grounded on the decentraland-bevy-explorer
//! `CrdtLWWState` `Entry::Occupied`/`Entry::Vacant` clock guard.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::value::{CrdtValue, SerializedEntry};

#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub value: CrdtValue,
    pub clock: u64,
    pub deleted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveMap {
    entries: BTreeMap<String, MapEntryRepr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MapEntryRepr {
    value: CrdtValue,
    clock: u64,
    deleted: bool,
}

impl LiveMap {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    /// `set{key, value, clock}`. Invariant 1: ops with `clock <= stored.clock`
    /// are no-ops. Returns whether the write was accepted.
    pub fn set(&mut self, key: &str, value: CrdtValue, clock: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if clock <= entry.clock => false,
            Some(entry) => {
                entry.value = value;
                entry.clock = clock;
                entry.deleted = false;
                true
            }
            None => {
                self.entries.insert(
                    key.to_string(),
                    MapEntryRepr { value, clock, deleted: false },
                );
                true
            }
        }
    }

    /// `delete{key, clock}`. Retains a tombstone (invariant 3) rather than
    /// removing the entry, so a later stale `set` is still clock-guarded.
    pub fn delete(&mut self, key: &str, clock: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if clock <= entry.clock => false,
            Some(entry) => {
                entry.clock = clock;
                entry.deleted = true;
                true
            }
            None => {
                self.entries.insert(
                    key.to_string(),
                    MapEntryRepr { value: CrdtValue::Json(serde_json::Value::Null), clock, deleted: true },
                );
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&CrdtValue> {
        self.entries.get(key).filter(|e| !e.deleted).map(|e| &e.value)
    }

    /// Overwrite an entry's value without touching its clock or tombstone
    /// state. See `LiveObject::set_raw` for why.
    pub fn set_raw(&mut self, key: &str, value: CrdtValue) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.value = value;
        }
    }

    pub fn entry(&self, key: &str) -> Option<MapEntry> {
        self.entries.get(key).map(|e| MapEntry { value: e.value.clone(), clock: e.clock, deleted: e.deleted })
    }

    /// Live (non-tombstoned) key/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CrdtValue)> {
        self.entries.iter().filter(|(_, e)| !e.deleted).map(|(k, e)| (k.as_str(), &e.value))
    }

    /// Live entry count, maintained without iterating tombstones (invariant 3).
    pub fn size(&self) -> usize {
        self.entries.values().filter(|e| !e.deleted).count()
    }

    /// Drops all tombstones. Not called automatically — explicit `compact()`.
    pub fn compact(&mut self) {
        self.entries.retain(|_, e| !e.deleted);
    }

    pub fn serialize(&self) -> BTreeMap<String, SerializedEntry> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), SerializedEntry { value: e.value.clone(), clock: e.clock, deleted: e.deleted }))
            .collect()
    }

    pub fn apply_snapshot(&mut self, entries: BTreeMap<String, SerializedEntry>) {
        self.entries = entries
            .into_iter()
            .map(|(k, e)| (k, MapEntryRepr { value: e.value, clock: e.clock, deleted: e.deleted }))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_accepts_strictly_newer_clock() {
        let mut map = LiveMap::new();
        assert!(map.set("k", CrdtValue::Json(json!(1)), 1));
        assert!(map.set("k", CrdtValue::Json(json!(2)), 2));
        assert_eq!(map.get("k").unwrap().as_json(), json!(2));
    }

    #[test]
    fn set_rejects_equal_or_stale_clock() {
        let mut map = LiveMap::new();
        map.set("k", CrdtValue::Json(json!(1)), 5);
        assert!(!map.set("k", CrdtValue::Json(json!(2)), 5));
        assert!(!map.set("k", CrdtValue::Json(json!(2)), 3));
        assert_eq!(map.get("k").unwrap().as_json(), json!(1));
    }

    #[test]
    fn delete_leaves_tombstone_excluded_from_iteration_and_size() {
        let mut map = LiveMap::new();
        map.set("k", CrdtValue::Json(json!(1)), 1);
        assert!(map.delete("k", 2));
        assert_eq!(map.get("k"), None);
        assert_eq!(map.size(), 0);
        assert_eq!(map.iter().count(), 0);
        // tombstone still guards stale writes
        assert!(!map.set("k", CrdtValue::Json(json!(3)), 2));
        assert!(map.set("k", CrdtValue::Json(json!(3)), 3));
    }

    #[test]
    fn compact_drops_tombstones() {
        let mut map = LiveMap::new();
        map.set("k", CrdtValue::Json(json!(1)), 1);
        map.delete("k", 2);
        map.compact();
        assert!(map.set("k", CrdtValue::Json(json!(9)), 1));
    }

    #[test]
    fn snapshot_roundtrip() {
        let mut map = LiveMap::new();
        map.set("a", CrdtValue::Json(json!("x")), 1);
        map.set("b", CrdtValue::Json(json!("y")), 2);
        let snap = map.serialize();
        let mut rehydrated = LiveMap::new();
        rehydrated.apply_snapshot(snap.clone());
        assert_eq!(rehydrated.serialize(), snap);
    }
}
