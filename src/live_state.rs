//! Live-state store: a per-room last-writer-wins key/value overlay,
//! distinct from the CRDT storage document — not persisted as history, no
//! undo, no nesting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::ids::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveStateEntry {
    pub value: Json,
    pub timestamp: u64,
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Default)]
pub struct LiveStateStore {
    entries: HashMap<String, LiveStateEntry>,
}

impl LiveStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `set(key, value, timestamp, userId, merge?)`. Rejects if
    /// `timestamp < stored.timestamp`. When `merge` and both the stored and
    /// incoming values are JSON objects, shallow-merges the incoming object
    /// onto the stored one before storing.
    pub fn set(&mut self, key: &str, mut value: Json, timestamp: u64, user_id: &UserId, merge: bool) -> bool {
        if let Some(existing) = self.entries.get(key) {
            if timestamp < existing.timestamp {
                return false;
            }
            if merge {
                if let (Json::Object(old), Json::Object(new)) = (&existing.value, &value) {
                    let mut merged = old.clone();
                    for (k, v) in new {
                        merged.insert(k.clone(), v.clone());
                    }
                    value = Json::Object(merged);
                }
            }
        }
        self.entries.insert(
            key.to_string(),
            LiveStateEntry { value, timestamp, user_id: user_id.as_str().to_string() },
        );
        true
    }

    pub fn get(&self, key: &str) -> Option<&LiveStateEntry> {
        self.entries.get(key)
    }

    /// Full snapshot for `state:init`.
    pub fn snapshot(&self) -> &HashMap<String, LiveStateEntry> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_strictly_newer_or_equal_timestamp() {
        let mut store = LiveStateStore::new();
        let user = UserId::new("alice");
        assert!(store.set("cursor-theme", json!("dark"), 10, &user, false));
        assert!(store.set("cursor-theme", json!("light"), 10, &user, false));
        assert_eq!(store.get("cursor-theme").unwrap().value, json!("light"));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let mut store = LiveStateStore::new();
        let user = UserId::new("alice");
        store.set("k", json!(1), 100, &user, false);
        assert!(!store.set("k", json!(2), 50, &user, false));
        assert_eq!(store.get("k").unwrap().value, json!(1));
    }

    #[test]
    fn merge_shallow_merges_objects() {
        let mut store = LiveStateStore::new();
        let user = UserId::new("alice");
        store.set("settings", json!({"a": 1, "b": 2}), 1, &user, false);
        store.set("settings", json!({"b": 3, "c": 4}), 2, &user, true);
        assert_eq!(store.get("settings").unwrap().value, json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn merge_with_non_object_values_just_overwrites() {
        let mut store = LiveStateStore::new();
        let user = UserId::new("alice");
        store.set("k", json!(1), 1, &user, false);
        store.set("k", json!(2), 2, &user, true);
        assert_eq!(store.get("k").unwrap().value, json!(2));
    }

    #[test]
    fn user_id_is_recorded_on_the_entry() {
        let mut store = LiveStateStore::new();
        store.set("k", json!(1), 1, &UserId::new("bob"), false);
        assert_eq!(store.get("k").unwrap().user_id, "bob");
    }
}
