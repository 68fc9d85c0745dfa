//! `LiveObject`: string-field CRDT map. Semantically close to `LiveMap`
//! (same LWW-by-clock accept rule) but modeled as the document root and any
//! nested "record-shaped" value, per spec.md §3's distinct `LiveObject` /
//! `LiveMap` primitives.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::value::{CrdtValue, SerializedField};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveObject {
    fields: BTreeMap<String, FieldRepr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FieldRepr {
    value: CrdtValue,
    clock: u64,
}

impl LiveObject {
    pub fn new() -> Self {
        Self { fields: BTreeMap::new() }
    }

    /// `set{key, value, clock}`. Invariant 1/4: stale or equal clocks are
    /// no-ops; accepted writes store the op's own clock, not a tick of the
    /// document clock (the document ticks before emitting the op).
    pub fn set(&mut self, key: &str, value: CrdtValue, clock: u64) -> bool {
        match self.fields.get_mut(key) {
            Some(field) if clock <= field.clock => false,
            Some(field) => {
                field.value = value;
                field.clock = clock;
                true
            }
            None => {
                self.fields.insert(key.to_string(), FieldRepr { value, clock });
                true
            }
        }
    }

    /// `delete{key, clock}`: object fields are removed outright rather than
    /// tombstoned (unlike `LiveMap`) since object fields are not iterated
    /// for membership semantics the same way a map's entry count is.
    pub fn delete(&mut self, key: &str, clock: u64) -> bool {
        match self.fields.get(key) {
            Some(field) if clock <= field.clock => false,
            _ => {
                self.fields.remove(key);
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&CrdtValue> {
        self.fields.get(key).map(|f| &f.value)
    }

    /// Overwrite a field's value without touching its clock. Used when a
    /// nested container reachable through this field was mutated — the
    /// field's own clock tracks when the reference was assigned, not the
    /// mutation history of the subtree it points to.
    pub fn set_raw(&mut self, key: &str, value: CrdtValue) {
        if let Some(field) = self.fields.get_mut(key) {
            field.value = value;
        }
    }

    pub fn clock_of(&self, key: &str) -> Option<u64> {
        self.fields.get(key).map(|f| f.clock)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CrdtValue)> {
        self.fields.iter().map(|(k, f)| (k.as_str(), &f.value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn serialize(&self) -> BTreeMap<String, SerializedField> {
        self.fields
            .iter()
            .map(|(k, f)| (k.clone(), SerializedField { value: f.value.clone(), clock: f.clock }))
            .collect()
    }

    pub fn apply_snapshot(&mut self, data: BTreeMap<String, SerializedField>) {
        self.fields = data
            .into_iter()
            .map(|(k, f)| (k, FieldRepr { value: f.value, clock: f.clock }))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get() {
        let mut obj = LiveObject::new();
        obj.set("count", CrdtValue::Json(json!(0)), 1);
        assert_eq!(obj.get("count").unwrap().as_json(), json!(0));
    }

    #[test]
    fn stale_clock_set_is_a_no_op() {
        let mut obj = LiveObject::new();
        obj.set("count", CrdtValue::Json(json!(1)), 5);
        assert!(!obj.set("count", CrdtValue::Json(json!(99)), 5));
        assert!(!obj.set("count", CrdtValue::Json(json!(99)), 2));
        assert_eq!(obj.get("count").unwrap().as_json(), json!(1));
    }

    #[test]
    fn newer_clock_applies() {
        let mut obj = LiveObject::new();
        obj.set("count", CrdtValue::Json(json!(1)), 1);
        assert!(obj.set("count", CrdtValue::Json(json!(2)), 2));
        assert_eq!(obj.get("count").unwrap().as_json(), json!(2));
    }

    #[test]
    fn delete_removes_field() {
        let mut obj = LiveObject::new();
        obj.set("count", CrdtValue::Json(json!(1)), 1);
        assert!(obj.delete("count", 2));
        assert_eq!(obj.get("count"), None);
    }

    #[test]
    fn snapshot_roundtrip_byte_equal() {
        let mut obj = LiveObject::new();
        obj.set("a", CrdtValue::Json(json!(1)), 1);
        obj.set("b", CrdtValue::Json(json!("x")), 2);
        let snap = obj.serialize();
        let mut rehydrated = LiveObject::new();
        rehydrated.apply_snapshot(snap.clone());
        assert_eq!(rehydrated.serialize(), snap);
        assert_eq!(
            serde_json::to_string(&snap).unwrap(),
            serde_json::to_string(&rehydrated.serialize()).unwrap()
        );
    }
}
