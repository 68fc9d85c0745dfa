//! Storage op wire form (spec.md §3 "Storage op").

use serde::{Deserialize, Serialize};

use super::value::CrdtValue;

/// A path is a sequence of keys (object/map fields) or ids (list items)
/// walked from the document root to the target container. Which
/// interpretation applies at each segment is determined by the concrete
/// node type encountered during resolution, not by the segment itself.
pub type Path = Vec<String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum StorageOp {
    Set {
        path: Path,
        key: String,
        value: CrdtValue,
        clock: u64,
    },
    Delete {
        path: Path,
        key: String,
        clock: u64,
    },
    ListInsert {
        path: Path,
        id: String,
        position: String,
        value: CrdtValue,
        clock: u64,
    },
    ListDelete {
        path: Path,
        id: String,
        clock: u64,
    },
    ListMove {
        path: Path,
        id: String,
        position: String,
        clock: u64,
    },
}

impl StorageOp {
    pub fn path(&self) -> &Path {
        match self {
            StorageOp::Set { path, .. }
            | StorageOp::Delete { path, .. }
            | StorageOp::ListInsert { path, .. }
            | StorageOp::ListDelete { path, .. }
            | StorageOp::ListMove { path, .. } => path,
        }
    }

    pub fn clock(&self) -> u64 {
        match self {
            StorageOp::Set { clock, .. }
            | StorageOp::Delete { clock, .. }
            | StorageOp::ListInsert { clock, .. }
            | StorageOp::ListDelete { clock, .. }
            | StorageOp::ListMove { clock, .. } => *clock,
        }
    }

    /// Re-stamp this op with a new clock, used when merging a remote op's
    /// clock into the document (invariant 4) before rebroadcast.
    pub fn with_clock(mut self, clock: u64) -> Self {
        match &mut self {
            StorageOp::Set { clock: c, .. }
            | StorageOp::Delete { clock: c, .. }
            | StorageOp::ListInsert { clock: c, .. }
            | StorageOp::ListDelete { clock: c, .. }
            | StorageOp::ListMove { clock: c, .. } => *c = clock,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_serializes_with_op_tag() {
        let op = StorageOp::Set {
            path: vec![],
            key: "count".into(),
            value: CrdtValue::Json(json!(1)),
            clock: 1,
        };
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["op"], json!("set"));
        assert_eq!(v["key"], json!("count"));
    }

    #[test]
    fn with_clock_rewrites_clock_only() {
        let op = StorageOp::Delete { path: vec!["a".into()], key: "b".into(), clock: 1 };
        let rewritten = op.with_clock(7);
        assert_eq!(rewritten.clock(), 7);
    }
}
