//! Per-room CRDT storage: the document tree plus its undo/redo history.

pub mod document;
pub mod history;

pub use document::{empty_list, empty_map, empty_object, StorageDocument};
pub use history::HistoryManager;
