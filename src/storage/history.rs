//! Undo/redo history: a stack of inverse-op batches with bounded depth,
//! batching, pause/resume, and the redo-stack-clears-on-new-edit rule.

use std::collections::VecDeque;

use crate::crdt::StorageOp;

const DEFAULT_MAX_ENTRIES: usize = 100;

#[derive(PartialEq, Eq, Clone, Copy)]
enum Mode {
    Normal,
    Paused,
    Capturing,
}

pub struct HistoryManager {
    undo_stack: VecDeque<Vec<StorageOp>>,
    redo_stack: VecDeque<Vec<StorageOp>>,
    max_entries: usize,
    mode: Mode,
    batch_depth: u32,
    current_batch: Vec<StorageOp>,
    capture_buffer: Vec<StorageOp>,
}

impl HistoryManager {
    pub fn new(max_entries: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_entries,
            mode: Mode::Normal,
            batch_depth: 0,
            current_batch: Vec::new(),
            capture_buffer: Vec::new(),
        }
    }

    /// Called by the document after each accepted local mutation, with the
    /// op that would undo it. No-op while paused.
    pub fn record(&mut self, inverse_op: StorageOp) {
        match self.mode {
            Mode::Paused => {}
            Mode::Capturing => self.capture_buffer.push(inverse_op),
            Mode::Normal => {
                if self.batch_depth > 0 {
                    self.current_batch.push(inverse_op);
                } else {
                    self.push_undo(vec![inverse_op]);
                }
            }
        }
    }

    pub fn pause(&mut self) {
        self.mode = Mode::Paused;
    }

    pub fn resume(&mut self) {
        self.mode = Mode::Normal;
    }

    /// Nested batches flatten: only the outermost `start_batch`/`end_batch`
    /// pair produces a stack entry.
    pub fn start_batch(&mut self) {
        self.batch_depth += 1;
    }

    pub fn end_batch(&mut self) {
        if self.batch_depth == 0 {
            return;
        }
        self.batch_depth -= 1;
        if self.batch_depth == 0 && !self.current_batch.is_empty() {
            let batch = std::mem::take(&mut self.current_batch);
            self.push_undo(batch);
        }
    }

    fn push_undo(&mut self, batch: Vec<StorageOp>) {
        self.undo_stack.push_back(batch);
        while self.undo_stack.len() > self.max_entries {
            self.undo_stack.pop_front();
        }
        self.redo_stack.clear();
    }

    fn push_redo_bounded(&mut self, batch: Vec<StorageOp>) {
        self.redo_stack.push_back(batch);
        while self.redo_stack.len() > self.max_entries {
            self.redo_stack.pop_front();
        }
    }

    /// Begin collecting ops generated while replaying an undo/redo batch,
    /// so they can be pushed onto the opposite stack instead of clearing it.
    pub fn begin_capture(&mut self) {
        self.mode = Mode::Capturing;
        self.capture_buffer.clear();
    }

    pub fn end_capture(&mut self) -> Vec<StorageOp> {
        self.mode = Mode::Normal;
        std::mem::take(&mut self.capture_buffer)
    }

    pub fn pop_undo(&mut self) -> Option<Vec<StorageOp>> {
        self.undo_stack.pop_back()
    }

    pub fn pop_redo(&mut self) -> Option<Vec<StorageOp>> {
        self.redo_stack.pop_back()
    }

    /// Used by `undo()`/`redo()` to push the just-captured forward/backward
    /// ops onto the opposite stack without clearing the stack being pushed to.
    pub fn push_redo(&mut self, batch: Vec<StorageOp>) {
        if !batch.is_empty() {
            self.push_redo_bounded(batch);
        }
    }

    pub fn push_undo_from_redo(&mut self, batch: Vec<StorageOp>) {
        if !batch.is_empty() {
            self.undo_stack.push_back(batch);
            while self.undo_stack.len() > self.max_entries {
                self.undo_stack.pop_front();
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(key: &str, v: i64) -> StorageOp {
        StorageOp::Set { path: vec![], key: key.into(), value: crate::crdt::CrdtValue::Json(json!(v)), clock: 1 }
    }

    #[test]
    fn single_mutation_pushes_one_entry() {
        let mut h = HistoryManager::new(100);
        h.record(op("x", 1));
        assert!(h.can_undo());
        assert_eq!(h.undo_depth(), 1);
    }

    #[test]
    fn batch_groups_multiple_captures_into_one_entry() {
        let mut h = HistoryManager::new(100);
        h.start_batch();
        h.record(op("x", 1));
        h.record(op("y", 2));
        h.end_batch();
        assert_eq!(h.undo_depth(), 1);
        let batch = h.pop_undo().unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn nested_batches_flatten() {
        let mut h = HistoryManager::new(100);
        h.start_batch();
        h.start_batch();
        h.record(op("x", 1));
        h.end_batch();
        h.record(op("y", 2));
        h.end_batch();
        assert_eq!(h.undo_depth(), 1);
        assert_eq!(h.pop_undo().unwrap().len(), 2);
    }

    #[test]
    fn pause_disables_capture_entirely() {
        let mut h = HistoryManager::new(100);
        h.pause();
        h.record(op("x", 1));
        assert!(!h.can_undo());
        h.resume();
        h.record(op("y", 1));
        assert!(h.can_undo());
    }

    #[test]
    fn new_mutation_clears_redo_stack() {
        let mut h = HistoryManager::new(100);
        h.record(op("x", 1));
        h.push_redo(vec![op("undo-of-x", 0)]);
        assert!(h.can_redo());
        h.record(op("y", 1));
        assert!(!h.can_redo());
    }

    #[test]
    fn max_entries_drops_oldest() {
        let mut h = HistoryManager::new(2);
        h.record(op("a", 1));
        h.record(op("b", 1));
        h.record(op("c", 1));
        assert_eq!(h.undo_depth(), 2);
    }

    #[test]
    fn capture_mode_buffers_without_touching_stacks() {
        let mut h = HistoryManager::new(100);
        h.record(op("a", 1));
        h.begin_capture();
        h.record(op("b", 2));
        let captured = h.end_capture();
        assert_eq!(captured.len(), 1);
        assert_eq!(h.undo_depth(), 1, "capture mode must not alter the undo stack");
    }
}
