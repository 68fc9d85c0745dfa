//! Deep-subscription dispatch: shallow subscribers at the exact path, deep
//! subscribers at every ancestor. Grounded on design note
//! "Deep-subscription dispatch" — subscriber sets are snapshotted before
//! iteration so a callback that mutates the document (and thus the
//! subscriber set) cannot invalidate the in-flight notification pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::op::Path;

pub type SubscriberId = u64;

/// A subscriber callback. Receives the path that actually changed (which,
/// for a deep subscriber, may be a descendant of the subscribed path).
pub type Subscriber = Arc<dyn Fn(&Path) + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Shallow,
    Deep,
}

struct Entry {
    id: SubscriberId,
    depth: Depth,
    callback: Subscriber,
}

/// Per-document registry of path -> subscribers. Paths are joined with `\0`
/// (not a valid path-segment character in practice) to use as a flat map
/// key, avoiding a full trie for a workload where subscription depth is
/// shallow in practice.
#[derive(Default)]
pub struct SubscriptionRegistry {
    by_path: HashMap<String, Vec<Entry>>,
    next_id: AtomicU64,
}

fn path_key(path: &Path) -> String {
    path.join("\0")
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, path: &Path, depth: Depth, callback: Subscriber) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.by_path.entry(path_key(path)).or_default().push(Entry { id, depth, callback });
        id
    }

    pub fn unsubscribe(&mut self, path: &Path, id: SubscriberId) {
        if let Some(entries) = self.by_path.get_mut(&path_key(path)) {
            entries.retain(|e| e.id != id);
        }
    }

    /// Fire subscribers for a mutation at `changed_path`: shallow
    /// subscribers exactly at `changed_path`, then deep subscribers at every
    /// ancestor (including the root, the empty path).
    pub fn notify(&self, changed_path: &Path) {
        // Snapshot matching callbacks up front so a subscriber that mutates
        // the document (adding/removing subscriptions) cannot affect this pass.
        let mut fire: Vec<Subscriber> = Vec::new();

        if let Some(entries) = self.by_path.get(&path_key(changed_path)) {
            for e in entries {
                fire.push(e.callback.clone());
            }
        }

        for depth in 0..changed_path.len() {
            let ancestor: Path = changed_path[..depth].to_vec();
            if let Some(entries) = self.by_path.get(&path_key(&ancestor)) {
                for e in entries {
                    if e.depth == Depth::Deep {
                        fire.push(e.callback.clone());
                    }
                }
            }
        }

        for cb in fire {
            cb(changed_path);
        }
    }
}
