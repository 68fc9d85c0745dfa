//! `LiveList`: an ordered CRDT sequence positioned by fractional-index
//! strings rather than numeric indices, so concurrent inserts never need to
//! renumber peers.
//!
//! **Alphabet & bootstrap (documented per spec's Open Question):** positions
//! are strings over printable ASCII `0x20..=0x7E` (95 characters). The
//! bootstrap key, used when both `generateKeyBetween` endpoints are absent,
//! is the middle character of that range, `'O'` (digit 47 of 95).
//!
//! **Externally-supplied positions:** a position need not have come from
//! this module (it can arrive over the wire from a peer). Digits are one
//! per `char` (Unicode scalar value) rather than one per byte, computed
//! without clamping into the 95-entry alphabet — UTF-8 byte order mirrors
//! codepoint order, so this keeps `String`'s own `Ord` impl, and two
//! distinct external positions (including ones containing non-ASCII
//! characters) never collapse onto the same digit sequence. A position
//! generated strictly between two such inputs may itself contain
//! characters outside the printable alphabet; it is still a valid order
//! point strictly between them, except within the UTF-16 surrogate gap
//! (`U+D800..=U+DFFF`, not a valid `char` value), where the generated
//! digit is nudged to the nearest valid codepoint below it.

use serde::{Deserialize, Serialize};

use super::value::CrdtValue;

/// Tagged snapshot of one list item, used by `LiveList::serialize`/`apply_snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedListItem {
    pub id: String,
    pub position: String,
    pub value: CrdtValue,
    pub clock: u64,
    pub deleted: bool,
}

const MIN_CHAR: u8 = 0x20;
const MAX_CHAR: u8 = 0x7E;
const RADIX: i32 = (MAX_CHAR - MIN_CHAR) as i32 + 1; // 95
const MID_DIGIT: i32 = RADIX / 2; // 47 -> 'O'

const MAX_CODEPOINT: i32 = 0x10FFFF;
const SURROGATE_LOW: i32 = 0xD800;
const SURROGATE_HIGH: i32 = 0xDFFF;

// Sentinels for "this position has no digit here" in `key_mid`. A digit
// is `char as i32 - MIN_CHAR as i32`, so the real digit range is exactly
// `MIN_DIGIT..=MAX_DIGIT`; these sentinels sit one step outside that whole
// range on either side, the same way the original 95-entry scheme used
// `-1`/`RADIX` just outside `0..RADIX`. Exhaustion is tracked by index,
// never inferred from a digit's sign.
const MIN_DIGIT: i32 = 0 - MIN_CHAR as i32;
const MAX_DIGIT: i32 = MAX_CODEPOINT - MIN_CHAR as i32;
const NEG_INF: i32 = MIN_DIGIT - 1;
const POS_INF: i32 = MAX_DIGIT + 1;

/// Digit per `char`, unclamped: `char as i32 - MIN_CHAR as i32`. Codepoints
/// this module itself generates always land in `0..RADIX`, but an
/// externally supplied position can carry any character, including
/// non-ASCII ones — those still map injectively and order-preservingly
/// (UTF-8 byte order mirrors codepoint order), so two distinct positions
/// never collapse onto the same digit sequence.
fn to_digits(s: &str) -> Vec<i32> {
    s.chars().map(|c| c as i32 - MIN_CHAR as i32).collect()
}

fn from_digits(digits: &[i32]) -> String {
    digits.iter().map(|&d| digit_to_char(d)).collect()
}

fn digit_to_char(d: i32) -> char {
    let mut cp = (d + MIN_CHAR as i32).clamp(0, MAX_CODEPOINT);
    if (SURROGATE_LOW..=SURROGATE_HIGH).contains(&cp) {
        cp = SURROGATE_LOW - 1;
    }
    char::from_u32(cp as u32).unwrap_or(char::REPLACEMENT_CHARACTER)
}

fn key_after(a: &[i32]) -> Vec<i32> {
    let mut r = a.to_vec();
    r.push(MID_DIGIT);
    r
}

fn key_mid(a: &[i32], b: &[i32]) -> Vec<i32> {
    let mut result = Vec::new();
    let mut i = 0usize;
    loop {
        let a_exhausted = i >= a.len();
        let b_exhausted = i >= b.len();
        let da = if a_exhausted { NEG_INF } else { a[i] };
        let db = if b_exhausted { POS_INF } else { b[i] };
        if !a_exhausted && !b_exhausted && da == db {
            result.push(da);
            i += 1;
            continue;
        }
        if db - da >= 2 {
            let mid = da + (db - da) / 2;
            result.push(mid);
            return result;
        }
        // gap == 1
        if !a_exhausted {
            // a has a real digit here; the only room is above all of a.
            return key_after(a);
        }
        // a is exhausted exactly at this prefix and b's digit is the
        // minimum reachable one; no room yet, go one level deeper into b.
        i += 1;
    }
}

/// `generateKeyBetween(a, b)`: see module docs for alphabet/bootstrap.
pub fn generate_key_between(a: Option<&str>, b: Option<&str>) -> String {
    match (a, b) {
        (None, None) => from_digits(&[MID_DIGIT]),
        (None, Some(b)) => from_digits(&key_mid(&[], &to_digits(b))),
        (Some(a), None) => from_digits(&key_after(&to_digits(a))),
        (Some(a), Some(b)) => from_digits(&key_mid(&to_digits(a), &to_digits(b))),
    }
}

/// `generateNKeysBetween`: `n` strictly increasing keys, all strictly
/// between `a` and `b`.
pub fn generate_n_keys_between(a: Option<&str>, b: Option<&str>, n: usize) -> Vec<String> {
    let mut keys = Vec::with_capacity(n);
    let mut prev = a.map(|s| s.to_string());
    for _ in 0..n {
        let next = generate_key_between(prev.as_deref(), b);
        keys.push(next.clone());
        prev = Some(next);
    }
    keys
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: String,
    pub position: String,
    pub value: CrdtValue,
    pub clock: u64,
    pub deleted: bool,
}

/// Ordered CRDT sequence. Total order is `(position, id)` — position is the
/// primary sort key per spec.md §3; `id` breaks ties when two items share a
/// position (a degenerate case this module's own generator avoids, but
/// which can arise from externally supplied positions since payload schema
/// validation is explicitly out of scope).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveList {
    items: Vec<ListItem>,
}

impl LiveList {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    fn sort(&mut self) {
        self.items.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
    }

    fn find(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|i| i.id == id)
    }

    /// Idempotent on `id`. Clock-guarded: a later insert of the same id with
    /// a stale clock is dropped.
    pub fn insert(&mut self, id: &str, position: &str, value: CrdtValue, clock: u64) -> bool {
        if let Some(idx) = self.find(id) {
            if clock <= self.items[idx].clock {
                return false;
            }
            self.items[idx].position = position.to_string();
            self.items[idx].value = value;
            self.items[idx].clock = clock;
            self.items[idx].deleted = false;
        } else {
            self.items.push(ListItem {
                id: id.to_string(),
                position: position.to_string(),
                value,
                clock,
                deleted: false,
            });
        }
        self.sort();
        true
    }

    pub fn delete(&mut self, id: &str, clock: u64) -> bool {
        let Some(idx) = self.find(id) else { return false };
        if clock <= self.items[idx].clock {
            return false;
        }
        self.items[idx].clock = clock;
        self.items[idx].deleted = true;
        true
    }

    pub fn move_item(&mut self, id: &str, position: &str, clock: u64) -> bool {
        let Some(idx) = self.find(id) else { return false };
        if clock <= self.items[idx].clock {
            return false;
        }
        self.items[idx].position = position.to_string();
        self.items[idx].clock = clock;
        self.sort();
        true
    }

    pub fn get(&self, id: &str) -> Option<&ListItem> {
        self.find(id).map(|idx| &self.items[idx])
    }

    /// Overwrite an item's value without touching its clock. See
    /// `LiveObject::set_raw` for why.
    pub fn set_value_raw(&mut self, id: &str, value: CrdtValue) {
        if let Some(idx) = self.find(id) {
            self.items[idx].value = value;
        }
    }

    /// Live (non-tombstoned) items in position order.
    pub fn live_items(&self) -> impl Iterator<Item = &ListItem> {
        self.items.iter().filter(|i| !i.deleted)
    }

    pub fn len(&self) -> usize {
        self.live_items().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position immediately before the first live item, or before the first
    /// tombstone if the list is otherwise empty.
    pub fn position_before_first(&self) -> Option<&str> {
        self.items.first().map(|i| i.position.as_str())
    }

    pub fn position_after_last(&self) -> Option<&str> {
        self.items.last().map(|i| i.position.as_str())
    }

    pub fn serialize(&self) -> Vec<SerializedListItem> {
        self.items
            .iter()
            .map(|i| SerializedListItem {
                id: i.id.clone(),
                position: i.position.clone(),
                value: i.value.clone(),
                clock: i.clock,
                deleted: i.deleted,
            })
            .collect()
    }

    pub fn apply_snapshot(&mut self, items: Vec<SerializedListItem>) {
        self.items = items
            .into_iter()
            .map(|i| ListItem {
                id: i.id,
                position: i.position,
                value: i.value,
                clock: i.clock,
                deleted: i.deleted,
            })
            .collect();
        self.sort();
    }
}
