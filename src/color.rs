//! Deterministic presence color assignment.
//!
//! `color = PALETTE[fnv1a(userId) % PALETTE.len()]`. FNV-1a gives a cheap,
//! dependency-free, stable hash across process restarts (unlike
//! `std::collections::hash_map::RandomState`, which is seeded per-process).

const PALETTE: &[&str] = &[
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#008080", "#e6beff",
];

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Deterministic color for a given user id, stable across calls and restarts.
pub fn color_for_user(user_id: &str) -> &'static str {
    let hash = fnv1a(user_id.as_bytes());
    PALETTE[(hash as usize) % PALETTE.len()]
}
