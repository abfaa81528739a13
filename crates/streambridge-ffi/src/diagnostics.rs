//! Live-handle registry.
//!
//! Tracks live bridge pointers in a `HashSet<usize>` so
//! `sb_bridge_destroy` can reject pointers it never handed out and
//! catch double-frees of the same pointer.
//!
//! Address-only tracking cannot detect a stale pointer once the allocator
//! reuses the address for a new bridge.

use std::collections::HashSet;
use std::sync::LazyLock;

use parking_lot::Mutex;

static BRIDGE_REGISTRY: LazyLock<Mutex<HashSet<usize>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Registers a bridge pointer. Returns `false` if already registered (bug).
pub fn register_bridge(ptr: *const u8) -> bool {
    BRIDGE_REGISTRY.lock().insert(ptr as usize)
}

/// Unregisters a bridge pointer. Returns `false` if unknown (double-free attempt).
pub fn unregister_bridge(ptr: *const u8) -> bool {
    BRIDGE_REGISTRY.lock().remove(&(ptr as usize))
}

/// Returns the number of live bridges.
pub fn live_bridge_count() -> usize {
    BRIDGE_REGISTRY.lock().len()
}
