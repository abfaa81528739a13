//! Token → instance registry for native callbacks.
//!
//! Native callbacks can only carry an opaque integer. The registry maps that
//! integer back to the owning instance's event sender without the native side
//! ever holding a reference to the instance itself.
//!
//! Tokens are `generation << 32 | slot`. Unregistering a token bumps its
//! slot's generation, so a stale token keeps failing to resolve even after
//! the slot is reused by a later instance.

use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::events::EventSender;

/// Opaque identifier handed to the native layer.
///
/// Raw value 0 is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceToken(u64);

impl InstanceToken {
    fn new(index: u32, generation: u32) -> Self {
        Self((u64::from(generation) << 32) | u64::from(index))
    }

    /// Rebuilds a token from the value the native layer handed back.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the value to hand to the native layer.
    pub fn as_raw(self) -> u64 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 & u64::from(u32::MAX)) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

struct Slot {
    generation: u32,
    sender: Option<EventSender>,
}

#[derive(Default)]
struct Slots {
    entries: Vec<Slot>,
    free: Vec<u32>,
}

/// Arena of live instances, indexed by [`InstanceToken`].
#[derive(Default)]
pub struct InstanceRegistry {
    slots: Mutex<Slots>,
}

static GLOBAL_REGISTRY: LazyLock<Arc<InstanceRegistry>> =
    LazyLock::new(|| Arc::new(InstanceRegistry::new()));

impl InstanceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry.
    pub fn global() -> &'static Arc<InstanceRegistry> {
        &GLOBAL_REGISTRY
    }

    /// Allocates a token that resolves to `sender` until unregistered.
    pub fn register(&self, sender: EventSender) -> InstanceToken {
        let mut slots = self.slots.lock();
        let token = match slots.free.pop() {
            Some(index) => {
                let slot = &mut slots.entries[index as usize];
                slot.sender = Some(sender);
                InstanceToken::new(index, slot.generation)
            }
            None => {
                let index = slots.entries.len() as u32;
                slots.entries.push(Slot {
                    generation: 1,
                    sender: Some(sender),
                });
                InstanceToken::new(index, 1)
            }
        };
        debug!(token = token.as_raw(), "registered instance");
        token
    }

    /// Returns the instance's sender, or `None` if the token is not live.
    pub fn resolve(&self, token: InstanceToken) -> Option<EventSender> {
        let slots = self.slots.lock();
        slots
            .entries
            .get(token.index())
            .filter(|slot| slot.generation == token.generation())
            .and_then(|slot| slot.sender.clone())
    }

    /// Invalidates `token`. Returns false if it was not live.
    pub fn unregister(&self, token: InstanceToken) -> bool {
        let mut slots = self.slots.lock();
        let index = token.index();
        let Some(slot) = slots.entries.get_mut(index) else {
            return false;
        };
        if slot.generation != token.generation() || slot.sender.is_none() {
            return false;
        }
        slot.sender = None;
        // Generation 0 is skipped so no token has raw value 0
        slot.generation = slot.generation.wrapping_add(1).max(1);
        slots.free.push(index as u32);
        debug!(token = token.as_raw(), "unregistered instance");
        true
    }

    /// Returns the number of live tokens.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock();
        slots.entries.len() - slots.free.len()
    }

    /// Returns true if no token is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
