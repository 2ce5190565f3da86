//! Entity identifiers and lifecycle status.
//!
//! An [`EntityId`] is a 32-bit handle that packs an 8-bit *generation* in the
//! high byte and a 24-bit slot *index* in the low bytes. A handle is valid
//! iff its generation matches the generation stored in the backing slot,
//! which gives immediate stale-handle detection across slot reuse.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::arena;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A generational entity handle.
///
/// Layout: `[generation: u8 | index: u24]`. The all-ones value is the
/// [`INVALID`](Self::INVALID) sentinel and never refers to a live entity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(u32);

impl EntityId {
    /// The all-ones sentinel.
    pub const INVALID: EntityId = EntityId(u32::MAX);

    /// Construct from an index and generation.
    #[inline]
    pub fn new(index: u32, generation: u8) -> Self {
        Self(arena::pack(index, generation))
    }

    /// The slot index (low 24 bits).
    #[inline]
    pub fn index(self) -> u32 {
        arena::unpack_index(self.0)
    }

    /// The generation tag (high 8 bits).
    #[inline]
    pub fn generation(self) -> u8 {
        arena::unpack_generation(self.0)
    }

    #[inline]
    pub fn is_invalid(self) -> bool {
        self.0 == u32::MAX
    }

    /// Raw `u32` representation.
    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }

    /// Reconstruct from a raw `u32`.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "EntityId(INVALID)")
        } else {
            write!(f, "EntityId({}v{})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an entity within a world cycle.
///
/// Entities are spawned as `NewlySpawned`, promoted to `Spawned` when the
/// spawn event is flushed, and parked in `Destroying` between
/// [`destroy_entity`](crate::world::World::destroy_entity) and the flush that
/// releases their row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    NewlySpawned,
    Spawned,
    Destroying,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrip() {
        let id = EntityId::new(123_456, 42);
        assert_eq!(id.index(), 123_456);
        assert_eq!(id.generation(), 42);
        assert_eq!(EntityId::from_raw(id.to_raw()), id);
    }

    #[test]
    fn invalid_sentinel() {
        assert!(EntityId::INVALID.is_invalid());
        assert_eq!(EntityId::INVALID.to_raw(), 0xFFFF_FFFF);
        assert!(!EntityId::new(0, 0).is_invalid());
    }

    #[test]
    fn debug_formats_index_and_generation() {
        let id = EntityId::new(7, 3);
        assert_eq!(format!("{id:?}"), "EntityId(7v3)");
        assert_eq!(format!("{id}"), "7v3");
    }
}
