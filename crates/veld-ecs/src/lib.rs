//! Veld ECS -- archetype-based entity-component runtime with type-erased
//! component storage.
//!
//! Entities are generation-tagged 32-bit handles carrying a heterogeneous
//! set of components; components are plain value types described at runtime
//! by size, alignment, and optional init/copy/destroy callbacks. Entities
//! with the exact same component set share one columnar archetype table, so
//! iteration walks densely packed columns. Structural operations apply to
//! storage immediately but their iterator-visible effects are deferred to an
//! explicit [`flush_events`](world::World::flush_events) point, and prefab
//! templates on the [`Registry`](registry::Registry) clone default component
//! values into freshly spawned rows.
//!
//! The core exposes raw-pointer accessors at its boundary; typed wrappers
//! belong to host layers.
//!
//! # Quick start
//!
//! ```
//! use veld_ecs::prelude::*;
//!
//! #[repr(C)]
//! #[derive(Clone, Copy)]
//! struct Position { x: f32, y: f32 }
//!
//! let mut registry = Registry::new();
//! let position = registry.register_component(ComponentInfo::of::<Position>("Position"));
//!
//! let mut world = World::new(&registry);
//! let entity = world.spawn_entity(EntityInfo::default());
//! let ptr = world.add_component(&registry, entity, position) as *mut Position;
//! unsafe { (*ptr).x = 3.0; }
//! world.flush_events();
//!
//! let it = world.acquire_iterator();
//! world.iter_component(it, position, 0);
//! world.iter_finalize(it);
//!
//! world.iter_begin(it);
//! let mut visited = 0;
//! while world.iter_advance(it) {
//!     let p = world.iter_argument(it, 0) as *const Position;
//!     assert_eq!(unsafe { (*p).x }, 3.0);
//!     visited += 1;
//! }
//! assert_eq!(visited, 1);
//! world.release_iterator(it);
//! ```

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod alloc;
pub mod arena;
#[allow(unsafe_code)]
pub mod archetype;
pub mod bitset;
#[allow(unsafe_code)]
pub mod component;
pub mod entity;
pub mod query;
#[allow(unsafe_code)]
pub mod registry;
#[allow(unsafe_code)]
pub mod world;

use crate::component::ComponentId;
use crate::entity::EntityId;
use crate::registry::PrefabId;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Failure kinds of the core.
///
/// The core is a library primitive designed to be wrapped: misuse is a
/// programming bug, not a runtime condition, so every kind is fatal -- public
/// operations panic with the error's display text. Surface layers may
/// translate the panics into host-native errors.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A descriptor or parameter failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An entity handle whose generation no longer matches its slot.
    #[error("entity {0:?} is stale or was never allocated")]
    StaleEntity(EntityId),
    /// A prefab handle whose generation no longer matches its slot.
    #[error("prefab {0:?} is stale or was never allocated")]
    StalePrefab(PrefabId),
    /// A component id outside the registry's table.
    #[error("component {0:?} is not registered")]
    UnknownComponent(ComponentId),
    /// A component lookup on an entity, prefab, or table that does not carry
    /// it.
    #[error("component {0:?} is not present")]
    MissingComponent(ComponentId),
    /// An operation issued against an object in the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

#[cold]
#[track_caller]
pub(crate) fn fatal(error: EcsError) -> ! {
    panic!("{error}")
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::alloc::{default_allocator, AllocatorHandle, DefaultAllocator, RawAllocator};
    pub use crate::archetype::ArchetypeId;
    pub use crate::bitset::BitSet;
    pub use crate::component::{ComponentId, ComponentInfo, ComponentMember};
    pub use crate::entity::{EntityId, EntityStatus};
    pub use crate::query::{FilterMode, IteratorId};
    pub use crate::registry::{PrefabId, Registry};
    pub use crate::world::{EntityInfo, World, WorldEvent};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------------
