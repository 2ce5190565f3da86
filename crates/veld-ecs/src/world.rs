//! The [`World`] owns entities, archetype tables, the event queue, and the
//! iterator pool, and performs structural mutation by moving rows between
//! archetypes.
//!
//! Structural operations take effect immediately on storage, but their
//! iterator-visible consequences are deferred: every operation appends a
//! [`WorldEvent`] and [`World::flush_events`] reconciles the queue at an
//! explicit point in the cycle. Iteration itself reads straight from
//! archetype columns, so there is no event traffic on the hot path.

use tracing::{debug, trace};

use crate::alloc::AllocatorHandle;
use crate::archetype::{Archetype, ArchetypeId, Table};
use crate::arena::GenArena;
use crate::bitset::BitSet;
use crate::component::ComponentId;
use crate::entity::{EntityId, EntityStatus};
use crate::fatal;
use crate::query::{IteratorId, IteratorStatus, QueryIterator};
use crate::registry::{PrefabId, Registry};
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityInfo / EntityRecord
// ---------------------------------------------------------------------------

/// Optional spawn-time details for an entity.
#[derive(Debug, Clone, Default)]
pub struct EntityInfo {
    /// Debug name, duplicated into world-owned storage.
    pub name: Option<String>,
}

impl EntityInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// Per-entity bookkeeping stored in the world's slot table.
pub(crate) struct EntityRecord {
    pub(crate) name: Option<String>,
    pub(crate) status: EntityStatus,
    /// `None` for entities with an empty component set.
    pub(crate) archetype: Option<ArchetypeId>,
    pub(crate) row: usize,
    pub(crate) prefab: PrefabId,
}

// ---------------------------------------------------------------------------
// WorldEvent
// ---------------------------------------------------------------------------

/// A deferred record of one structural operation, drained in FIFO order by
/// [`World::flush_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldEvent {
    NewEntity(EntityId),
    DestroyEntity(EntityId),
    NewComponent {
        entity: EntityId,
        component: ComponentId,
    },
    UpdateComponent {
        entity: EntityId,
        component: ComponentId,
    },
    DestroyComponent {
        entity: EntityId,
        component: ComponentId,
    },
    NewArchetype(ArchetypeId),
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Container for entities and their component storage.
///
/// A world is created from a [`Registry`] and borrows it again for the
/// operations that can mint new archetypes; component descriptors are cached
/// per column at archetype creation, so everything else runs without the
/// registry. A world must not be used with a registry other than the one its
/// component ids came from.
pub struct World {
    alloc: AllocatorHandle,
    entities: GenArena<EntityRecord>,
    pub(crate) archetypes: Vec<Archetype>,
    events: Vec<WorldEvent>,
    pub(crate) iterators: Vec<QueryIterator>,
    reusable_iterators: Vec<IteratorId>,
}

impl World {
    /// World sharing the registry's allocator.
    pub fn new(registry: &Registry) -> Self {
        Self::with_allocator(registry.allocator().clone())
    }

    /// World with its own component-memory allocator.
    pub fn with_allocator(alloc: AllocatorHandle) -> Self {
        Self {
            alloc,
            entities: GenArena::new(),
            archetypes: Vec::new(),
            events: Vec::new(),
            iterators: Vec::new(),
            reusable_iterators: Vec::new(),
        }
    }

    // -- entity lookup ------------------------------------------------------

    fn record(&self, entity: EntityId) -> &EntityRecord {
        self.entities
            .get(entity.to_raw())
            .unwrap_or_else(|| fatal(EcsError::StaleEntity(entity)))
    }

    fn record_mut(&mut self, entity: EntityId) -> &mut EntityRecord {
        self.entities
            .get_mut(entity.to_raw())
            .unwrap_or_else(|| fatal(EcsError::StaleEntity(entity)))
    }

    /// Whether `entity` is a live handle (generation matches its slot).
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.contains(entity.to_raw())
    }

    /// Number of live entity slots, including those parked in `Destroying`
    /// until the next flush.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn archetype(&self, archetype: ArchetypeId) -> &Archetype {
        &self.archetypes[archetype.index()]
    }

    pub fn entity_status(&self, entity: EntityId) -> EntityStatus {
        self.record(entity).status
    }

    pub fn entity_name(&self, entity: EntityId) -> Option<&str> {
        self.record(entity).name.as_deref()
    }

    /// The prefab the entity was spawned from, or
    /// [`PrefabId::INVALID`](crate::registry::PrefabId::INVALID).
    pub fn entity_prefab(&self, entity: EntityId) -> PrefabId {
        self.record(entity).prefab
    }

    /// Number of components the entity currently carries.
    pub fn entity_component_count(&self, entity: EntityId) -> usize {
        match self.record(entity).archetype {
            Some(archetype) => self.archetypes[archetype.index()].table.bits().count_ones(),
            None => 0,
        }
    }

    // -- archetype management -----------------------------------------------

    /// Find the archetype for `bits`, creating it (and enqueueing
    /// [`WorldEvent::NewArchetype`]) when it does not exist yet. The empty
    /// set has no archetype.
    pub(crate) fn find_or_create_archetype(
        &mut self,
        registry: &Registry,
        bits: &BitSet,
    ) -> Option<ArchetypeId> {
        if bits.is_empty() {
            return None;
        }
        if let Some(index) = self
            .archetypes
            .iter()
            .position(|archetype| archetype.table.bits() == bits)
        {
            return Some(ArchetypeId(index as u32));
        }

        let id = ArchetypeId(self.archetypes.len() as u32);
        let table = Table::new(self.alloc.clone(), bits.clone(), registry);
        debug!(
            archetype = id.to_raw(),
            components = bits.count_ones(),
            "created archetype"
        );
        self.archetypes.push(Archetype::new(table));
        self.events.push(WorldEvent::NewArchetype(id));
        Some(id)
    }

    // -- row moves ----------------------------------------------------------

    /// Release `row` of `archetype` and repair the row-to-entity mapping for
    /// the entity whose row was relocated by the swap-remove.
    fn free_entity_row(&mut self, archetype_id: ArchetypeId, row: usize) {
        let archetype = &mut self.archetypes[archetype_id.index()];
        let relocated = archetype.table.free_row(row);
        archetype.entities.swap_remove(row);
        if row < archetype.entities.len() {
            debug_assert_eq!(relocated, archetype.entities.len());
            let moved = archetype.entities[row];
            if let Some(record) = self.entities.get_mut(moved.to_raw()) {
                record.row = row;
            }
        }
    }

    /// Move an entity's row to `dst` (or to "no archetype" when `dst` is
    /// `None`). Components present on both sides keep their values via
    /// `copy`; destination-only components are initialized by the row
    /// allocation; source-only components are destroyed by the row release.
    fn move_entity_to_archetype(&mut self, entity: EntityId, dst: Option<ArchetypeId>) {
        let (src, src_row) = {
            let record = self.record(entity);
            (record.archetype, record.row)
        };
        debug_assert_ne!(src, dst, "moving an entity onto its own archetype");

        let Some(dst_id) = dst else {
            if let Some(src_id) = src {
                self.free_entity_row(src_id, src_row);
            }
            let record = self.record_mut(entity);
            record.archetype = None;
            record.row = 0;
            return;
        };

        let dst_row = self.archetypes[dst_id.index()].table.allocate_row();
        if let Some(src_id) = src {
            let (src_arch, dst_arch) = two_archetypes(&mut self.archetypes, src_id, dst_id);
            src_arch.table.copy_row_to(src_row, &mut dst_arch.table, dst_row);
            self.free_entity_row(src_id, src_row);
        }

        let archetype = &mut self.archetypes[dst_id.index()];
        debug_assert_eq!(dst_row, archetype.entities.len());
        archetype.entities.push(entity);

        let record = self.record_mut(entity);
        record.archetype = Some(dst_id);
        record.row = dst_row;
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Spawn an entity with no components.
    pub fn spawn_entity(&mut self, info: EntityInfo) -> EntityId {
        self.spawn_inner(None, info)
    }

    /// Spawn an entity from a prefab template, copying every prefab blob
    /// into the fresh row. [`PrefabId::INVALID`] spawns an empty entity.
    pub fn spawn_entity_prefab(
        &mut self,
        registry: &Registry,
        prefab: PrefabId,
        info: EntityInfo,
    ) -> EntityId {
        if prefab.is_invalid() {
            return self.spawn_inner(None, info);
        }
        self.spawn_inner(Some((registry, prefab)), info)
    }

    fn spawn_inner(&mut self, prefab: Option<(&Registry, PrefabId)>, info: EntityInfo) -> EntityId {
        let record = EntityRecord {
            name: info.name,
            status: EntityStatus::NewlySpawned,
            archetype: None,
            row: 0,
            prefab: prefab.map(|(_, id)| id).unwrap_or(PrefabId::INVALID),
        };
        let entity = EntityId::from_raw(self.entities.insert(record));

        if let Some((registry, prefab_id)) = prefab {
            let bits = registry.prefab(prefab_id).bitset.clone();
            if !bits.is_empty() {
                let archetype_id = self
                    .find_or_create_archetype(registry, &bits)
                    .expect("non-empty prefab set maps to an archetype");
                let row = self.archetypes[archetype_id.index()].table.allocate_row();

                let template = registry.prefab(prefab_id);
                let archetype = &mut self.archetypes[archetype_id.index()];
                for pc in &template.components {
                    let dst = archetype.table.component_ptr(pc.component, row);
                    let column_info = archetype.table.column_info(pc.component);
                    unsafe {
                        column_info.copy_value(pc.blob.as_ptr(), dst);
                    }
                }
                archetype.entities.push(entity);

                let record = self.record_mut(entity);
                record.archetype = Some(archetype_id);
                record.row = row;
            }
        }

        self.events.push(WorldEvent::NewEntity(entity));
        entity
    }

    /// Add `component` to `entity`, returning a pointer to the freshly
    /// (re)initialized slot.
    ///
    /// If the entity already carries the component, the existing value is
    /// destroyed and re-initialized in place and an `UpdateComponent` event
    /// is enqueued; otherwise the entity moves to the archetype with the
    /// component's bit OR-ed in and a `NewComponent` event is enqueued.
    ///
    /// # Panics
    ///
    /// Panics on a stale handle, an unknown component id, or an entity in
    /// `Destroying`.
    pub fn add_component(
        &mut self,
        registry: &Registry,
        entity: EntityId,
        component: ComponentId,
    ) -> *mut u8 {
        let (archetype, row, status) = {
            let record = self.record(entity);
            (record.archetype, record.row, record.status)
        };
        if status == EntityStatus::Destroying {
            fatal(EcsError::InvalidState(format!(
                "cannot add a component to {entity:?} while it is being destroyed"
            )));
        }

        if let Some(archetype_id) = archetype {
            if self.archetypes[archetype_id.index()]
                .table
                .has_component(component)
            {
                let table = &self.archetypes[archetype_id.index()].table;
                let ptr = table.component_ptr(component, row);
                let info = table.column_info(component);
                unsafe {
                    info.destroy_value(ptr);
                    info.init_value(ptr);
                }
                self.events
                    .push(WorldEvent::UpdateComponent { entity, component });
                return ptr;
            }
        }

        let mut bits = match archetype {
            Some(archetype_id) => self.archetypes[archetype_id.index()].table.bits().clone(),
            None => BitSet::new(),
        };
        bits.set(component.index());
        let dst = self.find_or_create_archetype(registry, &bits);
        self.move_entity_to_archetype(entity, dst);
        self.events
            .push(WorldEvent::NewComponent { entity, component });

        let record = self.record(entity);
        let archetype_id = record.archetype.expect("entity was just moved into an archetype");
        self.archetypes[archetype_id.index()]
            .table
            .component_ptr(component, record.row)
    }

    /// Remove `component` from `entity`. A no-op when the entity does not
    /// carry the component. Panics on a stale handle.
    pub fn remove_component(
        &mut self,
        registry: &Registry,
        entity: EntityId,
        component: ComponentId,
    ) {
        let Some(archetype_id) = self.record(entity).archetype else {
            return;
        };
        if !self.archetypes[archetype_id.index()]
            .table
            .has_component(component)
        {
            return;
        }

        let mut bits = self.archetypes[archetype_id.index()].table.bits().clone();
        bits.clear(component.index());
        let dst = self.find_or_create_archetype(registry, &bits);
        self.move_entity_to_archetype(entity, dst);
        self.events
            .push(WorldEvent::DestroyComponent { entity, component });
    }

    /// Whether the entity's archetype carries `component`.
    pub fn entity_has_component(&self, entity: EntityId, component: ComponentId) -> bool {
        match self.record(entity).archetype {
            Some(archetype_id) => self.archetypes[archetype_id.index()]
                .table
                .has_component(component),
            None => false,
        }
    }

    /// Pointer to the entity's value for `component`. Panics if the entity
    /// does not carry it.
    pub fn entity_get_component(&self, entity: EntityId, component: ComponentId) -> *mut u8 {
        let record = self.record(entity);
        let Some(archetype_id) = record.archetype else {
            fatal(EcsError::MissingComponent(component));
        };
        self.archetypes[archetype_id.index()]
            .table
            .component_ptr(component, record.row)
    }

    /// Mark `entity` for destruction at the next flush. Idempotent; the row
    /// stays in place (and visible to iterators) until then.
    pub fn destroy_entity(&mut self, entity: EntityId) {
        let record = self.record_mut(entity);
        if record.status == EntityStatus::Destroying {
            return;
        }
        record.status = EntityStatus::Destroying;
        self.events.push(WorldEvent::DestroyEntity(entity));
    }

    // -- flush --------------------------------------------------------------

    /// Drain the event queue in FIFO order and apply iterator-visible
    /// effects. Every event enqueued before this call is processed; nothing
    /// becomes visible to iterators until it returns.
    pub fn flush_events(&mut self) {
        let events = std::mem::take(&mut self.events);
        trace!(count = events.len(), "flushing world events");
        for event in events {
            match event {
                WorldEvent::NewEntity(entity) => {
                    self.record_mut(entity).status = EntityStatus::Spawned;
                }
                WorldEvent::DestroyEntity(entity) => {
                    let (archetype, row) = {
                        let record = self.record(entity);
                        (record.archetype, record.row)
                    };
                    if let Some(archetype_id) = archetype {
                        self.free_entity_row(archetype_id, row);
                    }
                    self.entities.remove(entity.to_raw());
                }
                // Structural state is already applied; reserved for future
                // index maintenance.
                WorldEvent::NewComponent { .. }
                | WorldEvent::UpdateComponent { .. }
                | WorldEvent::DestroyComponent { .. } => {}
                WorldEvent::NewArchetype(archetype_id) => {
                    let bits = self.archetypes[archetype_id.index()].table.bits();
                    for iterator in &mut self.iterators {
                        if iterator.status == IteratorStatus::Iterating
                            && iterator.matches(bits)
                            && !iterator.archetypes.contains(&archetype_id)
                        {
                            iterator.archetypes.push(archetype_id);
                        }
                    }
                }
            }
        }
    }

    /// Number of events waiting for the next flush.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    // -- iterator pool ------------------------------------------------------

    /// Take an iterator from the pool (or allocate one) in `Initializing`
    /// state, ready for filter specification.
    pub fn acquire_iterator(&mut self) -> IteratorId {
        let id = match self.reusable_iterators.pop() {
            Some(id) => id,
            None => {
                let id = IteratorId(self.iterators.len() as u32);
                self.iterators.push(QueryIterator::new());
                id
            }
        };
        let iterator = &mut self.iterators[id.index()];
        debug_assert_eq!(iterator.status, IteratorStatus::Released);
        iterator.status = IteratorStatus::Initializing;
        id
    }

    /// Clear an iterator's query state and return it to the pool. Releasing
    /// twice panics.
    pub fn release_iterator(&mut self, id: IteratorId) {
        let iterator = self
            .iterators
            .get_mut(id.index())
            .unwrap_or_else(|| fatal(EcsError::InvalidState(format!("unknown iterator {id:?}"))));
        if iterator.status == IteratorStatus::Released {
            fatal(EcsError::InvalidState(format!(
                "iterator {id:?} released twice"
            )));
        }
        iterator.clear();
        self.reusable_iterators.push(id);
    }
}

impl Drop for World {
    fn drop(&mut self) {
        // Apply anything still queued, then let the tables destroy their
        // live component values.
        self.flush_events();
        trace!(
            entities = self.entities.len(),
            archetypes = self.archetypes.len(),
            "dropping world"
        );
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities.len())
            .field("archetypes", &self.archetypes.len())
            .field("pending_events", &self.events.len())
            .finish()
    }
}

/// Disjoint mutable access to two different archetypes.
fn two_archetypes(
    archetypes: &mut [Archetype],
    a: ArchetypeId,
    b: ArchetypeId,
) -> (&mut Archetype, &mut Archetype) {
    let (ai, bi) = (a.index(), b.index());
    debug_assert_ne!(ai, bi);
    if ai < bi {
        let (left, right) = archetypes.split_at_mut(bi);
        (&mut left[ai], &mut right[0])
    } else {
        let (left, right) = archetypes.split_at_mut(ai);
        (&mut right[0], &mut left[bi])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
