//! Query iterators: declarative filters compiled to an archetype match list,
//! streaming matching rows.
//!
//! Iterators are pooled on their world and addressed by [`IteratorId`], so a
//! query can stay live while the world is mutated underneath it; the effects
//! of new archetypes on the match list are applied at the next
//! [`flush_events`](World::flush_events). The protocol is:
//!
//! 1. [`World::acquire_iterator`]
//! 2. [`World::iter_filter`] / [`World::iter_component`] per slot
//! 3. [`World::iter_finalize`] (freezes the query)
//! 4. [`World::iter_begin`], then [`World::iter_advance`] until it returns
//!    `false`, fetching [`World::iter_argument`] / [`World::iter_entity`]
//!    per row
//! 5. [`World::release_iterator`]
//!
//! An archetype `A` matches a query `Q` iff `Q.required ⊆ A.bits` and
//! `Q.forbidden ∩ A.bits = ∅`. A query with no filters matches every
//! archetype; archetypes without rows are skipped while advancing.

use crate::archetype::ArchetypeId;
use crate::bitset::BitSet;
use crate::component::ComponentId;
use crate::entity::EntityId;
use crate::fatal;
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// IteratorId / FilterMode
// ---------------------------------------------------------------------------

/// Handle to a pooled iterator of one world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IteratorId(pub(crate) u32);

impl IteratorId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a filtered component takes part in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Require the component and expose a pointer to it.
    Access,
    /// Require the component without exposing it; fetching the slot yields
    /// null.
    With,
    /// Select only entities *without* the component. The slot cannot be
    /// fetched.
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IteratorStatus {
    Released,
    Initializing,
    Iterating,
}

// ---------------------------------------------------------------------------
// QueryIterator
// ---------------------------------------------------------------------------

/// Pooled query state. Zeroed on release and recycled by the world so
/// repeated acquire/release does not allocate.
pub(crate) struct QueryIterator {
    pub(crate) status: IteratorStatus,
    /// Slot bindings by argument index.
    slots: Vec<Option<(ComponentId, FilterMode)>>,
    required: BitSet,
    forbidden: BitSet,
    /// Matching archetypes, in creation order. Extended at flush time when
    /// new archetypes appear.
    pub(crate) archetypes: Vec<ArchetypeId>,
    cursor_archetype: usize,
    /// Rows consumed in the current archetype; 0 means "not yet advanced".
    cursor_row: usize,
}

impl QueryIterator {
    pub(crate) fn new() -> Self {
        Self {
            status: IteratorStatus::Released,
            slots: Vec::new(),
            required: BitSet::new(),
            forbidden: BitSet::new(),
            archetypes: Vec::new(),
            cursor_archetype: 0,
            cursor_row: 0,
        }
    }

    /// Reset to the released, empty state, keeping allocations.
    pub(crate) fn clear(&mut self) {
        self.status = IteratorStatus::Released;
        self.slots.clear();
        self.required.clear_all();
        self.forbidden.clear_all();
        self.archetypes.clear();
        self.cursor_archetype = 0;
        self.cursor_row = 0;
    }

    /// The match predicate over an archetype's component set.
    pub(crate) fn matches(&self, bits: &BitSet) -> bool {
        self.required.is_subset_of(bits) && self.forbidden.is_disjoint(bits)
    }
}

// ---------------------------------------------------------------------------
// World iterator methods
// ---------------------------------------------------------------------------

impl World {
    pub(crate) fn iterator(&self, id: IteratorId) -> &QueryIterator {
        self.iterators
            .get(id.index())
            .unwrap_or_else(|| fatal(EcsError::InvalidState(format!("unknown iterator {id:?}"))))
    }

    fn iterator_mut(&mut self, id: IteratorId) -> &mut QueryIterator {
        self.iterators
            .get_mut(id.index())
            .unwrap_or_else(|| fatal(EcsError::InvalidState(format!("unknown iterator {id:?}"))))
    }

    /// Bind `slot` of the yielded tuple to `component` under `mode`.
    ///
    /// Only legal while the iterator is `Initializing`; changing a finalized
    /// query requires releasing the iterator and acquiring a new one.
    pub fn iter_filter(
        &mut self,
        id: IteratorId,
        component: ComponentId,
        mode: FilterMode,
        slot: usize,
    ) {
        let iterator = self.iterator_mut(id);
        if iterator.status != IteratorStatus::Initializing {
            fatal(EcsError::InvalidState(
                "cannot change the filters of a finalized iterator".to_owned(),
            ));
        }
        match mode {
            FilterMode::Access | FilterMode::With => iterator.required.set(component.index()),
            FilterMode::Not => iterator.forbidden.set(component.index()),
        }
        if iterator.slots.len() <= slot {
            iterator.slots.resize(slot + 1, None);
        }
        iterator.slots[slot] = Some((component, mode));
    }

    /// Shorthand for [`iter_filter`](Self::iter_filter) with
    /// [`FilterMode::Access`].
    pub fn iter_component(&mut self, id: IteratorId, component: ComponentId, slot: usize) {
        self.iter_filter(id, component, FilterMode::Access, slot);
    }

    /// Freeze the query: compute its bitsets, walk the world's archetypes
    /// once to build the match list, and transition to `Iterating`.
    pub fn iter_finalize(&mut self, id: IteratorId) {
        let World {
            archetypes,
            iterators,
            ..
        } = self;
        let iterator = iterators
            .get_mut(id.index())
            .unwrap_or_else(|| fatal(EcsError::InvalidState(format!("unknown iterator {id:?}"))));
        if iterator.status != IteratorStatus::Initializing {
            fatal(EcsError::InvalidState(
                "cannot finalize an iterator twice; release it and acquire a new one".to_owned(),
            ));
        }
        iterator.status = IteratorStatus::Iterating;
        for (index, archetype) in archetypes.iter().enumerate() {
            if iterator.matches(archetype.table.bits()) {
                iterator.archetypes.push(ArchetypeId(index as u32));
            }
        }
    }

    /// Reset the cursor to the first archetype and row. May be called any
    /// number of times on a finalized iterator.
    pub fn iter_begin(&mut self, id: IteratorId) {
        let iterator = self.iterator_mut(id);
        if iterator.status != IteratorStatus::Iterating {
            fatal(EcsError::InvalidState(
                "cannot begin an iterator that has not been finalized".to_owned(),
            ));
        }
        iterator.cursor_archetype = 0;
        iterator.cursor_row = 0;
    }

    /// Step to the next matching row: row-major within the current
    /// archetype, then on to the next archetype that has rows. Returns
    /// `false` when exhausted. Must return `true` at least once before
    /// [`iter_argument`](Self::iter_argument) or
    /// [`iter_entity`](Self::iter_entity) may be called.
    pub fn iter_advance(&mut self, id: IteratorId) -> bool {
        let World {
            archetypes,
            iterators,
            ..
        } = self;
        let iterator = iterators
            .get_mut(id.index())
            .unwrap_or_else(|| fatal(EcsError::InvalidState(format!("unknown iterator {id:?}"))));
        if iterator.status != IteratorStatus::Iterating {
            fatal(EcsError::InvalidState(
                "cannot advance an iterator that has not been finalized".to_owned(),
            ));
        }
        loop {
            let Some(archetype_id) = iterator.archetypes.get(iterator.cursor_archetype) else {
                return false;
            };
            let rows = archetypes[archetype_id.index()].table.rows();
            if iterator.cursor_row < rows {
                iterator.cursor_row += 1;
                return true;
            }
            iterator.cursor_archetype += 1;
            iterator.cursor_row = 0;
        }
    }

    /// Pointer to the current row's value for the component bound at `slot`.
    ///
    /// `With` slots yield null (the component is required but not exposed).
    ///
    /// # Panics
    ///
    /// Panics for `Not` slots, unbound slots, or when called before a
    /// successful [`iter_advance`](Self::iter_advance).
    pub fn iter_argument(&self, id: IteratorId, slot: usize) -> *mut u8 {
        let iterator = self.iterator(id);
        if iterator.status != IteratorStatus::Iterating {
            fatal(EcsError::InvalidState(
                "cannot fetch from an iterator that has not been finalized".to_owned(),
            ));
        }
        if iterator.cursor_row == 0 {
            fatal(EcsError::InvalidState(
                "iter_advance must succeed before fetching arguments".to_owned(),
            ));
        }
        let Some(Some((component, mode))) = iterator.slots.get(slot).copied() else {
            fatal(EcsError::InvalidArgument(format!(
                "iterator slot {slot} is not bound"
            )));
        };
        match mode {
            FilterMode::Access => {
                let archetype_id = iterator.archetypes[iterator.cursor_archetype];
                self.archetypes[archetype_id.index()]
                    .table
                    .component_ptr(component, iterator.cursor_row - 1)
            }
            FilterMode::With => std::ptr::null_mut(),
            FilterMode::Not => fatal(EcsError::InvalidState(format!(
                "slot {slot} is a Not filter and cannot be fetched"
            ))),
        }
    }

    /// The entity occupying the current row.
    pub fn iter_entity(&self, id: IteratorId) -> EntityId {
        let iterator = self.iterator(id);
        if iterator.cursor_row == 0 {
            fatal(EcsError::InvalidState(
                "iter_advance must succeed before fetching the entity".to_owned(),
            ));
        }
        let archetype_id = iterator.archetypes[iterator.cursor_archetype];
        self.archetypes[archetype_id.index()].entities[iterator.cursor_row - 1]
    }

    /// Count the matching rows by running the iterator from the top. Resets
    /// the cursor.
    pub fn iter_count(&mut self, id: IteratorId) -> usize {
        self.iter_begin(id);
        let mut count = 0;
        while self.iter_advance(id) {
            count += 1;
        }
        count
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
