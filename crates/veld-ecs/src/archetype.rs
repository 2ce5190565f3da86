//! Columnar archetype storage.
//!
//! All entities sharing one exact component set live in one [`Table`]: one
//! type-erased [`Column`] per set bit, each column a densely packed raw
//! buffer of that component's values. Rows are handed out by
//! [`Table::allocate_row`] and reclaimed by [`Table::free_row`] with the
//! swap-remove policy, so live rows always occupy the contiguous range
//! `[0, rows)` and iteration never has to skip holes.
//!
//! # Safety
//!
//! Component data is stored as raw bytes; every access goes through the
//! [`ComponentInfo`] descriptor cached per column when the table is built.
//! The world guarantees that row indices handed to a table stay within the
//! live range and that descriptors match the bytes in their column.

use std::alloc::Layout;
use std::fmt;

use crate::alloc::AllocatorHandle;
use crate::bitset::BitSet;
use crate::component::{ComponentId, ComponentInfo};
use crate::entity::EntityId;
use crate::fatal;
use crate::registry::Registry;
use crate::EcsError;

// ---------------------------------------------------------------------------
// ArchetypeId
// ---------------------------------------------------------------------------

/// Index of an archetype within its world. Archetypes are never destroyed,
/// so ids stay valid for the lifetime of the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Column -- type-erased value storage
// ---------------------------------------------------------------------------

/// Raw buffer of component values of a single type.
struct Column {
    /// Null while no row slot has been materialized.
    data: *mut u8,
    item_size: usize,
    item_align: usize,
    /// Elements the current allocation can hold.
    capacity: usize,
}

impl Column {
    fn new(info: &ComponentInfo) -> Self {
        Self {
            data: std::ptr::null_mut(),
            item_size: info.size,
            item_align: info.align,
            capacity: 0,
        }
    }

    fn layout_for(&self, capacity: usize) -> Layout {
        Layout::from_size_align(self.item_size * capacity, self.item_align)
            .expect("column layout overflow")
    }

    fn ensure_capacity(&mut self, alloc: &AllocatorHandle, rows: usize) {
        if rows <= self.capacity {
            return;
        }
        let new_capacity = (self.capacity * 2).max(4).max(rows);
        unsafe {
            let new_layout = self.layout_for(new_capacity);
            self.data = if self.capacity == 0 {
                alloc.allocate(new_layout)
            } else {
                alloc.grow(self.data, self.layout_for(self.capacity), new_layout)
            };
        }
        self.capacity = new_capacity;
    }

    /// Pointer to the element at `row`.
    ///
    /// # Safety
    ///
    /// `row` must be below the materialized slot count.
    #[inline]
    unsafe fn ptr_at(&self, row: usize) -> *mut u8 {
        debug_assert!(row < self.capacity);
        self.data.add(row * self.item_size)
    }

    unsafe fn release(&mut self, alloc: &AllocatorHandle) {
        if self.capacity > 0 {
            alloc.deallocate(self.data, self.layout_for(self.capacity));
            self.data = std::ptr::null_mut();
            self.capacity = 0;
        }
    }
}

struct ColumnEntry {
    /// Descriptor cached from the registry when the table was built.
    info: ComponentInfo,
    column: Column,
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Columnar storage for one exact component set.
pub struct Table {
    alloc: AllocatorHandle,
    bits: BitSet,
    /// One column per set bit, sorted by [`ComponentId`].
    columns: Vec<(ComponentId, ColumnEntry)>,
    /// Live rows. Always the contiguous range `[0, rows)`.
    rows: usize,
    /// Row slots materialized in every column (`>= rows`).
    slots: usize,
    /// Previously used tail indices available for reuse.
    free_rows: Vec<usize>,
}

impl Table {
    pub(crate) fn new(alloc: AllocatorHandle, bits: BitSet, registry: &Registry) -> Self {
        // ones() yields ascending ids, so the column list is already sorted.
        let columns = bits
            .ones()
            .map(|index| {
                let id = ComponentId::from_index(index);
                let info = registry.component_info(id).clone();
                let column = Column::new(&info);
                (id, ColumnEntry { info, column })
            })
            .collect();
        Self {
            alloc,
            bits,
            columns,
            rows: 0,
            slots: 0,
            free_rows: Vec::new(),
        }
    }

    /// The component set this table stores.
    pub fn bits(&self) -> &BitSet {
        &self.bits
    }

    /// Number of live rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn has_component(&self, component: ComponentId) -> bool {
        self.bits.test(component.index())
    }

    #[inline]
    fn column_index(&self, component: ComponentId) -> Option<usize> {
        self.columns
            .binary_search_by_key(&component, |(id, _)| *id)
            .ok()
    }

    /// Cached descriptor for a component of this table. Panics if the
    /// component is not part of the set.
    pub(crate) fn column_info(&self, component: ComponentId) -> &ComponentInfo {
        let index = self
            .column_index(component)
            .unwrap_or_else(|| fatal(EcsError::MissingComponent(component)));
        &self.columns[index].1.info
    }

    /// Pointer to the value of `component` at `row`.
    ///
    /// # Panics
    ///
    /// Panics if the component is not part of this table's set or `row` is
    /// not a live row.
    pub fn component_ptr(&self, component: ComponentId, row: usize) -> *mut u8 {
        let index = self
            .column_index(component)
            .unwrap_or_else(|| fatal(EcsError::MissingComponent(component)));
        if row >= self.rows {
            fatal(EcsError::InvalidState(format!(
                "row {row} is not live ({} rows)",
                self.rows
            )));
        }
        unsafe { self.columns[index].1.column.ptr_at(row) }
    }

    /// Take a row: pop the free list or materialize a new slot in every
    /// column, then run each component's `init` (zero-fill when absent).
    pub fn allocate_row(&mut self) -> usize {
        let row = if let Some(row) = self.free_rows.pop() {
            // Freed indices are pushed as rows shrink, so the stack top is
            // always exactly the next live index.
            debug_assert_eq!(row, self.rows);
            row
        } else {
            let row = self.slots;
            for (_, entry) in &mut self.columns {
                entry.column.ensure_capacity(&self.alloc, row + 1);
            }
            self.slots += 1;
            row
        };
        debug_assert_eq!(row, self.rows);
        for (_, entry) in &mut self.columns {
            unsafe {
                entry.info.init_value(entry.column.ptr_at(row));
            }
        }
        self.rows += 1;
        row
    }

    /// Release a row with the swap-remove policy.
    ///
    /// The removed row's values are destroyed first; if the row was not the
    /// last, the last row is copied onto it via each component's `copy` and
    /// the relocated originals at the tail are destroyed. The tail index goes
    /// on the free list.
    ///
    /// Returns the index whose contents were relocated (the old tail), which
    /// equals `row` itself when the removed row was the last one. The caller
    /// uses it to fix the row-to-entity mapping.
    pub fn free_row(&mut self, row: usize) -> usize {
        if row >= self.rows {
            fatal(EcsError::InvalidState(format!(
                "cannot free row {row} ({} rows)",
                self.rows
            )));
        }
        let last = self.rows - 1;
        unsafe {
            for (_, entry) in &mut self.columns {
                entry.info.destroy_value(entry.column.ptr_at(row));
            }
            if row != last {
                for (_, entry) in &mut self.columns {
                    let src = entry.column.ptr_at(last);
                    let dst = entry.column.ptr_at(row);
                    entry.info.copy_value(src, dst);
                }
                for (_, entry) in &mut self.columns {
                    entry.info.destroy_value(entry.column.ptr_at(last));
                }
            }
        }
        self.free_rows.push(last);
        self.rows = last;
        last
    }

    /// Copy the components present on *both* sides from `src_row` into
    /// `dst_row` of `dst`. One-sided components are left untouched.
    pub fn copy_row_to(&self, src_row: usize, dst: &mut Table, dst_row: usize) {
        debug_assert!(src_row < self.rows);
        for (id, entry) in &self.columns {
            if !dst.has_component(*id) {
                continue;
            }
            let dst_ptr = dst.component_ptr(*id, dst_row);
            unsafe {
                entry.info.copy_value(entry.column.ptr_at(src_row), dst_ptr);
            }
        }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        let alloc = self.alloc.clone();
        unsafe {
            for (_, entry) in &mut self.columns {
                for row in 0..self.rows {
                    entry.info.destroy_value(entry.column.ptr_at(row));
                }
                entry.column.release(&alloc);
            }
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("components", &self.columns.len())
            .field("rows", &self.rows)
            .field("slots", &self.slots)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// A table plus the inverse row-to-entity mapping.
#[derive(Debug)]
pub struct Archetype {
    pub(crate) table: Table,
    /// `entities[row]` is the entity occupying that row. Always exactly
    /// `table.rows()` long.
    pub(crate) entities: Vec<EntityId>,
}

impl Archetype {
    pub(crate) fn new(table: Table) -> Self {
        Self {
            table,
            entities: Vec::new(),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// The entity occupying each live row.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
