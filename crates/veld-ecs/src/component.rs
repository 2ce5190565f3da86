//! Component descriptors.
//!
//! Components are plain value types described at runtime by a
//! [`ComponentInfo`]: a size, an alignment, and optional init/copy/destroy
//! callbacks. The core never sees a concrete type; storage and row moves
//! operate on raw bytes through the descriptor. When a callback is absent the
//! component is treated as trivially constructible (zero-fill), copyable
//! (bytewise copy), and destructible (no-op).

use serde::{Deserialize, Serialize};
use std::alloc::Layout;
use std::fmt;
use std::ptr;

// ---------------------------------------------------------------------------
// ComponentId
// ---------------------------------------------------------------------------

/// Dense index into a registry's component table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// The id as a bitset index.
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Place-construct a valid value at `mem`.
pub type InitFn = unsafe fn(mem: *mut u8);

/// Value-copy from `src` to `dst`. The pointers never alias and `src` stays
/// valid afterwards. `size` is the component's registered size, passed along
/// as advisory context.
pub type CopyFn = unsafe fn(src: *const u8, dst: *mut u8, size: usize);

/// Tear down an otherwise-valid value at `mem`.
pub type DestroyFn = unsafe fn(mem: *mut u8);

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Reflection metadata for one member of a component.
///
/// Passed through verbatim for host-side tooling; the core never interprets
/// it.
#[derive(Debug, Clone)]
pub struct ComponentMember {
    pub name: String,
    pub type_id: u64,
    pub offset: usize,
}

/// Runtime descriptor of a component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Unique printable name. Registering a second descriptor under the same
    /// name updates the first in place.
    pub name: String,
    /// Host-assigned type tag, carried but not interpreted.
    pub type_id: u64,
    /// Value size in bytes. Must be non-zero.
    pub size: usize,
    /// Value alignment in bytes. Must be a non-zero power of two.
    pub align: usize,
    pub init: Option<InitFn>,
    pub copy: Option<CopyFn>,
    pub destroy: Option<DestroyFn>,
    /// Optional member reflection, passed through verbatim.
    pub members: Vec<ComponentMember>,
}

impl ComponentInfo {
    /// Descriptor with the given name, size, and alignment and no callbacks.
    pub fn new(name: impl Into<String>, size: usize, align: usize) -> Self {
        Self {
            name: name.into(),
            type_id: 0,
            size,
            align,
            init: None,
            copy: None,
            destroy: None,
            members: Vec::new(),
        }
    }

    /// Descriptor sized and aligned for a Rust value type.
    ///
    /// Zero-sized types are rejected at registration time; give markers at
    /// least one byte.
    pub fn of<T>(name: impl Into<String>) -> Self {
        Self::new(name, std::mem::size_of::<T>(), std::mem::align_of::<T>())
    }

    pub fn with_type_id(mut self, type_id: u64) -> Self {
        self.type_id = type_id;
        self
    }

    pub fn with_init(mut self, init: InitFn) -> Self {
        self.init = Some(init);
        self
    }

    pub fn with_copy(mut self, copy: CopyFn) -> Self {
        self.copy = Some(copy);
        self
    }

    pub fn with_destroy(mut self, destroy: DestroyFn) -> Self {
        self.destroy = Some(destroy);
        self
    }

    pub fn with_members(mut self, members: Vec<ComponentMember>) -> Self {
        self.members = members;
        self
    }

    /// Memory layout of a single value.
    pub fn layout(&self) -> Layout {
        Layout::from_size_align(self.size, self.align)
            .expect("component size/align do not form a valid layout")
    }

    /// Construct a value at `mem`: `init`, or zero-fill when absent.
    ///
    /// # Safety
    ///
    /// `mem` must be writable for `size` bytes and aligned to `align`.
    pub(crate) unsafe fn init_value(&self, mem: *mut u8) {
        match self.init {
            Some(init) => init(mem),
            None => ptr::write_bytes(mem, 0, self.size),
        }
    }

    /// Copy a value from `src` to `dst`: `copy`, or bytewise when absent.
    ///
    /// # Safety
    ///
    /// Both pointers must be valid for `size` bytes, aligned, and must not
    /// alias. `src` must hold a valid value.
    pub(crate) unsafe fn copy_value(&self, src: *const u8, dst: *mut u8) {
        match self.copy {
            Some(copy) => copy(src, dst, self.size),
            None => ptr::copy_nonoverlapping(src, dst, self.size),
        }
    }

    /// Tear down the value at `mem`: `destroy`, or no-op when absent.
    ///
    /// # Safety
    ///
    /// `mem` must hold a valid value of this component type.
    pub(crate) unsafe fn destroy_value(&self, mem: *mut u8) {
        if let Some(destroy) = self.destroy {
            destroy(mem);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
