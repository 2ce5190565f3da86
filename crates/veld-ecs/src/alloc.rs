//! Caller-supplied memory allocation for component storage.
//!
//! Component values live in type-erased buffers (archetype columns, prefab
//! blobs) whose layout is only known at runtime. [`RawAllocator`] is the seam
//! through which a host application supplies its own allocator for that
//! memory; [`DefaultAllocator`] forwards to `std::alloc`. A registry and the
//! worlds created from it share one allocator unless a world is given its own
//! via [`World::with_allocator`](crate::world::World::with_allocator).
//!
//! Plain bookkeeping containers (id vectors, free lists) use the global
//! allocator directly.

use std::alloc::{self, Layout};
use std::sync::Arc;

/// Allocation interface for component storage buffers.
///
/// All methods take raw [`Layout`]s because component size and alignment are
/// runtime data. Implementations must return properly aligned pointers and
/// must not return null for non-zero sizes.
pub trait RawAllocator: Send + Sync {
    /// Allocate `layout.size()` bytes aligned to `layout.align()`.
    ///
    /// # Safety
    ///
    /// `layout` must have non-zero size.
    unsafe fn allocate(&self, layout: Layout) -> *mut u8;

    /// Grow an existing allocation from `old_layout` to `new_layout`,
    /// preserving the old contents.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` or `grow` on this
    /// allocator with `old_layout`; `new_layout` must have the same alignment
    /// and a size not smaller than `old_layout`'s.
    unsafe fn grow(&self, ptr: *mut u8, old_layout: Layout, new_layout: Layout) -> *mut u8;

    /// Release an allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator with `layout`.
    unsafe fn deallocate(&self, ptr: *mut u8, layout: Layout);
}

/// Shared handle to the allocator used by a registry and its worlds.
pub type AllocatorHandle = Arc<dyn RawAllocator>;

/// The process heap, via `std::alloc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAllocator;

impl RawAllocator for DefaultAllocator {
    unsafe fn allocate(&self, layout: Layout) -> *mut u8 {
        let ptr = alloc::alloc(layout);
        assert!(!ptr.is_null(), "allocation failed for {layout:?}");
        ptr
    }

    unsafe fn grow(&self, ptr: *mut u8, old_layout: Layout, new_layout: Layout) -> *mut u8 {
        let new_ptr = alloc::realloc(ptr, old_layout, new_layout.size());
        assert!(!new_ptr.is_null(), "reallocation failed for {new_layout:?}");
        new_ptr
    }

    unsafe fn deallocate(&self, ptr: *mut u8, layout: Layout) {
        alloc::dealloc(ptr, layout);
    }
}

/// The default heap allocator, wrapped for sharing.
pub fn default_allocator() -> AllocatorHandle {
    Arc::new(DefaultAllocator)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allocator_roundtrip() {
        let alloc = DefaultAllocator;
        let layout = Layout::from_size_align(64, 16).unwrap();
        unsafe {
            let ptr = alloc.allocate(layout);
            assert_eq!(ptr as usize % 16, 0);
            ptr.write_bytes(0xAB, 64);

            let grown_layout = Layout::from_size_align(128, 16).unwrap();
            let ptr = alloc.grow(ptr, layout, grown_layout);
            assert_eq!(*ptr.add(63), 0xAB);

            alloc.deallocate(ptr, grown_layout);
        }
    }
}
