//! Component registration and prefab templates.
//!
//! A [`Registry`] owns the component descriptor table and the prefab store.
//! It is read-shared by the worlds created from it: worlds borrow it for the
//! operations that can mint new archetypes and cache descriptors per column,
//! so the component table must stay append-only while any world is alive
//! (updating a descriptor in place under the same name is allowed).
//!
//! A prefab is an ordered list of `(component, default-value blob)` pairs
//! plus the aggregate component set. Spawning from a prefab copies each blob
//! into the fresh row via the component's `copy` callback; the blobs
//! themselves are never consumed and stay valid across any number of spawns.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alloc::{default_allocator, AllocatorHandle};
use crate::arena::{self, GenArena};
use crate::bitset::BitSet;
use crate::component::{ComponentId, ComponentInfo};
use crate::fatal;
use crate::EcsError;

// ---------------------------------------------------------------------------
// PrefabId
// ---------------------------------------------------------------------------

/// Generation-tagged prefab handle, packed like
/// [`EntityId`](crate::entity::EntityId): 24-bit index, 8-bit generation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrefabId(u32);

impl PrefabId {
    /// The all-ones sentinel; spawning with it means "no prefab".
    pub const INVALID: PrefabId = PrefabId(u32::MAX);

    #[inline]
    pub fn index(self) -> u32 {
        arena::unpack_index(self.0)
    }

    #[inline]
    pub fn generation(self) -> u8 {
        arena::unpack_generation(self.0)
    }

    #[inline]
    pub fn is_invalid(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for PrefabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "PrefabId(INVALID)")
        } else {
            write!(f, "PrefabId({}v{})", self.index(), self.generation())
        }
    }
}

// ---------------------------------------------------------------------------
// ComponentBlob
// ---------------------------------------------------------------------------

/// Owned, aligned heap block holding one default component value.
///
/// Dropping the blob releases the buffer only; the value's `destroy` callback
/// runs separately on the removal paths so the registry stays in control of
/// teardown order.
pub(crate) struct ComponentBlob {
    ptr: *mut u8,
    layout: std::alloc::Layout,
    alloc: AllocatorHandle,
}

impl ComponentBlob {
    fn new(alloc: &AllocatorHandle, info: &ComponentInfo) -> Self {
        let layout = info.layout();
        let ptr = unsafe { alloc.allocate(layout) };
        Self {
            ptr,
            layout,
            alloc: alloc.clone(),
        }
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }
}

impl Drop for ComponentBlob {
    fn drop(&mut self) {
        unsafe {
            self.alloc.deallocate(self.ptr, self.layout);
        }
    }
}

// ---------------------------------------------------------------------------
// Prefab
// ---------------------------------------------------------------------------

pub(crate) struct PrefabComponent {
    pub(crate) component: ComponentId,
    pub(crate) blob: ComponentBlob,
}

pub(crate) struct Prefab {
    pub(crate) components: Vec<PrefabComponent>,
    pub(crate) bitset: BitSet,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Owns component descriptors and prefab templates.
pub struct Registry {
    alloc: AllocatorHandle,
    components: Vec<ComponentInfo>,
    prefabs: GenArena<Prefab>,
}

impl Registry {
    /// Registry backed by the default heap allocator.
    pub fn new() -> Self {
        Self::with_allocator(default_allocator())
    }

    /// Registry backed by a caller-supplied allocator. Worlds created from
    /// this registry inherit the allocator unless given their own.
    pub fn with_allocator(alloc: AllocatorHandle) -> Self {
        Self {
            alloc,
            components: Vec::new(),
            prefabs: GenArena::new(),
        }
    }

    pub fn allocator(&self) -> &AllocatorHandle {
        &self.alloc
    }

    // -- components ---------------------------------------------------------

    /// Register a component descriptor.
    ///
    /// If a component with the same name already exists its descriptor is
    /// updated in place (the stored name is kept) and the existing id is
    /// returned; otherwise the descriptor is appended under a fresh id.
    ///
    /// # Panics
    ///
    /// Panics on an empty name, a zero size, or an alignment that is not a
    /// non-zero power of two.
    pub fn register_component(&mut self, info: ComponentInfo) -> ComponentId {
        if info.name.is_empty() {
            fatal(EcsError::InvalidArgument(
                "component name must not be empty".to_owned(),
            ));
        }
        if info.size == 0 {
            fatal(EcsError::InvalidArgument(format!(
                "component '{}' has zero size",
                info.name
            )));
        }
        if !info.align.is_power_of_two() {
            fatal(EcsError::InvalidArgument(format!(
                "component '{}' alignment {} is not a non-zero power of two",
                info.name, info.align
            )));
        }

        if let Some(index) = self.components.iter().position(|c| c.name == info.name) {
            // Same name: update the descriptor in place, keep the stored name.
            let name = std::mem::take(&mut self.components[index].name);
            self.components[index] = info;
            self.components[index].name = name;
            return ComponentId::from_index(index);
        }

        let id = ComponentId::from_index(self.components.len());
        debug!(name = %info.name, id = id.to_raw(), "registered component");
        self.components.push(info);
        id
    }

    /// Number of registered components.
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Descriptor lookup. Panics on an unknown id.
    pub fn component_info(&self, component: ComponentId) -> &ComponentInfo {
        self.components
            .get(component.index())
            .unwrap_or_else(|| fatal(EcsError::UnknownComponent(component)))
    }

    // -- prefabs ------------------------------------------------------------

    /// Allocate an empty prefab template.
    pub fn create_prefab(&mut self) -> PrefabId {
        PrefabId::from_raw(self.prefabs.insert(Prefab {
            components: Vec::new(),
            bitset: BitSet::new(),
        }))
    }

    /// Add a component to a prefab with its default-constructed value
    /// (`init`, or zero-fill when absent). Idempotent per component: adding
    /// again re-populates the existing blob.
    pub fn prefab_add_component(&mut self, prefab: PrefabId, component: ComponentId) {
        unsafe { self.prefab_add_component_impl(prefab, component, None) }
    }

    /// Add a component to a prefab, populating its blob from `default` via
    /// the component's `copy` callback (bytewise when absent).
    ///
    /// # Safety
    ///
    /// `default` must point to a valid value of the component's type and stay
    /// valid for the duration of the call.
    pub unsafe fn prefab_add_component_with_default(
        &mut self,
        prefab: PrefabId,
        component: ComponentId,
        default: *const u8,
    ) {
        self.prefab_add_component_impl(prefab, component, Some(default));
    }

    unsafe fn prefab_add_component_impl(
        &mut self,
        prefab: PrefabId,
        component: ComponentId,
        default: Option<*const u8>,
    ) {
        let info = self
            .components
            .get(component.index())
            .unwrap_or_else(|| fatal(EcsError::UnknownComponent(component)));
        let template = self
            .prefabs
            .get_mut(prefab.to_raw())
            .unwrap_or_else(|| fatal(EcsError::StalePrefab(prefab)));

        let blob_ptr = match template
            .components
            .iter()
            .find(|pc| pc.component == component)
        {
            Some(existing) => existing.blob.as_ptr(),
            None => {
                let blob = ComponentBlob::new(&self.alloc, info);
                let ptr = blob.as_ptr();
                template.components.push(PrefabComponent { component, blob });
                ptr
            }
        };

        match default {
            Some(src) => info.copy_value(src, blob_ptr),
            None => info.init_value(blob_ptr),
        }
        template.bitset.set(component.index());
    }

    /// Pointer to a prefab's default value for `component`. Panics if the
    /// prefab does not carry the component.
    pub fn prefab_component(&self, prefab: PrefabId, component: ComponentId) -> *mut u8 {
        let template = self
            .prefabs
            .get(prefab.to_raw())
            .unwrap_or_else(|| fatal(EcsError::StalePrefab(prefab)));
        template
            .components
            .iter()
            .find(|pc| pc.component == component)
            .map(|pc| pc.blob.as_ptr())
            .unwrap_or_else(|| fatal(EcsError::MissingComponent(component)))
    }

    /// Remove a component from a prefab, destroying its blob value. Panics if
    /// the prefab does not carry the component.
    pub fn prefab_remove_component(&mut self, prefab: PrefabId, component: ComponentId) {
        let info = self
            .components
            .get(component.index())
            .unwrap_or_else(|| fatal(EcsError::UnknownComponent(component)));
        let template = self
            .prefabs
            .get_mut(prefab.to_raw())
            .unwrap_or_else(|| fatal(EcsError::StalePrefab(prefab)));

        let index = template
            .components
            .iter()
            .position(|pc| pc.component == component)
            .unwrap_or_else(|| fatal(EcsError::MissingComponent(component)));

        let removed = template.components.remove(index);
        unsafe {
            info.destroy_value(removed.blob.as_ptr());
        }
        template.bitset.clear(component.index());
    }

    /// Destroy every blob in the prefab and release its slot.
    pub fn destroy_prefab(&mut self, prefab: PrefabId) {
        let template = self
            .prefabs
            .remove(prefab.to_raw())
            .unwrap_or_else(|| fatal(EcsError::StalePrefab(prefab)));
        for pc in &template.components {
            let info = &self.components[pc.component.index()];
            unsafe {
                info.destroy_value(pc.blob.as_ptr());
            }
        }
    }

    pub(crate) fn prefab(&self, prefab: PrefabId) -> &Prefab {
        self.prefabs
            .get(prefab.to_raw())
            .unwrap_or_else(|| fatal(EcsError::StalePrefab(prefab)))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // Destroy the values of any remaining prefab blobs; the buffers are
        // released by ComponentBlob::drop.
        for (_, template) in self.prefabs.iter() {
            for pc in &template.components {
                let info = &self.components[pc.component.index()];
                unsafe {
                    info.destroy_value(pc.blob.as_ptr());
                }
            }
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.components.len())
            .field("prefabs", &self.prefabs.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[repr(C)]
    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Velocity {
        x: i32,
        y: i32,
        z: i32,
    }

    #[test]
    fn register_assigns_dense_ids() {
        let mut registry = Registry::new();
        let a = registry.register_component(ComponentInfo::new("A", 4, 4));
        let b = registry.register_component(ComponentInfo::new("B", 8, 8));
        assert_ne!(a, b);
        assert_eq!(registry.component_count(), 2);
        assert_eq!(registry.component_info(a).name, "A");
        assert_eq!(registry.component_info(b).size, 8);
    }

    #[test]
    fn register_same_name_updates_in_place() {
        let mut registry = Registry::new();
        let first = registry.register_component(ComponentInfo::new("Health", 4, 4));
        let second = registry.register_component(
            ComponentInfo::new("Health", 8, 8).with_type_id(77),
        );
        assert_eq!(first, second);
        assert_eq!(registry.component_count(), 1);
        let info = registry.component_info(first);
        assert_eq!(info.size, 8);
        assert_eq!(info.type_id, 77);
        assert_eq!(info.name, "Health");
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn register_rejects_empty_name() {
        let mut registry = Registry::new();
        registry.register_component(ComponentInfo::new("", 4, 4));
    }

    #[test]
    #[should_panic(expected = "zero size")]
    fn register_rejects_zero_size() {
        let mut registry = Registry::new();
        registry.register_component(ComponentInfo::new("Empty", 0, 1));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn register_rejects_bad_alignment() {
        let mut registry = Registry::new();
        registry.register_component(ComponentInfo::new("Odd", 4, 3));
    }

    #[test]
    fn prefab_default_value_is_copied_into_blob() {
        let mut registry = Registry::new();
        let velocity = registry.register_component(ComponentInfo::of::<Velocity>("Velocity"));
        let prefab = registry.create_prefab();

        let default = Velocity { x: 10, y: 54, z: 0 };
        unsafe {
            registry.prefab_add_component_with_default(
                prefab,
                velocity,
                &default as *const Velocity as *const u8,
            );
        }

        let ptr = registry.prefab_component(prefab, velocity) as *const Velocity;
        assert_eq!(unsafe { *ptr }, default);
    }

    #[test]
    fn prefab_without_default_zero_fills() {
        let mut registry = Registry::new();
        let velocity = registry.register_component(ComponentInfo::of::<Velocity>("Velocity"));
        let prefab = registry.create_prefab();
        registry.prefab_add_component(prefab, velocity);

        let ptr = registry.prefab_component(prefab, velocity) as *const Velocity;
        assert_eq!(unsafe { *ptr }, Velocity { x: 0, y: 0, z: 0 });
    }

    #[test]
    fn prefab_add_is_idempotent() {
        let mut registry = Registry::new();
        let velocity = registry.register_component(ComponentInfo::of::<Velocity>("Velocity"));
        let prefab = registry.create_prefab();

        let default = Velocity { x: 1, y: 2, z: 3 };
        registry.prefab_add_component(prefab, velocity);
        let first = registry.prefab_component(prefab, velocity);
        unsafe {
            registry.prefab_add_component_with_default(
                prefab,
                velocity,
                &default as *const Velocity as *const u8,
            );
        }
        let second = registry.prefab_component(prefab, velocity);
        assert_eq!(first, second, "blob must be reused");
        assert_eq!(unsafe { *(second as *const Velocity) }, default);
        assert_eq!(registry.prefab(prefab).components.len(), 1);
    }

    #[test]
    #[should_panic(expected = "not present")]
    fn prefab_component_panics_when_absent() {
        let mut registry = Registry::new();
        let velocity = registry.register_component(ComponentInfo::of::<Velocity>("Velocity"));
        let prefab = registry.create_prefab();
        registry.prefab_component(prefab, velocity);
    }

    #[test]
    fn prefab_remove_destroys_the_blob_value() {
        static DESTROYED: AtomicUsize = AtomicUsize::new(0);
        unsafe fn count_destroy(_mem: *mut u8) {
            DESTROYED.fetch_add(1, Ordering::SeqCst);
        }

        let mut registry = Registry::new();
        let tracked = registry
            .register_component(ComponentInfo::new("Tracked", 4, 4).with_destroy(count_destroy));
        let prefab = registry.create_prefab();
        registry.prefab_add_component(prefab, tracked);

        registry.prefab_remove_component(prefab, tracked);
        assert_eq!(DESTROYED.load(Ordering::SeqCst), 1);
        assert!(registry.prefab(prefab).bitset.is_empty());
    }

    #[test]
    fn destroy_prefab_releases_the_slot() {
        let mut registry = Registry::new();
        let velocity = registry.register_component(ComponentInfo::of::<Velocity>("Velocity"));
        let prefab = registry.create_prefab();
        registry.prefab_add_component(prefab, velocity);
        registry.destroy_prefab(prefab);

        let reused = registry.create_prefab();
        assert_eq!(reused.index(), prefab.index());
        assert_eq!(reused.generation(), prefab.generation().wrapping_add(1));
    }

    #[test]
    #[should_panic(expected = "stale")]
    fn stale_prefab_handle_panics() {
        let mut registry = Registry::new();
        let prefab = registry.create_prefab();
        registry.destroy_prefab(prefab);
        registry.create_prefab();
        let _ = registry.prefab(prefab);
    }
}
