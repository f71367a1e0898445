// Generational handles and the arenas behind them

use std::sync::atomic::{AtomicU32, Ordering};

use crate::library::HookBox;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Identifier of an object inside a device arena.
///
/// Carries the id of the arena that issued it, so a handle from another
/// device is caught even when its slot and generation happen to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle {
    pool: u32,
    index: u32,
    generation: u32,
}

impl RawHandle {
    /// Pack slot and generation into 64 bits for native interop. Never zero.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }
}

macro_rules! define_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            ///
            /// Owned: not `Copy` or `Clone`. Pass by reference to use it and by
            /// value to the matching `destroy_*` call.
            #[derive(Debug, PartialEq, Eq, Hash)]
            pub struct $name(pub(crate) RawHandle);

            impl $name {
                pub fn to_bits(&self) -> u64 {
                    self.0.to_bits()
                }
            }
        )*
    };
}

define_handle! {
    /// GPU buffer.
    BufferHandle;
    /// GPU image with its default view.
    TextureHandle;
    /// Sampler state.
    SamplerHandle;
    /// Command buffer arena bound to the graphics queue family.
    CommandPoolHandle;
    /// Recordable unit of GPU work.
    CommandBufferHandle;
    /// Host-observable completion signal.
    FenceHandle;
    /// GPU-only ordering signal.
    SemaphoreHandle;
    /// Presentable image set.
    SwapchainHandle;
    /// Render pass.
    RenderPassHandle;
    /// One framebuffer per swapchain image.
    FramebufferHandle;
    /// Shader module.
    ShaderHandle;
}

struct Slot<T> {
    // Odd while occupied, even while free. Starts at 0 so the first handle
    // has generation 1 and `to_bits` is never zero.
    generation: u32,
    value: Option<HookBox<T>>,
}

/// Typed arena addressed by [`RawHandle`].
pub(crate) struct HandlePool<T> {
    id: u32,
    kind: &'static str,
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    live: usize,
}

impl<T> HandlePool<T> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    pub(crate) fn insert(&mut self, value: HookBox<T>) -> RawHandle {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.value = Some(value);
        self.live += 1;

        RawHandle {
            pool: self.id,
            index,
            generation: slot.generation,
        }
    }

    fn slot(&self, handle: RawHandle) -> Option<&HookBox<T>> {
        if handle.pool != self.id {
            return None;
        }
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// # Panics
    /// If the handle was destroyed or belongs to another device.
    pub(crate) fn get(&self, handle: RawHandle) -> &T {
        match self.slot(handle) {
            Some(value) => value,
            None => panic!("stale or foreign {} handle {:?}", self.kind, handle),
        }
    }

    /// # Panics
    /// If the handle was destroyed or belongs to another device.
    pub(crate) fn get_mut(&mut self, handle: RawHandle) -> &mut T {
        let kind = self.kind;
        if handle.pool != self.id {
            panic!("stale or foreign {} handle {:?}", kind, handle);
        }
        match self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
        {
            Some(value) => value,
            None => panic!("stale or foreign {} handle {:?}", kind, handle),
        }
    }

    /// Take the object out, invalidating every copy of `handle`.
    ///
    /// # Panics
    /// If the handle was destroyed or belongs to another device.
    pub(crate) fn remove(&mut self, handle: RawHandle) -> T {
        let kind = self.kind;
        if handle.pool != self.id {
            panic!("stale or foreign {} handle {:?}", kind, handle);
        }
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation);

        let Some(value) = slot.and_then(|slot| {
            let value = slot.value.take()?;
            slot.generation = slot.generation.wrapping_add(1);
            Some(value)
        }) else {
            panic!("stale or foreign {} handle {:?}", kind, handle);
        };

        self.free_list.push(handle.index);
        self.live -= 1;
        value.into_inner()
    }

    /// Remove every live object. Used at device teardown.
    pub(crate) fn drain(&mut self) -> Vec<(RawHandle, T)> {
        let mut drained = Vec::with_capacity(self.live);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                let handle = RawHandle {
                    pool: self.id,
                    index: index as u32,
                    generation: slot.generation,
                };
                slot.generation = slot.generation.wrapping_add(1);
                self.free_list.push(index as u32);
                drained.push((handle, value.into_inner()));
            }
        }
        self.live = 0;
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn kind(&self) -> &'static str {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{AllocHooks, HookAlloc};

    fn boxed<T>(value: T) -> HookBox<T> {
        HookAlloc::new(AllocHooks::system()).unwrap().write(value)
    }

    #[test]
    fn handles_are_never_zero() {
        let mut pool = HandlePool::new("buffer");
        let handle = pool.insert(boxed(1u32));
        assert_ne!(handle.to_bits(), 0);
        assert_eq!(*pool.get(handle), 1);
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let mut pool = HandlePool::new("buffer");
        let first = pool.insert(boxed(1u32));
        assert_eq!(pool.remove(first), 1);

        let second = pool.insert(boxed(2u32));
        assert_eq!(first.index, second.index);
        assert_ne!(first.generation, second.generation);
        assert_eq!(*pool.get(second), 2);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    #[should_panic(expected = "stale or foreign fence handle")]
    fn stale_handle_panics() {
        let mut pool = HandlePool::new("fence");
        let handle = pool.insert(boxed(()));
        pool.remove(handle);
        pool.get(handle);
    }

    #[test]
    #[should_panic(expected = "stale or foreign buffer handle")]
    fn handle_from_another_pool_panics() {
        let mut first = HandlePool::new("buffer");
        let mut second = HandlePool::new("buffer");
        let foreign = first.insert(boxed(1u32));
        second.insert(boxed(2u32));

        // Same slot and generation, different arena.
        second.remove(foreign);
    }

    #[test]
    fn drain_empties_pool() {
        let mut pool = HandlePool::new("semaphore");
        let a = pool.insert(boxed('a'));
        pool.insert(boxed('b'));
        pool.remove(a);
        pool.insert(boxed('c'));

        let mut drained: Vec<char> = pool.drain().into_iter().map(|(_, v)| v).collect();
        drained.sort();
        assert_eq!(drained, vec!['b', 'c']);
        assert_eq!(pool.len(), 0);
    }
}
