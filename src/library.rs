// Library context and host allocation hooks
//
// Every device-child object lives in memory obtained from the installed
// hooks. Raw memory is reserved first, the native object is created, and
// only then is the object written in place.

use parking_lot::RwLock;
use std::alloc::{GlobalAlloc, Layout, System};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Allocation hook. Must return memory satisfying `layout`, or null on failure.
pub type AllocFn = fn(Layout) -> *mut u8;

/// Free hook, called with the same layout the block was allocated with.
pub type FreeFn = fn(*mut u8, Layout);

fn system_alloc(layout: Layout) -> *mut u8 {
    unsafe { System.alloc(layout) }
}

fn system_free(ptr: *mut u8, layout: Layout) {
    unsafe { System.dealloc(ptr, layout) }
}

/// Pair of allocation hooks used for every object the library constructs.
#[derive(Clone, Copy)]
pub struct AllocHooks {
    alloc: AllocFn,
    free: FreeFn,
}

impl AllocHooks {
    /// Hooks backed by the system heap.
    pub fn system() -> Self {
        Self {
            alloc: system_alloc,
            free: system_free,
        }
    }

    /// Install both hooks, or fall back to the system heap for both if either is missing.
    pub fn new(alloc: Option<AllocFn>, free: Option<FreeFn>) -> Self {
        match (alloc, free) {
            (Some(alloc), Some(free)) => Self { alloc, free },
            _ => Self::system(),
        }
    }
}

impl std::fmt::Debug for AllocHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocHooks")
            .field("alloc", &(self.alloc as usize as *const ()))
            .field("free", &(self.free as usize as *const ()))
            .finish()
    }
}

#[derive(Default)]
struct LibraryState {
    // Some <=> initialized
    hooks: Option<AllocHooks>,
}

/// Library context.
///
/// Replaces process-wide init/shutdown state: every [`Device`](crate::Device)
/// is built from a `Swarm` and checks it on each creation and destruction.
/// Clones share the same state, so `shutdown` through any clone is seen by
/// every device built from it.
#[derive(Clone, Default)]
pub struct Swarm {
    state: Arc<RwLock<LibraryState>>,
}

impl Swarm {
    /// Create an uninitialized context. Call [`Swarm::init`] before building devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context already initialized with the system allocator.
    pub fn with_default_hooks() -> Self {
        let swarm = Self::new();
        swarm.init(None, None);
        swarm
    }

    /// Install allocation hooks and mark the library initialized.
    ///
    /// If either hook is `None`, both fall back to the system heap.
    /// Calling `init` on an initialized context is a no-op that returns `true`.
    pub fn init(&self, alloc: Option<AllocFn>, free: Option<FreeFn>) -> bool {
        let mut state = self.state.write();
        if state.hooks.is_some() {
            return true;
        }

        state.hooks = Some(AllocHooks::new(alloc, free));
        log::debug!("swarm initialized (custom hooks: {})", alloc.is_some() && free.is_some());
        true
    }

    /// Clear the hooks and mark the library uninitialized.
    pub fn shutdown(&self) {
        self.state.write().hooks = None;
        log::debug!("swarm shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().hooks.is_some()
    }

    /// # Panics
    /// If the library is not initialized.
    pub(crate) fn assert_initialized(&self) {
        assert!(self.is_initialized(), "swarm library is not initialized");
    }

    /// # Panics
    /// If the library is not initialized.
    pub(crate) fn hooks(&self) -> AllocHooks {
        self.state
            .read()
            .hooks
            .expect("swarm library is not initialized")
    }
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Raw memory for one `T`, reserved through the hooks but not yet written.
pub(crate) struct HookAlloc<T> {
    ptr: NonNull<T>,
    hooks: AllocHooks,
    _marker: PhantomData<T>,
}

impl<T> HookAlloc<T> {
    pub(crate) fn new(hooks: AllocHooks) -> Result<Self> {
        let layout = Layout::new::<T>();
        let ptr = if layout.size() == 0 {
            NonNull::dangling()
        } else {
            let raw = (hooks.alloc)(layout);
            let ptr = NonNull::new(raw.cast::<T>()).ok_or(Error::OutOfHostMemory {
                size: layout.size(),
            })?;
            assert_eq!(
                raw as usize % layout.align(),
                0,
                "allocation hook returned misaligned memory"
            );
            ptr
        };

        Ok(Self {
            ptr,
            hooks,
            _marker: PhantomData,
        })
    }

    /// Construct the object in place.
    pub(crate) fn write(self, value: T) -> HookBox<T> {
        let this = std::mem::ManuallyDrop::new(self);
        unsafe { this.ptr.as_ptr().write(value) };
        HookBox {
            ptr: this.ptr,
            hooks: this.hooks,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for HookAlloc<T> {
    fn drop(&mut self) {
        let layout = Layout::new::<T>();
        if layout.size() != 0 {
            (self.hooks.free)(self.ptr.as_ptr().cast(), layout);
        }
    }
}

/// Owning pointer to a `T` living in hook-allocated memory.
pub(crate) struct HookBox<T> {
    ptr: NonNull<T>,
    hooks: AllocHooks,
    _marker: PhantomData<T>,
}

// HookBox owns its T exactly like Box does.
unsafe impl<T: Send> Send for HookBox<T> {}
unsafe impl<T: Sync> Sync for HookBox<T> {}

impl<T> HookBox<T> {
    /// Move the object out and release its memory through the free hook.
    pub(crate) fn into_inner(self) -> T {
        let this = std::mem::ManuallyDrop::new(self);
        let value = unsafe { this.ptr.as_ptr().read() };
        let layout = Layout::new::<T>();
        if layout.size() != 0 {
            (this.hooks.free)(this.ptr.as_ptr().cast(), layout);
        }
        value
    }
}

impl<T> Deref for HookBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for HookBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for HookBox<T> {
    fn drop(&mut self) {
        let layout = Layout::new::<T>();
        unsafe { std::ptr::drop_in_place(self.ptr.as_ptr()) };
        if layout.size() != 0 {
            (self.hooks.free)(self.ptr.as_ptr().cast(), layout);
        }
    }
}
