//! Dense id→object tables with generation-checked handles.
//!
//! Handles are opaque 64-bit values handed across API boundaries instead of
//! pointers. The low 32 bits index a fixed-capacity slot table; the high
//! 32 bits carry a generation counter that is bumped every time a slot is
//! freed, so a stale handle is detected by generation mismatch instead of
//! silently resolving to an unrelated object. Generations start at 1, which
//! also keeps every live handle distinct from the zero "none" sentinel.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Opaque identifier for an object owned by a [`HandleMap`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Handle(u64);

impl Handle {
    /// The "no object" sentinel.
    pub const NONE: Handle = Handle(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn is_some(self) -> bool {
        self.0 != 0
    }

    pub fn index(self) -> u32 {
        (self.0 & 0xffff_ffff) as u32
    }

    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Handle {
        Handle(raw)
    }

    fn new(index: u32, generation: u32) -> Handle {
        Handle((u64::from(generation) << 32) | u64::from(index))
    }
}

/// Implemented by objects stored in a [`HandleMap`].
///
/// The logical reference count lives in the object itself, not in the table:
/// a count of zero marks an object that is being torn down, and no acquire
/// will resurrect it (the 0→1 transition is disallowed).
pub trait Resource: Send + Sync + 'static {
    fn refcount(&self) -> &AtomicI32;
}

struct Slot<T> {
    generation: AtomicU32,
    value: RwLock<Option<Arc<T>>>,
}

/// Fixed-capacity table mapping handles to reference-counted objects.
pub struct HandleMap<T: Resource> {
    slots: Box<[Slot<T>]>,
    free: Mutex<Vec<u32>>,
}

impl<T: Resource> HandleMap<T> {
    pub fn new(capacity: usize) -> HandleMap<T> {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                generation: AtomicU32::new(1),
                value: RwLock::new(None),
            });
        }
        // Hand out low indices first
        let free = (0..capacity as u32).rev().collect();
        HandleMap {
            slots: slots.into_boxed_slice(),
            free: Mutex::new(free),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Reserves a slot and returns its handle, or [`Handle::NONE`] when the
    /// table is exhausted.
    pub fn reserve(&self) -> Handle {
        let index = match self.free.lock().unwrap().pop() {
            Some(index) => index,
            None => return Handle::NONE,
        };
        let generation = self.slots[index as usize].generation.load(Ordering::Acquire);
        Handle::new(index, generation)
    }

    /// Stores an object in a previously reserved slot.
    pub fn set(&self, handle: Handle, value: Arc<T>) -> bool {
        match self.slot(handle) {
            Some(slot) => {
                *slot.value.write().unwrap() = Some(value);
                true
            }
            None => false,
        }
    }

    /// Resolves a handle without touching the reference count.
    pub fn lookup(&self, handle: Handle) -> Option<Arc<T>> {
        self.slot(handle)
            .and_then(|slot| slot.value.read().unwrap().clone())
    }

    /// Resolves a handle and takes a reference, atomically with the lookup.
    ///
    /// Fails if the object's count has already reached zero.
    pub fn acquire(&self, handle: Handle) -> Option<Arc<T>> {
        let value = self.lookup(handle)?;
        let refs = value.refcount();
        loop {
            let current = refs.load(Ordering::Acquire);
            if current <= 0 {
                return None;
            }
            if refs
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(value);
            }
        }
    }

    /// Drops a reference. On the transition to zero the slot is freed and
    /// `deleter` runs with the object so the caller can tear down any
    /// backend-side storage. Returns true when this call destroyed the object.
    pub fn release<F: FnOnce(&Arc<T>)>(&self, handle: Handle, deleter: F) -> bool {
        let value = match self.lookup(handle) {
            Some(value) => value,
            None => return false,
        };
        let refs = value.refcount();
        loop {
            let current = refs.load(Ordering::Acquire);
            if current <= 0 {
                return false;
            }
            if refs
                .compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if current == 1 {
                    self.free(handle);
                    deleter(&value);
                    return true;
                }
                return false;
            }
        }
    }

    /// Unconditionally clears a slot, bumping its generation. Used on final
    /// teardown; live references keep the object itself alive.
    pub fn free(&self, handle: Handle) {
        if let Some(slot) = self.slot(handle) {
            let mut value = slot.value.write().unwrap();
            if value.take().is_some() {
                slot.generation.fetch_add(1, Ordering::AcqRel);
                self.free.lock().unwrap().push(handle.index());
            }
        }
    }

    /// Clears every live slot, handing each object to `f`.
    pub fn drain<F: FnMut(Arc<T>)>(&self, mut f: F) {
        for (index, slot) in self.slots.iter().enumerate() {
            let taken = slot.value.write().unwrap().take();
            if let Some(value) = taken {
                slot.generation.fetch_add(1, Ordering::AcqRel);
                self.free.lock().unwrap().push(index as u32);
                f(value);
            }
        }
    }

    fn slot(&self, handle: Handle) -> Option<&Slot<T>> {
        if handle.is_none() {
            return None;
        }
        let slot = self.slots.get(handle.index() as usize)?;
        if slot.generation.load(Ordering::Acquire) != handle.generation() {
            return None;
        }
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        refs: AtomicI32,
    }

    impl Dummy {
        fn new() -> Arc<Dummy> {
            Arc::new(Dummy {
                refs: AtomicI32::new(1),
            })
        }
    }

    impl Resource for Dummy {
        fn refcount(&self) -> &AtomicI32 {
            &self.refs
        }
    }

    #[test]
    fn reserve_set_lookup() {
        let map: HandleMap<Dummy> = HandleMap::new(4);
        let handle = map.reserve();
        assert!(handle.is_some());
        assert!(map.lookup(handle).is_none());
        assert!(map.set(handle, Dummy::new()));
        assert!(map.lookup(handle).is_some());
    }

    #[test]
    fn exhaustion_returns_none() {
        let map: HandleMap<Dummy> = HandleMap::new(2);
        let a = map.reserve();
        let b = map.reserve();
        assert!(a.is_some() && b.is_some());
        assert!(map.reserve().is_none());
    }

    #[test]
    fn release_to_zero_frees_slot_with_new_generation() {
        let map: HandleMap<Dummy> = HandleMap::new(2);
        let handle = map.reserve();
        map.set(handle, Dummy::new());

        // One extra reference, so two releases are needed
        assert!(map.acquire(handle).is_some());
        assert!(!map.release(handle, |_| ()));
        let mut deleted = false;
        assert!(map.release(handle, |_| deleted = true));
        assert!(deleted);
        assert!(map.lookup(handle).is_none());

        // The slot may be reused, but never under the same handle value
        let reused = map.reserve();
        assert!(reused.is_some());
        assert_ne!(reused, handle);
    }

    #[test]
    fn acquire_fails_on_dead_object() {
        let map: HandleMap<Dummy> = HandleMap::new(2);
        let handle = map.reserve();
        let value = Dummy::new();
        map.set(handle, value.clone());
        value.refs.store(0, Ordering::Release);
        assert!(map.acquire(handle).is_none());
    }

    #[test]
    fn stale_generation_does_not_resolve() {
        let map: HandleMap<Dummy> = HandleMap::new(1);
        let handle = map.reserve();
        map.set(handle, Dummy::new());
        map.free(handle);
        let reused = map.reserve();
        map.set(reused, Dummy::new());
        assert_eq!(reused.index(), handle.index());
        assert!(map.lookup(handle).is_none());
        assert!(map.lookup(reused).is_some());
    }
}
