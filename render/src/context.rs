//! Bounded command arenas.
//!
//! A context is filled concurrently by any number of producer threads, each
//! reserving slots with an atomic counter, and drained by a single dispatch.
//! Sorting, dispatching and resetting require the producers to be quiescent;
//! reservation beyond capacity is a caller bug and asserts.

use crate::command::Command;
use crate::handle::Handle;
use crate::sort::RadixSort;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

pub struct Context {
    commands: Box<[UnsafeCell<Command>]>,
    keys: Box<[AtomicU64]>,
    reserved: AtomicI32,
    key: AtomicU64,
    sort: Mutex<RadixSort>,
    target: AtomicU64,
    group: AtomicU8,
}

// Command slots at distinct indices are disjoint memory; the atomic counter
// hands each index out exactly once between resets.
unsafe impl Sync for Context {}
unsafe impl Send for Context {}

impl Context {
    pub fn new(capacity: usize) -> Context {
        assert!(capacity < u32::max_value() as usize);
        let mut commands = Vec::with_capacity(capacity);
        let mut keys = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            commands.push(UnsafeCell::new(Command::None));
            keys.push(AtomicU64::new(0));
        }
        Context {
            commands: commands.into_boxed_slice(),
            keys: keys.into_boxed_slice(),
            reserved: AtomicI32::new(0),
            key: AtomicU64::new(0),
            sort: Mutex::new(RadixSort::new(capacity)),
            target: AtomicU64::new(Handle::NONE.raw()),
            group: AtomicU8::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.commands.len()
    }

    /// Reserves the next command slot under `sort_key` and returns it for the
    /// caller to fill. May be called concurrently from multiple producers.
    pub fn reserve(&self, sort_key: u64) -> &mut Command {
        let index = self.reserved.fetch_add(1, Ordering::Relaxed);
        assert!(
            (index as usize) < self.commands.len(),
            "render command overallocation"
        );
        self.keys[index as usize].store(sort_key, Ordering::Relaxed);
        unsafe { &mut *self.commands[index as usize].get() }
    }

    /// Copies a caller-owned command into the next slot.
    pub fn queue(&self, command: &Command, sort_key: u64) {
        *self.reserve(sort_key) = *command;
    }

    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Acquire) as usize
    }

    /// Next key from the context-scoped sequential counter. Keys start at 1
    /// and preserve submission order under the stable sort.
    pub fn sequential_key(&self) -> u64 {
        self.key.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_keys(&self) {
        self.key.store(0, Ordering::Release);
    }

    /// Composed render sort key, high to low: target group, blend state
    /// class, program, vertex buffer, depth slice, sequence tiebreaker.
    pub fn render_key(
        &self,
        program: Handle,
        vertex_buffer: Handle,
        blend_class: u8,
        depth: u8,
    ) -> u64 {
        let group = u64::from(self.group.load(Ordering::Relaxed));
        let sequence = self.key.fetch_add(1, Ordering::Relaxed) + 1;
        (group << 56)
            | (u64::from(blend_class) << 48)
            | (u64::from(program.index() & 0xfff) << 36)
            | (u64::from(vertex_buffer.index() & 0xfff) << 24)
            | (u64::from(depth) << 16)
            | (sequence & 0xffff)
    }

    /// Radix-sorts the reserved keys. Producers must be quiescent.
    pub fn sort(&self) {
        let count = self.reserved();
        let keys: Vec<u64> = self.keys[..count]
            .iter()
            .map(|key| key.load(Ordering::Relaxed))
            .collect();
        self.sort.lock().unwrap().sort(&keys);
    }

    /// The permutation produced by the last [`sort`](Context::sort).
    pub fn order(&self) -> OrderGuard<'_> {
        OrderGuard {
            guard: self.sort.lock().unwrap(),
        }
    }

    /// Reads back a command by slot index.
    pub fn command(&self, index: u32) -> Command {
        debug_assert!((index as usize) < self.reserved());
        unsafe { *self.commands[index as usize].get() }
    }

    /// Marks the arena empty for the next frame. Called by the backend after
    /// dispatch has walked every command.
    pub fn reset(&self) {
        self.reserved.store(0, Ordering::Release);
    }

    pub fn target(&self) -> Handle {
        Handle::from_raw(self.target.load(Ordering::Relaxed))
    }

    pub fn set_target(&self, target: Handle) {
        self.target.store(target.raw(), Ordering::Relaxed);
    }

    pub fn group(&self) -> u8 {
        self.group.load(Ordering::Relaxed)
    }

    pub fn set_group(&self, group: u8) {
        self.group.store(group, Ordering::Relaxed);
    }
}

pub struct OrderGuard<'a> {
    guard: MutexGuard<'a, RadixSort>,
}

impl<'a> std::ops::Deref for OrderGuard<'a> {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        self.guard.order()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn reserve_records_keys_in_order() {
        let context = Context::new(8);
        *context.reserve(context.sequential_key()) = Command::viewport(0, 0, 64, 64, 0.0, 1.0);
        *context.reserve(context.sequential_key()) = Command::viewport(0, 0, 32, 32, 0.0, 1.0);
        assert_eq!(context.reserved(), 2);
        context.sort();
        assert_eq!(&*context.order(), &[0, 1]);
    }

    #[test]
    fn sort_orders_by_key_with_stable_ties() {
        let context = Context::new(8);
        context.queue(&Command::viewport(0, 0, 1, 1, 0.0, 1.0), 20);
        context.queue(&Command::viewport(0, 0, 2, 2, 0.0, 1.0), 10);
        context.queue(&Command::viewport(0, 0, 3, 3, 0.0, 1.0), 10);
        context.sort();
        assert_eq!(&*context.order(), &[1, 2, 0]);
    }

    #[test]
    fn concurrent_reservation_fills_all_slots() {
        let context = Arc::new(Context::new(4096));
        let mut threads = Vec::new();
        for _ in 0..4 {
            let context = Arc::clone(&context);
            threads.push(thread::spawn(move || {
                for _ in 0..1024 {
                    let key = context.sequential_key();
                    *context.reserve(key) = Command::viewport(0, 0, 16, 16, 0.0, 1.0);
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(context.reserved(), 4096);
        context.sort();
        let order = context.order();
        assert_eq!(order.len(), 4096);
        context.reset();
        assert_eq!(context.reserved(), 0);
    }

    #[test]
    #[should_panic(expected = "render command overallocation")]
    fn over_reservation_asserts() {
        let context = Context::new(1);
        context.reserve(1);
        context.reserve(2);
    }
}
