//! GPU-backed buffers.
//!
//! Buffers own a CPU-side store and up to four backend-opaque words of
//! GPU-side state. Writers take a lock, mutate the store through the access
//! window and unlock; depending on the upload policy the dirty store is
//! pushed to the GPU on unlock or lazily when a draw referencing the buffer
//! is dispatched.

use crate::backend::Backend;
use crate::handle::{Handle, Resource};
use crate::parameter::{ParameterData, ParameterDecl};
use crate::runtime::RenderRuntime;
use crate::vertex::VertexDecl;
use bitflags::bitflags;
use log::warn;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

bitflags! {
    pub struct BufferFlags: u32 {
        const DIRTY = 0x01;
        const LOCK_READ = 0x02;
        const LOCK_WRITE = 0x04;
        const LOCK_NOUPLOAD = 0x08;
        const LOCK_FORCEUPLOAD = 0x10;
    }
}

impl BufferFlags {
    pub const LOCK_BITS: BufferFlags = BufferFlags::from_bits_truncate(
        BufferFlags::LOCK_READ.bits()
            | BufferFlags::LOCK_WRITE.bits()
            | BufferFlags::LOCK_NOUPLOAD.bits()
            | BufferFlags::LOCK_FORCEUPLOAD.bits(),
    );
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BufferUsage {
    Static = 0,
    Dynamic,
    Target,
    GpuOnly,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UploadPolicy {
    OnDispatch = 0,
    OnUnlock = 1,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn size(self) -> u32 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// Buffer variant. The variant fixes the element size.
#[derive(Clone, Debug)]
pub enum BufferKind {
    Vertex(VertexDecl),
    Index(IndexFormat),
    Parameter(ParameterDecl),
    State,
}

impl BufferKind {
    pub fn element_size(&self) -> u32 {
        match self {
            BufferKind::Vertex(decl) => u32::from(decl.size()),
            BufferKind::Index(format) => format.size(),
            BufferKind::Parameter(decl) => decl.instance_size(),
            BufferKind::State => crate::state::RenderState::ENCODED_SIZE as u32,
        }
    }
}

pub struct Buffer {
    handle: Handle,
    kind: BufferKind,
    usage: BufferUsage,
    policy: AtomicU8,
    flags: AtomicU32,
    refs: AtomicI32,
    locks: AtomicI32,
    element_size: u32,
    allocated: AtomicU32,
    used: AtomicU32,
    store: Mutex<Vec<u8>>,
    backend: Weak<Backend>,
    runtime: Weak<RenderRuntime>,
    backend_data: [AtomicU64; 4],
}

impl Resource for Buffer {
    fn refcount(&self) -> &AtomicI32 {
        &self.refs
    }
}

/// Window into the CPU store, available only while the buffer is locked.
pub struct BufferAccess<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
}

impl<'a> std::ops::Deref for BufferAccess<'a> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard
    }
}

impl<'a> std::ops::DerefMut for BufferAccess<'a> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard
    }
}

impl Buffer {
    pub(crate) fn new(
        handle: Handle,
        backend: Weak<Backend>,
        runtime: Weak<RenderRuntime>,
        kind: BufferKind,
        usage: BufferUsage,
    ) -> Arc<Buffer> {
        let element_size = kind.element_size();
        Arc::new(Buffer {
            handle,
            kind,
            usage,
            policy: AtomicU8::new(UploadPolicy::OnDispatch as u8),
            flags: AtomicU32::new(0),
            refs: AtomicI32::new(1),
            locks: AtomicI32::new(0),
            element_size,
            allocated: AtomicU32::new(0),
            used: AtomicU32::new(0),
            store: Mutex::new(Vec::new()),
            backend,
            runtime,
            backend_data: Default::default(),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind(&self) -> &BufferKind {
        &self.kind
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn element_size(&self) -> u32 {
        self.element_size
    }

    pub fn allocated(&self) -> u32 {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Acquire)
    }

    /// Clamps to the allocated count and marks the buffer dirty.
    pub fn set_used(&self, used: u32) {
        let allocated = self.allocated();
        self.used.store(used.min(allocated), Ordering::Release);
        self.mark_dirty();
    }

    pub fn policy(&self) -> UploadPolicy {
        if self.policy.load(Ordering::Acquire) == UploadPolicy::OnUnlock as u8 {
            UploadPolicy::OnUnlock
        } else {
            UploadPolicy::OnDispatch
        }
    }

    pub fn set_policy(&self, policy: UploadPolicy) {
        self.policy.store(policy as u8, Ordering::Release);
    }

    pub fn flags(&self) -> BufferFlags {
        BufferFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn is_dirty(&self) -> bool {
        self.flags().contains(BufferFlags::DIRTY)
    }

    pub fn mark_dirty(&self) {
        self.flags.fetch_or(BufferFlags::DIRTY.bits(), Ordering::AcqRel);
    }

    fn clear_dirty(&self) {
        self.flags
            .fetch_and(!BufferFlags::DIRTY.bits(), Ordering::AcqRel);
    }

    pub fn lock_count(&self) -> i32 {
        self.locks.load(Ordering::Acquire)
    }

    pub fn backend(&self) -> Option<Arc<Backend>> {
        self.backend.upgrade()
    }

    pub fn backend_data(&self, slot: usize) -> u64 {
        self.backend_data[slot].load(Ordering::Acquire)
    }

    pub fn set_backend_data(&self, slot: usize, value: u64) {
        self.backend_data[slot].store(value, Ordering::Release);
    }

    /// Takes an additional reference. Returns the handle, or
    /// [`Handle::NONE`] when the buffer is already being torn down.
    pub fn reference(&self) -> Handle {
        loop {
            let refs = self.refs.load(Ordering::Acquire);
            if refs <= 0 {
                return Handle::NONE;
            }
            if self
                .refs
                .compare_exchange_weak(refs, refs + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return self.handle;
            }
        }
    }

    /// Drops a reference; tears down storage and frees the handle on the
    /// transition to zero.
    pub fn destroy(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.buffer_destroy(self.handle);
        }
    }

    /// Begins a lock. Takes a reference for the duration of the lock and
    /// records the requested mode; the last caller's mode decides the upload
    /// behavior when the lock count returns to zero.
    pub fn lock(&self, mode: BufferFlags) {
        if self.reference().is_none() {
            return;
        }
        if mode.intersects(BufferFlags::LOCK_WRITE | BufferFlags::LOCK_READ) {
            self.locks.fetch_add(1, Ordering::AcqRel);
        }
        self.flags
            .fetch_or((mode & BufferFlags::LOCK_BITS).bits(), Ordering::AcqRel);
    }

    /// Ends a lock. The final unlock marks the buffer dirty after a write
    /// lock and uploads when the policy or mode asks for it.
    pub fn unlock(&self) {
        if self.locks.load(Ordering::Acquire) == 0 {
            return;
        }
        if self.locks.fetch_sub(1, Ordering::AcqRel) == 1 {
            let flags = self.flags();
            if flags.contains(BufferFlags::LOCK_WRITE) && !flags.contains(BufferFlags::LOCK_NOUPLOAD)
            {
                self.mark_dirty();
                if self.policy() == UploadPolicy::OnUnlock
                    || flags.contains(BufferFlags::LOCK_FORCEUPLOAD)
                {
                    self.upload();
                }
            }
            self.flags
                .fetch_and(!BufferFlags::LOCK_BITS.bits(), Ordering::AcqRel);
        }
        self.destroy();
    }

    /// The CPU store, exposed only while a lock is held.
    pub fn access(&self) -> Option<BufferAccess<'_>> {
        if self.locks.load(Ordering::Acquire) > 0 {
            Some(BufferAccess {
                guard: self.store.lock().unwrap(),
            })
        } else {
            None
        }
    }

    /// Copies `bytes` into the store at `byte_offset`. Requires a held lock.
    pub fn write(&self, byte_offset: usize, bytes: &[u8]) {
        let mut access = match self.access() {
            Some(access) => access,
            None => {
                warn!("write to unlocked buffer ignored");
                return;
            }
        };
        let end = byte_offset + bytes.len();
        if end > access.len() {
            warn!(
                "buffer write out of bounds ({} > {})",
                end,
                access.len()
            );
            return;
        }
        access[byte_offset..end].copy_from_slice(bytes);
    }

    /// Transfers a dirty store to GPU storage and clears the dirty bit.
    pub fn upload(&self) {
        if !self.is_dirty() {
            return;
        }
        if let Some(backend) = self.backend.upgrade() {
            if backend.device().upload_buffer(&backend, self) {
                self.clear_dirty();
            }
        }
    }

    /// Binds buffer contents to a program's parameter layout where the
    /// backend needs an explicit association.
    pub fn link(&self, program: &crate::program::Program) {
        if let Some(backend) = self.backend.upgrade() {
            backend.device().link_buffer(self, program);
        }
    }

    /// Releases system and/or GPU-side storage without dropping the
    /// descriptor.
    pub fn release_storage(&self, sys: bool, aux: bool) {
        if let Some(backend) = self.backend.upgrade() {
            backend.device().deallocate_buffer(self, sys, aux);
        }
    }

    /// Reallocates released storage; contents must be re-written, so the
    /// buffer comes back dirty.
    pub fn restore(&self) {
        if let Some(backend) = self.backend.upgrade() {
            backend.device().allocate_buffer(self);
            self.mark_dirty();
        }
    }

    // ---------------------------------------------------------------------
    // Store management, used by backends and creation

    pub(crate) fn allocate_storage(&self, element_count: u32, data: Option<&[u8]>) {
        self.allocated.store(element_count, Ordering::Release);
        self.used.store(element_count, Ordering::Release);
        if let Some(backend) = self.backend.upgrade() {
            backend.device().allocate_buffer(self);
        }
        if let Some(data) = data {
            let mut store = self.store.lock().unwrap();
            let len = data.len().min(store.len());
            store[..len].copy_from_slice(&data[..len]);
            drop(store);
            self.mark_dirty();
        }
    }

    /// Sizes the CPU store to the allocated element count. Backends call
    /// this from `allocate_buffer`.
    pub fn allocate_store(&self) {
        let size = (self.element_size * self.allocated()) as usize;
        let mut store = self.store.lock().unwrap();
        store.clear();
        store.resize(size, 0);
    }

    /// Drops the CPU store. Backends call this from `deallocate_buffer`.
    pub fn clear_store(&self) {
        let mut store = self.store.lock().unwrap();
        store.clear();
        store.shrink_to_fit();
    }

    pub fn store_len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    /// Snapshot of the store for backend upload/translation.
    pub fn store_bytes(&self) -> Vec<u8> {
        self.store.lock().unwrap().clone()
    }

    // ---------------------------------------------------------------------
    // Parameter data encoding

    fn encode(&self, instance: u32, index: usize, kind_check: ParameterData, bytes: &[u8]) {
        let decl = match &self.kind {
            BufferKind::Parameter(decl) => decl,
            _ => {
                warn!("parameter encode on non-parameter buffer ignored");
                return;
            }
        };
        let entry = match decl.entry(index) {
            Some(entry) => entry,
            None => {
                warn!("parameter encode index {} out of range", index);
                return;
            }
        };
        let matches = match (entry.data, kind_check) {
            (ParameterData::Buffer, ParameterData::Buffer) => true,
            (ParameterData::Matrix, ParameterData::Matrix) => true,
            (ParameterData::Constant { .. }, ParameterData::Constant { .. }) => true,
            _ => false,
        };
        if !matches {
            warn!("parameter encode kind mismatch at index {}", index);
            return;
        }
        let offset = (instance * self.element_size + entry.offset) as usize;
        let mut store = self.store.lock().unwrap();
        let end = offset + bytes.len().min(entry.data.size() as usize);
        if end > store.len() {
            warn!("parameter encode out of bounds");
            return;
        }
        let len = end - offset;
        store[offset..end].copy_from_slice(&bytes[..len]);
        drop(store);
        self.mark_dirty();
    }

    pub fn encode_buffer(&self, instance: u32, index: usize, source: Handle, offset: u32) {
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&source.raw().to_le_bytes());
        bytes[8..].copy_from_slice(&offset.to_le_bytes());
        self.encode(instance, index, ParameterData::Buffer, &bytes);
    }

    pub fn encode_matrix(&self, instance: u32, index: usize, matrix: &[f32; 16]) {
        let mut bytes = [0u8; 64];
        for (chunk, value) in bytes.chunks_exact_mut(4).zip(matrix.iter()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        self.encode(instance, index, ParameterData::Matrix, &bytes);
    }

    pub fn encode_constant(&self, instance: u32, index: usize, data: &[u8]) {
        self.encode(
            instance,
            index,
            ParameterData::Constant {
                size: data.len() as u32,
            },
            data,
        );
    }
}
