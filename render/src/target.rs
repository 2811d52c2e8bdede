//! Render targets.
//!
//! A target is either the backend's window framebuffer, whose dimensions
//! track the current drawable, or an offscreen texture target with explicit
//! dimensions. Backends stash their API objects (framebuffer object, color
//! texture, depth buffer, vertex array) in the opaque data slots.

use crate::backend::Backend;
use crate::format::{ColorSpace, PixelFormat};
use crate::handle::{Handle, Resource};
use crate::runtime::RenderRuntime;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TargetKind {
    Framebuffer,
    Texture,
}

pub struct Target {
    handle: Handle,
    kind: TargetKind,
    width: AtomicU32,
    height: AtomicU32,
    format: Mutex<(PixelFormat, ColorSpace)>,
    refs: AtomicI32,
    backend: Weak<Backend>,
    runtime: Weak<RenderRuntime>,
    backend_data: [AtomicU64; 4],
}

impl Resource for Target {
    fn refcount(&self) -> &AtomicI32 {
        &self.refs
    }
}

impl Target {
    pub(crate) fn new(
        handle: Handle,
        kind: TargetKind,
        backend: Weak<Backend>,
        runtime: Weak<RenderRuntime>,
    ) -> Arc<Target> {
        Arc::new(Target {
            handle,
            kind,
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            format: Mutex::new((PixelFormat::Unknown, ColorSpace::Linear)),
            refs: AtomicI32::new(1),
            backend,
            runtime,
            backend_data: Default::default(),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn width(&self) -> u32 {
        self.width.load(Ordering::Acquire)
    }

    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    pub fn set_size(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::Release);
        self.height.store(height, Ordering::Release);
    }

    pub fn pixelformat(&self) -> PixelFormat {
        self.format.lock().unwrap().0
    }

    pub fn colorspace(&self) -> ColorSpace {
        self.format.lock().unwrap().1
    }

    pub fn set_format(&self, pixelformat: PixelFormat, colorspace: ColorSpace) {
        *self.format.lock().unwrap() = (pixelformat, colorspace);
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

    /// Takes an additional reference, or returns [`Handle::NONE`] if the
    /// target is being torn down.
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

    pub fn destroy(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.target_destroy(self.handle);
        }
    }
}
