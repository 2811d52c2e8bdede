//! The render runtime.
//!
//! One [`RenderRuntime`] value is created by the embedding application and
//! threaded through everything that used to be process-global state: the
//! disabled-API set, the backend factory registry, the list of live
//! backends, the buffer and target handle maps, and the hook into the
//! resource system.

use crate::api::{RenderApi, RENDERAPI_COUNT};
use crate::backend::{Backend, BackendDevice};
use crate::buffer::{Buffer, BufferKind, BufferUsage, IndexFormat};
use crate::format::{ColorSpace, PixelFormat};
use crate::handle::{Handle, HandleMap};
use crate::null::NullDevice;
use crate::parameter::ParameterDecl;
use crate::platform::RESOURCE_PLATFORM_ALL;
use crate::resource::ResourceAccess;
use crate::state::RenderState;
use crate::target::{Target, TargetKind};
use crate::vertex::VertexDecl;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Capacities for the fixed handle tables, read once at runtime creation.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub buffer_max: usize,
    pub target_max: usize,
    pub shader_max: usize,
    pub program_max: usize,
    pub texture_max: usize,
}

impl Default for RenderConfig {
    fn default() -> RenderConfig {
        RenderConfig {
            buffer_max: 1024,
            target_max: 64,
            shader_max: 128,
            program_max: 128,
            texture_max: 256,
        }
    }
}

impl RenderConfig {
    /// Reads `render.*` keys from a configuration, falling back to the
    /// defaults for anything missing.
    pub fn from_config(config: &config::Config) -> RenderConfig {
        let defaults = RenderConfig::default();
        let read = |key: &str, fallback: usize| -> usize {
            config
                .get_int(key)
                .ok()
                .filter(|&value| value > 0)
                .map(|value| value as usize)
                .unwrap_or(fallback)
        };
        RenderConfig {
            buffer_max: read("render.buffer_max", defaults.buffer_max),
            target_max: read("render.target_max", defaults.target_max),
            shader_max: read("render.shader_max", defaults.shader_max),
            program_max: read("render.program_max", defaults.program_max),
            texture_max: read("render.texture_max", defaults.texture_max),
        }
    }
}

pub type BackendFactory = Box<dyn Fn() -> Box<dyn BackendDevice> + Send + Sync>;

pub struct RenderRuntime {
    weak_self: Weak<RenderRuntime>,
    config: RenderConfig,
    api_disabled: [AtomicBool; RENDERAPI_COUNT],
    factories: Mutex<Vec<Option<BackendFactory>>>,
    backends: Mutex<Vec<(u64, Weak<Backend>)>>,
    buffers: HandleMap<Buffer>,
    targets: HandleMap<Target>,
    resource_access: Mutex<Option<Arc<dyn ResourceAccess>>>,
}

impl RenderRuntime {
    pub fn new(config: RenderConfig) -> Arc<RenderRuntime> {
        let api_disabled: [AtomicBool; RENDERAPI_COUNT] = Default::default();
        // Family roots resolve through fallback; these two never allocate
        api_disabled[RenderApi::Unknown.index()].store(true, Ordering::Release);
        api_disabled[RenderApi::Default.index()].store(true, Ordering::Release);

        let mut factories = Vec::with_capacity(RENDERAPI_COUNT);
        factories.resize_with(RENDERAPI_COUNT, || None);

        Arc::new_cyclic(|weak_self| RenderRuntime {
            weak_self: weak_self.clone(),
            buffers: HandleMap::new(config.buffer_max),
            targets: HandleMap::new(config.target_max),
            config,
            api_disabled,
            factories: Mutex::new(factories),
            backends: Mutex::new(Vec::new()),
            resource_access: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn api_enable(&self, apis: &[RenderApi]) {
        for api in apis {
            if *api != RenderApi::Unknown && *api != RenderApi::Default {
                self.api_disabled[api.index()].store(false, Ordering::Release);
            }
        }
    }

    pub fn api_disable(&self, apis: &[RenderApi]) {
        for api in apis {
            if *api != RenderApi::Unknown && *api != RenderApi::Default {
                self.api_disabled[api.index()].store(true, Ordering::Release);
            }
        }
    }

    pub fn is_api_disabled(&self, api: RenderApi) -> bool {
        self.api_disabled[api.index()].load(Ordering::Acquire)
    }

    /// Registers a constructor for a concrete API. The null device is always
    /// available as the terminal fallback and needs no registration.
    pub fn register_backend_factory<D, F>(&self, api: RenderApi, factory: F)
    where
        D: BackendDevice + 'static,
        F: Fn() -> D + Send + Sync + 'static,
    {
        self.factories.lock().unwrap()[api.index()] =
            Some(Box::new(move || Box::new(factory()) as Box<dyn BackendDevice>));
    }

    pub fn set_resource_access(&self, access: Arc<dyn ResourceAccess>) {
        *self.resource_access.lock().unwrap() = Some(access);
    }

    pub fn resource_access(&self) -> Option<Arc<dyn ResourceAccess>> {
        self.resource_access.lock().unwrap().clone()
    }

    /// Every live backend.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, backend)| backend.upgrade())
            .collect()
    }

    pub(crate) fn remove_backend(&self, id: u64) {
        self.backends
            .lock()
            .unwrap()
            .retain(|(backend_id, _)| *backend_id != id);
    }

    /// Selects and initializes a backend, walking the fallback table past
    /// disabled APIs and failed initializations.
    pub fn allocate_backend(
        &self,
        api: RenderApi,
        allow_fallback: bool,
    ) -> Option<Arc<Backend>> {
        let mut api = api;
        loop {
            while api != RenderApi::Unknown && self.is_api_disabled(api) {
                api = api.fallback();
            }
            if api == RenderApi::Unknown {
                warn!("no supported and enabled render api found, giving up");
                return None;
            }

            let device: Option<Box<dyn BackendDevice>> = if api == RenderApi::Null {
                Some(Box::new(NullDevice::new()))
            } else {
                let factories = self.factories.lock().unwrap();
                match &factories[api.index()] {
                    Some(factory) => Some(factory()),
                    None => {
                        match api {
                            RenderApi::PS4 | RenderApi::XboxOne => {
                                warn!("render api not yet implemented ({})", api)
                            }
                            _ => debug!("no backend registered for render api {}", api),
                        }
                        None
                    }
                }
            };

            if let Some(device) = device {
                if device.construct() {
                    let backend = Backend::new(device, self.weak_self.clone(), &self.config);
                    let framebuffer = self.target_create_framebuffer(&backend);
                    backend.set_framebuffer(framebuffer);
                    backend.set_resource_platform(RESOURCE_PLATFORM_ALL);
                    self.backends
                        .lock()
                        .unwrap()
                        .push((backend.id(), Arc::downgrade(&backend)));
                    return Some(backend);
                }
                info!("failed to initialize {} render backend", api);
            }

            if !allow_fallback {
                warn!("requested render api not supported");
                return None;
            }
            api = api.fallback();
        }
    }

    // ---------------------------------------------------------------------
    // Buffers

    fn buffer_create(
        &self,
        backend: &Backend,
        kind: BufferKind,
        usage: BufferUsage,
        element_count: u32,
        data: Option<&[u8]>,
    ) -> Handle {
        let handle = self.buffers.reserve();
        if handle.is_none() {
            error!("unable to create buffer, out of slots in object map");
            return Handle::NONE;
        }
        let buffer = Buffer::new(handle, backend.weak(), self.weak_self.clone(), kind, usage);
        self.buffers.set(handle, Arc::clone(&buffer));
        if element_count > 0 {
            buffer.allocate_storage(element_count, data);
        }
        handle
    }

    pub fn vertex_buffer_create(
        &self,
        backend: &Backend,
        usage: BufferUsage,
        vertices: u32,
        decl: VertexDecl,
        data: Option<&[u8]>,
    ) -> Handle {
        self.buffer_create(backend, BufferKind::Vertex(decl), usage, vertices, data)
    }

    pub fn index_buffer_create(
        &self,
        backend: &Backend,
        usage: BufferUsage,
        format: IndexFormat,
        indices: u32,
        data: Option<&[u8]>,
    ) -> Handle {
        self.buffer_create(backend, BufferKind::Index(format), usage, indices, data)
    }

    pub fn parameter_buffer_create(
        &self,
        backend: &Backend,
        usage: BufferUsage,
        decl: ParameterDecl,
        instances: u32,
        data: Option<&[u8]>,
    ) -> Handle {
        self.buffer_create(backend, BufferKind::Parameter(decl), usage, instances, data)
    }

    pub fn state_buffer_create(
        &self,
        backend: &Backend,
        usage: BufferUsage,
        state: RenderState,
    ) -> Handle {
        self.buffer_create(backend, BufferKind::State, usage, 1, Some(&state.encode()))
    }

    pub fn buffer(&self, handle: Handle) -> Option<Arc<Buffer>> {
        self.buffers.lookup(handle)
    }

    /// Takes a reference by handle; returns the handle, or
    /// [`Handle::NONE`] when the buffer is being torn down.
    pub fn buffer_ref(&self, handle: Handle) -> Handle {
        if self.buffers.acquire(handle).is_some() {
            handle
        } else {
            Handle::NONE
        }
    }

    /// Drops a reference; on the transition to zero releases both system
    /// and GPU storage and frees the handle.
    pub fn buffer_destroy(&self, handle: Handle) {
        self.buffers.release(handle, |buffer| {
            buffer.release_storage(true, true);
        });
    }

    // ---------------------------------------------------------------------
    // Targets

    pub fn target_create_framebuffer(&self, backend: &Backend) -> Handle {
        let handle = self.targets.reserve();
        if handle.is_none() {
            error!("unable to create render target, out of slots in object map");
            return Handle::NONE;
        }
        let target = Target::new(
            handle,
            TargetKind::Framebuffer,
            backend.weak(),
            self.weak_self.clone(),
        );
        self.targets.set(handle, target);
        handle
    }

    pub fn target_create_texture(
        &self,
        backend: &Backend,
        width: u32,
        height: u32,
        pixelformat: PixelFormat,
        colorspace: ColorSpace,
    ) -> Handle {
        let handle = self.targets.reserve();
        if handle.is_none() {
            error!("unable to create render target, out of slots in object map");
            return Handle::NONE;
        }
        let target = Target::new(
            handle,
            TargetKind::Texture,
            backend.weak(),
            self.weak_self.clone(),
        );
        target.set_size(width, height);
        target.set_format(pixelformat, colorspace);
        self.targets.set(handle, Arc::clone(&target));
        if !backend.device().allocate_target(backend, &target) {
            error!("backend failed to allocate render target storage");
            self.targets.free(handle);
            return Handle::NONE;
        }
        handle
    }

    pub fn target(&self, handle: Handle) -> Option<Arc<Target>> {
        self.targets.lookup(handle)
    }

    pub fn target_ref(&self, handle: Handle) -> Handle {
        if self.targets.acquire(handle).is_some() {
            handle
        } else {
            Handle::NONE
        }
    }

    pub fn target_destroy(&self, handle: Handle) {
        self.targets.release(handle, |target| {
            if let Some(backend) = target.backend() {
                backend.device().deallocate_target(target);
            }
        });
    }
}
