//! Backends.
//!
//! A [`Backend`] owns one concrete rendering API implementation behind the
//! [`BackendDevice`] trait, the drawable it renders into, the framebuffer
//! target and the per-backend resource registries binding UUIDs to shader,
//! program and texture handles. Rendering operations that touch GPU state
//! must run on a thread whose thread-local slot holds the backend; the slot
//! is taken implicitly by [`Backend::set_drawable`] and explicitly by
//! [`Backend::enable_thread`] or the scoped [`Backend::bind_thread`] guard.

use crate::api::{RenderApi, RenderApiGroup};
use crate::buffer::Buffer;
use crate::context::Context;
use crate::drawable::{Drawable, Resolution};
use crate::error::Result;
use crate::format::{ColorSpace, PixelFormat};
use crate::handle::{Handle, HandleMap};
use crate::platform::{resource_platform, resource_platform_decompose, RESOURCE_PLATFORM_ALL};
use crate::program::{Program, ProgramDescriptor};
use crate::resource::{
    read_dynamic_blob, ResourceHeader, PROGRAM_RESOURCE_VERSION, SHADER_RESOURCE_VERSION,
    TYPE_PROGRAM,
};
use crate::runtime::RenderRuntime;
use crate::shader::{parse_shader_static, Shader, ShaderKind};
use crate::state::RenderState;
use crate::target::Target;
use crate::texture::{parse_texture_static, Texture};
use crate::uuidmap::UuidMap;
use log::{error, warn};
use std::any::Any;
use std::cell::RefCell;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

/// Operations every concrete rendering API implements.
///
/// All operations receive the resources they act on as arguments and assume
/// no other shared state; operations that need the owning [`Backend`] (for
/// the drawable, target lookups or registry access) take it explicitly.
pub trait BackendDevice: Send + Sync {
    fn api(&self) -> RenderApi;

    fn as_any(&self) -> &dyn Any;

    fn api_group(&self) -> RenderApiGroup {
        self.api().group()
    }

    /// One-time initialization after allocation. Returning false makes the
    /// selector fall through to the next API.
    fn construct(&self) -> bool;

    fn destruct(&self);

    fn enumerate_adapters(&self) -> Vec<u32>;

    fn enumerate_modes(&self, adapter: u32) -> Vec<Resolution>;

    fn set_drawable(&self, backend: &Backend, drawable: &Drawable) -> bool;

    fn enable_thread(&self, _backend: &Backend) {}

    fn disable_thread(&self, _backend: &Backend) {}

    /// Walks each context's commands in sorted order and translates them.
    fn dispatch(&self, backend: &Backend, runtime: &RenderRuntime, contexts: &[&Context]);

    /// Presents the current framebuffer. The frame counter advance happens
    /// in [`Backend::flip`].
    fn flip(&self, _backend: &Backend) {}

    /// Allocates CPU-side storage for a buffer's current element count.
    fn allocate_buffer(&self, buffer: &Buffer);

    fn deallocate_buffer(&self, buffer: &Buffer, sys: bool, aux: bool);

    fn upload_buffer(&self, backend: &Backend, buffer: &Buffer) -> bool;

    fn link_buffer(&self, _buffer: &Buffer, _program: &Program) {}

    fn allocate_shader(&self, _shader: &Shader) {}

    fn upload_shader(&self, backend: &Backend, shader: &Shader, bytes: &[u8]) -> bool;

    fn deallocate_shader(&self, shader: &Shader);

    fn allocate_program(&self, _program: &Program) {}

    fn upload_program(&self, backend: &Backend, program: &Program) -> bool;

    fn deallocate_program(&self, program: &Program);

    /// Links the shader pair and introspects the program interface:
    /// attributes sorted ascending by binding with packed offsets, and
    /// parameters with deterministic offsets in introspection order.
    fn link_program(
        &self,
        backend: &Backend,
        vertex: &Shader,
        pixel: &Shader,
    ) -> Result<ProgramDescriptor>;

    fn allocate_target(&self, _backend: &Backend, _target: &Target) -> bool {
        true
    }

    fn deallocate_target(&self, _target: &Target) {}

    fn activate_target(&self, _backend: &Backend, _target: &Target) -> bool {
        true
    }

    /// Compiles shader source to the API's artifact format, capturing the
    /// compiler log on failure.
    fn compile_shader(&self, kind: ShaderKind, source: &[u8]) -> Result<Vec<u8>>;

    fn allocate_texture(&self, _texture: &Texture) {}

    fn upload_texture(&self, _backend: &Backend, _texture: &Texture, _data: &[u8]) -> bool {
        false
    }

    fn deallocate_texture(&self, _texture: &Texture) {}

    fn set_state(&self, _state: &RenderState) {}

    fn set_default_state(&self) {}
}

thread_local! {
    static THREAD_BACKEND: RefCell<Option<Arc<Backend>>> = RefCell::new(None);
}

fn set_thread_backend(backend: Option<Arc<Backend>>) {
    THREAD_BACKEND.with(|slot| *slot.borrow_mut() = backend);
}

/// The backend bound to the calling thread, if any.
pub fn thread_backend() -> Option<Arc<Backend>> {
    THREAD_BACKEND.with(|slot| slot.borrow().clone())
}

static BACKEND_ID: AtomicU64 = AtomicU64::new(1);

/// Scoped thread binding; releases the thread-local slot on all exit paths.
pub struct ThreadBinding {
    backend: Arc<Backend>,
}

impl Drop for ThreadBinding {
    fn drop(&mut self) {
        self.backend.disable_thread();
    }
}

pub struct Backend {
    id: u64,
    weak_self: Weak<Backend>,
    device: Box<dyn BackendDevice>,
    runtime: Weak<RenderRuntime>,
    drawable: Mutex<Option<Drawable>>,
    format: Mutex<(PixelFormat, ColorSpace)>,
    framebuffer: AtomicU64,
    framecount: AtomicU64,
    platform: AtomicU64,
    shader_table: UuidMap,
    shaders: HandleMap<Shader>,
    program_table: UuidMap,
    programs: HandleMap<Program>,
    texture_table: UuidMap,
    textures: HandleMap<Texture>,
}

impl Backend {
    pub(crate) fn new(
        device: Box<dyn BackendDevice>,
        runtime: Weak<RenderRuntime>,
        config: &crate::runtime::RenderConfig,
    ) -> Arc<Backend> {
        Arc::new_cyclic(|weak_self| Backend {
            id: BACKEND_ID.fetch_add(1, Ordering::Relaxed),
            weak_self: weak_self.clone(),
            device,
            runtime,
            drawable: Mutex::new(None),
            format: Mutex::new((PixelFormat::Unknown, ColorSpace::Linear)),
            framebuffer: AtomicU64::new(Handle::NONE.raw()),
            framecount: AtomicU64::new(1),
            platform: AtomicU64::new(RESOURCE_PLATFORM_ALL),
            shader_table: UuidMap::new(config.shader_max),
            shaders: HandleMap::new(config.shader_max),
            program_table: UuidMap::new(config.program_max),
            programs: HandleMap::new(config.program_max),
            texture_table: UuidMap::new(config.texture_max),
            textures: HandleMap::new(config.texture_max),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn weak(&self) -> Weak<Backend> {
        self.weak_self.clone()
    }

    pub(crate) fn set_framebuffer(&self, target: Handle) {
        self.framebuffer.store(target.raw(), Ordering::Release);
    }

    pub fn api(&self) -> RenderApi {
        self.device.api()
    }

    pub fn api_group(&self) -> RenderApiGroup {
        self.device.api_group()
    }

    pub fn device(&self) -> &dyn BackendDevice {
        self.device.as_ref()
    }

    pub fn runtime(&self) -> Option<Arc<RenderRuntime>> {
        self.runtime.upgrade()
    }

    pub fn enumerate_adapters(&self) -> Vec<u32> {
        self.device.enumerate_adapters()
    }

    pub fn enumerate_modes(&self, adapter: u32) -> Vec<Resolution> {
        self.device.enumerate_modes(adapter)
    }

    /// Sets the output pixel format and color space. Only valid while no
    /// drawable is attached; afterwards the call is a no-op with a
    /// diagnostic.
    pub fn set_format(&self, pixelformat: PixelFormat, colorspace: ColorSpace) {
        if self.drawable.lock().unwrap().is_some() {
            error!("unable to change format when drawable is already set");
            return;
        }
        *self.format.lock().unwrap() = (pixelformat, colorspace);
    }

    pub fn pixelformat(&self) -> PixelFormat {
        self.format.lock().unwrap().0
    }

    pub fn colorspace(&self) -> ColorSpace {
        self.format.lock().unwrap().1
    }

    /// Attaches a drawable, replacing (and dropping) any previous one, sizes
    /// the framebuffer target to match and binds this backend to the calling
    /// thread.
    pub fn set_drawable(&self, drawable: Drawable) -> bool {
        if !self.device.set_drawable(self, &drawable) {
            return false;
        }

        let (width, height) = (drawable.width(), drawable.height());
        *self.drawable.lock().unwrap() = Some(drawable);

        if let Some(runtime) = self.runtime.upgrade() {
            if let Some(target) = runtime.target(self.framebuffer()) {
                target.set_size(width, height);
                let (pixelformat, colorspace) = *self.format.lock().unwrap();
                target.set_format(pixelformat, colorspace);
            }
        }

        set_thread_backend(self.weak_self.upgrade());
        true
    }

    pub fn has_drawable(&self) -> bool {
        self.drawable.lock().unwrap().is_some()
    }

    pub fn drawable_size(&self) -> Option<(u32, u32)> {
        self.drawable
            .lock()
            .unwrap()
            .as_ref()
            .map(|drawable| (drawable.width(), drawable.height()))
    }

    pub fn framebuffer(&self) -> Handle {
        Handle::from_raw(self.framebuffer.load(Ordering::Acquire))
    }

    pub fn frame_count(&self) -> u64 {
        self.framecount.load(Ordering::Acquire)
    }

    /// Translates every context's commands in sorted order, then marks the
    /// contexts empty so the next frame starts clean. Producers must be
    /// quiescent.
    pub fn dispatch(&self, contexts: &[&Context]) {
        if let Some(runtime) = self.runtime.upgrade() {
            self.device.dispatch(self, &runtime, contexts);
        }
        for context in contexts {
            context.reset();
        }
    }

    /// Presents the frame and advances the frame counter.
    pub fn flip(&self) {
        self.device.flip(self);
        self.framecount.fetch_add(1, Ordering::AcqRel);
    }

    pub fn enable_thread(&self) {
        self.device.enable_thread(self);
        set_thread_backend(self.weak_self.upgrade());
    }

    pub fn disable_thread(&self) {
        self.device.disable_thread(self);
        set_thread_backend(None);
    }

    /// RAII thread binding: enables this backend for the calling thread and
    /// guarantees release on scope exit.
    pub fn bind_thread(&self) -> Option<ThreadBinding> {
        let backend = self.weak_self.upgrade()?;
        self.enable_thread();
        Some(ThreadBinding { backend })
    }

    /// The packed resource platform identifier, with the api and api-group
    /// fields pinned to this backend.
    pub fn resource_platform(&self) -> u64 {
        self.platform.load(Ordering::Acquire)
    }

    pub fn set_resource_platform(&self, platform: u64) {
        let mut decl = resource_platform_decompose(platform);
        decl.render_api = self.api() as i32;
        decl.render_api_group = self.api_group() as i32;
        self.platform
            .store(resource_platform(decl), Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // Shader registry

    pub fn shader_create(&self, kind: ShaderKind, uuid: Uuid) -> Handle {
        let handle = self.shaders.reserve();
        if handle.is_none() {
            error!("unable to create shader, out of slots in object map");
            return Handle::NONE;
        }
        let shader = Shader::new(kind, uuid);
        shader.set_backend(self.weak_self.clone());
        self.shaders.set(handle, shader);
        handle
    }

    /// Load-or-bind: returns a referenced handle for the UUID, reading and
    /// uploading the compiled resource on first use.
    pub fn shader_load(&self, uuid: Uuid) -> Handle {
        let handle = self.shader_table.lookup(uuid);
        if self.shaders.acquire(handle).is_some() {
            return handle;
        }
        match self.shader_load_raw(uuid) {
            Some(shader) => self.shader_bind(uuid, shader),
            None => Handle::NONE,
        }
    }

    /// Binds a shader object to a UUID, idempotently: rebinding the object
    /// already in the table just takes a reference.
    pub fn shader_bind(&self, uuid: Uuid, shader: Arc<Shader>) -> Handle {
        let existing = self.shader_table.lookup(uuid);
        if existing.is_some() {
            if let Some(current) = self.shaders.acquire(existing) {
                if Arc::ptr_eq(&current, &shader) {
                    return existing;
                }
                self.shader_release(existing);
            }
        }
        let handle = self.shaders.reserve();
        if handle.is_some() {
            self.shaders.set(handle, shader);
            self.shader_table.insert(uuid, handle);
        }
        handle
    }

    pub fn shader_lookup(&self, uuid: Uuid) -> Handle {
        self.shader_table.lookup(uuid)
    }

    pub fn shader_raw(&self, handle: Handle) -> Option<Arc<Shader>> {
        self.shaders.lookup(handle)
    }

    pub fn shader_acquire(&self, handle: Handle) -> Option<Arc<Shader>> {
        self.shaders.acquire(handle)
    }

    pub fn shader_release(&self, handle: Handle) {
        self.shaders.release(handle, |shader| {
            if let Some(backend) = shader.backend() {
                backend.device().deallocate_shader(shader);
            }
        });
    }

    /// Uploads shader bytes, first instructing a previous owning backend to
    /// drop its GPU-side copy. Handle identity is preserved.
    pub fn shader_upload(&self, shader: &Arc<Shader>, bytes: &[u8]) -> bool {
        if let Some(old) = shader.backend() {
            if !std::ptr::eq(old.as_ref(), self) {
                old.device().deallocate_shader(shader);
            }
        }
        if self.device.upload_shader(self, shader, bytes) {
            shader.set_backend(self.weak_self.clone());
            true
        } else {
            false
        }
    }

    /// Re-reads the compiled resource and re-uploads into the live shader
    /// object, preserving the handle.
    pub fn shader_reload(&self, uuid: Uuid) -> bool {
        let handle = self.shader_table.lookup(uuid);
        let shader = match self.shaders.lookup(handle) {
            Some(shader) => shader,
            None => return false,
        };
        let bytes = match self.read_shader_blob(uuid) {
            Some(bytes) => bytes,
            None => return false,
        };
        self.shader_upload(&shader, &bytes)
    }

    fn read_shader_blob(&self, uuid: Uuid) -> Option<Vec<u8>> {
        let runtime = self.runtime.upgrade()?;
        let access = runtime.resource_access()?;
        let platform = self.resource_platform();
        let stat = access.open_static(uuid, platform)?;
        if let Err(err) = parse_shader_static(&stat) {
            warn!("shader resource {} rejected: {}", uuid, err);
            return None;
        }
        let dynamic = access.open_dynamic(uuid, platform)?;
        match read_dynamic_blob(&dynamic, SHADER_RESOURCE_VERSION) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!("shader blob {} rejected: {}", uuid, err);
                None
            }
        }
    }

    fn shader_load_raw(&self, uuid: Uuid) -> Option<Arc<Shader>> {
        let runtime = self.runtime.upgrade()?;
        let access = runtime.resource_access()?;
        let platform = self.resource_platform();
        let stat = access.open_static(uuid, platform)?;
        let kind = match parse_shader_static(&stat) {
            Ok((_, kind)) => kind,
            Err(err) => {
                warn!("shader resource {} rejected: {}", uuid, err);
                return None;
            }
        };
        let bytes = self.read_shader_blob(uuid)?;
        let shader = Shader::new(kind, uuid);
        if !self.shader_upload(&shader, &bytes) {
            return None;
        }
        Some(shader)
    }

    // ---------------------------------------------------------------------
    // Program registry

    pub fn program_load(&self, uuid: Uuid) -> Handle {
        let handle = self.program_table.lookup(uuid);
        if self.programs.acquire(handle).is_some() {
            return handle;
        }
        match self.program_load_raw(uuid) {
            Some(program) => self.program_bind(uuid, program),
            None => Handle::NONE,
        }
    }

    pub fn program_bind(&self, uuid: Uuid, program: Arc<Program>) -> Handle {
        let existing = self.program_table.lookup(uuid);
        if existing.is_some() {
            if let Some(current) = self.programs.acquire(existing) {
                if Arc::ptr_eq(&current, &program) {
                    return existing;
                }
                self.program_release(existing);
            }
        }
        let handle = self.programs.reserve();
        if handle.is_some() {
            self.programs.set(handle, program);
            self.program_table.insert(uuid, handle);
        }
        handle
    }

    pub fn program_lookup(&self, uuid: Uuid) -> Handle {
        self.program_table.lookup(uuid)
    }

    pub fn program_raw(&self, handle: Handle) -> Option<Arc<Program>> {
        self.programs.lookup(handle)
    }

    pub fn program_acquire(&self, handle: Handle) -> Option<Arc<Program>> {
        self.programs.acquire(handle)
    }

    pub fn program_release(&self, handle: Handle) {
        self.programs.release(handle, |program| {
            if let Some(backend) = program.backend() {
                backend.device().deallocate_program(program);
            }
            for shader_handle in program.take_shaders() {
                self.shader_release(shader_handle);
            }
        });
    }

    /// Uploads (links) a program, migrating GPU-side data off a previous
    /// backend first.
    pub fn program_upload(&self, program: &Arc<Program>) -> bool {
        if let Some(old) = program.backend() {
            if !std::ptr::eq(old.as_ref(), self) {
                old.device().deallocate_program(program);
            }
        }
        program.set_backend(self.weak_self.clone());
        self.device.upload_program(self, program)
    }

    pub fn program_reload(&self, uuid: Uuid) -> bool {
        let handle = self.program_table.lookup(uuid);
        let program = match self.programs.lookup(handle) {
            Some(program) => program,
            None => return false,
        };
        let loaded = match self.program_read_resource(uuid) {
            Some(loaded) => loaded,
            None => return false,
        };
        let (vertex_uuid, pixel_uuid, descriptor) = loaded;
        let shaders = match self.program_load_shaders(vertex_uuid, pixel_uuid) {
            Some(shaders) => shaders,
            None => return false,
        };
        for old in program.take_shaders() {
            self.shader_release(old);
        }
        program.set_shader_uuids(vertex_uuid, pixel_uuid);
        program.set_shaders(shaders.0, shaders.1);
        program.set_descriptor(descriptor);
        self.program_upload(&program)
    }

    fn program_read_resource(&self, uuid: Uuid) -> Option<(Uuid, Uuid, ProgramDescriptor)> {
        let runtime = self.runtime.upgrade()?;
        let access = runtime.resource_access()?;
        let stat = access.open_static(uuid, self.resource_platform())?;
        let mut cursor = Cursor::new(&stat[..]);
        let header = match ResourceHeader::read_from(&mut cursor) {
            Ok(header) => header,
            Err(err) => {
                warn!("program resource {} rejected: {}", uuid, err);
                return None;
            }
        };
        if header.type_hash != TYPE_PROGRAM {
            warn!("program resource {} has wrong type", uuid);
            return None;
        }
        if header.version != PROGRAM_RESOURCE_VERSION {
            warn!(
                "program resource {} version mismatch (expected {}, got {})",
                uuid, PROGRAM_RESOURCE_VERSION, header.version
            );
            return None;
        }
        let mut uuid_bytes = [0u8; 16];
        use std::io::Read;
        if cursor.read_exact(&mut uuid_bytes).is_err() {
            return None;
        }
        let vertex_uuid = Uuid::from_bytes(uuid_bytes);
        if cursor.read_exact(&mut uuid_bytes).is_err() {
            return None;
        }
        let pixel_uuid = Uuid::from_bytes(uuid_bytes);
        let descriptor = match ProgramDescriptor::read_from(&mut cursor) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!("program descriptor {} rejected: {}", uuid, err);
                return None;
            }
        };
        Some((vertex_uuid, pixel_uuid, descriptor))
    }

    fn program_load_shaders(
        &self,
        vertex_uuid: Uuid,
        pixel_uuid: Uuid,
    ) -> Option<((Handle, Arc<Shader>), (Handle, Arc<Shader>))> {
        let vertex_handle = self.shader_load(vertex_uuid);
        let vertex = match self.shaders.lookup(vertex_handle) {
            Some(shader) if shader.kind() == ShaderKind::Vertex => shader,
            _ => {
                error!("unable to load vertex shader {}", vertex_uuid);
                if vertex_handle.is_some() {
                    self.shader_release(vertex_handle);
                }
                return None;
            }
        };
        let pixel_handle = self.shader_load(pixel_uuid);
        let pixel = match self.shaders.lookup(pixel_handle) {
            Some(shader) if shader.kind() == ShaderKind::Pixel => shader,
            _ => {
                error!("unable to load pixel shader {}", pixel_uuid);
                self.shader_release(vertex_handle);
                if pixel_handle.is_some() {
                    self.shader_release(pixel_handle);
                }
                return None;
            }
        };
        Some(((vertex_handle, vertex), (pixel_handle, pixel)))
    }

    fn program_load_raw(&self, uuid: Uuid) -> Option<Arc<Program>> {
        let (vertex_uuid, pixel_uuid, descriptor) = self.program_read_resource(uuid)?;
        let shaders = self.program_load_shaders(vertex_uuid, pixel_uuid)?;
        let program = Program::new(uuid);
        program.set_shader_uuids(vertex_uuid, pixel_uuid);
        program.set_shaders(shaders.0, shaders.1);
        program.set_descriptor(descriptor);
        if !self.program_upload(&program) {
            for handle in program.take_shaders() {
                self.shader_release(handle);
            }
            return None;
        }
        Some(program)
    }

    // ---------------------------------------------------------------------
    // Texture registry

    pub fn texture_load(&self, uuid: Uuid) -> Handle {
        let handle = self.texture_table.lookup(uuid);
        if self.textures.acquire(handle).is_some() {
            return handle;
        }
        match self.texture_load_raw(uuid) {
            Some(texture) => self.texture_bind(uuid, texture),
            None => Handle::NONE,
        }
    }

    pub fn texture_bind(&self, uuid: Uuid, texture: Arc<Texture>) -> Handle {
        let existing = self.texture_table.lookup(uuid);
        if existing.is_some() {
            if let Some(current) = self.textures.acquire(existing) {
                if Arc::ptr_eq(&current, &texture) {
                    return existing;
                }
                self.texture_release(existing);
            }
        }
        let handle = self.textures.reserve();
        if handle.is_some() {
            self.textures.set(handle, texture);
            self.texture_table.insert(uuid, handle);
        }
        handle
    }

    pub fn texture_lookup(&self, uuid: Uuid) -> Handle {
        self.texture_table.lookup(uuid)
    }

    pub fn texture_raw(&self, handle: Handle) -> Option<Arc<Texture>> {
        self.textures.lookup(handle)
    }

    pub fn texture_acquire(&self, handle: Handle) -> Option<Arc<Texture>> {
        self.textures.acquire(handle)
    }

    pub fn texture_release(&self, handle: Handle) {
        self.textures.release(handle, |texture| {
            if let Some(backend) = texture.backend() {
                backend.device().deallocate_texture(texture);
            }
        });
    }

    fn texture_load_raw(&self, uuid: Uuid) -> Option<Arc<Texture>> {
        let runtime = self.runtime.upgrade()?;
        let access = runtime.resource_access()?;
        let platform = self.resource_platform();
        let stat = access.open_static(uuid, platform)?;
        let (_, descriptor) = match parse_texture_static(&stat) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("texture resource {} rejected: {}", uuid, err);
                return None;
            }
        };
        let texture = Texture::new(uuid, crate::buffer::BufferUsage::Static, descriptor);
        texture.set_backend(self.weak_self.clone());
        self.device.allocate_texture(&texture);
        if let Some(dynamic) = access.open_dynamic(uuid, platform) {
            match read_dynamic_blob(&dynamic, crate::resource::TEXTURE_RESOURCE_VERSION) {
                Ok(pixels) => {
                    if !self.device.upload_texture(self, &texture, &pixels) {
                        warn!("texture upload failed for {}", uuid);
                    }
                }
                Err(err) => {
                    warn!("texture blob {} rejected: {}", uuid, err);
                    return None;
                }
            }
        }
        Some(texture)
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        // Programs hold shader references, so they go first. A resource that
        // migrated to another backend is torn down there instead.
        self.programs.drain(|program| {
            match program.backend() {
                Some(backend) => backend.device().deallocate_program(&program),
                None => self.device.deallocate_program(&program),
            }
        });
        self.shaders.drain(|shader| {
            match shader.backend() {
                Some(backend) => backend.device().deallocate_shader(&shader),
                None => self.device.deallocate_shader(&shader),
            }
        });
        self.textures.drain(|texture| {
            match texture.backend() {
                Some(backend) => backend.device().deallocate_texture(&texture),
                None => self.device.deallocate_texture(&texture),
            }
        });
        self.device.destruct();
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.target_destroy(self.framebuffer());
            runtime.remove_backend(self.id);
        }
    }
}
