//! Null render device.
//!
//! The terminal fallback of the API selector. Performs no API calls but runs
//! the full command translation: handles are resolved and validated, dirty
//! buffers referenced by draws are uploaded, parameter tables are walked and
//! the per-command statistics are tracked, so the submission pipeline is
//! fully observable without a GPU. Shader "compilation" validates the source
//! and stores it verbatim as the compiled artifact.

use crate::api::RenderApi;
use crate::backend::{Backend, BackendDevice};
use crate::buffer::{Buffer, BufferKind};
use crate::command::Command;
use crate::context::Context;
use crate::drawable::{Drawable, Resolution};
use crate::error::{Error, Result};
use crate::format::{ColorSpace, PixelFormat};
use crate::handle::Handle;
use crate::program::{Program, ProgramAttribute, ProgramDescriptor, ProgramParameter};
use crate::reflect::{
    attribute_format, extract_declarations, parameter_type, DeclarationKind,
};
use crate::resource::name_hash;
use crate::runtime::RenderRuntime;
use crate::shader::{Shader, ShaderKind, ShaderStages};
use crate::state::RenderState;
use crate::vertex::VertexAttribute;
use fxhash::FxHashMap;
use lazy_static::lazy_static;
use log::{debug, error, trace};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

lazy_static! {
    /// Fixed attribute-name→binding-slot table used at program link.
    static ref ATTRIBUTE_BINDINGS: FxHashMap<&'static str, VertexAttribute> = {
        let mut table = FxHashMap::default();
        table.insert("position", VertexAttribute::Position);
        table.insert("weight", VertexAttribute::Weight);
        table.insert("normal", VertexAttribute::Normal);
        table.insert("color", VertexAttribute::PrimaryColor);
        table.insert("color1", VertexAttribute::SecondaryColor);
        table.insert("texcoord", VertexAttribute::Texcoord0);
        table.insert("texcoord0", VertexAttribute::Texcoord0);
        table.insert("texcoord1", VertexAttribute::Texcoord1);
        table.insert("texcoord2", VertexAttribute::Texcoord2);
        table
    };
}

/// Snapshot of the device's translation counters.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullDeviceStats {
    pub clears: u64,
    pub viewports: u64,
    pub draws: u64,
    pub buffer_uploads: u64,
    pub invalid_commands: u64,
}

pub struct NullDevice {
    api: RenderApi,
    shaders: Mutex<FxHashMap<u64, Vec<u8>>>,
    next_object: AtomicU64,
    clears: AtomicU64,
    viewports: AtomicU64,
    draws: AtomicU64,
    buffer_uploads: AtomicU64,
    invalid_commands: AtomicU64,
    use_clear_scissor: AtomicBool,
}

impl NullDevice {
    pub fn new() -> NullDevice {
        NullDevice::with_api(RenderApi::Null)
    }

    /// A null device reporting an arbitrary API identity. Lets embedders and
    /// tests stand in for a concrete backend in the selector.
    pub fn with_api(api: RenderApi) -> NullDevice {
        NullDevice {
            api,
            shaders: Mutex::new(FxHashMap::default()),
            next_object: AtomicU64::new(1),
            clears: AtomicU64::new(0),
            viewports: AtomicU64::new(0),
            draws: AtomicU64::new(0),
            buffer_uploads: AtomicU64::new(0),
            invalid_commands: AtomicU64::new(0),
            use_clear_scissor: AtomicBool::new(false),
        }
    }

    pub fn stats(&self) -> NullDeviceStats {
        NullDeviceStats {
            clears: self.clears.load(Ordering::Acquire),
            viewports: self.viewports.load(Ordering::Acquire),
            draws: self.draws.load(Ordering::Acquire),
            buffer_uploads: self.buffer_uploads.load(Ordering::Acquire),
            invalid_commands: self.invalid_commands.load(Ordering::Acquire),
        }
    }

    fn shader_source(&self, shader: &Shader) -> Option<Vec<u8>> {
        self.shaders
            .lock()
            .unwrap()
            .get(&shader.backend_data(0))
            .cloned()
    }

    fn introspect(
        &self,
        vertex: &Shader,
        pixel: &Shader,
    ) -> Result<ProgramDescriptor> {
        let vertex_source = self.shader_source(vertex).ok_or_else(|| {
            Error::BackendCompileFailure("vertex shader has no uploaded source".to_owned())
        })?;
        let pixel_source = self.shader_source(pixel).ok_or_else(|| {
            Error::BackendCompileFailure("pixel shader has no uploaded source".to_owned())
        })?;
        let vertex_text = String::from_utf8_lossy(&vertex_source).into_owned();
        let pixel_text = String::from_utf8_lossy(&pixel_source).into_owned();

        let mut descriptor = ProgramDescriptor::default();

        for declaration in extract_declarations(&vertex_text) {
            if declaration.kind != DeclarationKind::Attribute {
                continue;
            }
            let binding = match ATTRIBUTE_BINDINGS.get(declaration.name.as_str()) {
                Some(binding) => *binding,
                None => {
                    let log = format!("invalid/unknown attribute name: {}", declaration.name);
                    error!("{}", log);
                    return Err(Error::BackendCompileFailure(log));
                }
            };
            let format = match attribute_format(&declaration.type_token) {
                Some(format) => format,
                None => {
                    let log = format!(
                        "invalid/unknown attribute type: {}",
                        declaration.type_token
                    );
                    error!("{}", log);
                    return Err(Error::BackendCompileFailure(log));
                }
            };
            descriptor.attributes.push(ProgramAttribute {
                binding: binding as u8,
                format,
                offset: 0,
            });
            descriptor
                .attribute_names
                .push(name_hash(&declaration.name));
        }
        descriptor.sort_attributes();

        // Uniforms in introspection order: vertex stage first, then pixel
        // stage declarations not already seen
        let stage_sources = [
            (vertex_text.as_str(), ShaderStages::VERTEX),
            (pixel_text.as_str(), ShaderStages::PIXEL),
        ];
        for (text, stage) in stage_sources.iter() {
            for declaration in extract_declarations(text) {
                if declaration.kind != DeclarationKind::Uniform {
                    continue;
                }
                let name = name_hash(&declaration.name);
                if let Some(existing) = descriptor
                    .parameters
                    .iter_mut()
                    .find(|parameter| parameter.name == name)
                {
                    existing.stages |= *stage;
                    continue;
                }
                let parameter_type = match parameter_type(&declaration.type_token) {
                    Some(parameter_type) => parameter_type,
                    None => {
                        let log = format!(
                            "invalid/unknown uniform type: {}",
                            declaration.type_token
                        );
                        error!("{}", log);
                        return Err(Error::BackendCompileFailure(log));
                    }
                };
                let location = descriptor.parameters.len() as u32;
                descriptor.parameters.push(ProgramParameter {
                    name,
                    parameter_type,
                    dim: declaration.dim,
                    offset: 0,
                    stages: *stage,
                    location,
                });
            }
        }
        descriptor.pack_parameters();

        Ok(descriptor)
    }

    fn translate_clear(&self) {
        if self.use_clear_scissor.load(Ordering::Acquire) {
            trace!("clear restricted to scissor region");
        }
        self.clears.fetch_add(1, Ordering::AcqRel);
    }

    fn translate_viewport(
        &self,
        backend: &Backend,
        runtime: &RenderRuntime,
        context: &Context,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    ) {
        let (target_width, target_height) = runtime
            .target(context.target())
            .map(|target| (target.width(), target.height()))
            .or_else(|| backend.drawable_size())
            .unwrap_or((0, 0));
        let strict = x != 0
            || y != 0
            || u32::from(width) != target_width
            || u32::from(height) != target_height;
        self.use_clear_scissor.store(strict, Ordering::Release);
        self.viewports.fetch_add(1, Ordering::AcqRel);
    }

    #[allow(clippy::too_many_arguments)]
    fn translate_render(
        &self,
        backend: &Backend,
        runtime: &RenderRuntime,
        primitive: crate::command::Primitive,
        count: u16,
        program: Handle,
        vertex_buffer: Handle,
        index_buffer: Handle,
        parameter_buffer: Handle,
        state_buffer: Handle,
    ) {
        let vertex = runtime.buffer(vertex_buffer);
        let index = runtime.buffer(index_buffer);
        let parameters = runtime.buffer(parameter_buffer);
        let program = backend.program_raw(program);
        let (vertex, index, parameters, program) = match (vertex, index, parameters, program) {
            (Some(vertex), Some(index), Some(parameters), Some(program)) => {
                (vertex, index, parameters, program)
            }
            _ => {
                // Outdated references
                error!("render command using invalid resources, skipped");
                self.invalid_commands.fetch_add(1, Ordering::AcqRel);
                return;
            }
        };

        for buffer in [&vertex, &index, &parameters].iter() {
            if buffer.is_dirty() {
                buffer.upload();
            }
        }

        self.walk_parameters(&parameters, &program);

        match runtime
            .buffer(state_buffer)
            .map(|buffer| RenderState::from_bytes(&buffer.store_bytes()))
        {
            Some(state) => self.set_state(&state),
            None => self.set_default_state(),
        }

        let index_count = primitive.index_count(u32::from(count));
        let available = index.store_len() as u32 / index.element_size().max(1);
        if index_count > available {
            error!(
                "render command indexes past the index buffer ({} > {})",
                index_count, available
            );
            self.invalid_commands.fetch_add(1, Ordering::AcqRel);
            return;
        }

        self.draws.fetch_add(1, Ordering::AcqRel);
    }

    /// Validates every program parameter against the parameter buffer, the
    /// way a concrete device would issue one uniform write per entry.
    fn walk_parameters(&self, buffer: &Arc<Buffer>, program: &Arc<Program>) {
        let store = buffer.store_bytes();
        let descriptor = program.descriptor();
        for parameter in &descriptor.parameters {
            let size = parameter.parameter_type.size() * u32::from(parameter.dim.max(1));
            let end = (parameter.offset + size) as usize;
            if end > store.len() {
                error!(
                    "program parameter at offset {} overruns parameter data ({} > {})",
                    parameter.offset,
                    end,
                    store.len()
                );
            }
        }
    }
}

impl Default for NullDevice {
    fn default() -> NullDevice {
        NullDevice::new()
    }
}

impl BackendDevice for NullDevice {
    fn api(&self) -> RenderApi {
        self.api
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn construct(&self) -> bool {
        debug!("constructed null render backend");
        true
    }

    fn destruct(&self) {
        debug!("destructed null render backend");
    }

    fn enumerate_adapters(&self) -> Vec<u32> {
        vec![0]
    }

    fn enumerate_modes(&self, _adapter: u32) -> Vec<Resolution> {
        vec![Resolution {
            width: 800,
            height: 600,
            pixelformat: PixelFormat::R8G8B8X8,
            colorspace: ColorSpace::Linear,
            refresh: 60,
        }]
    }

    fn set_drawable(&self, _backend: &Backend, _drawable: &Drawable) -> bool {
        true
    }

    fn dispatch(&self, backend: &Backend, runtime: &RenderRuntime, contexts: &[&Context]) {
        for context in contexts {
            let count = context.reserved();
            let order: Vec<u32> = context.order().to_vec();
            for &index in order.iter().take(count) {
                match context.command(index) {
                    Command::None => {}
                    Command::Clear { .. } => self.translate_clear(),
                    Command::Viewport {
                        x,
                        y,
                        width,
                        height,
                        ..
                    } => self.translate_viewport(backend, runtime, context, x, y, width, height),
                    Command::Render {
                        primitive,
                        count,
                        program,
                        vertex_buffer,
                        index_buffer,
                        parameter_buffer,
                        state_buffer,
                    } => self.translate_render(
                        backend,
                        runtime,
                        primitive,
                        count,
                        program,
                        vertex_buffer,
                        index_buffer,
                        parameter_buffer,
                        state_buffer,
                    ),
                }
            }
        }
    }

    fn allocate_buffer(&self, buffer: &Buffer) {
        buffer.allocate_store();
    }

    fn deallocate_buffer(&self, buffer: &Buffer, sys: bool, aux: bool) {
        if sys {
            buffer.clear_store();
        }
        if aux {
            buffer.set_backend_data(0, 0);
        }
    }

    fn upload_buffer(&self, _backend: &Backend, buffer: &Buffer) -> bool {
        // Parameter and state data never becomes a GPU-side object
        match buffer.kind() {
            BufferKind::Parameter(_) | BufferKind::State => return true,
            _ => {}
        }
        if buffer.backend_data(0) == 0 {
            buffer.set_backend_data(0, self.next_object.fetch_add(1, Ordering::AcqRel));
        }
        self.buffer_uploads.fetch_add(1, Ordering::AcqRel);
        true
    }

    fn upload_shader(&self, _backend: &Backend, shader: &Shader, bytes: &[u8]) -> bool {
        match self.compile_shader(shader.kind(), bytes) {
            Ok(compiled) => {
                let mut shaders = self.shaders.lock().unwrap();
                if shader.backend_data(0) != 0 {
                    shaders.remove(&shader.backend_data(0));
                }
                let object = self.next_object.fetch_add(1, Ordering::AcqRel);
                shaders.insert(object, compiled);
                shader.set_backend_data(0, object);
                true
            }
            Err(err) => {
                error!("unable to compile shader: {}", err);
                false
            }
        }
    }

    fn deallocate_shader(&self, shader: &Shader) {
        if shader.backend_data(0) != 0 {
            self.shaders.lock().unwrap().remove(&shader.backend_data(0));
            shader.set_backend_data(0, 0);
        }
    }

    fn upload_program(&self, _backend: &Backend, program: &Program) -> bool {
        let (vertex, pixel) = match (program.vertex_shader(), program.pixel_shader()) {
            (Some(vertex), Some(pixel)) => (vertex, pixel),
            _ => return false,
        };
        let introspected = match self.introspect(&vertex, &pixel) {
            Ok(introspected) => introspected,
            Err(err) => {
                error!("unable to link program: {}", err);
                return false;
            }
        };
        // Resolve locations into the persisted parameter table
        {
            let mut descriptor = program.descriptor();
            if descriptor.parameters.is_empty() && descriptor.attributes.is_empty() {
                *descriptor = introspected;
            } else {
                for parameter in &mut descriptor.parameters {
                    if let Some(linked) = introspected.parameter(parameter.name) {
                        parameter.location = linked.location;
                    }
                }
            }
        }
        program.set_backend_data(0, self.next_object.fetch_add(1, Ordering::AcqRel));
        true
    }

    fn deallocate_program(&self, program: &Program) {
        program.set_backend_data(0, 0);
    }

    fn link_program(
        &self,
        _backend: &Backend,
        vertex: &Shader,
        pixel: &Shader,
    ) -> Result<ProgramDescriptor> {
        self.introspect(vertex, pixel)
    }

    fn compile_shader(&self, _kind: ShaderKind, source: &[u8]) -> Result<Vec<u8>> {
        if source.is_empty() {
            return Err(Error::BackendCompileFailure("empty shader source".to_owned()));
        }
        let text = String::from_utf8_lossy(source);
        if !text.contains("main") {
            return Err(Error::BackendCompileFailure(
                "shader source has no entry point".to_owned(),
            ));
        }
        debug!("successfully compiled shader: <no message>");
        Ok(source.to_vec())
    }
}
