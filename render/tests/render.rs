//! End-to-end exercises of the submission pipeline on the null device.

use lumen_render::backend::Backend;
use lumen_render::compile::{render_program_compile, render_shader_compile, source_hash};
use lumen_render::event::{render_event_handle_resource, ResourceEvent};
use lumen_render::null::NullDevice;
use lumen_render::parameter::{ParameterData, ParameterDecl};
use lumen_render::platform::{resource_platform, PlatformDecl};
use lumen_render::resource::{
    MemoryResourceAccess, MemorySource, ResourceAccess, KEY_PIXELSHADER, KEY_SOURCE, KEY_TYPE,
    KEY_VERTEXSHADER,
};
use lumen_render::sort::sort_merge;
use lumen_render::vertex::{VertexAttribute, VertexDecl, VertexFormat};
use lumen_render::{
    BufferFlags, BufferUsage, ClearFlags, ColorSpace, Command, Context, Drawable, Handle,
    IndexFormat, NativeHandles, PixelFormat, Primitive, RenderApi, RenderApiGroup, RenderConfig,
    RenderRuntime, UploadPolicy,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

const VERTEX_SOURCE: &str = "\
uniform mat4 transform_mvp;\n\
attribute vec3 position;\n\
attribute vec4 color;\n\
varying vec4 frag_color;\n\
void main() {\n\
    frag_color = color;\n\
}\n";

const PIXEL_SOURCE: &str = "\
varying vec4 frag_color;\n\
void main() {\n\
}\n";

const PROGRAM_UUID: &str = "1ab9bba8-3f2f-4649-86bb-8b8b07e99af2";

fn null_platform() -> u64 {
    let mut decl = PlatformDecl::any();
    decl.render_api = RenderApi::Null as i32;
    resource_platform(decl)
}

fn device_stats(backend: &Backend) -> lumen_render::NullDeviceStats {
    backend
        .device()
        .as_any()
        .downcast_ref::<NullDevice>()
        .expect("null device")
        .stats()
}

/// Builds a runtime with sources for a vertex shader, a pixel shader and the
/// cube program, compiled for the null platform.
fn runtime_with_cube_program() -> (Arc<RenderRuntime>, Uuid, Uuid, Uuid) {
    let runtime = RenderRuntime::new(RenderConfig::default());
    let access = Arc::new(MemoryResourceAccess::new());
    runtime.set_resource_access(access.clone());

    let platform = null_platform();
    let vertex_uuid = Uuid::new_v4();
    let pixel_uuid = Uuid::new_v4();
    let program_uuid = Uuid::parse_str(PROGRAM_UUID).unwrap();

    let vertex_source = Arc::new(MemorySource::new());
    vertex_source.set(KEY_TYPE, platform, "vertexshader");
    vertex_source.set_blob(KEY_SOURCE, platform, VERTEX_SOURCE.as_bytes());
    access.insert_source(vertex_uuid, vertex_source);

    let pixel_source = Arc::new(MemorySource::new());
    pixel_source.set(KEY_TYPE, platform, "pixelshader");
    pixel_source.set_blob(KEY_SOURCE, platform, PIXEL_SOURCE.as_bytes());
    access.insert_source(pixel_uuid, pixel_source);

    let program_source = Arc::new(MemorySource::new());
    program_source.set(KEY_TYPE, platform, "program");
    program_source.set(
        KEY_VERTEXSHADER,
        platform,
        &vertex_uuid.to_string(),
    );
    program_source.set(KEY_PIXELSHADER, platform, &pixel_uuid.to_string());
    access.insert_source(program_uuid, program_source.clone());

    let hash = source_hash(program_source.as_ref());
    render_program_compile(
        &runtime,
        program_uuid,
        platform,
        program_source.as_ref(),
        hash,
        "program",
    )
    .expect("program compiles for the null platform");

    (runtime, program_uuid, vertex_uuid, pixel_uuid)
}

fn cube_vertex_decl() -> VertexDecl {
    VertexDecl::new(&[
        (VertexFormat::Float3, VertexAttribute::Position),
        (VertexFormat::Float4, VertexAttribute::PrimaryColor),
    ])
}

// ------------------------------------------------------------------------
// Scenario: fallback path

#[test]
fn selector_falls_back_to_first_available_api() {
    let runtime = RenderRuntime::new(RenderConfig::default());
    runtime.register_backend_factory(RenderApi::OpenGL2, || {
        NullDevice::with_api(RenderApi::OpenGL2)
    });
    runtime.api_disable(&[RenderApi::DirectX, RenderApi::OpenGL4]);

    let backend = runtime
        .allocate_backend(RenderApi::DirectX, true)
        .expect("fallback reaches the opengl2 factory");
    assert_eq!(backend.api(), RenderApi::OpenGL2);
    assert_eq!(backend.api_group(), RenderApiGroup::OpenGL);
    assert!(backend.framebuffer().is_some());

    let decl = lumen_render::platform::resource_platform_decompose(backend.resource_platform());
    assert_eq!(decl.render_api_group, RenderApiGroup::OpenGL as i32);
    assert_eq!(decl.render_api, RenderApi::OpenGL2 as i32);
}

#[test]
fn selector_reports_unsupported_without_fallback() {
    let runtime = RenderRuntime::new(RenderConfig::default());
    // No factories registered: the first enabled API fails and fallback is
    // not allowed
    assert!(runtime
        .allocate_backend(RenderApi::DirectX11, false)
        .is_none());
}

#[test]
fn selector_reaches_null_without_registered_backends() {
    let runtime = RenderRuntime::new(RenderConfig::default());
    let backend = runtime
        .allocate_backend(RenderApi::OpenGL, true)
        .expect("null is the terminal fallback");
    assert_eq!(backend.api(), RenderApi::Null);
}

// ------------------------------------------------------------------------
// Scenario: cube draw

#[test]
fn cube_draw_dispatches_clean() {
    let (runtime, program_uuid, _, _) = runtime_with_cube_program();
    let backend = runtime
        .allocate_backend(RenderApi::Null, false)
        .expect("null backend");
    backend.set_format(PixelFormat::R8G8B8X8, ColorSpace::Linear);
    assert!(backend.set_drawable(Drawable::window(0, 800, 600, NativeHandles::default())));

    let decl = cube_vertex_decl();
    assert_eq!(decl.size(), 28);
    let vertex_data = vec![0u8; 8 * 28];
    let vertex_buffer = runtime.vertex_buffer_create(
        &backend,
        BufferUsage::Static,
        8,
        decl,
        Some(&vertex_data),
    );
    assert!(vertex_buffer.is_some());

    let indices: Vec<u8> = (0..36u16).flat_map(|i| (i % 8).to_le_bytes()).collect();
    let index_buffer = runtime.index_buffer_create(
        &backend,
        BufferUsage::Static,
        IndexFormat::U16,
        36,
        Some(&indices),
    );
    assert!(index_buffer.is_some());

    let program = backend.program_load(program_uuid);
    assert!(program.is_some());

    let parameter_buffer = runtime.parameter_buffer_create(
        &backend,
        BufferUsage::Dynamic,
        ParameterDecl::new(&[(ParameterData::Matrix, 1)]),
        1,
        None,
    );
    assert!(parameter_buffer.is_some());
    let identity: [f32; 16] = [
        1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
    ];
    runtime
        .buffer(parameter_buffer)
        .unwrap()
        .encode_matrix(0, 0, &identity);

    let context = Context::new(32);
    context.set_target(backend.framebuffer());
    context.queue(
        &Command::viewport(0, 0, 800, 600, 0.0, 1.0),
        context.sequential_key(),
    );
    context.queue(
        &Command::clear(
            ClearFlags::COLOR | ClearFlags::DEPTH | ClearFlags::STENCIL,
            0x0000_0000,
            0xffff_ffff,
            1.0,
            0,
        ),
        context.sequential_key(),
    );
    context.queue(
        &Command::render(
            Primitive::TriangleList,
            12,
            program,
            vertex_buffer,
            index_buffer,
            parameter_buffer,
            Handle::NONE,
        ),
        context.sequential_key(),
    );

    let frame_before = backend.frame_count();
    sort_merge(&[&context]);
    backend.dispatch(&[&context]);
    backend.flip();

    let stats = device_stats(&backend);
    assert_eq!(stats.viewports, 1);
    assert_eq!(stats.clears, 1);
    assert_eq!(stats.draws, 1);
    assert_eq!(stats.invalid_commands, 0);
    assert_eq!(backend.frame_count(), frame_before + 1);
    assert_eq!(context.reserved(), 0);

    let target = runtime.target(backend.framebuffer()).unwrap();
    assert_eq!((target.width(), target.height()), (800, 600));
}

// ------------------------------------------------------------------------
// Scenario: concurrent context production

#[test]
fn concurrent_producers_keep_submission_order() {
    let runtime = RenderRuntime::new(RenderConfig::default());
    let backend = runtime.allocate_backend(RenderApi::Null, false).unwrap();
    backend.set_format(PixelFormat::R8G8B8X8, ColorSpace::Linear);
    backend.set_drawable(Drawable::window(0, 640, 480, NativeHandles::default()));

    let context = Arc::new(Context::new(4096));
    let mut producers = Vec::new();
    for _ in 0..4 {
        let context = Arc::clone(&context);
        producers.push(thread::spawn(move || {
            for _ in 0..1000 {
                let key = context.sequential_key();
                context.queue(&Command::viewport(0, 0, 640, 480, 0.0, 1.0), key);
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }
    assert_eq!(context.reserved(), 4000);

    sort_merge(&[context.as_ref()]);
    {
        let order = context.order();
        assert_eq!(order.len(), 4000);
        let mut seen = vec![false; 4000];
        for &index in order.iter() {
            assert!(!seen[index as usize]);
            seen[index as usize] = true;
        }
    }

    backend.dispatch(&[context.as_ref()]);
    assert_eq!(context.reserved(), 0);
    assert_eq!(device_stats(&backend).viewports, 4000);
}

// ------------------------------------------------------------------------
// Scenario: shader reload

#[test]
fn shader_reload_preserves_handle() {
    let runtime = RenderRuntime::new(RenderConfig::default());
    let access = Arc::new(MemoryResourceAccess::new());
    runtime.set_resource_access(access.clone());

    let platform = null_platform();
    let shader_uuid = Uuid::new_v4();
    let source = Arc::new(MemorySource::new());
    source.set(KEY_TYPE, platform, "vertexshader");
    source.set_blob(KEY_SOURCE, platform, VERTEX_SOURCE.as_bytes());
    access.insert_source(shader_uuid, source.clone());
    let hash = source_hash(source.as_ref());
    render_shader_compile(
        &runtime,
        shader_uuid,
        platform,
        source.as_ref(),
        hash,
        "vertexshader",
    )
    .unwrap();

    let backend = runtime.allocate_backend(RenderApi::Null, false).unwrap();
    backend.set_format(PixelFormat::R8G8B8X8, ColorSpace::Linear);
    backend.set_drawable(Drawable::window(0, 320, 240, NativeHandles::default()));

    let handle = backend.shader_load(shader_uuid);
    assert!(handle.is_some());
    let object_before = backend.shader_raw(handle).unwrap().backend_data(0);

    // Modify the source and recompile, then deliver the change event
    let modified = format!("{}\n// edited\n", VERTEX_SOURCE);
    source.set_blob(KEY_SOURCE, platform, modified.as_bytes());
    render_shader_compile(
        &runtime,
        shader_uuid,
        platform,
        source.as_ref(),
        source_hash(source.as_ref()),
        "vertexshader",
    )
    .unwrap();

    assert!(render_event_handle_resource(
        &backend,
        ResourceEvent::Modify(shader_uuid)
    ));
    assert_eq!(backend.shader_lookup(shader_uuid), handle);
    let shader = backend.shader_raw(handle).unwrap();
    assert_ne!(shader.backend_data(0), object_before);
}

// ------------------------------------------------------------------------
// Scenario: compile platform superset

#[test]
fn compile_enumerates_superset_platform() {
    let runtime = RenderRuntime::new(RenderConfig::default());
    let access = Arc::new(MemoryResourceAccess::new());
    runtime.set_resource_access(access.clone());

    let dx_used = Arc::new(AtomicBool::new(false));
    let dx_used_factory = Arc::clone(&dx_used);
    runtime.register_backend_factory(RenderApi::DirectX11, move || {
        dx_used_factory.store(true, Ordering::Release);
        NullDevice::with_api(RenderApi::DirectX11)
    });

    // Source specialized for the DirectX group with no concrete api
    let mut group_decl = PlatformDecl::any();
    group_decl.render_api_group = RenderApiGroup::DirectX as i32;
    let group_platform = resource_platform(group_decl);

    // Requested: concrete DirectX 11
    let mut request_decl = group_decl;
    request_decl.render_api = RenderApi::DirectX11 as i32;
    let request_platform = resource_platform(request_decl);

    let shader_uuid = Uuid::new_v4();
    let source = Arc::new(MemorySource::new());
    source.set(KEY_TYPE, group_platform, "pixelshader");
    source.set_blob(KEY_SOURCE, group_platform, PIXEL_SOURCE.as_bytes());
    access.insert_source(shader_uuid, source.clone());

    render_shader_compile(
        &runtime,
        shader_uuid,
        request_platform,
        source.as_ref(),
        source_hash(source.as_ref()),
        "pixelshader",
    )
    .expect("superset platform compiles");

    assert!(dx_used.load(Ordering::Acquire), "directx-group backend allocated");
    assert!(access.open_static(shader_uuid, group_platform).is_some());
    assert!(access.open_dynamic(shader_uuid, group_platform).is_some());
}

// ------------------------------------------------------------------------
// Scenario: buffer dirty/upload policy

#[test]
fn upload_policy_on_unlock_and_on_dispatch() {
    let (runtime, program_uuid, _, _) = runtime_with_cube_program();
    let backend = runtime.allocate_backend(RenderApi::Null, false).unwrap();
    backend.set_format(PixelFormat::R8G8B8X8, ColorSpace::Linear);
    backend.set_drawable(Drawable::window(0, 800, 600, NativeHandles::default()));

    let vertex_buffer = runtime.vertex_buffer_create(
        &backend,
        BufferUsage::Dynamic,
        16,
        cube_vertex_decl(),
        None,
    );
    let buffer = runtime.buffer(vertex_buffer).unwrap();
    assert!(!buffer.is_dirty());

    buffer.set_policy(UploadPolicy::OnUnlock);
    buffer.lock(BufferFlags::LOCK_WRITE);
    buffer.write(0, &vec![7u8; 10 * 28]);
    buffer.unlock();
    assert!(!buffer.is_dirty());
    assert_eq!(device_stats(&backend).buffer_uploads, 1);

    buffer.set_policy(UploadPolicy::OnDispatch);
    buffer.lock(BufferFlags::LOCK_WRITE);
    buffer.write(0, &vec![9u8; 4 * 28]);
    buffer.unlock();
    assert!(buffer.is_dirty());
    assert_eq!(device_stats(&backend).buffer_uploads, 1);

    // A draw referencing the buffer uploads it during dispatch
    let index_buffer = runtime.index_buffer_create(
        &backend,
        BufferUsage::Static,
        IndexFormat::U16,
        36,
        Some(&vec![0u8; 72]),
    );
    let parameter_buffer = runtime.parameter_buffer_create(
        &backend,
        BufferUsage::Dynamic,
        ParameterDecl::new(&[(ParameterData::Matrix, 1)]),
        1,
        None,
    );
    let program = backend.program_load(program_uuid);
    assert!(program.is_some());

    let context = Context::new(8);
    context.set_target(backend.framebuffer());
    context.queue(
        &Command::render(
            Primitive::TriangleList,
            12,
            program,
            vertex_buffer,
            index_buffer,
            parameter_buffer,
            Handle::NONE,
        ),
        context.sequential_key(),
    );
    sort_merge(&[&context]);
    backend.dispatch(&[&context]);

    assert!(!buffer.is_dirty());
    // Vertex upload from dispatch plus the first index buffer upload
    assert_eq!(device_stats(&backend).draws, 1);
    assert!(device_stats(&backend).buffer_uploads >= 2);
}

// ------------------------------------------------------------------------
// Locks, references, boundaries

#[test]
fn read_locks_leave_dirty_untouched() {
    let runtime = RenderRuntime::new(RenderConfig::default());
    let backend = runtime.allocate_backend(RenderApi::Null, false).unwrap();
    let handle = runtime.index_buffer_create(
        &backend,
        BufferUsage::Static,
        IndexFormat::U16,
        8,
        None,
    );
    let buffer = runtime.buffer(handle).unwrap();

    buffer.lock(BufferFlags::LOCK_READ);
    assert!(buffer.access().is_some());
    buffer.unlock();
    assert!(buffer.access().is_none());
    assert!(!buffer.is_dirty());

    buffer.lock(BufferFlags::LOCK_READ);
    buffer.unlock();
    assert!(!buffer.is_dirty());
}

#[test]
fn reference_and_destroy_balance() {
    let runtime = RenderRuntime::new(RenderConfig::default());
    let backend = runtime.allocate_backend(RenderApi::Null, false).unwrap();
    let handle = runtime.index_buffer_create(
        &backend,
        BufferUsage::Static,
        IndexFormat::U16,
        8,
        None,
    );
    let buffer = runtime.buffer(handle).unwrap();

    assert_eq!(buffer.reference(), handle);
    buffer.destroy();
    assert!(runtime.buffer(handle).is_some(), "still one reference left");
    buffer.destroy();
    assert!(runtime.buffer(handle).is_none());
}

#[test]
fn set_format_after_drawable_is_a_no_op() {
    let runtime = RenderRuntime::new(RenderConfig::default());
    let backend = runtime.allocate_backend(RenderApi::Null, false).unwrap();
    backend.set_format(PixelFormat::R8G8B8X8, ColorSpace::Linear);
    backend.set_drawable(Drawable::window(0, 100, 100, NativeHandles::default()));
    backend.set_format(PixelFormat::R8G8B8A8, ColorSpace::SRgb);
    assert_eq!(backend.pixelformat(), PixelFormat::R8G8B8X8);
    assert_eq!(backend.colorspace(), ColorSpace::Linear);
}

#[test]
fn framebuffer_tracks_drawable_dimensions() {
    let runtime = RenderRuntime::new(RenderConfig::default());
    let backend = runtime.allocate_backend(RenderApi::Null, false).unwrap();
    backend.set_format(PixelFormat::R8G8B8X8, ColorSpace::Linear);
    backend.set_drawable(Drawable::window(0, 1024, 768, NativeHandles::default()));
    let target = runtime.target(backend.framebuffer()).unwrap();
    assert_eq!((target.width(), target.height()), (1024, 768));
    assert_eq!(target.pixelformat(), PixelFormat::R8G8B8X8);
}

#[test]
fn stale_render_commands_are_skipped() {
    let (runtime, program_uuid, _, _) = runtime_with_cube_program();
    let backend = runtime.allocate_backend(RenderApi::Null, false).unwrap();
    backend.set_format(PixelFormat::R8G8B8X8, ColorSpace::Linear);
    backend.set_drawable(Drawable::window(0, 800, 600, NativeHandles::default()));

    let vertex_buffer = runtime.vertex_buffer_create(
        &backend,
        BufferUsage::Static,
        8,
        cube_vertex_decl(),
        Some(&vec![0u8; 8 * 28]),
    );
    let index_buffer = runtime.index_buffer_create(
        &backend,
        BufferUsage::Static,
        IndexFormat::U16,
        36,
        Some(&vec![0u8; 72]),
    );
    let parameter_buffer = runtime.parameter_buffer_create(
        &backend,
        BufferUsage::Dynamic,
        ParameterDecl::new(&[(ParameterData::Matrix, 1)]),
        1,
        None,
    );
    let program = backend.program_load(program_uuid);

    // Free the vertex buffer before dispatch; the draw must be skipped
    runtime.buffer_destroy(vertex_buffer);

    let context = Context::new(4);
    context.set_target(backend.framebuffer());
    context.queue(
        &Command::render(
            Primitive::TriangleList,
            12,
            program,
            vertex_buffer,
            index_buffer,
            parameter_buffer,
            Handle::NONE,
        ),
        context.sequential_key(),
    );
    sort_merge(&[&context]);
    backend.dispatch(&[&context]);

    let stats = device_stats(&backend);
    assert_eq!(stats.draws, 0);
    assert_eq!(stats.invalid_commands, 1);
    assert_eq!(context.reserved(), 0);
}
