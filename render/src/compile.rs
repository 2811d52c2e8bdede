//! Offline shader and program compilation.
//!
//! Source resources carry per-platform specializations. Compilation first
//! enumerates the subplatforms to build: every source platform at least as
//! specific as the requested one, or, when the request has no entries, the
//! most specialized source platforms the request itself refines (the
//! superset match). Programs additionally fan out to every platform their
//! shaders specialize on, since a program is the sum of its shaders. Each
//! subplatform compile runs on a scratch backend of the matching API with a
//! throwaway drawable and emits the two-part compiled resource.

use crate::api::{RenderApi, RenderApiGroup};
use crate::backend::thread_backend;
use crate::drawable::{Drawable, NativeHandles};
use crate::error::{Error, Result};
use crate::format::{ColorSpace, PixelFormat};
use crate::platform::{
    resource_platform_decompose, resource_platform_is_equal_or_more_specific, PlatformDecl,
    RESOURCE_PLATFORM_ALL,
};
use crate::resource::{
    blob_checksum, type_hash, write_dynamic_blob, ResourceAccess, ResourceHeader, ResourceSource,
    SourceChange, SourceValue, KEY_PIXELSHADER, KEY_SHADER, KEY_SOURCE, KEY_TYPE,
    KEY_VERTEXSHADER, PROGRAM_RESOURCE_VERSION, SHADER_RESOURCE_VERSION, TYPE_PIXELSHADER,
    TYPE_PROGRAM, TYPE_SHADER, TYPE_VERTEXSHADER,
};
use crate::runtime::RenderRuntime;
use crate::shader::{parse_shader_static, write_shader_descriptor, ShaderKind};
use log::{debug, error, warn};
use smallvec::SmallVec;
use std::sync::Arc;
use uuid::Uuid;

fn invalid(message: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message.to_owned(),
    ))
}

fn output(message: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        message.to_owned(),
    ))
}

/// True when a compile error came from writing the output streams rather
/// than from the input or the compiler. The CLI tools report these under
/// their unable-to-open-output exit code.
pub fn is_output_failure(error: &Error) -> bool {
    match error {
        Error::Io(io_error) => io_error.kind() == std::io::ErrorKind::Other,
        _ => false,
    }
}

/// Derives a source hash for a resource from its change map contents.
pub fn source_hash(source: &dyn ResourceSource) -> [u8; 32] {
    let mut digest = 0xcbf2_9ce4_8422_2325u64;
    let mut mix = |value: u64| {
        digest ^= value;
        digest = digest.wrapping_mul(0x0000_0100_0000_01b3);
    };
    for platform in source.platforms() {
        mix(platform);
        for key in [KEY_SOURCE, KEY_SHADER, KEY_VERTEXSHADER, KEY_PIXELSHADER, KEY_TYPE].iter() {
            if let Some(change) = source.get(*key, platform) {
                mix(*key);
                match change.value {
                    SourceValue::Value(value) => mix(blob_checksum(value.as_bytes())),
                    SourceValue::Blob { checksum, .. } => mix(checksum),
                }
            }
        }
    }
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&digest.to_le_bytes());
    hash
}

/// Compiles a source resource of any render type.
pub fn render_compile(
    runtime: &Arc<RenderRuntime>,
    uuid: Uuid,
    platform: u64,
    source: &dyn ResourceSource,
    source_hash: [u8; 32],
    type_name: &str,
) -> Result<()> {
    match type_hash(type_name) {
        hash if hash == TYPE_VERTEXSHADER || hash == TYPE_PIXELSHADER || hash == TYPE_SHADER => {
            render_shader_compile(runtime, uuid, platform, source, source_hash, type_name)
        }
        hash if hash == TYPE_PROGRAM => {
            render_program_compile(runtime, uuid, platform, source, source_hash, type_name)
        }
        _ => Err(invalid("unsupported resource type")),
    }
}

/// Subplatforms equal to or more specific than the requested platform.
fn platform_subset(source: &dyn ResourceSource, platform: u64) -> Vec<u64> {
    let mut subplatforms = Vec::new();
    for candidate in source.platforms() {
        if platform == RESOURCE_PLATFORM_ALL
            || resource_platform_is_equal_or_more_specific(candidate, platform)
        {
            if !subplatforms.contains(&candidate) {
                subplatforms.push(candidate);
            }
        }
    }
    subplatforms
}

/// Subplatforms the requested platform is equal to or more specific than,
/// most specialized first.
fn platform_superset(source: &dyn ResourceSource, platform: u64) -> Vec<u64> {
    let mut subplatforms: Vec<u64> = Vec::new();
    for candidate in source.platforms() {
        if platform == RESOURCE_PLATFORM_ALL
            || resource_platform_is_equal_or_more_specific(platform, candidate)
        {
            if subplatforms.contains(&candidate) {
                continue;
            }
            let position = subplatforms
                .iter()
                .position(|&existing| {
                    resource_platform_is_equal_or_more_specific(candidate, existing)
                })
                .unwrap_or(subplatforms.len());
            subplatforms.insert(position, candidate);
        }
    }
    subplatforms
}

/// Picks the concrete API for a subplatform: an unspecific api field falls
/// back to the group default; an unspecific group skips the subplatform.
fn normalize_api(decl: &PlatformDecl) -> Option<RenderApi> {
    if decl.render_api > RenderApi::Default as i32 {
        return Some(RenderApi::from_index(decl.render_api as usize));
    }
    if decl.render_api_group == RenderApiGroup::OpenGL as i32 {
        Some(RenderApi::OpenGL)
    } else if decl.render_api_group == RenderApiGroup::DirectX as i32 {
        Some(RenderApi::DirectX)
    } else if decl.render_api_group == RenderApiGroup::GLES as i32 {
        Some(RenderApi::GLES)
    } else {
        None
    }
}

fn uuid_value(change: &SourceChange) -> Option<Uuid> {
    match &change.value {
        SourceValue::Value(value) => Uuid::parse_str(value.trim()).ok(),
        _ => None,
    }
}

fn restore_thread_backend(previous: Option<Arc<crate::backend::Backend>>) {
    if let Some(backend) = previous {
        backend.enable_thread();
    }
}

pub fn render_shader_compile(
    runtime: &Arc<RenderRuntime>,
    uuid: Uuid,
    platform: u64,
    source: &dyn ResourceSource,
    source_hash: [u8; 32],
    type_name: &str,
) -> Result<()> {
    let resource_type = type_hash(type_name);
    if resource_type != TYPE_VERTEXSHADER
        && resource_type != TYPE_PIXELSHADER
        && resource_type != TYPE_SHADER
    {
        return Err(invalid("not a shader resource"));
    }
    if resource_type == TYPE_SHADER {
        return render_shader_ref_compile(runtime, uuid, platform, source, source_hash);
    }
    let kind = if resource_type == TYPE_VERTEXSHADER {
        ShaderKind::Vertex
    } else {
        ShaderKind::Pixel
    };

    let access = runtime
        .resource_access()
        .ok_or_else(|| invalid("no resource access configured"))?;

    let mut subplatforms = platform_subset(source, platform);
    if subplatforms.is_empty() {
        // The requested platform had no values; find the most specialized
        // platforms that are supersets of the request
        subplatforms = platform_superset(source, platform);
    }

    let previous = thread_backend();
    let mut result = Ok(());

    for subplatform in subplatforms {
        // Shaders are always platform specific
        if subplatform == 0 || subplatform == RESOURCE_PLATFORM_ALL {
            continue;
        }
        let decl = resource_platform_decompose(subplatform);
        let api = match normalize_api(&decl) {
            Some(api) => api,
            None => continue,
        };

        let backend = match runtime.allocate_backend(api, true) {
            Some(backend) => backend,
            None => {
                warn!("unable to create render backend for shader compilation");
                result = Err(Error::UnsupportedApi);
                break;
            }
        };
        backend.set_format(PixelFormat::R8G8B8X8, ColorSpace::Linear);
        backend.set_drawable(Drawable::window(0, 100, 100, NativeHandles::default()));

        let compiled = compile_shader_subplatform(
            &access,
            source,
            &backend,
            uuid,
            subplatform,
            kind,
            resource_type,
            source_hash,
        );
        backend.disable_thread();

        if let Err(err) = compiled {
            result = Err(err);
            break;
        }
    }

    restore_thread_backend(previous);
    result
}

#[allow(clippy::too_many_arguments)]
fn compile_shader_subplatform(
    access: &Arc<dyn ResourceAccess>,
    source: &dyn ResourceSource,
    backend: &crate::backend::Backend,
    uuid: Uuid,
    subplatform: u64,
    kind: ShaderKind,
    resource_type: u32,
    source_hash: [u8; 32],
) -> Result<()> {
    let change = source
        .get(KEY_SOURCE, subplatform)
        .ok_or_else(|| invalid("missing shader source blob"))?;
    let blob = match change.value {
        SourceValue::Blob { checksum, .. } => {
            source.read_blob(KEY_SOURCE, change.platform, checksum)
        }
        _ => None,
    };
    let blob = blob.ok_or_else(|| {
        error!("failed to read full source blob");
        invalid("failed to read full source blob")
    })?;

    let compiled = backend.device().compile_shader(kind, &blob).map_err(|err| {
        error!("shader compiler failed: {}", err);
        err
    })?;

    let header = ResourceHeader::new(resource_type, SHADER_RESOURCE_VERSION, source_hash);
    let mut stat = Vec::new();
    header.write_to(&mut stat);
    write_shader_descriptor(kind, &mut stat);
    if !access.write_static(uuid, subplatform, &stat) {
        error!("unable to create static resource stream");
        return Err(output("unable to create static resource stream"));
    }
    let dynamic = write_dynamic_blob(SHADER_RESOURCE_VERSION, &compiled);
    if !access.write_dynamic(uuid, subplatform, &dynamic) {
        error!("unable to create dynamic resource stream");
        return Err(output("unable to create dynamic resource stream"));
    }
    debug!("successfully compiled shader {} for {:#x}", uuid, subplatform);
    Ok(())
}

/// Shader-reference resources defer to a pointed-to shader, copying its
/// compiled artifact under the referencing UUID.
fn render_shader_ref_compile(
    runtime: &Arc<RenderRuntime>,
    uuid: Uuid,
    platform: u64,
    source: &dyn ResourceSource,
    source_hash: [u8; 32],
) -> Result<()> {
    let access = runtime
        .resource_access()
        .ok_or_else(|| invalid("no resource access configured"))?;
    let target_uuid = source
        .get(KEY_SHADER, platform)
        .as_ref()
        .and_then(uuid_value)
        .ok_or_else(|| invalid("shader reference has no target uuid"))?;

    let mut recompiled = false;
    loop {
        let stat = access.open_static(target_uuid, platform);
        let dynamic = access.open_dynamic(target_uuid, platform);
        if let (Some(stat), Some(dynamic)) = (stat, dynamic) {
            match parse_shader_static(&stat) {
                Ok((header, kind)) => {
                    let rewritten = ResourceHeader::new(
                        header.type_hash,
                        SHADER_RESOURCE_VERSION,
                        source_hash,
                    );
                    let mut out = Vec::new();
                    rewritten.write_to(&mut out);
                    write_shader_descriptor(kind, &mut out);
                    if !access.write_static(uuid, platform, &out)
                        || !access.write_dynamic(uuid, platform, &dynamic)
                    {
                        return Err(output("unable to copy shader resource streams"));
                    }
                    return Ok(());
                }
                Err(err) => {
                    warn!("referenced shader {} stale: {}", target_uuid, err);
                }
            }
        }
        if recompiled {
            return Err(invalid("referenced shader did not produce a valid resource"));
        }
        recompiled = true;
        compile_shader_dependency(runtime, &access, target_uuid, platform)?;
    }
}

/// Compiles a shader from its own source, used when a program or shader
/// reference needs a compiled artifact that does not exist yet.
fn compile_shader_dependency(
    runtime: &Arc<RenderRuntime>,
    access: &Arc<dyn ResourceAccess>,
    uuid: Uuid,
    platform: u64,
) -> Result<()> {
    let shader_source = access
        .read_source(uuid)
        .ok_or_else(|| invalid("dependency shader has no source"))?;
    let type_name = match shader_source.get(KEY_TYPE, platform) {
        Some(SourceChange {
            value: SourceValue::Value(value),
            ..
        }) => value,
        _ => return Err(invalid("dependency shader source has no type")),
    };
    let hash = source_hash(shader_source.as_ref());
    debug!("reimporting shader resource {}", uuid);
    render_shader_compile(
        runtime,
        uuid,
        platform,
        shader_source.as_ref(),
        hash,
        &type_name,
    )
}

pub fn render_program_compile(
    runtime: &Arc<RenderRuntime>,
    uuid: Uuid,
    platform: u64,
    source: &dyn ResourceSource,
    source_hash: [u8; 32],
    type_name: &str,
) -> Result<()> {
    if type_hash(type_name) != TYPE_PROGRAM {
        return Err(invalid("not a program resource"));
    }
    let access = runtime
        .resource_access()
        .ok_or_else(|| invalid("no resource access configured"))?;

    let mut subplatforms = platform_subset(source, platform);
    let mut superplatform = false;
    if subplatforms.is_empty() {
        superplatform = true;
        subplatforms = platform_superset(source, platform);
    }

    // Programs are the sum of their shaders: union in every platform a
    // shader specializes on beyond the program's own subplatforms
    let mut moreplatforms: Vec<u64> = Vec::new();
    for &subplatform in &subplatforms {
        let vertex_uuid = source
            .get(KEY_VERTEXSHADER, subplatform)
            .as_ref()
            .and_then(uuid_value);
        let pixel_uuid = source
            .get(KEY_PIXELSHADER, subplatform)
            .as_ref()
            .and_then(uuid_value);
        let (vertex_uuid, pixel_uuid) = match (vertex_uuid, pixel_uuid) {
            (Some(vertex), Some(pixel)) => (vertex, pixel),
            _ => {
                error!("missing vertex or pixel shader");
                return Err(invalid("missing vertex or pixel shader"));
            }
        };

        let mut shaderplatforms: SmallVec<[u64; 8]> = SmallVec::new();
        for shader_uuid in [vertex_uuid, pixel_uuid].iter() {
            if let Some(shader_source) = access.read_source(*shader_uuid) {
                for candidate in shader_source.platforms() {
                    if resource_platform_is_equal_or_more_specific(candidate, subplatform)
                        && !shaderplatforms.contains(&candidate)
                    {
                        shaderplatforms.push(candidate);
                    }
                }
            }
        }

        for moreplatform in shaderplatforms {
            if moreplatform == subplatform {
                continue;
            }
            // When working from supersets, a shader platform from a
            // different branch than the request must not leak in
            if superplatform
                && !resource_platform_is_equal_or_more_specific(platform, moreplatform)
            {
                continue;
            }
            if !moreplatforms.contains(&moreplatform) {
                moreplatforms.push(moreplatform);
            }
        }
    }

    if superplatform && !moreplatforms.is_empty() {
        // The shader specializations replace the superset matches
        subplatforms.clear();
    }
    for moreplatform in moreplatforms {
        if !subplatforms.contains(&moreplatform) {
            subplatforms.push(moreplatform);
        }
    }

    let previous = thread_backend();
    let mut result = Ok(());

    for subplatform in subplatforms {
        // Programs are always platform specific
        if subplatform == 0 || subplatform == RESOURCE_PLATFORM_ALL {
            continue;
        }
        let decl = resource_platform_decompose(subplatform);
        let api = match normalize_api(&decl) {
            Some(api) => api,
            None => continue,
        };

        let backend = match runtime.allocate_backend(api, true) {
            Some(backend) => backend,
            None => {
                warn!("unable to create render backend for program compilation");
                result = Err(Error::UnsupportedApi);
                break;
            }
        };
        backend.set_format(PixelFormat::R8G8B8X8, ColorSpace::Linear);
        backend.set_drawable(Drawable::window(0, 100, 100, NativeHandles::default()));

        let linked =
            link_program_subplatform(runtime, &access, source, &backend, uuid, subplatform, source_hash);
        backend.disable_thread();

        if let Err(err) = linked {
            result = Err(err);
            break;
        }
    }

    restore_thread_backend(previous);
    result
}

fn link_program_subplatform(
    runtime: &Arc<RenderRuntime>,
    access: &Arc<dyn ResourceAccess>,
    source: &dyn ResourceSource,
    backend: &crate::backend::Backend,
    uuid: Uuid,
    subplatform: u64,
    source_hash: [u8; 32],
) -> Result<()> {
    let vertex_uuid = source
        .get(KEY_VERTEXSHADER, subplatform)
        .as_ref()
        .and_then(uuid_value);
    let pixel_uuid = source
        .get(KEY_PIXELSHADER, subplatform)
        .as_ref()
        .and_then(uuid_value);
    let (vertex_uuid, pixel_uuid) = match (vertex_uuid, pixel_uuid) {
        (Some(vertex), Some(pixel)) => (vertex, pixel),
        _ => {
            error!("missing vertex or pixel shader");
            return Err(invalid("missing vertex or pixel shader"));
        }
    };

    // Make sure both shaders have compiled artifacts for this platform
    for shader_uuid in [vertex_uuid, pixel_uuid].iter() {
        if access.open_static(*shader_uuid, subplatform).is_none() {
            if let Err(err) = compile_shader_dependency(runtime, access, *shader_uuid, subplatform)
            {
                warn!("unable to compile dependency shader {}: {}", shader_uuid, err);
            }
        }
    }

    let vertex_handle = backend.shader_load(vertex_uuid);
    let pixel_handle = backend.shader_load(pixel_uuid);
    let vertex = backend.shader_raw(vertex_handle);
    let pixel = backend.shader_raw(pixel_handle);

    let linked = match (vertex, pixel) {
        (Some(vertex), Some(pixel))
            if vertex.kind() == ShaderKind::Vertex && pixel.kind() == ShaderKind::Pixel =>
        {
            backend.device().link_program(backend, &vertex, &pixel)
        }
        _ => {
            error!("unable to load vertex or pixel shader");
            Err(invalid("unable to load vertex or pixel shader"))
        }
    };

    let result = linked.and_then(|descriptor| {
        let header = ResourceHeader::new(TYPE_PROGRAM, PROGRAM_RESOURCE_VERSION, source_hash);
        let mut stat = Vec::new();
        header.write_to(&mut stat);
        stat.extend_from_slice(vertex_uuid.as_bytes());
        stat.extend_from_slice(pixel_uuid.as_bytes());
        descriptor.write_to(&mut stat);
        if access.write_static(uuid, subplatform, &stat) {
            debug!("successfully linked program {} for {:#x}", uuid, subplatform);
            Ok(())
        } else {
            error!("unable to create static resource stream");
            Err(output("unable to create static resource stream"))
        }
    });

    if let Err(err) = &result {
        error!("unable to link program: {}", err);
    }

    if vertex_handle.is_some() {
        backend.shader_release(vertex_handle);
    }
    if pixel_handle.is_some() {
        backend.shader_release(pixel_handle);
    }

    result
}
