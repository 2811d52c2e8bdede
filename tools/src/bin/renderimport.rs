//! Imports GLSL shader source files into source resource descriptions.

use clap::Parser;
use log::{error, info};
use lumen_render::platform::{resource_platform, PlatformDecl};
use lumen_render::reflect::{extract_declarations, DeclarationKind};
use lumen_render::RenderApiGroup;
use lumen_render_tools::{
    RESULT_INVALID_ARGUMENT, RESULT_OK, RESULT_UNABLE_TO_OPEN_OUTPUT, RESULT_UNSUPPORTED_INPUT,
};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Parser)]
#[clap(name = "renderimport", about = "Render resource importer")]
struct Args {
    /// Resource file source structure path
    #[clap(long)]
    source: PathBuf,

    /// Resource type (vertexshader, pixelshader); inferred from the file
    /// extension when omitted
    #[clap(long = "type")]
    shader_type: Option<String>,

    /// UUID for the imported resource; generated when omitted
    #[clap(long)]
    uuid: Option<Uuid>,

    /// Target platform identifier (packed, hex); defaults to the OpenGL
    /// group
    #[clap(long, parse(try_from_str = parse_platform))]
    platform: Option<u64>,

    /// Enable debug output
    #[clap(long)]
    debug: bool,

    /// Input shader source files
    #[clap(required = true)]
    inputs: Vec<PathBuf>,
}

fn parse_platform(hex: &str) -> Result<u64, String> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|err| err.to_string())
}

fn infer_type(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_string_lossy().as_ref() {
        "vs" | "vert" => Some("vertexshader"),
        "fs" | "ps" | "frag" => Some("pixelshader"),
        _ => None,
    }
}

fn default_platform() -> u64 {
    let mut decl = PlatformDecl::any();
    decl.render_api_group = RenderApiGroup::OpenGL as i32;
    resource_platform(decl)
}

fn import_file(path: &Path, args: &Args, platform: u64) -> i32 {
    let type_name = match args
        .shader_type
        .as_deref()
        .or_else(|| infer_type(path))
    {
        Some(type_name) if type_name == "vertexshader" || type_name == "pixelshader" => type_name,
        Some(other) => {
            error!("unsupported resource type: {}", other);
            return RESULT_UNSUPPORTED_INPUT;
        }
        None => {
            error!("unable to infer resource type for {}", path.display());
            return RESULT_UNSUPPORTED_INPUT;
        }
    };

    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            error!("unable to read {}: {}", path.display(), err);
            return RESULT_INVALID_ARGUMENT;
        }
    };

    let uuid = args.uuid.unwrap_or_else(Uuid::new_v4);
    if fs::create_dir_all(&args.source).is_err() {
        return RESULT_UNABLE_TO_OPEN_OUTPUT;
    }

    let blob_name = format!("{}.glsl", uuid);
    if fs::write(args.source.join(&blob_name), text.as_bytes()).is_err() {
        error!("unable to write source blob for {}", path.display());
        return RESULT_UNABLE_TO_OPEN_OUTPUT;
    }

    let mut description = String::new();
    description.push_str(&format!("set type {:x} {}\n", platform, type_name));
    description.push_str(&format!("blob source {:x} {}\n", platform, blob_name));

    // Record declared parameters so downstream tooling can build tables
    // without reparsing the source
    let mut parameter = 0usize;
    for declaration in extract_declarations(&text) {
        if declaration.kind != DeclarationKind::Uniform
            && declaration.kind != DeclarationKind::Attribute
        {
            continue;
        }
        description.push_str(&format!(
            "set parameter_type_{} {:x} {}\n",
            parameter, platform, declaration.type_token
        ));
        description.push_str(&format!(
            "set parameter_name_{} {:x} {}\n",
            parameter, platform, declaration.name
        ));
        parameter += 1;
    }
    description.push_str(&format!(
        "set parameter_count {:x} {}\n",
        platform, parameter
    ));

    let description_path = args.source.join(format!("{}.source", uuid));
    if fs::write(&description_path, description).is_err() {
        error!("unable to write {}", description_path.display());
        return RESULT_UNABLE_TO_OPEN_OUTPUT;
    }

    info!(
        "imported {} as {} ({})",
        path.display(),
        uuid,
        type_name
    );
    RESULT_OK
}

fn main() {
    let args = Args::parse();

    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(if args.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });
    builder.init();

    let platform = args.platform.unwrap_or_else(default_platform);

    let mut result = RESULT_OK;
    for input in &args.inputs {
        let file_result = import_file(input, &args, platform);
        if file_result != RESULT_OK {
            result = file_result;
            break;
        }
    }

    std::process::exit(result);
}
