//! Compiles shader and program source resources into per-platform compiled
//! streams.

use clap::Parser;
use log::{error, info, warn};
use lumen_render::compile::{is_output_failure, render_compile, source_hash};
use lumen_render::resource::{ResourceAccess, SourceChange, SourceValue, KEY_TYPE};
use lumen_render::{RenderConfig, RenderRuntime};
use lumen_render_tools::{
    FsResourceAccess, RESULT_INVALID_ARGUMENT, RESULT_INVALID_INPUT, RESULT_OK,
    RESULT_UNABLE_TO_OPEN_OUTPUT, RESULT_UNSUPPORTED_INPUT,
};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[clap(name = "rendercompile", about = "Render resource compiler")]
struct Args {
    /// Resource file source structure path
    #[clap(long)]
    source: PathBuf,

    /// Local compiled resource path
    #[clap(long)]
    local: PathBuf,

    /// Target platform identifier (packed, hex)
    #[clap(long, parse(try_from_str = parse_platform), default_value = "ffffffffff")]
    platform: u64,

    /// Write binary files
    #[clap(long)]
    binary: bool,

    /// Write ASCII files (default)
    #[clap(long)]
    ascii: bool,

    /// Enable debug output
    #[clap(long)]
    debug: bool,

    /// Any number of input UUIDs or source description paths
    #[clap(required = true)]
    inputs: Vec<String>,
}

fn parse_platform(hex: &str) -> Result<u64, String> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|err| err.to_string())
}

fn input_uuid(input: &str) -> Option<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(input) {
        return Some(uuid);
    }
    // A path to <uuid>.source
    let path = PathBuf::from(input);
    let stem = path.file_stem()?.to_string_lossy();
    Uuid::parse_str(&stem).ok()
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

    let runtime = RenderRuntime::new(RenderConfig::default());
    let access = Arc::new(FsResourceAccess::new(
        args.source.clone(),
        args.local.clone(),
    ));
    runtime.set_resource_access(access.clone());

    let mut result = RESULT_OK;
    for input in &args.inputs {
        let uuid = match input_uuid(input) {
            Some(uuid) => uuid,
            None => {
                warn!("failed to lookup: {}", input);
                result = RESULT_INVALID_INPUT;
                break;
            }
        };

        let source = match access.read_source(uuid) {
            Some(source) => source,
            None => {
                warn!("no source for: {} ({})", uuid, input);
                result = RESULT_INVALID_INPUT;
                break;
            }
        };

        let type_name = match source.get(KEY_TYPE, args.platform) {
            Some(SourceChange {
                value: SourceValue::Value(value),
                ..
            }) => value,
            _ => {
                warn!("source has no resource type: {}", uuid);
                result = RESULT_UNSUPPORTED_INPUT;
                break;
            }
        };

        let hash = source_hash(source.as_ref());
        match render_compile(
            &runtime,
            uuid,
            args.platform,
            source.as_ref(),
            hash,
            &type_name,
        ) {
            Ok(()) => info!("successfully compiled: {} ({})", uuid, input),
            Err(err) => {
                error!("failed to compile: {} ({}): {}", uuid, input, err);
                result = if is_output_failure(&err) {
                    RESULT_UNABLE_TO_OPEN_OUTPUT
                } else {
                    RESULT_INVALID_ARGUMENT
                };
                break;
            }
        }
    }

    std::process::exit(result);
}
