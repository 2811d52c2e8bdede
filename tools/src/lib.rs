//! Shared plumbing for the render resource tools.
//!
//! Source descriptions live as text files next to their blobs:
//!
//! ```text
//! set type ffffffffff vertexshader
//! blob source 00000002ff cube.vs.glsl
//! ```
//!
//! `set` lines carry inline values, `blob` lines reference a file relative
//! to the description. Keys are hashed with the library's name hash; the
//! platform column is the packed platform identifier in hex. Compiled
//! streams are written to the local path as
//! `<uuid>-<platform>.static` / `.dynamic`.

use log::warn;
use lumen_render::platform::resource_platform_is_equal_or_more_specific;
use lumen_render::resource::{name_hash, MemorySource, ResourceAccess, ResourceSource};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

pub const RESULT_OK: i32 = 0;
pub const RESULT_UNSUPPORTED_INPUT: i32 = -1;
pub const RESULT_INVALID_ARGUMENT: i32 = -2;
pub const RESULT_UNKNOWN_COMMAND: i32 = -3;
pub const RESULT_UNABLE_TO_OPEN_OUTPUT: i32 = -4;
pub const RESULT_INVALID_INPUT: i32 = -5;

/// Parses a source description file into an in-memory source.
pub fn parse_source_file(path: &Path) -> Option<Arc<MemorySource>> {
    let text = fs::read_to_string(path).ok()?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let source = Arc::new(MemorySource::new());
    for (line_number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.splitn(4, char::is_whitespace);
        let verb = fields.next()?;
        let key = match fields.next() {
            Some(key) => name_hash(key),
            None => {
                warn!("{}:{}: missing key", path.display(), line_number + 1);
                return None;
            }
        };
        let platform = match fields.next().and_then(|hex| u64::from_str_radix(hex, 16).ok()) {
            Some(platform) => platform,
            None => {
                warn!("{}:{}: bad platform", path.display(), line_number + 1);
                return None;
            }
        };
        let value = fields.next().unwrap_or("").trim();
        match verb {
            "set" => source.set(key, platform, value),
            "blob" => {
                let blob_path = base.join(value);
                match fs::read(&blob_path) {
                    Ok(bytes) => {
                        source.set_blob(key, platform, &bytes);
                    }
                    Err(err) => {
                        warn!("unable to read blob {}: {}", blob_path.display(), err);
                        return None;
                    }
                }
            }
            _ => {
                warn!("{}:{}: unknown directive {}", path.display(), line_number + 1, verb);
                return None;
            }
        }
    }
    Some(source)
}

/// Filesystem-backed resource access: sources under a source path, compiled
/// streams under a local path.
pub struct FsResourceAccess {
    source_path: PathBuf,
    local_path: PathBuf,
}

impl FsResourceAccess {
    pub fn new(source_path: PathBuf, local_path: PathBuf) -> FsResourceAccess {
        FsResourceAccess {
            source_path,
            local_path,
        }
    }

    fn stream_path(&self, uuid: Uuid, platform: u64, suffix: &str) -> PathBuf {
        self.local_path
            .join(format!("{}-{:016x}.{}", uuid, platform, suffix))
    }

    fn open_stream(&self, uuid: Uuid, platform: u64, suffix: &str) -> Option<Vec<u8>> {
        if let Ok(bytes) = fs::read(self.stream_path(uuid, platform, suffix)) {
            return Some(bytes);
        }
        // Fall back to the most specific compatible platform on disk
        let prefix = format!("{}-", uuid);
        let extension = format!(".{}", suffix);
        let mut best: Option<(u64, PathBuf)> = None;
        for entry in fs::read_dir(&self.local_path).ok()? {
            let entry = entry.ok()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || !name.ends_with(&extension) {
                continue;
            }
            let hex = &name[prefix.len()..name.len() - extension.len()];
            let stream_platform = match u64::from_str_radix(hex, 16) {
                Ok(platform) => platform,
                Err(_) => continue,
            };
            if !resource_platform_is_equal_or_more_specific(platform, stream_platform) {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, _)) => {
                    resource_platform_is_equal_or_more_specific(stream_platform, current)
                }
            };
            if better {
                best = Some((stream_platform, entry.path()));
            }
        }
        best.and_then(|(_, path)| fs::read(path).ok())
    }
}

impl ResourceAccess for FsResourceAccess {
    fn read_source(&self, uuid: Uuid) -> Option<Arc<dyn ResourceSource>> {
        let path = self.source_path.join(format!("{}.source", uuid));
        parse_source_file(&path).map(|source| source as Arc<dyn ResourceSource>)
    }

    fn open_static(&self, uuid: Uuid, platform: u64) -> Option<Vec<u8>> {
        self.open_stream(uuid, platform, "static")
    }

    fn open_dynamic(&self, uuid: Uuid, platform: u64) -> Option<Vec<u8>> {
        self.open_stream(uuid, platform, "dynamic")
    }

    fn write_static(&self, uuid: Uuid, platform: u64, bytes: &[u8]) -> bool {
        fs::create_dir_all(&self.local_path).is_ok()
            && fs::write(self.stream_path(uuid, platform, "static"), bytes).is_ok()
    }

    fn write_dynamic(&self, uuid: Uuid, platform: u64, bytes: &[u8]) -> bool {
        fs::create_dir_all(&self.local_path).is_ok()
            && fs::write(self.stream_path(uuid, platform, "dynamic"), bytes).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_render::resource::{KEY_SOURCE, KEY_TYPE};
    use std::io::Write;

    #[test]
    fn parses_set_and_blob_lines() {
        let dir = std::env::temp_dir().join(format!("lumen-tools-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let blob_path = dir.join("shader.glsl");
        let mut blob = fs::File::create(&blob_path).unwrap();
        blob.write_all(b"void main() {}\n").unwrap();

        let source_path = dir.join("test.source");
        fs::write(
            &source_path,
            "# comment\nset type ff vertexshader\nblob source ff shader.glsl\n",
        )
        .unwrap();

        let source = parse_source_file(&source_path).unwrap();
        assert!(source.get(KEY_TYPE, 0xff).is_some());
        assert!(source.get(KEY_SOURCE, 0xff).is_some());
        assert_eq!(source.platforms(), vec![0xff]);

        fs::remove_dir_all(&dir).ok();
    }
}
