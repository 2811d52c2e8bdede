//! Compiled resource streams and source access.
//!
//! Every compiled resource is two streams: a static stream holding a header
//! plus the type-specific descriptor, and a dynamic stream holding a
//! versioned blob (compiled shader bytes, texture pixels). Storage framing
//! (where streams live, UUID to path mapping, remote fetch) stays outside
//! this library behind [`ResourceAccess`]; an in-memory implementation ships
//! here for tools and tests.

use crate::error::{Error, Result};
use crate::platform::{
    resource_platform_is_equal_or_more_specific, RESOURCE_PLATFORM_ALL,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fxhash::FxHashMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const SHADER_RESOURCE_VERSION: u32 = 2;
pub const PROGRAM_RESOURCE_VERSION: u32 = 3;
pub const TEXTURE_RESOURCE_VERSION: u32 = 1;

/// 32-bit FNV-1a, used for resource type identifiers persisted in headers.
pub const fn type_hash(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut hash = 0x811c_9dc5u32;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(0x0100_0193);
        i += 1;
    }
    hash
}

/// 64-bit FNV-1a, used for persisted name hashes (parameters, attributes)
/// and source change-map keys.
pub const fn name_hash(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

pub fn blob_checksum(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

pub const TYPE_VERTEXSHADER: u32 = type_hash("vertexshader");
pub const TYPE_PIXELSHADER: u32 = type_hash("pixelshader");
pub const TYPE_SHADER: u32 = type_hash("shader");
pub const TYPE_PROGRAM: u32 = type_hash("program");
pub const TYPE_TEXTURE: u32 = type_hash("texture");

/// Source change-map keys.
pub const KEY_SOURCE: u64 = name_hash("source");
pub const KEY_SHADER: u64 = name_hash("shader");
pub const KEY_VERTEXSHADER: u64 = name_hash("vertexshader");
pub const KEY_PIXELSHADER: u64 = name_hash("pixelshader");
pub const KEY_PARAMETER_COUNT: u64 = name_hash("parameter_count");
pub const KEY_TYPE: u64 = name_hash("type");

/// Header at the start of every static resource stream.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceHeader {
    pub type_hash: u32,
    pub version: u32,
    pub source_hash: [u8; 32],
    pub flags: u32,
}

impl ResourceHeader {
    pub fn new(type_hash: u32, version: u32, source_hash: [u8; 32]) -> ResourceHeader {
        ResourceHeader {
            type_hash,
            version,
            source_hash,
            flags: 0,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u32::<LittleEndian>(self.type_hash).unwrap();
        out.write_u32::<LittleEndian>(self.version).unwrap();
        out.extend_from_slice(&self.source_hash);
        out.write_u32::<LittleEndian>(self.flags).unwrap();
    }

    pub fn read_from(cursor: &mut Cursor<&[u8]>) -> Result<ResourceHeader> {
        let type_hash = cursor.read_u32::<LittleEndian>()?;
        let version = cursor.read_u32::<LittleEndian>()?;
        let mut source_hash = [0u8; 32];
        cursor.read_exact(&mut source_hash)?;
        let flags = cursor.read_u32::<LittleEndian>()?;
        Ok(ResourceHeader {
            type_hash,
            version,
            source_hash,
            flags,
        })
    }
}

/// Encodes a dynamic stream: version, size, bytes.
pub fn write_dynamic_blob(version: u32, bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 12);
    out.write_u32::<LittleEndian>(version).unwrap();
    out.write_u64::<LittleEndian>(bytes.len() as u64).unwrap();
    out.extend_from_slice(bytes);
    out
}

/// Decodes a dynamic stream, enforcing the version.
pub fn read_dynamic_blob(bytes: &[u8], expected_version: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(bytes);
    let version = cursor.read_u32::<LittleEndian>()?;
    if version != expected_version {
        return Err(Error::ResourceVersionMismatch {
            expected: expected_version,
            actual: version,
        });
    }
    let size = cursor.read_u64::<LittleEndian>()? as usize;
    let offset = cursor.position() as usize;
    if bytes.len() < offset + size {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "dynamic stream truncated",
        )));
    }
    Ok(bytes[offset..offset + size].to_vec())
}

// -------------------------------------------------------------------------
// Source representation

#[derive(Clone, Debug)]
pub enum SourceValue {
    /// Inline string value (UUID references, counts, type names).
    Value(String),
    /// Out-of-line blob, fetched separately through `read_blob`.
    Blob { checksum: u64, size: u64 },
}

#[derive(Clone, Debug)]
pub struct SourceChange {
    pub platform: u64,
    pub value: SourceValue,
}

/// Read access to one resource's source: a change map from (key, platform)
/// to values, as produced by the import pipeline.
pub trait ResourceSource: Send + Sync {
    /// Best value for `key` visible from `platform`: the most specific entry
    /// whose platform the requested one is equal to or more specific than.
    fn get(&self, key: u64, platform: u64) -> Option<SourceChange>;

    /// Every distinct platform present in the change map.
    fn platforms(&self) -> Vec<u64>;

    /// Fetches a blob value's bytes.
    fn read_blob(&self, key: u64, platform: u64, checksum: u64) -> Option<Vec<u8>>;
}

/// Access to the resource system: sources for compilation, compiled
/// static/dynamic streams for loading and emission.
pub trait ResourceAccess: Send + Sync {
    fn read_source(&self, uuid: Uuid) -> Option<Arc<dyn ResourceSource>>;
    fn open_static(&self, uuid: Uuid, platform: u64) -> Option<Vec<u8>>;
    fn open_dynamic(&self, uuid: Uuid, platform: u64) -> Option<Vec<u8>>;
    fn write_static(&self, uuid: Uuid, platform: u64, bytes: &[u8]) -> bool;
    fn write_dynamic(&self, uuid: Uuid, platform: u64, bytes: &[u8]) -> bool;
}

// -------------------------------------------------------------------------
// In-memory implementation

#[derive(Default)]
pub struct MemorySource {
    entries: Mutex<Vec<(u64, SourceChange)>>,
    blobs: Mutex<FxHashMap<(u64, u64), Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> MemorySource {
        MemorySource::default()
    }

    pub fn set(&self, key: u64, platform: u64, value: &str) {
        self.entries.lock().unwrap().push((
            key,
            SourceChange {
                platform,
                value: SourceValue::Value(value.to_owned()),
            },
        ));
    }

    pub fn set_blob(&self, key: u64, platform: u64, bytes: &[u8]) -> u64 {
        let checksum = blob_checksum(bytes);
        self.entries.lock().unwrap().push((
            key,
            SourceChange {
                platform,
                value: SourceValue::Blob {
                    checksum,
                    size: bytes.len() as u64,
                },
            },
        ));
        self.blobs
            .lock()
            .unwrap()
            .insert((key, platform), bytes.to_vec());
        checksum
    }
}

impl ResourceSource for MemorySource {
    fn get(&self, key: u64, platform: u64) -> Option<SourceChange> {
        let entries = self.entries.lock().unwrap();
        let mut best: Option<SourceChange> = None;
        for (entry_key, change) in entries.iter() {
            if *entry_key != key {
                continue;
            }
            if platform != RESOURCE_PLATFORM_ALL
                && !resource_platform_is_equal_or_more_specific(platform, change.platform)
            {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => resource_platform_is_equal_or_more_specific(
                    change.platform,
                    current.platform,
                ),
            };
            if better {
                best = Some(change.clone());
            }
        }
        best
    }

    fn platforms(&self) -> Vec<u64> {
        let entries = self.entries.lock().unwrap();
        let mut platforms = Vec::new();
        for (_, change) in entries.iter() {
            if !platforms.contains(&change.platform) {
                platforms.push(change.platform);
            }
        }
        platforms
    }

    fn read_blob(&self, key: u64, platform: u64, checksum: u64) -> Option<Vec<u8>> {
        let blobs = self.blobs.lock().unwrap();
        let bytes = blobs.get(&(key, platform))?;
        if blob_checksum(bytes) != checksum {
            return None;
        }
        Some(bytes.clone())
    }
}

#[derive(Default)]
pub struct MemoryResourceAccess {
    sources: Mutex<FxHashMap<Uuid, Arc<MemorySource>>>,
    statics: Mutex<FxHashMap<(Uuid, u64), Vec<u8>>>,
    dynamics: Mutex<FxHashMap<(Uuid, u64), Vec<u8>>>,
}

impl MemoryResourceAccess {
    pub fn new() -> MemoryResourceAccess {
        MemoryResourceAccess::default()
    }

    pub fn insert_source(&self, uuid: Uuid, source: Arc<MemorySource>) {
        self.sources.lock().unwrap().insert(uuid, source);
    }

    /// Picks the stored stream whose platform best matches the request:
    /// exact first, then the most specific platform the requested one is
    /// equal to or more specific than.
    fn best_stream(
        streams: &FxHashMap<(Uuid, u64), Vec<u8>>,
        uuid: Uuid,
        platform: u64,
    ) -> Option<Vec<u8>> {
        if let Some(bytes) = streams.get(&(uuid, platform)) {
            return Some(bytes.clone());
        }
        let mut best: Option<(u64, &Vec<u8>)> = None;
        for ((stream_uuid, stream_platform), bytes) in streams.iter() {
            if *stream_uuid != uuid {
                continue;
            }
            if !resource_platform_is_equal_or_more_specific(platform, *stream_platform)
                && *stream_platform != RESOURCE_PLATFORM_ALL
            {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, _)) => {
                    resource_platform_is_equal_or_more_specific(*stream_platform, current)
                }
            };
            if better {
                best = Some((*stream_platform, bytes));
            }
        }
        best.map(|(_, bytes)| bytes.clone())
    }
}

impl ResourceAccess for MemoryResourceAccess {
    fn read_source(&self, uuid: Uuid) -> Option<Arc<dyn ResourceSource>> {
        let sources = self.sources.lock().unwrap();
        sources
            .get(&uuid)
            .map(|source| Arc::clone(source) as Arc<dyn ResourceSource>)
    }

    fn open_static(&self, uuid: Uuid, platform: u64) -> Option<Vec<u8>> {
        Self::best_stream(&self.statics.lock().unwrap(), uuid, platform)
    }

    fn open_dynamic(&self, uuid: Uuid, platform: u64) -> Option<Vec<u8>> {
        Self::best_stream(&self.dynamics.lock().unwrap(), uuid, platform)
    }

    fn write_static(&self, uuid: Uuid, platform: u64, bytes: &[u8]) -> bool {
        self.statics
            .lock()
            .unwrap()
            .insert((uuid, platform), bytes.to_vec());
        true
    }

    fn write_dynamic(&self, uuid: Uuid, platform: u64, bytes: &[u8]) -> bool {
        self.dynamics
            .lock()
            .unwrap()
            .insert((uuid, platform), bytes.to_vec());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut source_hash = [0u8; 32];
        source_hash[0] = 0xab;
        let header = ResourceHeader::new(TYPE_VERTEXSHADER, SHADER_RESOURCE_VERSION, source_hash);
        let mut bytes = Vec::new();
        header.write_to(&mut bytes);
        let parsed = ResourceHeader::read_from(&mut Cursor::new(&bytes[..])).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn dynamic_blob_enforces_version() {
        let blob = write_dynamic_blob(SHADER_RESOURCE_VERSION, b"bytes");
        assert_eq!(
            read_dynamic_blob(&blob, SHADER_RESOURCE_VERSION).unwrap(),
            b"bytes"
        );
        match read_dynamic_blob(&blob, SHADER_RESOURCE_VERSION + 1) {
            Err(Error::ResourceVersionMismatch { actual, .. }) => {
                assert_eq!(actual, SHADER_RESOURCE_VERSION)
            }
            other => panic!("expected version mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn type_hashes_are_distinct() {
        let hashes = [
            TYPE_VERTEXSHADER,
            TYPE_PIXELSHADER,
            TYPE_SHADER,
            TYPE_PROGRAM,
            TYPE_TEXTURE,
        ];
        for (i, a) in hashes.iter().enumerate() {
            for b in hashes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn source_get_prefers_specific_platform() {
        use crate::platform::{resource_platform, PlatformDecl};
        let source = MemorySource::new();
        let mut decl = PlatformDecl::any();
        decl.render_api_group = 3;
        let group = resource_platform(decl);
        decl.render_api = 10;
        let specific = resource_platform(decl);

        source.set(KEY_SOURCE, group, "generic");
        source.set(KEY_SOURCE, specific, "specific");

        match source.get(KEY_SOURCE, specific).unwrap().value {
            SourceValue::Value(value) => assert_eq!(value, "specific"),
            _ => panic!("expected inline value"),
        }
        match source.get(KEY_SOURCE, group).unwrap().value {
            SourceValue::Value(value) => assert_eq!(value, "generic"),
            _ => panic!("expected inline value"),
        }
    }
}
