//! Shader objects.
//!
//! A shader wraps one compiled vertex or pixel stage. Shader handles are
//! long-lived: reloading a modified shader re-uploads into the same object so
//! pending command references stay valid for the next frame.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::handle::Resource;
use crate::resource::{
    ResourceHeader, SHADER_RESOURCE_VERSION, TYPE_PIXELSHADER, TYPE_VERTEXSHADER,
};
use bitflags::bitflags;
use byteorder::ReadBytesExt;
use std::io::Cursor;
use std::sync::atomic::{AtomicI32, AtomicU64};
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

bitflags! {
    /// Pipeline stages, used both as shader identity and as program
    /// parameter stage masks.
    pub struct ShaderStages: u8 {
        const VERTEX = 0x1;
        const PIXEL = 0x2;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShaderKind {
    Vertex,
    Pixel,
}

impl ShaderKind {
    pub fn stage(self) -> ShaderStages {
        match self {
            ShaderKind::Vertex => ShaderStages::VERTEX,
            ShaderKind::Pixel => ShaderStages::PIXEL,
        }
    }

    pub fn resource_type(self) -> u32 {
        match self {
            ShaderKind::Vertex => TYPE_VERTEXSHADER,
            ShaderKind::Pixel => TYPE_PIXELSHADER,
        }
    }
}

pub struct Shader {
    uuid: Mutex<Uuid>,
    kind: ShaderKind,
    refs: AtomicI32,
    backend: Mutex<Weak<Backend>>,
    backend_data: [AtomicU64; 4],
}

impl Resource for Shader {
    fn refcount(&self) -> &AtomicI32 {
        &self.refs
    }
}

impl Shader {
    pub fn new(kind: ShaderKind, uuid: Uuid) -> Arc<Shader> {
        Arc::new(Shader {
            uuid: Mutex::new(uuid),
            kind,
            refs: AtomicI32::new(1),
            backend: Mutex::new(Weak::new()),
            backend_data: Default::default(),
        })
    }

    pub fn kind(&self) -> ShaderKind {
        self.kind
    }

    pub fn uuid(&self) -> Uuid {
        *self.uuid.lock().unwrap()
    }

    pub fn set_uuid(&self, uuid: Uuid) {
        *self.uuid.lock().unwrap() = uuid;
    }

    pub fn backend(&self) -> Option<Arc<Backend>> {
        self.backend.lock().unwrap().upgrade()
    }

    pub fn set_backend(&self, backend: Weak<Backend>) {
        *self.backend.lock().unwrap() = backend;
    }

    pub fn backend_data(&self, slot: usize) -> u64 {
        self.backend_data[slot].load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn set_backend_data(&self, slot: usize, value: u64) {
        self.backend_data[slot].store(value, std::sync::atomic::Ordering::Release);
    }
}

/// Serializes the static shader descriptor that follows the resource header.
pub fn write_shader_descriptor(kind: ShaderKind, out: &mut Vec<u8>) {
    out.push(kind.stage().bits());
    out.extend_from_slice(&[0u8; 3]);
}

/// Parses a static shader stream: header plus descriptor.
pub fn parse_shader_static(bytes: &[u8]) -> Result<(ResourceHeader, ShaderKind)> {
    let mut cursor = Cursor::new(bytes);
    let header = ResourceHeader::read_from(&mut cursor)?;
    let kind = match header.type_hash {
        TYPE_VERTEXSHADER => ShaderKind::Vertex,
        TYPE_PIXELSHADER => ShaderKind::Pixel,
        _ => {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "not a shader resource",
            )))
        }
    };
    if header.version != SHADER_RESOURCE_VERSION {
        return Err(Error::ResourceVersionMismatch {
            expected: SHADER_RESOURCE_VERSION,
            actual: header.version,
        });
    }
    let stage = cursor.read_u8()?;
    let descriptor_kind = if stage & ShaderStages::PIXEL.bits() != 0 {
        ShaderKind::Pixel
    } else {
        ShaderKind::Vertex
    };
    if descriptor_kind != kind {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "shader descriptor stage does not match resource type",
        )));
    }
    Ok((header, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_stream_round_trips() {
        let header = ResourceHeader::new(TYPE_PIXELSHADER, SHADER_RESOURCE_VERSION, [7u8; 32]);
        let mut bytes = Vec::new();
        header.write_to(&mut bytes);
        write_shader_descriptor(ShaderKind::Pixel, &mut bytes);
        let (parsed, kind) = parse_shader_static(&bytes).unwrap();
        assert_eq!(parsed.type_hash, TYPE_PIXELSHADER);
        assert_eq!(kind, ShaderKind::Pixel);
    }

    #[test]
    fn version_mismatch_is_reported() {
        let header = ResourceHeader::new(TYPE_VERTEXSHADER, SHADER_RESOURCE_VERSION + 1, [0u8; 32]);
        let mut bytes = Vec::new();
        header.write_to(&mut bytes);
        write_shader_descriptor(ShaderKind::Vertex, &mut bytes);
        match parse_shader_static(&bytes) {
            Err(Error::ResourceVersionMismatch { .. }) => {}
            other => panic!("expected version mismatch, got {:?}", other.map(|_| ())),
        }
    }
}
