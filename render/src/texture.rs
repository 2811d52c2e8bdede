//! Texture resources.

use crate::backend::Backend;
use crate::buffer::BufferUsage;
use crate::error::{Error, Result};
use crate::format::{ColorSpace, PixelFormat};
use crate::handle::Resource;
use crate::resource::{ResourceHeader, TEXTURE_RESOURCE_VERSION, TYPE_TEXTURE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TextureType {
    Tex2D = 0,
}

#[derive(Copy, Clone, Debug)]
pub struct TextureDescriptor {
    pub texture_type: TextureType,
    pub pixelformat: PixelFormat,
    pub colorspace: ColorSpace,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub levels: u32,
}

impl TextureDescriptor {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.texture_type as u8);
        out.push(self.pixelformat as u8);
        out.push(self.colorspace as u8);
        out.push(0);
        out.write_u32::<LittleEndian>(self.width).unwrap();
        out.write_u32::<LittleEndian>(self.height).unwrap();
        out.write_u32::<LittleEndian>(self.depth).unwrap();
        out.write_u32::<LittleEndian>(self.levels).unwrap();
    }

    pub fn read_from(cursor: &mut Cursor<&[u8]>) -> Result<TextureDescriptor> {
        let _texture_type = cursor.read_u8()?;
        let pixelformat = match cursor.read_u8()? {
            1 => PixelFormat::R8G8B8X8,
            2 => PixelFormat::R8G8B8A8,
            3 => PixelFormat::R16G16B16A16F,
            4 => PixelFormat::R32G32B32A32F,
            5 => PixelFormat::Depth24Stencil8,
            _ => PixelFormat::Unknown,
        };
        let colorspace = if cursor.read_u8()? == 1 {
            ColorSpace::SRgb
        } else {
            ColorSpace::Linear
        };
        let _pad = cursor.read_u8()?;
        Ok(TextureDescriptor {
            texture_type: TextureType::Tex2D,
            pixelformat,
            colorspace,
            width: cursor.read_u32::<LittleEndian>()?,
            height: cursor.read_u32::<LittleEndian>()?,
            depth: cursor.read_u32::<LittleEndian>()?,
            levels: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

pub struct Texture {
    uuid: Mutex<Uuid>,
    texture_type: TextureType,
    usage: BufferUsage,
    descriptor: Mutex<TextureDescriptor>,
    refs: AtomicI32,
    backend: Mutex<Weak<Backend>>,
    backend_data: [AtomicU64; 4],
}

impl Resource for Texture {
    fn refcount(&self) -> &AtomicI32 {
        &self.refs
    }
}

impl Texture {
    pub fn new(uuid: Uuid, usage: BufferUsage, descriptor: TextureDescriptor) -> Arc<Texture> {
        Arc::new(Texture {
            uuid: Mutex::new(uuid),
            texture_type: descriptor.texture_type,
            usage,
            descriptor: Mutex::new(descriptor),
            refs: AtomicI32::new(1),
            backend: Mutex::new(Weak::new()),
            backend_data: Default::default(),
        })
    }

    pub fn uuid(&self) -> Uuid {
        *self.uuid.lock().unwrap()
    }

    pub fn texture_type(&self) -> TextureType {
        self.texture_type
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn descriptor(&self) -> TextureDescriptor {
        *self.descriptor.lock().unwrap()
    }

    pub fn backend(&self) -> Option<Arc<Backend>> {
        self.backend.lock().unwrap().upgrade()
    }

    pub fn set_backend(&self, backend: Weak<Backend>) {
        *self.backend.lock().unwrap() = backend;
    }

    pub fn backend_data(&self, slot: usize) -> u64 {
        self.backend_data[slot].load(Ordering::Acquire)
    }

    pub fn set_backend_data(&self, slot: usize, value: u64) {
        self.backend_data[slot].store(value, Ordering::Release);
    }
}

/// Parses a static texture stream: header plus descriptor.
pub fn parse_texture_static(bytes: &[u8]) -> Result<(ResourceHeader, TextureDescriptor)> {
    let mut cursor = Cursor::new(bytes);
    let header = ResourceHeader::read_from(&mut cursor)?;
    if header.type_hash != TYPE_TEXTURE {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "not a texture resource",
        )));
    }
    if header.version != TEXTURE_RESOURCE_VERSION {
        return Err(Error::ResourceVersionMismatch {
            expected: TEXTURE_RESOURCE_VERSION,
            actual: header.version,
        });
    }
    let descriptor = TextureDescriptor::read_from(&mut cursor)?;
    Ok((header, descriptor))
}
