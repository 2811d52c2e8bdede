//! Linked shader programs.
//!
//! A program references a vertex and a pixel shader and carries the
//! introspected interface: the vertex attribute layout (sorted ascending by
//! binding slot, with packed offsets and stride) and the parameter table
//! (name hash, type, dimension, byte offset into parameter data, stage mask
//! and the backend-resolved location).

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::handle::{Handle, Resource};
use crate::shader::{Shader, ShaderStages};
use crate::vertex::VertexFormat;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use smallvec::SmallVec;
use std::io::Cursor;
use std::sync::atomic::{AtomicI32, AtomicU64};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use uuid::Uuid;

/// Program parameter type. Each type claims a fixed number of bytes in the
/// parameter data block.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParameterType {
    Float4 = 0,
    Int4 = 1,
    Matrix = 2,
    Texture = 3,
}

impl ParameterType {
    pub fn size(self) -> u32 {
        match self {
            ParameterType::Float4 | ParameterType::Int4 => 16,
            ParameterType::Matrix => 64,
            ParameterType::Texture => 4,
        }
    }

    pub fn from_u8(raw: u8) -> Option<ParameterType> {
        match raw {
            0 => Some(ParameterType::Float4),
            1 => Some(ParameterType::Int4),
            2 => Some(ParameterType::Matrix),
            3 => Some(ParameterType::Texture),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ProgramAttribute {
    pub binding: u8,
    pub format: VertexFormat,
    pub offset: u16,
}

#[derive(Copy, Clone, Debug)]
pub struct ProgramParameter {
    pub name: u64,
    pub parameter_type: ParameterType,
    pub dim: u16,
    pub offset: u32,
    pub stages: ShaderStages,
    pub location: u32,
}

/// The introspected program interface, persisted in program resources and
/// rebuilt by backends at link time.
#[derive(Clone, Debug, Default)]
pub struct ProgramDescriptor {
    pub attributes: SmallVec<[ProgramAttribute; 8]>,
    pub attribute_names: SmallVec<[u64; 8]>,
    pub stride: u16,
    pub parameters: Vec<ProgramParameter>,
    pub parameter_data_size: u32,
}

impl ProgramDescriptor {
    /// Sorts attributes ascending by binding slot and recomputes offsets and
    /// the packed stride. Attribute names follow their attributes.
    pub fn sort_attributes(&mut self) {
        let mut indices: Vec<usize> = (0..self.attributes.len()).collect();
        indices.sort_by_key(|&index| self.attributes[index].binding);

        let attributes = std::mem::take(&mut self.attributes);
        let names = std::mem::take(&mut self.attribute_names);
        let mut offset = 0u16;
        for &index in &indices {
            let mut attribute = attributes[index];
            attribute.offset = offset;
            offset += attribute.format.size();
            self.attributes.push(attribute);
            self.attribute_names.push(names[index]);
        }
        self.stride = offset;
    }

    /// Recomputes parameter offsets in table order and the total data size.
    pub fn pack_parameters(&mut self) {
        let mut offset = 0u32;
        for parameter in &mut self.parameters {
            parameter.offset = offset;
            offset += parameter.parameter_type.size() * u32::from(parameter.dim.max(1));
        }
        self.parameter_data_size = offset;
    }

    pub fn parameter(&self, name: u64) -> Option<&ProgramParameter> {
        self.parameters.iter().find(|parameter| parameter.name == name)
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u16::<LittleEndian>(self.attributes.len() as u16)
            .unwrap();
        out.write_u16::<LittleEndian>(self.stride).unwrap();
        for (attribute, name) in self.attributes.iter().zip(self.attribute_names.iter()) {
            out.push(attribute.binding);
            out.push(attribute.format as u8);
            out.write_u16::<LittleEndian>(attribute.offset).unwrap();
            out.write_u64::<LittleEndian>(*name).unwrap();
        }
        out.write_u16::<LittleEndian>(self.parameters.len() as u16)
            .unwrap();
        out.write_u32::<LittleEndian>(self.parameter_data_size)
            .unwrap();
        for parameter in &self.parameters {
            out.write_u64::<LittleEndian>(parameter.name).unwrap();
            out.push(parameter.parameter_type as u8);
            out.push(parameter.stages.bits());
            out.write_u16::<LittleEndian>(parameter.dim).unwrap();
            out.write_u32::<LittleEndian>(parameter.offset).unwrap();
            out.write_u32::<LittleEndian>(parameter.location).unwrap();
        }
    }

    pub fn read_from(cursor: &mut Cursor<&[u8]>) -> Result<ProgramDescriptor> {
        let mut descriptor = ProgramDescriptor::default();
        let attribute_count = cursor.read_u16::<LittleEndian>()?;
        descriptor.stride = cursor.read_u16::<LittleEndian>()?;
        for _ in 0..attribute_count {
            let binding = cursor.read_u8()?;
            let format = VertexFormat::from_u8(cursor.read_u8()?);
            let offset = cursor.read_u16::<LittleEndian>()?;
            let name = cursor.read_u64::<LittleEndian>()?;
            descriptor.attributes.push(ProgramAttribute {
                binding,
                format,
                offset,
            });
            descriptor.attribute_names.push(name);
        }
        let parameter_count = cursor.read_u16::<LittleEndian>()?;
        descriptor.parameter_data_size = cursor.read_u32::<LittleEndian>()?;
        for _ in 0..parameter_count {
            let name = cursor.read_u64::<LittleEndian>()?;
            let parameter_type = ParameterType::from_u8(cursor.read_u8()?).ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "unknown parameter type",
                ))
            })?;
            let stages = ShaderStages::from_bits_truncate(cursor.read_u8()?);
            let dim = cursor.read_u16::<LittleEndian>()?;
            let offset = cursor.read_u32::<LittleEndian>()?;
            let location = cursor.read_u32::<LittleEndian>()?;
            descriptor.parameters.push(ProgramParameter {
                name,
                parameter_type,
                dim,
                offset,
                stages,
                location,
            });
        }
        Ok(descriptor)
    }
}

pub struct Program {
    uuid: Mutex<Uuid>,
    refs: AtomicI32,
    vertex_uuid: Mutex<Uuid>,
    pixel_uuid: Mutex<Uuid>,
    vertex_shader: Mutex<Option<(Handle, Arc<Shader>)>>,
    pixel_shader: Mutex<Option<(Handle, Arc<Shader>)>>,
    descriptor: Mutex<ProgramDescriptor>,
    backend: Mutex<Weak<Backend>>,
    backend_data: [AtomicU64; 4],
}

impl Resource for Program {
    fn refcount(&self) -> &AtomicI32 {
        &self.refs
    }
}

impl Program {
    pub fn new(uuid: Uuid) -> Arc<Program> {
        Arc::new(Program {
            uuid: Mutex::new(uuid),
            refs: AtomicI32::new(1),
            vertex_uuid: Mutex::new(Uuid::nil()),
            pixel_uuid: Mutex::new(Uuid::nil()),
            vertex_shader: Mutex::new(None),
            pixel_shader: Mutex::new(None),
            descriptor: Mutex::new(ProgramDescriptor::default()),
            backend: Mutex::new(Weak::new()),
            backend_data: Default::default(),
        })
    }

    pub fn uuid(&self) -> Uuid {
        *self.uuid.lock().unwrap()
    }

    pub fn shader_uuids(&self) -> (Uuid, Uuid) {
        (
            *self.vertex_uuid.lock().unwrap(),
            *self.pixel_uuid.lock().unwrap(),
        )
    }

    pub fn set_shader_uuids(&self, vertex: Uuid, pixel: Uuid) {
        *self.vertex_uuid.lock().unwrap() = vertex;
        *self.pixel_uuid.lock().unwrap() = pixel;
    }

    pub fn set_shaders(
        &self,
        vertex: (Handle, Arc<Shader>),
        pixel: (Handle, Arc<Shader>),
    ) {
        *self.vertex_shader.lock().unwrap() = Some(vertex);
        *self.pixel_shader.lock().unwrap() = Some(pixel);
    }

    pub fn vertex_shader(&self) -> Option<Arc<Shader>> {
        self.vertex_shader
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, shader)| Arc::clone(shader))
    }

    pub fn pixel_shader(&self) -> Option<Arc<Shader>> {
        self.pixel_shader
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, shader)| Arc::clone(shader))
    }

    /// Detaches both shader references, handing back their handles so the
    /// caller can release them against the owning backend.
    pub fn take_shaders(&self) -> Vec<Handle> {
        let mut handles = Vec::new();
        if let Some((handle, _)) = self.vertex_shader.lock().unwrap().take() {
            handles.push(handle);
        }
        if let Some((handle, _)) = self.pixel_shader.lock().unwrap().take() {
            handles.push(handle);
        }
        handles
    }

    pub fn descriptor(&self) -> MutexGuard<'_, ProgramDescriptor> {
        self.descriptor.lock().unwrap()
    }

    pub fn set_descriptor(&self, descriptor: ProgramDescriptor) {
        *self.descriptor.lock().unwrap() = descriptor;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::name_hash;

    fn sample_descriptor() -> ProgramDescriptor {
        let mut descriptor = ProgramDescriptor::default();
        descriptor.attributes.push(ProgramAttribute {
            binding: 3,
            format: VertexFormat::Float4,
            offset: 0,
        });
        descriptor.attribute_names.push(name_hash("color"));
        descriptor.attributes.push(ProgramAttribute {
            binding: 0,
            format: VertexFormat::Float3,
            offset: 0,
        });
        descriptor.attribute_names.push(name_hash("position"));
        descriptor.parameters.push(ProgramParameter {
            name: name_hash("transform_mvp"),
            parameter_type: ParameterType::Matrix,
            dim: 1,
            offset: 0,
            stages: ShaderStages::VERTEX,
            location: 0,
        });
        descriptor.parameters.push(ProgramParameter {
            name: name_hash("tint"),
            parameter_type: ParameterType::Float4,
            dim: 1,
            offset: 0,
            stages: ShaderStages::PIXEL,
            location: 1,
        });
        descriptor
    }

    #[test]
    fn attributes_sort_by_binding_with_packed_offsets() {
        let mut descriptor = sample_descriptor();
        descriptor.sort_attributes();
        assert_eq!(descriptor.attributes[0].binding, 0);
        assert_eq!(descriptor.attributes[0].offset, 0);
        assert_eq!(descriptor.attributes[1].binding, 3);
        assert_eq!(descriptor.attributes[1].offset, 12);
        assert_eq!(descriptor.stride, 28);
        assert_eq!(descriptor.attribute_names[0], name_hash("position"));
    }

    #[test]
    fn parameters_pack_deterministically() {
        let mut descriptor = sample_descriptor();
        descriptor.pack_parameters();
        assert_eq!(descriptor.parameters[0].offset, 0);
        assert_eq!(descriptor.parameters[1].offset, 64);
        assert_eq!(descriptor.parameter_data_size, 80);
    }

    #[test]
    fn descriptor_round_trips() {
        let mut descriptor = sample_descriptor();
        descriptor.sort_attributes();
        descriptor.pack_parameters();
        let mut bytes = Vec::new();
        descriptor.write_to(&mut bytes);
        let parsed = ProgramDescriptor::read_from(&mut Cursor::new(&bytes[..])).unwrap();
        assert_eq!(parsed.attributes.len(), 2);
        assert_eq!(parsed.parameters.len(), 2);
        assert_eq!(parsed.stride, descriptor.stride);
        assert_eq!(parsed.parameter_data_size, descriptor.parameter_data_size);
        assert_eq!(parsed.parameters[1].name, name_hash("tint"));
    }
}
