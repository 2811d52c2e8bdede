//! Vertex declarations.
//!
//! A vertex declaration maps attribute slots (position, normal, colors,
//! texcoords) to data formats and byte offsets inside a vertex. Declarations
//! are built from a slice of (format, attribute) records; offsets accumulate
//! in record order.

use std::fmt;

/// Data format of a single vertex attribute.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VertexFormat {
    Float = 0,
    Float2 = 1,
    Float3 = 2,
    Float4 = 3,
    UByte4 = 4,
    UByte4Snorm = 5,
    Short = 6,
    Short2 = 7,
    Short4 = 8,
    Int = 9,
    Int2 = 10,
    Int4 = 11,
    Unknown = 12,
}

const VERTEX_FORMAT_SIZE: [u16; 13] = [4, 8, 12, 16, 4, 4, 2, 4, 8, 4, 8, 16, 0];

impl VertexFormat {
    pub fn size(self) -> u16 {
        VERTEX_FORMAT_SIZE[self as usize]
    }

    /// Number of components, used when binding attribute pointers.
    pub fn components(self) -> u8 {
        match self {
            VertexFormat::Float | VertexFormat::Short | VertexFormat::Int => 1,
            VertexFormat::Float2 | VertexFormat::Short2 | VertexFormat::Int2 => 2,
            VertexFormat::Float3 => 3,
            VertexFormat::Float4
            | VertexFormat::UByte4
            | VertexFormat::UByte4Snorm
            | VertexFormat::Short4
            | VertexFormat::Int4 => 4,
            VertexFormat::Unknown => 0,
        }
    }

    pub fn from_u8(raw: u8) -> VertexFormat {
        match raw {
            0 => VertexFormat::Float,
            1 => VertexFormat::Float2,
            2 => VertexFormat::Float3,
            3 => VertexFormat::Float4,
            4 => VertexFormat::UByte4,
            5 => VertexFormat::UByte4Snorm,
            6 => VertexFormat::Short,
            7 => VertexFormat::Short2,
            8 => VertexFormat::Short4,
            9 => VertexFormat::Int,
            10 => VertexFormat::Int2,
            11 => VertexFormat::Int4,
            _ => VertexFormat::Unknown,
        }
    }
}

/// Attribute binding slots. The slot value doubles as the binding location
/// assigned during program link.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum VertexAttribute {
    Position = 0,
    Weight = 1,
    Normal = 2,
    PrimaryColor = 3,
    SecondaryColor = 4,
    Texcoord0 = 5,
    Texcoord1 = 6,
    Texcoord2 = 7,
}

pub const VERTEX_ATTRIBUTE_COUNT: usize = 8;

impl VertexAttribute {
    pub fn from_u8(raw: u8) -> Option<VertexAttribute> {
        match raw {
            0 => Some(VertexAttribute::Position),
            1 => Some(VertexAttribute::Weight),
            2 => Some(VertexAttribute::Normal),
            3 => Some(VertexAttribute::PrimaryColor),
            4 => Some(VertexAttribute::SecondaryColor),
            5 => Some(VertexAttribute::Texcoord0),
            6 => Some(VertexAttribute::Texcoord1),
            7 => Some(VertexAttribute::Texcoord2),
            _ => None,
        }
    }
}

impl fmt::Display for VertexAttribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            VertexAttribute::Position => "position",
            VertexAttribute::Weight => "weight",
            VertexAttribute::Normal => "normal",
            VertexAttribute::PrimaryColor => "color",
            VertexAttribute::SecondaryColor => "color1",
            VertexAttribute::Texcoord0 => "texcoord",
            VertexAttribute::Texcoord1 => "texcoord1",
            VertexAttribute::Texcoord2 => "texcoord2",
        };
        f.write_str(name)
    }
}

/// One attribute slot inside a declaration. `Unknown` format marks an
/// unused slot.
#[derive(Copy, Clone, Debug)]
pub struct VertexDeclAttribute {
    pub format: VertexFormat,
    pub binding: u8,
    pub offset: u16,
}

impl Default for VertexDeclAttribute {
    fn default() -> VertexDeclAttribute {
        VertexDeclAttribute {
            format: VertexFormat::Unknown,
            binding: 0,
            offset: 0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct VertexDecl {
    attributes: [VertexDeclAttribute; VERTEX_ATTRIBUTE_COUNT],
}

impl VertexDecl {
    /// Builds a declaration from (format, attribute) records. Offsets are
    /// assigned in record order; later records for the same attribute win.
    pub fn new(elements: &[(VertexFormat, VertexAttribute)]) -> VertexDecl {
        let mut decl = VertexDecl::default();
        let mut offset = 0u16;
        for &(format, attribute) in elements {
            if format == VertexFormat::Unknown {
                continue;
            }
            let slot = &mut decl.attributes[attribute as usize];
            slot.format = format;
            slot.binding = 0;
            slot.offset = offset;
            offset += format.size();
        }
        decl
    }

    pub fn attribute(&self, attribute: usize) -> &VertexDeclAttribute {
        &self.attributes[attribute]
    }

    pub fn attributes(&self) -> &[VertexDeclAttribute; VERTEX_ATTRIBUTE_COUNT] {
        &self.attributes
    }

    /// Vertex size: the end of the attribute reaching furthest into the
    /// vertex.
    pub fn size(&self) -> u16 {
        self.attributes
            .iter()
            .map(|attribute| attribute.offset + attribute.format.size())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decl_accumulates_offsets() {
        let decl = VertexDecl::new(&[
            (VertexFormat::Float3, VertexAttribute::Position),
            (VertexFormat::Float4, VertexAttribute::PrimaryColor),
        ]);
        assert_eq!(decl.attribute(VertexAttribute::Position as usize).offset, 0);
        assert_eq!(
            decl.attribute(VertexAttribute::PrimaryColor as usize).offset,
            12
        );
        assert_eq!(decl.size(), 28);
    }

    #[test]
    fn unused_slots_do_not_contribute() {
        let decl = VertexDecl::new(&[(VertexFormat::Float2, VertexAttribute::Texcoord0)]);
        assert_eq!(decl.size(), 8);
        assert_eq!(
            decl.attribute(VertexAttribute::Position as usize).format,
            VertexFormat::Unknown
        );
    }
}
