//! Surface pixel formats and color spaces.

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PixelFormat {
    Unknown = 0,
    R8G8B8X8,
    R8G8B8A8,
    R16G16B16A16F,
    R32G32B32A32F,
    Depth24Stencil8,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn size(self) -> u32 {
        match self {
            PixelFormat::Unknown => 0,
            PixelFormat::R8G8B8X8 | PixelFormat::R8G8B8A8 | PixelFormat::Depth24Stencil8 => 4,
            PixelFormat::R16G16B16A16F => 8,
            PixelFormat::R32G32B32A32F => 16,
        }
    }
}

impl Default for PixelFormat {
    fn default() -> PixelFormat {
        PixelFormat::Unknown
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ColorSpace {
    Linear = 0,
    SRgb,
}

impl Default for ColorSpace {
    fn default() -> ColorSpace {
        ColorSpace::Linear
    }
}
