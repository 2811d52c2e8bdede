//! Render surfaces.
//!
//! A drawable describes the surface a backend renders into. Creation of the
//! underlying OS object (window, layer, EGL surface) happens outside this
//! library; the drawable carries the dimensions, the adapter index and a few
//! opaque native handle words the concrete backend knows how to interpret.

use crate::format::{ColorSpace, PixelFormat};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DrawableType {
    Window,
    Offscreen,
    Fullscreen,
}

/// Opaque OS-level handle words (HWND/HDC, Display/Window, NSView, ...).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NativeHandles {
    pub window: u64,
    pub display: u64,
    pub view: u64,
}

#[derive(Clone, Debug)]
pub struct Drawable {
    pub drawable_type: DrawableType,
    pub adapter: u32,
    pub width: u32,
    pub height: u32,
    pub refresh: u32,
    pub native: NativeHandles,
}

impl Drawable {
    pub fn window(adapter: u32, width: u32, height: u32, native: NativeHandles) -> Drawable {
        Drawable {
            drawable_type: DrawableType::Window,
            adapter,
            width,
            height,
            refresh: 0,
            native,
        }
    }

    pub fn offscreen(width: u32, height: u32) -> Drawable {
        Drawable {
            drawable_type: DrawableType::Offscreen,
            adapter: 0,
            width,
            height,
            refresh: 0,
            native: NativeHandles::default(),
        }
    }

    pub fn fullscreen(adapter: u32, width: u32, height: u32, refresh: u32) -> Drawable {
        Drawable {
            drawable_type: DrawableType::Fullscreen,
            adapter,
            width,
            height,
            refresh,
            native: NativeHandles::default(),
        }
    }

    pub fn drawable_type(&self) -> DrawableType {
        self.drawable_type
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Display mode as reported by backend adapter enumeration.
#[derive(Copy, Clone, Debug)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    pub pixelformat: PixelFormat,
    pub colorspace: ColorSpace,
    pub refresh: u32,
}
