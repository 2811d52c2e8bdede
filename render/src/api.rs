//! Render API identifiers and the fallback preference order.

use std::fmt;

/// Identifies a concrete rendering API, or one of the family roots that the
/// selector resolves through the fallback table.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RenderApi {
    Unknown = 0,
    Default = 1,
    Null = 2,
    OpenGL = 3,
    DirectX = 4,
    GLES = 5,
    OpenGL2 = 6,
    OpenGL3 = 7,
    OpenGL4 = 8,
    DirectX10 = 9,
    DirectX11 = 10,
    DirectX12 = 11,
    GLES2 = 12,
    GLES3 = 13,
    Vulkan = 14,
    Metal = 15,
    // Reserved console identifiers
    PS4 = 16,
    XboxOne = 17,
}

pub const RENDERAPI_COUNT: usize = 18;

/// API family, recorded in the resource platform identifier so compiled
/// resources can specialize per group rather than per concrete API.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RenderApiGroup {
    Unknown = 0,
    None = 1,
    OpenGL = 2,
    DirectX = 3,
    GLES = 4,
    Vulkan = 5,
    Metal = 6,
}

impl RenderApi {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> RenderApi {
        match index {
            1 => RenderApi::Default,
            2 => RenderApi::Null,
            3 => RenderApi::OpenGL,
            4 => RenderApi::DirectX,
            5 => RenderApi::GLES,
            6 => RenderApi::OpenGL2,
            7 => RenderApi::OpenGL3,
            8 => RenderApi::OpenGL4,
            9 => RenderApi::DirectX10,
            10 => RenderApi::DirectX11,
            11 => RenderApi::DirectX12,
            12 => RenderApi::GLES2,
            13 => RenderApi::GLES3,
            14 => RenderApi::Vulkan,
            15 => RenderApi::Metal,
            16 => RenderApi::PS4,
            17 => RenderApi::XboxOne,
            _ => RenderApi::Unknown,
        }
    }

    pub fn group(self) -> RenderApiGroup {
        match self {
            RenderApi::OpenGL | RenderApi::OpenGL2 | RenderApi::OpenGL3 | RenderApi::OpenGL4 => {
                RenderApiGroup::OpenGL
            }
            RenderApi::DirectX
            | RenderApi::DirectX10
            | RenderApi::DirectX11
            | RenderApi::DirectX12 => RenderApiGroup::DirectX,
            RenderApi::GLES | RenderApi::GLES2 | RenderApi::GLES3 => RenderApiGroup::GLES,
            RenderApi::Vulkan => RenderApiGroup::Vulkan,
            RenderApi::Metal => RenderApiGroup::Metal,
            RenderApi::Null => RenderApiGroup::None,
            _ => RenderApiGroup::Unknown,
        }
    }

    /// Next API to try when this one is disabled or fails to initialize.
    /// Deterministic preference order; `Unknown` is the terminal state.
    pub fn fallback(self) -> RenderApi {
        match self {
            RenderApi::Unknown => RenderApi::Unknown,

            RenderApi::Default => {
                if cfg!(target_os = "windows") {
                    RenderApi::DirectX
                } else if cfg!(any(target_os = "ios", target_os = "android")) {
                    RenderApi::GLES
                } else {
                    RenderApi::OpenGL
                }
            }

            RenderApi::Null => RenderApi::Unknown,

            RenderApi::OpenGL => RenderApi::OpenGL4,
            RenderApi::DirectX => RenderApi::DirectX11,
            RenderApi::GLES => RenderApi::GLES3,

            RenderApi::OpenGL3 => RenderApi::OpenGL2,
            // Try the native path before dropping down to GL3
            RenderApi::OpenGL4 => {
                if cfg!(target_os = "windows") {
                    RenderApi::DirectX10
                } else {
                    RenderApi::OpenGL3
                }
            }
            RenderApi::DirectX10 => RenderApi::OpenGL3,
            RenderApi::DirectX11 => RenderApi::DirectX10,
            RenderApi::DirectX12 => RenderApi::DirectX11,
            RenderApi::GLES3 => RenderApi::GLES2,
            RenderApi::GLES2 => RenderApi::Null,
            RenderApi::OpenGL2 => RenderApi::Null,

            RenderApi::Vulkan | RenderApi::Metal | RenderApi::PS4 | RenderApi::XboxOne => {
                RenderApi::Null
            }
        }
    }
}

impl fmt::Display for RenderApi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RenderApi::Unknown => "unknown",
            RenderApi::Default => "default",
            RenderApi::Null => "null",
            RenderApi::OpenGL => "opengl",
            RenderApi::DirectX => "directx",
            RenderApi::GLES => "gles",
            RenderApi::OpenGL2 => "opengl2",
            RenderApi::OpenGL3 => "opengl3",
            RenderApi::OpenGL4 => "opengl4",
            RenderApi::DirectX10 => "directx10",
            RenderApi::DirectX11 => "directx11",
            RenderApi::DirectX12 => "directx12",
            RenderApi::GLES2 => "gles2",
            RenderApi::GLES3 => "gles3",
            RenderApi::Vulkan => "vulkan",
            RenderApi::Metal => "metal",
            RenderApi::PS4 => "ps4",
            RenderApi::XboxOne => "xboxone",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_chains_terminate() {
        for index in 0..RENDERAPI_COUNT {
            let mut api = RenderApi::from_index(index);
            let mut steps = 0;
            while api != RenderApi::Unknown {
                api = api.fallback();
                steps += 1;
                assert!(steps < 16, "fallback chain does not terminate");
            }
        }
    }

    #[test]
    fn gl_family_falls_back_to_null() {
        let mut api = RenderApi::OpenGL;
        let mut chain = Vec::new();
        while api != RenderApi::Unknown {
            chain.push(api);
            api = api.fallback();
        }
        assert!(chain.contains(&RenderApi::Null));
        assert!(chain.contains(&RenderApi::OpenGL2));
    }
}
