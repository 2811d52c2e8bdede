//! Packed resource platform identifiers.
//!
//! A platform identifier is a 64-bit value carrying five 8-bit fields:
//! render api, render api group, host platform, architecture and toolchain.
//! A field of all ones means "unspecified"; a value with every field
//! unspecified matches anything ([`RESOURCE_PLATFORM_ALL`]). Compiled
//! resources use these identifiers as keys for per-platform specializations.

pub const RESOURCE_PLATFORM_ALL: u64 = 0x0000_00ff_ffff_ffff;

const FIELD_UNSPECIFIED: u8 = 0xff;

const SHIFT_RENDER_API: u32 = 0;
const SHIFT_RENDER_API_GROUP: u32 = 8;
const SHIFT_PLATFORM: u32 = 16;
const SHIFT_ARCH: u32 = 24;
const SHIFT_TOOLCHAIN: u32 = 32;

/// Unpacked platform identifier. A field value of -1 means unspecified.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PlatformDecl {
    pub render_api: i32,
    pub render_api_group: i32,
    pub platform: i32,
    pub arch: i32,
    pub toolchain: i32,
}

impl PlatformDecl {
    pub fn any() -> PlatformDecl {
        PlatformDecl {
            render_api: -1,
            render_api_group: -1,
            platform: -1,
            arch: -1,
            toolchain: -1,
        }
    }
}

fn field(value: u64, shift: u32) -> i32 {
    let raw = ((value >> shift) & 0xff) as u8;
    if raw == FIELD_UNSPECIFIED {
        -1
    } else {
        i32::from(raw)
    }
}

fn pack(value: i32) -> u64 {
    if value < 0 || value > 0xfe {
        u64::from(FIELD_UNSPECIFIED)
    } else {
        value as u64
    }
}

pub fn resource_platform_decompose(platform: u64) -> PlatformDecl {
    PlatformDecl {
        render_api: field(platform, SHIFT_RENDER_API),
        render_api_group: field(platform, SHIFT_RENDER_API_GROUP),
        platform: field(platform, SHIFT_PLATFORM),
        arch: field(platform, SHIFT_ARCH),
        toolchain: field(platform, SHIFT_TOOLCHAIN),
    }
}

pub fn resource_platform(decl: PlatformDecl) -> u64 {
    pack(decl.render_api) << SHIFT_RENDER_API
        | pack(decl.render_api_group) << SHIFT_RENDER_API_GROUP
        | pack(decl.platform) << SHIFT_PLATFORM
        | pack(decl.arch) << SHIFT_ARCH
        | pack(decl.toolchain) << SHIFT_TOOLCHAIN
}

/// True when `platform` is equal to `reference` or more specific than it:
/// every field `reference` pins must match, and `platform` may pin more.
pub fn resource_platform_is_equal_or_more_specific(platform: u64, reference: u64) -> bool {
    if reference == RESOURCE_PLATFORM_ALL {
        return true;
    }
    let p = resource_platform_decompose(platform);
    let r = resource_platform_decompose(reference);
    let field_ok = |pf: i32, rf: i32| rf < 0 || pf == rf;
    field_ok(p.render_api, r.render_api)
        && field_ok(p.render_api_group, r.render_api_group)
        && field_ok(p.platform, r.platform)
        && field_ok(p.arch, r.arch)
        && field_ok(p.toolchain, r.toolchain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{RenderApi, RenderApiGroup};

    fn dx_group() -> u64 {
        let mut decl = PlatformDecl::any();
        decl.render_api_group = RenderApiGroup::DirectX as i32;
        resource_platform(decl)
    }

    fn dx11() -> u64 {
        let mut decl = PlatformDecl::any();
        decl.render_api_group = RenderApiGroup::DirectX as i32;
        decl.render_api = RenderApi::DirectX11 as i32;
        resource_platform(decl)
    }

    #[test]
    fn round_trip() {
        let decl = resource_platform_decompose(dx11());
        assert_eq!(decl.render_api, RenderApi::DirectX11 as i32);
        assert_eq!(decl.render_api_group, RenderApiGroup::DirectX as i32);
        assert_eq!(decl.platform, -1);
        assert_eq!(resource_platform(decl), dx11());
    }

    #[test]
    fn all_matches_everything() {
        assert_eq!(resource_platform(PlatformDecl::any()), RESOURCE_PLATFORM_ALL);
        assert!(resource_platform_is_equal_or_more_specific(
            dx11(),
            RESOURCE_PLATFORM_ALL
        ));
    }

    #[test]
    fn specificity_is_one_directional() {
        assert!(resource_platform_is_equal_or_more_specific(dx11(), dx_group()));
        assert!(!resource_platform_is_equal_or_more_specific(dx_group(), dx11()));
        assert!(resource_platform_is_equal_or_more_specific(dx11(), dx11()));
    }

    #[test]
    fn different_branches_do_not_match() {
        let mut decl = PlatformDecl::any();
        decl.render_api_group = RenderApiGroup::OpenGL as i32;
        let gl_group = resource_platform(decl);
        assert!(!resource_platform_is_equal_or_more_specific(dx11(), gl_group));
    }
}
