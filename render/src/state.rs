//! Pipeline state blobs.
//!
//! A render state describes the fixed-function pipeline configuration a draw
//! runs with. State buffers carry exactly one of these; a render command
//! without a state buffer runs with [`RenderState::default`]. The encoded
//! form is one byte per field; decoding checks every discriminant and falls
//! back to the default state on anything out of range, since state buffer
//! contents arrive through the generic buffer write path.

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlendFactor {
    Zero = 0,
    One,
    SourceColor,
    InvSourceColor,
    DestColor,
    InvDestColor,
    SourceAlpha,
    InvSourceAlpha,
    DestAlpha,
    InvDestAlpha,
}

impl BlendFactor {
    pub fn from_u8(raw: u8) -> Option<BlendFactor> {
        match raw {
            0 => Some(BlendFactor::Zero),
            1 => Some(BlendFactor::One),
            2 => Some(BlendFactor::SourceColor),
            3 => Some(BlendFactor::InvSourceColor),
            4 => Some(BlendFactor::DestColor),
            5 => Some(BlendFactor::InvDestColor),
            6 => Some(BlendFactor::SourceAlpha),
            7 => Some(BlendFactor::InvSourceAlpha),
            8 => Some(BlendFactor::DestAlpha),
            9 => Some(BlendFactor::InvDestAlpha),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlendOp {
    Add = 0,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

impl BlendOp {
    pub fn from_u8(raw: u8) -> Option<BlendOp> {
        match raw {
            0 => Some(BlendOp::Add),
            1 => Some(BlendOp::Subtract),
            2 => Some(BlendOp::ReverseSubtract),
            3 => Some(BlendOp::Min),
            4 => Some(BlendOp::Max),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompareFunc {
    Never = 0,
    Less,
    LessEqual,
    Equal,
    NotEqual,
    GreaterEqual,
    Greater,
    Always,
}

impl CompareFunc {
    pub fn from_u8(raw: u8) -> Option<CompareFunc> {
        match raw {
            0 => Some(CompareFunc::Never),
            1 => Some(CompareFunc::Less),
            2 => Some(CompareFunc::LessEqual),
            3 => Some(CompareFunc::Equal),
            4 => Some(CompareFunc::NotEqual),
            5 => Some(CompareFunc::GreaterEqual),
            6 => Some(CompareFunc::Greater),
            7 => Some(CompareFunc::Always),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CullMode {
    None = 0,
    Back,
    Front,
}

impl CullMode {
    pub fn from_u8(raw: u8) -> Option<CullMode> {
        match raw {
            0 => Some(CullMode::None),
            1 => Some(CullMode::Back),
            2 => Some(CullMode::Front),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderState {
    pub blend_source: BlendFactor,
    pub blend_dest: BlendFactor,
    pub blend_op: BlendOp,
    pub depth_func: CompareFunc,
    pub depth_write: bool,
    pub cull: CullMode,
    pub color_write_mask: u8,
}

impl Default for RenderState {
    fn default() -> RenderState {
        RenderState {
            blend_source: BlendFactor::One,
            blend_dest: BlendFactor::Zero,
            blend_op: BlendOp::Add,
            depth_func: CompareFunc::LessEqual,
            depth_write: true,
            cull: CullMode::Back,
            color_write_mask: 0xf,
        }
    }
}

impl RenderState {
    /// Byte size of the encoded form carried by state buffers.
    pub const ENCODED_SIZE: usize = 7;

    /// Encodes the state for storage in a state buffer, one byte per field.
    pub fn encode(&self) -> [u8; RenderState::ENCODED_SIZE] {
        [
            self.blend_source as u8,
            self.blend_dest as u8,
            self.blend_op as u8,
            self.depth_func as u8,
            self.depth_write as u8,
            self.cull as u8,
            self.color_write_mask,
        ]
    }

    /// Reads a state back from a buffer store. Returns the default state
    /// when the bytes are short or any field is out of range.
    pub fn from_bytes(bytes: &[u8]) -> RenderState {
        if bytes.len() < RenderState::ENCODED_SIZE {
            return RenderState::default();
        }
        let decode = || {
            Some(RenderState {
                blend_source: BlendFactor::from_u8(bytes[0])?,
                blend_dest: BlendFactor::from_u8(bytes[1])?,
                blend_op: BlendOp::from_u8(bytes[2])?,
                depth_func: CompareFunc::from_u8(bytes[3])?,
                depth_write: bytes[4] != 0,
                cull: CullMode::from_u8(bytes[5])?,
                color_write_mask: bytes[6],
            })
        };
        decode().unwrap_or_else(RenderState::default)
    }

    /// Blend class for sort key composition: opaque draws sort before
    /// blended ones.
    pub fn blend_class(&self) -> u8 {
        if self.blend_source == BlendFactor::One && self.blend_dest == BlendFactor::Zero {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_bytes() {
        let mut state = RenderState::default();
        state.blend_source = BlendFactor::SourceAlpha;
        state.blend_dest = BlendFactor::InvSourceAlpha;
        state.depth_write = false;
        let copy = RenderState::from_bytes(&state.encode());
        assert_eq!(copy, state);
        assert_eq!(copy.blend_class(), 1);
    }

    #[test]
    fn invalid_discriminants_fall_back_to_default() {
        let mut bytes = RenderState::default().encode();
        bytes[3] = 9; // out of range for CompareFunc
        assert_eq!(RenderState::from_bytes(&bytes), RenderState::default());

        let mut bytes = RenderState::default().encode();
        bytes[0] = 0xff;
        assert_eq!(RenderState::from_bytes(&bytes), RenderState::default());
    }

    #[test]
    fn short_input_falls_back_to_default() {
        assert_eq!(RenderState::from_bytes(&[1, 2]), RenderState::default());
    }

    #[test]
    fn default_state_is_opaque() {
        assert_eq!(RenderState::default().blend_class(), 0);
    }
}
