//! Backend-abstract GPU resource management and sorted command submission.
//!
//! The core owns GPU-backed resources (buffers, shaders, programs, textures,
//! render targets) behind generation-checked handles, assembles batches of
//! draw commands from concurrent producer threads, radix-sorts them by
//! 64-bit key and drives a concrete rendering API through the
//! [`BackendDevice`](backend::BackendDevice) trait. Submission order is
//! independent of execution order: the stable sort decides what the GPU
//! sees, so any producer can contribute commands non-locally as long as its
//! keys land in the right place.
//!
//! The embedding application creates one [`RenderRuntime`](runtime::RenderRuntime),
//! selects a backend through the API-preference fallback table, attaches a
//! drawable and goes:
//!
//! * allocate buffers, load shaders and programs by UUID
//! * reserve commands into one or more [`Context`](context::Context)s
//! * `sort_merge` + `dispatch` + `flip`
//!
//! Concrete API translation lives outside this crate behind the device
//! trait; the in-crate [`NullDevice`](null::NullDevice) is the terminal
//! fallback and runs the full translation headlessly.

pub mod api;
pub mod backend;
pub mod buffer;
pub mod command;
pub mod compile;
pub mod context;
pub mod drawable;
pub mod error;
pub mod event;
pub mod format;
pub mod handle;
pub mod null;
pub mod parameter;
pub mod pipeline;
pub mod platform;
pub mod program;
pub mod reflect;
pub mod resource;
pub mod runtime;
pub mod shader;
pub mod sort;
pub mod state;
pub mod target;
pub mod texture;
pub mod uuidmap;
pub mod vertex;

pub use crate::api::{RenderApi, RenderApiGroup};
pub use crate::backend::{thread_backend, Backend, BackendDevice, ThreadBinding};
pub use crate::buffer::{Buffer, BufferFlags, BufferKind, BufferUsage, IndexFormat, UploadPolicy};
pub use crate::command::{ClearFlags, Command, Primitive};
pub use crate::context::Context;
pub use crate::drawable::{Drawable, DrawableType, NativeHandles, Resolution};
pub use crate::error::{Error, Result};
pub use crate::format::{ColorSpace, PixelFormat};
pub use crate::handle::{Handle, HandleMap, Resource};
pub use crate::null::{NullDevice, NullDeviceStats};
pub use crate::parameter::{ParameterData, ParameterDecl};
pub use crate::program::{ParameterType, Program, ProgramDescriptor};
pub use crate::runtime::{RenderConfig, RenderRuntime};
pub use crate::shader::{Shader, ShaderKind, ShaderStages};
pub use crate::sort::sort_merge;
pub use crate::state::RenderState;
pub use crate::target::{Target, TargetKind};
pub use crate::texture::{Texture, TextureDescriptor, TextureType};
pub use crate::vertex::{VertexAttribute, VertexDecl, VertexFormat};
