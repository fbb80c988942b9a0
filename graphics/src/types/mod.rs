//! Common types and descriptors for graphics resources.
//!
//! Format enums, usage flags, extents and clear values used by the graph,
//! the device and the backends.

mod buffer;
mod common;
mod sampler;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use common::{ClearValue, Extent2d, ScissorRect, Viewport};
pub use sampler::{AddressMode, CompareFunction, FilterMode, SamplerDescriptor};
pub use texture::{ImageDescriptor, TextureFormat, TextureUsage};
