//! Descriptor layouts and lazily updated descriptor sets.
//!
//! A [`BindingLayout`] describes the bindings of a set. The device turns it
//! into a [`DescriptorSetLayout`], from which [`DescriptorSet`]s are
//! allocated. Sets only touch the backend when a frame slot is used after one
//! of its bindings changed.

mod layout;
mod set;

pub use layout::{BindingLayout, BindingLayoutEntry, BindingType, ShaderStageFlags};
pub use set::{BoundResource, DescriptorSet, DescriptorSetLayout};
