//! Lazily updated descriptor sets.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{
    DescriptorResource, DescriptorWrite, GpuBackend, GpuDescriptorSet, GpuDescriptorSetLayout,
};
use crate::device::{Buffer, DeferredDestructor, Image, Sampler};
use crate::error::GraphicsError;

use super::{BindingLayout, BindingType};

/// A binding layout together with its backend object.
#[derive(Debug)]
pub struct DescriptorSetLayout {
    layout: BindingLayout,
    raw: GpuDescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub(crate) fn new(layout: BindingLayout, raw: GpuDescriptorSetLayout) -> Self {
        Self { layout, raw }
    }

    pub fn layout(&self) -> &BindingLayout {
        &self.layout
    }

    pub fn raw(&self) -> &GpuDescriptorSetLayout {
        &self.raw
    }
}

/// Resource currently bound at one binding.
#[derive(Debug, Clone)]
pub enum BoundResource {
    Image(Arc<Image>),
    Sampler(Arc<Sampler>),
    ImageSampler(Arc<Image>, Arc<Sampler>),
    Buffer(Arc<Buffer>),
}

impl BoundResource {
    fn same_as(&self, other: &BoundResource) -> bool {
        match (self, other) {
            (Self::Image(a), Self::Image(b)) => Arc::ptr_eq(a, b),
            (Self::Sampler(a), Self::Sampler(b)) => Arc::ptr_eq(a, b),
            (Self::ImageSampler(a, s), Self::ImageSampler(b, t)) => {
                Arc::ptr_eq(a, b) && Arc::ptr_eq(s, t)
            }
            (Self::Buffer(a), Self::Buffer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn resource(&self, copy: usize) -> DescriptorResource<'_> {
        match self {
            Self::Image(image) => DescriptorResource::Image(image.raw(copy)),
            Self::Sampler(sampler) => DescriptorResource::Sampler(sampler.raw()),
            Self::ImageSampler(image, sampler) => {
                DescriptorResource::ImageSampler(image.raw(copy), sampler.raw())
            }
            Self::Buffer(buffer) => DescriptorResource::Buffer(buffer.raw()),
        }
    }
}

#[derive(Debug)]
struct DescriptorSlot {
    raw: GpuDescriptorSet,
    outdated: bool,
}

/// Write-once-read-many binding table.
///
/// Binds only record the desired resource. The backend set of a frame slot
/// is rewritten by [`raw_current`](DescriptorSet::raw_current), once, the
/// first time the slot is used after a change. Binding the resource that is
/// already bound is a no-op; a replaced resource is retired through the
/// deferred-destruction ring because earlier frames may still read it.
///
/// A per-frame set writes copy `frame` of frame-buffered images; a static
/// set (one backend set) always writes copy 0.
pub struct DescriptorSet {
    backend: Arc<dyn GpuBackend>,
    deferred: Arc<DeferredDestructor>,
    layout: Arc<DescriptorSetLayout>,
    slots: Vec<DescriptorSlot>,
    bindings: BTreeMap<u32, BoundResource>,
}

impl DescriptorSet {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        deferred: Arc<DeferredDestructor>,
        layout: Arc<DescriptorSetLayout>,
        raw: Vec<GpuDescriptorSet>,
    ) -> Self {
        Self {
            backend,
            deferred,
            layout,
            slots: raw
                .into_iter()
                .map(|raw| DescriptorSlot {
                    raw,
                    outdated: true,
                })
                .collect(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    /// Whether the set has a single backend set shared by all frames.
    pub fn is_static(&self) -> bool {
        self.slots.len() == 1
    }

    pub fn binding(&self, binding: u32) -> Option<&BoundResource> {
        self.bindings.get(&binding)
    }

    /// Whether the backend set for `frame` will be rewritten on next use.
    pub fn is_outdated(&self, frame: usize) -> bool {
        self.slots[frame % self.slots.len()].outdated
    }

    pub fn bind_image(&mut self, binding: u32, image: &Arc<Image>) -> Result<(), GraphicsError> {
        self.check(binding, |ty| {
            matches!(ty, BindingType::Texture | BindingType::StorageTexture)
        })?;
        self.bind(binding, BoundResource::Image(Arc::clone(image)));
        Ok(())
    }

    pub fn bind_sampler(
        &mut self,
        binding: u32,
        sampler: &Arc<Sampler>,
    ) -> Result<(), GraphicsError> {
        self.check(binding, |ty| ty == BindingType::Sampler)?;
        self.bind(binding, BoundResource::Sampler(Arc::clone(sampler)));
        Ok(())
    }

    pub fn bind_image_sampler(
        &mut self,
        binding: u32,
        image: &Arc<Image>,
        sampler: &Arc<Sampler>,
    ) -> Result<(), GraphicsError> {
        self.check(binding, |ty| ty == BindingType::CombinedTextureSampler)?;
        self.bind(
            binding,
            BoundResource::ImageSampler(Arc::clone(image), Arc::clone(sampler)),
        );
        Ok(())
    }

    pub fn bind_buffer(&mut self, binding: u32, buffer: &Arc<Buffer>) -> Result<(), GraphicsError> {
        self.check(binding, BindingType::takes_buffer)?;
        self.bind(binding, BoundResource::Buffer(Arc::clone(buffer)));
        Ok(())
    }

    /// Backend set for `frame`, rewritten first if a binding changed since
    /// this slot was last used.
    pub fn raw_current(&mut self, frame: usize) -> Result<&GpuDescriptorSet, GraphicsError> {
        let index = frame % self.slots.len();
        if self.slots[index].outdated {
            let copy = if self.is_static() { 0 } else { frame };
            let mut writes = Vec::with_capacity(self.bindings.len());
            for (&binding, resource) in &self.bindings {
                let entry = self.layout.layout().entry(binding).ok_or_else(|| {
                    GraphicsError::Internal(format!("binding {binding} vanished from layout"))
                })?;
                writes.push(DescriptorWrite {
                    binding,
                    binding_type: entry.binding_type,
                    resource: resource.resource(copy),
                });
            }
            self.backend
                .update_descriptor_set(&self.slots[index].raw, &writes);
            self.slots[index].outdated = false;
        }
        Ok(&self.slots[index].raw)
    }

    fn check(
        &self,
        binding: u32,
        accepts: impl Fn(BindingType) -> bool,
    ) -> Result<(), GraphicsError> {
        let entry = self.layout.layout().entry(binding).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "binding {binding} is not part of layout {:?}",
                self.layout.layout().label
            ))
        })?;
        if accepts(entry.binding_type) {
            Ok(())
        } else {
            Err(GraphicsError::InvalidParameter(format!(
                "binding {binding} expects {:?}",
                entry.binding_type
            )))
        }
    }

    fn bind(&mut self, binding: u32, resource: BoundResource) {
        if self
            .bindings
            .get(&binding)
            .is_some_and(|current| current.same_as(&resource))
        {
            return;
        }
        if let Some(old) = self.bindings.insert(binding, resource) {
            self.deferred.queue(Box::new(old));
        }
        for slot in &mut self.slots {
            slot.outdated = true;
        }
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        // In-flight frames may still use the sets and their resources.
        let slots = std::mem::take(&mut self.slots);
        let bindings = std::mem::take(&mut self.bindings);
        self.deferred.queue(Box::new((slots, bindings)));
    }
}

impl std::fmt::Debug for DescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("layout", &self.layout.layout().label)
            .field("slots", &self.slots.len())
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .finish()
    }
}

static_assertions::assert_impl_all!(DescriptorSet: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::device::GraphicsDevice;
    use crate::types::{Extent2d, ImageDescriptor, SamplerDescriptor, TextureFormat, TextureUsage};

    fn setup() -> (Arc<DummyBackend>, GraphicsDevice) {
        let backend = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::new(backend.clone(), 2);
        (backend, device)
    }

    fn image(device: &GraphicsDevice) -> Arc<Image> {
        device
            .create_image(
                &ImageDescriptor::new_2d(
                    Extent2d::new(8, 8),
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::TEXTURE_BINDING,
                )
                .with_copies(device.image_count()),
            )
            .unwrap()
    }

    #[test]
    fn test_rebinding_same_image_is_noop() {
        let (backend, device) = setup();
        let layout = device
            .create_descriptor_set_layout(BindingLayout::new().with_texture(0))
            .unwrap();
        let mut set = device.create_descriptor_set(&layout, false).unwrap();
        let albedo = image(&device);

        set.bind_image(0, &albedo).unwrap();
        set.raw_current(0).unwrap();
        assert!(!set.is_outdated(0));

        set.bind_image(0, &albedo).unwrap();
        assert!(!set.is_outdated(0));
        set.raw_current(0).unwrap();
        assert_eq!(backend.descriptor_updates().len(), 1);
    }

    #[test]
    fn test_many_binds_single_update_with_last() {
        let (backend, device) = setup();
        let layout = device
            .create_descriptor_set_layout(BindingLayout::new().with_texture(0))
            .unwrap();
        let mut set = device.create_descriptor_set(&layout, false).unwrap();
        let images: Vec<_> = (0..5).map(|_| image(&device)).collect();
        for image in &images {
            set.bind_image(0, image).unwrap();
        }
        let raw = set.raw_current(1).unwrap().id();
        set.raw_current(1).unwrap();

        let updates = backend.descriptor_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].set, raw);
        assert_eq!(updates[0].writes, vec![(0, images[4].raw(1).id())]);

        // The other slot is still outdated and updates independently.
        assert!(set.is_outdated(0));
        set.raw_current(0).unwrap();
        assert_eq!(backend.descriptor_updates().len(), 2);
    }

    #[test]
    fn test_replaced_binding_is_retired_not_dropped() {
        let (_, device) = setup();
        let layout = device
            .create_descriptor_set_layout(BindingLayout::new().with_texture(0))
            .unwrap();
        let mut set = device.create_descriptor_set(&layout, false).unwrap();
        let first = image(&device);
        let weak = Arc::downgrade(&first);
        set.bind_image(0, &first).unwrap();
        drop(first);
        set.bind_image(0, &image(&device)).unwrap();

        assert!(weak.upgrade().is_some());
        assert_eq!(device.pending_resource_count(), 1);
        device.next_frame();
        device.next_frame();
        device.flush_resources();
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_static_set_has_single_slot() {
        let (backend, device) = setup();
        let layout = device
            .create_descriptor_set_layout(BindingLayout::new().with_sampler(1))
            .unwrap();
        let mut set = device.create_descriptor_set(&layout, true).unwrap();
        assert!(set.is_static());
        let sampler = device.create_sampler(&SamplerDescriptor::linear()).unwrap();
        set.bind_sampler(1, &sampler).unwrap();
        let a = set.raw_current(0).unwrap().id();
        let b = set.raw_current(1).unwrap().id();
        assert_eq!(a, b);
        assert_eq!(backend.descriptor_updates().len(), 1);
    }

    #[test]
    fn test_unknown_or_mismatched_binding_rejected() {
        let (_, device) = setup();
        let layout = device
            .create_descriptor_set_layout(BindingLayout::new().with_uniform_buffer(0))
            .unwrap();
        let mut set = device.create_descriptor_set(&layout, false).unwrap();
        let albedo = image(&device);
        assert!(matches!(
            set.bind_image(3, &albedo),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(matches!(
            set.bind_image(0, &albedo),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }
}
