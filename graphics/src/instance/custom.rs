//! Passes attached to a live frame graph at runtime.

use crate::error::GraphicsError;
use crate::graph::{GraphError, RenderNode, next_pass_id};

use super::frame_graph::{FrameGraph, lookup, lookup_mut};
use super::pass_instance::{PassId, PassInstance, PassKind};

#[derive(Debug, Clone)]
struct CustomPassEntry {
    host: PassId,
    name: String,
    id: PassId,
    references: usize,
}

/// Side table of runtime passes, reference counted per attachment point.
///
/// Attaching a pass with the same name under the same host twice shares the
/// instance; it is detached when the last reference is removed.
#[derive(Debug, Clone, Default)]
pub struct CustomPassList {
    entries: Vec<CustomPassEntry>,
}

impl CustomPassList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instance attached under `host` as `name`.
    pub fn find(&self, host: PassId, name: &str) -> Option<PassId> {
        self.entry(host, name).map(|entry| entry.id)
    }

    /// Outstanding references to the custom pass `id`.
    pub fn references(&self, id: PassId) -> usize {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map_or(0, |entry| entry.references)
    }

    /// `(host, name, instance)` of every attached pass.
    pub fn iter(&self) -> impl Iterator<Item = (PassId, &str, PassId)> {
        self.entries
            .iter()
            .map(|entry| (entry.host, entry.name.as_str(), entry.id))
    }

    fn entry(&self, host: PassId, name: &str) -> Option<&CustomPassEntry> {
        self.entries
            .iter()
            .find(|entry| entry.host == host && entry.name == name)
    }

    /// Add a reference to an existing attachment.
    fn retain(&mut self, host: PassId, name: &str) -> Option<PassId> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.host == host && entry.name == name)?;
        entry.references += 1;
        Some(entry.id)
    }

    fn insert(&mut self, host: PassId, name: &str, id: PassId) {
        self.entries.push(CustomPassEntry {
            host,
            name: name.to_string(),
            id,
            references: 1,
        });
    }

    /// Drop a reference. Returns the instance and whether it was the last.
    fn release(&mut self, host: PassId, name: &str) -> Option<(PassId, bool)> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.host == host && entry.name == name)?;
        let entry = &mut self.entries[index];
        entry.references -= 1;
        let id = entry.id;
        if entry.references == 0 {
            self.entries.swap_remove(index);
            Some((id, true))
        } else {
            Some((id, false))
        }
    }
}

impl FrameGraph {
    /// Attach `node` as a new dependency of the pass `host`.
    ///
    /// The pass is initialized, sized from the host's resolution (the staged
    /// one if a resize is pending) and the host gets `on_create_framebuffer`
    /// so it can bind the new images. Attaching the same name under the same
    /// host again only adds a reference. Hosts are passes of the compiled
    /// graph; custom passes cannot host others.
    ///
    /// # Errors
    ///
    /// Fails if `host` does not exist, if `node` declares dependencies or if
    /// one of its attachment formats is unresolved.
    pub fn add_custom_pass(&mut self, host: &str, node: RenderNode) -> Result<PassId, GraphicsError> {
        let host_id = self.find(host).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("no pass named '{host}' to attach to"))
        })?;
        if let Some(id) = self.custom.retain(host_id, node.name()) {
            return Ok(id);
        }
        if let Some(dependency) = node.dependencies().next() {
            return Err(GraphicsError::InvalidParameter(format!(
                "custom pass '{}' cannot depend on '{}'",
                node.name(),
                dependency
            )));
        }
        if let Some(attachment) = node.attachments().iter().find(|a| a.format().is_none()) {
            return Err(GraphError::UnresolvedAttachmentFormat {
                pass: node.name().to_string(),
                attachment: attachment.name().to_string(),
            }
            .into());
        }

        let mut node = node;
        node.assign_id(next_pass_id());
        let render_pass = match node.render_pass_key() {
            Some(key) => Some(self.device.find_or_create_render_pass(&key)?),
            None => None,
        };
        let kind = if node.is_compute() {
            PassKind::Compute
        } else {
            PassKind::Graphics
        };
        let name = node.name().to_string();

        let mut instance = PassInstance::new(node, kind, render_pass, self.device.image_count());
        instance.custom = true;
        instance.parents.push(host_id);
        let id = self.instances.insert(instance);
        self.connect(id, host_id)?;
        lookup_mut(&mut self.instances, host_id)?.dependencies.push(id);
        self.custom.insert(host_id, &name, id);

        self.with_strategy(id, None, |strategy, ctx| strategy.init(ctx))?;
        // A resize staged on the host applies to the new pass as well.
        let host_instance = lookup(&self.instances, host_id)?;
        let parent_resolution = host_instance
            .pending_resolution()
            .unwrap_or(host_instance.resolution);
        let viewport = host_instance.viewport;
        self.create_or_resize(id, viewport, parent_resolution, false)?;
        self.with_strategy(host_id, None, |strategy, ctx| {
            strategy.on_create_framebuffer(ctx)
        })?;

        log::info!("FrameGraph: attached custom pass '{}' under '{}'", name, host);
        Ok(id)
    }

    /// Drop one reference to the custom pass `name` under `host`.
    ///
    /// Returns `true` if this detached the pass. Its resources are retired
    /// through deferred destruction.
    pub fn remove_custom_pass(&mut self, host: &str, name: &str) -> Result<bool, GraphicsError> {
        let host_id = self.find(host).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("no pass named '{host}'"))
        })?;
        let (id, detached) = self.custom.release(host_id, name).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "no custom pass '{name}' attached under '{host}'"
            ))
        })?;
        if !detached {
            return Ok(false);
        }

        self.recording.wait();
        lookup_mut(&mut self.instances, host_id)?
            .dependencies
            .retain(|&dependency| dependency != id);
        let instance = self
            .instances
            .remove(id)
            .ok_or_else(|| GraphicsError::Internal(format!("stale pass id {id:?}")))?;
        self.device.drop_resource(instance);

        self.with_strategy(host_id, None, |strategy, ctx| {
            strategy.on_create_framebuffer(ctx)
        })?;
        log::info!("FrameGraph: detached custom pass '{}' from '{}'", name, host);
        Ok(true)
    }
}
