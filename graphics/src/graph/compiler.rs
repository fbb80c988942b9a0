//! Render graph compilation.
//!
//! Compiling a [`Renderer`] produces an immutable [`CompiledGraph`]:
//!
//! 1. **Copy** - nodes are deep-copied, so every compilation is independent
//! 2. **Validation** - dangling dependencies, root uniqueness, cycles
//! 3. **Formats** - the target format is assigned to the root attachment
//! 4. **Identity** - every node receives a process-wide unique id
//! 5. **Native passes** - render-pass objects are resolved through the
//!    device cache
//!
//! All failures are programmer errors in the graph declaration and carry the
//! offending pass names.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::{GraphicsDevice, RenderPassObject};
use crate::error::GraphicsError;
use crate::types::TextureFormat;

use super::{RenderNode, Renderer};

static NEXT_PASS_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-wide unique pass id.
pub(crate) fn next_pass_id() -> u64 {
    NEXT_PASS_ID.fetch_add(1, Ordering::Relaxed)
}

/// Errors that can occur during graph compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Every node is depended on by another node, so nothing can be the root.
    /// Happens for empty graphs and for graphs that are one big cycle.
    NoRoot { candidates: Vec<String> },
    /// More than one node has no dependents.
    MultipleRoots { roots: Vec<String> },
    /// A node requires a pass that was never declared.
    DanglingDependency { pass: String, dependency: String },
    /// A cycle hangs off the root, or a cyclic component is unreachable from it.
    CyclicDependency { passes: Vec<String> },
    /// The root has several attachments, so the target format has no home.
    AmbiguousRootAttachment {
        pass: String,
        attachments: Vec<String>,
    },
    /// A compute pass cannot render into a presentation image.
    ComputePresentTarget { pass: String },
    /// An attachment still has no format after compilation.
    UnresolvedAttachmentFormat { pass: String, attachment: String },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoRoot { candidates } => {
                write!(f, "render graph has no root, candidates: [{}]", candidates.join(", "))
            }
            Self::MultipleRoots { roots } => {
                write!(f, "render graph has multiple roots: [{}]", roots.join(", "))
            }
            Self::DanglingDependency { pass, dependency } => {
                write!(f, "pass '{pass}' requires unknown pass '{dependency}'")
            }
            Self::CyclicDependency { passes } => {
                write!(f, "render graph contains a cycle through [{}]", passes.join(", "))
            }
            Self::AmbiguousRootAttachment { pass, attachments } => write!(
                f,
                "root pass '{pass}' has {} attachments [{}], expected at most one",
                attachments.len(),
                attachments.join(", ")
            ),
            Self::ComputePresentTarget { pass } => {
                write!(f, "compute pass '{pass}' cannot be a present target")
            }
            Self::UnresolvedAttachmentFormat { pass, attachment } => {
                write!(f, "attachment '{attachment}' of pass '{pass}' has no format")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Immutable, validated render graph.
///
/// Cloning is cheap-ish and yields a graph with the *same* unique ids; use
/// [`Renderer::compile`] again for fresh ids.
#[derive(Clone)]
pub struct CompiledGraph {
    nodes: BTreeMap<String, RenderNode>,
    root: String,
    target_format: Option<TextureFormat>,
    render_passes: HashMap<String, Arc<RenderPassObject>>,
}

impl CompiledGraph {
    /// Name of the root node.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn root_node(&self) -> &RenderNode {
        // The root is validated to exist when the graph is built.
        &self.nodes[&self.root]
    }

    pub fn node(&self, name: &str) -> Option<&RenderNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RenderNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Format the root renders into, if compiled against a target.
    pub fn target_format(&self) -> Option<TextureFormat> {
        self.target_format
    }

    /// Native render pass resolved for `name` at compile time.
    pub fn render_pass(&self, name: &str) -> Option<&Arc<RenderPassObject>> {
        self.render_passes.get(name)
    }

    /// Node names in dependency order (dependencies before dependents).
    pub fn postorder(&self) -> Vec<&str> {
        let mut visited = BTreeSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        self.visit_postorder(&self.root, &mut visited, &mut order);
        order
    }

    fn visit_postorder<'a>(
        &'a self,
        name: &'a str,
        visited: &mut BTreeSet<&'a str>,
        order: &mut Vec<&'a str>,
    ) {
        if !visited.insert(name) {
            return;
        }
        if let Some(node) = self.nodes.get(name) {
            for dependency in node.dependencies() {
                self.visit_postorder(dependency, visited, order);
            }
            order.push(name);
        }
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("root", &self.root)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("target_format", &self.target_format)
            .finish()
    }
}

impl Renderer {
    /// Compile the graph and resolve native render passes on `device`.
    ///
    /// With a `target_format` the root becomes a present pass: its single
    /// attachment takes that format, or a `"present"` attachment is added if
    /// it declared none.
    pub fn compile(
        &self,
        target_format: Option<TextureFormat>,
        device: &GraphicsDevice,
    ) -> Result<CompiledGraph, GraphicsError> {
        let mut graph = self.freeze(target_format)?;

        for node in graph.nodes.values() {
            if let Some(key) = node.render_pass_key() {
                let render_pass = device.find_or_create_render_pass(&key)?;
                graph
                    .render_passes
                    .insert(node.name().to_string(), render_pass);
            }
        }

        log::info!(
            "Compiled render graph: {} passes, root '{}'",
            graph.nodes.len(),
            graph.root
        );

        Ok(graph)
    }

    /// Validate and freeze the graph without touching a device.
    pub fn freeze(&self, target_format: Option<TextureFormat>) -> Result<CompiledGraph, GraphError> {
        let mut nodes = self.nodes.clone();

        for node in nodes.values() {
            for dependency in node.dependencies() {
                if !nodes.contains_key(dependency) {
                    return Err(GraphError::DanglingDependency {
                        pass: node.name().to_string(),
                        dependency: dependency.to_string(),
                    });
                }
            }
        }

        let root = find_root(&nodes)?;
        check_cycles(&nodes, &root)?;

        if let Some(format) = target_format {
            let node = nodes
                .get_mut(&root)
                .ok_or_else(|| GraphError::NoRoot { candidates: Vec::new() })?;
            if node.is_compute() {
                return Err(GraphError::ComputePresentTarget { pass: root.clone() });
            }
            if node.attachments().len() > 1 {
                return Err(GraphError::AmbiguousRootAttachment {
                    pass: root.clone(),
                    attachments: node
                        .attachments()
                        .iter()
                        .map(|a| a.name().to_string())
                        .collect(),
                });
            }
            node.mark_present(format);
        }

        for node in nodes.values_mut() {
            if let Some(attachment) = node.attachments().iter().find(|a| a.format().is_none()) {
                return Err(GraphError::UnresolvedAttachmentFormat {
                    pass: node.name().to_string(),
                    attachment: attachment.name().to_string(),
                });
            }
            node.assign_id(next_pass_id());
        }

        Ok(CompiledGraph {
            nodes,
            root,
            target_format,
            render_passes: HashMap::new(),
        })
    }
}

fn find_root(nodes: &BTreeMap<String, RenderNode>) -> Result<String, GraphError> {
    let depended_on: BTreeSet<&str> = nodes
        .values()
        .flat_map(|node| node.dependencies())
        .collect();

    let roots: Vec<String> = nodes
        .keys()
        .filter(|name| !depended_on.contains(name.as_str()))
        .cloned()
        .collect();

    match roots.len() {
        1 => Ok(roots.into_iter().next().unwrap_or_default()),
        0 => Err(GraphError::NoRoot {
            candidates: nodes.keys().cloned().collect(),
        }),
        _ => Err(GraphError::MultipleRoots { roots }),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

fn check_cycles(nodes: &BTreeMap<String, RenderNode>, root: &str) -> Result<(), GraphError> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path: Vec<&str> = Vec::new();
    visit(nodes, root, &mut marks, &mut path)?;

    // Every non-root node has a dependent, so anything left over sits in a
    // cycle that the root cannot reach.
    let unreachable: Vec<String> = nodes
        .keys()
        .filter(|name| !marks.contains_key(name.as_str()))
        .cloned()
        .collect();
    if unreachable.is_empty() {
        Ok(())
    } else {
        Err(GraphError::CyclicDependency {
            passes: unreachable,
        })
    }
}

fn visit<'a>(
    nodes: &'a BTreeMap<String, RenderNode>,
    name: &'a str,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Result<(), GraphError> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => {
            let start = path.iter().position(|n| *n == name).unwrap_or(0);
            let mut passes: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            passes.push(name.to_string());
            return Err(GraphError::CyclicDependency { passes });
        }
        None => {}
    }

    marks.insert(name, Mark::InProgress);
    path.push(name);
    if let Some(node) = nodes.get(name) {
        for dependency in node.dependencies() {
            visit(nodes, dependency, marks, path)?;
        }
    }
    path.pop();
    marks.insert(name, Mark::Done);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Attachment;

    fn chain() -> Renderer {
        let mut renderer = Renderer::new();
        renderer
            .node("gbuffer")
            .attachment(Attachment::slot("albedo").with_format(TextureFormat::Rgba8Unorm));
        renderer
            .node("resolve")
            .require(["gbuffer"])
            .attachment(Attachment::slot("hdr").with_format(TextureFormat::Rgba16Float));
        renderer.node("present").require(["resolve"]);
        renderer
    }

    #[test]
    fn test_single_root_found() {
        let graph = chain().freeze(Some(TextureFormat::Bgra8Unorm)).unwrap();
        assert_eq!(graph.root(), "present");
        let root = graph.root_node();
        assert!(root.is_present());
        assert_eq!(root.attachments().len(), 1);
        assert_eq!(root.attachments()[0].format(), Some(TextureFormat::Bgra8Unorm));
    }

    #[test]
    fn test_postorder() {
        let graph = chain().freeze(Some(TextureFormat::Bgra8Unorm)).unwrap();
        assert_eq!(graph.postorder(), vec!["gbuffer", "resolve", "present"]);
    }

    #[test]
    fn test_unresolved_format_reported() {
        let mut renderer = chain();
        renderer.node("resolve").attachment(Attachment::slot("bloom"));
        let err = renderer.freeze(Some(TextureFormat::Bgra8Unorm)).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnresolvedAttachmentFormat {
                pass: "resolve".into(),
                attachment: "bloom".into()
            }
        );
    }

    #[test]
    fn test_root_without_attachments_and_no_target_is_valid() {
        let mut renderer = Renderer::new();
        renderer
            .node("a")
            .attachment(Attachment::slot("c").with_format(TextureFormat::Rgba8Unorm));
        renderer.node("b").require(["a"]);
        let graph = renderer.freeze(None).unwrap();
        assert_eq!(graph.root(), "b");
        assert!(!graph.root_node().is_present());
    }

    #[test]
    fn test_mutual_dependency_has_no_root() {
        let mut renderer = Renderer::new();
        renderer.node("a").require(["b"]);
        renderer.node("b").require(["a"]);
        let err = renderer.freeze(Some(TextureFormat::Bgra8Unorm)).unwrap_err();
        assert_eq!(
            err,
            GraphError::NoRoot {
                candidates: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn test_empty_graph_has_no_root() {
        let err = Renderer::new().freeze(None).unwrap_err();
        assert!(matches!(err, GraphError::NoRoot { candidates } if candidates.is_empty()));
    }

    #[test]
    fn test_multiple_roots_listed() {
        let mut renderer = Renderer::new();
        renderer.node("left");
        renderer.node("right");
        let err = renderer.freeze(Some(TextureFormat::Bgra8Unorm)).unwrap_err();
        assert_eq!(
            err,
            GraphError::MultipleRoots {
                roots: vec!["left".into(), "right".into()]
            }
        );
    }

    #[test]
    fn test_dangling_dependency() {
        let mut renderer = Renderer::new();
        renderer.node("present").require(["missing"]);
        let err = renderer.freeze(Some(TextureFormat::Bgra8Unorm)).unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingDependency {
                pass: "present".into(),
                dependency: "missing".into()
            }
        );
    }

    #[test]
    fn test_cycle_below_root() {
        let mut renderer = Renderer::new();
        renderer.node("present").require(["a"]);
        renderer.node("a").require(["b"]);
        renderer.node("b").require(["a"]);
        let err = renderer.freeze(Some(TextureFormat::Bgra8Unorm)).unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                passes: vec!["a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_unreachable_cycle() {
        let mut renderer = Renderer::new();
        renderer.node("present");
        renderer.node("a").require(["b"]);
        renderer.node("b").require(["a"]);
        let err = renderer.freeze(Some(TextureFormat::Bgra8Unorm)).unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                passes: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn test_ambiguous_root_attachment() {
        let mut renderer = Renderer::new();
        renderer
            .node("present")
            .attachment(Attachment::slot("color"))
            .attachment(Attachment::slot("depth").with_format(TextureFormat::Depth32Float));
        let err = renderer.freeze(Some(TextureFormat::Bgra8Unorm)).unwrap_err();
        assert!(matches!(err, GraphError::AmbiguousRootAttachment { ref pass, .. } if pass == "present"));
    }

    #[test]
    fn test_recompile_assigns_fresh_ids() {
        let renderer = chain();
        let first = renderer.freeze(Some(TextureFormat::Bgra8Unorm)).unwrap();
        let second = renderer.freeze(Some(TextureFormat::Bgra8Unorm)).unwrap();
        let a = first.node("gbuffer").unwrap().pass_ref();
        let b = second.node("gbuffer").unwrap().pass_ref();
        assert_eq!(a.generic_name(), b.generic_name());
        assert_ne!(a, b);
        // The builder itself is untouched.
        assert_eq!(renderer.get("gbuffer").unwrap().pass_ref().unique_id(), 0);
        assert!(!renderer.get("present").unwrap().is_present());
    }
}
