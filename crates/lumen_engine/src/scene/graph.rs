//! Scene graph: an arena forest of named nodes.
//!
//! Nodes live in a [`SlotMap`] and refer to each other by [`NodeId`]; a
//! parent owns its children's ids and each child keeps a non-owning parent
//! id. World matrices are resolved lazily: mutating a transform flags it and
//! every descendant as stale, and the next [`SceneGraph::world_matrix`] walks
//! up to the nearest clean ancestor and recomposes downward.
//!
//! A stale node always has stale descendants, so resolution can stop at the
//! first clean ancestor and dirty-marking can stop at the first stale child.

use std::collections::HashMap;
use std::sync::Arc;

use slotmap::SlotMap;
use thiserror::Error;

use super::behavior::{Behavior, BehaviorError, InitContext, RenderContext, UpdateContext};
use super::node::{NodeId, SceneNode};
use super::transform::TransformState;
use crate::core::context::EngineContext;
use crate::foundation::math::{transform_direction, translation_of, Mat4, Vec3};
use crate::render::commands::CommandRecorder;

/// Scene graph errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// Id does not name a live node
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    /// No node registered under this name
    #[error("no node named '{0}'")]
    NameNotFound(String),

    /// A node with this name already exists
    #[error("a node named '{0}' already exists")]
    DuplicateName(String),

    /// Reparenting would make a node its own ancestor
    #[error("making '{child}' a child of '{parent}' would create a cycle")]
    Cycle {
        /// Requested parent
        parent: String,
        /// Requested child
        child: String,
    },

    /// `remove_child` on a node that is not a child of `parent`
    #[error("'{child}' is not a child of '{parent}'")]
    NotAChild {
        /// Named parent
        parent: String,
        /// Named child
        child: String,
    },

    /// Node already has a behavior of this kind
    #[error("node '{node}' already has a {kind}")]
    DuplicateBehavior {
        /// Node name
        node: String,
        /// Behavior kind
        kind: &'static str,
    },

    /// A behavior hook failed
    #[error("behavior on node '{node}' failed: {source}")]
    Behavior {
        /// Node name
        node: String,
        /// Underlying failure
        source: BehaviorError,
    },
}

/// Scene result alias
pub type SceneResult<T> = Result<T, SceneError>;

/// Forest of nodes with name lookup and lazy world transforms
pub struct SceneGraph {
    engine: Arc<EngineContext>,
    nodes: SlotMap<NodeId, SceneNode>,
    names: HashMap<String, NodeId>,
    roots: Vec<NodeId>,
}

impl std::fmt::Debug for SceneGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneGraph")
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

impl SceneGraph {
    /// Empty graph bound to `engine`
    pub fn new(engine: Arc<EngineContext>) -> Self {
        Self {
            engine,
            nodes: SlotMap::with_key(),
            names: HashMap::new(),
            roots: Vec::new(),
        }
    }

    /// Engine services behaviors are initialized with
    pub fn engine(&self) -> &Arc<EngineContext> {
        &self.engine
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes without a parent, in creation/detach order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Whether `id` names a live node
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Look up a node
    pub fn node(&self, id: NodeId) -> SceneResult<&SceneNode> {
        self.nodes.get(id).ok_or(SceneError::UnknownNode(id))
    }

    /// Node `id`, if live
    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id)
    }

    /// Mutable node `id`, if live
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id)
    }

    fn node_mut(&mut self, id: NodeId) -> SceneResult<&mut SceneNode> {
        self.nodes.get_mut(id).ok_or(SceneError::UnknownNode(id))
    }

    fn name_of(&self, id: NodeId) -> String {
        self.nodes.get(id).map_or_else(|| format!("{id:?}"), |n| n.name.clone())
    }

    /// Node registered under `name`
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// Node registered under `name`, as an error when missing
    pub fn require(&self, name: &str) -> SceneResult<NodeId> {
        self.find(name).ok_or_else(|| SceneError::NameNotFound(name.to_string()))
    }

    /// Parent of `id`
    pub fn parent(&self, id: NodeId) -> SceneResult<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    /// Children of `id` in order
    pub fn children(&self, id: NodeId) -> SceneResult<&[NodeId]> {
        Ok(&self.node(id)?.children)
    }

    /// Direct child of `parent` called `name`
    pub fn find_child(&self, parent: NodeId, name: &str) -> SceneResult<Option<NodeId>> {
        Ok(self
            .node(parent)?
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes.get(child).is_some_and(|n| n.name == name)))
    }

    /// Create a root node with a default transform.
    ///
    /// Names are unique; creating a second node with a taken name fails.
    pub fn create_node(&mut self, name: impl Into<String>) -> SceneResult<NodeId> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(SceneError::DuplicateName(name));
        }

        let id = self.nodes.insert(SceneNode::new(name.clone()));
        self.names.insert(name, id);
        self.roots.push(id);
        log::debug!("Created node '{}' ({:?})", self.name_of(id), id);
        Ok(id)
    }

    /// Include or exclude `id` and its subtree from traversals
    pub fn set_active(&mut self, id: NodeId, active: bool) -> SceneResult<()> {
        self.node_mut(id)?.active = active;
        Ok(())
    }

    /// Make `child` the last child of `parent`.
    ///
    /// Does nothing if it already is a child of `parent`. Otherwise it is
    /// detached from any previous parent first. Fails if `child` is `parent`
    /// or one of its ancestors.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> SceneResult<()> {
        self.node(parent)?;
        if self.node(child)?.parent == Some(parent) {
            return Ok(());
        }

        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child {
                return Err(SceneError::Cycle {
                    parent: self.name_of(parent),
                    child: self.name_of(child),
                });
            }
            cursor = self.nodes.get(current).and_then(|n| n.parent);
        }

        self.detach(child);
        self.node_mut(parent)?.children.push(child);

        let node = self.node_mut(child)?;
        node.parent = Some(parent);
        node.transform.link_parent(Some(parent));
        self.mark_subtree_dirty(child);
        Ok(())
    }

    /// Detach `child` from `parent`; it becomes a root and is not destroyed.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> SceneResult<()> {
        self.node(parent)?;
        if self.node(child)?.parent != Some(parent) {
            return Err(SceneError::NotAChild {
                parent: self.name_of(parent),
                child: self.name_of(child),
            });
        }

        self.detach(child);
        let node = self.node_mut(child)?;
        node.parent = None;
        node.transform.link_parent(None);
        self.roots.push(child);
        self.mark_subtree_dirty(child);
        Ok(())
    }

    /// Unlink `id` from its parent's child list or from the roots.
    fn detach(&mut self, id: NodeId) {
        let parent = self.nodes.get(id).and_then(|n| n.parent);
        match parent.and_then(|p| self.nodes.get_mut(p)) {
            Some(parent_node) => parent_node.children.retain(|&c| c != id),
            None => self.roots.retain(|&r| r != id),
        }
    }

    /// Destroy `id` and its whole subtree, cleaning up their behaviors.
    ///
    /// Returns the number of nodes removed.
    pub fn destroy_node(&mut self, id: NodeId) -> SceneResult<usize> {
        self.node(id)?;
        self.detach(id);

        let subtree = self.collect_subtree(id);
        // Children are cleaned up before their parents
        for &node_id in subtree.iter().rev() {
            if let Some(mut node) = self.nodes.remove(node_id) {
                node.behaviors.clean_up_all(&self.engine);
                self.names.remove(&node.name);
                log::debug!("Destroyed node '{}'", node.name);
            }
        }
        Ok(subtree.len())
    }

    /// `id` followed by its descendants in pre-order
    fn collect_subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current) {
                out.push(current);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Attach `behavior` to `id` and initialize it immediately.
    ///
    /// If initialization fails the behavior is detached again and the error
    /// is returned; such errors are configuration errors.
    pub fn add_behavior<T: Behavior>(&mut self, id: NodeId, behavior: T) -> SceneResult<()> {
        let engine = self.engine.clone();
        let node = self.node_mut(id)?;
        let index = node.behaviors.insert(behavior).map_err(|rejected| SceneError::DuplicateBehavior {
            node: node.name.clone(),
            kind: rejected.kind_name(),
        })?;

        let Some(mut behavior) = node.behaviors.take(index) else {
            return Ok(());
        };
        let result = behavior.initialize(&mut InitContext {
            engine: &engine,
            node: id,
            node_name: &node.name,
            siblings: &node.behaviors,
        });

        match result {
            Ok(()) => {
                node.behaviors.restore(index, behavior);
                Ok(())
            }
            Err(source) => {
                node.behaviors.remove_at(index);
                log::error!("Failed to initialize {} on '{}': {}", behavior.kind_name(), node.name, source);
                Err(SceneError::Behavior {
                    node: node.name.clone(),
                    source,
                })
            }
        }
    }

    /// Behavior of kind `T` on `id`
    pub fn behavior<T: Behavior>(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(id).and_then(|n| n.behaviors.get::<T>())
    }

    /// Mutable behavior of kind `T` on `id`
    pub fn behavior_mut<T: Behavior>(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes.get_mut(id).and_then(|n| n.behaviors.get_mut::<T>())
    }

    /// Detach and clean up the `T` on `id`; returns whether one was attached
    pub fn remove_behavior<T: Behavior>(&mut self, id: NodeId) -> SceneResult<bool> {
        let engine = self.engine.clone();
        match self.node_mut(id)?.behaviors.remove::<T>() {
            Some(mut behavior) => {
                behavior.clean_up(&engine);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Read `id`'s transform
    pub fn transform(&self, id: NodeId) -> SceneResult<&TransformState> {
        Ok(&self.node(id)?.transform)
    }

    /// Mutate `id`'s transform; staleness propagates to the subtree
    pub fn with_transform_mut<R>(&mut self, id: NodeId, f: impl FnOnce(&mut TransformState) -> R) -> SceneResult<R> {
        let node = self.node_mut(id)?;
        let result = f(&mut node.transform);
        if node.transform.is_dirty() {
            self.mark_descendants_dirty(id);
        }
        Ok(result)
    }

    /// Set local position
    pub fn set_position(&mut self, id: NodeId, position: Vec3) -> SceneResult<()> {
        self.with_transform_mut(id, |t| t.set_position(position))
    }

    /// Move by `delta`
    pub fn translate(&mut self, id: NodeId, delta: Vec3) -> SceneResult<()> {
        self.with_transform_mut(id, |t| t.translate(delta))
    }

    /// Set local rotation in degrees
    pub fn set_rotation(&mut self, id: NodeId, degrees: Vec3) -> SceneResult<()> {
        self.with_transform_mut(id, |t| t.set_rotation(degrees))
    }

    /// Rotate by `delta` degrees
    pub fn rotate(&mut self, id: NodeId, delta: Vec3) -> SceneResult<()> {
        self.with_transform_mut(id, |t| t.rotate(delta))
    }

    /// Set local scale
    pub fn set_scale(&mut self, id: NodeId, scale: Vec3) -> SceneResult<()> {
        self.with_transform_mut(id, |t| t.set_scale(scale))
    }

    /// Multiply local scale
    pub fn scale_by(&mut self, id: NodeId, factor: Vec3) -> SceneResult<()> {
        self.with_transform_mut(id, |t| t.scale_by(factor))
    }

    fn mark_subtree_dirty(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.transform.mark_dirty();
        }
        self.mark_descendants_dirty(id);
    }

    fn mark_descendants_dirty(&mut self, id: NodeId) {
        let mut stack: Vec<NodeId> = self.nodes.get(id).map(|n| n.children.clone()).unwrap_or_default();
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get_mut(current) else {
                continue;
            };
            // An already stale child has an already stale subtree
            if node.transform.is_dirty() {
                continue;
            }
            node.transform.mark_dirty();
            stack.extend_from_slice(&node.children);
        }
    }

    /// World matrix of `id`, recomposing stale transforms up the parent chain.
    pub fn world_matrix(&mut self, id: NodeId) -> SceneResult<Mat4> {
        let mut chain = Vec::new();
        let mut parent_world = None;
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            let node = self.node(current)?;
            if let Some(world) = node.transform.cached_world() {
                parent_world = Some(*world);
                break;
            }
            chain.push(current);
            cursor = node.transform.parent_link();
        }

        for &current in chain.iter().rev() {
            let transform = &mut self.node_mut(current)?.transform;
            let local = transform.local_matrix();
            let world = parent_world.map_or(local, |parent| parent * local);
            transform.store_world(world);
            parent_world = Some(world);
        }

        parent_world.ok_or(SceneError::UnknownNode(id))
    }

    /// World-space position of `id`
    pub fn world_position(&mut self, id: NodeId) -> SceneResult<Vec3> {
        Ok(translation_of(&self.world_matrix(id)?))
    }

    /// World-space forward (+Z) of `id`
    pub fn forward(&mut self, id: NodeId) -> SceneResult<Vec3> {
        Ok(transform_direction(&self.world_matrix(id)?, &Vec3::z()))
    }

    /// World-space right (+X) of `id`
    pub fn right(&mut self, id: NodeId) -> SceneResult<Vec3> {
        Ok(transform_direction(&self.world_matrix(id)?, &Vec3::x()))
    }

    /// World-space up (+Y) of `id`
    pub fn up(&mut self, id: NodeId) -> SceneResult<Vec3> {
        Ok(transform_direction(&self.world_matrix(id)?, &Vec3::y()))
    }

    /// Resolve every stale world matrix; returns how many were recomputed
    pub fn resolve_all(&mut self) -> usize {
        let mut resolved = 0;
        for root in self.roots.clone() {
            for id in self.collect_subtree(root) {
                let stale = self.nodes.get(id).is_some_and(|n| n.transform.is_dirty());
                if stale && self.world_matrix(id).is_ok() {
                    resolved += 1;
                }
            }
        }
        resolved
    }

    /// Active nodes in traversal order: pre-order from each root, skipping
    /// inactive subtrees. Links each visited child's transform to its parent.
    fn visit_order(&mut self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            let parent = node.parent;
            if parent.is_some() && node.transform.link_parent(parent) {
                self.mark_descendants_dirty(id);
            }

            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if !node.active {
                continue;
            }
            order.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        order
    }

    /// Run every active behavior's `update`.
    pub fn update(&mut self, delta_seconds: f32) -> SceneResult<()> {
        let engine = self.engine.clone();
        for id in self.visit_order() {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            let SceneNode {
                name,
                transform,
                behaviors,
                ..
            } = node;

            behaviors
                .for_each(|behavior, siblings| {
                    behavior.update(&mut UpdateContext {
                        engine: &engine,
                        node: id,
                        delta_seconds,
                        transform,
                        siblings,
                    })
                })
                .map_err(|source| SceneError::Behavior {
                    node: name.clone(),
                    source,
                })?;

            if transform.is_dirty() {
                self.mark_descendants_dirty(id);
            }
        }
        Ok(())
    }

    /// Run every active behavior's `render`, returning the number of nodes visited.
    pub fn render(&mut self, recorder: &mut CommandRecorder<'_>) -> SceneResult<usize> {
        let engine = self.engine.clone();
        let order = self.visit_order();
        for &id in &order {
            let world = self.world_matrix(id)?;
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            let SceneNode { name, behaviors, .. } = node;

            behaviors
                .for_each(|behavior, siblings| {
                    behavior.render(&mut RenderContext {
                        engine: &engine,
                        node: id,
                        world: &world,
                        siblings,
                        recorder: &mut *recorder,
                    })
                })
                .map_err(|source| SceneError::Behavior {
                    node: name.clone(),
                    source,
                })?;
        }
        Ok(order.len())
    }

    /// Destroy every node. The graph is empty afterwards.
    pub fn clean_up(&mut self) {
        for root in self.roots.clone() {
            if let Err(e) = self.destroy_node(root) {
                log::warn!("Failed to destroy root during clean up: {}", e);
            }
        }
        log::info!("Scene graph cleaned up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::compose_trs;
    use crate::scene::behavior::BehaviorResult;
    use crate::test_support::headless_engine;
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    fn graph() -> SceneGraph {
        let (_device, engine) = headless_engine();
        SceneGraph::new(engine)
    }

    type Log = Arc<Mutex<Vec<String>>>;

    struct Probe {
        label: &'static str,
        log: Log,
    }

    impl Behavior for Probe {
        fn update(&mut self, _ctx: &mut UpdateContext<'_>) -> BehaviorResult<()> {
            self.log.lock().unwrap().push(format!("update:{}", self.label));
            Ok(())
        }

        fn render(&mut self, _ctx: &mut RenderContext<'_, '_>) -> BehaviorResult<()> {
            self.log.lock().unwrap().push(format!("render:{}", self.label));
            Ok(())
        }

        fn clean_up(&mut self, _engine: &EngineContext) {
            self.log.lock().unwrap().push(format!("clean_up:{}", self.label));
        }
    }

    fn probe(graph: &mut SceneGraph, id: NodeId, label: &'static str, log: &Log) {
        graph.add_behavior(id, Probe { label, log: log.clone() }).unwrap();
    }

    fn render_pass(graph: &mut SceneGraph) -> usize {
        let mut list = Vec::new();
        let mut recorder = CommandRecorder::new(&mut list);
        graph.render(&mut recorder).unwrap()
    }

    #[test]
    fn child_follows_moved_parent_without_touching_child() {
        let mut graph = graph();
        let a = graph.create_node("A").unwrap();
        let b = graph.create_node("B").unwrap();
        graph.add_child(a, b).unwrap();
        graph.set_position(b, Vec3::new(1.0, 0.0, 0.0)).unwrap();

        assert_relative_eq!(graph.world_position(b).unwrap(), Vec3::new(1.0, 0.0, 0.0));

        graph.set_position(a, Vec3::new(5.0, 0.0, 0.0)).unwrap();
        assert!(graph.transform(b).unwrap().is_dirty());
        assert_relative_eq!(graph.world_position(b).unwrap(), Vec3::new(6.0, 0.0, 0.0));
    }

    /// Small deterministic generator so the property test needs no extra crates
    struct Lcg(u64);

    impl Lcg {
        fn next_f32(&mut self, lo: f32, hi: f32) -> f32 {
            self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
            let unit = (self.0 >> 40) as f32 / (1u64 << 24) as f32;
            lo + unit * (hi - lo)
        }

        fn next_index(&mut self, len: usize) -> usize {
            (self.next_f32(0.0, len as f32) as usize).min(len - 1)
        }

        fn vec3(&mut self, lo: f32, hi: f32) -> Vec3 {
            Vec3::new(self.next_f32(lo, hi), self.next_f32(lo, hi), self.next_f32(lo, hi))
        }
    }

    fn from_scratch(graph: &SceneGraph, id: NodeId) -> Mat4 {
        let mut world = Mat4::identity();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let t = graph.transform(current).unwrap();
            world = compose_trs(&t.position(), &t.rotation(), &t.scale()) * world;
            cursor = graph.parent(current).unwrap();
        }
        world
    }

    #[test]
    fn lazy_world_matrices_match_from_scratch_composition() {
        let mut rng = Lcg(0x5eed);
        for _round in 0..20 {
            let mut graph = graph();
            let ids: Vec<NodeId> = (0..5).map(|i| graph.create_node(format!("n{i}")).unwrap()).collect();
            for pair in ids.windows(2) {
                graph.add_child(pair[0], pair[1]).unwrap();
            }

            for _step in 0..30 {
                let target = ids[rng.next_index(ids.len())];
                match rng.next_index(5) {
                    0 => graph.set_position(target, rng.vec3(-10.0, 10.0)).unwrap(),
                    1 => graph.rotate(target, rng.vec3(-180.0, 180.0)).unwrap(),
                    2 => graph.set_scale(target, rng.vec3(0.5, 2.0)).unwrap(),
                    3 => {
                        // Reparent, ignoring moves that would form a cycle
                        let parent = ids[rng.next_index(ids.len())];
                        let _ = graph.add_child(parent, target);
                    }
                    _ => {
                        // Read some node mid-sequence so parts of the chain are clean
                        let probe = ids[rng.next_index(ids.len())];
                        graph.world_matrix(probe).unwrap();
                    }
                }
            }

            for &id in &ids {
                let lazy = graph.world_matrix(id).unwrap();
                assert_relative_eq!(lazy, from_scratch(&graph, id), epsilon = 1e-3, max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn dirty_node_implies_dirty_descendants() {
        let mut graph = graph();
        let ids: Vec<NodeId> = (0..4).map(|i| graph.create_node(format!("n{i}")).unwrap()).collect();
        for pair in ids.windows(2) {
            graph.add_child(pair[0], pair[1]).unwrap();
        }
        assert_eq!(graph.resolve_all(), 4);
        assert_eq!(graph.resolve_all(), 0);

        graph.translate(ids[1], Vec3::x()).unwrap();
        let dirty: Vec<bool> = ids.iter().map(|&id| graph.transform(id).unwrap().is_dirty()).collect();
        assert_eq!(dirty, vec![false, true, true, true]);

        // Resolving the leaf resolves its stale ancestors on the way
        graph.world_matrix(ids[3]).unwrap();
        assert!(ids.iter().all(|&id| graph.transform(id).unwrap().cached_world().is_some()));
    }

    #[test]
    fn inactive_subtree_is_skipped_even_if_descendants_are_active() {
        let mut graph = graph();
        let log: Log = Arc::default();
        let root = graph.create_node("root").unwrap();
        let mid = graph.create_node("mid").unwrap();
        let leaf = graph.create_node("leaf").unwrap();
        graph.add_child(root, mid).unwrap();
        graph.add_child(mid, leaf).unwrap();
        for (id, label) in [(root, "root"), (mid, "mid"), (leaf, "leaf")] {
            probe(&mut graph, id, label, &log);
        }

        graph.set_active(mid, false).unwrap();
        assert!(graph.node(leaf).unwrap().is_active());
        graph.update(0.016).unwrap();
        assert_eq!(render_pass(&mut graph), 1);
        assert_eq!(*log.lock().unwrap(), vec!["update:root", "render:root"]);

        log.lock().unwrap().clear();
        graph.set_active(mid, true).unwrap();
        graph.update(0.016).unwrap();
        assert_eq!(render_pass(&mut graph), 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["update:root", "update:mid", "update:leaf", "render:root", "render:mid", "render:leaf"]
        );
    }

    #[test]
    fn traversal_is_preorder_across_roots() {
        let mut graph = graph();
        let log: Log = Arc::default();
        let names = ["a", "a1", "a2", "b", "a1x"];
        let ids: Vec<NodeId> = names.iter().map(|n| graph.create_node(*n).unwrap()).collect();
        graph.add_child(ids[0], ids[1]).unwrap();
        graph.add_child(ids[0], ids[2]).unwrap();
        graph.add_child(ids[1], ids[4]).unwrap();
        for (id, label) in ids.iter().zip(names) {
            probe(&mut graph, *id, label, &log);
        }

        render_pass(&mut graph);
        assert_eq!(*log.lock().unwrap(), vec!["render:a", "render:a1", "render:a1x", "render:a2", "render:b"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut graph = graph();
        let first = graph.create_node("player").unwrap();
        assert_eq!(graph.create_node("player"), Err(SceneError::DuplicateName("player".to_string())));
        assert_eq!(graph.find("player"), Some(first));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = graph();
        let a = graph.create_node("a").unwrap();
        let b = graph.create_node("b").unwrap();
        let c = graph.create_node("c").unwrap();
        graph.add_child(a, b).unwrap();
        graph.add_child(b, c).unwrap();

        assert!(matches!(graph.add_child(c, a), Err(SceneError::Cycle { .. })));
        assert!(matches!(graph.add_child(a, a), Err(SceneError::Cycle { .. })));
        assert_eq!(graph.parent(a).unwrap(), None);
        assert_eq!(graph.children(c).unwrap(), &[] as &[NodeId]);
    }

    #[test]
    fn add_child_moves_between_parents_and_repeats_are_noops() {
        let mut graph = graph();
        let p1 = graph.create_node("p1").unwrap();
        let p2 = graph.create_node("p2").unwrap();
        let c = graph.create_node("c").unwrap();

        graph.add_child(p1, c).unwrap();
        graph.add_child(p1, c).unwrap();
        assert_eq!(graph.children(p1).unwrap(), &[c]);
        assert_eq!(graph.roots(), &[p1, p2]);

        graph.resolve_all();
        graph.add_child(p1, c).unwrap();
        assert!(!graph.transform(c).unwrap().is_dirty(), "no-op must not invalidate");

        graph.add_child(p2, c).unwrap();
        assert!(graph.children(p1).unwrap().is_empty());
        assert_eq!(graph.children(p2).unwrap(), &[c]);
        assert_eq!(graph.parent(c).unwrap(), Some(p2));
        assert_eq!(graph.transform(c).unwrap().parent_link(), Some(p2));
        assert_eq!(graph.find_child(p2, "c").unwrap(), Some(c));
    }

    #[test]
    fn remove_child_makes_a_root_and_keeps_the_node() {
        let mut graph = graph();
        let a = graph.create_node("a").unwrap();
        let b = graph.create_node("b").unwrap();
        graph.add_child(a, b).unwrap();
        graph.set_position(a, Vec3::new(3.0, 0.0, 0.0)).unwrap();
        graph.set_position(b, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        assert_relative_eq!(graph.world_position(b).unwrap(), Vec3::new(4.0, 0.0, 0.0));

        graph.remove_child(a, b).unwrap();
        assert!(graph.contains(b));
        assert_eq!(graph.parent(b).unwrap(), None);
        assert!(graph.roots().contains(&b));
        assert_relative_eq!(graph.world_position(b).unwrap(), Vec3::new(1.0, 0.0, 0.0));
        assert!(matches!(graph.remove_child(a, b), Err(SceneError::NotAChild { .. })));
    }

    #[test]
    fn destroy_removes_subtree_and_cleans_up_children_first() {
        let mut graph = graph();
        let log: Log = Arc::default();
        let keep = graph.create_node("keep").unwrap();
        let a = graph.create_node("a").unwrap();
        let b = graph.create_node("b").unwrap();
        graph.add_child(keep, a).unwrap();
        graph.add_child(a, b).unwrap();
        probe(&mut graph, a, "a", &log);
        probe(&mut graph, b, "b", &log);

        assert_eq!(graph.destroy_node(a).unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["clean_up:b", "clean_up:a"]);
        assert!(graph.children(keep).unwrap().is_empty());
        assert_eq!(graph.find("b"), None);
        assert!(graph.create_node("a").is_ok(), "names are freed");
    }

    struct NeedsProbe;

    impl Behavior for NeedsProbe {
        fn initialize(&mut self, ctx: &mut InitContext<'_>) -> BehaviorResult<()> {
            if ctx.siblings.contains::<Probe>() {
                Ok(())
            } else {
                Err(BehaviorError::MissingSibling {
                    behavior: "NeedsProbe",
                    required: "Probe",
                    node: ctx.node_name.to_string(),
                })
            }
        }
    }

    #[test]
    fn failed_initialize_detaches_the_behavior() {
        let mut graph = graph();
        let log: Log = Arc::default();
        let id = graph.create_node("n").unwrap();

        let err = graph.add_behavior(id, NeedsProbe).unwrap_err();
        assert!(matches!(err, SceneError::Behavior { source: BehaviorError::MissingSibling { .. }, .. }));
        assert!(graph.behavior::<NeedsProbe>(id).is_none());

        probe(&mut graph, id, "p", &log);
        graph.add_behavior(id, NeedsProbe).unwrap();
        assert!(matches!(
            graph.add_behavior(id, NeedsProbe),
            Err(SceneError::DuplicateBehavior { .. })
        ));
        assert!(graph.remove_behavior::<Probe>(id).unwrap());
        assert_eq!(*log.lock().unwrap(), vec!["clean_up:p"]);
    }

    struct Spinner;

    impl Behavior for Spinner {
        fn update(&mut self, ctx: &mut UpdateContext<'_>) -> BehaviorResult<()> {
            ctx.transform.translate(Vec3::new(ctx.delta_seconds, 0.0, 0.0));
            Ok(())
        }
    }

    #[test]
    fn transform_changes_made_in_update_reach_children() {
        let mut graph = graph();
        let parent = graph.create_node("parent").unwrap();
        let child = graph.create_node("child").unwrap();
        graph.add_child(parent, child).unwrap();
        graph.add_behavior(parent, Spinner).unwrap();
        graph.resolve_all();

        graph.update(2.0).unwrap();
        assert!(graph.transform(child).unwrap().is_dirty());
        assert_relative_eq!(graph.world_position(child).unwrap(), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn clean_up_empties_the_graph() {
        let mut graph = graph();
        let a = graph.create_node("a").unwrap();
        let b = graph.create_node("b").unwrap();
        graph.add_child(a, b).unwrap();
        graph.create_node("c").unwrap();
        graph.clean_up();
        assert!(graph.is_empty());
        assert!(graph.roots().is_empty());
    }
}
