//! Scene nodes stored in the graph's arena.

use slotmap::new_key_type;

use super::behavior::BehaviorSet;
use super::transform::TransformState;

new_key_type! {
    /// Handle to a node in a [`SceneGraph`](super::SceneGraph)
    pub struct NodeId;
}

/// A named node with a transform, behaviors and links into the hierarchy
#[derive(Debug)]
pub struct SceneNode {
    pub(crate) name: String,
    pub(crate) active: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) transform: TransformState,
    pub(crate) behaviors: BehaviorSet,
}

impl SceneNode {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            active: true,
            parent: None,
            children: Vec::new(),
            transform: TransformState::new(),
            behaviors: BehaviorSet::new(),
        }
    }

    /// Registered name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether update and render visit this node
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Parent node, `None` for roots
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in insertion order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The node's transform
    pub fn transform(&self) -> &TransformState {
        &self.transform
    }

    /// Attached behaviors
    pub fn behaviors(&self) -> &BehaviorSet {
        &self.behaviors
    }

    /// Mutable access to attached behaviors
    pub fn behaviors_mut(&mut self) -> &mut BehaviorSet {
        &mut self.behaviors
    }
}
