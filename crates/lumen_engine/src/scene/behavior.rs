//! Behaviors: per-node units of functionality.
//!
//! A behavior opts into any of four hooks. `initialize` runs once when the
//! behavior is attached, `update` and `render` run during the matching scene
//! traversal, `clean_up` runs when the node is destroyed. Each hook sees the
//! node's other behaviors as read-only siblings; the running behavior is
//! taken out of the set for the duration of the call.

use std::any::{type_name, Any, TypeId};

use thiserror::Error;

use super::node::NodeId;
use super::transform::TransformState;
use crate::assets::LoadError;
use crate::core::context::EngineContext;
use crate::foundation::math::Mat4;
use crate::render::commands::CommandRecorder;
use crate::render::descriptor::DescriptorError;
use crate::render::device::DeviceError;
use crate::render::shader::ShaderError;
use crate::render::texture::TextureError;

/// Behavior errors. Raised during initialization they are configuration
/// errors and abort startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BehaviorError {
    /// A behavior needs another kind attached to the same node
    #[error("{behavior} on node '{node}' requires a {required} on the same node")]
    MissingSibling {
        /// Behavior that failed
        behavior: &'static str,
        /// Kind it needs
        required: &'static str,
        /// Node name
        node: String,
    },

    /// Hook called before `initialize` completed
    #[error("{0} used before initialization")]
    NotInitialized(&'static str),

    /// Vertex or index data cannot be drawn
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Shader failure
    #[error(transparent)]
    Shader(#[from] ShaderError),

    /// Texture failure
    #[error(transparent)]
    Texture(#[from] TextureError),

    /// Asset loading failure
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Device failure
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Resource table failure
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Behavior result alias
pub type BehaviorResult<T> = Result<T, BehaviorError>;

/// Upcast helper so boxed behaviors can be downcast by kind
pub trait AsAny: Any {
    /// `self` as `&dyn Any`
    fn as_any(&self) -> &dyn Any;
    /// `self` as `&mut dyn Any`
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Passed to [`Behavior::initialize`]
pub struct InitContext<'a> {
    /// Engine services
    pub engine: &'a EngineContext,
    /// Owning node
    pub node: NodeId,
    /// Owning node's name
    pub node_name: &'a str,
    /// Other behaviors on the node
    pub siblings: &'a BehaviorSet,
}

/// Passed to [`Behavior::update`]
pub struct UpdateContext<'a> {
    /// Engine services
    pub engine: &'a EngineContext,
    /// Owning node
    pub node: NodeId,
    /// Seconds since the previous update
    pub delta_seconds: f32,
    /// Owning node's transform; changes propagate to the subtree after the hook
    pub transform: &'a mut TransformState,
    /// Other behaviors on the node
    pub siblings: &'a BehaviorSet,
}

/// Passed to [`Behavior::render`]
pub struct RenderContext<'a, 'r> {
    /// Engine services
    pub engine: &'a EngineContext,
    /// Owning node
    pub node: NodeId,
    /// Owning node's resolved world matrix
    pub world: &'a Mat4,
    /// Other behaviors on the node
    pub siblings: &'a BehaviorSet,
    /// Command list of the open frame slot
    pub recorder: &'a mut CommandRecorder<'r>,
}

/// Per-node functionality driven by the scene graph
pub trait Behavior: AsAny + Send {
    /// Human readable kind, used in diagnostics
    fn kind_name(&self) -> &'static str {
        type_name::<Self>()
    }

    /// One-time setup when attached to a node
    fn initialize(&mut self, _ctx: &mut InitContext<'_>) -> BehaviorResult<()> {
        Ok(())
    }

    /// Per-tick logic
    fn update(&mut self, _ctx: &mut UpdateContext<'_>) -> BehaviorResult<()> {
        Ok(())
    }

    /// Record draw commands
    fn render(&mut self, _ctx: &mut RenderContext<'_, '_>) -> BehaviorResult<()> {
        Ok(())
    }

    /// Release resources when the node is destroyed
    fn clean_up(&mut self, _engine: &EngineContext) {}
}

struct Entry {
    kind: TypeId,
    name: &'static str,
    behavior: Option<Box<dyn Behavior>>,
}

/// Behaviors of one node, at most one per kind, in attach order
#[derive(Default)]
pub struct BehaviorSet {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for BehaviorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|e| e.name)).finish()
    }
}

impl BehaviorSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attached behaviors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is attached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a `T` is attached
    pub fn contains<T: Behavior>(&self) -> bool {
        self.index_of(TypeId::of::<T>()).is_some()
    }

    /// Attached `T`, if any. A behavior whose hook is running is not visible.
    pub fn get<T: Behavior>(&self) -> Option<&T> {
        let index = self.index_of(TypeId::of::<T>())?;
        self.entries[index]
            .behavior
            .as_deref()
            .and_then(|b| b.as_any().downcast_ref::<T>())
    }

    /// Mutable access to an attached `T`
    pub fn get_mut<T: Behavior>(&mut self) -> Option<&mut T> {
        let index = self.index_of(TypeId::of::<T>())?;
        self.entries[index]
            .behavior
            .as_deref_mut()
            .and_then(|b| b.as_any_mut().downcast_mut::<T>())
    }

    /// Kind names in attach order
    pub fn kind_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.name)
    }

    fn index_of(&self, kind: TypeId) -> Option<usize> {
        self.entries.iter().position(|e| e.kind == kind)
    }

    /// Append `behavior`; returns it back if its kind is already attached
    pub(crate) fn insert<T: Behavior>(&mut self, behavior: T) -> Result<usize, T> {
        if self.contains::<T>() {
            return Err(behavior);
        }
        self.entries.push(Entry {
            kind: TypeId::of::<T>(),
            name: type_name::<T>(),
            behavior: Some(Box::new(behavior)),
        });
        Ok(self.entries.len() - 1)
    }

    /// Detach the `T`, if any
    pub(crate) fn remove<T: Behavior>(&mut self) -> Option<Box<dyn Behavior>> {
        let index = self.index_of(TypeId::of::<T>())?;
        self.entries.remove(index).behavior
    }

    /// Remove the entry at `index` entirely
    pub(crate) fn remove_at(&mut self, index: usize) {
        if index < self.entries.len() {
            self.entries.remove(index);
        }
    }

    /// Take the behavior at `index` out so it can see its siblings
    pub(crate) fn take(&mut self, index: usize) -> Option<Box<dyn Behavior>> {
        self.entries.get_mut(index).and_then(|e| e.behavior.take())
    }

    /// Put a taken behavior back
    pub(crate) fn restore(&mut self, index: usize, behavior: Box<dyn Behavior>) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.behavior = Some(behavior);
        }
    }

    /// Run `hook` on every behavior in attach order, each seeing the rest as siblings.
    ///
    /// Stops at the first error.
    pub(crate) fn for_each<E>(
        &mut self,
        mut hook: impl FnMut(&mut dyn Behavior, &BehaviorSet) -> Result<(), E>,
    ) -> Result<(), E> {
        for index in 0..self.entries.len() {
            let Some(mut behavior) = self.take(index) else {
                continue;
            };
            let result = hook(behavior.as_mut(), self);
            self.restore(index, behavior);
            result?;
        }
        Ok(())
    }

    /// Clean up and drop every behavior
    pub(crate) fn clean_up_all(&mut self, engine: &EngineContext) {
        for entry in self.entries.iter_mut().rev() {
            if let Some(behavior) = entry.behavior.as_mut() {
                log::trace!("Cleaning up {}", entry.name);
                behavior.clean_up(engine);
            }
        }
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker(u32);
    impl Behavior for Marker {}

    struct Other;
    impl Behavior for Other {}

    #[test]
    fn one_behavior_per_kind() {
        let mut set = BehaviorSet::new();
        assert!(set.insert(Marker(1)).is_ok());
        assert!(set.insert(Marker(2)).is_err());
        assert!(set.insert(Other).is_ok());
        assert_eq!(set.len(), 2);
        assert_eq!(set.get::<Marker>().map(|m| m.0), Some(1));
    }

    #[test]
    fn running_behavior_is_hidden_from_siblings() {
        let mut set = BehaviorSet::new();
        set.insert(Marker(7)).ok();
        set.insert(Other).ok();

        let mut seen = Vec::new();
        set.for_each(|behavior, siblings| {
            seen.push((
                (*behavior).as_any().is::<Marker>(),
                siblings.contains::<Marker>(),
                siblings.get::<Marker>().is_some(),
            ));
            Ok::<(), ()>(())
        })
        .unwrap();

        // Marker is taken while it runs, visible while Other runs
        assert_eq!(seen, vec![(true, true, false), (false, true, true)]);
        assert!(set.get::<Marker>().is_some());
    }

    #[test]
    fn remove_detaches_by_kind() {
        let mut set = BehaviorSet::new();
        set.insert(Marker(1)).ok();
        assert!(set.remove::<Marker>().is_some());
        assert!(set.remove::<Marker>().is_none());
        assert!(set.is_empty());
    }
}
