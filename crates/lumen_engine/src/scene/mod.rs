//! Scene graph of named nodes carrying transforms and behaviors.

pub mod behavior;
pub mod graph;
pub mod node;
pub mod transform;

pub use behavior::{Behavior, BehaviorError, BehaviorResult, BehaviorSet, InitContext, RenderContext, UpdateContext};
pub use graph::{SceneError, SceneGraph, SceneResult};
pub use node::{NodeId, SceneNode};
pub use transform::TransformState;
