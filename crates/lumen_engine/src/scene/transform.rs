//! Per-node transform with a lazily resolved world matrix.
//!
//! Local setters only flag the cached world matrix as stale; the scene graph
//! resolves it on the next read. While the flag is set, [`TransformState::cached_world`]
//! returns `None` rather than a stale value.

use super::node::NodeId;
use crate::foundation::math::{compose_trs, transform_direction, wrap_degrees, Mat4, Vec3};

/// Local position, rotation and scale plus the cached world matrix
#[derive(Debug, Clone, PartialEq)]
pub struct TransformState {
    position: Vec3,
    rotation: Vec3,
    scale: Vec3,
    world: Mat4,
    dirty: bool,
    parent: Option<NodeId>,
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Vec3::zeros(),
            scale: Vec3::new(1.0, 1.0, 1.0),
            world: Mat4::identity(),
            dirty: true,
            parent: None,
        }
    }
}

impl TransformState {
    /// Identity transform, not yet resolved
    pub fn new() -> Self {
        Self::default()
    }

    /// Local position
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Local rotation, Euler degrees in `[0, 360)` (pitch, yaw, roll)
    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    /// Local scale
    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    /// Set local position
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty = true;
    }

    /// Set local rotation in degrees, wrapped into `[0, 360)`
    pub fn set_rotation(&mut self, degrees: Vec3) {
        self.rotation = degrees.map(wrap_degrees);
        self.dirty = true;
    }

    /// Set local scale
    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.dirty = true;
    }

    /// Move by `delta` in parent space
    pub fn translate(&mut self, delta: Vec3) {
        self.set_position(self.position + delta);
    }

    /// Add `delta` degrees to each angle
    pub fn rotate(&mut self, delta: Vec3) {
        self.set_rotation(self.rotation + delta);
    }

    /// Multiply the scale component-wise
    pub fn scale_by(&mut self, factor: Vec3) {
        self.set_scale(self.scale.component_mul(&factor));
    }

    /// Local matrix: scale, then rotate, then translate
    pub fn local_matrix(&self) -> Mat4 {
        compose_trs(&self.position, &self.rotation, &self.scale)
    }

    /// True when the world matrix must be recomputed
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flag the world matrix as stale
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// World matrix, `None` until resolved
    pub fn cached_world(&self) -> Option<&Mat4> {
        (!self.dirty).then_some(&self.world)
    }

    /// Node whose transform this one is composed with
    pub fn parent_link(&self) -> Option<NodeId> {
        self.parent
    }

    /// Point this transform at a parent's; marks dirty when the link changes
    pub(crate) fn link_parent(&mut self, parent: Option<NodeId>) -> bool {
        if self.parent == parent {
            return false;
        }
        self.parent = parent;
        self.dirty = true;
        true
    }

    /// Store a freshly composed world matrix
    pub(crate) fn store_world(&mut self, world: Mat4) {
        self.world = world;
        self.dirty = false;
    }

    /// World-space forward (+Z) direction, `None` until resolved
    pub fn forward(&self) -> Option<Vec3> {
        self.cached_world().map(|w| transform_direction(w, &Vec3::z()))
    }

    /// World-space right (+X) direction, `None` until resolved
    pub fn right(&self) -> Option<Vec3> {
        self.cached_world().map(|w| transform_direction(w, &Vec3::x()))
    }

    /// World-space up (+Y) direction, `None` until resolved
    pub fn up(&self) -> Option<Vec3> {
        self.cached_world().map(|w| transform_direction(w, &Vec3::y()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn starts_dirty_and_hides_cached_world() {
        let t = TransformState::new();
        assert!(t.is_dirty());
        assert!(t.cached_world().is_none());
        assert!(t.forward().is_none());
    }

    #[test]
    fn mutations_mark_dirty() {
        let mut t = TransformState::new();
        t.store_world(Mat4::identity());
        assert!(!t.is_dirty());

        t.translate(Vec3::new(1.0, 0.0, 0.0));
        assert!(t.is_dirty());
        t.store_world(t.local_matrix());
        t.scale_by(Vec3::new(2.0, 2.0, 2.0));
        assert!(t.is_dirty());
        assert_relative_eq!(t.scale(), Vec3::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn rotate_wraps_angles() {
        let mut t = TransformState::new();
        t.rotate(Vec3::new(350.0, -30.0, 720.0));
        t.rotate(Vec3::new(20.0, 0.0, 0.0));
        assert_relative_eq!(t.rotation(), Vec3::new(10.0, 330.0, 0.0), epsilon = 1e-3);
    }

    #[test]
    fn direction_vectors_follow_rotation() {
        let mut t = TransformState::new();
        t.set_rotation(Vec3::new(0.0, 90.0, 0.0));
        t.store_world(t.local_matrix());
        assert_relative_eq!(t.forward().unwrap(), Vec3::x(), epsilon = 1e-6);
        assert_relative_eq!(t.right().unwrap(), -Vec3::z(), epsilon = 1e-6);
        assert_relative_eq!(t.up().unwrap(), Vec3::y(), epsilon = 1e-6);
    }

    #[test]
    fn relinking_same_parent_keeps_cache() {
        let mut t = TransformState::new();
        t.store_world(Mat4::identity());
        assert!(!t.link_parent(None));
        assert!(!t.is_dirty());
    }
}
