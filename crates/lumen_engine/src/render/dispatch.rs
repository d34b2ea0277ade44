//! Render dispatch: one frame through the pipeline and the scene.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use super::device::{Extent, FenceValue, GpuDevice};
use super::frame::{FrameError, FramePipeline, SlotIndex};
use crate::core::config::RendererConfig;
use crate::scene::graph::{SceneError, SceneGraph};

/// Dispatch errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Frame pipeline failure
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A behavior failed while recording
    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Dispatch result alias
pub type DispatchResult<T> = Result<T, DispatchError>;

/// What a finished frame did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// Slot the frame was recorded in
    pub slot: SlotIndex,
    /// Fence value signaled by the frame
    pub fence: FenceValue,
    /// Scene nodes visited
    pub nodes: usize,
    /// World matrices recomputed before recording
    pub resolved: usize,
}

/// Drives the frame pipeline with the scene graph
#[derive(Debug)]
pub struct RenderDispatch {
    pipeline: FramePipeline,
}

impl RenderDispatch {
    /// Dispatch over a new pipeline for `device`
    pub fn new(device: Arc<dyn GpuDevice>, config: &RendererConfig) -> DispatchResult<Self> {
        Ok(Self {
            pipeline: FramePipeline::new(device, config)?,
        })
    }

    /// The underlying pipeline
    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    /// Record, submit and present one frame of `scene`.
    ///
    /// The scene lock is held from world resolution until recording ends.
    pub fn tick(&mut self, scene: &Mutex<SceneGraph>) -> DispatchResult<FrameStats> {
        let slot = self.pipeline.acquire_slot()?;
        self.pipeline.open_recording(slot)?;

        let (resolved, nodes) = {
            let mut scene = scene.lock().unwrap_or_else(PoisonError::into_inner);
            let resolved = scene.resolve_all();
            let mut recorder = self.pipeline.recorder(slot)?;
            (resolved, scene.render(&mut recorder)?)
        };

        let fence = self.pipeline.close_and_submit(slot)?;
        self.pipeline.present()?;

        log::trace!("Frame {} in slot {}: {} nodes, {} resolved", fence, slot, nodes, resolved);
        Ok(FrameStats {
            slot,
            fence,
            nodes,
            resolved,
        })
    }

    /// Rebuild the surface at `extent`; zero-area sizes are ignored
    pub fn resize(&mut self, extent: Extent) -> DispatchResult<bool> {
        Ok(self.pipeline.resize(extent)?)
    }

    /// Drain and release the pipeline
    pub fn clean_up(&mut self) -> DispatchResult<()> {
        Ok(self.pipeline.clean_up()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RendererConfig;
    use crate::foundation::math::Vec3;
    use crate::render::descriptor::ResourceLayout;
    use crate::render::headless::{DeviceEvent, HeadlessDevice};
    use crate::render::mesh::{spawn_textured_mesh, Mesh};
    use crate::test_support::headless_engine;

    fn setup() -> (Arc<HeadlessDevice>, RenderDispatch, Mutex<SceneGraph>) {
        let (device, engine) = headless_engine();
        let shader = engine
            .load_shader("default", "Shader/Default", ResourceLayout::textured())
            .unwrap();
        let texture = engine.load_texture("test", "Texture/Test").unwrap();

        let mut scene = SceneGraph::new(engine.clone());
        spawn_textured_mesh(&mut scene, "quad", shader, texture, Mesh::quad()).unwrap();
        let dispatch = RenderDispatch::new(engine.device().clone(), &RendererConfig::default()).unwrap();
        (device, dispatch, Mutex::new(scene))
    }

    #[test]
    fn tick_submits_one_draw_per_mesh_and_alternates_slots() {
        let (device, mut dispatch, scene) = setup();

        let first = dispatch.tick(&scene).unwrap();
        let second = dispatch.tick(&scene).unwrap();
        let third = dispatch.tick(&scene).unwrap();

        assert_eq!([first.slot, second.slot, third.slot], [0, 1, 0]);
        assert_eq!([first.fence, second.fence, third.fence], [1, 2, 3]);
        assert_eq!(first.resolved, 1);
        assert_eq!(second.resolved, 0);

        let draws: Vec<usize> = device
            .events()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Submitted { draws, .. } => Some(*draws),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![1, 1, 1]);
        assert_eq!(device.protocol_violations(), 0);
    }

    #[test]
    fn scene_changes_are_resolved_before_recording() {
        let (device, mut dispatch, scene) = setup();
        dispatch.tick(&scene).unwrap();

        {
            let mut scene = scene.lock().unwrap();
            let quad = scene.find("quad").unwrap();
            scene.set_position(quad, Vec3::new(2.0, 0.0, 0.0)).unwrap();
        }
        let stats = dispatch.tick(&scene).unwrap();
        assert_eq!(stats.resolved, 1);

        let submission = device.last_submission().unwrap();
        let pushed = submission.commands.iter().find_map(|c| match c {
            crate::render::commands::GpuCommand::PushTransform(m) => Some(*m),
            _ => None,
        });
        assert_eq!(pushed.map(|m| m[12]), Some(2.0));
    }

    #[test]
    fn device_loss_surfaces_as_frame_error() {
        let (device, mut dispatch, scene) = setup();
        device.simulate_device_loss("driver reset");
        assert!(matches!(
            dispatch.tick(&scene),
            Err(DispatchError::Frame(FrameError::DeviceLost(_)))
        ));
    }

    #[test]
    fn zero_area_resize_is_ignored() {
        let (_device, mut dispatch, scene) = setup();
        dispatch.tick(&scene).unwrap();
        assert!(!dispatch.resize(Extent::new(0, 300)).unwrap());
        assert!(dispatch.resize(Extent::new(800, 600)).unwrap());
        assert_eq!(dispatch.pipeline().extent(), Extent::new(800, 600));
        dispatch.tick(&scene).unwrap();
        dispatch.clean_up().unwrap();
    }
}
