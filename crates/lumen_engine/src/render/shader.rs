//! Shader programs.
//!
//! A program is loaded stage by stage through the engine's [`ShaderLoader`].
//! Vertex and pixel stages are required; compute, geometry, hull and domain
//! stages are optional and skipped with a warning when they fail to load.
//!
//! [`ShaderLoader`]: crate::assets::ShaderLoader

use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

use super::commands::CommandRecorder;
use super::descriptor::{Binding, DescriptorError, ResourceLayout, SamplerFilter};
use super::device::{BufferHandle, BufferUsage, DeviceError, ProgramDesc, ProgramHandle};
use super::texture::GpuTexture;
use crate::assets::LoadError;
use crate::core::context::EngineContext;
use crate::scene::behavior::Behavior;

/// Programmable pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    /// Vertex stage
    Vertex,
    /// Pixel (fragment) stage
    Pixel,
    /// Compute stage
    Compute,
    /// Geometry stage
    Geometry,
    /// Hull (tessellation control) stage
    Hull,
    /// Domain (tessellation evaluation) stage
    Domain,
}

impl ShaderStage {
    /// Every stage, in load order
    pub const ALL: [ShaderStage; 6] = [
        Self::Vertex,
        Self::Pixel,
        Self::Compute,
        Self::Geometry,
        Self::Hull,
        Self::Domain,
    ];

    /// File name suffix, e.g. `DefaultVertex.spv`
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Vertex => "Vertex",
            Self::Pixel => "Pixel",
            Self::Compute => "Compute",
            Self::Geometry => "Geometry",
            Self::Hull => "Hull",
            Self::Domain => "Domain",
        }
    }

    /// Whether a program cannot exist without this stage
    pub fn is_required(self) -> bool {
        matches!(self, Self::Vertex | Self::Pixel)
    }

    /// The matching flag
    pub fn flag(self) -> ShaderStages {
        match self {
            Self::Vertex => ShaderStages::VERTEX,
            Self::Pixel => ShaderStages::PIXEL,
            Self::Compute => ShaderStages::COMPUTE,
            Self::Geometry => ShaderStages::GEOMETRY,
            Self::Hull => ShaderStages::HULL,
            Self::Domain => ShaderStages::DOMAIN,
        }
    }
}

bitflags! {
    /// Set of stages present in a program
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStages: u8 {
        /// Vertex
        const VERTEX = 1 << 0;
        /// Pixel
        const PIXEL = 1 << 1;
        /// Compute
        const COMPUTE = 1 << 2;
        /// Geometry
        const GEOMETRY = 1 << 3;
        /// Hull
        const HULL = 1 << 4;
        /// Domain
        const DOMAIN = 1 << 5;
    }
}

/// Shader errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShaderError {
    /// Vertex or pixel bytecode does not exist
    #[error("shader '{shader}' has no {stage:?} stage")]
    RequiredStageMissing {
        /// Shader name
        shader: String,
        /// Missing stage
        stage: ShaderStage,
    },

    /// Vertex or pixel bytecode exists but could not be loaded
    #[error("shader '{shader}' {stage:?} stage failed to load: {source}")]
    RequiredStageFailed {
        /// Shader name
        shader: String,
        /// Failing stage
        stage: ShaderStage,
        /// Loader error
        source: LoadError,
    },

    /// No program registered under this name
    #[error("no shader named '{0}'")]
    NotFound(String),

    /// Constant buffer index beyond the layout
    #[error("shader '{shader}' has {count} constant buffers, index {index} requested")]
    ConstantBufferOutOfRange {
        /// Shader name
        shader: String,
        /// Requested index
        index: usize,
        /// Declared count
        count: usize,
    },

    /// Device failure
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Resource table failure
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Shader result alias
pub type ShaderResult<T> = Result<T, ShaderError>;

/// A linked program with its resource table and constant buffers
#[derive(Debug)]
pub struct ShaderProgram {
    name: String,
    handle: ProgramHandle,
    stages: ShaderStages,
    layout: ResourceLayout,
    constant_buffers: Vec<BufferHandle>,
}

impl ShaderProgram {
    /// Load every stage of `local_path` from `domain` and link them.
    pub fn load(
        engine: &EngineContext,
        name: &str,
        local_path: &str,
        domain: &str,
        layout: ResourceLayout,
    ) -> ShaderResult<Self> {
        let mut loaded = Vec::new();
        let mut stages = ShaderStages::empty();

        for stage in ShaderStage::ALL {
            match engine.shader_loader().load(local_path, domain, stage) {
                Ok(Some(words)) => {
                    stages |= stage.flag();
                    loaded.push((stage, words));
                }
                Ok(None) if stage.is_required() => {
                    return Err(ShaderError::RequiredStageMissing {
                        shader: name.to_string(),
                        stage,
                    });
                }
                Ok(None) => {}
                Err(source) if stage.is_required() => {
                    return Err(ShaderError::RequiredStageFailed {
                        shader: name.to_string(),
                        stage,
                        source,
                    });
                }
                Err(e) => log::warn!("Skipping {:?} stage of shader '{}': {}", stage, name, e),
            }
        }

        let device = engine.device();
        let handle = device.create_program(&ProgramDesc {
            name,
            stages: &loaded,
            layout: &layout,
        })?;

        let mut program = Self {
            name: name.to_string(),
            handle,
            stages,
            layout,
            constant_buffers: Vec::new(),
        };
        if let Err(e) = program.create_resources(engine) {
            program.release(engine);
            return Err(e);
        }

        log::info!("Loaded shader '{}' with stages {:?}", name, stages);
        Ok(program)
    }

    fn create_resources(&mut self, engine: &EngineContext) -> ShaderResult<()> {
        engine.descriptors().register(self.handle, self.layout.clone())?;

        for (index, &size) in self.layout.constant_buffers.iter().enumerate() {
            let buffer = engine
                .device()
                .create_buffer(BufferUsage::Constant, &vec![0u8; size as usize])?;
            self.constant_buffers.push(buffer);
            engine
                .descriptors()
                .bind(self.handle, index as u32, Binding::ConstantBuffer(buffer))?;
        }
        Ok(())
    }

    /// Name the program was registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device handle
    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    /// Stages the program was linked from
    pub fn stages(&self) -> ShaderStages {
        self.stages
    }

    /// Resource layout
    pub fn layout(&self) -> &ResourceLayout {
        &self.layout
    }

    /// Write `bytes` to the start of constant buffer `index`
    pub fn update_constant_buffer(&self, engine: &EngineContext, index: usize, bytes: &[u8]) -> ShaderResult<()> {
        let buffer = self
            .constant_buffers
            .get(index)
            .ok_or_else(|| ShaderError::ConstantBufferOutOfRange {
                shader: self.name.clone(),
                index,
                count: self.constant_buffers.len(),
            })?;
        engine.device().write_buffer(*buffer, bytes)?;
        Ok(())
    }

    /// Put `texture` and a sampler into resource slot `index`
    pub fn bind_texture(
        &self,
        engine: &EngineContext,
        index: u32,
        texture: &GpuTexture,
        filter: SamplerFilter,
    ) -> ShaderResult<()> {
        let mut descriptors = engine.descriptors();
        descriptors.bind(self.handle, index, Binding::ShaderResource(texture.handle()))?;
        descriptors.bind(self.handle, index, Binding::Sampler(filter))?;
        Ok(())
    }

    /// Record binding the program and a snapshot of its resource table
    pub fn record_bind(&self, engine: &EngineContext, recorder: &mut CommandRecorder<'_>) -> ShaderResult<()> {
        let table = engine.descriptors().table(self.handle)?.clone();
        recorder.bind_program(self.handle);
        recorder.bind_descriptors(self.handle, table);
        Ok(())
    }

    /// Destroy the program, its constant buffers and its resource table
    pub fn release(&self, engine: &EngineContext) {
        let device = engine.device();
        for &buffer in &self.constant_buffers {
            device.destroy_buffer(buffer);
        }
        engine.descriptors().release(self.handle);
        device.destroy_program(self.handle);
        log::debug!("Released shader '{}'", self.name);
    }
}

/// Attaches a shared program to a node
#[derive(Debug, Clone)]
pub struct ShaderBinding {
    program: Arc<ShaderProgram>,
}

impl ShaderBinding {
    /// Bind `program`
    pub fn new(program: Arc<ShaderProgram>) -> Self {
        Self { program }
    }

    /// Bound program
    pub fn program(&self) -> &Arc<ShaderProgram> {
        &self.program
    }
}

impl Behavior for ShaderBinding {
    fn kind_name(&self) -> &'static str {
        "ShaderBinding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::loader::SPIRV_MAGIC;
    use crate::assets::{ImageData, MemoryShaderLoader};
    use crate::render::commands::GpuCommand;
    use crate::render::device::{DeviceStatus, GpuDevice};
    use crate::test_support::engine_with_shaders;

    fn words() -> Vec<u32> {
        vec![SPIRV_MAGIC, 0x0001_0000]
    }

    fn loader() -> MemoryShaderLoader {
        MemoryShaderLoader::new()
            .with_stage("lumen", "Shader/Default", ShaderStage::Vertex, words())
            .with_stage("lumen", "Shader/Default", ShaderStage::Pixel, words())
    }

    #[test]
    fn stage_suffixes_match_file_names() {
        assert_eq!(ShaderStage::Vertex.suffix(), "Vertex");
        assert_eq!(ShaderStage::Pixel.suffix(), "Pixel");
        assert_eq!(ShaderStage::ALL.iter().filter(|s| s.is_required()).count(), 2);
    }

    #[test]
    fn loads_required_stages_and_registers_resources() {
        let (device, engine) = engine_with_shaders(loader());
        let layout = ResourceLayout::textured().with_constant_buffer(16);
        let program = ShaderProgram::load(&engine, "default", "Shader/Default", "lumen", layout).unwrap();

        assert_eq!(program.stages(), ShaderStages::VERTEX | ShaderStages::PIXEL);
        let table = engine.descriptors().table(program.handle()).unwrap().clone();
        assert_eq!(table.slots().len(), 3);
        assert!(matches!(table.get(0), Some(Binding::ConstantBuffer(_))));
        assert_eq!(device.live_resources(), (1, 1, 0));

        program.update_constant_buffer(&engine, 0, &[1, 2, 3, 4]).unwrap();
        assert!(matches!(
            program.update_constant_buffer(&engine, 1, &[0]),
            Err(ShaderError::ConstantBufferOutOfRange { count: 1, .. })
        ));

        program.release(&engine);
        assert_eq!(device.live_resources(), (0, 0, 0));
        assert!(engine.descriptors().is_empty());
    }

    #[test]
    fn missing_pixel_stage_is_fatal() {
        let loader = MemoryShaderLoader::new().with_stage("lumen", "Shader/Default", ShaderStage::Vertex, words());
        let (_device, engine) = engine_with_shaders(loader);
        let err = ShaderProgram::load(&engine, "default", "Shader/Default", "lumen", ResourceLayout::textured())
            .unwrap_err();
        assert_eq!(
            err,
            ShaderError::RequiredStageMissing {
                shader: "default".to_string(),
                stage: ShaderStage::Pixel,
            }
        );
    }

    #[test]
    fn failing_optional_stage_is_skipped() {
        let failure = LoadError::InvalidBytecode {
            path: "DefaultGeometry.spv".to_string(),
            reason: "bad magic".to_string(),
        };
        let loader = loader().with_failure("lumen", "Shader/Default", ShaderStage::Geometry, failure.clone());
        let (_device, engine) = engine_with_shaders(loader);
        let program =
            ShaderProgram::load(&engine, "default", "Shader/Default", "lumen", ResourceLayout::textured()).unwrap();
        assert!(!program.stages().contains(ShaderStages::GEOMETRY));

        let loader = loader_with_bad_vertex(failure);
        let (_device, engine) = engine_with_shaders(loader);
        assert!(matches!(
            ShaderProgram::load(&engine, "default", "Shader/Default", "lumen", ResourceLayout::textured()),
            Err(ShaderError::RequiredStageFailed { stage: ShaderStage::Vertex, .. })
        ));
    }

    fn loader_with_bad_vertex(failure: LoadError) -> MemoryShaderLoader {
        loader().with_failure("lumen", "Shader/Default", ShaderStage::Vertex, failure)
    }

    #[test]
    fn record_bind_snapshots_the_table() {
        let (device, engine) = engine_with_shaders(loader());
        let program =
            ShaderProgram::load(&engine, "default", "Shader/Default", "lumen", ResourceLayout::textured()).unwrap();
        let texture = GpuTexture::from_image(
            engine.device().as_ref(),
            "white",
            &ImageData::solid_color(2, 2, [255; 4]),
        )
        .unwrap();
        program
            .bind_texture(&engine, 0, &texture, SamplerFilter::Nearest)
            .unwrap();

        let mut list = Vec::new();
        let mut recorder = CommandRecorder::new(&mut list);
        program.record_bind(&engine, &mut recorder).unwrap();
        drop(recorder);

        assert_eq!(list[0], GpuCommand::BindProgram(program.handle()));
        let GpuCommand::BindDescriptors { table, .. } = &list[1] else {
            panic!("expected descriptor bind, got {:?}", list[1]);
        };
        assert!(table.is_complete());
        assert_eq!(table.get(1), Some(Binding::Sampler(SamplerFilter::Nearest)));
        assert_eq!(device.status(), DeviceStatus::Ready);
    }
}
