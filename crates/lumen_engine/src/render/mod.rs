//! Rendering: the device abstraction, frame pipeline, resource tables and
//! the drawable behaviors.
//!
//! Everything above [`device::GpuDevice`] is backend independent. The
//! [`headless`] device runs the pipeline without a GPU; the Vulkan backend is
//! built with the `vulkan` feature.

pub mod commands;
pub mod descriptor;
pub mod device;
pub mod dispatch;
pub mod frame;
pub mod headless;
pub mod library;
pub mod mesh;
pub mod shader;
pub mod texture;
pub mod vertex;

#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use commands::{CommandRecorder, GpuCommand};
pub use descriptor::{Binding, DescriptorRegistry, DescriptorTable, ResourceLayout, SamplerFilter};
pub use device::{Extent, FenceValue, GpuDevice};
pub use dispatch::{FrameStats, RenderDispatch};
pub use frame::{FrameError, FramePipeline};
pub use mesh::{spawn_textured_mesh, Mesh};
pub use shader::{ShaderBinding, ShaderError, ShaderProgram, ShaderStage, ShaderStages};
pub use texture::{GpuTexture, TextureBinding, TextureError};
pub use vertex::Vertex;
