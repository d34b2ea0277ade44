//! The graphics device seam.
//!
//! [`GpuDevice`] is everything the frame pipeline and the GPU-bound
//! behaviors need from hardware: a presentation surface with rotating
//! targets, a queue that executes recorded command lists, a monotonic fence
//! and resource creation. The Vulkan backend and the headless device both
//! implement it.

use thiserror::Error;

use super::commands::GpuCommand;
use super::descriptor::ResourceLayout;
use super::shader::ShaderStage;
use crate::assets::ImageData;

/// Fence counter value. Zero means "nothing submitted yet".
pub type FenceValue = u64;

/// Surface size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Extent {
    /// New extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True for a minimized window
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

gpu_handle!(
    /// Linked GPU program
    ProgramHandle
);
gpu_handle!(
    /// GPU buffer
    BufferHandle
);
gpu_handle!(
    /// Sampled GPU image
    TextureHandle
);

/// What a buffer is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex data
    Vertex,
    /// 32-bit indices
    Index,
    /// Shader constants, host writable
    Constant,
}

/// Device health
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Device usable
    Ready,
    /// Device was reset or removed
    Lost(String),
}

/// Everything needed to build a program
#[derive(Debug, Clone)]
pub struct ProgramDesc<'a> {
    /// Debug name
    pub name: &'a str,
    /// Bytecode per present stage
    pub stages: &'a [(ShaderStage, Vec<u32>)],
    /// Resource tables the program reads
    pub layout: &'a ResourceLayout,
}

/// One closed command list handed to the queue
#[derive(Debug, Clone)]
pub struct Submission {
    /// Frame slot the commands were recorded in
    pub slot: usize,
    /// Presentation target written by the commands
    pub target: u32,
    /// Recorded commands
    pub commands: Vec<GpuCommand>,
    /// Fence value the queue signals once the commands finished
    pub signal: FenceValue,
}

/// Device errors. All of them are fatal to the frame loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device was reset or removed
    #[error("device lost: {0}")]
    Lost(String),

    /// A native API call failed
    #[error("{operation} failed: {reason}")]
    Api {
        /// Which call failed
        operation: &'static str,
        /// Native error text
        reason: String,
    },

    /// Device or surface creation failed
    #[error("device initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory type satisfies the requested properties
    #[error("no suitable memory type")]
    NoSuitableMemoryType,

    /// Handle does not name a live resource
    #[error("unknown {kind} handle {id}")]
    UnknownHandle {
        /// Resource kind
        kind: &'static str,
        /// Raw handle value
        id: u64,
    },

    /// The surface's target count no longer matches the frame slots
    #[error("surface now has {actual} targets, expected {expected}")]
    TargetCountChanged {
        /// Slots allocated at startup
        expected: usize,
        /// Targets after recreation
        actual: usize,
    },
}

impl DeviceError {
    /// Shorthand for a failed native call
    pub fn api(operation: &'static str, reason: impl ToString) -> Self {
        Self::Api {
            operation,
            reason: reason.to_string(),
        }
    }
}

/// Device result alias
pub type DeviceResult<T> = Result<T, DeviceError>;

/// A hardware (or simulated) graphics device with a presentation surface.
pub trait GpuDevice: Send + Sync {
    /// Current health
    fn status(&self) -> DeviceStatus;

    /// Current surface size
    fn surface_extent(&self) -> Extent;

    /// Number of rotating presentation targets
    fn target_count(&self) -> usize;

    /// Index of the target the next frame renders into
    fn acquire_target(&self) -> DeviceResult<u32>;

    /// Queue a closed command list; the fence reaches `signal` when it finishes
    fn submit(&self, submission: Submission) -> DeviceResult<()>;

    /// Highest fence value the device has completed
    fn completed_value(&self) -> FenceValue;

    /// Block until the fence reaches `value`
    fn wait_for_value(&self, value: FenceValue) -> DeviceResult<()>;

    /// Display a finished target
    fn present(&self, target: u32) -> DeviceResult<()>;

    /// Drop every surface-backed resource
    fn release_targets(&self) -> DeviceResult<()>;

    /// Rebuild surface resources at `extent`, returning the new target count
    fn recreate_targets(&self, extent: Extent) -> DeviceResult<usize>;

    /// Build a program from stage bytecode
    fn create_program(&self, desc: &ProgramDesc<'_>) -> DeviceResult<ProgramHandle>;

    /// Allocate and fill a buffer
    fn create_buffer(&self, usage: BufferUsage, bytes: &[u8]) -> DeviceResult<BufferHandle>;

    /// Overwrite the start of a host-visible buffer
    fn write_buffer(&self, buffer: BufferHandle, bytes: &[u8]) -> DeviceResult<()>;

    /// Upload an image, blocking until the copy finished
    fn create_texture(&self, image: &ImageData) -> DeviceResult<TextureHandle>;

    /// Destroy a program
    fn destroy_program(&self, program: ProgramHandle);

    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Destroy a texture
    fn destroy_texture(&self, texture: TextureHandle);

    /// Block until every queued submission finished
    fn wait_idle(&self) -> DeviceResult<()>;
}
