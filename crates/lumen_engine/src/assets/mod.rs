//! Asset loading collaborators: shader bytecode and decoded images.
//!
//! The engine never touches file paths directly; it asks a [`ShaderLoader`]
//! or [`TextureLoader`] for a logical name inside an asset domain.

pub mod image;
pub mod loader;

pub use self::image::ImageData;
pub use loader::{
    FileShaderLoader, FileTextureLoader, LoadError, LoadResult, MemoryShaderLoader, MemoryTextureLoader,
    ShaderLoader, TextureLoader,
};
