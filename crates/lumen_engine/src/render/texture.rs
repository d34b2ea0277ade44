//! Sampled textures.

use std::sync::Arc;

use thiserror::Error;

use super::descriptor::SamplerFilter;
use super::device::{DeviceError, GpuDevice, TextureHandle};
use crate::assets::{ImageData, LoadError};
use crate::core::context::EngineContext;
use crate::scene::behavior::Behavior;

/// Texture errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TextureError {
    /// Image could not be loaded or decoded
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Upload failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// No texture registered under this name
    #[error("no texture named '{0}'")]
    NotFound(String),
}

/// Texture result alias
pub type TextureResult<T> = Result<T, TextureError>;

/// An RGBA8 image resident on the device
#[derive(Debug)]
pub struct GpuTexture {
    name: String,
    handle: TextureHandle,
    width: u32,
    height: u32,
}

impl GpuTexture {
    /// Decode `local_path` from `domain` and upload it
    pub fn load(engine: &EngineContext, name: &str, local_path: &str, domain: &str) -> TextureResult<Self> {
        let image = engine.texture_loader().load(local_path, domain)?;
        let texture = Self::from_image(engine.device().as_ref(), name, &image)?;
        log::info!("Loaded texture '{}' ({}x{})", name, texture.width, texture.height);
        Ok(texture)
    }

    /// Upload already decoded pixels
    pub fn from_image(device: &dyn GpuDevice, name: &str, image: &ImageData) -> TextureResult<Self> {
        let handle = device.create_texture(image)?;
        Ok(Self {
            name: name.to_string(),
            handle,
            width: image.width,
            height: image.height,
        })
    }

    /// Registered name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device handle
    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Destroy the device image
    pub fn release(&self, device: &dyn GpuDevice) {
        device.destroy_texture(self.handle);
        log::debug!("Released texture '{}'", self.name);
    }
}

/// Attaches a shared texture to a node
#[derive(Debug, Clone)]
pub struct TextureBinding {
    texture: Arc<GpuTexture>,
    filter: SamplerFilter,
}

impl TextureBinding {
    /// Bind `texture` with linear filtering
    pub fn new(texture: Arc<GpuTexture>) -> Self {
        Self {
            texture,
            filter: SamplerFilter::default(),
        }
    }

    /// Use `filter` when sampling
    pub fn with_filter(mut self, filter: SamplerFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Bound texture
    pub fn texture(&self) -> &Arc<GpuTexture> {
        &self.texture
    }

    /// Sampler filter
    pub fn filter(&self) -> SamplerFilter {
        self.filter
    }
}

impl Behavior for TextureBinding {
    fn kind_name(&self) -> &'static str {
        "TextureBinding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::headless_engine;

    #[test]
    fn loads_through_the_texture_loader() {
        let (device, engine) = headless_engine();
        let texture = GpuTexture::load(&engine, "test", "Texture/Test", "lumen").unwrap();
        assert_eq!((texture.width(), texture.height()), (8, 8));
        assert_eq!(device.live_resources().2, 1);

        texture.release(engine.device().as_ref());
        assert_eq!(device.live_resources().2, 0);
    }

    #[test]
    fn missing_texture_is_reported() {
        let (_device, engine) = headless_engine();
        assert!(matches!(
            GpuTexture::load(&engine, "nope", "Texture/Nope", "lumen"),
            Err(TextureError::Load(LoadError::NotFound(_)))
        ));
    }

    #[test]
    fn malformed_pixels_are_rejected_by_the_device() {
        let (_device, engine) = headless_engine();
        let image = ImageData {
            data: vec![0; 3],
            width: 2,
            height: 2,
        };
        assert!(matches!(
            GpuTexture::from_image(engine.device().as_ref(), "bad", &image),
            Err(TextureError::Device(_))
        ));
    }
}
