//! Shader and texture loaders.
//!
//! Shaders resolve to `<root>/<domain>/<name><Stage>.spv`, textures to
//! `<root>/<domain>/<name>.png`. A missing file is reported as `Ok(None)`
//! for shaders so the caller can decide whether the stage was optional.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::image::ImageData;
use crate::render::shader::ShaderStage;

/// SPIR-V magic number, first word of every module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Asset loading errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// File could not be read
    #[error("failed to read {path}: {reason}")]
    Io {
        /// Resolved path
        path: String,
        /// Underlying error text
        reason: String,
    },

    /// File is not valid SPIR-V
    #[error("invalid SPIR-V in {path}: {reason}")]
    InvalidBytecode {
        /// Resolved path
        path: String,
        /// What was wrong
        reason: String,
    },

    /// Image could not be decoded
    #[error("failed to decode image {path}: {reason}")]
    Decode {
        /// Resolved path
        path: String,
        /// Decoder message
        reason: String,
    },

    /// Texture does not exist
    #[error("texture '{0}' not found")]
    NotFound(String),
}

/// Loader result alias
pub type LoadResult<T> = Result<T, LoadError>;

/// Resolves a logical shader name to compiled bytecode per stage
pub trait ShaderLoader: Send + Sync {
    /// Bytecode for one stage; `Ok(None)` when the stage has no source
    fn load(&self, name: &str, domain: &str, stage: ShaderStage) -> LoadResult<Option<Vec<u32>>>;
}

/// Resolves a logical texture name to decoded pixels
pub trait TextureLoader: Send + Sync {
    /// Decoded image for `name`
    fn load(&self, name: &str, domain: &str) -> LoadResult<ImageData>;
}

/// Validate and convert raw SPIR-V bytes to words
pub fn spirv_words(bytes: &[u8], path: &str) -> LoadResult<Vec<u32>> {
    if bytes.len() % 4 != 0 || bytes.is_empty() {
        return Err(LoadError::InvalidBytecode {
            path: path.to_string(),
            reason: format!("length {} is not a non-zero multiple of 4", bytes.len()),
        });
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        return Err(LoadError::InvalidBytecode {
            path: path.to_string(),
            reason: format!("bad magic number {:#010x}", words[0]),
        });
    }

    Ok(words)
}

/// Loads precompiled SPIR-V from disk
#[derive(Debug, Clone)]
pub struct FileShaderLoader {
    root: PathBuf,
}

impl FileShaderLoader {
    /// Loader rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path a stage resolves to
    pub fn resolve(&self, name: &str, domain: &str, stage: ShaderStage) -> PathBuf {
        self.root.join(domain).join(format!("{}{}.spv", name, stage.suffix()))
    }
}

impl ShaderLoader for FileShaderLoader {
    fn load(&self, name: &str, domain: &str, stage: ShaderStage) -> LoadResult<Option<Vec<u32>>> {
        let path = self.resolve(name, domain, stage);
        if !path.exists() {
            log::debug!("No {:?} stage for shader '{}' at {:?}", stage, name, path);
            return Ok(None);
        }

        let display = path.display().to_string();
        let bytes = std::fs::read(&path).map_err(|e| LoadError::Io {
            path: display.clone(),
            reason: e.to_string(),
        })?;

        log::debug!("Read {} bytes of {:?} bytecode from {}", bytes.len(), stage, display);
        spirv_words(&bytes, &display).map(Some)
    }
}

/// Loads PNG textures from disk
#[derive(Debug, Clone)]
pub struct FileTextureLoader {
    root: PathBuf,
}

impl FileTextureLoader {
    /// Loader rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path a texture resolves to
    pub fn resolve(&self, name: &str, domain: &str) -> PathBuf {
        let file = Path::new(name);
        if file.extension().is_some() {
            self.root.join(domain).join(file)
        } else {
            self.root.join(domain).join(format!("{name}.png"))
        }
    }
}

impl TextureLoader for FileTextureLoader {
    fn load(&self, name: &str, domain: &str) -> LoadResult<ImageData> {
        let path = self.resolve(name, domain);
        if !path.exists() {
            return Err(LoadError::NotFound(path.display().to_string()));
        }
        ImageData::from_file(&path)
    }
}

/// In-memory shader sources keyed by `(domain, name, stage)`
#[derive(Debug, Default, Clone)]
pub struct MemoryShaderLoader {
    stages: HashMap<(String, String, ShaderStage), LoadResult<Vec<u32>>>,
}

impl MemoryShaderLoader {
    /// Empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide bytecode for a stage
    pub fn with_stage(mut self, domain: &str, name: &str, stage: ShaderStage, words: Vec<u32>) -> Self {
        self.stages.insert((domain.to_string(), name.to_string(), stage), Ok(words));
        self
    }

    /// Make a stage fail to load
    pub fn with_failure(mut self, domain: &str, name: &str, stage: ShaderStage, error: LoadError) -> Self {
        self.stages.insert((domain.to_string(), name.to_string(), stage), Err(error));
        self
    }
}

impl ShaderLoader for MemoryShaderLoader {
    fn load(&self, name: &str, domain: &str, stage: ShaderStage) -> LoadResult<Option<Vec<u32>>> {
        match self.stages.get(&(domain.to_string(), name.to_string(), stage)) {
            None => Ok(None),
            Some(Ok(words)) => Ok(Some(words.clone())),
            Some(Err(e)) => Err(e.clone()),
        }
    }
}

/// In-memory textures keyed by `(domain, name)`
#[derive(Debug, Default, Clone)]
pub struct MemoryTextureLoader {
    images: HashMap<(String, String), ImageData>,
}

impl MemoryTextureLoader {
    /// Empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide an image
    pub fn with_image(mut self, domain: &str, name: &str, image: ImageData) -> Self {
        self.images.insert((domain.to_string(), name.to_string()), image);
        self
    }
}

impl TextureLoader for MemoryTextureLoader {
    fn load(&self, name: &str, domain: &str) -> LoadResult<ImageData> {
        self.images
            .get(&(domain.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| LoadError::NotFound(format!("{domain}/{name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirv_bytes(extra_words: usize) -> Vec<u8> {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend(std::iter::repeat(0).take(extra_words * 4));
        bytes
    }

    #[test]
    fn spirv_validation() {
        assert_eq!(spirv_words(&spirv_bytes(2), "x").unwrap().len(), 3);
        assert!(matches!(spirv_words(&[3, 2, 7, 7, 1], "x"), Err(LoadError::InvalidBytecode { .. })));
        assert!(matches!(spirv_words(&[0; 8], "x"), Err(LoadError::InvalidBytecode { .. })));
    }

    #[test]
    fn file_loader_resolves_stage_suffix_and_reports_absence() {
        let root = std::env::temp_dir().join(format!("lumen_shaders_{}", std::process::id()));
        let loader = FileShaderLoader::new(&root);
        let vertex = loader.resolve("Shader/Default", "lumen", ShaderStage::Vertex);
        assert!(vertex.ends_with("lumen/Shader/DefaultVertex.spv"));

        std::fs::create_dir_all(vertex.parent().unwrap()).unwrap();
        std::fs::write(&vertex, spirv_bytes(4)).unwrap();

        assert_eq!(loader.load("Shader/Default", "lumen", ShaderStage::Vertex).unwrap().map(|w| w.len()), Some(5));
        assert_eq!(loader.load("Shader/Default", "lumen", ShaderStage::Geometry).unwrap(), None);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn memory_loaders_return_configured_results() {
        let shaders = MemoryShaderLoader::new().with_stage("d", "s", ShaderStage::Pixel, vec![SPIRV_MAGIC]);
        assert!(shaders.load("s", "d", ShaderStage::Pixel).unwrap().is_some());
        assert!(shaders.load("s", "d", ShaderStage::Hull).unwrap().is_none());

        let textures = MemoryTextureLoader::new().with_image("d", "t", ImageData::solid_color(1, 1, [0; 4]));
        assert!(textures.load("t", "d").is_ok());
        assert!(matches!(textures.load("missing", "d"), Err(LoadError::NotFound(_))));
    }
}
