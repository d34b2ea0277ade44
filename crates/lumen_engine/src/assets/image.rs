//! Decoded RGBA8 images ready for upload

use std::path::Path;

use super::loader::LoadError;

/// Decoded image with tightly packed RGBA8 rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Raw RGBA pixel data, `width * 4` bytes per row
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl ImageData {
    /// Decode an image file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        log::debug!("Decoding image {:?}", path);

        let img = image::open(path).map_err(|e| LoadError::Decode {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        log::info!("Loaded image {}x{} from {:?}", width, height, path);
        Ok(Self {
            data: rgba.into_raw(),
            width,
            height,
        })
    }

    /// Decode an encoded image held in memory
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let img = image::load_from_memory(bytes).map_err(|e| LoadError::Decode {
            path: "<memory>".to_string(),
            reason: e.to_string(),
        })?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            data: rgba.into_raw(),
            width,
            height,
        })
    }

    /// Image filled with one color
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixel_count = (width as usize) * (height as usize);
        Self {
            data: color.repeat(pixel_count),
            width,
            height,
        }
    }

    /// Two-color checkerboard with `cell`-pixel squares
    pub fn checkerboard(width: u32, height: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let mut data = Vec::with_capacity((width as usize) * (height as usize) * 4);
        for y in 0..height {
            for x in 0..width {
                let pick = ((x / cell) + (y / cell)) % 2 == 0;
                data.extend_from_slice(if pick { &a } else { &b });
            }
        }
        Self { data, width, height }
    }

    /// Bytes in one row
    pub fn row_pitch(&self) -> usize {
        self.width as usize * 4
    }

    /// Iterate over pixel rows, top to bottom
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.row_pitch().max(1))
    }

    /// Total size in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_color_fills_every_pixel() {
        let img = ImageData::solid_color(3, 2, [255, 0, 0, 255]);
        assert_eq!(img.size_bytes(), 3 * 2 * 4);
        assert_eq!(img.rows().count(), 2);
        assert!(img.rows().all(|row| row.len() == 12));
        assert_eq!(&img.data[8..12], &[255, 0, 0, 255]);
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let white = [255; 4];
        let black = [0, 0, 0, 255];
        let img = ImageData::checkerboard(4, 4, 2, white, black);
        assert_eq!(&img.data[0..4], &white);
        assert_eq!(&img.data[8..12], &black);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(ImageData::from_bytes(&[1, 2, 3]), Err(LoadError::Decode { .. })));
    }
}
