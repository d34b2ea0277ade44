//! Vertex format shared by every mesh.

use bytemuck::{Pod, Zeroable};

/// Interleaved vertex: position, color, normal, texture coordinates
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Vertex color
    pub color: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinates
    pub uv: [f32; 2],
}

/// Byte offsets of each attribute, in declaration order
pub const ATTRIBUTE_OFFSETS: [u32; 4] = [0, 12, 24, 36];

impl Vertex {
    /// Bytes per vertex
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    /// New vertex
    pub const fn new(position: [f32; 3], color: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            color,
            normal,
            uv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_tightly_packed() {
        assert_eq!(Vertex::STRIDE, 44);
        let v = Vertex::new([1.0; 3], [2.0; 3], [3.0; 3], [4.0; 2]);
        let bytes = bytemuck::bytes_of(&v);
        let uv_start = ATTRIBUTE_OFFSETS[3] as usize;
        assert_eq!(&bytes[uv_start..uv_start + 4], &4.0_f32.to_ne_bytes());
    }
}
