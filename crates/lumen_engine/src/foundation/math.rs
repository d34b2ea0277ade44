//! Math types and the transform helpers used by the scene graph.
//!
//! Matrices follow nalgebra's column-vector convention, so a local
//! transform that applies scale, then rotation, then translation is the
//! product `T * R * S`, and a child's world matrix is `parent * local`.

pub use nalgebra::{Matrix4, Quaternion, Rotation3, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Wrap an angle in degrees into `[0, 360)`.
pub fn wrap_degrees(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Rotation from Euler angles in degrees.
///
/// `angles.x` is pitch (about X), `angles.y` is yaw (about Y) and
/// `angles.z` is roll (about Z). Roll is applied first, then pitch, then yaw.
pub fn euler_rotation(angles: &Vec3) -> Mat4 {
    let pitch = Rotation3::from_axis_angle(&Vector3::x_axis(), angles.x.to_radians());
    let yaw = Rotation3::from_axis_angle(&Vector3::y_axis(), angles.y.to_radians());
    let roll = Rotation3::from_axis_angle(&Vector3::z_axis(), angles.z.to_radians());
    (yaw * pitch * roll).to_homogeneous()
}

/// Compose a local matrix that scales, rotates and then translates.
pub fn compose_trs(position: &Vec3, rotation_degrees: &Vec3, scale: &Vec3) -> Mat4 {
    Mat4::new_translation(position) * euler_rotation(rotation_degrees) * Mat4::new_nonuniform_scaling(scale)
}

/// Translation column of an affine matrix.
pub fn translation_of(matrix: &Mat4) -> Vec3 {
    Vec3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)])
}

/// Transform a direction (w = 0) by `matrix` and normalize it.
///
/// Returns the zero vector for degenerate (zero-scale) matrices.
pub fn transform_direction(matrix: &Mat4, direction: &Vec3) -> Vec3 {
    let transformed = matrix.transform_vector(direction);
    transformed.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::zeros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wrap_degrees_stays_in_range() {
        assert_relative_eq!(wrap_degrees(370.0), 10.0, epsilon = 1e-4);
        assert_relative_eq!(wrap_degrees(-90.0), 270.0, epsilon = 1e-4);
        assert_relative_eq!(wrap_degrees(360.0), 0.0);
        assert!(wrap_degrees(-1e-7) < 360.0);
    }

    #[test]
    fn compose_applies_scale_before_translation() {
        let m = compose_trs(&Vec3::new(1.0, 2.0, 3.0), &Vec3::zeros(), &Vec3::new(2.0, 2.0, 2.0));
        let p = m.transform_point(&nalgebra::Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p.coords, Vec3::new(3.0, 2.0, 3.0), epsilon = 1e-6);
    }

    #[test]
    fn yaw_turns_forward_toward_x() {
        let r = euler_rotation(&Vec3::new(0.0, 90.0, 0.0));
        let forward = transform_direction(&r, &Vec3::z());
        assert_relative_eq!(forward, Vec3::x(), epsilon = 1e-6);
    }

    #[test]
    fn translation_column_is_read_back() {
        let m = Mat4::new_translation(&Vec3::new(4.0, -1.0, 0.5));
        assert_relative_eq!(translation_of(&m), Vec3::new(4.0, -1.0, 0.5));
    }
}
