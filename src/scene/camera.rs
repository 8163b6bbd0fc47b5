//! Camera pose, lens and the matrices derived from them

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

pub const INITIAL_POSITION: Vec3 = Vec3::new(0.0, 0.0, -5.0);
pub const INITIAL_FORWARD: Vec3 = Vec3::new(0.0, 0.0, 1.0);
pub const INITIAL_UP: Vec3 = Vec3::Y;
pub const INITIAL_FOV_DEGREES: f32 = 90.0;
pub const INITIAL_WIDTH: u32 = 800;
pub const INITIAL_HEIGHT: u32 = 600;
pub const NEAR_PLANE: f32 = 0.001;
pub const FAR_PLANE: f32 = 1000.0;
pub const INITIAL_SPEED: f32 = 0.1;

pub const DEFOCUS_ANGLE_RANGE: (f32, f32) = (0.0, 5.0);
pub const FOCUS_DISTANCE_RANGE: (f32, f32) = (0.0, 100.0);

/// Thin-lens parameters, always inside their allowed ranges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lens {
    defocus_angle: f32,
    focus_distance: f32,
}

impl Default for Lens {
    fn default() -> Self {
        Self {
            defocus_angle: 0.0,
            focus_distance: 10.0,
        }
    }
}

impl Lens {
    /// Build a lens, silently clamping both values into range
    pub fn clamped(defocus_angle: f32, focus_distance: f32) -> Self {
        Self {
            defocus_angle: defocus_angle.clamp(DEFOCUS_ANGLE_RANGE.0, DEFOCUS_ANGLE_RANGE.1),
            focus_distance: focus_distance.clamp(FOCUS_DISTANCE_RANGE.0, FOCUS_DISTANCE_RANGE.1),
        }
    }

    pub fn defocus_angle(&self) -> f32 {
        self.defocus_angle
    }

    pub fn focus_distance(&self) -> f32 {
        self.focus_distance
    }
}

/// Position, orientation and projection parameters of the camera
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    /// Unit view direction
    pub forward: Vec3,
    /// Approximate up direction, never zero
    pub up_hint: Vec3,
    pub fov_degrees: f32,
    pub width: u32,
    pub height: u32,
    pub near: f32,
    pub far: f32,
    /// World units per movement step
    pub speed: f32,
    pub lens: Lens,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            position: INITIAL_POSITION,
            forward: INITIAL_FORWARD,
            up_hint: INITIAL_UP,
            fov_degrees: INITIAL_FOV_DEGREES,
            width: INITIAL_WIDTH,
            height: INITIAL_HEIGHT,
            near: NEAR_PLANE,
            far: FAR_PLANE,
            speed: INITIAL_SPEED,
            lens: Lens::default(),
        }
    }
}

impl CameraPose {
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    /// Get the right direction
    pub fn right(&self) -> Vec3 {
        self.forward.cross(self.up_hint).normalize_or_zero()
    }

    /// Get the camera-relative up direction
    pub fn up(&self) -> Vec3 {
        self.right().cross(self.forward).normalize_or_zero()
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward, self.up_hint)
    }

    /// Get the projection matrix (depth range 0..1).
    ///
    /// With `flip_vertical` the projected Y axis is negated to match a
    /// top-left image origin.
    pub fn projection_matrix(&self, flip_vertical: bool) -> Mat4 {
        let mut projection = Mat4::perspective_rh(
            self.fov_degrees.to_radians(),
            self.aspect(),
            self.near,
            self.far,
        );
        if flip_vertical {
            projection.y_axis.y = -projection.y_axis.y;
        }
        projection
    }

    pub fn matrices(&self, flip_vertical: bool) -> CameraMatrices {
        let view = self.view_matrix();
        let projection = self.projection_matrix(flip_vertical);
        CameraMatrices {
            view,
            projection,
            inverse_view: view.inverse(),
            inverse_projection: projection.inverse(),
        }
    }
}

/// View and projection matrices with their inverses
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub projection: Mat4,
    pub inverse_view: Mat4,
    pub inverse_projection: Mat4,
}

/// Camera data as the ray-marcher reads it.
///
/// Both matrices are stored row-major, so the shader multiplies
/// `vector * matrix` to apply them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraViewData {
    pub inverse_view: [[f32; 4]; 4],
    pub inverse_projection: [[f32; 4]; 4],
}

impl CameraViewData {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

impl From<&CameraMatrices> for CameraViewData {
    fn from(matrices: &CameraMatrices) -> Self {
        Self {
            inverse_view: matrices.inverse_view.transpose().to_cols_array_2d(),
            inverse_projection: matrices.inverse_projection.transpose().to_cols_array_2d(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn assert_identity(m: Mat4) {
        assert!(
            m.abs_diff_eq(Mat4::IDENTITY, 1e-3),
            "expected identity, got {:?}",
            m
        );
    }

    #[test]
    fn test_inverses_of_initial_pose() {
        let matrices = CameraPose::default().matrices(true);
        assert_identity(matrices.view * matrices.inverse_view);
        assert_identity(matrices.projection * matrices.inverse_projection);
    }

    #[test]
    fn test_flip_negates_projected_y() {
        let pose = CameraPose::default();
        let plain = pose.projection_matrix(false);
        let flipped = pose.projection_matrix(true);
        assert_eq!(flipped.y_axis.y, -plain.y_axis.y);
        assert_eq!(flipped.x_axis, plain.x_axis);
        assert_eq!(flipped.z_axis, plain.z_axis);
    }

    #[test]
    fn test_fov_is_degrees() {
        let pose = CameraPose::default();
        // 90 degrees vertical fov gives a focal length of exactly 1
        let projection = pose.projection_matrix(false);
        assert!((projection.y_axis.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_view_maps_position_to_origin() {
        let pose = CameraPose::default();
        let eye = pose.view_matrix() * pose.position.extend(1.0);
        assert!(eye.truncate().length() < 1e-5);
        // Forward looks down -Z in view space
        let ahead = pose.view_matrix() * (pose.position + pose.forward).extend(1.0);
        assert!(ahead.z < 0.0);
    }

    #[test]
    fn test_view_data_is_row_major() {
        let matrices = CameraPose::default().matrices(true);
        let data = CameraViewData::from(&matrices);
        let m = matrices.inverse_view;
        for row in 0..4 {
            let expected: Vec4 = m.row(row);
            assert_eq!(data.inverse_view[row], expected.to_array());
        }
        assert_eq!(CameraViewData::SIZE, 128);
    }

    #[test]
    fn test_lens_clamps() {
        let lens = Lens::clamped(-1.0, 500.0);
        assert_eq!(lens.defocus_angle(), 0.0);
        assert_eq!(lens.focus_distance(), 100.0);
    }
}
