use glam::{Mat4, Vec3};

use crate::scene::{LightSet, SceneDrawList};

/// Background color of the offscreen surface and the visible surface.
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.75, 0.85, 0.8, 1.0];

/// Texture unit for a draw item's albedo texture.
pub const ALBEDO_UNIT: u32 = 0;

/// Texture unit the shadow map occupies during the main color pass.
pub const SHADOW_MAP_UNIT: u32 = 5;

/// Camera state for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraParams {
    pub position: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
    pub near: f32,
    pub far: f32,
}

impl CameraParams {
    pub const DEFAULT_FOV_DEGREES: f32 = 45.0;
    pub const DEFAULT_NEAR: f32 = 0.1;
    pub const DEFAULT_FAR: f32 = 1000.0;

    /// Perspective camera at `position` looking at `target`, +Y up.
    pub fn look_at(position: Vec3, target: Vec3, aspect: f32) -> Self {
        let view = Mat4::look_at_rh(position, target, Vec3::Y);
        let projection = Mat4::perspective_rh(
            Self::DEFAULT_FOV_DEGREES.to_radians(),
            aspect.max(0.01),
            Self::DEFAULT_NEAR,
            Self::DEFAULT_FAR,
        );
        Self {
            position,
            view,
            projection,
            near: Self::DEFAULT_NEAR,
            far: Self::DEFAULT_FAR,
        }
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }
}

impl Default for CameraParams {
    fn default() -> Self {
        Self::look_at(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO, 1.0)
    }
}

/// Everything the caller supplies for one frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameInputs<'a> {
    pub camera: CameraParams,
    pub lights: &'a LightSet,
    pub draw_list: &'a SceneDrawList,
}
