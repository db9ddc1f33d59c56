use glam::{Mat4, Vec3};
use log::{debug, warn};

use super::shaders;
use super::target::ShadowMap;
use crate::error::{PipelineError, PipelineResult};
use crate::gpu::{
    set_named_uniform, ClearMask, DepthState, Face, GraphicsDevice, ProgramId, TextureId,
};
use crate::scene::SceneDrawList;

/// Distance from the camera focus point back along the light direction.
pub const LIGHT_DISTANCE: f32 = 40.0;
/// Half extent of the orthographic shadow frustum.
pub const LIGHT_HALF_EXTENT: f32 = 30.0;
pub const LIGHT_NEAR: f32 = 0.1;
pub const LIGHT_FAR: f32 = 80.0;

/// Shadow filtering parameters uploaded to the lit program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSettings {
    bias: f32,
    samples: i32,
    radius: f32,
    strength: f32,
}

impl ShadowSettings {
    pub fn new(bias: f32, samples: i32, radius: f32, strength: f32) -> PipelineResult<Self> {
        if !(bias > 0.0) {
            return Err(PipelineError::InvalidShadowSettings("bias must be positive"));
        }
        if samples < 1 {
            return Err(PipelineError::InvalidShadowSettings(
                "sample count must be at least 1",
            ));
        }
        if !(radius >= 0.0) {
            return Err(PipelineError::InvalidShadowSettings(
                "sample radius must not be negative",
            ));
        }
        if !(0.0..=1.0).contains(&strength) {
            return Err(PipelineError::InvalidShadowSettings(
                "strength must be within [0, 1]",
            ));
        }
        Ok(Self {
            bias,
            samples,
            radius,
            strength,
        })
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    pub fn samples(&self) -> i32 {
        self.samples
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn strength(&self) -> f32 {
        self.strength
    }
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            bias: 0.0005,
            samples: 2,
            radius: 2.0,
            strength: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSpaceTransform {
    pub projection: Mat4,
    pub view: Mat4,
    /// `projection * view`.
    pub combined: Mat4,
    /// Up vector the view was built with.
    pub up: Vec3,
}

impl Default for LightSpaceTransform {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            combined: Mat4::IDENTITY,
            up: Vec3::Y,
        }
    }
}

/// Orthographic light-space transform for a directional light, centred on
/// the camera so the shadowed region follows the viewer.
pub fn compute_light_space(direction: Vec3, camera_position: Vec3) -> LightSpaceTransform {
    let dir = match direction.try_normalize() {
        Some(dir) => dir,
        None => {
            warn!("shadow caster has a zero direction; casting straight down");
            Vec3::NEG_Y
        }
    };
    let eye = camera_position - dir * LIGHT_DISTANCE;
    let up = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let view = Mat4::look_at_rh(eye, camera_position, up);
    let projection = Mat4::orthographic_rh(
        -LIGHT_HALF_EXTENT,
        LIGHT_HALF_EXTENT,
        -LIGHT_HALF_EXTENT,
        LIGHT_HALF_EXTENT,
        LIGHT_NEAR,
        LIGHT_FAR,
    );
    LightSpaceTransform {
        projection,
        view,
        combined: projection * view,
        up,
    }
}

/// Renders scene depth from the shadow caster's point of view.
#[derive(Debug)]
pub struct ShadowPass {
    program: ProgramId,
    map: ShadowMap,
    settings: ShadowSettings,
    light_space: LightSpaceTransform,
}

impl ShadowPass {
    pub fn new(gpu: &mut dyn GraphicsDevice, settings: ShadowSettings) -> PipelineResult<Self> {
        let program = gpu
            .create_program(&shaders::shadow_program())
            .map_err(|source| PipelineError::Program {
                label: "shadow",
                source,
            })?;
        let map = match ShadowMap::create(gpu) {
            Ok(map) => map,
            Err(err) => {
                gpu.delete_program(program);
                return Err(err);
            }
        };
        Ok(Self {
            program,
            map,
            settings,
            light_space: LightSpaceTransform::default(),
        })
    }

    /// Draws every item's depth into the shadow map.
    ///
    /// The framebuffer bound on entry is bound again on return.
    pub fn render(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        draw_list: &SceneDrawList,
        direction: Vec3,
        camera_position: Vec3,
    ) {
        self.light_space = compute_light_space(direction, camera_position);
        let previous = gpu.bound_framebuffer();

        self.map.target().bind(gpu);
        gpu.clear(ClearMask::DEPTH);
        gpu.set_depth_state(DepthState::LESS_EQUAL);
        gpu.set_cull_mode(Some(Face::Front));

        gpu.use_program(self.program);
        set_named_uniform(gpu, self.program, "mLightProj", self.light_space.projection);
        set_named_uniform(gpu, self.program, "mLightView", self.light_space.view);
        for item in draw_list.iter() {
            set_named_uniform(gpu, self.program, "mWorld", item.world());
            item.mesh.draw(gpu);
        }
        debug!("shadow pass drew {} item(s)", draw_list.len());

        gpu.bind_framebuffer(previous);
    }

    pub fn light_space_matrix(&self) -> Mat4 {
        self.light_space.combined
    }

    pub fn light_space(&self) -> &LightSpaceTransform {
        &self.light_space
    }

    pub fn shadow_map(&self) -> &ShadowMap {
        &self.map
    }

    pub fn depth_texture(&self) -> Option<TextureId> {
        self.map.depth_texture()
    }

    pub fn settings(&self) -> ShadowSettings {
        self.settings
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn release(self, gpu: &mut dyn GraphicsDevice) {
        gpu.delete_program(self.program);
        self.map.release(gpu);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::gpu::{Command, HeadlessDevice, UniformValue};
    use crate::scene::{DrawItem, Drawable, Transform};

    struct Triangle;

    impl Drawable for Triangle {
        fn draw(&self, gpu: &mut dyn GraphicsDevice) {
            gpu.draw_elements(crate::gpu::Topology::TriangleList, 3);
        }
    }

    #[test]
    fn light_space_is_deterministic() {
        let a = compute_light_space(Vec3::new(3.0, 4.0, 2.0), Vec3::new(1.0, 2.0, 3.0));
        let b = compute_light_space(Vec3::new(3.0, 4.0, 2.0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(a.combined.to_cols_array(), b.combined.to_cols_array());
    }

    #[test]
    fn near_vertical_light_switches_up_vector() {
        let down = compute_light_space(Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, 5.0, 0.0));
        assert_eq!(down.up, Vec3::Z);
        assert!(down.combined.to_cols_array().iter().all(|v| v.is_finite()));

        let slanted = compute_light_space(Vec3::new(3.0, 4.0, 2.0), Vec3::ZERO);
        assert_eq!(slanted.up, Vec3::Y);
    }

    #[test]
    fn camera_position_projects_inside_the_map() {
        let camera = Vec3::new(4.0, 1.0, -2.0);
        let light = compute_light_space(Vec3::new(-1.0, -2.0, 0.5), camera);
        let ndc = light.combined.project_point3(camera);
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn zero_direction_falls_back_to_straight_down() {
        let light = compute_light_space(Vec3::ZERO, Vec3::ZERO);
        assert_eq!(light.up, Vec3::Z);
        assert!(light.combined.to_cols_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn settings_are_validated() {
        assert!(ShadowSettings::new(0.0, 2, 2.0, 0.7).is_err());
        assert!(ShadowSettings::new(0.001, 0, 2.0, 0.7).is_err());
        assert!(ShadowSettings::new(0.001, 2, -1.0, 0.7).is_err());
        assert!(ShadowSettings::new(0.001, 2, 2.0, 1.5).is_err());
        assert_eq!(
            ShadowSettings::new(0.0005, 2, 2.0, 0.7).unwrap(),
            ShadowSettings::default()
        );
    }

    #[test]
    fn render_culls_front_faces_and_restores_binding() {
        let mut gpu = HeadlessDevice::new(320, 240);
        let mut pass = ShadowPass::new(&mut gpu, ShadowSettings::default()).unwrap();
        let mut list = SceneDrawList::new();
        list.push(DrawItem::new(Arc::new(Triangle), Transform::default()));
        list.push(DrawItem::new(
            Arc::new(Triangle),
            Transform::from_position(Vec3::X),
        ));

        gpu.begin_frame().unwrap();
        gpu.take_commands();
        pass.render(&mut gpu, &list, Vec3::new(3.0, 4.0, 2.0), Vec3::ZERO);

        assert_eq!(gpu.cull_mode(), Some(Face::Front));
        assert_eq!(gpu.depth_state(), DepthState::LESS_EQUAL);
        assert_eq!(gpu.bound_framebuffer(), None);

        let map = pass.shadow_map().target().framebuffer();
        let draws: Vec<_> = gpu
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Draw { target, .. } => Some(*target),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![Some(map), Some(map)]);
        assert_eq!(
            gpu.uniform_value(pass.program(), "mWorld"),
            Some(UniformValue::from(Mat4::from_translation(Vec3::X)))
        );
        assert_eq!(
            gpu.uniform_value(pass.program(), "mLightView"),
            Some(UniformValue::from(pass.light_space().view))
        );
    }
}
