use glam::Vec3;
use log::warn;

use super::common::SHADOW_MAP_UNIT;
use super::shaders::{MAX_DIR_LIGHTS, MAX_POINT_LIGHTS, MAX_SPOT_LIGHTS};
use super::shadow::ShadowPass;
use crate::gpu::{set_named_uniform, GraphicsDevice, ProgramId};
use crate::scene::LightSet;

/// Writes light and shadow state into the lit program's uniforms.
///
/// Only entries `0..count` of each light array are written; slots past the
/// count keep whatever they held and the shader never reads them.
#[derive(Debug, Default)]
pub struct LightingUploader {
    warned_overflow: bool,
}

impl LightingUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        program: ProgramId,
        lights: &LightSet,
        camera_position: Vec3,
        ambient: Vec3,
    ) {
        set_named_uniform(gpu, program, "viewPos", camera_position);
        set_named_uniform(gpu, program, "ambientLightIntensity", ambient);

        let dirs: Vec<_> = lights.directional().take(MAX_DIR_LIGHTS).collect();
        let points: Vec<_> = lights.points().take(MAX_POINT_LIGHTS).collect();
        let spots: Vec<_> = lights.spots().take(MAX_SPOT_LIGHTS).collect();
        self.note_overflow(lights, dirs.len() + points.len() + spots.len());

        set_named_uniform(gpu, program, "numDirLights", dirs.len() as i32);
        set_named_uniform(gpu, program, "numPointLights", points.len() as i32);
        set_named_uniform(gpu, program, "numSpotLights", spots.len() as i32);

        for (i, light) in dirs.iter().enumerate() {
            set_named_uniform(gpu, program, &format!("dirLights[{i}].direction"), light.direction);
            set_named_uniform(gpu, program, &format!("dirLights[{i}].color"), light.color);
        }

        for (i, light) in points.iter().enumerate() {
            let field = |name: &str| format!("pointLights[{i}].{name}");
            set_named_uniform(gpu, program, &field("position"), light.position);
            set_named_uniform(gpu, program, &field("color"), light.color);
            set_named_uniform(gpu, program, &field("constant"), light.attenuation.constant);
            set_named_uniform(gpu, program, &field("linear"), light.attenuation.linear);
            set_named_uniform(gpu, program, &field("quadratic"), light.attenuation.quadratic);
        }

        for (i, light) in spots.iter().enumerate() {
            let field = |name: &str| format!("spotLights[{i}].{name}");
            set_named_uniform(gpu, program, &field("position"), light.position);
            set_named_uniform(gpu, program, &field("direction"), light.direction);
            set_named_uniform(gpu, program, &field("color"), light.color);
            set_named_uniform(gpu, program, &field("cutOff"), light.cut_off);
            set_named_uniform(gpu, program, &field("outerCutOff"), light.outer_cut_off);
            set_named_uniform(gpu, program, &field("constant"), light.attenuation.constant);
            set_named_uniform(gpu, program, &field("linear"), light.attenuation.linear);
            set_named_uniform(gpu, program, &field("quadratic"), light.attenuation.quadratic);
        }
    }

    /// Binds the shadow map and its parameters, or disables shadowing.
    pub fn upload_shadow(
        &self,
        gpu: &mut dyn GraphicsDevice,
        program: ProgramId,
        shadow: Option<&ShadowPass>,
    ) {
        let Some(shadow) = shadow else {
            set_named_uniform(gpu, program, "uShadowsEnabled", 0);
            return;
        };
        let settings = shadow.settings();
        gpu.bind_texture(SHADOW_MAP_UNIT, shadow.depth_texture());
        set_named_uniform(gpu, program, "uShadowMap", SHADOW_MAP_UNIT as i32);
        set_named_uniform(gpu, program, "mLightSpace", shadow.light_space_matrix());
        set_named_uniform(gpu, program, "uShadowBias", settings.bias());
        set_named_uniform(gpu, program, "uShadowSamples", settings.samples());
        set_named_uniform(gpu, program, "uShadowSampleRadius", settings.radius());
        set_named_uniform(gpu, program, "uShadowStrength", settings.strength());
        set_named_uniform(gpu, program, "uShadowsEnabled", 1);
    }

    fn note_overflow(&mut self, lights: &LightSet, uploaded: usize) {
        if uploaded < lights.len() && !self.warned_overflow {
            warn!(
                "{} light(s) exceed the program's capacity and are ignored",
                lights.len() - uploaded
            );
            self.warned_overflow = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Command, HeadlessDevice, UniformValue};
    use crate::render::shaders::scene_program;
    use crate::render::shadow::ShadowSettings;
    use crate::scene::Light;

    fn setup() -> (HeadlessDevice, ProgramId) {
        let mut gpu = HeadlessDevice::new(64, 64);
        let program = gpu.create_program(&scene_program()).unwrap();
        (gpu, program)
    }

    fn written_names(gpu: &HeadlessDevice) -> Vec<String> {
        gpu.commands()
            .iter()
            .filter_map(|c| match c {
                Command::SetUniform { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn writes_exactly_count_entries() {
        let (mut gpu, program) = setup();
        let lights: LightSet = [
            Light::directional(Vec3::new(3.0, 4.0, 2.0), Vec3::splat(0.9)),
            Light::point(Vec3::new(13.0, 5.0, 0.0), Vec3::new(1.0, 0.5, 0.5)),
            Light::point(Vec3::new(0.0, -5.0, 0.0), Vec3::new(0.5, 1.0, 0.5)),
        ]
        .into_iter()
        .collect();

        LightingUploader::new().upload(&mut gpu, program, &lights, Vec3::ZERO, Vec3::splat(0.3));

        let names = written_names(&gpu);
        assert!(names.contains(&"dirLights[0].direction".to_string()));
        assert!(names.contains(&"pointLights[1].quadratic".to_string()));
        assert!(!names.iter().any(|n| n.starts_with("dirLights[1]")));
        assert!(!names.iter().any(|n| n.starts_with("pointLights[2]")));
        assert!(!names.iter().any(|n| n.starts_with("spotLights[")));
        assert_eq!(
            gpu.uniform_value(program, "numPointLights"),
            Some(UniformValue::Int(2))
        );
        assert_eq!(
            gpu.uniform_value(program, "numSpotLights"),
            Some(UniformValue::Int(0))
        );
    }

    #[test]
    fn empty_light_set_only_writes_counts() {
        let (mut gpu, program) = setup();
        LightingUploader::new().upload(
            &mut gpu,
            program,
            &LightSet::new(),
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::splat(0.3),
        );
        let names = written_names(&gpu);
        assert_eq!(
            names,
            vec![
                "viewPos",
                "ambientLightIntensity",
                "numDirLights",
                "numPointLights",
                "numSpotLights"
            ]
        );
    }

    #[test]
    fn excess_lights_are_clamped_to_capacity() {
        let (mut gpu, program) = setup();
        let lights: LightSet = (0..MAX_POINT_LIGHTS + 3)
            .map(|i| Light::point(Vec3::splat(i as f32), Vec3::ONE))
            .collect();
        LightingUploader::new().upload(&mut gpu, program, &lights, Vec3::ZERO, Vec3::ZERO);
        assert_eq!(
            gpu.uniform_value(program, "numPointLights"),
            Some(UniformValue::Int(MAX_POINT_LIGHTS as i32))
        );
    }

    #[test]
    fn shadow_upload_binds_unit_five() {
        let (mut gpu, program) = setup();
        let shadow = ShadowPass::new(&mut gpu, ShadowSettings::default()).unwrap();
        let uploader = LightingUploader::new();

        uploader.upload_shadow(&mut gpu, program, Some(&shadow));
        assert_eq!(gpu.bound_texture(SHADOW_MAP_UNIT), shadow.depth_texture());
        assert_eq!(
            gpu.uniform_value(program, "uShadowMap"),
            Some(UniformValue::Int(5))
        );
        assert_eq!(
            gpu.uniform_value(program, "uShadowStrength"),
            Some(UniformValue::Float(0.7))
        );
        assert_eq!(
            gpu.uniform_value(program, "uShadowsEnabled"),
            Some(UniformValue::Int(1))
        );

        gpu.take_commands();
        uploader.upload_shadow(&mut gpu, program, None);
        assert_eq!(written_names(&gpu), vec!["uShadowsEnabled"]);
        assert_eq!(
            gpu.uniform_value(program, "uShadowsEnabled"),
            Some(UniformValue::Int(0))
        );
    }
}
