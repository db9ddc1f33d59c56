use glam::Vec2;
use log::debug;

use super::post::PostProcessSurface;
use super::shaders;
use crate::config::{AntiAliasing, PipelineSettings};
use crate::error::{PipelineError, PipelineResult};
use crate::gpu::{
    set_named_uniform, ClearMask, DepthState, GraphicsDevice, ProgramDesc, ProgramId, TextureId,
    UniformValue, Viewport,
};

/// Which surface texture feeds an effect input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// Most recent color output.
    Color,
    /// Scene depth from the main color pass.
    Depth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectInput {
    pub uniform: &'static str,
    pub source: InputSource,
}

/// One full-screen pass: a program, its texture inputs and its uniforms.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectPass {
    pub label: &'static str,
    pub program: ProgramId,
    pub inputs: Vec<EffectInput>,
    pub uniforms: Vec<(&'static str, UniformValue)>,
}

impl EffectPass {
    /// Pass reading only the current color through `uTexture`.
    pub fn color(label: &'static str, program: ProgramId) -> Self {
        Self {
            label,
            program,
            inputs: vec![EffectInput {
                uniform: "uTexture",
                source: InputSource::Color,
            }],
            uniforms: Vec::new(),
        }
    }

    pub fn with_uniform(mut self, name: &'static str, value: impl Into<UniformValue>) -> Self {
        self.uniforms.push((name, value.into()));
        self
    }
}

/// Built-in effect programs and the ordering policy that strings them
/// together.
#[derive(Debug)]
pub struct EffectChain {
    cel_shading: ProgramId,
    depth_of_field: ProgramId,
    tone_map: ProgramId,
    fxaa: ProgramId,
    dlaa: ProgramId,
}

impl EffectChain {
    pub fn new(gpu: &mut dyn GraphicsDevice) -> PipelineResult<Self> {
        let mut created = Vec::new();
        Ok(Self {
            cel_shading: build(gpu, &mut created, shaders::cel_shading_program())?,
            depth_of_field: build(gpu, &mut created, shaders::depth_of_field_program())?,
            tone_map: build(gpu, &mut created, shaders::tone_map_program())?,
            fxaa: build(gpu, &mut created, shaders::fxaa_program())?,
            dlaa: build(gpu, &mut created, shaders::dlaa_program())?,
        })
    }

    /// Runs one intermediate pass from the current buffer into the other one.
    pub fn run_pass(
        &self,
        gpu: &mut dyn GraphicsDevice,
        surface: &mut PostProcessSurface,
        pass: &EffectPass,
    ) -> PipelineResult<()> {
        let (framebuffer, written) = surface
            .write_target()
            .ok_or(PipelineError::NotConfigured)?;
        let textures = resolve_inputs(surface, pass)?;
        ensure_no_feedback(pass.label, written, &textures)?;

        gpu.bind_framebuffer(Some(framebuffer));
        gpu.set_viewport(surface.viewport());
        let (width, height) = surface.size();
        self.draw(gpu, surface, pass, &textures, width, height);
        surface.swap();
        debug!("effect pass {} wrote buffer {}", pass.label, surface.current_index());
        Ok(())
    }

    /// Composes the current buffer onto the visible surface, through
    /// `final_pass` when given or as a plain copy otherwise.
    pub fn present(
        &self,
        gpu: &mut dyn GraphicsDevice,
        surface: &PostProcessSurface,
        final_pass: Option<&EffectPass>,
    ) -> PipelineResult<()> {
        let source = surface.color_texture().ok_or(PipelineError::NotConfigured)?;
        let (width, height) = gpu.surface_size();

        gpu.bind_framebuffer(None);
        gpu.set_viewport(Viewport::full(width, height));
        gpu.clear(ClearMask::ALL);
        match final_pass {
            Some(pass) => {
                let textures = resolve_inputs(surface, pass)?;
                self.draw(gpu, surface, pass, &textures, width, height);
            }
            None => gpu.blit(source),
        }
        Ok(())
    }

    fn draw(
        &self,
        gpu: &mut dyn GraphicsDevice,
        surface: &PostProcessSurface,
        pass: &EffectPass,
        textures: &[TextureId],
        width: u32,
        height: u32,
    ) {
        gpu.use_program(pass.program);
        for (unit, (input, texture)) in pass.inputs.iter().zip(textures).enumerate() {
            gpu.bind_texture(unit as u32, Some(*texture));
            set_named_uniform(gpu, pass.program, input.uniform, unit as i32);
        }
        set_named_uniform(
            gpu,
            pass.program,
            "uResolution",
            Vec2::new(width as f32, height as f32),
        );
        for (name, value) in &pass.uniforms {
            set_named_uniform(gpu, pass.program, name, *value);
        }
        gpu.set_depth_state(DepthState::DISABLED);
        gpu.set_cull_mode(None);
        surface.quad().draw(gpu);
    }

    pub fn cel_shading_pass(&self, settings: &PipelineSettings, size: (u32, u32)) -> EffectPass {
        let cel = settings.cel_shading;
        let pixel = Vec2::new(1.0 / size.0.max(1) as f32, 1.0 / size.1.max(1) as f32);
        EffectPass::color("cel-shading", self.cel_shading)
            .with_uniform("uLevels", cel.levels)
            .with_uniform("uEdgeThreshold", cel.edge_threshold)
            .with_uniform("uEdgeColor", cel.edge_color)
            .with_uniform("uPixelSize", pixel)
    }

    pub fn depth_of_field_pass(
        &self,
        settings: &PipelineSettings,
        near: f32,
        far: f32,
    ) -> EffectPass {
        let dof = settings.depth_of_field;
        EffectPass {
            label: "depth-of-field",
            program: self.depth_of_field,
            inputs: vec![
                EffectInput {
                    uniform: "uColor",
                    source: InputSource::Color,
                },
                EffectInput {
                    uniform: "uDepth",
                    source: InputSource::Depth,
                },
            ],
            uniforms: Vec::new(),
        }
        .with_uniform("uNear", near)
        .with_uniform("uFar", far)
        .with_uniform("uFocusDistance", dof.focus_distance)
        .with_uniform("uFocusRange", dof.focus_range)
        .with_uniform("uMaxBlur", dof.max_blur)
        .with_uniform("uBokehRadius", dof.bokeh_radius)
    }

    pub fn tone_map_pass(&self, settings: &PipelineSettings) -> EffectPass {
        EffectPass::color("tone-map", self.tone_map)
            .with_uniform("uTonemap", settings.tone_map.uniform_value())
            .with_uniform("uExposure", settings.exposure)
            .with_uniform("uGamma", settings.gamma)
    }

    /// Terminal pass for [`present`](Self::present); `None` copies.
    pub fn anti_aliasing_pass(&self, settings: &PipelineSettings) -> Option<EffectPass> {
        match settings.anti_aliasing {
            AntiAliasing::Off => None,
            AntiAliasing::Fxaa => Some(EffectPass::color("fxaa", self.fxaa)),
            AntiAliasing::Dlaa => Some(EffectPass::color("dlaa", self.dlaa)),
        }
    }

    pub fn programs(&self) -> [ProgramId; 5] {
        [
            self.cel_shading,
            self.depth_of_field,
            self.tone_map,
            self.fxaa,
            self.dlaa,
        ]
    }

    pub fn release(self, gpu: &mut dyn GraphicsDevice) {
        for program in self.programs() {
            gpu.delete_program(program);
        }
    }
}

/// Creates a program, releasing every program in `created` if it fails.
fn build(
    gpu: &mut dyn GraphicsDevice,
    created: &mut Vec<ProgramId>,
    desc: ProgramDesc,
) -> PipelineResult<ProgramId> {
    match gpu.create_program(&desc) {
        Ok(program) => {
            created.push(program);
            Ok(program)
        }
        Err(source) => {
            for program in created.drain(..) {
                gpu.delete_program(program);
            }
            Err(PipelineError::Program {
                label: desc.label,
                source,
            })
        }
    }
}

fn ensure_no_feedback(
    label: &'static str,
    written: TextureId,
    inputs: &[TextureId],
) -> PipelineResult<()> {
    if inputs.contains(&written) {
        return Err(PipelineError::FeedbackLoop { label });
    }
    Ok(())
}

fn resolve_inputs(
    surface: &PostProcessSurface,
    pass: &EffectPass,
) -> PipelineResult<Vec<TextureId>> {
    pass.inputs
        .iter()
        .map(|input| {
            match input.source {
                InputSource::Color => surface.color_texture(),
                InputSource::Depth => surface.depth_texture(),
            }
            .ok_or(PipelineError::NotConfigured)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Command, HeadlessDevice, TextureContents};
    use crate::render::common::DEFAULT_CLEAR_COLOR;

    fn setup(width: u32, height: u32) -> (HeadlessDevice, PostProcessSurface, EffectChain) {
        let mut gpu = HeadlessDevice::new(width, height);
        let mut surface = PostProcessSurface::new(&mut gpu);
        surface.configure(&mut gpu, width, height).unwrap();
        let chain = EffectChain::new(&mut gpu).unwrap();
        (gpu, surface, chain)
    }

    #[test]
    fn empty_scene_presents_the_clear_color() {
        let (mut gpu, mut surface, chain) = setup(800, 800);
        gpu.begin_frame().unwrap();
        surface.begin_frame(&mut gpu, DEFAULT_CLEAR_COLOR).unwrap();
        chain.present(&mut gpu, &surface, None).unwrap();
        gpu.end_frame().unwrap();

        assert_eq!(
            gpu.surface_contents(),
            TextureContents::Solid(DEFAULT_CLEAR_COLOR)
        );
        assert_eq!(gpu.bound_framebuffer(), None);
    }

    #[test]
    fn pass_reads_previous_output_and_writes_the_other_buffer() {
        let (mut gpu, mut surface, chain) = setup(64, 64);
        gpu.begin_frame().unwrap();
        surface.begin_frame(&mut gpu, [0.0; 4]).unwrap();
        let scene = surface.color_texture().unwrap();

        gpu.take_commands();
        let pass = chain.tone_map_pass(&PipelineSettings::default());
        chain.run_pass(&mut gpu, &mut surface, &pass).unwrap();

        let written = surface.color_texture().unwrap();
        assert_ne!(written, scene);
        let draw = gpu
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::Draw { sampled, .. } => Some(sampled.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(draw, vec![scene]);
        assert_eq!(
            gpu.texture_contents(written),
            Some(TextureContents::Shaded(pass.program))
        );
        assert_eq!(gpu.depth_state(), DepthState::DISABLED);
        assert_eq!(gpu.cull_mode(), None);
    }

    #[test]
    fn depth_of_field_samples_scene_depth_on_unit_one() {
        let (mut gpu, mut surface, chain) = setup(64, 64);
        gpu.begin_frame().unwrap();
        surface.begin_frame(&mut gpu, [0.0; 4]).unwrap();
        let color = surface.color_texture().unwrap();
        let depth = surface.depth_texture().unwrap();

        let pass = chain.depth_of_field_pass(&PipelineSettings::default(), 0.1, 1000.0);
        chain.run_pass(&mut gpu, &mut surface, &pass).unwrap();
        assert_eq!(gpu.bound_texture(0), Some(color));
        assert_eq!(gpu.bound_texture(1), Some(depth));
        assert_eq!(
            gpu.uniform_value(pass.program, "uDepth"),
            Some(UniformValue::Int(1))
        );
        assert_eq!(
            gpu.uniform_value(pass.program, "uResolution"),
            Some(UniformValue::Vec2([64.0, 64.0]))
        );
    }

    #[test]
    fn feedback_loop_is_refused() {
        let (_gpu, surface, _chain) = setup(32, 32);
        let (_, written) = surface.write_target().unwrap();
        let current = surface.color_texture().unwrap();
        assert!(ensure_no_feedback("tone-map", written, &[current]).is_ok());
        assert_eq!(
            ensure_no_feedback("tone-map", written, &[current, written]),
            Err(PipelineError::FeedbackLoop { label: "tone-map" })
        );
    }

    #[test]
    fn program_failure_releases_earlier_programs() {
        let mut gpu = HeadlessDevice::new(8, 8);
        let mut created = Vec::new();
        build(&mut gpu, &mut created, shaders::fxaa_program()).unwrap();
        let mut broken = shaders::dlaa_program();
        broken.body = "fn fs_main() {}";
        let err = build(&mut gpu, &mut created, broken).unwrap_err();
        assert!(matches!(err, PipelineError::Program { label: "dlaa", .. }));
        assert_eq!(gpu.live_resources(), 0);
    }

    #[test]
    fn present_with_pass_draws_to_the_surface() {
        let (mut gpu, mut surface, chain) = setup(128, 72);
        gpu.resize_surface(256, 144);
        gpu.begin_frame().unwrap();
        surface.begin_frame(&mut gpu, [0.0; 4]).unwrap();
        let fxaa = chain
            .anti_aliasing_pass(&PipelineSettings::default())
            .unwrap();
        chain.present(&mut gpu, &surface, Some(&fxaa)).unwrap();

        assert_eq!(gpu.surface_contents(), TextureContents::Shaded(fxaa.program));
        assert_eq!(gpu.viewport(), Viewport::full(256, 144));
        assert_eq!(gpu.bound_framebuffer(), None);
    }

    #[test]
    fn anti_aliasing_off_means_copy() {
        let (_gpu, _surface, chain) = setup(8, 8);
        let settings = PipelineSettings {
            anti_aliasing: AntiAliasing::Off,
            ..PipelineSettings::default()
        };
        assert!(chain.anti_aliasing_pass(&settings).is_none());
    }
}
