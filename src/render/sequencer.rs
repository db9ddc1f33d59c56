use log::{debug, info};

use super::common::FrameInputs;
use super::effects::EffectChain;
use super::lighting::LightingUploader;
use super::post::PostProcessSurface;
use super::scene_pass::MainColorPass;
use super::shadow::{ShadowPass, ShadowSettings};
use crate::config::{PipelineSettings, SettingsQueue};
use crate::error::PipelineResult;
use crate::gpu::{GraphicsDevice, ProgramId};

/// Stages of a frame, in the only order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStage {
    ShadowPass,
    MainColorPass,
    Stylize,
    DepthOfField,
    ToneMap,
    Present,
}

/// What a finished frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub stages: Vec<FrameStage>,
    pub size: (u32, u32),
    pub draw_count: usize,
}

/// Owns every pass and runs them in order once per frame.
///
/// Resizes and settings changes are queued and take effect at the start of
/// the next frame, never while one is being recorded.
#[derive(Debug)]
pub struct FrameSequencer {
    surface: PostProcessSurface,
    shadow: ShadowPass,
    main: MainColorPass,
    effects: EffectChain,
    uploader: LightingUploader,
    queue: SettingsQueue,
    settings: PipelineSettings,
    pending_resize: Option<(u32, u32)>,
    frame_index: u64,
}

impl FrameSequencer {
    pub fn new(
        gpu: &mut dyn GraphicsDevice,
        size: (u32, u32),
        settings: PipelineSettings,
    ) -> PipelineResult<Self> {
        Self::with_shadow_settings(gpu, size, settings, ShadowSettings::default())
    }

    pub fn with_shadow_settings(
        gpu: &mut dyn GraphicsDevice,
        (width, height): (u32, u32),
        settings: PipelineSettings,
        shadow_settings: ShadowSettings,
    ) -> PipelineResult<Self> {
        let mut surface = PostProcessSurface::new(gpu);
        if let Err(err) = surface.configure(gpu, width, height) {
            surface.release(gpu);
            return Err(err);
        }
        let shadow = match ShadowPass::new(gpu, shadow_settings) {
            Ok(shadow) => shadow,
            Err(err) => {
                surface.release(gpu);
                return Err(err);
            }
        };
        let main = match MainColorPass::new(gpu) {
            Ok(main) => main,
            Err(err) => {
                shadow.release(gpu);
                surface.release(gpu);
                return Err(err);
            }
        };
        let effects = match EffectChain::new(gpu) {
            Ok(effects) => effects,
            Err(err) => {
                main.release(gpu);
                shadow.release(gpu);
                surface.release(gpu);
                return Err(err);
            }
        };
        gpu.resize_surface(width, height);
        info!("render pipeline ready at {width}x{height}");

        Ok(Self {
            surface,
            shadow,
            main,
            effects,
            uploader: LightingUploader::new(),
            queue: SettingsQueue::new(),
            settings,
            pending_resize: None,
            frame_index: 0,
        })
    }

    /// Records and presents one frame.
    pub fn run_frame(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        inputs: &FrameInputs<'_>,
    ) -> PipelineResult<FrameReport> {
        self.apply_pending_resize(gpu)?;
        self.queue.drain_into(&mut self.settings);
        let settings = self.settings;

        gpu.begin_frame()?;
        let mut stages = Vec::with_capacity(6);

        let caster = if settings.shadows {
            inputs.lights.shadow_caster()
        } else {
            None
        };
        if let Some(light) = caster {
            self.shadow.render(
                gpu,
                inputs.draw_list,
                light.direction,
                inputs.camera.position,
            );
            stages.push(FrameStage::ShadowPass);
        }

        self.surface.begin_frame(gpu, settings.clear_color)?;
        self.main.render(
            gpu,
            &mut self.uploader,
            inputs,
            settings.ambient,
            caster.map(|_| &self.shadow),
        );
        stages.push(FrameStage::MainColorPass);

        if settings.cel_shading.enabled {
            let pass = self
                .effects
                .cel_shading_pass(&settings, self.surface.size());
            self.effects.run_pass(gpu, &mut self.surface, &pass)?;
            stages.push(FrameStage::Stylize);
        }
        if settings.depth_of_field.enabled {
            let pass = self.effects.depth_of_field_pass(
                &settings,
                inputs.camera.near,
                inputs.camera.far,
            );
            self.effects.run_pass(gpu, &mut self.surface, &pass)?;
            stages.push(FrameStage::DepthOfField);
        }

        let tone_map = self.effects.tone_map_pass(&settings);
        self.effects.run_pass(gpu, &mut self.surface, &tone_map)?;
        stages.push(FrameStage::ToneMap);

        let anti_aliasing = self.effects.anti_aliasing_pass(&settings);
        self.effects
            .present(gpu, &self.surface, anti_aliasing.as_ref())?;
        stages.push(FrameStage::Present);
        gpu.end_frame()?;

        let report = FrameReport {
            frame_index: self.frame_index,
            stages,
            size: self.surface.size(),
            draw_count: inputs.draw_list.len(),
        };
        self.frame_index += 1;
        Ok(report)
    }

    /// Queues a resize for the start of the next frame. The latest request wins.
    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.pending_resize = Some((width, height));
    }

    fn apply_pending_resize(&mut self, gpu: &mut dyn GraphicsDevice) -> PipelineResult<()> {
        let Some((width, height)) = self.pending_resize.take() else {
            return Ok(());
        };
        if width == 0 || height == 0 {
            debug!("ignoring resize to {width}x{height}");
            return Ok(());
        }
        self.surface.configure(gpu, width, height)?;
        gpu.resize_surface(width, height);
        debug!("resized pipeline to {width}x{height}");
        Ok(())
    }

    /// Handle for posting settings changes from anywhere.
    pub fn settings_sender(&self) -> SettingsQueue {
        self.queue.clone()
    }

    /// Snapshot used by the most recent frame.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Program meshes must be uploaded against to be drawn by both passes.
    pub fn scene_program(&self) -> ProgramId {
        self.main.program()
    }

    pub fn surface(&self) -> &PostProcessSurface {
        &self.surface
    }

    pub fn shadow(&self) -> &ShadowPass {
        &self.shadow
    }

    pub fn effects(&self) -> &EffectChain {
        &self.effects
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn release(self, gpu: &mut dyn GraphicsDevice) {
        self.effects.release(gpu);
        self.main.release(gpu);
        self.shadow.release(gpu);
        self.surface.release(gpu);
    }
}
