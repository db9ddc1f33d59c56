use glam::Vec3;
use log::trace;

use super::common::{FrameInputs, ALBEDO_UNIT};
use super::lighting::LightingUploader;
use super::shaders;
use super::shadow::ShadowPass;
use crate::error::{PipelineError, PipelineResult};
use crate::gpu::{set_named_uniform, DepthState, Face, GraphicsDevice, ProgramId};

/// Draws the scene with the lit program into whatever target is bound.
#[derive(Debug)]
pub struct MainColorPass {
    program: ProgramId,
}

impl MainColorPass {
    pub fn new(gpu: &mut dyn GraphicsDevice) -> PipelineResult<Self> {
        let program = gpu
            .create_program(&shaders::scene_program())
            .map_err(|source| PipelineError::Program {
                label: "scene",
                source,
            })?;
        Ok(Self { program })
    }

    /// Program meshes should be uploaded against.
    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn render(
        &self,
        gpu: &mut dyn GraphicsDevice,
        uploader: &mut LightingUploader,
        inputs: &FrameInputs<'_>,
        ambient: Vec3,
        shadow: Option<&ShadowPass>,
    ) {
        let FrameInputs {
            camera,
            lights,
            draw_list,
        } = *inputs;
        let program = self.program;
        gpu.use_program(program);
        set_named_uniform(gpu, program, "mProj", camera.projection);
        set_named_uniform(gpu, program, "mView", camera.view);
        uploader.upload(gpu, program, lights, camera.position, ambient);
        uploader.upload_shadow(gpu, program, shadow);

        gpu.set_depth_state(DepthState::LESS);
        gpu.set_cull_mode(Some(Face::Back));
        set_named_uniform(gpu, program, "uSampler", ALBEDO_UNIT as i32);

        for item in draw_list.iter() {
            set_named_uniform(gpu, program, "mWorld", item.world());
            gpu.bind_texture(ALBEDO_UNIT, item.texture);
            item.mesh.draw(gpu);
        }
        trace!("main color pass drew {} item(s)", draw_list.len());
    }

    pub fn release(self, gpu: &mut dyn GraphicsDevice) {
        gpu.delete_program(self.program);
    }
}
