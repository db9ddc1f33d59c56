//! Demo scene and the two frame drivers used by the binary.
//!
//! [`run_headless`] renders a fixed number of frames on a [`HeadlessDevice`];
//! [`run_windowed`] opens a window and renders on [`WgpuDevice`] until the
//! window closes or the frame budget is spent.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use glam::Vec3;
use log::{debug, error, info, warn};
use pollster::block_on;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::config::PipelineSettings;
use crate::error::{DeviceError, PipelineError};
use crate::gpu::{
    FilterMode, GraphicsDevice, HeadlessDevice, ProgramId, TextureDesc, TextureFormat,
    TextureId, WgpuDevice, WrapMode,
};
use crate::mesh::{Mesh, MeshData};
use crate::render::{CameraParams, FrameInputs, FrameSequencer, FrameStage};
use crate::scene::{DrawItem, Light, LightSet, SceneDrawList, Transform};
use crate::schedule::{FrameLoop, FrameScheduler};

/// Frames rendered by a headless run when no budget is given.
pub const DEFAULT_HEADLESS_FRAMES: u64 = 3;

const CHECKER_SIZE: u32 = 64;
const CHECKER_CELLS: u32 = 8;
const SPIN_SPEED: f32 = 0.6;

/// How a run is set up.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stop after this many frames; `None` runs until the window closes.
    pub frames: Option<u64>,
    pub size: (u32, u32),
    pub settings: PipelineSettings,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            frames: None,
            size: (1280, 720),
            settings: PipelineSettings::default(),
        }
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub size: (u32, u32),
    pub last_stages: Vec<FrameStage>,
    /// GPU resources still alive after everything was released.
    pub live_resources: usize,
}

/// Light rig of the demo: one shadow-casting sun, two point lights and a spot.
pub fn default_lights() -> LightSet {
    [
        Light::directional(Vec3::new(-3.0, -4.0, -2.0), Vec3::splat(0.9)),
        Light::point(Vec3::new(13.0, 5.0, 0.0), Vec3::new(1.0, 0.5, 0.5)),
        Light::point(Vec3::new(0.0, -5.0, 0.0), Vec3::new(0.5, 1.0, 0.5)),
        Light::spot(
            Vec3::new(2.0, 5.0, 2.0),
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(0.5, 0.5, 1.0),
        ),
    ]
    .into_iter()
    .collect()
}

/// RGBA8 checkerboard, `size` pixels square with `cells` cells per side.
pub fn checker_pixels(size: u32, cells: u32) -> Vec<u8> {
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let value = if (x / cell + y / cell) % 2 == 0 { 230 } else { 60 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

/// A ground plane, a spinning textured cube and a second plain cube.
#[derive(Debug)]
pub struct DemoScene {
    lights: LightSet,
    draw_list: SceneDrawList,
    meshes: Vec<Arc<Mesh>>,
    albedo: TextureId,
    spinner: usize,
}

impl DemoScene {
    /// Uploads the demo meshes against `program`, the scene program.
    pub fn build(gpu: &mut dyn GraphicsDevice, program: ProgramId) -> Self {
        let cube = Arc::new(Mesh::upload(gpu, program, "cube", &MeshData::cube()));
        let ground = Arc::new(Mesh::upload(gpu, program, "ground", &MeshData::plane(20.0)));

        let albedo = gpu.create_texture(&TextureDesc {
            filter: FilterMode::Nearest,
            wrap: WrapMode::Repeat,
            ..TextureDesc::new("checker", CHECKER_SIZE, CHECKER_SIZE, TextureFormat::Rgba8Unorm)
        });
        gpu.write_texture(albedo, &checker_pixels(CHECKER_SIZE, CHECKER_CELLS));

        let mut draw_list = SceneDrawList::new();
        draw_list.push(DrawItem::new(
            ground.clone(),
            Transform::from_position(Vec3::new(0.0, -1.0, 0.0)),
        ));
        let spinner = draw_list.push(
            DrawItem::new(
                cube.clone(),
                Transform {
                    scale: Vec3::splat(1.5),
                    ..Transform::from_position(Vec3::new(0.0, 0.5, 0.0))
                },
            )
            .with_texture(albedo),
        );
        draw_list.push(DrawItem::new(
            cube.clone(),
            Transform::from_position(Vec3::new(3.0, 0.0, -2.0)),
        ));

        Self {
            lights: default_lights(),
            draw_list,
            meshes: vec![cube, ground],
            albedo,
            spinner,
        }
    }

    pub fn lights(&self) -> &LightSet {
        &self.lights
    }

    pub fn draw_list(&self) -> &SceneDrawList {
        &self.draw_list
    }

    /// Turns the textured cube by `dt` seconds worth of rotation.
    pub fn advance(&mut self, dt: f32) {
        if let Some(item) = self.draw_list.get_mut(self.spinner) {
            item.transform_mut().rotation.y += dt * SPIN_SPEED;
            item.refresh_world();
        }
    }

    pub fn inputs(&self, aspect: f32) -> FrameInputs<'_> {
        FrameInputs {
            camera: CameraParams::look_at(Vec3::new(0.0, 3.0, 10.0), Vec3::ZERO, aspect),
            lights: &self.lights,
            draw_list: &self.draw_list,
        }
    }

    pub fn release(self, gpu: &mut dyn GraphicsDevice) {
        let Self {
            draw_list,
            meshes,
            albedo,
            ..
        } = self;
        drop(draw_list);
        for mesh in meshes {
            match Arc::try_unwrap(mesh) {
                Ok(mesh) => mesh.release(gpu),
                Err(mesh) => warn!("mesh {} still shared; not released", mesh.label()),
            }
        }
        gpu.delete_texture(albedo);
    }
}

fn aspect_of((width, height): (u32, u32)) -> f32 {
    if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

/// Renders on the recording device until the frame budget is spent.
pub fn run_headless(options: &RunOptions) -> Result<RunSummary> {
    let (width, height) = options.size;
    let mut gpu = HeadlessDevice::new(width, height);
    let mut sequencer = FrameSequencer::new(&mut gpu, options.size, options.settings)
        .context("failed to build the render pipeline")?;
    let mut scene = DemoScene::build(&mut gpu, sequencer.scene_program());

    let mut frames = FrameLoop::with_budget(options.frames.unwrap_or(DEFAULT_HEADLESS_FRAMES));
    frames.start();
    let mut last_stages = Vec::new();
    while let Some(tick) = frames.poll() {
        scene.advance(tick.dt);
        let inputs = scene.inputs(aspect_of(sequencer.surface().size()));
        let report = sequencer
            .run_frame(&mut gpu, &inputs)
            .with_context(|| format!("frame {} failed", tick.frame_index))?;
        debug!("frame {} ran {:?}", report.frame_index, report.stages);
        last_stages = report.stages;
        frames.request_frame();
    }

    let size = sequencer.surface().size();
    scene.release(&mut gpu);
    sequencer.release(&mut gpu);
    let summary = RunSummary {
        frames: frames.frames_produced(),
        size,
        last_stages,
        live_resources: gpu.live_resources(),
    };
    info!(
        "headless run finished: {} frame(s) at {}x{}",
        summary.frames, size.0, size.1
    );
    Ok(summary)
}

/// Window or GPU could not be brought up; callers may fall back to headless.
#[derive(Debug)]
pub struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_panic(stage: &str, panic: Box<dyn Any + Send>) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {}", panic_message(panic)),
        }
    }

    fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}

/// Opens a window and renders on the GPU.
pub fn run_windowed(options: &RunOptions) -> Result<RunSummary> {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let event_loop = event_loop
        .map_err(|panic| WindowInitError::from_panic("event loop", panic))?
        .map_err(|err| WindowInitError::from_error("event loop", err))?;

    let mut app = WindowedApp::new(options.clone());
    event_loop
        .run_app(&mut app)
        .context("event loop terminated with error")?;
    app.finish()
}

struct WindowState {
    window: Arc<Window>,
    gpu: WgpuDevice,
    sequencer: FrameSequencer,
    scene: DemoScene,
}

impl WindowState {
    fn create(event_loop: &ActiveEventLoop, options: &RunOptions) -> Result<Self> {
        let (width, height) = options.size;
        let attributes = Window::default_attributes()
            .with_title("penumbra")
            .with_inner_size(PhysicalSize::new(width, height));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(|err| WindowInitError::from_error("window", err))?,
        );
        let mut gpu = block_on(WgpuDevice::new(Arc::clone(&window)))
            .map_err(|err| WindowInitError::from_error("GPU device", format!("{err:#}")))?;

        let size = window.inner_size();
        let sequencer =
            FrameSequencer::new(&mut gpu, (size.width, size.height), options.settings)
                .context("failed to build the render pipeline")?;
        let scene = DemoScene::build(&mut gpu, sequencer.scene_program());
        Ok(Self {
            window,
            gpu,
            sequencer,
            scene,
        })
    }

    /// Renders one frame. Surface loss and timeouts skip the frame.
    fn render(&mut self, dt: f32) -> Result<Option<Vec<FrameStage>>> {
        self.scene.advance(dt);
        let inputs = self.scene.inputs(aspect_of(self.sequencer.surface().size()));
        match self.sequencer.run_frame(&mut self.gpu, &inputs) {
            Ok(report) => Ok(Some(report.stages)),
            Err(PipelineError::Device(DeviceError::SurfaceLost)) => {
                debug!("surface lost; frame skipped");
                Ok(None)
            }
            Err(PipelineError::Device(DeviceError::SurfaceTimeout)) => {
                info!("surface timeout; retrying next frame");
                Ok(None)
            }
            Err(PipelineError::Device(DeviceError::OutOfMemory)) => {
                Err(anyhow!("GPU is out of memory"))
            }
            Err(err) => Err(err).context("frame failed"),
        }
    }

    fn shutdown(self) -> ((u32, u32), usize) {
        let Self {
            window,
            mut gpu,
            sequencer,
            scene,
        } = self;
        let size = sequencer.surface().size();
        scene.release(&mut gpu);
        sequencer.release(&mut gpu);
        let live = gpu.live_resources();
        drop(gpu);
        drop(window);
        (size, live)
    }
}

struct WindowedApp {
    options: RunOptions,
    state: Option<WindowState>,
    frames: FrameLoop,
    last_stages: Vec<FrameStage>,
    error: Option<anyhow::Error>,
}

impl WindowedApp {
    fn new(options: RunOptions) -> Self {
        let frames = match options.frames {
            Some(budget) => FrameLoop::with_budget(budget),
            None => FrameLoop::new(),
        };
        Self {
            options,
            state: None,
            frames,
            last_stages: Vec::new(),
            error: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.error = Some(err);
        self.frames.cancel();
        event_loop.exit();
    }

    fn finish(mut self) -> Result<RunSummary> {
        let (size, live_resources) = match self.state.take() {
            Some(state) => state.shutdown(),
            None => (self.options.size, 0),
        };
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(RunSummary {
            frames: self.frames.frames_produced(),
            size,
            last_stages: self.last_stages,
            live_resources,
        })
    }
}

impl ApplicationHandler for WindowedApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        match WindowState::create(event_loop, &self.options) {
            Ok(state) => {
                state.window.request_redraw();
                self.state = Some(state);
                self.frames.start();
            }
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.frames.is_finished() {
            event_loop.exit();
            return;
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.frames.stop();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                state.sequencer.request_resize(size.width, size.height);
                state.window.request_redraw();
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                let size = state.window.inner_size();
                state.sequencer.request_resize(size.width, size.height);
                state.window.request_redraw();
            }
            WindowEvent::RedrawRequested => {
                let Some(tick) = self.frames.poll() else {
                    return;
                };
                match state.render(tick.dt) {
                    Ok(Some(stages)) => self.last_stages = stages,
                    Ok(None) => {}
                    Err(err) => {
                        self.fail(event_loop, err);
                        return;
                    }
                }
                self.frames.request_frame();
                if self.frames.is_finished() {
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AntiAliasing;

    #[test]
    fn demo_lights_match_the_default_rig() {
        let lights = default_lights();
        assert_eq!(lights.directional().count(), 1);
        assert_eq!(lights.points().count(), 2);
        assert_eq!(lights.spots().count(), 1);
        assert_eq!(
            lights.shadow_caster().map(|l| l.direction),
            Some(Vec3::new(-3.0, -4.0, -2.0))
        );
    }

    #[test]
    fn checker_alternates_cells() {
        let pixels = checker_pixels(4, 2);
        assert_eq!(pixels.len(), 4 * 4 * 4);
        assert_eq!(&pixels[0..4], &[230, 230, 230, 255]);
        // Third pixel of the first row starts the second cell.
        assert_eq!(&pixels[8..12], &[60, 60, 60, 255]);
    }

    #[test]
    fn demo_scene_releases_everything_it_uploaded() {
        let mut gpu = HeadlessDevice::new(32, 32);
        let pass = crate::render::MainColorPass::new(&mut gpu).unwrap();
        let before = gpu.live_resources();
        let mut scene = DemoScene::build(&mut gpu, pass.program());
        assert_eq!(scene.draw_list().len(), 3);
        let start = scene.draw_list().iter().nth(1).map(|item| item.world());
        scene.advance(1.0);
        assert_ne!(scene.draw_list().iter().nth(1).map(|item| item.world()), start);
        scene.release(&mut gpu);
        assert_eq!(gpu.live_resources(), before);
    }

    #[test]
    fn headless_run_renders_the_budget_and_leaks_nothing() {
        let options = RunOptions {
            frames: Some(2),
            size: (320, 180),
            settings: PipelineSettings::default(),
        };
        let summary = run_headless(&options).unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.size, (320, 180));
        assert_eq!(summary.live_resources, 0);
        assert_eq!(
            summary.last_stages,
            vec![
                FrameStage::ShadowPass,
                FrameStage::MainColorPass,
                FrameStage::ToneMap,
                FrameStage::Present
            ]
        );
    }

    #[test]
    fn headless_run_honours_settings() {
        let mut settings = PipelineSettings::default();
        settings.shadows = false;
        settings.anti_aliasing = AntiAliasing::Off;
        settings.cel_shading.enabled = true;
        let summary = run_headless(&RunOptions {
            frames: Some(1),
            size: (64, 64),
            settings,
        })
        .unwrap();
        assert_eq!(
            summary.last_stages,
            vec![
                FrameStage::MainColorPass,
                FrameStage::Stylize,
                FrameStage::ToneMap,
                FrameStage::Present
            ]
        );
    }
}
