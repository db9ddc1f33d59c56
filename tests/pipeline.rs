use std::sync::Arc;

use glam::Vec3;
use penumbra::gpu::{
    Capabilities, Command, FramebufferStatus, GraphicsDevice, HeadlessDevice, ProgramId,
    TextureContents, TextureFormat, TextureId, Viewport,
};
use penumbra::render::{
    CameraParams, EffectChain, FrameInputs, FrameSequencer, FrameStage, PostProcessSurface,
    DEFAULT_CLEAR_COLOR,
};
use penumbra::{
    AntiAliasing, DrawItem, Light, LightSet, Mesh, MeshData, PipelineError, PipelineSettings,
    SceneDrawList, SettingsEvent, Transform,
};

struct Fixture {
    gpu: HeadlessDevice,
    sequencer: FrameSequencer,
    lights: LightSet,
    list: SceneDrawList,
}

impl Fixture {
    fn new(settings: PipelineSettings) -> Self {
        let mut gpu = HeadlessDevice::new(320, 180);
        let sequencer = FrameSequencer::new(&mut gpu, (320, 180), settings).unwrap();
        let cube = Arc::new(Mesh::upload(
            &mut gpu,
            sequencer.scene_program(),
            "cube",
            &MeshData::cube(),
        ));
        let mut list = SceneDrawList::new();
        list.push(DrawItem::new(cube.clone(), Transform::default()));
        list.push(DrawItem::new(
            cube,
            Transform::from_position(Vec3::new(2.0, 0.0, -1.0)),
        ));
        let lights: LightSet = [
            Light::directional(Vec3::new(-1.0, -2.0, -1.0), Vec3::ONE),
            Light::point(Vec3::new(0.0, 3.0, 0.0), Vec3::ONE),
        ]
        .into_iter()
        .collect();
        Self {
            gpu,
            sequencer,
            lights,
            list,
        }
    }

    fn frame(&mut self) -> Vec<FrameStage> {
        self.gpu.take_commands();
        let inputs = FrameInputs {
            camera: CameraParams::default(),
            lights: &self.lights,
            draw_list: &self.list,
        };
        self.sequencer
            .run_frame(&mut self.gpu, &inputs)
            .unwrap()
            .stages
    }
}

fn color_of(gpu: &HeadlessDevice, target: Option<penumbra::gpu::FramebufferId>) -> Option<TextureId> {
    target
        .and_then(|fb| gpu.framebuffer_desc(fb))
        .and_then(|desc| desc.color)
}

/// Walks one frame's commands and checks every effect reads what the
/// previous pass wrote, and never its own target.
fn assert_chain_is_linear(gpu: &HeadlessDevice, scene: ProgramId, effects: &[ProgramId]) -> usize {
    let mut last_written: Option<TextureId> = None;
    let mut effect_draws = 0;
    for command in gpu.commands() {
        match command {
            Command::Draw {
                program: Some(program),
                target,
                sampled,
                ..
            } => {
                if *program == scene {
                    last_written = color_of(gpu, *target);
                } else if effects.contains(program) {
                    effect_draws += 1;
                    assert_eq!(sampled.first().copied(), last_written, "effect input");
                    if let Some(fb) = target {
                        let own = gpu.attached_textures(*fb);
                        assert!(
                            sampled.iter().all(|texture| !own.contains(texture)),
                            "effect samples its own target"
                        );
                        last_written = color_of(gpu, *target);
                    }
                }
            }
            Command::Blit { source, target } => {
                assert_eq!(*target, None);
                assert_eq!(Some(*source), last_written, "present input");
            }
            _ => {}
        }
    }
    effect_draws
}

#[test]
fn every_effect_reads_the_previous_output() {
    for (cel, dof) in [(false, false), (true, false), (false, true), (true, true)] {
        for anti_aliasing in [AntiAliasing::Off, AntiAliasing::Fxaa, AntiAliasing::Dlaa] {
            let mut settings = PipelineSettings::default();
            settings.cel_shading.enabled = cel;
            settings.depth_of_field.enabled = dof;
            settings.anti_aliasing = anti_aliasing;
            let mut fixture = Fixture::new(settings);
            fixture.frame();

            let effects = fixture.sequencer.effects().programs();
            let draws = assert_chain_is_linear(
                &fixture.gpu,
                fixture.sequencer.scene_program(),
                &effects,
            );
            let expected = 1
                + usize::from(cel)
                + usize::from(dof)
                + usize::from(anti_aliasing != AntiAliasing::Off);
            assert_eq!(draws, expected, "cel={cel} dof={dof} aa={anti_aliasing:?}");
            assert_eq!(fixture.gpu.bound_framebuffer(), None);
        }
    }
}

#[test]
fn stage_order_follows_enabled_passes() {
    let mut settings = PipelineSettings::default();
    settings.cel_shading.enabled = true;
    settings.depth_of_field.enabled = true;
    let mut fixture = Fixture::new(settings);
    assert_eq!(
        fixture.frame(),
        vec![
            FrameStage::ShadowPass,
            FrameStage::MainColorPass,
            FrameStage::Stylize,
            FrameStage::DepthOfField,
            FrameStage::ToneMap,
            FrameStage::Present,
        ]
    );

    fixture.lights = LightSet::new();
    assert_eq!(
        fixture.frame(),
        vec![
            FrameStage::MainColorPass,
            FrameStage::Stylize,
            FrameStage::DepthOfField,
            FrameStage::ToneMap,
            FrameStage::Present,
        ]
    );
}

#[test]
fn presented_surface_is_shaded_by_the_last_pass() {
    let mut fixture = Fixture::new(PipelineSettings::default());
    fixture.frame();
    let fxaa = fixture.sequencer.effects().programs()[3];
    assert_eq!(fixture.gpu.surface_contents(), TextureContents::Shaded(fxaa));
    assert_eq!(fixture.gpu.frames_presented(), 1);
}

#[test]
fn empty_scene_presents_the_clear_color() {
    let mut gpu = HeadlessDevice::new(800, 800);
    let mut surface = PostProcessSurface::new(&mut gpu);
    surface.configure(&mut gpu, 800, 800).unwrap();
    let effects = EffectChain::new(&mut gpu).unwrap();

    gpu.begin_frame().unwrap();
    surface.begin_frame(&mut gpu, DEFAULT_CLEAR_COLOR).unwrap();
    effects.present(&mut gpu, &surface, None).unwrap();
    gpu.end_frame().unwrap();

    assert_eq!(
        gpu.surface_contents(),
        TextureContents::Solid(DEFAULT_CLEAR_COLOR)
    );
    assert_eq!(gpu.bound_framebuffer(), None);
    assert_eq!(gpu.viewport(), Viewport::full(800, 800));
}

#[test]
fn resize_takes_effect_at_the_next_frame() {
    let mut fixture = Fixture::new(PipelineSettings::default());
    fixture.frame();
    let baseline = fixture.gpu.live_resources();

    fixture.sequencer.request_resize(1920, 1080);
    assert_eq!(fixture.sequencer.surface().size(), (320, 180));
    fixture.frame();

    assert_eq!(fixture.sequencer.surface().size(), (1920, 1080));
    assert_eq!(fixture.gpu.surface_size(), (1920, 1080));
    let color = fixture.sequencer.surface().color_texture().unwrap();
    let desc = fixture.gpu.texture_desc(color).unwrap();
    assert_eq!((desc.width, desc.height), (1920, 1080));
    let depth = fixture.sequencer.surface().depth_texture().unwrap();
    let desc = fixture.gpu.texture_desc(depth).unwrap();
    assert_eq!((desc.width, desc.height), (1920, 1080));
    assert!(fixture
        .gpu
        .commands()
        .contains(&Command::Viewport(Viewport::full(1920, 1080))));
    assert_eq!(fixture.gpu.live_resources(), baseline);
}

#[test]
fn settings_events_apply_at_the_next_frame() {
    let mut fixture = Fixture::new(PipelineSettings::default());
    let sender = fixture.sequencer.settings_sender();
    sender.push(SettingsEvent::Shadows(false));
    sender.push(SettingsEvent::AntiAliasing(AntiAliasing::Off));
    assert!(fixture.sequencer.settings().shadows);

    let stages = fixture.frame();
    assert_eq!(
        stages,
        vec![
            FrameStage::MainColorPass,
            FrameStage::ToneMap,
            FrameStage::Present
        ]
    );
    assert!(fixture
        .gpu
        .commands()
        .iter()
        .any(|c| matches!(c, Command::Blit { target: None, .. })));
    assert!(sender.is_empty());
}

#[test]
fn low_end_device_degrades_to_eight_bit_color() {
    let mut gpu = HeadlessDevice::with_capabilities(
        64,
        64,
        Capabilities {
            float_render_targets: false,
            max_texture_size: 4096,
        },
    );
    let sequencer = FrameSequencer::new(&mut gpu, (64, 64), PipelineSettings::default()).unwrap();
    assert_eq!(
        sequencer.surface().color_format(),
        TextureFormat::Rgba8Unorm
    );
}

#[test]
fn incomplete_targets_are_fatal_and_leak_nothing() {
    let mut gpu = HeadlessDevice::with_capabilities(
        64,
        64,
        Capabilities {
            float_render_targets: true,
            max_texture_size: 1024,
        },
    );
    let err = FrameSequencer::new(&mut gpu, (64, 64), PipelineSettings::default()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::IncompleteFramebuffer {
            status: FramebufferStatus::IncompleteAttachment,
            ..
        }
    ));
    assert_eq!(gpu.live_resources(), 0);
}

#[test]
fn sequencer_release_frees_every_resource() {
    let mut gpu = HeadlessDevice::new(128, 128);
    let mut sequencer =
        FrameSequencer::new(&mut gpu, (128, 128), PipelineSettings::default()).unwrap();
    let lights = LightSet::new();
    let list = SceneDrawList::new();
    let inputs = FrameInputs {
        camera: CameraParams::default(),
        lights: &lights,
        draw_list: &list,
    };
    sequencer.run_frame(&mut gpu, &inputs).unwrap();
    sequencer.request_resize(256, 64);
    sequencer.run_frame(&mut gpu, &inputs).unwrap();
    sequencer.release(&mut gpu);
    assert_eq!(gpu.live_resources(), 0);
}
