use log::{debug, warn};

use super::target::{DepthSpec, RenderTarget, RenderTargetDesc};
use crate::error::{PipelineError, PipelineResult};
use crate::gpu::{
    BufferId, BufferKind, ClearMask, FramebufferDesc, FramebufferId, FramebufferStatus,
    GraphicsDevice, TextureFormat, TextureId, Topology, VertexArrayDesc, VertexArrayId,
    VertexAttribute, Viewport,
};

/// Two triangles covering clip space, drawn as a 4-vertex strip.
///
/// One buffer holds the four positions followed by the four UVs; slot 0
/// reads positions from offset 0, slot 1 reads UVs from offset 32.
#[derive(Debug)]
pub struct FullscreenQuad {
    buffer: BufferId,
    vertex_array: VertexArrayId,
}

impl FullscreenQuad {
    pub const POSITION_SLOT: u32 = 0;
    pub const UV_SLOT: u32 = 1;
    const UV_OFFSET: u32 = 32;

    #[rustfmt::skip]
    const DATA: [f32; 16] = [
        // positions
        -1.0, -1.0,   1.0, -1.0,   -1.0, 1.0,   1.0, 1.0,
        // uvs
        0.0, 0.0,   1.0, 0.0,   0.0, 1.0,   1.0, 1.0,
    ];

    pub fn create(gpu: &mut dyn GraphicsDevice) -> Self {
        let buffer = gpu.create_buffer(
            BufferKind::Vertex,
            "fullscreen-quad",
            bytemuck::cast_slice(&Self::DATA),
        );
        let vertex_array = gpu.create_vertex_array(&VertexArrayDesc {
            label: "fullscreen-quad",
            attributes: vec![
                VertexAttribute {
                    location: Self::POSITION_SLOT,
                    buffer,
                    components: 2,
                    stride: 8,
                    offset: 0,
                },
                VertexAttribute {
                    location: Self::UV_SLOT,
                    buffer,
                    components: 2,
                    stride: 8,
                    offset: Self::UV_OFFSET,
                },
            ],
            index: None,
        });
        Self {
            buffer,
            vertex_array,
        }
    }

    pub fn draw(&self, gpu: &mut dyn GraphicsDevice) {
        gpu.bind_vertex_array(Some(self.vertex_array));
        gpu.draw_arrays(Topology::TriangleStrip, 0, 4);
    }

    pub fn release(self, gpu: &mut dyn GraphicsDevice) {
        gpu.delete_vertex_array(self.vertex_array);
        gpu.delete_buffer(self.buffer);
    }
}

/// One half of the ping-pong pair: a color+depth target for the scene pass
/// and a color-only framebuffer over the same color texture for effects.
#[derive(Debug)]
struct BufferSet {
    target: RenderTarget,
    color_only: FramebufferId,
}

impl BufferSet {
    fn create(
        gpu: &mut dyn GraphicsDevice,
        label: &'static str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> PipelineResult<Self> {
        let target = RenderTarget::create(
            gpu,
            &RenderTargetDesc {
                label,
                width,
                height,
                color: Some(format),
                depth: DepthSpec::Texture,
            },
        )?;
        let color_only = gpu.create_framebuffer(&FramebufferDesc {
            label,
            color: target.color_texture(),
            depth: None,
        });
        let status = gpu.framebuffer_status(color_only);
        if status != FramebufferStatus::Complete {
            gpu.delete_framebuffer(color_only);
            target.release(gpu);
            return Err(PipelineError::IncompleteFramebuffer { label, status });
        }
        Ok(Self { target, color_only })
    }

    fn release(self, gpu: &mut dyn GraphicsDevice) {
        gpu.delete_framebuffer(self.color_only);
        self.target.release(gpu);
    }

    fn color(&self) -> TextureId {
        // Buffer sets are always created with a color attachment.
        self.target
            .color_texture()
            .unwrap_or_else(|| unreachable!("buffer set without color"))
    }
}

/// Screen-sized offscreen surface with ping-pong buffers.
///
/// The main color pass renders into buffer set 0. Each effect pass reads the
/// current buffer and writes the other one, so no pass ever samples the
/// texture it renders to.
#[derive(Debug)]
pub struct PostProcessSurface {
    sets: Option<[BufferSet; 2]>,
    current: usize,
    width: u32,
    height: u32,
    color_format: TextureFormat,
    generation: u64,
    quad: FullscreenQuad,
}

impl PostProcessSurface {
    pub fn new(gpu: &mut dyn GraphicsDevice) -> Self {
        Self {
            sets: None,
            current: 0,
            width: 0,
            height: 0,
            color_format: TextureFormat::Rgba16Float,
            generation: 0,
            quad: FullscreenQuad::create(gpu),
        }
    }

    /// (Re)allocates both buffer sets at `width` x `height`.
    ///
    /// The previous generation is released before the new one is created.
    pub fn configure(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        width: u32,
        height: u32,
    ) -> PipelineResult<()> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidSize { width, height });
        }
        if let Some(sets) = self.sets.take() {
            for set in sets {
                set.release(gpu);
            }
        }

        let format = if gpu.capabilities().float_render_targets {
            TextureFormat::Rgba16Float
        } else {
            warn!("float render targets unavailable; post-processing in 8-bit");
            TextureFormat::Rgba8Unorm
        };

        let first = BufferSet::create(gpu, "post-a", width, height, format)?;
        let second = match BufferSet::create(gpu, "post-b", width, height, format) {
            Ok(set) => set,
            Err(err) => {
                first.release(gpu);
                return Err(err);
            }
        };

        self.sets = Some([first, second]);
        self.current = 0;
        self.width = width;
        self.height = height;
        self.color_format = format;
        self.generation += 1;
        debug!(
            "post-process surface configured at {width}x{height} (generation {})",
            self.generation
        );
        Ok(())
    }

    /// Binds the scene target, sets the viewport and clears color and depth.
    pub fn begin_frame(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        clear_color: [f32; 4],
    ) -> PipelineResult<()> {
        let sets = self.sets.as_ref().ok_or(PipelineError::NotConfigured)?;
        self.current = 0;
        sets[0].target.bind(gpu);
        gpu.set_clear_color(clear_color);
        gpu.clear(ClearMask::ALL);
        Ok(())
    }

    /// Texture holding the most recent output.
    pub fn color_texture(&self) -> Option<TextureId> {
        self.sets.as_ref().map(|sets| sets[self.current].color())
    }

    /// Scene depth written by the main color pass.
    pub fn depth_texture(&self) -> Option<TextureId> {
        self.sets
            .as_ref()
            .and_then(|sets| sets[0].target.depth_texture())
    }

    /// Framebuffer the next effect pass writes to, and its color texture.
    pub(crate) fn write_target(&self) -> Option<(FramebufferId, TextureId)> {
        self.sets.as_ref().map(|sets| {
            let next = &sets[1 - self.current];
            (next.color_only, next.color())
        })
    }

    pub(crate) fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::full(self.width, self.height)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_configured(&self) -> bool {
        self.sets.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn color_format(&self) -> TextureFormat {
        self.color_format
    }

    pub fn quad(&self) -> &FullscreenQuad {
        &self.quad
    }

    pub fn release(self, gpu: &mut dyn GraphicsDevice) {
        if let Some(sets) = self.sets {
            for set in sets {
                set.release(gpu);
            }
        }
        self.quad.release(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Capabilities, Command, HeadlessDevice};

    fn configured(width: u32, height: u32) -> (HeadlessDevice, PostProcessSurface) {
        let mut gpu = HeadlessDevice::new(width, height);
        let mut surface = PostProcessSurface::new(&mut gpu);
        surface.configure(&mut gpu, width, height).unwrap();
        (gpu, surface)
    }

    #[test]
    fn attachments_match_configured_size() {
        let (gpu, surface) = configured(640, 360);
        let color = gpu.texture_desc(surface.color_texture().unwrap()).unwrap();
        let depth = gpu.texture_desc(surface.depth_texture().unwrap()).unwrap();
        assert_eq!((color.width, color.height), (640, 360));
        assert_eq!((depth.width, depth.height), (640, 360));
        assert_eq!(color.format, TextureFormat::Rgba16Float);
    }

    #[test]
    fn reconfigure_with_same_size_does_not_leak() {
        let (mut gpu, mut surface) = configured(320, 240);
        let live = gpu.live_resources();
        surface.configure(&mut gpu, 320, 240).unwrap();
        assert_eq!(gpu.live_resources(), live);
        assert_eq!(surface.size(), (320, 240));
        assert_eq!(surface.generation(), 2);
    }

    #[test]
    fn resize_reallocates_and_updates_viewport() {
        let (mut gpu, mut surface) = configured(800, 800);
        surface.configure(&mut gpu, 1920, 1080).unwrap();
        let color = gpu.texture_desc(surface.color_texture().unwrap()).unwrap();
        assert_eq!((color.width, color.height), (1920, 1080));

        gpu.take_commands();
        surface.begin_frame(&mut gpu, [0.0; 4]).unwrap();
        assert!(gpu
            .commands()
            .contains(&Command::Viewport(Viewport::full(1920, 1080))));
    }

    #[test]
    fn zero_size_is_rejected_without_touching_buffers() {
        let (mut gpu, mut surface) = configured(64, 64);
        let color = surface.color_texture();
        let err = surface.configure(&mut gpu, 0, 64).unwrap_err();
        assert_eq!(err, PipelineError::InvalidSize { width: 0, height: 64 });
        assert_eq!(surface.color_texture(), color);
    }

    #[test]
    fn begin_frame_requires_configuration() {
        let mut gpu = HeadlessDevice::new(8, 8);
        let mut surface = PostProcessSurface::new(&mut gpu);
        assert_eq!(
            surface.begin_frame(&mut gpu, [0.0; 4]),
            Err(PipelineError::NotConfigured)
        );
    }

    #[test]
    fn falls_back_to_eight_bit_color() {
        let mut gpu = HeadlessDevice::with_capabilities(
            32,
            32,
            Capabilities {
                float_render_targets: false,
                max_texture_size: 4096,
            },
        );
        let mut surface = PostProcessSurface::new(&mut gpu);
        surface.configure(&mut gpu, 32, 32).unwrap();
        assert_eq!(surface.color_format(), TextureFormat::Rgba8Unorm);
    }

    #[test]
    fn oversized_surface_fails_cleanly() {
        let mut gpu = HeadlessDevice::with_capabilities(
            32,
            32,
            Capabilities {
                float_render_targets: true,
                max_texture_size: 256,
            },
        );
        let mut surface = PostProcessSurface::new(&mut gpu);
        let baseline = gpu.live_resources();
        assert!(matches!(
            surface.configure(&mut gpu, 512, 512),
            Err(PipelineError::IncompleteFramebuffer { .. })
        ));
        assert_eq!(gpu.live_resources(), baseline);
        assert!(!surface.is_configured());
    }

    #[test]
    fn write_target_is_never_the_current_buffer() {
        let (_gpu, mut surface) = configured(16, 16);
        for _ in 0..3 {
            let (_, written) = surface.write_target().unwrap();
            assert_ne!(Some(written), surface.color_texture());
            surface.swap();
            assert_eq!(Some(written), surface.color_texture());
        }
    }
}
