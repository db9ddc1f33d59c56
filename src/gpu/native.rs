use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, warn};
use wgpu::util::DeviceExt;
use winit::window::{Window, WindowId};

use super::{
    BufferId, BufferKind, Capabilities, ClearMask, CompareFunc, DepthAttachment, DepthState,
    Face, FilterMode, FramebufferDesc, FramebufferId, FramebufferStatus, GraphicsDevice,
    IndexFormat, ProgramDesc, ProgramId, RenderbufferId, SampleKind, SamplerDecl, TextureDesc,
    TextureFormat, TextureId, Topology, UniformLayout, UniformLocation, UniformValue,
    VertexArrayDesc, VertexArrayId, Viewport, WrapMode, MAX_TEXTURE_UNITS,
};
use crate::error::DeviceError;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// [`GraphicsDevice`] on wgpu, presenting to a winit window.
///
/// Framebuffer binds, clears and draws are turned into render passes on a
/// per-frame encoder. Pipelines are cached per program, target formats,
/// depth/cull state and vertex layout.
pub struct WgpuDevice {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    capabilities: Capabilities,
    next_id: u32,
    textures: HashMap<u32, GpuTexture>,
    renderbuffers: HashMap<u32, GpuTexture>,
    framebuffers: HashMap<u32, FramebufferDesc>,
    buffers: HashMap<u32, wgpu::Buffer>,
    vertex_arrays: HashMap<u32, VertexArrayDesc>,
    programs: HashMap<u32, GpuProgram>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    samplers: HashMap<(FilterMode, WrapMode), wgpu::Sampler>,
    depth_sampler: wgpu::Sampler,
    fallback_color: GpuTexture,
    fallback_depth: GpuTexture,
    copy_program: ProgramId,
    state: BindState,
    pending_clear: Option<PendingClear>,
    frame: Option<Frame>,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDesc,
    valid: bool,
}

struct GpuProgram {
    desc: ProgramDesc,
    module: wgpu::ShaderModule,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    data: Vec<u8>,
    units: Vec<i32>,
}

struct BindState {
    bound: Option<FramebufferId>,
    viewport: Option<Viewport>,
    clear_color: [f32; 4],
    depth: DepthState,
    cull: Option<Face>,
    program: Option<ProgramId>,
    vertex_array: Option<VertexArrayId>,
    units: [Option<TextureId>; MAX_TEXTURE_UNITS as usize],
}

#[derive(Clone, Copy)]
struct PendingClear {
    mask: ClearMask,
    color: [f32; 4],
}

struct Frame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    color: Option<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
    topology: Topology,
    cull: Option<Face>,
    depth_state: DepthState,
    vertex: Vec<(u32, u32, u32)>,
}

#[derive(Clone, Copy)]
enum DrawCall {
    Arrays { first: u32, count: u32 },
    Elements { count: u32 },
}

struct TargetViews<'a> {
    color: Option<&'a wgpu::TextureView>,
    depth: Option<&'a wgpu::TextureView>,
}

impl WgpuDevice {
    /// Creates the device and configures the window surface.
    pub async fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Err(anyhow!("window has zero area"));
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance
            .create_surface(Arc::clone(&window))
            .context("failed to create wgpu surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to acquire GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("penumbra-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format = choose_surface_format(&surface_caps).context("no supported surface formats")?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width,
            height: size.height,
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let float_features = adapter.get_texture_format_features(wgpu::TextureFormat::Rgba16Float);
        let capabilities = Capabilities {
            float_render_targets: float_features
                .allowed_usages
                .contains(wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING),
            max_texture_size: device.limits().max_texture_dimension_2d,
        };
        debug!("surface format {format:?}, capabilities {capabilities:?}");

        let mut samplers = HashMap::new();
        for filter in [FilterMode::Linear, FilterMode::Nearest] {
            for wrap in [WrapMode::ClampToEdge, WrapMode::Repeat] {
                samplers.insert((filter, wrap), create_sampler(&device, filter, wrap));
            }
        }
        let depth_sampler = create_sampler(&device, FilterMode::Nearest, WrapMode::ClampToEdge);

        let fallback_color = create_gpu_texture(
            &device,
            &TextureDesc::new("fallback-color", 1, 1, TextureFormat::Rgba8Unorm),
            true,
        );
        write_pixels(&queue, &fallback_color, &[255, 255, 255, 255]);
        let fallback_depth = create_gpu_texture(
            &device,
            &TextureDesc::new("fallback-depth", 1, 1, TextureFormat::Depth32Float),
            true,
        );
        clear_depth_once(&device, &queue, &fallback_depth.view);

        let mut gpu = Self {
            window,
            surface,
            device,
            queue,
            config,
            capabilities,
            next_id: 1,
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            samplers,
            depth_sampler,
            fallback_color,
            fallback_depth,
            copy_program: ProgramId(0),
            state: BindState {
                bound: None,
                viewport: None,
                clear_color: [0.0, 0.0, 0.0, 1.0],
                depth: DepthState::DISABLED,
                cull: None,
                program: None,
                vertex_array: None,
                units: [None; MAX_TEXTURE_UNITS as usize],
            },
            pending_clear: None,
            frame: None,
        };
        gpu.copy_program = gpu
            .create_program(&copy_program_desc())
            .map_err(|err| anyhow!("failed to build blit program: {err}"))?;
        Ok(gpu)
    }

    pub fn window_id(&self) -> WindowId {
        self.window.id()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    fn alloc(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn reconfigure(&mut self) {
        if self.config.width > 0 && self.config.height > 0 {
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Formats and size of the bound target, `None` if it cannot be drawn to.
    fn target_formats(
        &self,
    ) -> Option<(Option<wgpu::TextureFormat>, Option<wgpu::TextureFormat>, (u32, u32))> {
        let Some(fb) = self.state.bound else {
            return Some((
                Some(self.config.format),
                None,
                (self.config.width, self.config.height),
            ));
        };
        if self.framebuffer_status(fb) != FramebufferStatus::Complete {
            return None;
        }
        let desc = self.framebuffers.get(&fb.0)?;
        let color = desc
            .color
            .and_then(|id| self.textures.get(&id.0))
            .map(|t| (to_wgpu_format(t.desc.format), (t.desc.width, t.desc.height)));
        let depth = desc.depth.and_then(|d| self.depth_attachment(d));
        let size = color
            .map(|(_, size)| size)
            .or_else(|| depth.map(|t| (t.desc.width, t.desc.height)))?;
        Some((color.map(|(format, _)| format), depth.map(|_| DEPTH_FORMAT), size))
    }

    fn depth_attachment(&self, attachment: DepthAttachment) -> Option<&GpuTexture> {
        match attachment {
            DepthAttachment::Texture(id) => self.textures.get(&id.0),
            DepthAttachment::Renderbuffer(id) => self.renderbuffers.get(&id.0),
        }
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) -> Result<(), DeviceError> {
        if self.pipelines.contains_key(key) {
            return Ok(());
        }
        let program = self
            .programs
            .get(&key.program.0)
            .ok_or_else(|| DeviceError::Unsupported("draw with a deleted program".into()))?;

        let attributes: Vec<[wgpu::VertexAttribute; 1]> = key
            .vertex
            .iter()
            .map(|&(location, components, _)| {
                [wgpu::VertexAttribute {
                    format: vertex_format(components),
                    offset: 0,
                    shader_location: location,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = key
            .vertex
            .iter()
            .zip(&attributes)
            .map(|(&(_, _, stride), attribute)| wgpu::VertexBufferLayout {
                array_stride: stride as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attribute,
            })
            .collect();

        let color_targets = [key.color.map(|format| wgpu::ColorTargetState {
            format,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let targets: &[Option<wgpu::ColorTargetState>] = if key.color.is_some() {
            &color_targets
        } else {
            &[]
        };

        let depth_stencil = key.depth.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: key.depth_state.test && key.depth_state.write,
            depth_compare: if key.depth_state.test {
                compare_function(key.depth_state.compare)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: Default::default(),
            bias: Default::default(),
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.desc.label),
                layout: Some(&program.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &buffers,
                },
                primitive: wgpu::PrimitiveState {
                    topology: match key.topology {
                        Topology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
                        Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
                    },
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: key.cull.map(|face| match face {
                        Face::Front => wgpu::Face::Front,
                        Face::Back => wgpu::Face::Back,
                    }),
                    polygon_mode: wgpu::PolygonMode::Fill,
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets,
                }),
                multiview: None,
                cache: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::ShaderCompilation(format!(
                "{}: {err}",
                program.desc.label
            )));
        }
        self.pipelines.insert(key.clone(), pipeline);
        Ok(())
    }

    fn vertex_key(&self) -> Vec<(u32, u32, u32)> {
        self.state
            .vertex_array
            .and_then(|vao| self.vertex_arrays.get(&vao.0))
            .map(|desc| {
                desc.attributes
                    .iter()
                    .map(|a| (a.location, a.components, a.stride))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn texture_bind_group(&self, program: &GpuProgram) -> wgpu::BindGroup {
        let mut entries = Vec::with_capacity(program.desc.samplers.len() * 2);
        for (k, sampler) in program.desc.samplers.iter().enumerate() {
            let unit = program.units[k].clamp(0, MAX_TEXTURE_UNITS as i32 - 1) as usize;
            let texture = self.state.units[unit].and_then(|id| self.textures.get(&id.0));
            let (view, wgpu_sampler) = match sampler.kind {
                SampleKind::Color => {
                    let texture = texture
                        .filter(|t| !t.desc.format.is_depth())
                        .unwrap_or(&self.fallback_color);
                    let sampler = self
                        .samplers
                        .get(&(texture.desc.filter, texture.desc.wrap))
                        .unwrap_or(&self.depth_sampler);
                    (&texture.view, sampler)
                }
                SampleKind::Depth => {
                    let texture = texture
                        .filter(|t| t.desc.format.is_depth())
                        .unwrap_or(&self.fallback_depth);
                    (&texture.view, &self.depth_sampler)
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: 2 * k as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: 2 * k as u32 + 1,
                resource: wgpu::BindingResource::Sampler(wgpu_sampler),
            });
        }
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture-bind-group"),
            layout: &program.texture_layout,
            entries: &entries,
        })
    }

    fn uniform_bind_group(&self, program: &GpuProgram) -> wgpu::BindGroup {
        if program.data.is_empty() {
            return self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("uniform-bind-group"),
                layout: &program.uniform_layout,
                entries: &[],
            });
        }
        // A fresh buffer per draw keeps earlier draws' values intact;
        // queue writes would only land once the frame is submitted.
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("uniform-block"),
                contents: &program.data,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform-bind-group"),
            layout: &program.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        })
    }

    fn submit_draw(&mut self, topology: Topology, call: DrawCall) {
        let Some(program_id) = self.state.program else {
            warn!("draw issued without a program");
            return;
        };
        let Some((color, depth, size)) = self.target_formats() else {
            warn!("draw into an incomplete framebuffer skipped");
            return;
        };
        let key = PipelineKey {
            program: program_id,
            color,
            depth,
            topology,
            cull: self.state.cull,
            depth_state: self.state.depth,
            vertex: self.vertex_key(),
        };
        if let Err(err) = self.ensure_pipeline(&key) {
            error!("failed to build pipeline: {err}");
            return;
        }
        let Some(program) = self.programs.get(&program_id.0) else {
            return;
        };
        let uniform_group = self.uniform_bind_group(program);
        let texture_group = self.texture_bind_group(program);

        let Some(frame) = self.frame.as_mut() else {
            warn!("draw issued outside of a frame");
            return;
        };
        let Some(views) = target_views(
            &self.textures,
            &self.renderbuffers,
            &self.framebuffers,
            &frame.view,
            self.state.bound,
        ) else {
            return;
        };
        let Some(pipeline) = self.pipelines.get(&key) else {
            return;
        };

        let clear = self.pending_clear.take();
        let mut pass = begin_pass(&mut frame.encoder, &views, clear);
        let viewport = clamp_viewport(self.state.viewport, size);
        pass.set_viewport(
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &uniform_group, &[]);
        pass.set_bind_group(1, &texture_group, &[]);

        let vao = self
            .state
            .vertex_array
            .and_then(|vao| self.vertex_arrays.get(&vao.0));
        if let Some(vao) = vao {
            for (slot, attribute) in vao.attributes.iter().enumerate() {
                if let Some(buffer) = self.buffers.get(&attribute.buffer.0) {
                    pass.set_vertex_buffer(slot as u32, buffer.slice(attribute.offset as u64..));
                }
            }
        }

        match call {
            DrawCall::Arrays { first, count } => pass.draw(first..first + count, 0..1),
            DrawCall::Elements { count } => {
                let index = vao
                    .and_then(|vao| vao.index)
                    .and_then(|(id, format)| self.buffers.get(&id.0).map(|b| (b, format)));
                let Some((buffer, format)) = index else {
                    warn!("indexed draw without an index buffer");
                    return;
                };
                pass.set_index_buffer(
                    buffer.slice(..),
                    match format {
                        IndexFormat::U16 => wgpu::IndexFormat::Uint16,
                        IndexFormat::U32 => wgpu::IndexFormat::Uint32,
                    },
                );
                pass.draw_indexed(0..count, 0, 0..1);
            }
        }
    }

    /// Records an empty pass that performs a pending clear.
    fn flush_clear(&mut self) {
        let Some(clear) = self.pending_clear.take() else {
            return;
        };
        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        if let Some(views) = target_views(
            &self.textures,
            &self.renderbuffers,
            &self.framebuffers,
            &frame.view,
            self.state.bound,
        ) {
            drop(begin_pass(&mut frame.encoder, &views, Some(clear)));
        }
    }
}

impl GraphicsDevice for WgpuDevice {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    fn begin_frame(&mut self) -> Result<(), DeviceError> {
        let surface_texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.reconfigure();
                return Err(DeviceError::SurfaceLost);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(DeviceError::OutOfMemory),
            Err(wgpu::SurfaceError::Timeout | wgpu::SurfaceError::Other) => {
                return Err(DeviceError::SurfaceTimeout)
            }
        };
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame-encoder"),
            });
        self.frame = Some(Frame {
            surface_texture,
            view,
            encoder,
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), DeviceError> {
        self.flush_clear();
        let Some(frame) = self.frame.take() else {
            return Ok(());
        };
        self.queue.submit(std::iter::once(frame.encoder.finish()));
        drop(frame.view);
        frame.surface_texture.present();
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId {
        let max = self.capabilities.max_texture_size;
        let mut valid = desc.width > 0 && desc.height > 0 && desc.width <= max && desc.height <= max;
        if desc.format == TextureFormat::Rgba16Float && !self.capabilities.float_render_targets {
            valid = false;
        }
        if !valid {
            warn!(
                "texture {} ({}x{}, {:?}) is not supported; using a placeholder",
                desc.label, desc.width, desc.height, desc.format
            );
        }
        let texture = create_gpu_texture(&self.device, desc, valid);
        let id = self.alloc();
        self.textures.insert(id, texture);
        TextureId(id)
    }

    fn write_texture(&mut self, texture: TextureId, pixels: &[u8]) {
        let Some(texture) = self.textures.get(&texture.0) else {
            return;
        };
        let expected = (texture.desc.width * texture.desc.height * texture.desc.format.bytes_per_pixel())
            as usize;
        if !texture.valid || texture.desc.format.is_depth() || pixels.len() != expected {
            warn!("ignored upload of {} bytes to {}", pixels.len(), texture.desc.label);
            return;
        }
        write_pixels(&self.queue, texture, pixels);
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture.0);
        for unit in self.state.units.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
    }

    fn create_renderbuffer(&mut self, width: u32, height: u32) -> RenderbufferId {
        let desc = TextureDesc::new("renderbuffer", width, height, TextureFormat::Depth32Float);
        let max = self.capabilities.max_texture_size;
        let valid = width > 0 && height > 0 && width <= max && height <= max;
        let texture = create_gpu_texture(&self.device, &desc, valid);
        let id = self.alloc();
        self.renderbuffers.insert(id, texture);
        RenderbufferId(id)
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.renderbuffers.remove(&renderbuffer.0);
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> FramebufferId {
        let id = self.alloc();
        self.framebuffers.insert(id, *desc);
        FramebufferId(id)
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        let Some(desc) = self.framebuffers.get(&framebuffer.0) else {
            return FramebufferStatus::MissingAttachment;
        };
        let color = match desc.color {
            Some(id) => match self.textures.get(&id.0) {
                None => return FramebufferStatus::MissingAttachment,
                Some(t) if !t.valid => return FramebufferStatus::IncompleteAttachment,
                Some(t) if t.desc.format.is_depth() => return FramebufferStatus::UnsupportedFormat,
                Some(t) => Some((t.desc.width, t.desc.height)),
            },
            None => None,
        };
        let depth = match desc.depth {
            Some(attachment) => match self.depth_attachment(attachment) {
                None => return FramebufferStatus::MissingAttachment,
                Some(t) if !t.valid => return FramebufferStatus::IncompleteAttachment,
                Some(t) if !t.desc.format.is_depth() => return FramebufferStatus::UnsupportedFormat,
                Some(t) => Some((t.desc.width, t.desc.height)),
            },
            None => None,
        };
        match (color, depth) {
            (None, None) => FramebufferStatus::MissingAttachment,
            (Some(c), Some(d)) if c != d => FramebufferStatus::MismatchedDimensions,
            _ => FramebufferStatus::Complete,
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.state.bound == Some(framebuffer) {
            self.flush_clear();
            self.state.bound = None;
        }
        self.framebuffers.remove(&framebuffer.0);
    }

    fn create_buffer(&mut self, kind: BufferKind, label: &'static str, data: &[u8]) -> BufferId {
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: data,
                usage,
            });
        let id = self.alloc();
        self.buffers.insert(id, buffer);
        BufferId(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer.0);
    }

    fn create_vertex_array(&mut self, desc: &VertexArrayDesc) -> VertexArrayId {
        let id = self.alloc();
        self.vertex_arrays.insert(id, desc.clone());
        VertexArrayId(id)
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        self.vertex_arrays.remove(&vertex_array.0);
        if self.state.vertex_array == Some(vertex_array) {
            self.state.vertex_array = None;
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.wgsl().into()),
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::ShaderCompilation(format!("{}: {err}", desc.label)));
        }

        let uniform_layout = create_uniform_layout(&self.device, &desc.uniforms);
        let texture_layout = create_texture_layout(&self.device, &desc.samplers);
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &[&uniform_layout, &texture_layout],
                push_constant_ranges: &[],
            });

        let id = self.alloc();
        self.programs.insert(
            id,
            GpuProgram {
                module,
                uniform_layout,
                texture_layout,
                pipeline_layout,
                data: vec![0; desc.uniforms.size() as usize],
                units: vec![0; desc.samplers.len()],
                desc: desc.clone(),
            },
        );
        debug!("created program {} ({id})", desc.label);
        Ok(ProgramId(id))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program.0);
        self.pipelines.retain(|key, _| key.program != program);
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let program = self.programs.get(&program.0)?;
        if let Some((index, _)) = program.desc.uniforms.find(name) {
            return Some(UniformLocation::Value(index as u32));
        }
        program
            .desc
            .sampler_index(name)
            .map(|k| UniformLocation::Sampler(k as u32))
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let program = self.programs.get(&program.0)?;
        program.desc.attribute(name).map(|a| a.location)
    }

    fn live_resources(&self) -> usize {
        // The internal blit program is not counted.
        self.textures.len()
            + self.renderbuffers.len()
            + self.framebuffers.len()
            + self.buffers.len()
            + self.vertex_arrays.len()
            + self.programs.len().saturating_sub(1)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if self.state.bound != framebuffer {
            self.flush_clear();
        }
        self.state.bound = framebuffer;
    }

    fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.state.bound
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = Some(viewport);
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.state.clear_color = rgba;
    }

    fn clear(&mut self, mask: ClearMask) {
        let merged = match self.pending_clear {
            Some(pending) => ClearMask {
                color: pending.mask.color || mask.color,
                depth: pending.mask.depth || mask.depth,
            },
            None => mask,
        };
        self.pending_clear = Some(PendingClear {
            mask: merged,
            color: self.state.clear_color,
        });
    }

    fn set_depth_state(&mut self, state: DepthState) {
        self.state.depth = state;
    }

    fn set_cull_mode(&mut self, face: Option<Face>) {
        self.state.cull = face;
    }

    fn use_program(&mut self, program: ProgramId) {
        self.state.program = Some(program);
    }

    fn set_uniform(&mut self, program: ProgramId, location: UniformLocation, value: UniformValue) {
        let Some(program) = self.programs.get_mut(&program.0) else {
            return;
        };
        match location {
            UniformLocation::Value(i) => {
                let Some(field) = program.desc.uniforms.fields().get(i as usize) else {
                    return;
                };
                if field.kind != value.kind() {
                    warn!("uniform {} expects {:?}, got {:?}", field.name, field.kind, value.kind());
                    return;
                }
                let offset = field.offset as usize;
                let end = offset + field.kind.size() as usize;
                value.write_bytes(&mut program.data[offset..end]);
            }
            UniformLocation::Sampler(k) => match (value, program.units.get_mut(k as usize)) {
                (UniformValue::Int(unit), Some(slot)) => *slot = unit,
                _ => warn!("sampler uniform written with {value:?}"),
            },
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        match self.state.units.get_mut(unit as usize) {
            Some(slot) => *slot = texture,
            None => warn!("texture unit {unit} out of range"),
        }
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        self.state.vertex_array = vertex_array;
    }

    fn draw_arrays(&mut self, topology: Topology, first: u32, count: u32) {
        self.submit_draw(topology, DrawCall::Arrays { first, count });
    }

    fn draw_elements(&mut self, topology: Topology, count: u32) {
        self.submit_draw(topology, DrawCall::Elements { count });
    }

    fn blit(&mut self, source: TextureId) {
        let program = self.state.program;
        let unit = self.state.units[0];
        let vertex_array = self.state.vertex_array;
        let depth = self.state.depth;
        let cull = self.state.cull;

        self.state.program = Some(self.copy_program);
        self.state.units[0] = Some(source);
        self.state.vertex_array = None;
        self.state.depth = DepthState::DISABLED;
        self.state.cull = None;
        self.submit_draw(Topology::TriangleList, DrawCall::Arrays { first: 0, count: 3 });

        self.state.program = program;
        self.state.units[0] = unit;
        self.state.vertex_array = vertex_array;
        self.state.depth = depth;
        self.state.cull = cull;
    }
}

fn target_views<'a>(
    textures: &'a HashMap<u32, GpuTexture>,
    renderbuffers: &'a HashMap<u32, GpuTexture>,
    framebuffers: &HashMap<u32, FramebufferDesc>,
    surface: &'a wgpu::TextureView,
    bound: Option<FramebufferId>,
) -> Option<TargetViews<'a>> {
    let Some(fb) = bound else {
        return Some(TargetViews {
            color: Some(surface),
            depth: None,
        });
    };
    let desc = framebuffers.get(&fb.0)?;
    let color = desc.color.and_then(|id| textures.get(&id.0)).map(|t| &t.view);
    let depth = desc
        .depth
        .and_then(|attachment| match attachment {
            DepthAttachment::Texture(id) => textures.get(&id.0),
            DepthAttachment::Renderbuffer(id) => renderbuffers.get(&id.0),
        })
        .map(|t| &t.view);
    Some(TargetViews { color, depth })
}

fn begin_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    views: &TargetViews<'_>,
    clear: Option<PendingClear>,
) -> wgpu::RenderPass<'e> {
    let clear_color = clear.filter(|c| c.mask.color).map(|c| c.color);
    let clear_depth = clear.is_some_and(|c| c.mask.depth);
    let color_attachment = views.color.map(|view| wgpu::RenderPassColorAttachment {
        view,
        depth_slice: None,
        resolve_target: None,
        ops: wgpu::Operations {
            load: match clear_color {
                Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                }),
                None => wgpu::LoadOp::Load,
            },
            store: wgpu::StoreOp::Store,
        },
    });
    let color_attachments = [color_attachment];
    let color_attachments: &[Option<wgpu::RenderPassColorAttachment>] = if views.color.is_some() {
        &color_attachments
    } else {
        &[]
    };
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("penumbra-pass"),
        color_attachments,
        depth_stencil_attachment: views.depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: if clear_depth {
                    wgpu::LoadOp::Clear(1.0)
                } else {
                    wgpu::LoadOp::Load
                },
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

fn clamp_viewport(viewport: Option<Viewport>, (width, height): (u32, u32)) -> Viewport {
    let (width, height) = (width.max(1), height.max(1));
    let viewport = viewport.unwrap_or(Viewport::full(width, height));
    let x = viewport.x.min(width.saturating_sub(1));
    let y = viewport.y.min(height.saturating_sub(1));
    Viewport {
        x,
        y,
        width: viewport.width.clamp(1, width - x),
        height: viewport.height.clamp(1, height - y),
    }
}

fn choose_surface_format(caps: &wgpu::SurfaceCapabilities) -> Option<wgpu::TextureFormat> {
    // Gamma is applied by the tone-mapping pass, so prefer linear formats.
    let preferred = [
        wgpu::TextureFormat::Bgra8Unorm,
        wgpu::TextureFormat::Rgba8Unorm,
    ];
    preferred
        .into_iter()
        .find(|format| caps.formats.contains(format))
        .or_else(|| caps.formats.iter().copied().find(|f| !f.is_srgb()))
        .or_else(|| caps.formats.first().copied())
}

fn to_wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Depth32Float => DEPTH_FORMAT,
    }
}

fn vertex_format(components: u32) -> wgpu::VertexFormat {
    match components {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

fn compare_function(func: CompareFunc) -> wgpu::CompareFunction {
    match func {
        CompareFunc::Less => wgpu::CompareFunction::Less,
        CompareFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunc::Always => wgpu::CompareFunction::Always,
    }
}

fn create_sampler(device: &wgpu::Device, filter: FilterMode, wrap: WrapMode) -> wgpu::Sampler {
    let address_mode = match wrap {
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
    };
    let filter_mode = match filter {
        FilterMode::Linear => wgpu::FilterMode::Linear,
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("penumbra-sampler"),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter_mode,
        min_filter: filter_mode,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

/// Allocates a texture; unsupported descriptors get a 1x1 placeholder
/// flagged invalid so framebuffers using it report incomplete.
fn create_gpu_texture(device: &wgpu::Device, desc: &TextureDesc, valid: bool) -> GpuTexture {
    let (width, height) = if valid {
        (desc.width, desc.height)
    } else {
        (1, 1)
    };
    let format = if desc.format == TextureFormat::Rgba16Float && !valid {
        wgpu::TextureFormat::Rgba8Unorm
    } else {
        to_wgpu_format(desc.format)
    };
    let usage = if desc.format.is_depth() {
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
    } else {
        wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(desc.label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture {
        texture,
        view,
        desc: *desc,
        valid,
    }
}

fn write_pixels(queue: &wgpu::Queue, texture: &GpuTexture, pixels: &[u8]) {
    let (width, height) = if texture.valid {
        (texture.desc.width, texture.desc.height)
    } else {
        (1, 1)
    };
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * texture.desc.format.bytes_per_pixel()),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

fn clear_depth_once(device: &wgpu::Device, queue: &wgpu::Queue, view: &wgpu::TextureView) {
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("fallback-depth-clear"),
    });
    drop(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("fallback-depth-clear"),
        color_attachments: &[],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    }));
    queue.submit(std::iter::once(encoder.finish()));
}

fn create_uniform_layout(device: &wgpu::Device, layout: &UniformLayout) -> wgpu::BindGroupLayout {
    let entries: Vec<wgpu::BindGroupLayoutEntry> = NonZeroU64::new(layout.size() as u64)
        .map(|size| wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: Some(size),
            },
            count: None,
        })
        .into_iter()
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("uniform-layout"),
        entries: &entries,
    })
}

fn create_texture_layout(device: &wgpu::Device, samplers: &[SamplerDecl]) -> wgpu::BindGroupLayout {
    let mut entries = Vec::with_capacity(samplers.len() * 2);
    for (k, sampler) in samplers.iter().enumerate() {
        let (sample_type, sampler_type) = match sampler.kind {
            SampleKind::Color => (
                wgpu::TextureSampleType::Float { filterable: true },
                wgpu::SamplerBindingType::Filtering,
            ),
            SampleKind::Depth => (
                wgpu::TextureSampleType::Depth,
                wgpu::SamplerBindingType::NonFiltering,
            ),
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 2 * k as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 2 * k as u32 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(sampler_type),
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("texture-layout"),
        entries: &entries,
    })
}

fn copy_program_desc() -> ProgramDesc {
    ProgramDesc {
        label: "blit",
        uniforms: UniformLayout::default(),
        samplers: vec![SamplerDecl {
            name: "uSource",
            kind: SampleKind::Color,
        }],
        attributes: Vec::new(),
        body: COPY_SHADER,
    }
}

const COPY_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let x = f32((index << 1u) & 2u);
    let y = f32(index & 2u);
    var out: VertexOutput;
    out.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, 1.0 - y);
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSampleLevel(uSource, uSource_sampler, input.uv, 0.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_is_clamped_to_target() {
        let viewport = clamp_viewport(
            Some(Viewport {
                x: 0,
                y: 0,
                width: 4096,
                height: 10,
            }),
            (800, 600),
        );
        assert_eq!(viewport, Viewport::full(800, 10));
    }

    #[test]
    fn missing_viewport_covers_target() {
        assert_eq!(clamp_viewport(None, (64, 32)), Viewport::full(64, 32));
    }

    #[test]
    fn copy_program_declares_entry_points() {
        let source = copy_program_desc().wgsl();
        assert!(source.contains("fn vs_main"));
        assert!(source.contains("var uSource_sampler: sampler;"));
    }
}
