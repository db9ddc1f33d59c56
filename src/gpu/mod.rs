//! Rasterization device seam.
//!
//! The pipeline talks to the GPU through [`GraphicsDevice`], a small
//! framebuffer/texture-unit/uniform-location model. [`WgpuDevice`] drives a
//! real window surface and [`HeadlessDevice`] records everything for tests and
//! offline runs. Both build programs from the same [`ProgramDesc`], so uniform
//! and attribute lookups behave identically.

mod headless;
mod layout;
mod native;

use glam::{Mat4, Vec2, Vec3, Vec4};
use log::trace;

use crate::error::DeviceError;

pub use headless::{Command, HeadlessDevice, TextureContents};
pub use layout::{
    AttributeDecl, ProgramDesc, SampleKind, SamplerDecl, UniformField, UniformKind, UniformLayout,
    UniformLayoutBuilder,
};
pub use native::WgpuDevice;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Raw handle value, unique per device.
            pub fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

handle!(
    /// Sampled and/or renderable 2D texture.
    TextureId
);
handle!(
    /// Depth storage that can be attached but never sampled.
    RenderbufferId
);
handle!(
    /// Set of attachments that draws write into.
    FramebufferId
);
handle!(
    /// Vertex or index data.
    BufferId
);
handle!(
    /// Vertex attribute bindings plus an optional index buffer.
    VertexArrayId
);
handle!(
    /// Compiled shader program.
    ProgramId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

impl TextureDesc {
    /// Linear, clamp-to-edge texture of the given format.
    pub fn new(label: &'static str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label,
            width,
            height,
            format,
            filter: FilterMode::Linear,
            wrap: WrapMode::ClampToEdge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthAttachment {
    Texture(TextureId),
    Renderbuffer(RenderbufferId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub label: &'static str,
    pub color: Option<TextureId>,
    pub depth: Option<DepthAttachment>,
}

/// Completeness of a framebuffer, mirroring a rasterization API's status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    MissingAttachment,
    IncompleteAttachment,
    MismatchedDimensions,
    UnsupportedFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

/// One float vertex attribute sourced from `buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub buffer: BufferId,
    pub components: u32,
    pub stride: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexArrayDesc {
    pub label: &'static str,
    pub attributes: Vec<VertexAttribute>,
    pub index: Option<(BufferId, IndexFormat)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Less,
    LessEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare: CompareFunc,
}

impl DepthState {
    pub const DISABLED: DepthState = DepthState {
        test: false,
        write: false,
        compare: CompareFunc::Always,
    };

    pub const LESS: DepthState = DepthState {
        test: true,
        write: true,
        compare: CompareFunc::Less,
    };

    pub const LESS_EQUAL: DepthState = DepthState {
        test: true,
        write: true,
        compare: CompareFunc::LessEqual,
    };
}

impl Default for DepthState {
    fn default() -> Self {
        Self::DISABLED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Face {
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearMask {
    pub color: bool,
    pub depth: bool,
}

impl ClearMask {
    pub const COLOR: ClearMask = ClearMask {
        color: true,
        depth: false,
    };
    pub const DEPTH: ClearMask = ClearMask {
        color: false,
        depth: true,
    };
    pub const ALL: ClearMask = ClearMask {
        color: true,
        depth: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Value written to a uniform. Matrices are column-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Mat4(_) => UniformKind::Mat4,
        }
    }

    pub(crate) fn write_bytes(&self, out: &mut [u8]) {
        let bytes: &[u8] = match self {
            UniformValue::Int(v) => bytemuck::bytes_of(v),
            UniformValue::Float(v) => bytemuck::bytes_of(v),
            UniformValue::Vec2(v) => bytemuck::cast_slice(v),
            UniformValue::Vec3(v) => bytemuck::cast_slice(v),
            UniformValue::Vec4(v) => bytemuck::cast_slice(v),
            UniformValue::Mat4(v) => bytemuck::cast_slice(v),
        };
        out[..bytes.len()].copy_from_slice(bytes);
    }
}

impl From<i32> for UniformValue {
    fn from(value: i32) -> Self {
        UniformValue::Int(value)
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<Vec2> for UniformValue {
    fn from(value: Vec2) -> Self {
        UniformValue::Vec2(value.to_array())
    }
}

impl From<Vec3> for UniformValue {
    fn from(value: Vec3) -> Self {
        UniformValue::Vec3(value.to_array())
    }
}

impl From<Vec4> for UniformValue {
    fn from(value: Vec4) -> Self {
        UniformValue::Vec4(value.to_array())
    }
}

impl From<Mat4> for UniformValue {
    fn from(value: Mat4) -> Self {
        UniformValue::Mat4(value.to_cols_array())
    }
}

/// Resolved uniform of a program. Sampler uniforms take texture unit numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformLocation {
    Value(u32),
    Sampler(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether `Rgba16Float` can be rendered to and sampled.
    pub float_render_targets: bool,
    pub max_texture_size: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            float_render_targets: true,
            max_texture_size: 8192,
        }
    }
}

/// Texture units available to programs.
pub const MAX_TEXTURE_UNITS: u32 = 8;

/// Device abstraction modelled on a fixed rasterization API.
///
/// Exactly one framebuffer is bound at a time; `None` is the visible surface.
/// Uniform writes name their program explicitly and persist until overwritten.
pub trait GraphicsDevice {
    fn capabilities(&self) -> Capabilities;
    fn surface_size(&self) -> (u32, u32);
    fn resize_surface(&mut self, width: u32, height: u32);

    /// Acquires the surface for a new frame.
    fn begin_frame(&mut self) -> Result<(), DeviceError>;
    /// Submits recorded work and presents the surface.
    fn end_frame(&mut self) -> Result<(), DeviceError>;

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId;
    /// Uploads tightly packed pixels covering the whole texture.
    fn write_texture(&mut self, texture: TextureId, pixels: &[u8]);
    fn delete_texture(&mut self, texture: TextureId);

    fn create_renderbuffer(&mut self, width: u32, height: u32) -> RenderbufferId;
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId);

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> FramebufferId;
    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    fn create_buffer(&mut self, kind: BufferKind, label: &'static str, data: &[u8]) -> BufferId;
    fn delete_buffer(&mut self, buffer: BufferId);

    fn create_vertex_array(&mut self, desc: &VertexArrayDesc) -> VertexArrayId;
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId);

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId, DeviceError>;
    fn delete_program(&mut self, program: ProgramId);
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32>;

    /// Number of live resources of every kind.
    fn live_resources(&self) -> usize;

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    fn bound_framebuffer(&self) -> Option<FramebufferId>;
    fn set_viewport(&mut self, viewport: Viewport);
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn clear(&mut self, mask: ClearMask);
    fn set_depth_state(&mut self, state: DepthState);
    fn set_cull_mode(&mut self, face: Option<Face>);

    fn use_program(&mut self, program: ProgramId);
    fn set_uniform(&mut self, program: ProgramId, location: UniformLocation, value: UniformValue);
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>);
    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>);
    fn draw_arrays(&mut self, topology: Topology, first: u32, count: u32);
    fn draw_elements(&mut self, topology: Topology, count: u32);

    /// Copies `source` over the whole color attachment of the bound target.
    fn blit(&mut self, source: TextureId);
}

/// Writes `value` to the uniform called `name` if the program declares it.
///
/// Returns whether the uniform was found. Missing uniforms are not an error.
pub fn set_named_uniform(
    gpu: &mut dyn GraphicsDevice,
    program: ProgramId,
    name: &str,
    value: impl Into<UniformValue>,
) -> bool {
    match gpu.uniform_location(program, name) {
        Some(location) => {
            gpu.set_uniform(program, location, value.into());
            true
        }
        None => {
            trace!("program {} has no uniform {name}; skipped", program.raw());
            false
        }
    }
}
