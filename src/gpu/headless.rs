use std::collections::HashMap;

use log::{debug, warn};

use super::{
    BufferId, BufferKind, Capabilities, ClearMask, DepthAttachment, DepthState, Face,
    FramebufferDesc, FramebufferId, FramebufferStatus, GraphicsDevice, ProgramDesc, ProgramId,
    RenderbufferId, TextureDesc, TextureFormat, TextureId, Topology, UniformLocation,
    UniformValue, VertexArrayDesc, VertexArrayId, Viewport, MAX_TEXTURE_UNITS,
};
use crate::error::DeviceError;

/// What a color attachment holds, as far as the recorder can tell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextureContents {
    Undefined,
    /// Cleared to an exact color and not drawn over since.
    Solid([f32; 4]),
    /// Last written by a draw with the given program.
    Shaded(ProgramId),
}

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginFrame,
    EndFrame,
    BindFramebuffer(Option<FramebufferId>),
    Viewport(Viewport),
    Clear {
        target: Option<FramebufferId>,
        mask: ClearMask,
        color: [f32; 4],
    },
    UseProgram(ProgramId),
    SetUniform {
        program: ProgramId,
        name: String,
        value: UniformValue,
    },
    BindTexture {
        unit: u32,
        texture: Option<TextureId>,
    },
    Draw {
        program: Option<ProgramId>,
        target: Option<FramebufferId>,
        /// Textures the program's samplers read, in declaration order.
        sampled: Vec<TextureId>,
        count: u32,
        indexed: bool,
    },
    Blit {
        source: TextureId,
        target: Option<FramebufferId>,
    },
}

struct TextureRecord {
    desc: TextureDesc,
    valid: bool,
    contents: TextureContents,
}

struct ProgramRecord {
    desc: ProgramDesc,
    values: Vec<Option<UniformValue>>,
    units: Vec<i32>,
}

/// Recording [`GraphicsDevice`] without a GPU.
///
/// Tracks every resource and binding, keeps uniform values per program and
/// models attachment contents so tests can check what reached the surface.
pub struct HeadlessDevice {
    capabilities: Capabilities,
    surface_size: (u32, u32),
    surface: TextureContents,
    next_id: u32,
    textures: HashMap<u32, TextureRecord>,
    renderbuffers: HashMap<u32, (u32, u32)>,
    framebuffers: HashMap<u32, FramebufferDesc>,
    buffers: HashMap<u32, (BufferKind, usize)>,
    vertex_arrays: HashMap<u32, VertexArrayDesc>,
    programs: HashMap<u32, ProgramRecord>,
    bound: Option<FramebufferId>,
    viewport: Viewport,
    clear_color: [f32; 4],
    depth: DepthState,
    cull: Option<Face>,
    program: Option<ProgramId>,
    vertex_array: Option<VertexArrayId>,
    units: [Option<TextureId>; MAX_TEXTURE_UNITS as usize],
    in_frame: bool,
    frames: u64,
    commands: Vec<Command>,
}

impl HeadlessDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_capabilities(width, height, Capabilities::default())
    }

    pub fn with_capabilities(width: u32, height: u32, capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            surface_size: (width, height),
            surface: TextureContents::Undefined,
            next_id: 1,
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            programs: HashMap::new(),
            bound: None,
            viewport: Viewport::full(width, height),
            clear_color: [0.0, 0.0, 0.0, 0.0],
            depth: DepthState::DISABLED,
            cull: None,
            program: None,
            vertex_array: None,
            units: [None; MAX_TEXTURE_UNITS as usize],
            in_frame: false,
            frames: 0,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Contents of the visible surface.
    pub fn surface_contents(&self) -> TextureContents {
        self.surface
    }

    pub fn texture_contents(&self, texture: TextureId) -> Option<TextureContents> {
        self.textures.get(&texture.0).map(|t| t.contents)
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc> {
        self.textures.get(&texture.0).map(|t| t.desc)
    }

    pub fn framebuffer_desc(&self, framebuffer: FramebufferId) -> Option<FramebufferDesc> {
        self.framebuffers.get(&framebuffer.0).copied()
    }

    /// Textures attached to `framebuffer`, color first.
    pub fn attached_textures(&self, framebuffer: FramebufferId) -> Vec<TextureId> {
        let Some(desc) = self.framebuffers.get(&framebuffer.0) else {
            return Vec::new();
        };
        let mut attached: Vec<TextureId> = desc.color.into_iter().collect();
        if let Some(DepthAttachment::Texture(depth)) = desc.depth {
            attached.push(depth);
        }
        attached
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn depth_state(&self) -> DepthState {
        self.depth
    }

    pub fn cull_mode(&self) -> Option<Face> {
        self.cull
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.units.get(unit as usize).copied().flatten()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    /// Last value written to `name` in `program`. Samplers report their unit.
    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let record = self.programs.get(&program.0)?;
        match self.uniform_location(program, name)? {
            UniformLocation::Value(i) => record.values[i as usize],
            UniformLocation::Sampler(k) => Some(UniformValue::Int(record.units[k as usize])),
        }
    }

    fn alloc(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn texture_ok(&self, texture: TextureId, depth: bool) -> FramebufferStatus {
        match self.textures.get(&texture.0) {
            None => FramebufferStatus::MissingAttachment,
            Some(record) if !record.valid => FramebufferStatus::IncompleteAttachment,
            Some(record) if record.desc.format.is_depth() != depth => {
                FramebufferStatus::UnsupportedFormat
            }
            Some(record)
                if record.desc.format == TextureFormat::Rgba16Float
                    && !self.capabilities.float_render_targets =>
            {
                FramebufferStatus::UnsupportedFormat
            }
            Some(_) => FramebufferStatus::Complete,
        }
    }

    fn attachment_size(&self, attachment: DepthAttachment) -> Option<(u32, u32)> {
        match attachment {
            DepthAttachment::Texture(texture) => self
                .textures
                .get(&texture.0)
                .map(|t| (t.desc.width, t.desc.height)),
            DepthAttachment::Renderbuffer(rb) => self.renderbuffers.get(&rb.0).copied(),
        }
    }

    fn target_color(&self) -> Option<TextureId> {
        self.bound
            .and_then(|fb| self.framebuffers.get(&fb.0))
            .and_then(|desc| desc.color)
    }

    fn write_target(&mut self, contents: TextureContents) {
        match self.bound {
            None => self.surface = contents,
            Some(_) => {
                if let Some(texture) = self.target_color() {
                    if let Some(record) = self.textures.get_mut(&texture.0) {
                        record.contents = contents;
                    }
                }
            }
        }
    }

    fn sampled_textures(&self) -> Vec<TextureId> {
        let Some(record) = self.program.and_then(|p| self.programs.get(&p.0)) else {
            return Vec::new();
        };
        record
            .units
            .iter()
            .filter_map(|&unit| self.units.get(unit as usize).copied().flatten())
            .collect()
    }

    fn record_draw(&mut self, count: u32, indexed: bool) {
        if !self.in_frame {
            warn!("draw issued outside of a frame");
        }
        let sampled = self.sampled_textures();
        self.commands.push(Command::Draw {
            program: self.program,
            target: self.bound,
            sampled,
            count,
            indexed,
        });
        if let Some(program) = self.program {
            self.write_target(TextureContents::Shaded(program));
        }
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface_size = (width, height);
    }

    fn begin_frame(&mut self) -> Result<(), DeviceError> {
        self.in_frame = true;
        self.commands.push(Command::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), DeviceError> {
        self.in_frame = false;
        self.frames += 1;
        self.commands.push(Command::EndFrame);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId {
        let max = self.capabilities.max_texture_size;
        let valid = desc.width > 0 && desc.height > 0 && desc.width <= max && desc.height <= max;
        if !valid {
            warn!(
                "texture {} has unsupported size {}x{}",
                desc.label, desc.width, desc.height
            );
        }
        let id = self.alloc();
        self.textures.insert(
            id,
            TextureRecord {
                desc: *desc,
                valid,
                contents: TextureContents::Undefined,
            },
        );
        TextureId(id)
    }

    fn write_texture(&mut self, texture: TextureId, pixels: &[u8]) {
        if let Some(record) = self.textures.get_mut(&texture.0) {
            let expected =
                (record.desc.width * record.desc.height * record.desc.format.bytes_per_pixel())
                    as usize;
            if pixels.len() != expected {
                warn!(
                    "texture {} upload has {} bytes, expected {expected}",
                    record.desc.label,
                    pixels.len()
                );
                return;
            }
            record.contents = TextureContents::Undefined;
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture.0);
        for unit in self.units.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
    }

    fn create_renderbuffer(&mut self, width: u32, height: u32) -> RenderbufferId {
        let id = self.alloc();
        self.renderbuffers.insert(id, (width, height));
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
        if desc.color.is_none() && desc.depth.is_none() {
            return FramebufferStatus::MissingAttachment;
        }

        let mut sizes = Vec::new();
        if let Some(color) = desc.color {
            let status = self.texture_ok(color, false);
            if status != FramebufferStatus::Complete {
                return status;
            }
            sizes.push(self.attachment_size(DepthAttachment::Texture(color)));
        }
        if let Some(depth) = desc.depth {
            if let DepthAttachment::Texture(texture) = depth {
                let status = self.texture_ok(texture, true);
                if status != FramebufferStatus::Complete {
                    return status;
                }
            }
            match self.attachment_size(depth) {
                Some(size) => sizes.push(Some(size)),
                None => return FramebufferStatus::MissingAttachment,
            }
        }
        if sizes.windows(2).any(|pair| pair[0] != pair[1]) {
            return FramebufferStatus::MismatchedDimensions;
        }
        FramebufferStatus::Complete
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(&framebuffer.0);
        if self.bound == Some(framebuffer) {
            self.bound = None;
        }
    }

    fn create_buffer(&mut self, kind: BufferKind, _label: &'static str, data: &[u8]) -> BufferId {
        let id = self.alloc();
        self.buffers.insert(id, (kind, data.len()));
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
        if self.vertex_array == Some(vertex_array) {
            self.vertex_array = None;
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId, DeviceError> {
        for entry in ["vs_main", "fs_main"] {
            if !desc.body.contains(entry) {
                return Err(DeviceError::ShaderCompilation(format!(
                    "{} is missing entry point {entry}",
                    desc.label
                )));
            }
        }
        let id = self.alloc();
        debug!("created program {} ({})", desc.label, id);
        self.programs.insert(
            id,
            ProgramRecord {
                values: vec![None; desc.uniforms.fields().len()],
                units: vec![0; desc.samplers.len()],
                desc: desc.clone(),
            },
        );
        Ok(ProgramId(id))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program.0);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let record = self.programs.get(&program.0)?;
        if let Some((index, _)) = record.desc.uniforms.find(name) {
            return Some(UniformLocation::Value(index as u32));
        }
        record
            .desc
            .sampler_index(name)
            .map(|k| UniformLocation::Sampler(k as u32))
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let record = self.programs.get(&program.0)?;
        record.desc.attribute(name).map(|a| a.location)
    }

    fn live_resources(&self) -> usize {
        self.textures.len()
            + self.renderbuffers.len()
            + self.framebuffers.len()
            + self.buffers.len()
            + self.vertex_arrays.len()
            + self.programs.len()
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.bound = framebuffer;
        self.commands.push(Command::BindFramebuffer(framebuffer));
    }

    fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.bound
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.commands.push(Command::Viewport(viewport));
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn clear(&mut self, mask: ClearMask) {
        self.commands.push(Command::Clear {
            target: self.bound,
            mask,
            color: self.clear_color,
        });
        if mask.color {
            self.write_target(TextureContents::Solid(self.clear_color));
        }
    }

    fn set_depth_state(&mut self, state: DepthState) {
        self.depth = state;
    }

    fn set_cull_mode(&mut self, face: Option<Face>) {
        self.cull = face;
    }

    fn use_program(&mut self, program: ProgramId) {
        self.program = Some(program);
        self.commands.push(Command::UseProgram(program));
    }

    fn set_uniform(&mut self, program: ProgramId, location: UniformLocation, value: UniformValue) {
        let Some(record) = self.programs.get_mut(&program.0) else {
            warn!("uniform write to unknown program {}", program.0);
            return;
        };
        let name = match location {
            UniformLocation::Value(i) => {
                let field = &record.desc.uniforms.fields()[i as usize];
                if field.kind != value.kind() {
                    warn!(
                        "uniform {} expects {:?}, got {:?}",
                        field.name,
                        field.kind,
                        value.kind()
                    );
                    return;
                }
                record.values[i as usize] = Some(value);
                field.name.clone()
            }
            UniformLocation::Sampler(k) => {
                let UniformValue::Int(unit) = value else {
                    warn!("sampler uniform written with {value:?}");
                    return;
                };
                record.units[k as usize] = unit;
                record.desc.samplers[k as usize].name.to_string()
            }
        };
        self.commands.push(Command::SetUniform {
            program,
            name,
            value,
        });
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        if let Some(slot) = self.units.get_mut(unit as usize) {
            *slot = texture;
            self.commands.push(Command::BindTexture { unit, texture });
        } else {
            warn!("texture unit {unit} out of range");
        }
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        self.vertex_array = vertex_array;
    }

    fn draw_arrays(&mut self, _topology: Topology, _first: u32, count: u32) {
        self.record_draw(count, false);
    }

    fn draw_elements(&mut self, _topology: Topology, count: u32) {
        self.record_draw(count, true);
    }

    fn blit(&mut self, source: TextureId) {
        let contents = self
            .texture_contents(source)
            .unwrap_or(TextureContents::Undefined);
        self.commands.push(Command::Blit {
            source,
            target: self.bound,
        });
        self.write_target(contents);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::TextureDesc;

    #[test]
    fn oversized_attachment_is_incomplete() {
        let mut gpu = HeadlessDevice::with_capabilities(
            64,
            64,
            Capabilities {
                float_render_targets: true,
                max_texture_size: 1024,
            },
        );
        let color = gpu.create_texture(&TextureDesc::new(
            "big",
            2048,
            2048,
            TextureFormat::Rgba8Unorm,
        ));
        let fb = gpu.create_framebuffer(&FramebufferDesc {
            label: "big",
            color: Some(color),
            depth: None,
        });
        assert_eq!(
            gpu.framebuffer_status(fb),
            FramebufferStatus::IncompleteAttachment
        );
    }

    #[test]
    fn mismatched_attachments_are_reported() {
        let mut gpu = HeadlessDevice::new(64, 64);
        let color = gpu.create_texture(&TextureDesc::new("c", 64, 64, TextureFormat::Rgba8Unorm));
        let depth = gpu.create_renderbuffer(32, 32);
        let fb = gpu.create_framebuffer(&FramebufferDesc {
            label: "fb",
            color: Some(color),
            depth: Some(DepthAttachment::Renderbuffer(depth)),
        });
        assert_eq!(
            gpu.framebuffer_status(fb),
            FramebufferStatus::MismatchedDimensions
        );
    }

    #[test]
    fn clear_then_blit_copies_contents() {
        let mut gpu = HeadlessDevice::new(16, 16);
        let color = gpu.create_texture(&TextureDesc::new("c", 16, 16, TextureFormat::Rgba8Unorm));
        let fb = gpu.create_framebuffer(&FramebufferDesc {
            label: "fb",
            color: Some(color),
            depth: None,
        });
        gpu.bind_framebuffer(Some(fb));
        gpu.set_clear_color([0.25, 0.5, 0.75, 1.0]);
        gpu.clear(ClearMask::COLOR);
        gpu.bind_framebuffer(None);
        gpu.blit(color);
        assert_eq!(
            gpu.surface_contents(),
            TextureContents::Solid([0.25, 0.5, 0.75, 1.0])
        );
    }

    #[test]
    fn deleting_resources_drops_live_count() {
        let mut gpu = HeadlessDevice::new(16, 16);
        let texture = gpu.create_texture(&TextureDesc::new("t", 4, 4, TextureFormat::Rgba8Unorm));
        let buffer = gpu.create_buffer(BufferKind::Vertex, "b", &[0; 16]);
        assert_eq!(gpu.live_resources(), 2);
        gpu.bind_texture(0, Some(texture));
        gpu.delete_texture(texture);
        gpu.delete_buffer(buffer);
        assert_eq!(gpu.live_resources(), 0);
        assert_eq!(gpu.bound_texture(0), None);
    }
}
