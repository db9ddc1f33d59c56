use glam::Vec3;
use log::debug;

use crate::gpu::{
    BufferId, BufferKind, GraphicsDevice, IndexFormat, ProgramId, Topology, VertexArrayDesc,
    VertexArrayId, VertexAttribute,
};
use crate::scene::Drawable;

/// CPU-side mesh: separate position, normal and texture coordinate streams
/// plus triangle indices. Normals and texture coordinates may be empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tex_coords: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Unit cube centred on the origin with per-face normals and UVs.
    pub fn cube() -> Self {
        let faces: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        ];
        let mut mesh = MeshData::default();
        for (normal, right, up) in faces {
            let base = mesh.positions.len() as u32;
            let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
            for (u, v) in corners {
                let position = (normal + right * u + up * v) * 0.5;
                mesh.positions.push(position.to_array());
                mesh.normals.push(normal.to_array());
                mesh.tex_coords.push([(u + 1.0) * 0.5, (v + 1.0) * 0.5]);
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    /// Square in the XZ plane facing +Y, `size` units across.
    pub fn plane(size: f32) -> Self {
        let h = size * 0.5;
        MeshData {
            positions: vec![[-h, 0.0, h], [h, 0.0, h], [h, 0.0, -h], [-h, 0.0, -h]],
            normals: vec![[0.0, 1.0, 0.0]; 4],
            tex_coords: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

/// Mesh uploaded to a device, ready to be drawn by any program that reads
/// `vertPosition` at the slot it was uploaded against.
#[derive(Debug)]
pub struct Mesh {
    label: &'static str,
    vertex_array: VertexArrayId,
    buffers: Vec<BufferId>,
    index_count: u32,
}

impl Mesh {
    /// Uploads `data`, binding each stream to the attribute slot `program`
    /// reports. Streams the program does not declare are skipped.
    pub fn upload(
        gpu: &mut dyn GraphicsDevice,
        program: ProgramId,
        label: &'static str,
        data: &MeshData,
    ) -> Self {
        let mut buffers = Vec::new();
        let mut attributes = Vec::new();

        let streams: [(&str, &[u8], u32); 3] = [
            ("vertPosition", bytemuck::cast_slice(&data.positions), 3),
            ("vertNormal", bytemuck::cast_slice(&data.normals), 3),
            ("vertTexCoord", bytemuck::cast_slice(&data.tex_coords), 2),
        ];
        for (name, bytes, components) in streams {
            if bytes.is_empty() {
                continue;
            }
            let Some(location) = gpu.attribute_location(program, name) else {
                debug!("mesh {label}: program has no {name}; stream skipped");
                continue;
            };
            let buffer = gpu.create_buffer(BufferKind::Vertex, label, bytes);
            buffers.push(buffer);
            attributes.push(VertexAttribute {
                location,
                buffer,
                components,
                stride: components * 4,
                offset: 0,
            });
        }

        let index = gpu.create_buffer(
            BufferKind::Index,
            label,
            bytemuck::cast_slice(&data.indices),
        );
        buffers.push(index);
        let vertex_array = gpu.create_vertex_array(&VertexArrayDesc {
            label,
            attributes,
            index: Some((index, IndexFormat::U32)),
        });

        Self {
            label,
            vertex_array,
            buffers,
            index_count: data.indices.len() as u32,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn release(self, gpu: &mut dyn GraphicsDevice) {
        gpu.delete_vertex_array(self.vertex_array);
        for buffer in self.buffers {
            gpu.delete_buffer(buffer);
        }
    }
}

impl Drawable for Mesh {
    fn draw(&self, gpu: &mut dyn GraphicsDevice) {
        gpu.bind_vertex_array(Some(self.vertex_array));
        gpu.draw_elements(Topology::TriangleList, self.index_count);
    }
}
