use std::collections::HashMap;
use std::fmt::Write as _;

/// Scalar, vector or matrix uniform type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformKind {
    pub fn size(self) -> u32 {
        match self {
            UniformKind::Int | UniformKind::Float => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
            UniformKind::Mat4 => 64,
        }
    }

    pub fn align(self) -> u32 {
        match self {
            UniformKind::Int | UniformKind::Float => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 | UniformKind::Vec4 | UniformKind::Mat4 => 16,
        }
    }

    fn wgsl(self) -> &'static str {
        match self {
            UniformKind::Int => "i32",
            UniformKind::Float => "f32",
            UniformKind::Vec2 => "vec2<f32>",
            UniformKind::Vec3 => "vec3<f32>",
            UniformKind::Vec4 => "vec4<f32>",
            UniformKind::Mat4 => "mat4x4<f32>",
        }
    }
}

/// A leaf uniform with its byte offset in the uniform block.
///
/// Array-of-struct members are flattened to names like `pointLights[2].color`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    pub name: String,
    pub kind: UniformKind,
    pub offset: u32,
}

/// Byte layout of a program's uniform block, following WGSL uniform address
/// space rules, together with the WGSL declarations that match it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformLayout {
    fields: Vec<UniformField>,
    index: HashMap<String, usize>,
    size: u32,
    wgsl: String,
}

impl UniformLayout {
    pub fn builder() -> UniformLayoutBuilder {
        UniformLayoutBuilder::default()
    }

    pub fn fields(&self) -> &[UniformField] {
        &self.fields
    }

    /// Index and field for a flattened uniform name.
    pub fn find(&self, name: &str) -> Option<(usize, &UniformField)> {
        self.index.get(name).map(|&i| (i, &self.fields[i]))
    }

    /// Size of the host-side block, a multiple of 16 bytes. Zero when empty.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Struct declarations plus the `u` binding at group 0, binding 0.
    pub fn wgsl(&self) -> &str {
        &self.wgsl
    }
}

#[derive(Debug, Default)]
pub struct UniformLayoutBuilder {
    fields: Vec<UniformField>,
    members: Vec<String>,
    structs: String,
    cursor: u32,
}

impl UniformLayoutBuilder {
    pub fn scalar(mut self, name: &str, kind: UniformKind) -> Self {
        let offset = round_up(self.cursor, kind.align());
        self.fields.push(UniformField {
            name: name.to_string(),
            kind,
            offset,
        });
        self.members.push(format!("    {name}: {},", kind.wgsl()));
        self.cursor = offset + kind.size();
        self
    }

    /// Fixed-length array of a struct made of `members`.
    pub fn struct_array(
        mut self,
        name: &str,
        type_name: &str,
        len: u32,
        members: &[(&str, UniformKind)],
    ) -> Self {
        let mut offsets = Vec::with_capacity(members.len());
        let mut end = 0;
        let mut align = 4;
        for (_, kind) in members {
            let offset = round_up(end, kind.align());
            offsets.push(offset);
            end = offset + kind.size();
            align = align.max(kind.align());
        }
        // Uniform arrays need a 16-byte stride; pad the last member when the
        // natural struct size falls short.
        let stride = round_up(end, 16);
        let needs_padding = round_up(end, align) != stride;

        let _ = writeln!(self.structs, "struct {type_name} {{");
        for (i, (member, kind)) in members.iter().enumerate() {
            if i + 1 == members.len() && needs_padding {
                let padded = kind.size() + (stride - end);
                let _ = writeln!(self.structs, "    @size({padded}) {member}: {},", kind.wgsl());
            } else {
                let _ = writeln!(self.structs, "    {member}: {},", kind.wgsl());
            }
        }
        self.structs.push_str("}\n\n");

        let base = round_up(self.cursor, 16);
        for element in 0..len {
            for ((member, kind), offset) in members.iter().zip(&offsets) {
                self.fields.push(UniformField {
                    name: format!("{name}[{element}].{member}"),
                    kind: *kind,
                    offset: base + element * stride + offset,
                });
            }
        }
        self.members
            .push(format!("    {name}: array<{type_name}, {len}>,"));
        self.cursor = base + stride * len;
        self
    }

    pub fn build(self) -> UniformLayout {
        let index = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| (field.name.clone(), i))
            .collect();
        if self.fields.is_empty() {
            return UniformLayout::default();
        }

        let mut wgsl = self.structs;
        wgsl.push_str("struct Uniforms {\n");
        for member in &self.members {
            wgsl.push_str(member);
            wgsl.push('\n');
        }
        wgsl.push_str("}\n\n@group(0) @binding(0)\nvar<uniform> u: Uniforms;\n");

        UniformLayout {
            fields: self.fields,
            index,
            size: round_up(self.cursor, 16),
            wgsl,
        }
    }
}

/// How a sampler uniform reads its texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    /// Filterable float color texture.
    Color,
    /// Depth texture, unfiltered, sampled with an integer mip level.
    Depth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDecl {
    pub name: &'static str,
    pub kind: SampleKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDecl {
    pub name: &'static str,
    pub location: u32,
    pub components: u32,
}

/// Everything a device needs to build a program.
///
/// `body` holds the WGSL entry points `vs_main` and `fs_main`. It refers to
/// uniforms as `u.<name>`, to sampler `x` as the pair `x` / `x_sampler`.
#[derive(Debug, Clone)]
pub struct ProgramDesc {
    pub label: &'static str,
    pub uniforms: UniformLayout,
    pub samplers: Vec<SamplerDecl>,
    pub attributes: Vec<AttributeDecl>,
    pub body: &'static str,
}

impl ProgramDesc {
    /// Complete WGSL module: uniform block, texture bindings and body.
    ///
    /// Sampler `k` binds its texture at group 1 binding `2k` and its sampler
    /// at binding `2k + 1`.
    pub fn wgsl(&self) -> String {
        let mut source = String::from(self.uniforms.wgsl());
        source.push('\n');
        for (k, sampler) in self.samplers.iter().enumerate() {
            let texture_type = match sampler.kind {
                SampleKind::Color => "texture_2d<f32>",
                SampleKind::Depth => "texture_depth_2d",
            };
            let _ = writeln!(
                source,
                "@group(1) @binding({})\nvar {}: {texture_type};",
                2 * k,
                sampler.name
            );
            let _ = writeln!(
                source,
                "@group(1) @binding({})\nvar {}_sampler: sampler;",
                2 * k + 1,
                sampler.name
            );
        }
        source.push('\n');
        source.push_str(self.body);
        source
    }

    pub fn sampler_index(&self, name: &str) -> Option<usize> {
        self.samplers.iter().position(|s| s.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDecl> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light_layout() -> UniformLayout {
        UniformLayout::builder()
            .scalar("mProj", UniformKind::Mat4)
            .scalar("viewPos", UniformKind::Vec3)
            .scalar("numDirLights", UniformKind::Int)
            .struct_array(
                "pointLights",
                "PointLight",
                2,
                &[
                    ("position", UniformKind::Vec3),
                    ("color", UniformKind::Vec3),
                    ("constant", UniformKind::Float),
                    ("linear", UniformKind::Float),
                    ("quadratic", UniformKind::Float),
                ],
            )
            .scalar("uExposure", UniformKind::Float)
            .build()
    }

    #[test]
    fn packs_scalars_after_vec3() {
        let layout = light_layout();
        assert_eq!(layout.find("mProj").unwrap().1.offset, 0);
        assert_eq!(layout.find("viewPos").unwrap().1.offset, 64);
        // An i32 fits into the tail of the vec3 slot.
        assert_eq!(layout.find("numDirLights").unwrap().1.offset, 76);
    }

    #[test]
    fn struct_arrays_use_sixteen_byte_stride() {
        let layout = light_layout();
        let first = layout.find("pointLights[0].position").unwrap().1.offset;
        let second = layout.find("pointLights[1].position").unwrap().1.offset;
        assert_eq!(first, 80);
        assert_eq!(second - first, 48);
        assert_eq!(layout.find("pointLights[1].quadratic").unwrap().1.offset, 128 + 36);
        assert_eq!(layout.find("uExposure").unwrap().1.offset, 176);
        assert_eq!(layout.size(), 192);
    }

    #[test]
    fn pads_short_structs() {
        let layout = UniformLayout::builder()
            .struct_array("taps", "Tap", 3, &[("weight", UniformKind::Float)])
            .build();
        assert!(layout.wgsl().contains("@size(16) weight: f32"));
        assert_eq!(layout.find("taps[2].weight").unwrap().1.offset, 32);
        assert_eq!(layout.size(), 48);
    }

    #[test]
    fn empty_layout_has_no_binding() {
        let layout = UniformLayout::builder().build();
        assert!(layout.is_empty());
        assert_eq!(layout.size(), 0);
        assert!(layout.wgsl().is_empty());
    }

    #[test]
    fn program_source_declares_sampler_pairs() {
        let desc = ProgramDesc {
            label: "test",
            uniforms: UniformLayout::builder()
                .scalar("uGamma", UniformKind::Float)
                .build(),
            samplers: vec![
                SamplerDecl {
                    name: "uColor",
                    kind: SampleKind::Color,
                },
                SamplerDecl {
                    name: "uDepth",
                    kind: SampleKind::Depth,
                },
            ],
            attributes: Vec::new(),
            body: "// body",
        };
        let source = desc.wgsl();
        assert!(source.contains("var<uniform> u: Uniforms;"));
        assert!(source.contains("@group(1) @binding(0)\nvar uColor: texture_2d<f32>;"));
        assert!(source.contains("@group(1) @binding(3)\nvar uDepth_sampler: sampler;"));
        assert!(source.contains("var uDepth: texture_depth_2d;"));
        assert_eq!(desc.sampler_index("uDepth"), Some(1));
    }
}
