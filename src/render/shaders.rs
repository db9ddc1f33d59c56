//! Program descriptions for every pass of the pipeline.
//!
//! Each builder returns a [`ProgramDesc`] whose uniform block is generated
//! from a [`UniformLayout`], so the names the passes look up and the offsets
//! the shaders read can never drift apart.

use crate::gpu::{
    AttributeDecl, ProgramDesc, SampleKind, SamplerDecl, UniformKind, UniformLayout,
};

pub const MAX_DIR_LIGHTS: usize = 4;
pub const MAX_POINT_LIGHTS: usize = 8;
pub const MAX_SPOT_LIGHTS: usize = 4;

fn mesh_attributes() -> Vec<AttributeDecl> {
    vec![
        AttributeDecl {
            name: "vertPosition",
            location: 0,
            components: 3,
        },
        AttributeDecl {
            name: "vertNormal",
            location: 1,
            components: 3,
        },
        AttributeDecl {
            name: "vertTexCoord",
            location: 2,
            components: 2,
        },
    ]
}

fn quad_attributes() -> Vec<AttributeDecl> {
    vec![
        AttributeDecl {
            name: "quadPosition",
            location: 0,
            components: 2,
        },
        AttributeDecl {
            name: "quadTexCoord",
            location: 1,
            components: 2,
        },
    ]
}

fn color_sampler(name: &'static str) -> SamplerDecl {
    SamplerDecl {
        name,
        kind: SampleKind::Color,
    }
}

fn depth_sampler(name: &'static str) -> SamplerDecl {
    SamplerDecl {
        name,
        kind: SampleKind::Depth,
    }
}

/// Lit, textured, shadowed program of the main color pass.
pub fn scene_program() -> ProgramDesc {
    let uniforms = UniformLayout::builder()
        .scalar("mProj", UniformKind::Mat4)
        .scalar("mView", UniformKind::Mat4)
        .scalar("mWorld", UniformKind::Mat4)
        .scalar("mLightSpace", UniformKind::Mat4)
        .scalar("viewPos", UniformKind::Vec3)
        .scalar("numDirLights", UniformKind::Int)
        .scalar("ambientLightIntensity", UniformKind::Vec3)
        .scalar("numPointLights", UniformKind::Int)
        .scalar("numSpotLights", UniformKind::Int)
        .scalar("uShadowsEnabled", UniformKind::Int)
        .scalar("uShadowSamples", UniformKind::Int)
        .scalar("uShadowBias", UniformKind::Float)
        .scalar("uShadowSampleRadius", UniformKind::Float)
        .scalar("uShadowStrength", UniformKind::Float)
        .struct_array(
            "dirLights",
            "DirLight",
            MAX_DIR_LIGHTS as u32,
            &[("direction", UniformKind::Vec3), ("color", UniformKind::Vec3)],
        )
        .struct_array(
            "pointLights",
            "PointLight",
            MAX_POINT_LIGHTS as u32,
            &[
                ("position", UniformKind::Vec3),
                ("color", UniformKind::Vec3),
                ("constant", UniformKind::Float),
                ("linear", UniformKind::Float),
                ("quadratic", UniformKind::Float),
            ],
        )
        .struct_array(
            "spotLights",
            "SpotLight",
            MAX_SPOT_LIGHTS as u32,
            &[
                ("position", UniformKind::Vec3),
                ("direction", UniformKind::Vec3),
                ("color", UniformKind::Vec3),
                ("cutOff", UniformKind::Float),
                ("outerCutOff", UniformKind::Float),
                ("constant", UniformKind::Float),
                ("linear", UniformKind::Float),
                ("quadratic", UniformKind::Float),
            ],
        )
        .build();

    ProgramDesc {
        label: "scene",
        uniforms,
        samplers: vec![color_sampler("uSampler"), depth_sampler("uShadowMap")],
        attributes: mesh_attributes(),
        body: SCENE_SHADER,
    }
}

/// Depth-only program of the shadow pass.
pub fn shadow_program() -> ProgramDesc {
    let uniforms = UniformLayout::builder()
        .scalar("mLightProj", UniformKind::Mat4)
        .scalar("mLightView", UniformKind::Mat4)
        .scalar("mWorld", UniformKind::Mat4)
        .build();
    ProgramDesc {
        label: "shadow",
        uniforms,
        samplers: Vec::new(),
        attributes: vec![AttributeDecl {
            name: "vertPosition",
            location: 0,
            components: 3,
        }],
        body: SHADOW_SHADER,
    }
}

pub fn cel_shading_program() -> ProgramDesc {
    let uniforms = UniformLayout::builder()
        .scalar("uResolution", UniformKind::Vec2)
        .scalar("uPixelSize", UniformKind::Vec2)
        .scalar("uEdgeColor", UniformKind::Vec3)
        .scalar("uLevels", UniformKind::Float)
        .scalar("uEdgeThreshold", UniformKind::Float)
        .build();
    ProgramDesc {
        label: "cel-shading",
        uniforms,
        samplers: vec![color_sampler("uTexture")],
        attributes: quad_attributes(),
        body: CEL_SHADER,
    }
}

pub fn depth_of_field_program() -> ProgramDesc {
    let uniforms = UniformLayout::builder()
        .scalar("uResolution", UniformKind::Vec2)
        .scalar("uNear", UniformKind::Float)
        .scalar("uFar", UniformKind::Float)
        .scalar("uFocusDistance", UniformKind::Float)
        .scalar("uFocusRange", UniformKind::Float)
        .scalar("uMaxBlur", UniformKind::Float)
        .scalar("uBokehRadius", UniformKind::Float)
        .build();
    ProgramDesc {
        label: "depth-of-field",
        uniforms,
        samplers: vec![color_sampler("uColor"), depth_sampler("uDepth")],
        attributes: quad_attributes(),
        body: DOF_SHADER,
    }
}

pub fn tone_map_program() -> ProgramDesc {
    let uniforms = UniformLayout::builder()
        .scalar("uResolution", UniformKind::Vec2)
        .scalar("uTonemap", UniformKind::Int)
        .scalar("uExposure", UniformKind::Float)
        .scalar("uGamma", UniformKind::Float)
        .build();
    ProgramDesc {
        label: "tone-map",
        uniforms,
        samplers: vec![color_sampler("uTexture")],
        attributes: quad_attributes(),
        body: TONE_MAP_SHADER,
    }
}

pub fn fxaa_program() -> ProgramDesc {
    ProgramDesc {
        label: "fxaa",
        uniforms: resolution_only(),
        samplers: vec![color_sampler("uTexture")],
        attributes: quad_attributes(),
        body: FXAA_SHADER,
    }
}

pub fn dlaa_program() -> ProgramDesc {
    ProgramDesc {
        label: "dlaa",
        uniforms: resolution_only(),
        samplers: vec![color_sampler("uTexture")],
        attributes: quad_attributes(),
        body: DLAA_SHADER,
    }
}

fn resolution_only() -> UniformLayout {
    UniformLayout::builder()
        .scalar("uResolution", UniformKind::Vec2)
        .build()
}

const SCENE_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) tex_coord: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) light_space: vec4<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    let world = u.mWorld * vec4<f32>(in.position, 1.0);
    var out: VertexOutput;
    out.clip = u.mProj * u.mView * world;
    out.world_pos = world.xyz;
    out.normal = (u.mWorld * vec4<f32>(in.normal, 0.0)).xyz;
    out.uv = in.tex_coord;
    out.light_space = u.mLightSpace * world;
    return out;
}

fn attenuate(constant: f32, linear: f32, quadratic: f32, distance: f32) -> f32 {
    return 1.0 / (constant + linear * distance + quadratic * distance * distance);
}

fn shade(light_dir: vec3<f32>, normal: vec3<f32>, view_dir: vec3<f32>, color: vec3<f32>) -> vec3<f32> {
    let diffuse = max(dot(normal, light_dir), 0.0);
    let halfway = normalize(light_dir + view_dir);
    let specular = pow(max(dot(normal, halfway), 0.0), 32.0);
    return color * (diffuse + 0.5 * specular);
}

fn shadow_amount(light_space: vec4<f32>, normal: vec3<f32>, light_dir: vec3<f32>) -> f32 {
    if u.uShadowsEnabled == 0 {
        return 0.0;
    }
    let ndc = light_space.xyz / light_space.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if ndc.z > 1.0 || uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 {
        return 0.0;
    }
    let texel = 1.0 / vec2<f32>(textureDimensions(uShadowMap));
    let bias = max(u.uShadowBias * 10.0 * (1.0 - dot(normal, light_dir)), u.uShadowBias);
    let reach = max(u.uShadowSamples, 1);
    var hits = 0.0;
    var taps = 0.0;
    for (var x = -reach; x <= reach; x += 1) {
        for (var y = -reach; y <= reach; y += 1) {
            let offset = vec2<f32>(f32(x), f32(y)) * texel * u.uShadowSampleRadius / f32(reach);
            let closest = textureSampleLevel(uShadowMap, uShadowMap_sampler, uv + offset, 0);
            if ndc.z - bias > closest {
                hits += 1.0;
            }
            taps += 1.0;
        }
    }
    return hits / taps * u.uShadowStrength;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = textureSampleLevel(uSampler, uSampler_sampler, in.uv, 0.0);
    let normal = normalize(in.normal);
    let view_dir = normalize(u.viewPos - in.world_pos);

    var light = u.ambientLightIntensity;
    for (var i = 0; i < u.numDirLights; i += 1) {
        let dir = normalize(-u.dirLights[i].direction);
        var lit = shade(dir, normal, view_dir, u.dirLights[i].color);
        if i == 0 {
            lit *= 1.0 - shadow_amount(in.light_space, normal, dir);
        }
        light += lit;
    }
    for (var i = 0; i < u.numPointLights; i += 1) {
        let p = u.pointLights[i];
        let to_light = p.position - in.world_pos;
        let falloff = attenuate(p.constant, p.linear, p.quadratic, length(to_light));
        light += shade(normalize(to_light), normal, view_dir, p.color) * falloff;
    }
    for (var i = 0; i < u.numSpotLights; i += 1) {
        let s = u.spotLights[i];
        let to_light = s.position - in.world_pos;
        let dir = normalize(to_light);
        let theta = dot(dir, normalize(-s.direction));
        let cone = clamp((theta - s.outerCutOff) / max(s.cutOff - s.outerCutOff, 0.0001), 0.0, 1.0);
        let falloff = attenuate(s.constant, s.linear, s.quadratic, length(to_light));
        light += shade(dir, normal, view_dir, s.color) * falloff * cone;
    }
    return vec4<f32>(albedo.rgb * light, albedo.a);
}
"#;

const SHADOW_SHADER: &str = r#"
@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return u.mLightProj * u.mLightView * u.mWorld * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() {}
"#;

const CEL_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

fn luma(c: vec3<f32>) -> f32 {
    return dot(c, vec3<f32>(0.299, 0.587, 0.114));
}

fn tap(uv: vec2<f32>) -> f32 {
    return luma(textureSampleLevel(uTexture, uTexture_sampler, uv, 0.0).rgb);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSampleLevel(uTexture, uTexture_sampler, in.uv, 0.0);
    let levels = max(u.uLevels, 1.0);
    let quantized = floor(color.rgb * levels + 0.5) / levels;

    let px = u.uPixelSize;
    let gx = tap(in.uv + vec2<f32>(px.x, 0.0)) - tap(in.uv - vec2<f32>(px.x, 0.0));
    let gy = tap(in.uv + vec2<f32>(0.0, px.y)) - tap(in.uv - vec2<f32>(0.0, px.y));
    let edge = step(u.uEdgeThreshold, length(vec2<f32>(gx, gy)));
    return vec4<f32>(mix(quantized, u.uEdgeColor, edge), color.a);
}
"#;

const DOF_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

fn linear_depth(depth: f32) -> f32 {
    return u.uNear * u.uFar / (u.uFar - depth * (u.uFar - u.uNear));
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let depth = linear_depth(textureSampleLevel(uDepth, uDepth_sampler, in.uv, 0));
    let coc = clamp(abs(depth - u.uFocusDistance) / max(u.uFocusRange, 0.0001), 0.0, 1.0) * u.uMaxBlur;
    let texel = 1.0 / u.uResolution;

    var sum = vec3<f32>(0.0);
    var weight = 0.0;
    for (var i = 0; i < 16; i += 1) {
        let angle = f32(i) * 2.39996;
        let r = sqrt(f32(i) / 16.0) * u.uBokehRadius * coc;
        let offset = vec2<f32>(cos(angle), sin(angle)) * r * texel;
        sum += textureSampleLevel(uColor, uColor_sampler, in.uv + offset, 0.0).rgb;
        weight += 1.0;
    }
    let sharp = textureSampleLevel(uColor, uColor_sampler, in.uv, 0.0);
    return vec4<f32>(mix(sharp.rgb, sum / weight, min(coc, 1.0)), sharp.a);
}
"#;

const TONE_MAP_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

fn aces(x: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return clamp((x * (a * x + b)) / (x * (c * x + d) + e), vec3<f32>(0.0), vec3<f32>(1.0));
}

fn filmic(x: vec3<f32>) -> vec3<f32> {
    let v = max(vec3<f32>(0.0), x - 0.004);
    let mapped = (v * (6.2 * v + 0.5)) / (v * (6.2 * v + 1.7) + 0.06);
    // The curve already includes a 2.2 gamma; undo it so gamma is applied once.
    return pow(mapped, vec3<f32>(2.2));
}

fn lottes(x: vec3<f32>) -> vec3<f32> {
    let a = vec3<f32>(1.6);
    let d = vec3<f32>(0.977);
    let hdr_max = vec3<f32>(8.0);
    let mid_in = vec3<f32>(0.18);
    let mid_out = vec3<f32>(0.267);
    let b = (-pow(mid_in, a) + pow(hdr_max, a) * mid_out)
        / ((pow(hdr_max, a * d) - pow(mid_in, a * d)) * mid_out);
    let c = (pow(hdr_max, a * d) * pow(mid_in, a) - pow(hdr_max, a) * pow(mid_in, a * d) * mid_out)
        / ((pow(hdr_max, a * d) - pow(mid_in, a * d)) * mid_out);
    return pow(x, a) / (pow(x, a * d) * b + c);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let hdr = textureSampleLevel(uTexture, uTexture_sampler, in.uv, 0.0);
    let color = max(hdr.rgb * u.uExposure, vec3<f32>(0.0));
    var mapped: vec3<f32>;
    switch u.uTonemap {
        case 0: { mapped = clamp(color, vec3<f32>(0.0), vec3<f32>(1.0)); }
        case 1: { mapped = color / (color + vec3<f32>(1.0)); }
        case 3: { mapped = filmic(color); }
        case 4: { mapped = lottes(color); }
        default: { mapped = aces(color); }
    }
    let corrected = pow(mapped, vec3<f32>(1.0 / max(u.uGamma, 0.01)));
    return vec4<f32>(corrected, hdr.a);
}
"#;

const FXAA_SHADER: &str = r#"
const EDGE_THRESHOLD: f32 = 0.063;
const EDGE_THRESHOLD_MIN: f32 = 0.0312;
const SUBPIX_QUALITY: f32 = 0.75;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

fn luma(c: vec3<f32>) -> f32 {
    return dot(c, vec3<f32>(0.299, 0.587, 0.114));
}

fn fetch(uv: vec2<f32>) -> vec3<f32> {
    return textureSampleLevel(uTexture, uTexture_sampler, uv, 0.0).rgb;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let texel = 1.0 / u.uResolution;
    let uv = in.uv;

    let rgb_m = fetch(uv);
    let luma_m = luma(rgb_m);
    let luma_n = luma(fetch(uv + vec2<f32>(0.0, -texel.y)));
    let luma_s = luma(fetch(uv + vec2<f32>(0.0, texel.y)));
    let luma_w = luma(fetch(uv + vec2<f32>(-texel.x, 0.0)));
    let luma_e = luma(fetch(uv + vec2<f32>(texel.x, 0.0)));

    let luma_min = min(luma_m, min(min(luma_n, luma_s), min(luma_w, luma_e)));
    let luma_max = max(luma_m, max(max(luma_n, luma_s), max(luma_w, luma_e)));
    let range = luma_max - luma_min;
    if range < max(EDGE_THRESHOLD_MIN, luma_max * EDGE_THRESHOLD) {
        return vec4<f32>(rgb_m, 1.0);
    }

    let horizontal = abs(luma_n + luma_s - 2.0 * luma_m) >= abs(luma_w + luma_e - 2.0 * luma_m);
    var step_dir = vec2<f32>(texel.x, 0.0);
    var luma_pos = luma_e;
    var luma_neg = luma_w;
    if horizontal {
        step_dir = vec2<f32>(0.0, texel.y);
        luma_pos = luma_s;
        luma_neg = luma_n;
    }
    if abs(luma_neg - luma_m) > abs(luma_pos - luma_m) {
        step_dir = -step_dir;
    }

    let average = (luma_n + luma_s + luma_w + luma_e) * 0.25;
    var blend = clamp(abs(average - luma_m) / range, 0.0, 1.0);
    blend = min(SUBPIX_QUALITY, blend * blend * (3.0 - 2.0 * blend));
    let rgb = mix(rgb_m, fetch(uv + step_dir * 0.5), blend);
    return vec4<f32>(rgb, 1.0);
}
"#;

const DLAA_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

fn luma(c: vec3<f32>) -> f32 {
    return dot(c, vec3<f32>(0.299, 0.587, 0.114));
}

fn fetch(uv: vec2<f32>) -> vec3<f32> {
    return textureSampleLevel(uTexture, uTexture_sampler, uv, 0.0).rgb;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let texel = 1.0 / u.uResolution;
    let uv = in.uv;
    let center = fetch(uv);

    // Directionally localized blur: smooth along the edge, not across it.
    let left = fetch(uv - vec2<f32>(1.5 * texel.x, 0.0));
    let right = fetch(uv + vec2<f32>(1.5 * texel.x, 0.0));
    let top = fetch(uv - vec2<f32>(0.0, 1.5 * texel.y));
    let bottom = fetch(uv + vec2<f32>(0.0, 1.5 * texel.y));

    let edge_h = abs(luma(left) + luma(right) - 2.0 * luma(center));
    let edge_v = abs(luma(top) + luma(bottom) - 2.0 * luma(center));
    let blur_h = (left + right + 2.0 * center) * 0.25;
    let blur_v = (top + bottom + 2.0 * center) * 0.25;

    let weight_h = clamp(edge_v * 4.0, 0.0, 1.0);
    let weight_v = clamp(edge_h * 4.0, 0.0, 1.0);
    var rgb = mix(center, blur_h, weight_h * 0.5);
    rgb = mix(rgb, blur_v, weight_v * 0.5);
    return vec4<f32>(rgb, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn all_programs() -> Vec<ProgramDesc> {
        vec![
            scene_program(),
            shadow_program(),
            cel_shading_program(),
            depth_of_field_program(),
            tone_map_program(),
            fxaa_program(),
            dlaa_program(),
        ]
    }

    #[test]
    fn every_program_has_both_entry_points() {
        for desc in all_programs() {
            let source = desc.wgsl();
            assert!(source.contains("fn vs_main"), "{}", desc.label);
            assert!(source.contains("fn fs_main"), "{}", desc.label);
        }
    }

    #[test]
    fn scene_program_exposes_every_light_slot() {
        let desc = scene_program();
        let layout = &desc.uniforms;
        for name in [
            "viewPos",
            "ambientLightIntensity",
            "numDirLights",
            "mLightSpace",
            "uShadowBias",
            "uShadowsEnabled",
            "uShadowStrength",
            "dirLights[3].direction",
            "pointLights[7].quadratic",
            "spotLights[3].outerCutOff",
        ] {
            assert!(layout.find(name).is_some(), "missing {name}");
        }
        assert!(layout.find("pointLights[8].color").is_none());
        assert_eq!(desc.sampler_index("uShadowMap"), Some(1));
    }

    #[test]
    fn scene_structs_need_no_padding() {
        let layout = scene_program().uniforms;
        let stride = |name: &str| {
            layout.find(&format!("{name}[1].{}", "color")).unwrap().1.offset
                - layout.find(&format!("{name}[0].{}", "color")).unwrap().1.offset
        };
        assert_eq!(stride("dirLights"), 32);
        assert_eq!(stride("pointLights"), 48);
        assert_eq!(stride("spotLights"), 64);
        assert!(!layout.wgsl().contains("@size"));
    }

    #[test]
    fn depth_inputs_are_declared_as_depth() {
        let dof = depth_of_field_program();
        assert_eq!(dof.samplers[1].kind, SampleKind::Depth);
        assert!(dof.wgsl().contains("var uDepth: texture_depth_2d;"));
    }
}
