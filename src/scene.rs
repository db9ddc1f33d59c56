use std::fmt;
use std::sync::Arc;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::gpu::{GraphicsDevice, TextureId};

/// Anything that can bind its vertex state and issue a draw.
pub trait Drawable {
    fn draw(&self, gpu: &mut dyn GraphicsDevice);
}

/// Distance falloff `1 / (constant + linear * d + quadratic * d^2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attenuation {
    pub constant: f32,
    pub linear: f32,
    pub quadratic: f32,
}

impl Default for Attenuation {
    fn default() -> Self {
        Self {
            constant: 1.0,
            linear: 0.09,
            quadratic: 0.032,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub attenuation: Attenuation,
}

/// Cone light. `cut_off` and `outer_cut_off` are cosines of the half angles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotLight {
    pub position: Vec3,
    pub direction: Vec3,
    pub color: Vec3,
    pub cut_off: f32,
    pub outer_cut_off: f32,
    pub attenuation: Attenuation,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Light {
    Directional(DirectionalLight),
    Point(PointLight),
    Spot(SpotLight),
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec3) -> Self {
        Light::Directional(DirectionalLight { direction, color })
    }

    pub fn point(position: Vec3, color: Vec3) -> Self {
        Light::Point(PointLight {
            position,
            color,
            attenuation: Attenuation::default(),
        })
    }

    pub fn spot(position: Vec3, direction: Vec3, color: Vec3) -> Self {
        Light::Spot(SpotLight {
            position,
            direction,
            color,
            cut_off: 12.5_f32.to_radians().cos(),
            outer_cut_off: 17.5_f32.to_radians().cos(),
            attenuation: Attenuation::default(),
        })
    }
}

/// Lights visible to the pipeline for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightSet {
    lights: Vec<Light>,
}

impl LightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, light: Light) -> &mut Self {
        self.lights.push(light);
        self
    }

    pub fn clear(&mut self) {
        self.lights.clear();
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Light> {
        self.lights.iter()
    }

    pub fn directional(&self) -> impl Iterator<Item = &DirectionalLight> {
        self.lights.iter().filter_map(|light| match light {
            Light::Directional(light) => Some(light),
            _ => None,
        })
    }

    pub fn points(&self) -> impl Iterator<Item = &PointLight> {
        self.lights.iter().filter_map(|light| match light {
            Light::Point(light) => Some(light),
            _ => None,
        })
    }

    pub fn spots(&self) -> impl Iterator<Item = &SpotLight> {
        self.lights.iter().filter_map(|light| match light {
            Light::Spot(light) => Some(light),
            _ => None,
        })
    }

    /// The first directional light; it drives the shadow map.
    pub fn shadow_caster(&self) -> Option<&DirectionalLight> {
        self.directional().next()
    }
}

impl FromIterator<Light> for LightSet {
    fn from_iter<T: IntoIterator<Item = Light>>(iter: T) -> Self {
        Self {
            lights: iter.into_iter().collect(),
        }
    }
}

/// Position, Euler rotation in radians and scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// `T * Rx * Ry * Rz * S`.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position)
            * Mat4::from_rotation_x(self.rotation.x)
            * Mat4::from_rotation_y(self.rotation.y)
            * Mat4::from_rotation_z(self.rotation.z)
            * Mat4::from_scale(self.scale)
    }
}

/// One mesh instance in the draw list.
#[derive(Clone)]
pub struct DrawItem {
    transform: Transform,
    world: Mat4,
    pub mesh: Arc<dyn Drawable>,
    pub texture: Option<TextureId>,
}

impl DrawItem {
    pub fn new(mesh: Arc<dyn Drawable>, transform: Transform) -> Self {
        Self {
            world: transform.matrix(),
            transform,
            mesh,
            texture: None,
        }
    }

    pub fn with_texture(mut self, texture: TextureId) -> Self {
        self.texture = Some(texture);
        self
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Replaces the transform and recomputes the world matrix.
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
        self.refresh_world();
    }

    /// Mutable access; the world matrix is stale until [`refresh_world`](Self::refresh_world).
    pub fn transform_mut(&mut self) -> &mut Transform {
        &mut self.transform
    }

    pub fn refresh_world(&mut self) {
        self.world = self.transform.matrix();
    }

    pub fn world(&self) -> Mat4 {
        self.world
    }
}

impl fmt::Debug for DrawItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawItem")
            .field("transform", &self.transform)
            .field("texture", &self.texture)
            .finish_non_exhaustive()
    }
}

/// Ordered draw items, drawn front to back in insertion order.
#[derive(Debug, Clone, Default)]
pub struct SceneDrawList {
    items: Vec<DrawItem>,
}

impl SceneDrawList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: DrawItem) -> usize {
        self.items.push(item);
        self.items.len() - 1
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DrawItem> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DrawItem> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DrawItem> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    struct NoopMesh;

    impl Drawable for NoopMesh {
        fn draw(&self, _gpu: &mut dyn GraphicsDevice) {}
    }

    #[test]
    fn world_matrix_applies_scale_then_rotation_then_translation() {
        let transform = Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Vec3::new(0.0, FRAC_PI_2, 0.0),
            scale: Vec3::splat(2.0),
        };
        let point = transform.matrix().transform_point3(Vec3::X);
        assert!(point.abs_diff_eq(Vec3::new(1.0, 2.0, 1.0), 1e-5));
    }

    #[test]
    fn world_is_stale_until_refreshed() {
        let mut item = DrawItem::new(Arc::new(NoopMesh), Transform::default());
        item.transform_mut().position = Vec3::new(5.0, 0.0, 0.0);
        assert_eq!(item.world(), Mat4::IDENTITY);
        item.refresh_world();
        assert_eq!(item.world(), Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn light_set_groups_by_kind() {
        let lights: LightSet = [
            Light::point(Vec3::new(13.0, 5.0, 0.0), Vec3::new(1.0, 0.5, 0.5)),
            Light::directional(Vec3::new(3.0, 4.0, 2.0), Vec3::splat(0.9)),
            Light::directional(Vec3::NEG_Y, Vec3::ONE),
            Light::spot(Vec3::splat(2.0), Vec3::splat(-1.0), Vec3::new(0.5, 0.5, 1.0)),
        ]
        .into_iter()
        .collect();
        assert_eq!(lights.directional().count(), 2);
        assert_eq!(lights.points().count(), 1);
        assert_eq!(lights.spots().count(), 1);
        assert_eq!(
            lights.shadow_caster().map(|l| l.direction),
            Some(Vec3::new(3.0, 4.0, 2.0))
        );
    }

    #[test]
    fn spot_cutoffs_are_cosines() {
        let Light::Spot(spot) = Light::spot(Vec3::ZERO, Vec3::NEG_Y, Vec3::ONE) else {
            unreachable!();
        };
        assert!(spot.cut_off > spot.outer_cut_off);
        assert!((spot.cut_off - 0.976_296).abs() < 1e-5);
    }

    #[test]
    fn lights_round_trip_through_json() {
        let light = Light::directional(Vec3::NEG_Y, Vec3::ONE);
        let json = serde_json::to_string(&light).unwrap();
        assert!(json.contains("\"kind\":\"directional\""));
        assert_eq!(serde_json::from_str::<Light>(&json).unwrap(), light);
    }
}
