//! Multi-pass frame rendering.
//!
//! A frame is a shadow depth pass, the lit main color pass into an offscreen
//! HDR surface, a chain of full-screen effects and a final composition onto
//! the visible surface. [`FrameSequencer`] owns the passes and runs them in
//! that order.

pub mod common;
pub mod effects;
pub mod lighting;
pub mod post;
pub mod scene_pass;
pub mod sequencer;
pub mod shaders;
pub mod shadow;
pub mod target;

pub use common::{CameraParams, FrameInputs, ALBEDO_UNIT, DEFAULT_CLEAR_COLOR, SHADOW_MAP_UNIT};
pub use effects::{EffectChain, EffectInput, EffectPass, InputSource};
pub use lighting::LightingUploader;
pub use post::{FullscreenQuad, PostProcessSurface};
pub use scene_pass::MainColorPass;
pub use sequencer::{FrameReport, FrameSequencer, FrameStage};
pub use shadow::{compute_light_space, LightSpaceTransform, ShadowPass, ShadowSettings};
pub use target::{DepthSpec, RenderTarget, RenderTargetDesc, ShadowMap};
