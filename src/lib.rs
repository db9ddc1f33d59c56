//! Multi-pass real-time render pipeline.
//!
//! A frame runs a directional shadow pass, a lit main color pass into an
//! offscreen HDR surface, a chain of full-screen effects and a final
//! composition onto the visible surface. Everything draws through the
//! [`GraphicsDevice`] seam, so the pipeline runs unchanged on the `wgpu`
//! backend and on the recording [`HeadlessDevice`] used by tests and tools.

pub mod app;
pub mod config;
pub mod error;
pub mod gpu;
pub mod logging;
pub mod mesh;
pub mod render;
pub mod scene;
pub mod schedule;

pub use config::{
    AntiAliasing, CelShadingSettings, DepthOfFieldSettings, PipelineSettings, SettingsEvent,
    SettingsQueue, ToneMapOperator,
};
pub use error::{DeviceError, PipelineError, PipelineResult};
pub use gpu::{GraphicsDevice, HeadlessDevice, WgpuDevice};
pub use logging::{init_logging, LoggingConfig};
pub use mesh::{Mesh, MeshData};
pub use render::{
    CameraParams, FrameInputs, FrameReport, FrameSequencer, FrameStage, ShadowSettings,
};
pub use scene::{DrawItem, Drawable, Light, LightSet, SceneDrawList, Transform};
pub use schedule::{FrameClock, FrameLoop, FrameScheduler, FrameTick, SchedulerState};
