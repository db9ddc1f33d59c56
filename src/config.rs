use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use glam::Vec3;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Tone-mapping curve applied by the tone-map pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMapOperator {
    Linear,
    Reinhard,
    #[default]
    Aces,
    Filmic,
    Lottes,
}

impl ToneMapOperator {
    /// Value written to `uTonemap`.
    pub fn uniform_value(self) -> i32 {
        match self {
            ToneMapOperator::Linear => 0,
            ToneMapOperator::Reinhard => 1,
            ToneMapOperator::Aces => 2,
            ToneMapOperator::Filmic => 3,
            ToneMapOperator::Lottes => 4,
        }
    }
}

/// Anti-aliasing applied while presenting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiAliasing {
    Off,
    #[default]
    Fxaa,
    Dlaa,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthOfFieldSettings {
    pub enabled: bool,
    pub focus_distance: f32,
    pub focus_range: f32,
    pub max_blur: f32,
    pub bokeh_radius: f32,
}

impl Default for DepthOfFieldSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            focus_distance: 10.0,
            focus_range: 5.0,
            max_blur: 1.0,
            bokeh_radius: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CelShadingSettings {
    pub enabled: bool,
    pub levels: f32,
    pub edge_threshold: f32,
    pub edge_color: Vec3,
}

impl Default for CelShadingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            levels: 4.0,
            edge_threshold: 0.2,
            edge_color: Vec3::ZERO,
        }
    }
}

/// Per-frame pipeline configuration.
///
/// The sequencer copies this once at the start of a frame; changes made while
/// a frame is in flight apply to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub tone_map: ToneMapOperator,
    pub exposure: f32,
    pub gamma: f32,
    pub anti_aliasing: AntiAliasing,
    pub depth_of_field: DepthOfFieldSettings,
    pub cel_shading: CelShadingSettings,
    pub shadows: bool,
    pub ambient: Vec3,
    pub clear_color: [f32; 4],
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            tone_map: ToneMapOperator::default(),
            exposure: 1.0,
            gamma: 2.2,
            anti_aliasing: AntiAliasing::default(),
            depth_of_field: DepthOfFieldSettings::default(),
            cel_shading: CelShadingSettings::default(),
            shadows: true,
            ambient: Vec3::splat(0.3),
            clear_color: [0.75, 0.85, 0.8, 1.0],
        }
    }
}

impl PipelineSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid pipeline settings")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn apply(&mut self, event: SettingsEvent) {
        match event {
            SettingsEvent::ToneMap(op) => self.tone_map = op,
            SettingsEvent::Exposure(value) => self.exposure = value.max(0.0),
            SettingsEvent::Gamma(value) => self.gamma = value.max(0.01),
            SettingsEvent::AntiAliasing(mode) => self.anti_aliasing = mode,
            SettingsEvent::DepthOfField(dof) => self.depth_of_field = dof,
            SettingsEvent::CelShading(cel) => self.cel_shading = cel,
            SettingsEvent::Shadows(enabled) => self.shadows = enabled,
            SettingsEvent::Ambient(ambient) => self.ambient = ambient,
            SettingsEvent::Replace(settings) => *self = settings,
        }
    }
}

/// A single change to [`PipelineSettings`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingsEvent {
    ToneMap(ToneMapOperator),
    Exposure(f32),
    Gamma(f32),
    AntiAliasing(AntiAliasing),
    DepthOfField(DepthOfFieldSettings),
    CelShading(CelShadingSettings),
    Shadows(bool),
    Ambient(Vec3),
    Replace(PipelineSettings),
}

/// Queue of settings changes shared between editors and the frame loop.
#[derive(Debug, Clone, Default)]
pub struct SettingsQueue {
    events: Arc<Mutex<VecDeque<SettingsEvent>>>,
}

impl SettingsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: SettingsEvent) {
        self.events.lock().push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Applies every queued event, in order, to `settings`.
    pub fn drain_into(&self, settings: &mut PipelineSettings) -> usize {
        let mut events = self.events.lock();
        let count = events.len();
        for event in events.drain(..) {
            settings.apply(event);
        }
        if count > 0 {
            debug!("applied {count} settings event(s)");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings = PipelineSettings::from_json(
            r#"{ "tone_map": "reinhard", "depth_of_field": { "enabled": true } }"#,
        )
        .unwrap();
        assert_eq!(settings.tone_map, ToneMapOperator::Reinhard);
        assert!(settings.depth_of_field.enabled);
        assert_eq!(settings.depth_of_field.focus_distance, 10.0);
        assert_eq!(settings.gamma, 2.2);
        assert_eq!(settings.anti_aliasing, AntiAliasing::Fxaa);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        assert!(PipelineSettings::from_json(r#"{ "tone_map": "hable" }"#).is_err());
    }

    #[test]
    fn queue_applies_events_in_order() {
        let queue = SettingsQueue::new();
        let sender = queue.clone();
        sender.push(SettingsEvent::Exposure(2.0));
        sender.push(SettingsEvent::AntiAliasing(AntiAliasing::Off));
        sender.push(SettingsEvent::Exposure(0.5));

        let mut settings = PipelineSettings::default();
        assert_eq!(queue.drain_into(&mut settings), 3);
        assert_eq!(settings.exposure, 0.5);
        assert_eq!(settings.anti_aliasing, AntiAliasing::Off);
        assert!(queue.is_empty());
    }

    #[test]
    fn operator_uniform_values_are_distinct() {
        let values: Vec<i32> = [
            ToneMapOperator::Linear,
            ToneMapOperator::Reinhard,
            ToneMapOperator::Aces,
            ToneMapOperator::Filmic,
            ToneMapOperator::Lottes,
        ]
        .iter()
        .map(|op| op.uniform_value())
        .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "shadows": false, "exposure": 1.5 }"#).unwrap();
        let settings = PipelineSettings::load(&path).unwrap();
        assert!(!settings.shadows);
        assert_eq!(settings.exposure, 1.5);
    }
}
