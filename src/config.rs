use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::audio::beat::BeatThresholds;
use crate::transport::Framing;

/// Everything tunable about the engine, loadable from a JSON file.
///
/// Missing sections and fields fall back to the defaults below, so a config
/// file only has to name what it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub render: RenderConfig,
    pub transport: TransportConfig,
    pub mapping: MappingConfig,
    pub audio: AudioConfig,
    pub beats: BeatThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub target_frame_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { target_frame_ms: 33 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub port: u16,
    pub protocol_id: u8,
    pub timeout_secs: u8,
    pub framing: Framing,
    /// Value for the options byte of the extended header.
    pub options: u8,
    /// Upper bound on a single send before the device is skipped for the frame.
    pub io_timeout_ms: u64,
    /// Upper bound on resolving a device hostname. A lookup that runs over
    /// counts as failed.
    pub resolve_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 21324,
            protocol_id: 2,
            timeout_secs: 2,
            framing: Framing::Legacy,
            options: 0,
            io_timeout_ms: 20,
            resolve_timeout_ms: 1000,
        }
    }
}

/// Strip-vs-matrix inference constants. Empirically tuned; keep them configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub matrix_min_pixels: usize,
    pub strip_aspect_ratio: f32,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            matrix_min_pixels: 40,
            strip_aspect_ratio: 6.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per published PCM block.
    pub block_size: usize,
    /// FFT length, must be a power of two.
    pub analysis_window: usize,
    pub bands: usize,
    /// Capacity of each normalisation history window.
    pub history: usize,
    /// Smoothing weight for rising values.
    pub attack: f32,
    /// Smoothing weight for falling values.
    pub decay: f32,
    /// Fraction of the range the peak line falls per update.
    pub peak_decay: f32,
    /// Smallest history spread, as a fraction of the output range, that is
    /// rescaled. Narrower windows read as flat.
    pub min_span: f32,
    /// Level mapped to band value 0.
    pub db_floor: f32,
    /// How long capture keeps running after the last subscriber leaves.
    pub grace_period_ms: u64,
    /// Skip the microphone and always synthesise.
    pub synthetic_only: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_size: 1024,
            analysis_window: 512,
            bands: 16,
            history: 600,
            attack: 0.6,
            decay: 0.15,
            peak_decay: 0.01,
            min_span: 0.15,
            db_floor: -90.0,
            grace_period_ms: 2000,
            synthetic_only: false,
        }
    }
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let json = r#"{ "transport": { "framing": "extended", "port": 4048 }, "render": {} }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.transport.port, 4048);
        assert_eq!(config.transport.framing, Framing::Extended);
        assert_eq!(config.transport.protocol_id, 2);
        assert_eq!(config.render.target_frame_ms, 33);
        assert_eq!(config.mapping.matrix_min_pixels, 40);
        assert_eq!(config.audio.history, 600);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("ledcanvas-config-{}.json", std::process::id()));
        let mut config = EngineConfig::default();
        config.mapping.strip_aspect_ratio = 4.5;
        config.beats.kick.threshold = 900.0;

        config.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.mapping.strip_aspect_ratio, 4.5);
        assert_eq!(loaded.beats.kick.threshold, 900.0);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(EngineConfig::load("/nonexistent/ledcanvas.json").is_err());
    }
}
