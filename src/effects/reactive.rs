use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{AnimationUnit, Layer};
use crate::audio::{AudioFeed, BAND_MAX};
use crate::color::Rgb;

/// Vertical bars, one per analysed band, rising from the bottom edge.
///
/// Draws nothing until a feed is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumBars {
    /// Hue of the lowest band; higher bands step around the wheel.
    pub base_hue: f32,
    pub show_peaks: bool,
    #[serde(skip)]
    feed: Option<AudioFeed>,
}

impl Default for SpectrumBars {
    fn default() -> Self {
        Self {
            base_hue: 0.0,
            show_peaks: true,
            feed: None,
        }
    }
}

impl SpectrumBars {
    pub fn attach(&mut self, feed: AudioFeed) {
        self.feed = Some(feed);
    }
}

fn bar_height(value: f32, height: usize) -> usize {
    let fraction = (value / BAND_MAX as f32).clamp(0.0, 1.0);
    (fraction * height as f32).round() as usize
}

impl AnimationUnit for SpectrumBars {
    fn draw(&mut self, layer: &mut Layer, _dt: f32) -> Result<()> {
        let Some(feed) = &self.feed else {
            return Ok(());
        };
        let features = feed.latest();
        let bands = features.bands.len();
        if bands == 0 {
            return Ok(());
        }

        let (width, height) = (layer.width(), layer.height());
        for (i, &value) in features.bands.iter().enumerate() {
            let x0 = i * width / bands;
            let x1 = ((i + 1) * width / bands).max(x0 + 1);
            let color = Rgb::from_hsv(self.base_hue + i as f32 / bands as f32, 1.0, 1.0);

            let bar = bar_height(value, height);
            layer.fill_rect(x0, height - bar, x1, height, color);

            if self.show_peaks {
                let peak = features.band_peaks.get(i).copied().unwrap_or(0.0);
                let top = bar_height(peak, height);
                if top > bar {
                    let y = height - top;
                    layer.fill_rect(x0, y, x1, y + 1, Rgb::WHITE);
                }
            }
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "spectrum"
    }
}

/// Flash on every kick, decaying between hits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatPulse {
    pub color: Rgb,
    /// Fraction of full brightness lost per second.
    pub decay: f32,
    #[serde(skip)]
    level: f32,
    #[serde(skip)]
    feed: Option<AudioFeed>,
}

impl Default for BeatPulse {
    fn default() -> Self {
        Self {
            color: Rgb::new(255, 40, 120),
            decay: 3.0,
            level: 0.0,
            feed: None,
        }
    }
}

impl BeatPulse {
    pub fn attach(&mut self, feed: AudioFeed) {
        self.feed = Some(feed);
    }

    pub fn level(&self) -> f32 {
        self.level
    }
}

impl AnimationUnit for BeatPulse {
    fn draw(&mut self, layer: &mut Layer, dt: f32) -> Result<()> {
        let kick = self.feed.as_ref().map_or(false, |feed| feed.is_kick());
        if kick {
            self.level = 1.0;
        } else {
            self.level = (self.level - self.decay * dt).max(0.0);
        }

        if self.level > 0.0 {
            let alpha = (self.level * 255.0).round() as u8;
            layer.fill(self.color.with_alpha(alpha));
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "beat_pulse"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFeatures, BeatThresholds};

    fn feed_with(bands: Vec<f32>, kick: bool) -> AudioFeed {
        let mut features = AudioFeatures::silent(bands.len());
        features.band_peaks = bands.iter().map(|b| (b + 256.0).min(1024.0)).collect();
        features.bands = bands;
        features.kick = kick;
        AudioFeed::fixed(features, BeatThresholds::default())
    }

    #[test]
    fn test_spectrum_bars_follow_band_levels() {
        let mut bars = SpectrumBars {
            show_peaks: false,
            ..SpectrumBars::default()
        };
        bars.attach(feed_with(vec![1024.0, 0.0, 512.0, 0.0], false));

        let mut layer = Layer::new(8, 10);
        bars.draw(&mut layer, 0.03).unwrap();

        // Full bar reaches the top, empty bar draws nothing, half bar stops midway.
        assert_eq!(layer.get(0, 0).a, 255);
        assert_eq!(layer.get(2, 9).a, 0);
        assert_eq!(layer.get(4, 9).a, 255);
        assert_eq!(layer.get(4, 5).a, 255);
        assert_eq!(layer.get(4, 4).a, 0);
    }

    #[test]
    fn test_spectrum_peak_marker_above_bar() {
        let mut bars = SpectrumBars::default();
        bars.attach(feed_with(vec![512.0], false));

        let mut layer = Layer::new(4, 8);
        bars.draw(&mut layer, 0.03).unwrap();
        assert_eq!(layer.get(0, 2).rgb(), Rgb::WHITE);
        assert_eq!(layer.get(0, 1).a, 0);
    }

    #[test]
    fn test_unattached_units_stay_dark() {
        let mut layer = Layer::new(4, 4);
        SpectrumBars::default().draw(&mut layer, 0.03).unwrap();
        BeatPulse::default().draw(&mut layer, 0.03).unwrap();
        assert!((0..4).all(|x| layer.get(x, 3).a == 0));
    }

    #[test]
    fn test_beat_pulse_flashes_on_kick_and_decays() {
        let mut pulse = BeatPulse {
            decay: 2.0,
            ..BeatPulse::default()
        };
        pulse.attach(feed_with(vec![0.0; 16], true));

        let mut layer = Layer::new(2, 2);
        pulse.draw(&mut layer, 0.1).unwrap();
        assert_eq!(pulse.level(), 1.0);
        assert_eq!(layer.get(0, 0).a, 255);

        pulse.attach(feed_with(vec![0.0; 16], false));
        pulse.draw(&mut Layer::new(2, 2), 0.25).unwrap();
        assert!((pulse.level() - 0.5).abs() < 1e-5);
        pulse.draw(&mut Layer::new(2, 2), 1.0).unwrap();
        assert_eq!(pulse.level(), 0.0);
    }
}
