use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{AnimationUnit, Layer};
use crate::color::Rgb;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solid {
    pub color: Rgb,
}

impl Solid {
    pub fn new(color: Rgb) -> Self {
        Self { color }
    }
}

impl AnimationUnit for Solid {
    fn draw(&mut self, layer: &mut Layer, _dt: f32) -> Result<()> {
        layer.fill(self.color);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "solid"
    }
}

/// Hue sweep across the region's width, scrolling over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Rainbow {
    /// Hue turns per second.
    pub speed: f32,
    /// Hue turns spanned by the full width.
    pub spread: f32,
    pub brightness: f32,
    #[serde(skip)]
    phase: f32,
}

impl Default for Rainbow {
    fn default() -> Self {
        Self {
            speed: 0.1,
            spread: 1.0,
            brightness: 1.0,
            phase: 0.0,
        }
    }
}

impl AnimationUnit for Rainbow {
    fn draw(&mut self, layer: &mut Layer, dt: f32) -> Result<()> {
        self.phase = (self.phase + self.speed * dt).rem_euclid(1.0);
        let width = layer.width();
        for x in 0..width {
            let hue = self.phase + self.spread * x as f32 / width as f32;
            let color = Rgb::from_hsv(hue, 1.0, self.brightness);
            layer.fill_rect(x, 0, x + 1, layer.height(), color);
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "rainbow"
    }
}

/// Touch-driven light spot that fades after the finger lifts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Flashlight {
    pub color: Rgb,
    pub radius: f32,
    /// Seconds for the spot to fade out completely.
    pub fade_secs: f32,
    #[serde(skip)]
    spot: Option<(f32, f32)>,
    #[serde(skip)]
    glow: f32,
}

impl Default for Flashlight {
    fn default() -> Self {
        Self {
            color: Rgb::WHITE,
            radius: 12.0,
            fade_secs: 1.5,
            spot: None,
            glow: 0.0,
        }
    }
}

impl Flashlight {
    pub fn glow(&self) -> f32 {
        self.glow
    }
}

impl AnimationUnit for Flashlight {
    fn draw(&mut self, layer: &mut Layer, dt: f32) -> Result<()> {
        let Some((x, y)) = self.spot else {
            return Ok(());
        };

        if self.glow > 0.0 {
            layer.fill_spot(x, y, self.radius, self.color.scaled(self.glow));
        }
        if self.fade_secs > 0.0 {
            self.glow = (self.glow - dt / self.fade_secs).max(0.0);
        } else {
            self.glow = 0.0;
        }
        Ok(())
    }

    fn on_touch(&mut self, x: f32, y: f32) -> bool {
        self.spot = Some((x, y));
        self.glow = 1.0;
        true
    }

    fn kind(&self) -> &'static str {
        "flashlight"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rainbow_covers_layer() {
        let mut rainbow = Rainbow::default();
        let mut layer = Layer::new(12, 3);
        rainbow.draw(&mut layer, 0.1).unwrap();

        assert!((0..12).all(|x| layer.get(x, 2).a == 255));
        assert_ne!(layer.get(0, 0).rgb(), layer.get(6, 0).rgb());
    }

    #[test]
    fn test_flashlight_follows_touch_and_fades() {
        let mut light = Flashlight {
            radius: 4.0,
            fade_secs: 1.0,
            ..Flashlight::default()
        };

        let mut layer = Layer::new(20, 20);
        light.draw(&mut layer, 0.1).unwrap();
        assert_eq!(layer.get(5, 5).a, 0);

        assert!(light.on_touch(5.5, 5.5));
        let mut layer = Layer::new(20, 20);
        light.draw(&mut layer, 0.5).unwrap();
        assert!(layer.get(5, 5).a > 200);
        assert_eq!(layer.get(15, 15).a, 0);
        assert!((light.glow() - 0.5).abs() < 1e-4);

        light.draw(&mut Layer::new(20, 20), 0.6).unwrap();
        assert_eq!(light.glow(), 0.0);
    }
}
