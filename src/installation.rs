use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::geometry::Rect;

/// One LED fixture placed on the canvas. Identity is the IP address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub ip: String,
    pub pixel_count: usize,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub rotation: f32,
    /// Columns per row. 0 or 1 means a linear strip unless the shape heuristic says otherwise.
    #[serde(default)]
    pub segment_width: usize,
}

impl Device {
    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Camera {
    pub center_x: f32,
    pub center_y: f32,
    pub zoom: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            center_x: 0.0,
            center_y: 0.0,
            zoom: 1.0,
        }
    }
}

/// The canvas and everything placed on it, as handed over by the layout store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub camera: Camera,
}

impl Installation {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            devices: Vec::new(),
            camera: Camera::default(),
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.devices.push(device);
        self
    }

    /// Raster size for this canvas, never smaller than one pixel per side.
    pub fn raster_size(&self) -> (usize, usize) {
        (to_pixels(self.width), to_pixels(self.height))
    }

    pub fn device(&self, ip: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.ip == ip)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading installation {}", path.display()))?;
        let installation: Installation = serde_json::from_str(&json)
            .with_context(|| format!("parsing installation {}", path.display()))?;
        Ok(installation)
    }
}

fn to_pixels(v: f32) -> usize {
    if v.is_finite() {
        v.round().max(1.0) as usize
    } else {
        1
    }
}
