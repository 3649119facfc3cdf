use serde::{Deserialize, Serialize};

/// One opaque pixel as it goes out on the wire.
///
/// `#[repr(C)]` keeps the layout at exactly three bytes so a `&[Rgb]` can be
/// handed to the transport as raw RGB triples without copying.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Hue in turns (0.0-1.0, wraps), saturation and value in 0.0-1.0.
    pub fn from_hsv(h: f32, s: f32, v: f32) -> Self {
        let h = h.rem_euclid(1.0);
        let s = s.clamp(0.0, 1.0);
        let v = v.clamp(0.0, 1.0);

        let h_i = (h * 6.0) as i32;
        let f = h * 6.0 - h_i as f32;
        let p = v * (1.0 - s);
        let q = v * (1.0 - f * s);
        let t = v * (1.0 - (1.0 - f) * s);

        let (r, g, b) = match h_i % 6 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        };

        Self::new(unit_to_byte(r), unit_to_byte(g), unit_to_byte(b))
    }

    pub fn scaled(self, factor: f32) -> Self {
        let factor = factor.clamp(0.0, 1.0);
        Self::new(
            (self.r as f32 * factor) as u8,
            (self.g as f32 * factor) as u8,
            (self.b as f32 * factor) as u8,
        )
    }

    pub fn with_alpha(self, a: u8) -> Rgba {
        Rgba { r: self.r, g: self.g, b: self.b, a }
    }
}

/// Layer pixel. Alpha 0 means the animation never touched it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba { r: 0, g: 0, b: 0, a: 0 };

    pub fn rgb(self) -> Rgb {
        Rgb::new(self.r, self.g, self.b)
    }

    /// Source-over blend onto an opaque destination.
    pub fn over(self, dst: Rgb) -> Rgb {
        match self.a {
            0 => dst,
            255 => self.rgb(),
            a => {
                let a = a as u16;
                let inv = 255 - a;
                let mix = |s: u8, d: u8| ((s as u16 * a + d as u16 * inv + 127) / 255) as u8;
                Rgb::new(mix(self.r, dst.r), mix(self.g, dst.g), mix(self.b, dst.b))
            }
        }
    }
}

impl From<Rgb> for Rgba {
    fn from(c: Rgb) -> Self {
        c.with_alpha(255)
    }
}

fn unit_to_byte(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}
