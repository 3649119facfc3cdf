use crate::color::{Rgb, Rgba};

/// Local drawing surface handed to an animation unit.
///
/// Its origin is the region's top-left corner and its size is the region's
/// width and height in canvas units. Pixels an animation leaves untouched stay
/// transparent and let earlier regions show through.
#[derive(Debug, Clone)]
pub struct Layer {
    width: usize,
    height: usize,
    pixels: Vec<Rgba>,
}

impl Layer {
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            pixels: vec![Rgba::TRANSPARENT; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> Rgba {
        self.pixels[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, color: impl Into<Rgba>) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = color.into();
        }
    }

    pub fn fill(&mut self, color: impl Into<Rgba>) {
        self.pixels.fill(color.into());
    }

    /// Fills the half-open rectangle `[x0, x1) x [y0, y1)`, clipped to the layer.
    pub fn fill_rect(&mut self, x0: usize, y0: usize, x1: usize, y1: usize, color: impl Into<Rgba>) {
        let color = color.into();
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        for y in y0.min(y1)..y1 {
            let row = y * self.width;
            self.pixels[row + x0.min(x1)..row + x1].fill(color);
        }
    }

    /// Soft-edged disc: full colour at the centre fading to transparent at `radius`.
    pub fn fill_spot(&mut self, cx: f32, cy: f32, radius: f32, color: Rgb) {
        if radius <= 0.0 {
            return;
        }
        let x0 = (cx - radius).floor().max(0.0) as usize;
        let y0 = (cy - radius).floor().max(0.0) as usize;
        let x1 = ((cx + radius).ceil().max(0.0) as usize).min(self.width);
        let y1 = ((cy + radius).ceil().max(0.0) as usize).min(self.height);

        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                let d = (dx * dx + dy * dy).sqrt();
                if d < radius {
                    let a = ((1.0 - d / radius) * 255.0) as u8;
                    let idx = y * self.width + x;
                    let existing = self.pixels[idx];
                    if a > existing.a {
                        self.pixels[idx] = color.with_alpha(a);
                    }
                }
            }
        }
    }
}
