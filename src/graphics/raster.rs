use crate::color::Rgb;

/// Off-screen canvas the compositor paints and the device mapper samples.
///
/// Never resized in place: when the installation changes size the render loop
/// allocates a new buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBuffer {
    width: usize,
    height: usize,
    pixels: Vec<Rgb>,
}

impl RasterBuffer {
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            pixels: vec![Rgb::BLACK; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn clear(&mut self) {
        self.pixels.fill(Rgb::BLACK);
    }

    pub fn fill(&mut self, color: Rgb) {
        self.pixels.fill(color);
    }

    pub fn get(&self, x: usize, y: usize) -> Rgb {
        self.pixels[y * self.width + x]
    }

    /// Sample with coordinates clamped into the buffer.
    pub fn sample_clamped(&self, x: i64, y: i64) -> Rgb {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.get(x, y)
    }

    pub fn set(&mut self, x: usize, y: usize, color: Rgb) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = color;
        }
    }

    pub fn pixel_mut(&mut self, x: usize, y: usize) -> Option<&mut Rgb> {
        if x < self.width && y < self.height {
            Some(&mut self.pixels[y * self.width + x])
        } else {
            None
        }
    }

    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }
}
