use glam::Vec2;

use super::raster::RasterBuffer;
use crate::config::MappingConfig;
use crate::geometry::rotation;
use crate::installation::Device;

/// How a device's LEDs are laid out inside its rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Strip,
    Matrix { cols: usize, rows: usize },
}

fn aspect_ratio(device: &Device) -> f32 {
    if device.height > f32::EPSILON && device.width.is_finite() {
        device.width / device.height
    } else {
        f32::INFINITY
    }
}

fn perfect_square_root(n: usize) -> Option<usize> {
    let root = (n as f64).sqrt().round() as usize;
    (root * root == n).then_some(root)
}

/// Strip or matrix, from the explicit segment width or else the shape heuristic.
pub fn layout(device: &Device, config: &MappingConfig) -> Layout {
    let n = device.pixel_count;
    let aspect = aspect_ratio(device);

    let matrix = device.segment_width > 1
        || (n > config.matrix_min_pixels && aspect < config.strip_aspect_ratio);
    if !matrix || n == 0 {
        return Layout::Strip;
    }

    let cols = if device.segment_width > 0 {
        device.segment_width
    } else if let Some(root) = perfect_square_root(n) {
        root
    } else {
        let inferred = (n as f32 * aspect).sqrt().round();
        if inferred.is_finite() {
            (inferred as usize).max(1)
        } else {
            n
        }
    };
    let rows = n.div_ceil(cols);
    Layout::Matrix { cols, rows }
}

/// Offset of item `index` of `count` spread evenly over `extent`, centred on 0.
/// A single item sits at the centre.
fn spread(index: usize, count: usize, extent: f32) -> f32 {
    if count > 1 && extent.is_finite() {
        -extent / 2.0 + index as f32 * extent / (count - 1) as f32
    } else {
        0.0
    }
}

/// Buffer pixel each LED samples, in LED index order. Rows of a matrix run
/// left to right; serpentine wiring is not reversed here.
pub fn led_positions(device: &Device, width: usize, height: usize, config: &MappingConfig) -> Vec<(usize, usize)> {
    let n = device.pixel_count;
    if n == 0 {
        return Vec::new();
    }

    let center = device.bounds().center();
    let rot = rotation(device.rotation);
    let max_x = width.max(1) as f32 - 1.0;
    let max_y = height.max(1) as f32 - 1.0;

    let layout = layout(device, config);
    (0..n)
        .map(|i| {
            let local = match layout {
                Layout::Strip => Vec2::new(spread(i, n, device.width), 0.0),
                Layout::Matrix { cols, rows } => Vec2::new(
                    spread(i % cols, cols, device.width),
                    spread(i / cols, rows, device.height),
                ),
            };
            let p = center + rot.rotate(local);
            let x = if p.x.is_finite() { p.x.round().clamp(0.0, max_x) } else { 0.0 };
            let y = if p.y.is_finite() { p.y.round().clamp(0.0, max_y) } else { 0.0 };
            (x as usize, y as usize)
        })
        .collect()
}

/// RGB triples for the given positions, ready for the wire.
pub fn sample(buffer: &RasterBuffer, positions: &[(usize, usize)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(positions.len() * 3);
    for &(x, y) in positions {
        let pixel = buffer.sample_clamped(x as i64, y as i64);
        out.extend_from_slice(bytemuck::bytes_of(&pixel));
    }
    out
}

pub fn sample_device(device: &Device, buffer: &RasterBuffer, config: &MappingConfig) -> Vec<u8> {
    let positions = led_positions(device, buffer.width(), buffer.height(), config);
    sample(buffer, &positions)
}
