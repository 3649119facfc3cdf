use glam::Vec2;
use log::warn;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::raster::RasterBuffer;
use super::regions::Region;
use crate::effects::{AnimationUnit, Layer};
use crate::geometry::to_local;

/// Repaints `buffer` from black with every region in `regions`, in order.
///
/// Each unit draws into its own layer, sized to its rectangle, which is then
/// blended into the buffer through the region's rotation and clipped to it. A
/// unit that errors or panics is skipped for this frame; whatever it drew is
/// discarded. Returns how many regions were skipped.
pub fn compose(buffer: &mut RasterBuffer, regions: &[Region], dt: f32) -> usize {
    buffer.clear();

    let mut skipped = 0;
    for region in regions {
        let Some(layer) = draw_region(region, dt) else {
            skipped += 1;
            continue;
        };
        blit(buffer, region, &layer);
    }
    skipped
}

fn layer_size(region: &Region) -> Option<(usize, usize)> {
    let (w, h) = (region.rect.width, region.rect.height);
    if !(w.is_finite() && h.is_finite()) || w <= 0.0 || h <= 0.0 {
        return None;
    }
    Some(((w.round() as usize).max(1), (h.round() as usize).max(1)))
}

fn draw_region(region: &Region, dt: f32) -> Option<Layer> {
    let (width, height) = layer_size(region)?;
    let mut layer = Layer::new(width, height);

    let result = catch_unwind(AssertUnwindSafe(|| region.lock_unit().draw(&mut layer, dt)));
    match result {
        Ok(Ok(())) => Some(layer),
        Ok(Err(e)) => {
            warn!("Animation in {} failed to draw: {:#}", region.id, e);
            None
        }
        Err(_) => {
            warn!("Animation in {} panicked while drawing", region.id);
            None
        }
    }
}

fn blit(buffer: &mut RasterBuffer, region: &Region, layer: &Layer) {
    let bounds = region.rect.rotated_bounds(region.rotation);
    let (bw, bh) = buffer.size();

    let x0 = bounds.x.floor().max(0.0) as usize;
    let y0 = bounds.y.floor().max(0.0) as usize;
    let x1 = ((bounds.x + bounds.width).ceil().max(0.0) as usize).min(bw);
    let y1 = ((bounds.y + bounds.height).ceil().max(0.0) as usize).min(bh);

    // Layer pixels per canvas unit, usually 1 but the rect size was rounded.
    let sx = layer.width() as f32 / region.rect.width;
    let sy = layer.height() as f32 / region.rect.height;

    for y in y0..y1 {
        for x in x0..x1 {
            let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let Some(local) = to_local(&region.rect, region.rotation, center) else {
                continue;
            };
            let lx = ((local.x * sx) as usize).min(layer.width() - 1);
            let ly = ((local.y * sy) as usize).min(layer.height() - 1);

            let src = layer.get(lx, ly);
            if let Some(dst) = buffer.pixel_mut(x, y) {
                *dst = src.over(*dst);
            }
        }
    }
}
