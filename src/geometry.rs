//! Canvas geometry shared by region hit-testing, compositing and device mapping.
//!
//! All coordinates are virtual canvas units with y pointing down. Rotations are
//! in degrees and turn clockwise on screen.

use glam::Vec2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }

    /// Axis-aligned containment, edges inclusive.
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    /// Canvas-space bounding box of this rectangle after rotating it about its centre.
    pub fn rotated_bounds(&self, rotation_deg: f32) -> Rect {
        let center = self.center();
        let rot = rotation(rotation_deg);
        let half = self.size() / 2.0;
        let corners = [
            Vec2::new(-half.x, -half.y),
            Vec2::new(half.x, -half.y),
            Vec2::new(half.x, half.y),
            Vec2::new(-half.x, half.y),
        ];

        let mut min = Vec2::splat(f32::INFINITY);
        let mut max = Vec2::splat(f32::NEG_INFINITY);
        for corner in corners {
            let p = center + rot.rotate(corner);
            min = min.min(p);
            max = max.max(p);
        }

        Rect::new(min.x, min.y, max.x - min.x, max.y - min.y)
    }
}

/// Unit vector `(cos, sin)` for a rotation in degrees, usable with `Vec2::rotate`.
pub fn rotation(degrees: f32) -> Vec2 {
    Vec2::from_angle(degrees.to_radians())
}

/// Maps a canvas point into the unrotated frame of `rect`: translate relative to
/// the centre, apply the inverse rotation, translate back.
pub fn unrotate(rect: &Rect, rotation_deg: f32, p: Vec2) -> Vec2 {
    let center = rect.center();
    center + rotation(-rotation_deg).rotate(p - center)
}

/// Hit test against a rectangle rotated about its centre.
pub fn contains_rotated(rect: &Rect, rotation_deg: f32, p: Vec2) -> bool {
    rect.contains(unrotate(rect, rotation_deg, p))
}

/// Local coordinates (origin at the rectangle's top-left) of a canvas point,
/// or `None` when the point falls outside the rotated rectangle.
pub fn to_local(rect: &Rect, rotation_deg: f32, p: Vec2) -> Option<Vec2> {
    let unrotated = unrotate(rect, rotation_deg, p);
    rect.contains(unrotated)
        .then(|| unrotated - Vec2::new(rect.x, rect.y))
}
