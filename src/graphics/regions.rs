use glam::Vec2;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::audio::AudioFeed;
use crate::effects::{Animation, AnimationUnit};
use crate::geometry::{contains_rotated, to_local, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub u64);

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "region-{}", self.0)
    }
}

/// A placed animation. Cloning shares the unit, so a snapshot draws the same
/// instance the registry holds while the geometry stays a private copy.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    pub rect: Rect,
    pub rotation: f32,
    pub unit: Arc<Mutex<Animation>>,
}

impl Region {
    pub fn lock_unit(&self) -> MutexGuard<'_, Animation> {
        self.unit.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Serialisable form of a region, for handing layouts to storage and back.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegionRecord {
    pub id: RegionId,
    pub rect: Rect,
    #[serde(default)]
    pub rotation: f32,
    pub animation: Animation,
}

/// Ordered set of regions. Registration order is paint order; the last one
/// added is on top.
///
/// The lock is held only while the list is copied or edited. Readers always
/// get an owned snapshot.
#[derive(Debug, Default)]
pub struct RegionRegistry {
    regions: Mutex<Vec<Region>>,
    next_id: AtomicU64,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Region>> {
        self.regions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn allocate_id(&self) -> RegionId {
        RegionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn add(&self, rect: Rect, rotation: f32, animation: Animation) -> RegionId {
        let id = self.allocate_id();
        debug!("Adding {} ({}) at {:?}", id, animation.kind(), rect);
        self.lock().push(Region {
            id,
            rect,
            rotation,
            unit: Arc::new(Mutex::new(animation)),
        });
        id
    }

    pub fn remove(&self, id: RegionId) -> bool {
        let mut regions = self.lock();
        let before = regions.len();
        regions.retain(|r| r.id != id);
        regions.len() != before
    }

    /// Moves, resizes or rotates a region in place. Paint order is unchanged.
    pub fn update(&self, id: RegionId, rect: Rect, rotation: f32) -> bool {
        let mut regions = self.lock();
        match regions.iter_mut().find(|r| r.id == id) {
            Some(region) => {
                region.rect = rect;
                region.rotation = rotation;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: RegionId) -> Option<Region> {
        self.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Region> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Topmost region containing `point`, honouring each region's rotation.
    pub fn hit_test(&self, point: Vec2) -> Option<RegionId> {
        self.lock()
            .iter()
            .rev()
            .find(|r| contains_rotated(&r.rect, r.rotation, point))
            .map(|r| r.id)
    }

    /// Forwards a canvas touch to the topmost region under it, in that
    /// region's local coordinates. Returns whether the unit handled it.
    pub fn touch(&self, point: Vec2) -> bool {
        let hit = self.lock().iter().rev().find_map(|r| {
            to_local(&r.rect, r.rotation, point).map(|local| (r.clone(), local))
        });

        let Some((region, local)) = hit else {
            return false;
        };

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            region.lock_unit().on_touch(local.x, local.y)
        }));
        match result {
            Ok(handled) => handled,
            Err(_) => {
                warn!("Animation in {} panicked while handling touch", region.id);
                false
            }
        }
    }

    /// Attaches an audio feed to every audio-reactive region. Returns how many
    /// regions took it.
    pub fn attach_audio(&self, feed: &AudioFeed) -> usize {
        let mut attached = 0;
        for region in self.snapshot() {
            let mut unit = region.lock_unit();
            if unit.is_audio_reactive() {
                unit.attach_audio(feed.clone());
                attached += 1;
            }
        }
        attached
    }

    /// Serialisable records for every region whose unit can be serialised.
    /// Custom units are skipped.
    pub fn export(&self) -> Vec<RegionRecord> {
        self.snapshot()
            .into_iter()
            .filter_map(|region| {
                let unit = region.lock_unit();
                let value = match serde_json::to_value(&*unit) {
                    Ok(value) => value,
                    Err(e) => {
                        debug!("Not exporting {} ({}): {}", region.id, unit.kind(), e);
                        return None;
                    }
                };
                drop(unit);
                match serde_json::from_value::<Animation>(value) {
                    Ok(animation) => Some(RegionRecord {
                        id: region.id,
                        rect: region.rect,
                        rotation: region.rotation,
                        animation,
                    }),
                    Err(e) => {
                        warn!("Failed to copy {} for export: {}", region.id, e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Replaces the registry contents with `records`, keeping their ids and
    /// order. New ids continue after the largest restored one.
    pub fn restore(&self, records: Vec<RegionRecord>) {
        let max_id = records.iter().map(|r| r.id.0).max().unwrap_or(0);
        let regions: Vec<Region> = records
            .into_iter()
            .map(|record| Region {
                id: record.id,
                rect: record.rect,
                rotation: record.rotation,
                unit: Arc::new(Mutex::new(record.animation)),
            })
            .collect();

        let mut guard = self.lock();
        *guard = regions;
        self.next_id.fetch_max(max_id, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;
    use crate::effects::{Flashlight, Layer, Solid};

    fn solid(r: u8) -> Animation {
        Animation::Solid(Solid::new(Rgb::new(r, 0, 0)))
    }

    #[test]
    fn test_overlap_resolves_to_later_region() {
        let registry = RegionRegistry::new();
        let a = registry.add(Rect::new(0.0, 0.0, 20.0, 20.0), 0.0, solid(1));
        let b = registry.add(Rect::new(10.0, 10.0, 20.0, 20.0), 0.0, solid(2));

        assert_eq!(registry.hit_test(Vec2::new(15.0, 15.0)), Some(b));
        assert_eq!(registry.hit_test(Vec2::new(5.0, 5.0)), Some(a));
        assert_eq!(registry.hit_test(Vec2::new(50.0, 50.0)), None);
    }

    #[test]
    fn test_hit_test_honours_rotation() {
        let registry = RegionRegistry::new();
        // A long thin bar rotated upright around (50, 50).
        let id = registry.add(Rect::new(0.0, 45.0, 100.0, 10.0), 90.0, solid(1));

        assert_eq!(registry.hit_test(Vec2::new(50.0, 10.0)), Some(id));
        assert_eq!(registry.hit_test(Vec2::new(10.0, 50.0)), None);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = RegionRegistry::new();
        let id = registry.add(Rect::new(0.0, 0.0, 10.0, 10.0), 0.0, solid(1));
        let snapshot = registry.snapshot();

        assert!(registry.update(id, Rect::new(5.0, 5.0, 1.0, 1.0), 45.0));
        registry.add(Rect::new(0.0, 0.0, 1.0, 1.0), 0.0, solid(2));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].rect, Rect::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(registry.get(id).unwrap().rotation, 45.0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let registry = RegionRegistry::new();
        let a = registry.add(Rect::new(0.0, 0.0, 1.0, 1.0), 0.0, solid(1));
        let b = registry.add(Rect::new(0.0, 0.0, 1.0, 1.0), 0.0, solid(2));
        assert_ne!(a, b);

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert!(!registry.update(a, Rect::default(), 0.0));
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_touch_reaches_unit_in_local_coordinates() {
        let registry = RegionRegistry::new();
        let mut light = Flashlight::default();
        light.radius = 2.0;
        let id = registry.add(Rect::new(100.0, 100.0, 10.0, 10.0), 0.0, Animation::Flashlight(light));

        assert!(registry.touch(Vec2::new(103.5, 104.5)));
        assert!(!registry.touch(Vec2::new(0.0, 0.0)));

        let region = registry.get(id).unwrap();
        let mut layer = Layer::new(10, 10);
        region.lock_unit().draw(&mut layer, 0.0).unwrap();
        assert_eq!(layer.get(3, 4).a, 255);
    }

    #[test]
    fn test_attach_audio_counts_reactive_regions() {
        use crate::audio::{AudioFeatures, BeatThresholds};
        use crate::effects::{BeatPulse, SpectrumBars};

        let registry = RegionRegistry::new();
        registry.add(Rect::new(0.0, 0.0, 10.0, 10.0), 0.0, solid(1));
        registry.add(Rect::new(0.0, 0.0, 10.0, 10.0), 0.0, Animation::Spectrum(SpectrumBars::default()));
        registry.add(Rect::new(0.0, 0.0, 10.0, 10.0), 0.0, Animation::BeatPulse(BeatPulse::default()));

        let feed = AudioFeed::fixed(AudioFeatures::silent(16), BeatThresholds::default());
        assert_eq!(registry.attach_audio(&feed), 2);
    }

    #[test]
    fn test_touch_on_solid_is_unhandled() {
        let registry = RegionRegistry::new();
        registry.add(Rect::new(0.0, 0.0, 10.0, 10.0), 0.0, solid(1));
        assert!(!registry.touch(Vec2::new(5.0, 5.0)));
    }

    #[test]
    fn test_export_restore_keeps_order_and_ids() {
        let registry = RegionRegistry::new();
        let a = registry.add(Rect::new(0.0, 0.0, 4.0, 4.0), 10.0, solid(1));
        let b = registry.add(Rect::new(2.0, 2.0, 4.0, 4.0), 0.0, Animation::Rainbow(Default::default()));
        let records = registry.export();
        assert_eq!(records.len(), 2);

        let json = serde_json::to_string(&records).unwrap();
        let restored = RegionRegistry::new();
        restored.restore(serde_json::from_str(&json).unwrap());

        let snapshot = restored.snapshot();
        assert_eq!(snapshot.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(snapshot[0].rotation, 10.0);
        assert_eq!(snapshot[1].lock_unit().kind(), "rainbow");

        let c = restored.add(Rect::default(), 0.0, solid(3));
        assert!(c > b);
    }

    #[test]
    fn test_export_skips_custom_units() {
        struct Blank;
        impl AnimationUnit for Blank {
            fn draw(&mut self, _layer: &mut Layer, _dt: f32) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let registry = RegionRegistry::new();
        registry.add(Rect::default(), 0.0, Animation::custom(Blank));
        registry.add(Rect::default(), 0.0, solid(1));
        assert_eq!(registry.export().len(), 1);
    }
}
