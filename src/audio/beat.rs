use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

/// Inclusive band index range whose mean must exceed `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandRange {
    pub first: usize,
    pub last: usize,
    pub threshold: f32,
}

impl BandRange {
    pub const fn new(first: usize, last: usize, threshold: f32) -> Self {
        Self { first, last, threshold }
    }
}

/// Empirically tuned presets on the 0-1024 normalised band scale, sized for
/// 16 bands. Ranges past the end of a shorter spectrum are clipped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatThresholds {
    pub kick: BandRange,
    pub snare: BandRange,
    pub hat: BandRange,
}

impl Default for BeatThresholds {
    fn default() -> Self {
        Self {
            kick: BandRange::new(0, 1, 700.0),
            snare: BandRange::new(5, 8, 600.0),
            hat: BandRange::new(12, 15, 600.0),
        }
    }
}

/// Stateless threshold checks over normalised band values.
#[derive(Debug, Clone, Copy, Default)]
pub struct BeatClassifier {
    thresholds: BeatThresholds,
}

impl BeatClassifier {
    pub fn new(thresholds: BeatThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &BeatThresholds {
        &self.thresholds
    }

    pub fn is_kick(&self, bands: &[f32]) -> bool {
        Self::matches(bands, &self.thresholds.kick)
    }

    pub fn is_snare(&self, bands: &[f32]) -> bool {
        Self::matches(bands, &self.thresholds.snare)
    }

    pub fn is_hat(&self, bands: &[f32]) -> bool {
        Self::matches(bands, &self.thresholds.hat)
    }

    pub fn matches(bands: &[f32], range: &BandRange) -> bool {
        Self::range_above(bands, range.first, range.last, range.threshold)
    }

    /// Mean of `bands[first..=last]` (clipped to the slice) above `threshold`.
    /// An empty or out-of-range selection is never a hit.
    pub fn range_above(bands: &[f32], first: usize, last: usize, threshold: f32) -> bool {
        if bands.is_empty() || first > last || first >= bands.len() {
            return false;
        }
        let last = last.min(bands.len() - 1);
        let slice = &bands[first..=last];
        let mean = slice.iter().sum::<f32>() / slice.len() as f32;
        mean > threshold
    }
}

/// BPM estimate from the spacing of kick onsets.
#[derive(Debug, Clone)]
pub struct TempoTracker {
    intervals: VecDeque<f32>,
    last_onset: Option<Instant>,
    was_active: bool,
    bpm: f32,
}

impl TempoTracker {
    const MAX_INTERVALS: usize = 8;
    const MIN_INTERVAL: f32 = 0.3;
    const MAX_INTERVAL: f32 = 2.0;
    pub const DEFAULT_BPM: f32 = 120.0;

    pub fn new() -> Self {
        Self {
            intervals: VecDeque::with_capacity(Self::MAX_INTERVALS),
            last_onset: None,
            was_active: false,
            bpm: Self::DEFAULT_BPM,
        }
    }

    /// Feed the current kick state. Only rising edges count as onsets.
    pub fn update(&mut self, active: bool, at: Instant) -> f32 {
        let onset = active && !self.was_active;
        self.was_active = active;

        if onset {
            if let Some(last) = self.last_onset {
                let interval = at.saturating_duration_since(last).as_secs_f32();
                if interval > Self::MIN_INTERVAL && interval < Self::MAX_INTERVAL {
                    if self.intervals.len() == Self::MAX_INTERVALS {
                        self.intervals.pop_front();
                    }
                    self.intervals.push_back(interval);

                    let avg = self.intervals.iter().sum::<f32>() / self.intervals.len() as f32;
                    self.bpm = 60.0 / avg;
                }
            }
            self.last_onset = Some(at);
        }

        self.bpm
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }
}

impl Default for TempoTracker {
    fn default() -> Self {
        Self::new()
    }
}
