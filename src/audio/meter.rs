use std::collections::VecDeque;

use crate::config::AudioConfig;

/// Smoothing and history settings shared by every meter in a pipeline.
#[derive(Debug, Clone, Copy)]
pub struct MeterSettings {
    pub capacity: usize,
    /// Blend weight applied when the input rises above the smoothed value.
    pub attack: f32,
    /// Blend weight applied when the input falls below it.
    pub decay: f32,
    /// Fraction of the output range the peak line loses per update.
    pub peak_decay: f32,
    /// History spread below this fraction of the range counts as flat.
    pub min_span: f32,
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

impl From<&AudioConfig> for MeterSettings {
    fn from(config: &AudioConfig) -> Self {
        Self {
            capacity: config.history.max(1),
            attack: config.attack.clamp(0.0, 1.0),
            decay: config.decay.clamp(0.0, 1.0),
            peak_decay: config.peak_decay.clamp(0.0, 1.0),
            min_span: config.min_span.clamp(0.0, 1.0),
        }
    }
}

/// One tracked signal: asymmetric EMA, then rescaled into the min/max of a
/// rolling history of smoothed values so ambient gain drift cancels out.
///
/// Output stays inside `0..=range_max`. With fewer than two history entries
/// the smoothed value passes straight through. A history whose spread is under
/// `min_span` of the range is flat and the output sits at the midpoint, so a
/// steady signal's jitter is not stretched to full scale.
#[derive(Debug, Clone)]
pub struct AdaptiveMeter {
    range_max: f32,
    settings: MeterSettings,
    smoothed: f32,
    history: VecDeque<f32>,
    value: f32,
    peak: f32,
}

impl AdaptiveMeter {
    pub fn new(range_max: f32, settings: MeterSettings) -> Self {
        Self {
            range_max,
            settings,
            smoothed: 0.0,
            history: VecDeque::with_capacity(settings.capacity),
            value: 0.0,
            peak: 0.0,
        }
    }

    pub fn update(&mut self, raw: f32) -> f32 {
        let raw = if raw.is_finite() { raw.clamp(0.0, self.range_max) } else { 0.0 };

        let factor = if raw > self.smoothed {
            self.settings.attack
        } else {
            self.settings.decay
        };
        self.smoothed += factor * (raw - self.smoothed);

        if self.history.len() >= self.settings.capacity {
            self.history.pop_front();
        }
        self.history.push_back(self.smoothed);

        self.value = self.rescale();
        self.peak = self
            .value
            .max(self.peak - self.settings.peak_decay * self.range_max)
            .clamp(0.0, self.range_max);
        self.value
    }

    fn rescale(&self) -> f32 {
        if self.history.len() < 2 {
            return self.smoothed.clamp(0.0, self.range_max);
        }

        let (min, max) = self
            .history
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        if max - min <= (self.settings.min_span * self.range_max).max(f32::EPSILON) {
            return self.midpoint();
        }

        ((self.smoothed - min) / (max - min) * self.range_max).clamp(0.0, self.range_max)
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn smoothed(&self) -> f32 {
        self.smoothed
    }

    pub fn midpoint(&self) -> f32 {
        self.range_max / 2.0
    }

    pub fn range_max(&self) -> f32 {
        self.range_max
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

/// Overall loudness on a 0-255 scale. Input is RMS in 0.0-1.0.
#[derive(Debug, Clone)]
pub struct LoudnessMeter {
    meter: AdaptiveMeter,
}

impl LoudnessMeter {
    pub const RANGE: f32 = 255.0;

    pub fn new(settings: MeterSettings) -> Self {
        Self {
            meter: AdaptiveMeter::new(Self::RANGE, settings),
        }
    }

    pub fn update(&mut self, rms: f32) -> f32 {
        self.meter.update(rms * Self::RANGE)
    }

    pub fn value(&self) -> f32 {
        self.meter.value()
    }

    pub fn peak(&self) -> f32 {
        self.meter.peak()
    }
}

/// Per-band meters on the 0-1024 band scale.
#[derive(Debug, Clone)]
pub struct BandMeter {
    meters: Vec<AdaptiveMeter>,
}

impl BandMeter {
    pub const RANGE: f32 = super::analyzer::BAND_MAX as f32;

    pub fn new(bands: usize, settings: MeterSettings) -> Self {
        Self {
            meters: (0..bands).map(|_| AdaptiveMeter::new(Self::RANGE, settings)).collect(),
        }
    }

    /// Extra input bands are ignored; missing ones read as silence.
    pub fn update(&mut self, levels: &[u16]) -> Vec<f32> {
        self.meters
            .iter_mut()
            .enumerate()
            .map(|(i, meter)| meter.update(levels.get(i).copied().unwrap_or(0) as f32))
            .collect()
    }

    pub fn values(&self) -> Vec<f32> {
        self.meters.iter().map(AdaptiveMeter::value).collect()
    }

    pub fn peaks(&self) -> Vec<f32> {
        self.meters.iter().map(AdaptiveMeter::peak).collect()
    }

    pub fn len(&self) -> usize {
        self.meters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }
}
