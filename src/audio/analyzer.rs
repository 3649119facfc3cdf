use log::warn;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Upper bound of the band scale produced by [`SpectrumAnalyzer::spectrum`].
pub const BAND_MAX: u16 = 1024;

/// RMS of a block of 16-bit samples, normalised so full scale is 1.0.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();
    ((sum_sq / samples.len() as f64).sqrt() as f32).clamp(0.0, 1.0)
}

/// Windowed FFT over the most recent `window_len` samples of a block,
/// reduced to a caller-chosen number of log-scaled bands.
pub struct SpectrumAnalyzer {
    window_len: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    db_floor: f32,
}

impl SpectrumAnalyzer {
    pub fn new(window_len: usize, db_floor: f32) -> Self {
        let window_len = if window_len.is_power_of_two() {
            window_len
        } else {
            let rounded = window_len.max(2).next_power_of_two();
            warn!("Analysis window {} is not a power of two, using {}", window_len, rounded);
            rounded
        };

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_len);

        Self {
            window_len,
            fft,
            window: Self::hann_window(window_len),
            buffer: vec![Complex::new(0.0, 0.0); window_len],
            db_floor: db_floor.min(-1.0),
        }
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    fn hann_window(size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect()
    }

    /// Band levels in `0..=BAND_MAX`. Returns all zeros when the block is
    /// shorter than the analysis window.
    pub fn spectrum(&mut self, samples: &[i16], bands: usize) -> Vec<u16> {
        if bands == 0 {
            return Vec::new();
        }
        if samples.len() < self.window_len {
            return vec![0; bands];
        }

        let magnitudes = self.magnitudes(&samples[samples.len() - self.window_len..]);
        let bins = magnitudes.len();

        (0..bands)
            .map(|band| {
                let start = band * bins / bands;
                let end = ((band + 1) * bins / bands).max(start + 1).min(bins);
                if start >= end {
                    return 0;
                }
                let avg = magnitudes[start..end].iter().sum::<f32>() / (end - start) as f32;
                self.to_band_level(avg)
            })
            .collect()
    }

    /// Single-sided magnitude spectrum, scaled so a full-scale sine on a bin
    /// centre reads about 0.5 after the Hann window.
    fn magnitudes(&mut self, samples: &[i16]) -> Vec<f32> {
        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(samples).zip(&self.window) {
            *slot = Complex::new(sample as f32 / 32768.0 * w, 0.0);
        }

        self.fft.process(&mut self.buffer);

        let scale = 2.0 / self.window_len as f32;
        self.buffer[..self.window_len / 2]
            .iter()
            .map(|c| c.norm() * scale)
            .collect()
    }

    fn to_band_level(&self, magnitude: f32) -> u16 {
        let db = 20.0 * magnitude.max(1e-12).log10();
        let level = (db - self.db_floor) / -self.db_floor * BAND_MAX as f32;
        level.clamp(0.0, BAND_MAX as f32) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f32 = 44100.0;

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<i16> {
        (0..len)
            .map(|n| {
                let v = amplitude * (2.0 * std::f32::consts::PI * freq * n as f32 / RATE).sin();
                (v * 32767.0) as i16
            })
            .collect()
    }

    #[test]
    fn test_rms_levels() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0; 256]), 0.0);

        let full: Vec<i16> = (0..256).map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN }).collect();
        assert!((rms(&full) - 1.0).abs() < 1e-3);

        // sine RMS is amplitude / sqrt(2)
        let s = sine(1000.0, 0.5, 4410);
        assert!((rms(&s) - 0.5 / 2f32.sqrt()).abs() < 0.01);
    }

    #[test]
    fn test_short_block_yields_zero_spectrum() {
        let mut analyzer = SpectrumAnalyzer::new(512, -90.0);
        let out = analyzer.spectrum(&sine(440.0, 0.8, 300), 16);
        assert_eq!(out, vec![0; 16]);
    }

    #[test]
    fn test_aligned_sine_dominates_its_band() {
        let mut analyzer = SpectrumAnalyzer::new(512, -90.0);
        // 16 bands over 256 bins: 16 bins per band. Bin 40 sits in band 2.
        let freq = 40.0 * RATE / 512.0;
        let out = analyzer.spectrum(&sine(freq, 0.5, 1024), 16);

        assert_eq!(out.len(), 16);
        let loudest = out.iter().enumerate().max_by_key(|(_, v)| **v).map(|(i, _)| i);
        assert_eq!(loudest, Some(2));
        for (i, &v) in out.iter().enumerate() {
            if i != 2 {
                assert!(v < out[2], "band {} = {} vs {}", i, v, out[2]);
            }
        }
        assert!(out.iter().all(|&v| v <= BAND_MAX));
    }

    #[test]
    fn test_silence_is_floor() {
        let mut analyzer = SpectrumAnalyzer::new(512, -90.0);
        assert_eq!(analyzer.spectrum(&[0; 512], 8), vec![0; 8]);
    }

    #[test]
    fn test_more_bands_than_bins() {
        let mut analyzer = SpectrumAnalyzer::new(16, -90.0);
        let out = analyzer.spectrum(&sine(2000.0, 0.5, 16), 20);
        assert_eq!(out.len(), 20);
    }

    #[test]
    fn test_window_rounds_to_power_of_two() {
        assert_eq!(SpectrumAnalyzer::new(500, -90.0).window_len(), 512);
    }
}
