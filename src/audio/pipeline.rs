use log::{debug, error, info};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::analyzer::{rms, SpectrumAnalyzer};
use super::beat::{BandRange, BeatClassifier, BeatThresholds, TempoTracker};
use super::capture::{CaptureService, PcmBlock};
use super::meter::{BandMeter, LoudnessMeter, MeterSettings};
use crate::config::AudioConfig;

/// What audio-reactive animations see, refreshed once per analysed block.
#[derive(Debug, Clone)]
pub struct AudioFeatures {
    pub captured_at: Option<Instant>,
    /// RMS, 0.0-1.0 of full scale.
    pub rms: f32,
    /// Normalised loudness, 0-255.
    pub loudness: f32,
    pub loudness_peak: f32,
    /// Normalised bands, 0-1024 each.
    pub bands: Vec<f32>,
    pub band_peaks: Vec<f32>,
    pub kick: bool,
    pub snare: bool,
    pub hat: bool,
    pub bpm: f32,
}

impl AudioFeatures {
    pub fn silent(bands: usize) -> Self {
        Self {
            captured_at: None,
            rms: 0.0,
            loudness: 0.0,
            loudness_peak: 0.0,
            bands: vec![0.0; bands],
            band_peaks: vec![0.0; bands],
            kick: false,
            snare: false,
            hat: false,
            bpm: TempoTracker::DEFAULT_BPM,
        }
    }
}

impl Default for AudioFeatures {
    fn default() -> Self {
        Self::silent(0)
    }
}

/// All per-block analysis state. Runs on a blocking worker, never on the render task.
pub struct AnalysisState {
    analyzer: SpectrumAnalyzer,
    bands: usize,
    loudness: LoudnessMeter,
    band_meter: BandMeter,
    classifier: BeatClassifier,
    tempo: TempoTracker,
}

impl AnalysisState {
    pub fn new(config: &AudioConfig, thresholds: BeatThresholds) -> Self {
        let settings = MeterSettings::from(config);
        Self {
            analyzer: SpectrumAnalyzer::new(config.analysis_window, config.db_floor),
            bands: config.bands,
            loudness: LoudnessMeter::new(settings),
            band_meter: BandMeter::new(config.bands, settings),
            classifier: BeatClassifier::new(thresholds),
            tempo: TempoTracker::new(),
        }
    }

    pub fn process(&mut self, block: &PcmBlock) -> AudioFeatures {
        let rms = rms(&block.samples);
        let loudness = self.loudness.update(rms);

        let spectrum = self.analyzer.spectrum(&block.samples, self.bands);
        let bands = self.band_meter.update(&spectrum);

        let kick = self.classifier.is_kick(&bands);
        let snare = self.classifier.is_snare(&bands);
        let hat = self.classifier.is_hat(&bands);
        let bpm = self.tempo.update(kick, block.captured_at);

        AudioFeatures {
            captured_at: Some(block.captured_at),
            rms,
            loudness,
            loudness_peak: self.loudness.peak(),
            bands,
            band_peaks: self.band_meter.peaks(),
            kick,
            snare,
            hat,
            bpm,
        }
    }
}

/// Read side handed to animations. Cheap to clone; reads never block the analyser.
#[derive(Clone)]
pub struct AudioFeed {
    rx: watch::Receiver<AudioFeatures>,
    classifier: BeatClassifier,
}

impl AudioFeed {
    pub fn latest(&self) -> AudioFeatures {
        self.rx.borrow().clone()
    }

    pub fn loudness(&self) -> f32 {
        self.rx.borrow().loudness
    }

    pub fn is_kick(&self) -> bool {
        self.rx.borrow().kick
    }

    pub fn is_snare(&self) -> bool {
        self.rx.borrow().snare
    }

    pub fn is_hat(&self) -> bool {
        self.rx.borrow().hat
    }

    /// Custom query over the current normalised bands.
    pub fn band_range_above(&self, first: usize, last: usize, threshold: f32) -> bool {
        BeatClassifier::range_above(&self.rx.borrow().bands, first, last, threshold)
    }

    pub fn matches(&self, range: &BandRange) -> bool {
        BeatClassifier::matches(&self.rx.borrow().bands, range)
    }

    pub fn classifier(&self) -> &BeatClassifier {
        &self.classifier
    }

    /// A feed that never changes. Useful where no pipeline is running.
    pub fn fixed(features: AudioFeatures, thresholds: BeatThresholds) -> Self {
        let (tx, rx) = watch::channel(features);
        // Receivers keep the last value after the sender is gone.
        drop(tx);
        Self {
            rx,
            classifier: BeatClassifier::new(thresholds),
        }
    }
}

impl std::fmt::Debug for AudioFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFeed").finish_non_exhaustive()
    }
}

/// Capture subscription plus analysis task. Stops when dropped.
pub struct AudioPipeline {
    features_rx: watch::Receiver<AudioFeatures>,
    classifier: BeatClassifier,
    task: JoinHandle<()>,
}

impl AudioPipeline {
    /// Must be called from within a tokio runtime.
    pub fn spawn(capture: &CaptureService, config: &AudioConfig, thresholds: BeatThresholds) -> Self {
        let (tx, features_rx) = watch::channel(AudioFeatures::silent(config.bands));
        let mut subscription = capture.subscribe();
        let mut state = Some(AnalysisState::new(config, thresholds));

        let task = tokio::spawn(async move {
            info!("Audio analysis pipeline started");
            while subscription.changed().await.is_ok() {
                let Some(block) = subscription.latest() else {
                    continue;
                };
                let Some(mut analysis) = state.take() else {
                    break;
                };

                let result = tokio::task::spawn_blocking(move || {
                    let features = analysis.process(&block);
                    (analysis, features)
                })
                .await;

                match result {
                    Ok((analysis, features)) => {
                        state = Some(analysis);
                        tx.send_replace(features);
                    }
                    Err(e) => {
                        error!("Audio analysis worker failed: {}", e);
                        break;
                    }
                }
            }
            debug!("Audio analysis pipeline exited");
        });

        Self {
            features_rx,
            classifier: BeatClassifier::new(thresholds),
            task,
        }
    }

    pub fn feed(&self) -> AudioFeed {
        AudioFeed {
            rx: self.features_rx.clone(),
            classifier: self.classifier,
        }
    }

    pub fn features(&self) -> watch::Receiver<AudioFeatures> {
        self.features_rx.clone()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn mixed_block(tones: &[(f32, f32)], len: usize) -> PcmBlock {
        mixed_block_at(tones, 0, len)
    }

    /// Block starting at sample `start` of a continuous signal.
    fn mixed_block_at(tones: &[(f32, f32)], start: usize, len: usize) -> PcmBlock {
        let samples = (start..start + len)
            .map(|n| {
                let v: f32 = tones
                    .iter()
                    .map(|&(freq, amp)| amp * (std::f32::consts::TAU * freq * n as f32 / 44100.0).sin())
                    .sum();
                (v.clamp(-1.0, 1.0) * 32767.0) as i16
            })
            .collect();
        PcmBlock {
            samples,
            captured_at: Instant::now(),
            sample_rate: 44100,
        }
    }

    fn tone_block(freq: f32, amplitude: f32, len: usize) -> PcmBlock {
        mixed_block(&[(freq, amplitude)], len)
    }

    #[test]
    fn test_process_shapes_and_ranges() {
        let config = AudioConfig::default();
        let mut state = AnalysisState::new(&config, BeatThresholds::default());

        let mut features = AudioFeatures::default();
        for i in 0..50 {
            let amp = if i % 10 == 0 { 0.9 } else { 0.1 };
            features = state.process(&tone_block(86.0, amp, 1024));
        }

        assert_eq!(features.bands.len(), 16);
        assert_eq!(features.band_peaks.len(), 16);
        assert!((0.0..=255.0).contains(&features.loudness));
        assert!(features.bands.iter().all(|b| (0.0..=1024.0).contains(b)));
        assert!(features.rms > 0.0);
    }

    #[test]
    fn test_bass_burst_reads_as_kick() {
        let config = AudioConfig::default();
        let mut state = AnalysisState::new(&config, BeatThresholds::default());

        // Quiet high bed, then loud energy across the two lowest bands.
        for _ in 0..100 {
            state.process(&tone_block(10_000.0, 0.05, 1024));
        }
        let burst = mixed_block(&[(300.0, 0.45), (2000.0, 0.45)], 1024);
        let features = state.process(&burst);
        assert!(features.kick);
        assert!(!features.hat);
    }

    #[test]
    fn test_steady_bass_tone_is_not_a_kick() {
        let config = AudioConfig::default();
        let mut state = AnalysisState::new(&config, BeatThresholds::default());

        let mut kicks = 0;
        for block in 0..1300 {
            let features = state.process(&mixed_block_at(&[(100.0, 0.5)], block * 1024, 1024));
            if block >= 1000 && features.kick {
                kicks += 1;
            }
        }
        assert_eq!(kicks, 0);
    }

    #[test]
    fn test_fixed_feed_queries() {
        let mut features = AudioFeatures::silent(16);
        features.bands[0] = 1000.0;
        features.bands[1] = 1000.0;
        features.kick = true;
        let feed = AudioFeed::fixed(features, BeatThresholds::default());

        assert!(feed.is_kick());
        assert!(!feed.is_hat());
        assert!(feed.band_range_above(0, 1, 900.0));
        assert!(feed.matches(&feed.classifier().thresholds().kick));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pipeline_publishes_from_synthetic_capture() {
        let config = AudioConfig {
            synthetic_only: true,
            grace_period_ms: 0,
            ..AudioConfig::default()
        };
        let capture = CaptureService::new(&config);
        let pipeline = AudioPipeline::spawn(&capture, &config, BeatThresholds::default());
        let mut features = pipeline.features();

        tokio::time::timeout(Duration::from_secs(3), features.changed())
            .await
            .unwrap()
            .unwrap();
        let latest = pipeline.feed().latest();
        assert!(latest.captured_at.is_some());
        assert!(latest.rms > 0.0);
        assert_eq!(latest.bands.len(), 16);

        drop(pipeline);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(capture.subscriber_count(), 0);
    }
}
