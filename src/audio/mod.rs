pub mod analyzer;
pub mod beat;
pub mod capture;
pub mod meter;
pub mod pipeline;
pub mod synth;

pub use analyzer::{rms, SpectrumAnalyzer, BAND_MAX};
pub use beat::{BandRange, BeatClassifier, BeatThresholds, TempoTracker};
pub use capture::{CaptureService, CaptureSubscription, PcmBlock};
pub use meter::{AdaptiveMeter, BandMeter, LoudnessMeter, MeterSettings};
pub use pipeline::{AnalysisState, AudioFeatures, AudioFeed, AudioPipeline};
pub use synth::SyntheticSource;
