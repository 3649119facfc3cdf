use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ledcanvas::audio::{AudioFeatures, AudioPipeline, CaptureService, CaptureSubscription, BAND_MAX};
use ledcanvas::config::EngineConfig;

#[derive(Parser)]
#[command(name = "audio-monitor")]
#[command(about = "Live terminal view of the audio analysis pipeline")]
struct Args {
    /// Engine configuration (JSON). Only the audio and beat sections are used.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Skip the microphone and use the synthetic signal
    #[arg(long)]
    synthetic: bool,

    /// Also write the captured PCM to this WAV file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration: Option<u64>,

    /// Redraws per second
    #[arg(long, default_value = "10")]
    refresh: u32,
}

const BAR_WIDTH: usize = 32;

fn bar(value: f32, max: f32) -> String {
    let filled = ((value / max).clamp(0.0, 1.0) * BAR_WIDTH as f32).round() as usize;
    format!("{}{}", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

fn render(features: &AudioFeatures) -> String {
    let mut out = String::new();
    out.push_str("\x1b[2J\x1b[H");
    out.push_str(&format!(
        "loudness {:>5.1} |{}|  peak {:>5.1}\n",
        features.loudness,
        bar(features.loudness, 255.0),
        features.loudness_peak
    ));
    out.push_str(&format!(
        "kick {}  snare {}  hat {}  bpm {:>5.1}\n\n",
        flag(features.kick),
        flag(features.snare),
        flag(features.hat),
        features.bpm
    ));
    for (i, value) in features.bands.iter().enumerate() {
        out.push_str(&format!("band {:>2} {:>6.1} |{}|\n", i, value, bar(*value, BAND_MAX as f32)));
    }
    out
}

fn flag(on: bool) -> &'static str {
    if on {
        "[X]"
    } else {
        "[ ]"
    }
}

type WavRecorder = hound::WavWriter<std::io::BufWriter<std::fs::File>>;

struct Recording {
    subscription: CaptureSubscription,
    writer: WavRecorder,
    samples: u64,
}

impl Recording {
    fn create(path: &Path, capture: &CaptureService, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("creating WAV file {}", path.display()))?;
        info!("Recording to {}", path.display());
        Ok(Self {
            subscription: capture.subscribe(),
            writer,
            samples: 0,
        })
    }

    /// Writes the newest block. Blocks superseded before this runs are not recorded.
    fn write_latest(&mut self) -> Result<()> {
        if let Some(block) = self.subscription.latest() {
            for &sample in &block.samples {
                self.writer.write_sample(sample)?;
            }
            self.samples += block.samples.len() as u64;
        }
        Ok(())
    }

    fn finish(self) -> Result<u64> {
        self.writer.finalize().context("finalising WAV file")?;
        Ok(self.samples)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if args.synthetic {
        config.audio.synthetic_only = true;
    }

    let capture = CaptureService::new(&config.audio);
    let pipeline = AudioPipeline::spawn(&capture, &config.audio, config.beats);
    let mut features = pipeline.features();

    let mut recording = match &args.record {
        Some(path) => Some(Recording::create(path, &capture, config.audio.sample_rate)?),
        None => None,
    };

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut redraw = tokio::time::interval(Duration::from_secs_f64(1.0 / args.refresh.max(1) as f64));
    redraw.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = &mut deadline => break,
            changed = features.changed() => {
                if changed.is_err() {
                    warn!("Analysis pipeline stopped");
                    break;
                }
            }
            Ok(()) = async {
                match recording.as_mut() {
                    Some(r) => r.subscription.changed().await.map_err(|_| ()),
                    None => std::future::pending().await,
                }
            } => {
                if let Some(r) = recording.as_mut() {
                    r.write_latest()?;
                }
            }
            _ = redraw.tick() => {
                let frame = render(&features.borrow_and_update());
                stdout.write_all(frame.as_bytes())?;
                stdout.flush()?;
            }
        }
    }

    pipeline.stop();
    if let Some(r) = recording {
        let samples = r.finish()?;
        info!("Recorded {} samples", samples);
    }
    capture.shutdown();
    Ok(())
}
