use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ledcanvas::audio::{AudioPipeline, CaptureService};
use ledcanvas::config::EngineConfig;
use ledcanvas::effects::{Animation, BeatPulse, Rainbow, SpectrumBars};
use ledcanvas::geometry::Rect;
use ledcanvas::graphics::{RegionRecord, RegionRegistry, RenderLoop};
use ledcanvas::installation::{Device, Installation};
use ledcanvas::transport::{Framing, UdpTransmitter};

#[derive(Parser)]
#[command(name = "ledcanvas")]
#[command(about = "Render animated regions onto LED fixtures over UDP")]
struct Args {
    /// Engine configuration (JSON). Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Installation layout (JSON). A small demo layout is used when omitted.
    #[arg(long, short)]
    installation: Option<PathBuf>,

    /// Saved region layout (JSON list of region records)
    #[arg(long, short)]
    regions: Option<PathBuf>,

    /// Skip the microphone and use the synthetic signal
    #[arg(long)]
    synthetic: bool,

    /// Use the 10-byte extended frame header
    #[arg(long)]
    extended: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration: Option<u64>,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn demo_installation() -> Installation {
    Installation::new(120.0, 40.0)
        .with_device(Device {
            ip: "127.0.0.1".to_string(),
            pixel_count: 60,
            x: 5.0,
            y: 2.0,
            width: 110.0,
            height: 4.0,
            rotation: 0.0,
            segment_width: 0,
        })
        .with_device(Device {
            ip: "127.0.0.2".to_string(),
            pixel_count: 256,
            x: 44.0,
            y: 8.0,
            width: 32.0,
            height: 32.0,
            rotation: 0.0,
            segment_width: 16,
        })
}

fn default_regions(regions: &RegionRegistry, installation: &Installation) {
    let (w, h) = (installation.width, installation.height);
    regions.add(Rect::new(0.0, 0.0, w, h), 0.0, Animation::Rainbow(Rainbow::default()));
    regions.add(
        Rect::new(w * 0.3, h * 0.2, w * 0.4, h * 0.8),
        0.0,
        Animation::Spectrum(SpectrumBars::default()),
    );
    regions.add(Rect::new(0.0, 0.0, w, h * 0.2), 0.0, Animation::BeatPulse(BeatPulse::default()));
}

fn load_regions(path: &Path) -> Result<Vec<RegionRecord>> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading regions {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing regions {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if args.synthetic {
        config.audio.synthetic_only = true;
    }
    if args.extended {
        config.transport.framing = Framing::Extended;
    }

    if let Some(path) = &args.dump_config {
        config.save(path)?;
        info!("Configuration written to {}", path.display());
        return Ok(());
    }

    let installation = match &args.installation {
        Some(path) => Installation::load(path)?,
        None => {
            warn!("No installation given, using the demo layout");
            demo_installation()
        }
    };
    info!(
        "Installation {}x{} with {} devices",
        installation.width,
        installation.height,
        installation.devices.len()
    );

    let capture = CaptureService::new(&config.audio);
    let pipeline = AudioPipeline::spawn(&capture, &config.audio, config.beats);

    let regions = Arc::new(RegionRegistry::new());
    match &args.regions {
        Some(path) => regions.restore(load_regions(path)?),
        None => default_regions(&regions, &installation),
    }
    let reactive = regions.attach_audio(&pipeline.feed());
    info!("{} regions placed, {} audio-reactive", regions.len(), reactive);

    let transmitter = Arc::new(UdpTransmitter::bind(&config.transport).await?);
    let render = RenderLoop::new(&config, installation, regions, transmitter);
    render.start();

    let shutdown = tokio::signal::ctrl_c();
    match args.duration {
        Some(secs) => {
            tokio::select! {
                result = shutdown => result.context("waiting for Ctrl-C")?,
                _ = tokio::time::sleep(Duration::from_secs(secs)) => info!("Run time of {}s reached", secs),
            }
        }
        None => shutdown.await.context("waiting for Ctrl-C")?,
    }

    render.stop();
    pipeline.stop();
    capture.shutdown();
    info!("Sent {} frames, shutting down", render.frame_count());
    Ok(())
}
