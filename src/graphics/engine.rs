use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::compositor::compose;
use super::mapping::{led_positions, sample};
use super::raster::RasterBuffer;
use super::regions::RegionRegistry;
use crate::config::{EngineConfig, MappingConfig};
use crate::installation::{Device, Installation};
use crate::transport::FrameSink;

/// Time left in the frame budget. Zero when the tick overran.
pub fn frame_delay(target: Duration, elapsed: Duration) -> Duration {
    target.saturating_sub(elapsed)
}

/// Fixed-cadence render loop: composite regions, sample every device, send,
/// publish a preview, sleep out the rest of the frame.
///
/// Cadence is best effort. An overrunning tick is followed immediately by the
/// next one; missed frames are not made up.
pub struct RenderLoop {
    shared: Arc<Shared>,
    run: Mutex<Option<Run>>,
}

struct Shared {
    target_frame: Duration,
    mapping: MappingConfig,
    regions: Arc<RegionRegistry>,
    sink: Arc<dyn FrameSink>,
    installation: watch::Sender<Arc<Installation>>,
    preview: watch::Sender<Arc<RasterBuffer>>,
    frames: AtomicU64,
}

struct Run {
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Run {
    fn is_live(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.handle.is_finished()
    }
}

/// A device together with the buffer pixels its LEDs sample.
struct MappedDevice {
    device: Device,
    positions: Vec<(usize, usize)>,
}

impl RenderLoop {
    pub fn new(
        config: &EngineConfig,
        installation: Installation,
        regions: Arc<RegionRegistry>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        let (width, height) = installation.raster_size();
        let (installation, _) = watch::channel(Arc::new(installation));
        let (preview, _) = watch::channel(Arc::new(RasterBuffer::new(width, height)));

        Self {
            shared: Arc::new(Shared {
                target_frame: Duration::from_millis(config.render.target_frame_ms),
                mapping: config.mapping.clone(),
                regions,
                sink,
                installation,
                preview,
                frames: AtomicU64::new(0),
            }),
            run: Mutex::new(None),
        }
    }

    fn lock_run(&self) -> MutexGuard<'_, Option<Run>> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts ticking on the current tokio runtime. Returns false if already running.
    pub fn start(&self) -> bool {
        let mut run = self.lock_run();
        if run.as_ref().map_or(false, Run::is_live) {
            return false;
        }

        let active = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(run_loop(Arc::clone(&self.shared), Arc::clone(&active)));
        *run = Some(Run { active, handle });
        info!("Render loop started ({} ms frames)", self.shared.target_frame.as_millis());
        true
    }

    /// Stops the loop without waiting for it. Any send not yet issued is
    /// dropped. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let Some(run) = self.lock_run().take() else {
            return false;
        };
        let was_live = run.is_live();
        run.active.store(false, Ordering::Release);
        run.handle.abort();
        if was_live {
            info!("Render loop stopped after {} frames", self.frame_count());
        }
        was_live
    }

    pub fn is_running(&self) -> bool {
        self.lock_run().as_ref().map_or(false, Run::is_live)
    }

    /// Replaces the installation. Takes effect at the next tick.
    pub fn set_installation(&self, installation: Installation) {
        self.shared.installation.send_replace(Arc::new(installation));
    }

    pub fn installation(&self) -> Arc<Installation> {
        self.shared.installation.borrow().clone()
    }

    /// Copy of the raster published after every tick.
    pub fn preview(&self) -> watch::Receiver<Arc<RasterBuffer>> {
        self.shared.preview.subscribe()
    }

    pub fn regions(&self) -> Arc<RegionRegistry> {
        Arc::clone(&self.shared.regions)
    }

    pub fn frame_count(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn map_devices(installation: &Installation, buffer: &RasterBuffer, config: &MappingConfig) -> Vec<MappedDevice> {
    installation
        .devices
        .iter()
        .map(|device| MappedDevice {
            device: device.clone(),
            positions: led_positions(device, buffer.width(), buffer.height(), config),
        })
        .collect()
}

async fn run_loop(shared: Arc<Shared>, active: Arc<AtomicBool>) {
    let mut installation_rx = shared.installation.subscribe();
    let mut installation = installation_rx.borrow_and_update().clone();
    let (width, height) = installation.raster_size();
    let mut buffer = RasterBuffer::new(width, height);
    let mut devices = map_devices(&installation, &buffer, &shared.mapping);
    let mut last_tick = Instant::now();

    while active.load(Ordering::Acquire) {
        let tick_start = Instant::now();
        let dt = tick_start.duration_since(last_tick).as_secs_f32();
        last_tick = tick_start;

        if installation_rx.has_changed().unwrap_or(false) {
            installation = installation_rx.borrow_and_update().clone();
            let size = installation.raster_size();
            if size != buffer.size() {
                debug!("Canvas resized to {}x{}", size.0, size.1);
                buffer = RasterBuffer::new(size.0, size.1);
            }
            devices = map_devices(&installation, &buffer, &shared.mapping);
        }

        let regions = shared.regions.snapshot();
        compose(&mut buffer, &regions, dt);

        for mapped in &devices {
            if !active.load(Ordering::Acquire) {
                return;
            }
            let rgb = sample(&buffer, &mapped.positions);
            shared.sink.send_frame(&mapped.device, &rgb).await;
        }

        shared.preview.send_replace(Arc::new(buffer.clone()));
        shared.frames.fetch_add(1, Ordering::Relaxed);

        let elapsed = tick_start.elapsed();
        let delay = frame_delay(shared.target_frame, elapsed);
        if delay.is_zero() {
            debug!("Frame overran its budget ({:?})", elapsed);
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;
    use crate::effects::{Animation, Solid};
    use crate::geometry::Rect;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingSink {
        fn frames(&self) -> Vec<(String, Vec<u8>)> {
            self.frames.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&self, device: &Device, rgb: &[u8]) {
            self.frames.lock().unwrap().push((device.ip.clone(), rgb.to_vec()));
        }
    }

    fn pixel_device(ip: &str, x: f32, y: f32) -> Device {
        Device {
            ip: ip.to_string(),
            pixel_count: 1,
            x,
            y,
            width: 2.0,
            height: 2.0,
            rotation: 0.0,
            segment_width: 0,
        }
    }

    fn engine(sink: Arc<RecordingSink>) -> RenderLoop {
        let installation = Installation::new(40.0, 20.0)
            .with_device(pixel_device("10.0.0.1", 4.0, 4.0))
            .with_device(pixel_device("10.0.0.2", 30.0, 4.0));
        let regions = Arc::new(RegionRegistry::new());
        regions.add(
            Rect::new(0.0, 0.0, 20.0, 20.0),
            0.0,
            Animation::Solid(Solid::new(Rgb::new(255, 0, 0))),
        );
        RenderLoop::new(&EngineConfig::default(), installation, regions, sink)
    }

    #[test]
    fn test_frame_delay() {
        let target = Duration::from_millis(33);
        assert_eq!(frame_delay(target, Duration::from_millis(10)), Duration::from_millis(23));
        assert_eq!(frame_delay(target, Duration::from_millis(33)), Duration::ZERO);
        assert_eq!(frame_delay(target, Duration::from_millis(80)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_reach_every_device() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(Arc::clone(&sink));
        assert!(engine.start());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let frames = sink.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], ("10.0.0.1".to_string(), vec![255, 0, 0]));
        assert_eq!(frames[1], ("10.0.0.2".to_string(), vec![0, 0, 0]));
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_follows_target_frame() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(Arc::clone(&sink));
        engine.start();

        // Ticks at 0, 33, ..., 330 ms.
        tokio::time::sleep(Duration::from_millis(340)).await;
        let frames = engine.frame_count();
        assert!((10..=11).contains(&frames), "{} frames", frames);
        assert_eq!(sink.frames().len() as u64, frames * 2);
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_idempotent() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(Arc::clone(&sink));

        assert!(!engine.stop());
        assert!(engine.start());
        assert!(!engine.start());
        assert!(engine.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.stop());
        assert!(!engine.stop());
        assert!(!engine.is_running());

        let sent = sink.frames().len();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sink.frames().len(), sent);

        // Restartable after a stop.
        assert!(engine.start());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sink.frames().len() > sent);
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_tracks_installation_size() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(Arc::clone(&sink));
        let mut preview = engine.preview();
        engine.start();

        preview.changed().await.unwrap();
        {
            let frame = preview.borrow_and_update();
            assert_eq!(frame.size(), (40, 20));
            assert_eq!(frame.get(5, 5), Rgb::new(255, 0, 0));
        }

        engine.set_installation(Installation::new(64.5, 8.0).with_device(pixel_device("10.0.0.9", 0.0, 0.0)));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(preview.borrow().size(), (65, 8));
        assert_eq!(sink.frames().last().unwrap().0, "10.0.0.9");
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_region_edits_show_up_next_tick() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(Arc::clone(&sink));
        engine.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        engine.regions().add(
            Rect::new(25.0, 0.0, 15.0, 20.0),
            0.0,
            Animation::Solid(Solid::new(Rgb::new(0, 0, 255))),
        );
        tokio::time::sleep(Duration::from_millis(33)).await;

        let frames = sink.frames();
        assert_eq!(frames[frames.len() - 1], ("10.0.0.2".to_string(), vec![0, 0, 255]));
        engine.stop();
    }
}
