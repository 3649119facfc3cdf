use anyhow::{anyhow, bail, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use super::synth::SyntheticSource;
use crate::config::AudioConfig;

/// One block of mono PCM, as captured.
#[derive(Debug, Clone)]
pub struct PcmBlock {
    pub samples: Vec<i16>,
    pub captured_at: Instant,
    pub sample_rate: u32,
}

type BlockSlot = Option<Arc<PcmBlock>>;

/// Shared capture service. The microphone (or the synthetic fallback) runs on
/// a dedicated thread while at least one [`CaptureSubscription`] is alive, and
/// for a grace period after the last one is dropped.
///
/// Subscribers see the latest block only; a slow consumer skips blocks rather
/// than queueing them.
#[derive(Clone)]
pub struct CaptureService {
    inner: Arc<Inner>,
}

struct Inner {
    config: AudioConfig,
    tx: Arc<watch::Sender<BlockSlot>>,
    state: Mutex<CaptureState>,
}

#[derive(Default)]
struct CaptureState {
    subscribers: usize,
    generation: u64,
    session: Option<Session>,
}

struct Session {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Session {
    fn stop(self) {
        drop(self.stop_tx);
        if self.handle.join().is_err() {
            warn!("Capture thread panicked");
        }
    }
}

impl CaptureService {
    pub fn new(config: &AudioConfig) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config: config.clone(),
                tx: Arc::new(tx),
                state: Mutex::new(CaptureState::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> CaptureSubscription {
        let mut state = self.inner.lock_state();
        state.subscribers += 1;
        state.generation += 1;

        if state.session.is_none() {
            state.session = Some(self.inner.start_session());
        }

        CaptureSubscription {
            inner: Arc::clone(&self.inner),
            rx: self.inner.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock_state().subscribers
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().session.is_some()
    }

    /// Stops capture now, regardless of subscribers. A later subscribe starts it again.
    pub fn shutdown(&self) {
        let session = {
            let mut state = self.inner.lock_state();
            state.generation += 1;
            state.session.take()
        };
        if let Some(session) = session {
            session.stop();
            info!("Audio capture stopped");
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_session(&self) -> Session {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let config = self.config.clone();
        let tx = Arc::clone(&self.tx);

        let handle = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || run_capture(config, tx, stop_rx))
            .unwrap_or_else(|e| {
                // Without a thread there is nothing to stop; hand back a finished one.
                warn!("Failed to spawn capture thread: {}", e);
                std::thread::spawn(|| {})
            });

        info!("Audio capture started");
        Session { stop_tx, handle }
    }

    fn release(self: &Arc<Self>) {
        let generation = {
            let mut state = self.lock_state();
            state.subscribers = state.subscribers.saturating_sub(1);
            if state.subscribers > 0 {
                return;
            }
            state.generation += 1;
            state.generation
        };

        let grace = Duration::from_millis(self.config.grace_period_ms);
        if grace.is_zero() {
            self.stop_if_idle(generation);
            return;
        }

        let inner = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("audio-capture-grace".to_string())
            .spawn(move || {
                std::thread::sleep(grace);
                inner.stop_if_idle(generation);
            });
        if let Err(e) = spawned {
            warn!("Failed to spawn capture grace timer: {}", e);
            self.stop_if_idle(generation);
        }
    }

    fn stop_if_idle(&self, generation: u64) {
        let session = {
            let mut state = self.lock_state();
            if state.subscribers > 0 || state.generation != generation {
                return;
            }
            state.session.take()
        };
        if let Some(session) = session {
            session.stop();
            info!("Audio capture stopped after last subscriber left");
        }
    }
}

/// Handle to the capture stream. Dropping it releases the service.
pub struct CaptureSubscription {
    inner: Arc<Inner>,
    rx: watch::Receiver<BlockSlot>,
}

impl CaptureSubscription {
    /// Waits for a block newer than the last one taken.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }

    /// Latest block, marking it seen.
    pub fn latest(&mut self) -> Option<Arc<PcmBlock>> {
        self.rx.borrow_and_update().clone()
    }
}

impl Drop for CaptureSubscription {
    fn drop(&mut self) {
        self.inner.release();
    }
}

fn run_capture(config: AudioConfig, tx: Arc<watch::Sender<BlockSlot>>, stop_rx: Receiver<()>) {
    if !config.synthetic_only {
        match open_microphone(&config) {
            Ok((stream, samples_rx)) => {
                run_microphone(&config, stream, samples_rx, &tx, &stop_rx);
                return;
            }
            Err(e) => warn!("Microphone unavailable ({:#}), falling back to synthetic signal", e),
        }
    }
    run_synthetic(&config, &tx, &stop_rx);
}

fn run_microphone(
    config: &AudioConfig,
    stream: Stream,
    samples_rx: Receiver<Vec<i16>>,
    tx: &watch::Sender<BlockSlot>,
    stop_rx: &Receiver<()>,
) {
    let block_size = config.block_size.max(1);
    let mut pending: Vec<i16> = Vec::with_capacity(block_size * 2);

    loop {
        crossbeam_channel::select! {
            recv(samples_rx) -> msg => match msg {
                Ok(chunk) => {
                    pending.extend_from_slice(&chunk);
                    while pending.len() >= block_size {
                        let samples: Vec<i16> = pending.drain(..block_size).collect();
                        publish(tx, samples, config.sample_rate);
                    }
                }
                Err(_) => {
                    warn!("Microphone stream closed");
                    break;
                }
            },
            recv(stop_rx) -> _ => break,
        }
    }

    // Dropping the stream releases the device.
    drop(stream);
    debug!("Microphone capture loop exited");
}

fn run_synthetic(config: &AudioConfig, tx: &watch::Sender<BlockSlot>, stop_rx: &Receiver<()>) {
    let block_size = config.block_size.max(1);
    let mut source = SyntheticSource::new(config.sample_rate);
    let period = Duration::from_secs_f64(block_size as f64 / source.sample_rate() as f64);
    info!("Synthetic audio source running at {} Hz", source.sample_rate());

    loop {
        match stop_rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => {
                let samples = source.next_block(block_size);
                publish(tx, samples, config.sample_rate);
            }
            _ => break,
        }
    }
    debug!("Synthetic capture loop exited");
}

fn publish(tx: &watch::Sender<BlockSlot>, samples: Vec<i16>, sample_rate: u32) {
    tx.send_replace(Some(Arc::new(PcmBlock {
        samples,
        captured_at: Instant::now(),
        sample_rate,
    })));
}

fn open_microphone(config: &AudioConfig) -> Result<(Stream, Receiver<Vec<i16>>)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    let supported = device
        .default_input_config()
        .map_err(|e| anyhow!("Failed to get default input config: {}", e))?;

    info!("Using audio device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));

    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let (sender, receiver) = crossbeam_channel::unbounded();
    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input_stream::<f32>(&device, &stream_config, sender)?,
        SampleFormat::I16 => build_input_stream::<i16>(&device, &stream_config, sender)?,
        SampleFormat::U16 => build_input_stream::<u16>(&device, &stream_config, sender)?,
        SampleFormat::I32 => build_input_stream::<i32>(&device, &stream_config, sender)?,
        other => bail!("Unsupported sample format {:?}", other),
    };
    stream.play()?;

    Ok((stream, receiver))
}

fn build_input_stream<T>(device: &Device, config: &StreamConfig, sender: Sender<Vec<i16>>) -> Result<Stream>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    info!("Creating input stream with {} channels at {} Hz", channels, config.sample_rate.0);

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono: Vec<i16> = data
                .chunks(channels)
                .map(|frame| {
                    let sum: f32 = frame.iter().map(|&s| <f32 as cpal::Sample>::from_sample(s)).sum();
                    <i16 as cpal::Sample>::from_sample(sum / frame.len() as f32)
                })
                .collect();

            // The receiver only goes away while the capture loop is shutting down.
            let _ = sender.send(mono);
        },
        |err| {
            warn!("Audio stream error: {}", err);
        },
        None,
    )?;

    Ok(stream)
}
