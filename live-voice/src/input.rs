//! Microphone capture, conversion to the wire encoding and packetization.
//!
//! The render half ([`CaptureProcessor`]) runs inside the device callback: it
//! downmixes each block, meters it, resamples to 16 kHz and pushes whole chunks of
//! PCM16 into a wait-free ring. The control half ([`AudioInputRecorder`]) owns a
//! tokio task that drains the rings and delivers `data` (base64 chunk) and `volume`
//! callbacks.

use crate::audio::{AudioChunk, AudioFormat, INPUT_SAMPLE_RATE};
use crate::device::{CaptureBackend, CaptureStream};
use crate::error::{RealtimeError, Result};
use crate::resample::FrameResampler;
use crate::volume::{VolumeLevels, VolumeMeter};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Seconds of converted audio the capture ring can hold before dropping chunks.
const CAPTURE_RING_SECONDS: usize = 2;

/// Recorder configuration.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Duration of each emitted chunk.
    pub chunk_duration: Duration,
    /// Wire sample rate.
    pub target_rate: u32,
    /// How often the control task drains the capture rings.
    pub poll_interval: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            chunk_duration: Duration::from_millis(20),
            target_rate: INPUT_SAMPLE_RATE,
            poll_interval: Duration::from_millis(5),
        }
    }
}

impl RecorderConfig {
    /// Set the chunk duration.
    pub fn with_chunk_duration(mut self, duration: Duration) -> Self {
        self.chunk_duration = duration;
        self
    }

    /// Samples per emitted chunk.
    pub fn chunk_samples(&self) -> usize {
        AudioFormat::new(self.target_rate, 1).frames_for(self.chunk_duration)
    }

    /// Bytes per emitted chunk (PCM16 mono).
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples() * 2
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_samples() == 0 {
            return Err(RealtimeError::config(format!(
                "chunk duration {:?} is shorter than one sample",
                self.chunk_duration
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(RealtimeError::config("poll interval must be positive"));
        }
        Ok(())
    }
}

/// The render-side endpoints a capture backend turns into a [`CaptureProcessor`]
/// once it knows the device format.
#[derive(Debug)]
pub struct CaptureSink {
    data: Producer<i16>,
    meter: VolumeMeter,
    dropped: Arc<AtomicU64>,
    target_rate: u32,
    chunk_duration: Duration,
}

impl CaptureSink {
    /// Build the processor for a device delivering `channels` interleaved at `input_rate`.
    pub fn into_processor(self, input_rate: u32, channels: u16) -> Result<CaptureProcessor> {
        if channels == 0 {
            return Err(RealtimeError::device("capture device reports zero channels"));
        }
        let resampler = FrameResampler::new(input_rate, self.target_rate, self.chunk_duration)?;
        tracing::debug!(
            input_rate,
            channels,
            target_rate = self.target_rate,
            chunk_samples = resampler.frame_samples(),
            "capture processor ready"
        );
        Ok(CaptureProcessor {
            channels: channels as usize,
            resampler,
            data: self.data,
            meter: self.meter,
            dropped: self.dropped,
            mono: Vec::with_capacity(8192),
        })
    }
}

/// Render-side capture pipeline. Call [`process`](Self::process) once per device block.
pub struct CaptureProcessor {
    channels: usize,
    resampler: FrameResampler,
    data: Producer<i16>,
    meter: VolumeMeter,
    dropped: Arc<AtomicU64>,
    mono: Vec<f32>,
}

impl CaptureProcessor {
    /// Process one block of interleaved f32 samples.
    pub fn process(&mut self, interleaved: &[f32]) {
        self.mono.clear();
        if self.channels == 1 {
            self.mono.extend_from_slice(interleaved);
        } else {
            let scale = 1.0 / self.channels as f32;
            self.mono.extend(
                interleaved.chunks_exact(self.channels).map(|frame| frame.iter().sum::<f32>() * scale),
            );
        }

        self.meter.process(&self.mono);

        let data = &mut self.data;
        let dropped = &self.dropped;
        self.resampler.push(&self.mono, |frame| {
            // Whole chunks only, so the reader never sees a torn chunk.
            match data.write_chunk_uninit(frame.len()) {
                Ok(chunk) => {
                    chunk.fill_from_iter(
                        frame.iter().map(|&s| (s * 32768.0).clamp(-32768.0, 32767.0) as i16),
                    );
                }
                Err(_) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    /// Process one block of interleaved i16 samples.
    pub fn process_i16(&mut self, interleaved: &[i16], scratch: &mut Vec<f32>) {
        scratch.clear();
        scratch.extend(interleaved.iter().map(|&s| s as f32 / 32768.0));
        self.process(scratch.as_slice());
    }
}

impl std::fmt::Debug for CaptureProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureProcessor")
            .field("channels", &self.channels)
            .field("resampler", &self.resampler)
            .finish()
    }
}

type DataHandler = Arc<dyn Fn(&str) + Send + Sync>;
type VolumeHandler = Arc<dyn Fn(f32) + Send + Sync>;

#[derive(Default)]
struct RecorderListeners {
    data: Vec<DataHandler>,
    volume: Vec<VolumeHandler>,
}

struct Running {
    stream: Box<dyn CaptureStream>,
    pump: JoinHandle<()>,
    active: Arc<AtomicBool>,
}

/// Captures the microphone and emits fixed-size base64 PCM16 chunks plus input levels.
pub struct AudioInputRecorder {
    config: RecorderConfig,
    backend: Arc<dyn CaptureBackend>,
    listeners: Arc<Mutex<RecorderListeners>>,
    dropped: Arc<AtomicU64>,
    running: Option<Running>,
}

impl AudioInputRecorder {
    /// Create a recorder on the given capture backend.
    pub fn new(backend: Arc<dyn CaptureBackend>, config: RecorderConfig) -> Self {
        Self {
            config,
            backend,
            listeners: Arc::new(Mutex::new(RecorderListeners::default())),
            dropped: Arc::new(AtomicU64::new(0)),
            running: None,
        }
    }

    /// Register a handler for base64 PCM16 chunks.
    pub fn on_data(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> &Self {
        self.listeners.lock().data.push(Arc::new(handler));
        self
    }

    /// Register a handler for input levels.
    pub fn on_volume(&self, handler: impl Fn(f32) + Send + Sync + 'static) -> &Self {
        self.listeners.lock().volume.push(Arc::new(handler));
        self
    }

    /// Acquire the device and begin emitting events.
    ///
    /// Calling `start` while already recording is a no-op; the device is acquired once.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            tracing::debug!("recorder already started");
            return Ok(());
        }
        self.config.validate()?;

        let chunk_samples = self.config.chunk_samples();
        let (data_tx, data_rx) =
            RingBuffer::new(self.config.target_rate as usize * CAPTURE_RING_SECONDS);
        let (meter, levels) = VolumeMeter::new().with_levels();
        let sink = CaptureSink {
            data: data_tx,
            meter,
            dropped: Arc::clone(&self.dropped),
            target_rate: self.config.target_rate,
            chunk_duration: self.config.chunk_duration,
        };

        let backend = Arc::clone(&self.backend);
        let stream = tokio::task::spawn_blocking(move || backend.start(sink))
            .await
            .map_err(|e| RealtimeError::device(format!("capture start task failed: {e}")))??;

        let active = Arc::new(AtomicBool::new(true));
        let pump = tokio::spawn(pump(
            data_rx,
            levels,
            chunk_samples,
            self.config.poll_interval,
            Arc::clone(&self.listeners),
            Arc::clone(&active),
        ));

        tracing::info!(
            chunk_ms = self.config.chunk_duration.as_millis() as u64,
            chunk_samples,
            "recorder started"
        );
        self.running = Some(Running { stream, pump, active });
        Ok(())
    }

    /// Release the device. No `data` or `volume` callback runs after this returns.
    ///
    /// Safe to call when never started.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.active.store(false, Ordering::Release);
        running.pump.abort();
        // Wait for a delivery that may be mid-callback.
        let _ = running.pump.await;

        let mut stream = running.stream;
        if let Err(e) = tokio::task::spawn_blocking(move || stream.stop()).await {
            tracing::warn!(error = %e, "capture stop task failed");
        }
        tracing::info!(dropped_chunks = self.dropped_chunks(), "recorder stopped");
    }

    /// Whether the device is currently held.
    pub fn is_recording(&self) -> bool {
        self.running.is_some()
    }

    /// Chunks discarded because the control side fell behind.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Recorder configuration.
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }
}

impl Drop for AudioInputRecorder {
    fn drop(&mut self) {
        if let Some(mut running) = self.running.take() {
            running.active.store(false, Ordering::Release);
            running.pump.abort();
            running.stream.stop();
        }
    }
}

impl std::fmt::Debug for AudioInputRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioInputRecorder")
            .field("config", &self.config)
            .field("recording", &self.running.is_some())
            .finish()
    }
}

async fn pump(
    mut data: Consumer<i16>,
    mut levels: VolumeLevels,
    chunk_samples: usize,
    poll_interval: Duration,
    listeners: Arc<Mutex<RecorderListeners>>,
    active: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut samples = Vec::with_capacity(chunk_samples);

    loop {
        ticker.tick().await;

        for level in levels.drain() {
            let handlers = listeners.lock().volume.clone();
            if !active.load(Ordering::Acquire) {
                return;
            }
            for handler in &handlers {
                handler(level);
            }
        }

        while data.slots() >= chunk_samples {
            let Ok(chunk) = data.read_chunk(chunk_samples) else {
                break;
            };
            let (first, second) = chunk.as_slices();
            samples.clear();
            samples.extend_from_slice(first);
            samples.extend_from_slice(second);
            chunk.commit_all();

            let encoded = AudioChunk::from_i16_samples(&samples, AudioFormat::pcm16_16khz()).to_base64();
            let handlers = listeners.lock().data.clone();
            if !active.load(Ordering::Acquire) {
                return;
            }
            for handler in &handlers {
                handler(&encoded);
            }
        }

        if data.is_abandoned() && data.slots() < chunk_samples {
            tracing::warn!("capture stream ended");
            return;
        }
    }
}

/// Create the render-side sink and its control-side rings without a backend.
///
/// Useful for driving a [`CaptureProcessor`] directly.
pub fn capture_channel(config: &RecorderConfig) -> (CaptureSink, Consumer<i16>, VolumeLevels) {
    let (data_tx, data_rx) = RingBuffer::new(config.target_rate as usize * CAPTURE_RING_SECONDS);
    let (meter, levels) = VolumeMeter::new().with_levels();
    let sink = CaptureSink {
        data: data_tx,
        meter,
        dropped: Arc::new(AtomicU64::new(0)),
        target_rate: config.target_rate,
        chunk_duration: config.chunk_duration,
    };
    (sink, data_rx, levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_for_20ms() {
        let config = RecorderConfig::default();
        assert_eq!(config.chunk_samples(), 320);
        assert_eq!(config.chunk_bytes(), 640);
    }

    #[test]
    fn test_processor_emits_whole_chunks() {
        let config = RecorderConfig::default();
        let (sink, mut data, mut levels) = capture_channel(&config);
        let mut processor = sink.into_processor(16000, 1).unwrap();

        processor.process(&[0.25; 160]);
        assert_eq!(data.slots(), 0);
        processor.process(&[0.25; 160]);
        assert_eq!(data.slots(), 320);

        let chunk = data.read_chunk(320).unwrap();
        let (first, second) = chunk.as_slices();
        assert!(first.iter().chain(second).all(|&s| s == 8192));
        chunk.commit_all();

        assert_eq!(levels.drain().len(), 2);
    }

    #[test]
    fn test_processor_downmixes_stereo() {
        let config = RecorderConfig::default();
        let (sink, mut data, _levels) = capture_channel(&config);
        let mut processor = sink.into_processor(16000, 2).unwrap();

        let block: Vec<f32> = (0..640).map(|i| if i % 2 == 0 { 0.5 } else { 0.0 }).collect();
        processor.process(&block);
        assert_eq!(data.slots(), 320);
        assert_eq!(data.pop().unwrap(), 8192);
    }

    #[test]
    fn test_fractional_chunk_duration_matches_reader() {
        let config = RecorderConfig::default().with_chunk_duration(Duration::from_micros(20_040));
        assert_eq!(config.chunk_samples(), 320);

        let (sink, mut data, _levels) = capture_channel(&config);
        let mut processor = sink.into_processor(16000, 1).unwrap();
        processor.process(&[0.25; 700]);
        assert_eq!(data.slots(), 2 * config.chunk_samples());

        let (sink, data, _levels) = capture_channel(&config);
        let mut processor = sink.into_processor(48000, 2).unwrap();
        for _ in 0..20 {
            processor.process(&[0.25; 960]);
        }
        assert!(data.slots() > 0);
        assert_eq!(data.slots() % config.chunk_samples(), 0);
    }

    #[test]
    fn test_zero_channels_rejected() {
        let (sink, _data, _levels) = capture_channel(&RecorderConfig::default());
        assert!(sink.into_processor(16000, 0).is_err());
    }

    #[test]
    fn test_i16_input() {
        let (sink, mut data, _levels) = capture_channel(&RecorderConfig::default());
        let mut processor = sink.into_processor(16000, 1).unwrap();
        let mut scratch = Vec::new();
        processor.process_i16(&[-16384; 320], &mut scratch);
        assert_eq!(data.pop().unwrap(), -16384);
    }
}
