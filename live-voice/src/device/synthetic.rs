//! Deviceless backends paced by the wall clock.

use super::{CaptureBackend, CaptureStream, DeviceThread, PlaybackBackend, PlaybackStream};
use crate::error::Result;
use crate::input::CaptureSink;
use crate::output::PlaybackRenderer;
use parking_lot::Mutex;
use rtrb::{Producer, RingBuffer};
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

/// Signal produced by [`SyntheticCapture`].
#[derive(Debug, Clone)]
pub enum SyntheticSignal {
    /// Digital silence.
    Silence,
    /// A pure tone.
    Sine { frequency: f32, amplitude: f32 },
    /// Loop over fixed mono samples.
    Samples(Arc<[f32]>),
}

impl SyntheticSignal {
    fn fill(&self, block: &mut [f32], channels: usize, rate: u32, position: &mut u64) {
        for frame in block.chunks_exact_mut(channels) {
            let value = match self {
                Self::Silence => 0.0,
                Self::Sine { frequency, amplitude } => {
                    let t = *position as f64 / rate as f64;
                    (std::f64::consts::TAU * *frequency as f64 * t).sin() as f32 * amplitude
                }
                Self::Samples(samples) if samples.is_empty() => 0.0,
                Self::Samples(samples) => samples[(*position % samples.len() as u64) as usize],
            };
            frame.fill(value);
            *position += 1;
        }
    }
}

/// Microphone stand-in that generates a signal in real time.
#[derive(Debug, Clone)]
pub struct SyntheticCapture {
    signal: SyntheticSignal,
    sample_rate: u32,
    channels: u16,
    block: Duration,
}

impl SyntheticCapture {
    /// Generate `signal` as 16 kHz mono in 10 ms blocks.
    pub fn new(signal: SyntheticSignal) -> Self {
        Self { signal, sample_rate: 16_000, channels: 1, block: Duration::from_millis(10) }
    }

    /// Pretend to be a device with this native format.
    pub fn with_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels.max(1);
        self
    }

    /// Callback block duration.
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }
}

impl CaptureBackend for SyntheticCapture {
    fn start(&self, sink: CaptureSink) -> Result<Box<dyn CaptureStream>> {
        let processor = sink.into_processor(self.sample_rate, self.channels)?;
        let signal = self.signal.clone();
        let rate = self.sample_rate;
        let channels = self.channels as usize;
        let block_dur = self.block;
        let frames = ((rate as f64 * block_dur.as_secs_f64()).round() as usize).max(1);

        let thread = DeviceThread::spawn("synthetic-capture", move |stop_rx, ready_tx| {
            let mut processor = processor;
            let mut block = vec![0.0f32; frames * channels];
            let mut position = 0u64;
            let _ = ready_tx.send(Ok(()));

            let mut deadline = Instant::now();
            loop {
                signal.fill(&mut block, channels, rate, &mut position);
                processor.process(&block);

                deadline += block_dur;
                match stop_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
        })?;
        Ok(Box::new(thread))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// Speaker stand-in that pulls rendered blocks in real time and discards them.
///
/// A tap can be attached to observe the mono output.
pub struct SyntheticPlayback {
    channels: u16,
    block: Duration,
    tap: Mutex<Option<Producer<f32>>>,
}

impl Default for SyntheticPlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticPlayback {
    /// Mono output in 10 ms blocks.
    pub fn new() -> Self {
        Self { channels: 1, block: Duration::from_millis(10), tap: Mutex::new(None) }
    }

    /// Callback block duration.
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    /// Device channel count.
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels.max(1);
        self
    }

    /// Copy the first channel of every rendered block into a ring of `capacity` samples.
    ///
    /// Samples that do not fit are discarded.
    pub fn with_tap(self, capacity: usize) -> (Self, rtrb::Consumer<f32>) {
        let (producer, consumer) = RingBuffer::new(capacity);
        *self.tap.lock() = Some(producer);
        (self, consumer)
    }
}

impl std::fmt::Debug for SyntheticPlayback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticPlayback")
            .field("channels", &self.channels)
            .field("block", &self.block)
            .finish()
    }
}

impl PlaybackBackend for SyntheticPlayback {
    fn start(&self, renderer: PlaybackRenderer) -> Result<Box<dyn PlaybackStream>> {
        let channels = self.channels as usize;
        let block_dur = self.block;
        let frames =
            ((renderer.sample_rate() as f64 * block_dur.as_secs_f64()).round() as usize).max(1);
        let tap = self.tap.lock().take();

        let thread = DeviceThread::spawn("synthetic-playback", move |stop_rx, ready_tx| {
            let mut renderer = renderer;
            let mut tap = tap;
            let mut block = vec![0.0f32; frames * channels];
            let _ = ready_tx.send(Ok(()));

            let mut deadline = Instant::now();
            loop {
                renderer.render(&mut block, channels);
                if let Some(tap) = tap.as_mut() {
                    for frame in block.chunks_exact(channels) {
                        if tap.push(frame[0]).is_err() {
                            break;
                        }
                    }
                }

                deadline += block_dur;
                match stop_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
        })?;
        Ok(Box::new(thread))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_fills_all_channels() {
        let signal = SyntheticSignal::Sine { frequency: 1000.0, amplitude: 0.5 };
        let mut block = vec![0.0; 8];
        let mut position = 0;
        signal.fill(&mut block, 2, 16_000, &mut position);
        assert_eq!(position, 4);
        assert_eq!(block[0], block[1]);
        assert_eq!(block[2], block[3]);
        assert!(block.iter().all(|s| s.abs() <= 0.5));
    }

    #[test]
    fn test_samples_loop() {
        let signal = SyntheticSignal::Samples(Arc::from(vec![0.1, 0.2]));
        let mut block = vec![0.0; 3];
        let mut position = 0;
        signal.fill(&mut block, 1, 16_000, &mut position);
        assert_eq!(block, vec![0.1, 0.2, 0.1]);
    }
}
