//! Gapless playback of streamed PCM replies.
//!
//! Playback is split in two halves that only talk through wait-free rings:
//!
//! ```text
//!  control context                          render context (device callback)
//! ┌───────────────────────┐  PlaybackEntry ┌────────────────────────────┐
//! │ AudioOutputStreamer   │ ─────────────▶ │ PlaybackRenderer           │
//! │  next_start cursor    │                │  queue, fades, VolumeMeter │
//! │  flush epoch (atomic) │ ◀───────────── │  advances AudioClock       │
//! └───────────────────────┘  retired       └────────────────────────────┘
//! ```
//!
//! Every chunk is stamped with a start frame on the [`AudioClock`] at
//! `max(next_start, now)`; the cursor then advances by the chunk length, so
//! consecutive chunks abut exactly. An interruption bumps the flush epoch: the
//! renderer discards every entry stamped with an older epoch at its next block and
//! ramps the cut entry down instead of stopping it dead.
//!
//! The renderer holds every entry to its stamped frames. An entry that reaches it
//! after its start has passed loses the overdue head and still ends on schedule, so
//! `next_start` always matches what the speaker is actually doing. A run that ends
//! with nothing queued behind it is ramped down over the fade length.

use crate::audio::{OUTPUT_SAMPLE_RATE, pcm16_to_f32};
use crate::error::{RealtimeError, Result};
use crate::volume::{VolumeLevels, VolumeMeter};
use rtrb::{Consumer, Producer, RingBuffer};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Largest device block the renderer prepares scratch space for up front.
const SCRATCH_FRAMES: usize = 8192;

/// Monotonic sample clock advanced by the render context.
#[derive(Debug)]
pub struct AudioClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl AudioClock {
    /// Create a clock at frame zero.
    pub fn new(sample_rate: u32) -> Self {
        Self { frames: AtomicU64::new(0), sample_rate }
    }

    /// Frames rendered so far.
    pub fn now(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Seconds rendered so far.
    pub fn now_secs(&self) -> f64 {
        self.now() as f64 / self.sample_rate as f64
    }

    /// Clock rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }

    /// Convert a duration to clock frames.
    pub fn frames_for(&self, duration: Duration) -> u64 {
        (self.sample_rate as u128 * duration.as_micros() / 1_000_000) as u64
    }
}

/// A decoded chunk stamped with its scheduled start on the audio clock.
#[derive(Debug)]
pub struct PlaybackEntry {
    start: u64,
    epoch: u64,
    samples: Box<[f32]>,
}

impl PlaybackEntry {
    /// Scheduled start frame.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Scheduled end frame (exclusive).
    pub fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }

    /// Number of mono samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the entry holds no audio.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Where a chunk landed on the audio clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    /// First frame.
    pub start: u64,
    /// One past the last frame.
    pub end: u64,
    /// Whether the chunk opened a new run (preceded by silence) and was faded in.
    pub new_run: bool,
}

/// Streamer configuration.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Rate of the inbound PCM and of the render clock.
    pub sample_rate: u32,
    /// Length of the click-suppression ramps.
    pub fade: Duration,
    /// Entries that may be in flight between the two halves.
    pub queue_capacity: usize,
    /// Extra lead added when a new run starts, to absorb arrival jitter.
    pub initial_buffer: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            fade: Duration::from_millis(5),
            queue_capacity: 256,
            initial_buffer: Duration::ZERO,
        }
    }
}

impl StreamerConfig {
    /// Set the stream sample rate.
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the fade ramp length.
    pub fn with_fade(mut self, fade: Duration) -> Self {
        self.fade = fade;
        self
    }

    /// Set the lead applied to the first chunk of a run.
    pub fn with_initial_buffer(mut self, lead: Duration) -> Self {
        self.initial_buffer = lead;
        self
    }
}

/// Control half: schedules arriving PCM chunks for gapless playback.
pub struct AudioOutputStreamer {
    config: StreamerConfig,
    clock: Arc<AudioClock>,
    epoch: Arc<AtomicU64>,
    entries: Producer<PlaybackEntry>,
    retired: Consumer<PlaybackEntry>,
    next_start: Option<u64>,
    fade_frames: usize,
    levels: Option<VolumeLevels>,
}

impl AudioOutputStreamer {
    /// Create both halves. Hand the renderer to a device backend (or drive it manually).
    pub fn new(config: StreamerConfig) -> (Self, PlaybackRenderer) {
        let clock = Arc::new(AudioClock::new(config.sample_rate));
        let epoch = Arc::new(AtomicU64::new(0));
        let capacity = config.queue_capacity.max(1);
        let (entries_tx, entries_rx) = RingBuffer::new(capacity);
        let (retired_tx, retired_rx) = RingBuffer::new(capacity);
        let fade_frames = clock.frames_for(config.fade) as usize;
        let (meter, levels) = VolumeMeter::new().with_levels();

        let renderer = PlaybackRenderer {
            clock: Arc::clone(&clock),
            epoch: Arc::clone(&epoch),
            seen_epoch: 0,
            entries: entries_rx,
            retired: retired_tx,
            queue: VecDeque::with_capacity(capacity),
            cursor: 0,
            fade_buf: vec![0.0; fade_frames].into_boxed_slice(),
            fade_len: 0,
            fade_pos: 0,
            meter,
            mono: Vec::with_capacity(SCRATCH_FRAMES),
        };

        let streamer = Self {
            config,
            clock,
            epoch,
            entries: entries_tx,
            retired: retired_rx,
            next_start: None,
            fade_frames,
            levels: Some(levels),
        };
        (streamer, renderer)
    }

    /// Schedule a chunk of PCM16 little-endian mono audio.
    ///
    /// A malformed chunk (odd byte count) is rejected without touching the schedule.
    pub fn add_pcm16(&mut self, bytes: &[u8]) -> Result<Scheduled> {
        let samples = pcm16_to_f32(bytes)?;
        self.add_samples(samples)
    }

    /// Schedule already-decoded mono samples.
    pub fn add_samples(&mut self, mut samples: Vec<f32>) -> Result<Scheduled> {
        self.reclaim();

        let now = self.clock.now();
        let (start, new_run) = match self.next_start {
            Some(next) if next >= now => (next, false),
            _ => (now + self.clock.frames_for(self.config.initial_buffer), true),
        };
        let end = start + samples.len() as u64;
        if samples.is_empty() {
            return Ok(Scheduled { start, end, new_run });
        }

        if new_run {
            fade_in(&mut samples, self.fade_frames);
        }

        let entry = PlaybackEntry {
            start,
            epoch: self.epoch.load(Ordering::Acquire),
            samples: samples.into_boxed_slice(),
        };
        self.entries
            .push(entry)
            .map_err(|_| RealtimeError::audio("playback queue full; is the output device running?"))?;

        self.next_start = Some(end);
        tracing::trace!(start, end, new_run, "scheduled playback chunk");
        Ok(Scheduled { start, end, new_run })
    }

    /// Barge-in: drop everything not yet rendered and restart the cursor at "now".
    pub fn interrupt(&mut self) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.next_start = None;
        self.reclaim();
        tracing::debug!(epoch, at = self.clock.now(), "playback interrupted");
    }

    /// Stop playback. Same flush as [`interrupt`](Self::interrupt); the device keeps running
    /// so later audio starts immediately.
    pub fn stop(&mut self) {
        self.interrupt();
        tracing::debug!("playback stopped");
    }

    /// Frame at which the last scheduled chunk ends, if anything is pending.
    pub fn scheduled_until(&self) -> Option<u64> {
        self.next_start.filter(|&end| end > self.clock.now())
    }

    /// Audio scheduled but not yet rendered.
    pub fn buffered(&self) -> Duration {
        let frames = self.scheduled_until().map_or(0, |end| end - self.clock.now());
        Duration::from_secs_f64(frames as f64 / self.config.sample_rate as f64)
    }

    /// Whether scheduled audio remains ahead of the clock.
    pub fn is_playing(&self) -> bool {
        self.scheduled_until().is_some()
    }

    /// The shared audio clock.
    pub fn clock(&self) -> Arc<AudioClock> {
        Arc::clone(&self.clock)
    }

    /// Take the reader for the output level (one sample per rendered block).
    pub fn take_volume_levels(&mut self) -> Option<VolumeLevels> {
        self.levels.take()
    }

    /// Stream configuration.
    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    // Entries are freed here rather than on the render thread.
    fn reclaim(&mut self) {
        while self.retired.pop().is_ok() {}
    }
}

impl std::fmt::Debug for AudioOutputStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioOutputStreamer")
            .field("sample_rate", &self.config.sample_rate)
            .field("next_start", &self.next_start)
            .field("clock", &self.clock.now())
            .finish()
    }
}

/// Render half: runs inside the device callback.
pub struct PlaybackRenderer {
    clock: Arc<AudioClock>,
    epoch: Arc<AtomicU64>,
    seen_epoch: u64,
    entries: Consumer<PlaybackEntry>,
    retired: Producer<PlaybackEntry>,
    queue: VecDeque<PlaybackEntry>,
    // Position inside the front entry once it has started.
    cursor: usize,
    fade_buf: Box<[f32]>,
    fade_len: usize,
    fade_pos: usize,
    meter: VolumeMeter,
    mono: Vec<f32>,
}

impl PlaybackRenderer {
    /// Fill one interleaved output block and advance the audio clock by its frame count.
    ///
    /// Every channel receives the same mono signal.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;

        let epoch = self.epoch.load(Ordering::Acquire);
        if epoch > self.seen_epoch {
            self.flush(epoch);
        }
        // Claim the block before pulling so new runs are scheduled after it.
        let now = self.clock.now();
        self.clock.advance(frames as u64);
        self.pull_entries();

        self.mono.clear();
        self.mono.resize(frames, 0.0);

        for (i, frame) in out.chunks_mut(channels).take(frames).enumerate() {
            let t = now + i as u64;
            let mut sample = self.next_sample(t);
            if self.fade_pos < self.fade_len {
                sample = (sample + self.fade_buf[self.fade_pos]).clamp(-1.0, 1.0);
                self.fade_pos += 1;
            }
            for slot in frame.iter_mut() {
                *slot = sample;
            }
            self.mono[i] = sample;
        }
        for slot in out.iter_mut().skip(frames * channels) {
            *slot = 0.0;
        }

        self.meter.process(&self.mono);
    }

    /// Entries queued on the render side.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Sample rate the renderer expects the device to run at.
    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    fn next_sample(&mut self, t: u64) -> f32 {
        loop {
            let Some(front) = self.queue.front() else {
                return 0.0;
            };
            let len = front.samples.len();
            if self.cursor == 0 && t != front.start {
                if t < front.start {
                    return 0.0;
                }
                // Late: skip the overdue head so the entry still ends on schedule.
                let late = (t - front.start) as usize;
                if late >= len {
                    self.retire_front();
                    continue;
                }
                self.cursor = late;
            }
            if self.cursor < len {
                let mut sample = front.samples[self.cursor];
                let remaining = len - self.cursor;
                let n = self.fade_buf.len();
                // Nothing queued behind: ramp the tail down.
                if self.queue.len() == 1 && remaining <= n {
                    sample *= remaining as f32 / (n + 1) as f32;
                }
                self.cursor += 1;
                return sample;
            }
            self.retire_front();
        }
    }

    fn pull_entries(&mut self) {
        while self.queue.len() < self.queue.capacity() {
            let Ok(entry) = self.entries.pop() else {
                break;
            };
            if entry.epoch > self.seen_epoch {
                self.flush(entry.epoch);
            }
            if entry.epoch == self.seen_epoch {
                self.queue.push_back(entry);
            } else {
                self.retire(entry);
            }
        }
    }

    fn flush(&mut self, epoch: u64) {
        self.seen_epoch = epoch;

        // Ramp down whatever was audible at the cut.
        self.fade_len = 0;
        self.fade_pos = 0;
        if let Some(front) = self.queue.front() {
            if self.cursor > 0 {
                let rest = &front.samples[self.cursor.min(front.samples.len())..];
                let n = rest.len().min(self.fade_buf.len());
                for (i, (dst, src)) in self.fade_buf.iter_mut().zip(rest).take(n).enumerate() {
                    let gain = 1.0 - (i + 1) as f32 / (n + 1) as f32;
                    *dst = src * gain;
                }
                self.fade_len = n;
            }
        }

        while let Some(entry) = self.queue.pop_front() {
            self.retire(entry);
        }
        self.cursor = 0;
    }

    fn retire_front(&mut self) {
        if let Some(entry) = self.queue.pop_front() {
            self.retire(entry);
        }
        self.cursor = 0;
    }

    fn retire(&mut self, entry: PlaybackEntry) {
        // If the control side is not reclaiming, the entry is freed here instead.
        let _ = self.retired.push(entry);
    }
}

impl std::fmt::Debug for PlaybackRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackRenderer")
            .field("queued", &self.queue.len())
            .field("epoch", &self.seen_epoch)
            .finish()
    }
}

fn fade_in(samples: &mut [f32], fade_frames: usize) {
    let n = fade_frames.min(samples.len());
    for (i, s) in samples.iter_mut().take(n).enumerate() {
        *s *= i as f32 / n as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streamer() -> (AudioOutputStreamer, PlaybackRenderer) {
        AudioOutputStreamer::new(StreamerConfig::default().with_sample_rate(1000).with_fade(Duration::ZERO))
    }

    #[test]
    fn test_first_chunk_starts_now() {
        let (mut streamer, mut renderer) = streamer();
        let mut block = vec![0.0; 40];
        renderer.render(&mut block, 1);
        let scheduled = streamer.add_samples(vec![0.5; 10]).unwrap();
        assert_eq!(scheduled.start, 40);
        assert_eq!(scheduled.end, 50);
        assert!(scheduled.new_run);
    }

    #[test]
    fn test_chunks_abut() {
        let (mut streamer, _renderer) = streamer();
        let a = streamer.add_samples(vec![0.1; 7]).unwrap();
        let b = streamer.add_samples(vec![0.1; 5]).unwrap();
        assert_eq!(a.end, b.start);
        assert!(!b.new_run);
    }

    #[test]
    fn test_odd_bytes_rejected_without_moving_cursor() {
        let (mut streamer, _renderer) = streamer();
        streamer.add_samples(vec![0.1; 4]).unwrap();
        assert!(streamer.add_pcm16(&[0, 1, 2]).is_err());
        assert_eq!(streamer.scheduled_until(), Some(4));
    }

    #[test]
    fn test_render_plays_in_order() {
        let (mut streamer, mut renderer) = streamer();
        streamer.add_samples(vec![0.25; 3]).unwrap();
        streamer.add_samples(vec![0.5; 2]).unwrap();
        let mut block = vec![0.0; 6];
        renderer.render(&mut block, 1);
        assert_eq!(block, vec![0.25, 0.25, 0.25, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_stereo_duplicates_mono() {
        let (mut streamer, mut renderer) = streamer();
        streamer.add_samples(vec![0.25, 0.5]).unwrap();
        let mut block = vec![0.0; 4];
        renderer.render(&mut block, 2);
        assert_eq!(block, vec![0.25, 0.25, 0.5, 0.5]);
    }

    #[test]
    fn test_interrupt_drops_queued_audio() {
        let (mut streamer, mut renderer) = streamer();
        streamer.add_samples(vec![0.5; 100]).unwrap();
        let mut block = vec![0.0; 10];
        renderer.render(&mut block, 1);
        assert!(block.iter().all(|&s| s == 0.5));

        streamer.interrupt();
        renderer.render(&mut block, 1);
        assert!(block.iter().all(|&s| s == 0.0));
        assert_eq!(renderer.queued(), 0);
        assert!(!streamer.is_playing());
    }

    #[test]
    fn test_chunk_after_interrupt_starts_at_clock() {
        let (mut streamer, mut renderer) = streamer();
        streamer.add_samples(vec![0.5; 100]).unwrap();
        let mut block = vec![0.0; 10];
        renderer.render(&mut block, 1);
        streamer.interrupt();
        let next = streamer.add_samples(vec![0.75; 5]).unwrap();
        assert_eq!(next.start, 10);
        renderer.render(&mut block, 1);
        assert_eq!(&block[..5], &[0.75; 5]);
    }

    #[test]
    fn test_interrupt_fades_out_cut_entry() {
        let (mut streamer, mut renderer) = AudioOutputStreamer::new(
            StreamerConfig::default().with_sample_rate(1000).with_fade(Duration::from_millis(4)),
        );
        // Consume the fade-in of the first run.
        streamer.add_samples(vec![1.0; 50]).unwrap();
        let mut block = vec![0.0; 10];
        renderer.render(&mut block, 1);
        streamer.interrupt();
        renderer.render(&mut block, 1);
        assert!(block[0] > 0.0 && block[0] < 1.0);
        assert!(block[0] > block[3]);
        assert!(block[4..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_fade_in_on_new_run() {
        let (mut streamer, mut renderer) = AudioOutputStreamer::new(
            StreamerConfig::default().with_sample_rate(1000).with_fade(Duration::from_millis(4)),
        );
        streamer.add_samples(vec![1.0; 12]).unwrap();
        let mut block = vec![0.0; 8];
        renderer.render(&mut block, 1);
        assert_eq!(block[0], 0.0);
        assert!(block[1] < block[2] && block[2] < block[3]);
        assert_eq!(&block[4..], &[1.0; 4]);
    }

    #[test]
    fn test_run_end_fades_out() {
        let (mut streamer, mut renderer) = AudioOutputStreamer::new(
            StreamerConfig::default().with_sample_rate(1000).with_fade(Duration::from_millis(4)),
        );
        streamer.add_samples(vec![1.0; 12]).unwrap();
        let mut block = vec![0.0; 16];
        renderer.render(&mut block, 1);
        assert_eq!(&block[4..8], &[1.0; 4]);
        assert!(block[8] < 1.0);
        assert!(block[8] > block[9] && block[9] > block[10] && block[10] > block[11]);
        assert!(block[11] > 0.0);
        assert!(block[12..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_queued_successor_skips_tail_fade() {
        let (mut streamer, mut renderer) = AudioOutputStreamer::new(
            StreamerConfig::default().with_sample_rate(1000).with_fade(Duration::from_millis(4)),
        );
        streamer.add_samples(vec![1.0; 12]).unwrap();
        streamer.add_samples(vec![1.0; 12]).unwrap();
        let mut block = vec![0.0; 16];
        renderer.render(&mut block, 1);
        assert_eq!(&block[4..], &[1.0; 12]);
    }

    #[test]
    fn test_fade_tail_over_new_run_is_clamped() {
        let (mut streamer, mut renderer) = AudioOutputStreamer::new(
            StreamerConfig::default().with_sample_rate(1000).with_fade(Duration::from_millis(4)),
        );
        streamer.add_samples(vec![1.0; 50]).unwrap();
        let mut block = vec![0.0; 10];
        renderer.render(&mut block, 1);
        streamer.interrupt();
        let next = streamer.add_samples(vec![1.0; 50]).unwrap();
        assert_eq!(next.start, 10);
        // The new run reaches the renderer three frames into its fade-in,
        // while the cut entry is still ringing out.
        renderer.clock.advance(3);
        renderer.render(&mut block, 1);
        assert_eq!(block[0], 1.0);
        assert!(block.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_late_entry_keeps_schedule() {
        let (mut streamer, mut renderer) = streamer();
        let first = streamer.add_samples(vec![0.5; 100]).unwrap();
        assert_eq!(first.start, 0);
        // The clock moves on before the renderer sees the entry.
        renderer.clock.advance(10);
        let mut block = vec![0.0; 50];
        renderer.render(&mut block, 1);
        assert!(block.iter().all(|&s| s == 0.5));
        assert_eq!(streamer.scheduled_until(), Some(first.end));
        assert!(streamer.is_playing());

        let next = streamer.add_samples(vec![0.25; 10]).unwrap();
        assert_eq!(next.start, first.end);
        assert!(!next.new_run);
        renderer.render(&mut block, 1);
        assert_eq!(&block[..40], &[0.5; 40]);
        assert_eq!(&block[40..], &[0.25; 10]);
        assert!(!streamer.is_playing());
    }

    #[test]
    fn test_entry_entirely_overdue_is_dropped() {
        let (mut streamer, mut renderer) = streamer();
        streamer.add_samples(vec![0.5; 5]).unwrap();
        streamer.add_samples(vec![0.25; 10]).unwrap();
        renderer.clock.advance(8);
        let mut block = vec![0.0; 10];
        renderer.render(&mut block, 1);
        assert_eq!(&block[..7], &[0.25; 7]);
        assert_eq!(&block[7..], &[0.0; 3]);
        assert_eq!(renderer.queued(), 0);
    }

    #[test]
    fn test_output_volume_published_per_block() {
        let (mut streamer, mut renderer) = streamer();
        let mut levels = streamer.take_volume_levels().unwrap();
        streamer.add_samples(vec![0.05; 20]).unwrap();
        let mut block = vec![0.0; 10];
        renderer.render(&mut block, 1);
        renderer.render(&mut block, 1);
        renderer.render(&mut block, 1);
        let drained = levels.drain();
        assert_eq!(drained.len(), 3);
        assert!((drained[0] - 0.5).abs() < 1e-4);
        assert_eq!(drained[2], 0.0);
    }
}
