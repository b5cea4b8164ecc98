//! Per-block level metering.
//!
//! [`VolumeMeter`] runs inside the render callbacks: it allocates nothing after
//! construction and publishes each block's level through a wait-free ring so the
//! control context can pick it up whenever it gets around to it.

use rtrb::{Consumer, Producer, RingBuffer};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Gain applied to the raw RMS before clamping.
///
/// Conversational speech sits around 0.02..0.1 RMS; the gain spreads it across the
/// unit range for UI animation.
pub const DEFAULT_GAIN: f32 = 10.0;

/// Slots in the level ring. At ~100 blocks/s this is over a second of backlog.
const LEVEL_RING_CAPACITY: usize = 128;

/// Root-mean-square level meter producing one volume sample in `[0, 1]` per block.
#[derive(Debug)]
pub struct VolumeMeter {
    gain: f32,
    smoothing: f32,
    current: f32,
    sink: Option<Producer<f32>>,
}

impl Default for VolumeMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeMeter {
    /// Create a meter with the default gain and no smoothing.
    pub fn new() -> Self {
        Self { gain: DEFAULT_GAIN, smoothing: 0.0, current: 0.0, sink: None }
    }

    /// Set the gain applied before clamping.
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Exponential smoothing toward the previous level, `alpha` in `[0, 1)`.
    ///
    /// 0 disables smoothing: each sample reflects only its own block.
    pub fn with_smoothing(mut self, alpha: f32) -> Self {
        self.smoothing = alpha.clamp(0.0, 0.99);
        self
    }

    /// Attach a level ring and return its consumer half.
    pub fn with_levels(mut self) -> (Self, VolumeLevels) {
        let (producer, consumer) = RingBuffer::new(LEVEL_RING_CAPACITY);
        self.sink = Some(producer);
        (self, VolumeLevels { consumer, last: 0.0 })
    }

    /// Measure one block, publish the result and return it.
    pub fn process(&mut self, block: &[f32]) -> f32 {
        let level = self.measure(block);
        if let Some(sink) = self.sink.as_mut() {
            // Best effort: a full ring means the reader is behind, drop this block's level.
            let _ = sink.push(level);
        }
        level
    }

    /// Measure one block without publishing.
    pub fn measure(&mut self, block: &[f32]) -> f32 {
        let raw = (rms(block) * self.gain).clamp(0.0, 1.0);
        self.current = if self.smoothing > 0.0 {
            self.smoothing * self.current + (1.0 - self.smoothing) * raw
        } else {
            raw
        };
        self.current
    }

    /// Level of the most recent block.
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Forget the smoothed history (used when a stream restarts).
    pub fn reset(&mut self) {
        self.current = 0.0;
    }
}

/// Root mean square of a block; 0 for an empty block.
pub fn rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum: f32 = block.iter().map(|s| s * s).sum();
    (sum / block.len() as f32).sqrt()
}

/// Control-side reader of a meter's published levels.
#[derive(Debug)]
pub struct VolumeLevels {
    consumer: Consumer<f32>,
    last: f32,
}

impl VolumeLevels {
    /// Drain pending levels and return the newest one, if any arrived.
    pub fn latest(&mut self) -> Option<f32> {
        let mut newest = None;
        while let Ok(level) = self.consumer.pop() {
            newest = Some(level);
        }
        if let Some(level) = newest {
            self.last = level;
        }
        newest
    }

    /// Drain pending levels in publish order.
    pub fn drain(&mut self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.consumer.slots());
        while let Ok(level) = self.consumer.pop() {
            out.push(level);
        }
        if let Some(&level) = out.last() {
            self.last = level;
        }
        out
    }

    /// Trailing value: the last level observed by this reader.
    pub fn trailing(&self) -> f32 {
        self.last
    }

    /// Whether the meter side has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.consumer.is_abandoned()
    }
}

/// Forward a meter's levels to `callback` from a tokio task, polling every `period`.
///
/// The task ends once the meter side is dropped and its backlog is delivered.
pub fn spawn_level_pump(
    mut levels: VolumeLevels,
    period: Duration,
    callback: impl Fn(f32) + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let abandoned = levels.is_abandoned();
            for level in levels.drain() {
                callback(level);
            }
            if abandoned {
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_zero() {
        let mut meter = VolumeMeter::new();
        assert_eq!(meter.process(&[0.0; 128]), 0.0);
        assert_eq!(meter.process(&[]), 0.0);
    }

    #[test]
    fn test_rms_of_constant_block() {
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert!((rms(&[-0.25, 0.25]) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_level_is_clamped() {
        let mut meter = VolumeMeter::new();
        assert_eq!(meter.process(&[1.0; 32]), 1.0);

        let mut quiet = VolumeMeter::new().with_gain(1.0);
        assert!((quiet.process(&[0.1; 32]) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_smoothing_lags_raw_level() {
        let mut meter = VolumeMeter::new().with_gain(1.0).with_smoothing(0.5);
        let first = meter.process(&[0.8; 16]);
        assert!((first - 0.4).abs() < 1e-6);
        let second = meter.process(&[0.8; 16]);
        assert!((second - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_levels_delivered_in_order() {
        let (mut meter, mut levels) = VolumeMeter::new().with_gain(1.0).with_levels();
        meter.process(&[0.1; 8]);
        meter.process(&[0.2; 8]);
        let drained = levels.drain();
        assert_eq!(drained.len(), 2);
        assert!((drained[1] - 0.2).abs() < 1e-6);
        assert!((levels.trailing() - 0.2).abs() < 1e-6);
        assert_eq!(levels.latest(), None);
    }

    #[tokio::test]
    async fn test_level_pump_delivers_then_ends() {
        let (mut meter, levels) = VolumeMeter::new().with_gain(1.0).with_levels();
        meter.process(&[0.5; 8]);
        meter.process(&[0.25; 8]);
        drop(meter);

        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        spawn_level_pump(levels, Duration::from_millis(1), move |level| sink.lock().push(level))
            .await
            .unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_full_ring_drops_without_blocking() {
        let (mut meter, mut levels) = VolumeMeter::new().with_levels();
        for _ in 0..(LEVEL_RING_CAPACITY + 10) {
            meter.process(&[0.05; 8]);
        }
        assert_eq!(levels.drain().len(), LEVEL_RING_CAPACITY);
    }
}
