//! Fixed-frame resampling for the capture path.

use crate::audio::AudioFormat;
use crate::error::{RealtimeError, Result};
use rubato::{FftFixedIn, Resampler};
use std::time::Duration;

/// Resamples a mono stream and cuts the result into frames of exactly `frame_dur`.
///
/// All buffers are sized at construction; `push` does not allocate, so it is safe
/// to call from a device callback.
pub struct FrameResampler {
    resampler: Option<FftFixedIn<f32>>,
    chunk_in: usize,
    in_buf: Vec<f32>,
    out_buf: Vec<Vec<f32>>,
    frame_samples: usize,
    pending: Vec<f32>,
}

impl FrameResampler {
    /// Create a resampler from `in_hz` to `out_hz` emitting frames of `frame_dur`.
    ///
    /// Equal rates bypass resampling and only re-frame the signal. Otherwise the FFT
    /// stage consumes one frame duration of input per call, so the first frame is
    /// emitted as soon as one frame duration has been captured. Its head carries the
    /// resampler's `output_delay()` of filter latency.
    pub fn new(in_hz: u32, out_hz: u32, frame_dur: Duration) -> Result<Self> {
        let frame_samples = AudioFormat::new(out_hz, 1).frames_for(frame_dur);
        if frame_samples == 0 {
            return Err(RealtimeError::config(format!(
                "frame duration {frame_dur:?} too short for {out_hz} Hz"
            )));
        }
        if in_hz == 0 {
            return Err(RealtimeError::audio("input sample rate is zero"));
        }

        let chunk_in = AudioFormat::new(in_hz, 1).frames_for(frame_dur).max(1);
        let resampler = if in_hz == out_hz {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(in_hz as usize, out_hz as usize, chunk_in, 1, 1).map_err(
                    |e| RealtimeError::audio(format!("Failed to create resampler: {e}")),
                )?,
            )
        };
        let out_buf =
            resampler.as_ref().map(|r| r.output_buffer_allocate(true)).unwrap_or_default();
        if let Some(r) = resampler.as_ref() {
            tracing::trace!(chunk_in, delay = r.output_delay(), "resampler ready");
        }

        Ok(Self {
            resampler,
            chunk_in,
            in_buf: Vec::with_capacity(chunk_in),
            out_buf,
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        })
    }

    /// Samples per emitted frame.
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Output samples of filter latency at the head of the stream (0 when bypassed).
    pub fn output_delay(&self) -> usize {
        self.resampler.as_ref().map_or(0, |r| r.output_delay())
    }

    /// Feed samples; `emit` is called once per completed frame.
    pub fn push(&mut self, mut src: &[f32], mut emit: impl FnMut(&[f32])) {
        let Some(resampler) = self.resampler.as_mut() else {
            emit_frames(&mut self.pending, self.frame_samples, src, &mut emit);
            return;
        };

        while !src.is_empty() {
            let space = self.chunk_in - self.in_buf.len();
            let take = space.min(src.len());
            self.in_buf.extend_from_slice(&src[..take]);
            src = &src[take..];

            if self.in_buf.len() == self.chunk_in {
                if let Ok((_, written)) =
                    resampler.process_into_buffer(&[&self.in_buf[..]], &mut self.out_buf, None)
                {
                    emit_frames(
                        &mut self.pending,
                        self.frame_samples,
                        &self.out_buf[0][..written],
                        &mut emit,
                    );
                }
                self.in_buf.clear();
            }
        }
    }

    /// Drop any partially accumulated input and output.
    pub fn reset(&mut self) {
        self.in_buf.clear();
        self.pending.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

impl std::fmt::Debug for FrameResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameResampler")
            .field("resampling", &self.resampler.is_some())
            .field("frame_samples", &self.frame_samples)
            .field("pending", &self.pending.len())
            .finish()
    }
}

fn emit_frames(
    pending: &mut Vec<f32>,
    frame_samples: usize,
    mut data: &[f32],
    emit: &mut impl FnMut(&[f32]),
) {
    while !data.is_empty() {
        let space = frame_samples - pending.len();
        let take = space.min(data.len());
        pending.extend_from_slice(&data[..take]);
        data = &data[take..];

        if pending.len() == frame_samples {
            emit(pending.as_slice());
            pending.clear();
        }
    }
}
