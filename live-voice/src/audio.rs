//! Audio format definitions and PCM utilities.

use crate::error::{RealtimeError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sample rate the live endpoint accepts for microphone audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of the audio the live endpoint streams back.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Mime type for JPEG still frames sent as realtime input.
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// Linear PCM format specification (always 16-bit little-endian on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 24000, 16000).
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono, 2 = stereo).
    pub channels: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_16khz()
    }
}

impl AudioFormat {
    /// Create a new PCM16 format.
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self { sample_rate, channels }
    }

    /// PCM16 mono at 16kHz (outbound microphone format).
    pub fn pcm16_16khz() -> Self {
        Self { sample_rate: INPUT_SAMPLE_RATE, channels: 1 }
    }

    /// PCM16 mono at 24kHz (inbound reply format).
    pub fn pcm16_24khz() -> Self {
        Self { sample_rate: OUTPUT_SAMPLE_RATE, channels: 1 }
    }

    /// Bytes per second for this format.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * 2
    }

    /// Duration in milliseconds for a given number of bytes.
    pub fn duration_ms(&self, bytes: usize) -> f64 {
        let bytes_per_ms = self.bytes_per_second() as f64 / 1000.0;
        bytes as f64 / bytes_per_ms
    }

    /// Number of frames (samples per channel) covering `duration`.
    pub fn frames_for(&self, duration: Duration) -> usize {
        (self.sample_rate as u128 * duration.as_micros() / 1_000_000) as usize
    }

    /// Mime type announced for realtime input in this format.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Parse the rate out of an `audio/pcm;rate=NNNN` mime type.
    ///
    /// A bare `audio/pcm` yields `None`; the caller decides the default.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let mut params = mime.split(';').map(str::trim);
        if !params.next()?.eq_ignore_ascii_case("audio/pcm") {
            return None;
        }
        params
            .filter_map(|p| p.strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
            .map(|rate| Self::new(rate, 1))
    }
}

/// Immutable buffer of PCM16 little-endian samples.
///
/// Produced by one stage and moved to the next; there is no mutable access to the
/// bytes after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Vec<u8>,
    format: AudioFormat,
}

impl AudioChunk {
    /// Create a new audio chunk. Fails if `data` is not a whole number of samples.
    pub fn new(data: Vec<u8>, format: AudioFormat) -> Result<Self> {
        if data.len() % 2 != 0 {
            return Err(RealtimeError::audio(format!(
                "Invalid data length for PCM16: {} (must be even)",
                data.len()
            )));
        }
        Ok(Self { data, format })
    }

    /// Create a PCM16 16kHz audio chunk from f32 samples in [-1, 1].
    pub fn from_f32_16khz(samples: &[f32]) -> Self {
        Self { data: f32_to_pcm16(samples), format: AudioFormat::pcm16_16khz() }
    }

    /// Create an AudioChunk from i16 samples.
    pub fn from_i16_samples(samples: &[i16], format: AudioFormat) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self { data, format }
    }

    /// Decode base64 PCM16 data.
    pub fn from_base64(encoded: &str, format: AudioFormat) -> Result<Self> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| RealtimeError::audio(format!("Invalid base64 audio: {e}")))?;
        Self::new(data, format)
    }

    /// Raw PCM16 bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the raw PCM16 bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Audio format of this chunk.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Number of samples (per channel for mono).
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Duration of this chunk in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.format.duration_ms(self.data.len())
    }

    /// Encode audio data as base64.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Samples converted to f32 in [-1, 1).
    pub fn to_f32_samples(&self) -> Vec<f32> {
        self.data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect()
    }
}

/// Convert PCM16 little-endian bytes to f32 samples.
pub fn pcm16_to_f32(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(RealtimeError::audio(format!(
            "Invalid data length for PCM16: {} (must be even)",
            bytes.len()
        )));
    }
    Ok(bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0).collect())
}

/// Convert f32 samples in [-1, 1] to PCM16 little-endian bytes, clamping out-of-range input.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s * 32768.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// One realtime input part: base64 payload plus its mime type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    /// `audio/pcm;rate=16000` or `image/jpeg`.
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

impl MediaChunk {
    /// Create a media chunk from already-encoded data.
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self { mime_type: mime_type.into(), data: data.into() }
    }

    /// Wrap a PCM chunk.
    pub fn audio(chunk: &AudioChunk) -> Self {
        Self::new(chunk.format().mime_type(), chunk.to_base64())
    }

    /// Wrap base64 PCM16 recorded at 16kHz.
    pub fn pcm16_base64(data: impl Into<String>) -> Self {
        Self::new(AudioFormat::pcm16_16khz().mime_type(), data)
    }

    /// Wrap a JPEG still frame.
    pub fn jpeg(bytes: &[u8]) -> Self {
        Self::new(JPEG_MIME_TYPE, base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Decode the payload.
    pub fn decode(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| RealtimeError::protocol(format!("Invalid base64 payload: {e}")))
    }

    /// Whether this part carries audio.
    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }
}
