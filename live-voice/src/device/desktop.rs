//! Microphone and speaker access through cpal.
//!
//! `cpal::Stream` is not `Send`, so each stream is built, played and dropped on
//! its own thread; the handle only carries the stop signal.

use super::{CaptureBackend, CaptureStream, DeviceThread, PlaybackBackend, PlaybackStream};
use crate::error::{RealtimeError, Result};
use crate::input::CaptureSink;
use crate::output::PlaybackRenderer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, SampleRate, Stream, StreamConfig};

const SCRATCH_SAMPLES: usize = 16_384;

fn report_stream_error(err: cpal::StreamError) {
    tracing::error!(error = %err, "audio stream error");
}

fn find_device(host: &Host, name: Option<&str>, input: bool) -> Result<Device> {
    let Some(name) = name else {
        let device = if input { host.default_input_device() } else { host.default_output_device() };
        return device.ok_or_else(|| {
            RealtimeError::device(format!(
                "no {} device available",
                if input { "input" } else { "output" }
            ))
        });
    };

    host.devices()
        .map_err(|e| RealtimeError::device(e.to_string()))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| RealtimeError::device(format!("audio device '{name}' not found")))
}

/// Default (or named) microphone.
#[derive(Debug, Clone, Default)]
pub struct CpalCapture {
    device_name: Option<String>,
}

impl CpalCapture {
    /// Use the host's default input device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the input device with this name.
    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    /// Names of the available input devices.
    pub fn device_names() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices().map_err(|e| RealtimeError::device(e.to_string()))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

fn open_input(name: Option<&str>, sink: CaptureSink) -> Result<Stream> {
    let host = cpal::default_host();
    let device = find_device(&host, name, true)?;
    let supported =
        device.default_input_config().map_err(|e| RealtimeError::device(e.to_string()))?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        ?format,
        "audio capture initialized"
    );

    let mut processor = sink.into_processor(config.sample_rate.0, config.channels)?;
    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| processor.process(data),
            report_stream_error,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = Vec::with_capacity(SCRATCH_SAMPLES);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    processor.process_i16(data, &mut scratch)
                },
                report_stream_error,
                None,
            )
        }
        other => {
            return Err(RealtimeError::device(format!("unsupported input sample format {other:?}")));
        }
    }
    .map_err(|e| RealtimeError::device(e.to_string()))?;

    stream.play().map_err(|e| RealtimeError::device(e.to_string()))?;
    Ok(stream)
}

impl CaptureBackend for CpalCapture {
    fn start(&self, sink: CaptureSink) -> Result<Box<dyn CaptureStream>> {
        let name = self.device_name.clone();
        let thread = DeviceThread::spawn("cpal-capture", move |stop_rx, ready_tx| {
            match open_input(name.as_deref(), sink) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::debug!("audio capture stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })?;
        Ok(Box::new(thread))
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

/// Default (or named) speaker.
#[derive(Debug, Clone, Default)]
pub struct CpalPlayback {
    device_name: Option<String>,
}

impl CpalPlayback {
    /// Use the host's default output device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the output device with this name.
    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }
}

fn open_output(name: Option<&str>, mut renderer: PlaybackRenderer) -> Result<Stream> {
    let host = cpal::default_host();
    let device = find_device(&host, name, false)?;
    let rate = SampleRate(renderer.sample_rate());

    // Prefer mono, then stereo, then f32 over i16, at the renderer's rate.
    let supported = device
        .supported_output_configs()
        .map_err(|e| RealtimeError::device(e.to_string()))?
        .filter(|c| {
            c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
                && matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16)
        })
        .min_by_key(|c| (c.channels(), c.sample_format() != SampleFormat::F32))
        .ok_or_else(|| {
            RealtimeError::device(format!("no suitable output config at {} Hz", rate.0))
        })?
        .with_sample_rate(rate);
    let format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let channels = config.channels as usize;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = rate.0,
        channels,
        ?format,
        "audio playback initialized"
    );

    let stream = match format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.render(data, channels),
            report_stream_error,
            None,
        ),
        _ => {
            let mut scratch = vec![0.0f32; SCRATCH_SAMPLES];
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    if scratch.len() < data.len() {
                        scratch.resize(data.len(), 0.0);
                    }
                    let block = &mut scratch[..data.len()];
                    renderer.render(block, channels);
                    for (out, &s) in data.iter_mut().zip(block.iter()) {
                        *out = (s * 32768.0).clamp(-32768.0, 32767.0) as i16;
                    }
                },
                report_stream_error,
                None,
            )
        }
    }
    .map_err(|e| RealtimeError::device(e.to_string()))?;

    stream.play().map_err(|e| RealtimeError::device(e.to_string()))?;
    Ok(stream)
}

impl PlaybackBackend for CpalPlayback {
    fn start(&self, renderer: PlaybackRenderer) -> Result<Box<dyn PlaybackStream>> {
        let name = self.device_name.clone();
        let thread = DeviceThread::spawn("cpal-playback", move |stop_rx, ready_tx| {
            match open_output(name.as_deref(), renderer) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::debug!("audio playback stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })?;
        Ok(Box::new(thread))
    }

    fn name(&self) -> &str {
        "cpal"
    }
}
