//! Audio device backends.
//!
//! A backend takes the render half of a pipeline ([`CaptureSink`] or
//! [`PlaybackRenderer`]), moves it onto a device thread and hands back a stream
//! handle. Dropping or stopping the handle releases the device.

#[cfg(feature = "desktop-audio")]
mod desktop;
mod synthetic;

#[cfg(feature = "desktop-audio")]
pub use desktop::{CpalCapture, CpalPlayback};
pub use synthetic::{SyntheticCapture, SyntheticPlayback, SyntheticSignal};

use crate::error::{RealtimeError, Result};
use crate::input::CaptureSink;
use crate::output::PlaybackRenderer;
use std::sync::mpsc;
use std::thread::JoinHandle;

/// Source of microphone blocks.
pub trait CaptureBackend: Send + Sync {
    /// Open the device and start feeding `sink`.
    fn start(&self, sink: CaptureSink) -> Result<Box<dyn CaptureStream>>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;
}

/// A running capture stream.
pub trait CaptureStream: Send {
    /// Stop the stream and release the device. Idempotent.
    fn stop(&mut self);
}

/// Sink for rendered playback blocks.
pub trait PlaybackBackend: Send + Sync {
    /// Open the device and start pulling blocks from `renderer`.
    fn start(&self, renderer: PlaybackRenderer) -> Result<Box<dyn PlaybackStream>>;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;
}

/// A running playback stream.
pub trait PlaybackStream: Send {
    /// Stop the stream and release the device. Idempotent.
    fn stop(&mut self);
}

/// Handle to a thread that owns a device stream until told to stop.
pub(crate) struct DeviceThread {
    label: &'static str,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceThread {
    /// Spawn `body` on a named thread and wait for it to report that the stream is up.
    ///
    /// `body` receives the stop receiver and a ready sender; it must send exactly one
    /// result on the ready sender before blocking on the stop receiver.
    pub(crate) fn spawn<F>(label: &'static str, body: F) -> Result<Self>
    where
        F: FnOnce(mpsc::Receiver<()>, mpsc::SyncSender<Result<()>>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let thread = std::thread::Builder::new()
            .name(format!("live-voice-{label}"))
            .spawn(move || body(stop_rx, ready_tx))
            .map_err(|e| RealtimeError::device(format!("failed to spawn {label} thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                Ok(Self { label, stop_tx: Some(stop_tx), thread: Some(thread) })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(RealtimeError::device(format!("{label} thread exited during startup")))
            }
        }
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the thread whether it waits on recv or recv_timeout.
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(label = self.label, "device thread panicked");
            } else {
                tracing::debug!(label = self.label, "device thread stopped");
            }
        }
    }
}

impl CaptureStream for DeviceThread {
    fn stop(&mut self) {
        self.shutdown();
    }
}

impl PlaybackStream for DeviceThread {
    fn stop(&mut self) {
        self.shutdown();
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
