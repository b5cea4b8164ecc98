//! The control context: wires microphone, session and speaker together.

use crate::config::AppConfig;
use crate::tools;
use anyhow::{Context, Result};
use live_voice::device::{
    CaptureBackend, PlaybackBackend, SyntheticCapture, SyntheticPlayback, SyntheticSignal,
};
use live_voice::gemini::WebSocketTransport;
use live_voice::volume::spawn_level_pump;
use live_voice::{
    AudioInputRecorder, AudioOutputStreamer, EventKind, LiveSessionClient, MediaChunk,
    SessionEvent, StreamerConfig, ToolResponse,
};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const METER_PERIOD: Duration = Duration::from_millis(50);
const METER_WIDTH: usize = 20;

struct Devices {
    capture: Arc<dyn CaptureBackend>,
    playback: Box<dyn PlaybackBackend>,
}

fn open_devices(config: &AppConfig) -> Result<Devices> {
    if config.dry_run {
        return Ok(Devices {
            capture: Arc::new(SyntheticCapture::new(SyntheticSignal::Sine {
                frequency: 220.0,
                amplitude: 0.2,
            })),
            playback: Box::new(SyntheticPlayback::new()),
        });
    }
    desktop_devices(config)
}

#[cfg(feature = "desktop-audio")]
fn desktop_devices(config: &AppConfig) -> Result<Devices> {
    use live_voice::device::{CpalCapture, CpalPlayback};

    let mut capture = CpalCapture::new();
    if let Some(name) = &config.input_device {
        capture = capture.with_device(name.clone());
    }
    let mut playback = CpalPlayback::new();
    if let Some(name) = &config.output_device {
        playback = playback.with_device(name.clone());
    }
    Ok(Devices { capture: Arc::new(capture), playback: Box::new(playback) })
}

#[cfg(not(feature = "desktop-audio"))]
fn desktop_devices(_config: &AppConfig) -> Result<Devices> {
    anyhow::bail!("built without the desktop-audio feature; pass --dry-run")
}

/// Print the names of the capture devices.
pub fn list_devices() -> Result<()> {
    #[cfg(feature = "desktop-audio")]
    {
        let names = live_voice::device::CpalCapture::device_names()
            .context("failed to enumerate input devices")?;
        for name in names {
            println!("{name}");
        }
        Ok(())
    }
    #[cfg(not(feature = "desktop-audio"))]
    {
        anyhow::bail!("built without the desktop-audio feature")
    }
}

/// Run one conversation until Ctrl+C or until the session ends.
pub async fn run(config: AppConfig) -> Result<()> {
    let devices = open_devices(&config)?;
    tracing::info!(
        capture = devices.capture.name(),
        playback = devices.playback.name(),
        model = %config.session.model,
        "Starting live voice session"
    );

    let (mut streamer, renderer) = AudioOutputStreamer::new(StreamerConfig::default());
    let output_levels = streamer.take_volume_levels();
    let mut playback = devices.playback.start(renderer).context("failed to open speaker")?;
    let streamer = Arc::new(Mutex::new(streamer));

    let transport = Arc::new(WebSocketTransport::new(config.api_key.clone()));
    let client = Arc::new(LiveSessionClient::with_options(transport, config.options));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();
    wire_session(&client, &streamer, done_tx);

    let mut recorder = AudioInputRecorder::new(devices.capture, config.recorder.clone());
    let uplink = Arc::downgrade(&client);
    recorder.on_data(move |chunk| {
        if let Some(client) = uplink.upgrade() {
            client.send_realtime_input(vec![MediaChunk::pcm16_base64(chunk)]);
        }
    });

    let mut meter_tasks = Vec::new();
    if config.meter {
        let mic = Arc::new(AtomicU32::new(0));
        let speaker = Arc::new(AtomicU32::new(0));
        let m = Arc::clone(&mic);
        recorder.on_volume(move |level| m.store(level.to_bits(), Ordering::Relaxed));
        if let Some(levels) = output_levels {
            let s = Arc::clone(&speaker);
            meter_tasks.push(spawn_level_pump(levels, METER_PERIOD, move |level| {
                s.store(level.to_bits(), Ordering::Relaxed)
            }));
        }
        meter_tasks.push(spawn_meter(mic, speaker));
    }

    client.connect_with(config.session.clone()).await.context("failed to connect to Gemini Live")?;
    recorder.start().await.context("failed to start microphone")?;
    if let Some(prompt) = &config.prompt {
        client.send_text(prompt, true).context("failed to send prompt")?;
    }
    println!("Listening. Press Ctrl+C to quit.");

    let reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => "stopped by user".to_string(),
        Some(reason) = done_rx.recv() => reason,
    };
    tracing::info!(%reason, "Ending conversation");

    recorder.stop().await;
    client.disconnect().await;
    streamer.lock().stop();
    playback.stop();
    for task in meter_tasks {
        task.abort();
    }
    if config.meter {
        eprintln!();
    }
    println!("Session ended: {reason}");
    Ok(())
}

fn wire_session(
    client: &Arc<LiveSessionClient>,
    streamer: &Arc<Mutex<AudioOutputStreamer>>,
    done: mpsc::UnboundedSender<String>,
) {
    let s = Arc::clone(streamer);
    client.on(EventKind::Audio, move |event| {
        if let SessionEvent::Audio(pcm) = event {
            if let Err(e) = s.lock().add_pcm16(pcm) {
                tracing::warn!(error = %e, "Dropping reply audio");
            }
        }
    });

    let s = Arc::clone(streamer);
    client.on(EventKind::Interrupted, move |_| {
        tracing::debug!("Barge-in, flushing playback");
        s.lock().interrupt();
    });

    client.on(EventKind::SetupComplete, |_| tracing::info!("Session ready"));

    client.on(EventKind::Text, |event| {
        if let SessionEvent::Text(text) = event {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
    });
    client.on(EventKind::TurnComplete, |_| println!());

    let weak = Arc::downgrade(client);
    client.on(EventKind::ToolCall, move |event| {
        let (Some(client), SessionEvent::ToolCall(calls)) = (weak.upgrade(), event) else {
            return;
        };
        let responses: Vec<ToolResponse> = calls.iter().map(tools::handle).collect();
        if let Err(e) = client.send_tool_response(responses) {
            tracing::warn!(error = %e, "Could not answer tool call");
        }
    });

    let d = done.clone();
    client.on(EventKind::Close, move |event| {
        if let SessionEvent::Close(reason) = event {
            let _ = d.send(reason.clone());
        }
    });

    let weak = Arc::downgrade(client);
    client.on(EventKind::Error, move |event| {
        let SessionEvent::Error(detail) = event else {
            return;
        };
        // Server-reported errors leave the session open; transport failures do not.
        if weak.upgrade().is_some_and(|c| !c.is_open()) {
            let _ = done.send(detail.clone());
        }
    });
}

fn spawn_meter(mic: Arc<AtomicU32>, speaker: Arc<AtomicU32>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            ticker.tick().await;
            let mic = f32::from_bits(mic.load(Ordering::Relaxed));
            let speaker = f32::from_bits(speaker.load(Ordering::Relaxed));
            eprint!("\rmic [{}]  gemini [{}]", bar(mic), bar(speaker));
            let _ = std::io::stderr().flush();
        }
    })
}

fn bar(level: f32) -> String {
    let filled = (level.clamp(0.0, 1.0) * METER_WIDTH as f32).round() as usize;
    format!("{}{}", "#".repeat(filled), " ".repeat(METER_WIDTH - filled))
}
