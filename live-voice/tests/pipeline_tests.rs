//! Microphone to session to speaker, wired the way an application wires it.

mod common;

use base64::Engine;
use common::{StubTransport, init_tracing, settle};
use live_voice::audio::f32_to_pcm16;
use live_voice::device::{SyntheticCapture, SyntheticSignal};
use live_voice::{
    AudioInputRecorder, AudioOutputStreamer, EventKind, LiveSessionClient, MediaChunk,
    RecorderConfig, SessionConfig, SessionEvent, StreamerConfig, ToolResponse,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;

fn wire_playback(client: &LiveSessionClient, streamer: Arc<Mutex<AudioOutputStreamer>>) {
    let s = Arc::clone(&streamer);
    client.on(EventKind::Audio, move |event| {
        if let SessionEvent::Audio(pcm) = event {
            s.lock().add_pcm16(pcm).unwrap();
        }
    });
    client.on(EventKind::Interrupted, move |_| streamer.lock().interrupt());
}

fn audio_frame(samples: usize) -> serde_json::Value {
    let pcm = f32_to_pcm16(&vec![0.5; samples]);
    json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{
                    "inlineData": {
                        "mimeType": "audio/pcm;rate=24000",
                        "data": base64::engine::general_purpose::STANDARD.encode(pcm),
                    }
                }]
            }
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_microphone_chunks_reach_the_wire() {
    init_tracing();
    let transport = StubTransport::new();
    let client = Arc::new(LiveSessionClient::new(transport.clone()));
    client.connect_with(SessionConfig::new("gemini-live-2.5-flash")).await.unwrap();

    let backend = Arc::new(SyntheticCapture::new(SyntheticSignal::Sine {
        frequency: 300.0,
        amplitude: 0.3,
    }));
    let mut recorder = AudioInputRecorder::new(backend, RecorderConfig::default());
    let weak: Weak<LiveSessionClient> = Arc::downgrade(&client);
    recorder.on_data(move |chunk| {
        if let Some(client) = weak.upgrade() {
            client.send_realtime_input(vec![MediaChunk::pcm16_base64(chunk)]);
        }
    });

    recorder.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    recorder.stop().await;
    settle().await;

    let frames = transport.sent_with("realtimeInput");
    assert!(frames.len() >= 3, "only {} realtime frames", frames.len());
    for frame in &frames {
        let media = &frame["realtimeInput"]["mediaChunks"][0];
        assert_eq!(media["mimeType"], "audio/pcm;rate=16000");
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(media["data"].as_str().unwrap())
            .unwrap();
        assert_eq!(bytes.len(), 640);
    }
    // The setup frame still leads.
    assert!(transport.sent()[0].get("setup").is_some());

    client.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_reply_audio_is_scheduled_and_barge_in_flushes() {
    init_tracing();
    let transport = StubTransport::new();
    let client = LiveSessionClient::new(transport.clone());
    client.connect_with(SessionConfig::new("gemini-live-2.5-flash")).await.unwrap();

    let (streamer, mut renderer) =
        AudioOutputStreamer::new(StreamerConfig::default().with_fade(Duration::ZERO));
    let streamer = Arc::new(Mutex::new(streamer));
    wire_playback(&client, Arc::clone(&streamer));

    // Three 100 ms chunks back to back.
    for _ in 0..3 {
        assert!(transport.inject_json(audio_frame(2400)));
    }
    settle().await;
    {
        let streamer = streamer.lock();
        assert_eq!(streamer.scheduled_until(), Some(7200));
        assert!(streamer.is_playing());
    }

    let mut block = vec![0.0f32; 480];
    renderer.render(&mut block, 1);
    assert!(block.iter().all(|&s| s > 0.45));

    assert!(transport.inject_json(json!({ "serverContent": { "interrupted": true } })));
    settle().await;
    assert!(!streamer.lock().is_playing());
    renderer.render(&mut block, 1);
    assert!(block.iter().all(|&s| s == 0.0));

    // The next reply starts at the current clock, not after the flushed backlog.
    assert!(transport.inject_json(audio_frame(240)));
    settle().await;
    assert_eq!(streamer.lock().scheduled_until(), Some(960 + 240));

    client.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_tool_handler_answers_through_the_client() {
    let transport = StubTransport::new();
    let client = Arc::new(LiveSessionClient::new(transport.clone()));
    client.connect_with(SessionConfig::new("gemini-live-2.5-flash")).await.unwrap();

    let weak = Arc::downgrade(&client);
    client.on(EventKind::ToolCall, move |event| {
        let (Some(client), SessionEvent::ToolCall(calls)) = (weak.upgrade(), event) else {
            return;
        };
        let responses = calls.iter().map(|c| ToolResponse::for_call(c, "chart rendered")).collect();
        client.send_tool_response(responses).unwrap();
    });

    assert!(transport.inject_json(json!({
        "toolCall": { "functionCalls": [
            { "id": "c1", "name": "render_chart", "args": { "kind": "bar" } },
            { "id": "c2", "name": "render_chart", "args": { "kind": "line" } },
        ]}
    })));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let frames = transport.sent_with("toolResponse");
    assert_eq!(frames.len(), 1);
    let responses = frames[0]["toolResponse"]["functionResponses"].as_array().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["id"], "c1");
    assert_eq!(responses[1]["id"], "c2");
    assert_eq!(responses[0]["response"]["output"], "chart rendered");

    client.disconnect().await;
}
