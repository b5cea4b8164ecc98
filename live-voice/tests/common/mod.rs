#![allow(dead_code)]

use async_trait::async_trait;
use live_voice::{
    EventKind, FrameSink, FrameSource, LiveSessionClient, RealtimeError, Result, SessionEvent,
    Transport, TransportFrame,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Channel-backed transport that records outbound frames and lets tests inject inbound ones.
#[derive(Default)]
pub struct StubTransport {
    sent: Arc<Mutex<Vec<String>>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<TransportFrame>>>,
    models: Mutex<Vec<String>>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    fail_open: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
    writes: WriteGate,
}

/// Lets tests hold outbound writes as if the socket stopped draining.
struct WriteGate(watch::Sender<bool>);

impl Default for WriteGate {
    fn default() -> Self {
        Self(watch::channel(true).0)
    }
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    pub fn delay_open(&self, delay: Duration) {
        *self.open_delay.lock() = Some(delay);
    }

    /// Block every sink write until `resume_writes`.
    pub fn stall_writes(&self) {
        self.writes.0.send_replace(false);
    }

    pub fn resume_writes(&self) {
        self.writes.0.send_replace(true);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn models(&self) -> Vec<String> {
        self.models.lock().clone()
    }

    /// Every frame written so far, parsed.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().iter().map(|f| serde_json::from_str(f).unwrap()).collect()
    }

    /// Frames carrying `key` at the top level.
    pub fn sent_with(&self, key: &str) -> Vec<Value> {
        self.sent().into_iter().filter(|f| f.get(key).is_some()).collect()
    }

    pub fn inject(&self, frame: TransportFrame) -> bool {
        self.inbound.lock().as_ref().is_some_and(|tx| tx.send(frame).is_ok())
    }

    pub fn inject_json(&self, value: Value) -> bool {
        self.inject(TransportFrame::Text(value.to_string()))
    }

    /// Drop the inbound side, as if the peer vanished.
    pub fn hang_up(&self) {
        self.inbound.lock().take();
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn open(&self, model: &str) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.models.lock().push(model.to_string());
        let delay = *self.open_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_open.swap(false, Ordering::SeqCst) {
            return Err(RealtimeError::connection("stub refused connection"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(tx);
        Ok((
            Box::new(StubSink {
                sent: Arc::clone(&self.sent),
                closes: Arc::clone(&self.closes),
                writes: self.writes.0.subscribe(),
            }),
            Box::new(StubSource { rx }),
        ))
    }
}

struct StubSink {
    sent: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
    writes: watch::Receiver<bool>,
}

#[async_trait]
impl FrameSink for StubSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        let _ = self.writes.wait_for(|open| *open).await;
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct StubSource {
    rx: mpsc::UnboundedReceiver<TransportFrame>,
}

#[async_trait]
impl FrameSource for StubSource {
    async fn next(&mut self) -> Option<Result<TransportFrame>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Collect every event of the given kinds, in delivery order.
pub fn record(client: &LiveSessionClient, kinds: &[EventKind]) -> Arc<Mutex<Vec<SessionEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for &kind in kinds {
        let log = Arc::clone(&log);
        client.on(kind, move |event| log.lock().push(event.clone()));
    }
    log
}

pub const ALL_KINDS: &[EventKind] = &[
    EventKind::Open,
    EventKind::SetupComplete,
    EventKind::Close,
    EventKind::Error,
    EventKind::Audio,
    EventKind::Text,
    EventKind::Interrupted,
    EventKind::TurnComplete,
    EventKind::ToolCall,
    EventKind::ToolCallCancellation,
    EventKind::GoAway,
];

/// Let spawned tasks (reader, dispatcher) catch up.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
