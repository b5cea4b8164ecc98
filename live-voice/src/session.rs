//! `LiveSessionClient`: lifecycle and framing for one live conversation.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──handshake ok──▶ Open ──disconnect / server close──▶ Closed
//!                       │                          │
//!                       └──────── failure ─────────┴──────▶ Error
//! ```
//!
//! Every connection attempt gets a new generation number. Tasks spawned for an
//! attempt (reader, writer, tool-response flush) compare their generation with
//! the current one before touching state, so nothing from a torn-down
//! connection leaks into the next one.

use crate::audio::MediaChunk;
use crate::config::{ClientOptions, SessionConfig};
use crate::error::{RealtimeError, Result};
use crate::events::{EventKind, EventListeners, ListenerId, SessionEvent, ToolResponse};
use crate::gemini::protocol;
use crate::transport::{FrameSink, FrameSource, Transport, TransportFrame};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long `disconnect` waits for the writer to flush and close the transport.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
    /// The last attempt failed or the transport broke. Reconnect explicitly.
    Error,
}

enum Outbound {
    Frame(String),
    Close,
}

struct Inner {
    state: SessionState,
    generation: u64,
    session_id: Option<String>,
    config: Option<SessionConfig>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    // Microphone traffic, bounded so a stalled socket sheds audio instead of growing.
    realtime: Option<mpsc::Sender<String>>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    pending_tools: Vec<ToolResponse>,
    tool_flush: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state == SessionState::Open
    }

    /// Drop everything tied to the current connection.
    fn release(&mut self) -> (Option<JoinHandle<()>>, Option<JoinHandle<()>>) {
        self.pending_tools.clear();
        if let Some(flush) = self.tool_flush.take() {
            flush.abort();
        }
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Outbound::Close);
        }
        self.realtime = None;
        (self.reader.take(), self.writer.take())
    }
}

struct Shared {
    inner: Mutex<Inner>,
    listeners: Arc<EventListeners>,
    options: ClientOptions,
}

impl Shared {
    fn ensure_dispatcher(&self, inner: &mut Inner) {
        if inner.events.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return;
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
        let listeners = Arc::clone(&self.listeners);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                listeners.emit(&event);
            }
        });
        inner.events = Some(tx);
    }

    fn dispatch(&self, generation: u64, raw: &str) {
        let events = match protocol::decode_server_message(raw) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed server frame");
                return;
            }
        };

        let mut inner = self.inner.lock();
        if !inner.is_current(generation) {
            return;
        }
        for event in events {
            match &event {
                SessionEvent::ToolCallCancellation(ids) => {
                    inner.pending_tools.retain(|r| !ids.contains(&r.id));
                    tracing::debug!(count = ids.len(), "Tool calls cancelled by server");
                }
                SessionEvent::GoAway { time_left } => {
                    tracing::warn!(?time_left, "Server announced disconnect");
                }
                SessionEvent::Error(detail) => {
                    tracing::error!(%detail, "Server reported an error");
                }
                _ => {}
            }
            inner.emit(event);
        }
    }

    fn remote_closed(&self, generation: u64, reason: Option<String>) {
        let mut inner = self.inner.lock();
        if !inner.is_current(generation) {
            return;
        }
        let reason = reason.unwrap_or_else(|| "connection closed by server".to_string());
        tracing::info!(%reason, "Session closed by server");
        inner.state = SessionState::Closed;
        let (_reader, _writer) = inner.release();
        inner.emit(SessionEvent::Close(reason));
    }

    fn fail(&self, generation: u64, error: RealtimeError) {
        let mut inner = self.inner.lock();
        if !inner.is_current(generation) {
            return;
        }
        tracing::error!(error = %error, "Session transport failed");
        inner.state = SessionState::Error;
        let (_reader, _writer) = inner.release();
        inner.emit(SessionEvent::Error(error.to_string()));
    }

    fn flush_tool_responses(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        inner.tool_flush = None;
        let batch = std::mem::take(&mut inner.pending_tools);
        if batch.is_empty() {
            return;
        }
        if inner.state != SessionState::Open {
            tracing::warn!(count = batch.len(), "Session not open, dropping tool responses");
            return;
        }
        match protocol::tool_response_frame(&batch) {
            Ok(frame) => {
                tracing::debug!(count = batch.len(), "Sending tool responses");
                if let Some(outbound) = &inner.outbound {
                    let _ = outbound.send(Outbound::Frame(frame));
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode tool responses"),
        }
    }
}

/// Control frames (text, tool responses, close) go out ahead of queued realtime input.
async fn writer_loop(
    mut sink: Box<dyn FrameSink>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mut realtime: mpsc::Receiver<String>,
    shared: Arc<Shared>,
    generation: u64,
) {
    loop {
        let frame = tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(Outbound::Frame(frame)) => frame,
                Some(Outbound::Close) | None => break,
            },
            Some(frame) = realtime.recv() => frame,
        };
        if let Err(e) = sink.send(frame).await {
            shared.fail(generation, e);
            break;
        }
    }
    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "Transport close failed");
    }
}

async fn reader_loop(mut source: Box<dyn FrameSource>, shared: Arc<Shared>, generation: u64) {
    loop {
        match source.next().await {
            Some(Ok(TransportFrame::Text(text))) => shared.dispatch(generation, &text),
            Some(Ok(TransportFrame::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => shared.dispatch(generation, &text),
                Err(e) => tracing::warn!(error = %e, "Dropping non UTF-8 server frame"),
            },
            Some(Ok(TransportFrame::Close(reason))) => {
                shared.remote_closed(generation, reason);
                return;
            }
            Some(Err(e)) => {
                shared.fail(generation, e);
                return;
            }
            None => {
                shared.remote_closed(generation, None);
                return;
            }
        }
    }
}

enum ConnectOutcome {
    Opened,
    Failed(RealtimeError),
    Abandoned(Option<Box<dyn FrameSink>>),
}

/// Client for one live session at a time.
///
/// Event handlers registered with [`on`](Self::on) run on a tokio task owned by the
/// client, in registration order per kind, in the order events were produced.
pub struct LiveSessionClient {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
}

impl LiveSessionClient {
    /// Create a client with default options.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_options(transport, ClientOptions::default())
    }

    /// Create a client with explicit options.
    pub fn with_options(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        Self {
            transport,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    generation: 0,
                    session_id: None,
                    config: None,
                    outbound: None,
                    realtime: None,
                    events: None,
                    pending_tools: Vec::new(),
                    tool_flush: None,
                    reader: None,
                    writer: None,
                }),
                listeners: Arc::new(EventListeners::new()),
                options,
            }),
        }
    }

    /// Store the configuration used by the next `connect`.
    ///
    /// An already open session keeps the configuration it was opened with.
    pub fn set_config(&self, config: SessionConfig) {
        let mut inner = self.shared.inner.lock();
        if inner.state == SessionState::Open {
            tracing::debug!("Config updated; takes effect on next connect");
        }
        inner.config = Some(config);
    }

    /// The stored configuration.
    pub fn config(&self) -> Option<SessionConfig> {
        self.shared.inner.lock().config.clone()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// Whether the session is open.
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// ID of the current or most recent connection attempt.
    pub fn session_id(&self) -> Option<String> {
        self.shared.inner.lock().session_id.clone()
    }

    /// Options this client was built with.
    pub fn options(&self) -> ClientOptions {
        self.shared.options
    }

    /// Subscribe to events of `kind`.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.listeners.on(kind, handler)
    }

    /// Unsubscribe a handler.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.shared.listeners.off(kind, id)
    }

    /// `set_config` followed by `connect`.
    pub async fn connect_with(&self, config: SessionConfig) -> Result<()> {
        self.set_config(config);
        self.connect().await
    }

    /// Open the transport and send the setup frame.
    ///
    /// Rejects with `ConfigError` before any transport activity if no valid
    /// configuration is set, and with `AlreadyConnected` while a connection is
    /// open or opening.
    pub async fn connect(&self) -> Result<()> {
        let (config, generation) = {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                SessionState::Connecting => return Err(RealtimeError::AlreadyConnected("connecting")),
                SessionState::Open => return Err(RealtimeError::AlreadyConnected("open")),
                _ => {}
            }
            let config = inner
                .config
                .clone()
                .ok_or_else(|| RealtimeError::config("no session config set"))?;
            config.validate()?;

            inner.state = SessionState::Connecting;
            inner.generation += 1;
            inner.session_id = Some(uuid::Uuid::new_v4().to_string());
            self.shared.ensure_dispatcher(&mut inner);
            (config, inner.generation)
        };

        let model = config.model_resource();
        tracing::info!(model_id = %model, generation, "Connecting live session");

        let attempt = async {
            let setup = protocol::setup_frame(&config)?;
            let (mut sink, source) = self.transport.open(&model).await?;
            if self.shared.inner.lock().generation != generation {
                // Disconnected while opening; the caller closes the sink.
                return Ok((sink, source));
            }
            tracing::info!(model_id = %model, "Sending setup message");
            tracing::debug!(raw_setup = %setup, "Raw setup message");
            sink.send(setup).await?;
            Ok::<_, RealtimeError>((sink, source))
        };
        let timeout = self.shared.options.connect_timeout;
        let result = match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::Timeout(format!("connect did not complete within {timeout:?}"))),
        };

        let outcome = {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation || inner.state != SessionState::Connecting {
                ConnectOutcome::Abandoned(result.ok().map(|(sink, _)| sink))
            } else {
                match result {
                    Err(e) => {
                        inner.state = SessionState::Error;
                        inner.emit(SessionEvent::Error(e.to_string()));
                        ConnectOutcome::Failed(e)
                    }
                    Ok((sink, source)) => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        let (realtime_tx, realtime_rx) =
                            mpsc::channel(self.shared.options.realtime_queue.max(1));
                        inner.outbound = Some(tx);
                        inner.realtime = Some(realtime_tx);
                        inner.state = SessionState::Open;
                        inner.emit(SessionEvent::Open);
                        inner.writer = Some(tokio::spawn(writer_loop(
                            sink,
                            rx,
                            realtime_rx,
                            Arc::clone(&self.shared),
                            generation,
                        )));
                        inner.reader = Some(tokio::spawn(reader_loop(
                            source,
                            Arc::clone(&self.shared),
                            generation,
                        )));
                        ConnectOutcome::Opened
                    }
                }
            }
        };

        match outcome {
            ConnectOutcome::Opened => {
                tracing::info!(model_id = %model, session_id = ?self.session_id(), "Session open");
                Ok(())
            }
            ConnectOutcome::Failed(e) => {
                tracing::warn!(error = %e, "Connect failed");
                Err(e)
            }
            ConnectOutcome::Abandoned(sink) => {
                if let Some(mut sink) = sink {
                    let _ = sink.close().await;
                }
                tracing::debug!("Connect abandoned by disconnect");
                Err(RealtimeError::SessionClosed)
            }
        }
    }

    /// Close the session. A no-op when nothing is connected; never fails.
    ///
    /// An in-flight `connect` is abandoned and rejects with `SessionClosed`.
    /// Pending tool responses are discarded.
    pub async fn disconnect(&self) {
        let (reader, writer) = {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                SessionState::Idle | SessionState::Closed => return,
                SessionState::Connecting | SessionState::Error => {
                    inner.generation += 1;
                    inner.state = SessionState::Closed;
                    inner.release()
                }
                SessionState::Open => {
                    inner.generation += 1;
                    inner.state = SessionState::Closed;
                    let handles = inner.release();
                    inner.emit(SessionEvent::Close("disconnected by client".to_string()));
                    handles
                }
            }
        };

        if let Some(reader) = reader {
            reader.abort();
        }
        if let Some(mut writer) = writer {
            if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                tracing::warn!("Transport close timed out");
                writer.abort();
            }
        }
        tracing::info!("Session disconnected");
    }

    /// Disconnect, then connect with the stored configuration.
    pub async fn reconnect(&self) -> Result<()> {
        self.disconnect().await;
        self.connect().await
    }

    /// Queue realtime media for sending.
    ///
    /// Returns `false` and drops the input when the session is not open or when
    /// [`ClientOptions::realtime_queue`] frames are already waiting on the socket.
    pub fn send_realtime_input(&self, chunks: Vec<MediaChunk>) -> bool {
        if chunks.is_empty() {
            return false;
        }
        let inner = self.shared.inner.lock();
        let Some(realtime) = inner.realtime.as_ref().filter(|_| inner.state == SessionState::Open)
        else {
            tracing::trace!("Session not open, dropping realtime input");
            return false;
        };
        match protocol::realtime_input_frame(&chunks) {
            Ok(frame) => match realtime.try_send(frame) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!("Realtime queue full, dropping input");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode realtime input");
                false
            }
        }
    }

    /// Send a user text turn.
    pub fn send_text(&self, text: &str, turn_complete: bool) -> Result<()> {
        let inner = self.shared.inner.lock();
        let outbound = inner
            .outbound
            .as_ref()
            .filter(|_| inner.state == SessionState::Open)
            .ok_or(RealtimeError::NotConnected)?;
        let frame = protocol::client_content_frame(text, turn_complete)?;
        outbound.send(Outbound::Frame(frame)).map_err(|_| RealtimeError::SessionClosed)
    }

    /// Submit tool results.
    ///
    /// Responses submitted within `tool_response_delay` of the first pending one
    /// go out together as one frame, in submission order.
    pub fn send_tool_response(&self, responses: Vec<ToolResponse>) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != SessionState::Open {
            return Err(RealtimeError::NotConnected);
        }
        if responses.is_empty() {
            return Ok(());
        }
        inner.pending_tools.extend(responses);
        if inner.tool_flush.is_none() {
            let shared = Arc::clone(&self.shared);
            let delay = self.shared.options.tool_response_delay;
            let generation = inner.generation;
            inner.tool_flush = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                shared.flush_tool_responses(generation);
            }));
        }
        Ok(())
    }
}

impl Drop for LiveSessionClient {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.generation += 1;
        let (reader, writer) = inner.release();
        if let Some(reader) = reader {
            reader.abort();
        }
        // The writer is left to close the transport on its own.
        drop(writer);
        inner.events = None;
    }
}

impl std::fmt::Debug for LiveSessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("LiveSessionClient")
            .field("state", &inner.state)
            .field("session_id", &inner.session_id)
            .finish()
    }
}
