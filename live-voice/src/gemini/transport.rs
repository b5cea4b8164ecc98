use crate::error::{RealtimeError, Result};
use crate::gemini::GEMINI_LIVE_URL;
use crate::transport::{FrameSink, FrameSource, Transport, TransportFrame};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

/// WebSocket connection to the Gemini Live API, authenticated with an API key.
#[derive(Clone)]
pub struct WebSocketTransport {
    api_key: String,
    endpoint: String,
}

impl WebSocketTransport {
    /// Connect to the public endpoint with `api_key`.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), endpoint: GEMINI_LIVE_URL.to_string() }
    }

    /// Override the endpoint (e.g. a proxy or a local test server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Endpoint URL with the key attached.
    fn url(&self) -> Result<Url> {
        if self.api_key.is_empty() {
            return Err(RealtimeError::config("API key must not be empty"));
        }
        Url::parse_with_params(&self.endpoint, &[("key", self.api_key.as_str())])
            .map_err(|e| RealtimeError::config(format!("Invalid endpoint '{}': {e}", self.endpoint)))
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, model: &str) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        let url = self.url()?;
        tracing::info!(model_id = %model, endpoint = %self.endpoint, "Connecting to Gemini Live");

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| RealtimeError::connection(format!("WebSocket connect error: {e}")))?;
        let (sink, source) = stream.split();
        Ok((Box::new(WsFrameSink { sink }), Box::new(WsFrameSource { source })))
    }
}

struct WsFrameSink {
    sink: WsSink,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.sink
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| RealtimeError::connection(format!("Send error: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        match self.sink.send(Message::Close(None)).await {
            Ok(()) => Ok(()),
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(RealtimeError::connection(format!("Close error: {e}"))),
        }
    }
}

struct WsFrameSource {
    source: WsSource,
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn next(&mut self) -> Option<Result<TransportFrame>> {
        loop {
            return match self.source.next().await? {
                Ok(Message::Text(text)) => Some(Ok(TransportFrame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(bytes)) => Some(Ok(TransportFrame::Binary(bytes.to_vec()))),
                Ok(Message::Close(frame)) => Some(Ok(TransportFrame::Close(
                    frame.map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str())),
                ))),
                // Pings are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => Some(Err(RealtimeError::connection(format!("Receive error: {e}")))),
            };
        }
    }
}
