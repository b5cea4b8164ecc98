//! The persistent full-duplex connection under a session.

use crate::error::Result;
use async_trait::async_trait;

/// One frame read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// A UTF-8 text frame.
    Text(String),
    /// A binary frame (the live endpoint sends JSON in these too).
    Binary(Vec<u8>),
    /// The peer closed the connection, with its reason if any.
    Close(Option<String>),
}

/// Write half of an open transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Close the connection. Errors on an already-closed connection are ignored.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of an open transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the connection is gone.
    async fn next(&mut self) -> Option<Result<TransportFrame>>;
}

/// Opens connections for a model. One call per connection attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection for `model` and split it into halves.
    async fn open(&self, model: &str) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)>;
}
