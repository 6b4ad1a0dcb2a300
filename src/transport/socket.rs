//! Socket seam between the transport client and a WebSocket implementation

use crate::Result;

/// One WebSocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close { code: u16, reason: String },
}

impl WireMessage {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(data) | WireMessage::Ping(data) | WireMessage::Pong(data) => data.len(),
            WireMessage::Close { reason, .. } => reason.len() + 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write half of an open session
#[async_trait::async_trait]
pub trait SocketSink: Send + 'static {
    async fn send(&mut self, message: WireMessage) -> Result<()>;

    /// Send a close frame and flush
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// Read half of an open session
#[async_trait::async_trait]
pub trait SocketStream: Send + 'static {
    /// Next inbound message; `None` once the connection is gone
    async fn next(&mut self) -> Option<Result<WireMessage>>;
}

/// Opens sessions to a URL
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<(Box<dyn SocketSink>, Box<dyn SocketStream>)>;
}
