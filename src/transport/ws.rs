//! `tokio-tungstenite` implementation of the socket seam

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::client::redact_token;
use super::socket::{Connector, SocketSink, SocketStream, WireMessage};
use crate::{Result, StreamError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Status code reported when the peer closes without a close frame payload
const NO_STATUS_RECEIVED: u16 = 1005;

/// Opens `ws://` and `wss://` sessions (rustls with webpki roots)
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<(Box<dyn SocketSink>, Box<dyn SocketStream>)> {
        let (stream, response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            StreamError::connection_failed_with_source(
                format!("handshake with {} failed", redact_token(url)),
                Box::new(e),
            )
        })?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (sink, stream) = stream.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsSource { stream })))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait::async_trait]
impl SocketSink for WsSink {
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        let bytes = message.len();
        let message = match message {
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Binary(data) => Message::Binary(data),
            WireMessage::Ping(data) => Message::Ping(data),
            WireMessage::Pong(data) => Message::Pong(data),
            WireMessage::Close { code, reason } => {
                Message::Close(Some(CloseFrame { code: CloseCode::from(code), reason: reason.into() }))
            }
        };
        self.sink.send(message).await.map_err(|e| StreamError::Send { bytes, reason: e.to_string() })
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame { code: CloseCode::from(code), reason: reason.to_owned().into() };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| StreamError::connection_failed_with_source("close failed", Box::new(e)))?;
        self.sink
            .close()
            .await
            .map_err(|e| StreamError::connection_failed_with_source("close failed", Box::new(e)))
    }
}

struct WsSource {
    stream: SplitStream<WsStream>,
}

#[async_trait::async_trait]
impl SocketStream for WsSource {
    async fn next(&mut self) -> Option<Result<WireMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(StreamError::connection_failed_with_source("read failed", Box::new(e)))),
            };

            let message = match message {
                Message::Text(text) => WireMessage::Text(text),
                Message::Binary(data) => WireMessage::Binary(data),
                Message::Ping(data) => WireMessage::Ping(data),
                Message::Pong(data) => WireMessage::Pong(data),
                Message::Close(frame) => match frame {
                    Some(frame) => WireMessage::Close { code: u16::from(frame.code), reason: frame.reason.into_owned() },
                    None => WireMessage::Close { code: NO_STATUS_RECEIVED, reason: String::new() },
                },
                Message::Frame(_) => {
                    trace!("Skipping raw frame");
                    continue;
                }
            };
            return Some(Ok(message));
        }
    }
}
