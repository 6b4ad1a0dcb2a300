//! Persistent WebSocket transport
//!
//! [`TransportClient`] owns the connection state machine, the bounded reconnect
//! policy and the keep-alive. The socket itself sits behind [`Connector`] so the
//! state machine runs against [`WsConnector`] in production and scripted doubles
//! in tests.

pub mod backoff;
pub mod client;
pub mod socket;
pub mod timer;
pub mod ws;


pub use backoff::BackoffPolicy;
pub use client::{TransportClient, connection_url, redact_token};
pub use socket::{Connector, SocketSink, SocketStream, WireMessage};
pub use timer::DeferredTask;
pub use ws::WsConnector;
