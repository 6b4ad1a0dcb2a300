//! Live camera and GPS streaming to a remote monitoring server.
//!
//! Geocast turns a high-rate camera feed and a location feed into a bounded-rate
//! stream of JSON envelopes sent over a persistent WebSocket.
//!
//! # Features
//!
//! - **Throttled capture**: at most one frame per interval, newest frame wins
//! - **Resilient transport**: bounded exponential reconnect with keep-alive
//! - **Platform seams**: camera and location services plug in behind traits
//! - **Observable state**: every UI-facing value is a `tokio::sync::watch` snapshot
//!
//! # Pipeline
//!
//! ```text
//! CameraPlatform -> FrameProducer -> MessageComposer -> TransportClient -> server
//!                                          ^
//! LocationPlatform -> LocationSampler -----+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use geocast::{StreamConfig, StreamSession, MemoryCredentialStore, FileServerConfig};
//! use geocast::platform::{CameraPlatform, LocationPlatform};
//! use std::sync::Arc;
//!
//! async fn run(
//!     camera: Arc<dyn CameraPlatform>,
//!     location: Arc<dyn LocationPlatform>,
//! ) -> geocast::Result<()> {
//!     let session = StreamSession::builder()
//!         .config(StreamConfig::load("geocast.yaml")?)
//!         .credentials(Arc::new(MemoryCredentialStore::new("token")))
//!         .server_config(Arc::new(FileServerConfig::open("server.yaml")?))
//!         .camera(camera)
//!         .location(location)
//!         .build()?;
//!
//!     let mut observables = session.observe();
//!     session.start_recording().await?;
//!     observables.connection.changed().await.ok();
//!     println!("connection: {}", *observables.connection.borrow());
//!     session.stop_recording().await;
//!     Ok(())
//! }
//! ```

mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Pipeline stages
pub mod capture;
pub mod composer;
pub mod location;
pub mod transport;

// Ambient services and seams
pub mod config;
pub mod log_sink;
pub mod platform;
pub mod session;
pub mod store;

// Core exports
pub use error::*;
pub use types::*;

pub use capture::{FrameConsumer, FrameProducer};
pub use composer::{ComposeOutcome, MessageComposer};
pub use config::StreamConfig;
pub use location::LocationSampler;
pub use log_sink::{LogEntry, LogSink, init_tracing};
pub use session::{Observables, StreamSession};
pub use store::{CredentialStore, FileServerConfig, MemoryCredentialStore, MemoryServerConfig, ServerConfigStore};
pub use transport::{TransportClient, WsConnector};
