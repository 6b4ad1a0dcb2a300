//! Streaming session: wires sensors, composer and transport together

use image::RgbImage;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

use crate::capture::{FrameCodec, FrameProducer, ProducerStats, Rotation};
use crate::composer::{ComposerStats, MessageComposer};
use crate::config::StreamConfig;
use crate::location::LocationSampler;
use crate::log_sink::{LogSink, LogSnapshot};
use crate::platform::{CameraPlatform, LocationPlatform};
use crate::store::{CredentialStore, MemoryServerConfig, ServerConfigStore};
use crate::transport::{Connector, TransportClient, WsConnector};
use crate::types::{ConnectionState, LocationFix};
use crate::{Result, StreamError};

/// Watch receivers for everything a UI renders
#[derive(Clone)]
pub struct Observables {
    pub preview: watch::Receiver<Option<Arc<RgbImage>>>,
    pub fps: watch::Receiver<u32>,
    pub location: watch::Receiver<Option<LocationFix>>,
    pub location_authorized: watch::Receiver<bool>,
    pub connection: watch::Receiver<ConnectionState>,
    pub recording: watch::Receiver<bool>,
    pub logs: watch::Receiver<LogSnapshot>,
}

impl Observables {
    pub fn is_connected(&self) -> bool {
        self.connection.borrow().is_connected()
    }

    /// Connection state as a stream, starting with the current value
    pub fn connection_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.connection.clone())
    }

    /// Log snapshots as a stream, starting with the current value
    pub fn log_stream(&self) -> WatchStream<LogSnapshot> {
        WatchStream::new(self.logs.clone())
    }
}

/// Builder for [`StreamSession`]
#[derive(Default)]
pub struct StreamSessionBuilder {
    config: StreamConfig,
    credentials: Option<Arc<dyn CredentialStore>>,
    server: Option<Arc<dyn ServerConfigStore>>,
    connector: Option<Arc<dyn Connector>>,
    camera: Option<Arc<dyn CameraPlatform>>,
    location: Option<Arc<dyn LocationPlatform>>,
    log: Option<LogSink>,
}

impl StreamSessionBuilder {
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Defaults to the built-in placeholder server address
    pub fn server_config(mut self, server: Arc<dyn ServerConfigStore>) -> Self {
        self.server = Some(server);
        self
    }

    /// Defaults to [`WsConnector`]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn camera(mut self, camera: Arc<dyn CameraPlatform>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn location(mut self, location: Arc<dyn LocationPlatform>) -> Self {
        self.location = Some(location);
        self
    }

    /// Share an existing log; defaults to a new one sized by the config
    pub fn log_sink(mut self, log: LogSink) -> Self {
        self.log = Some(log);
        self
    }

    pub fn build(self) -> Result<StreamSession> {
        let config = self.config;
        config.validate()?;

        let credentials =
            self.credentials.ok_or_else(|| StreamError::config_error("session", "a credential store is required"))?;
        let camera = self.camera.ok_or_else(|| StreamError::config_error("session", "a camera platform is required"))?;
        let location_platform =
            self.location.ok_or_else(|| StreamError::config_error("session", "a location platform is required"))?;
        let server = self.server.unwrap_or_else(|| Arc::new(MemoryServerConfig::default()) as Arc<dyn ServerConfigStore>);
        let connector = self.connector.unwrap_or_else(|| Arc::new(WsConnector) as Arc<dyn Connector>);
        let log = self.log.unwrap_or_else(|| LogSink::new(config.log.capacity));

        let location = LocationSampler::new(location_platform, config.location.request(), log.clone());
        let transport = TransportClient::new(&config.transport, credentials, server, connector, log.clone());
        let codec = FrameCodec::new(
            Rotation::from_degrees(config.capture.rotation_degrees)?,
            config.capture.transport_quality,
        );
        let producer = FrameProducer::new(config.capture.frame_rate(), codec, log.clone());
        let composer = Arc::new(MessageComposer::new(
            transport.clone(),
            location.subscribe(),
            config.composer.clone(),
            log.clone(),
        ));
        let (recording_tx, _) = watch::channel(false);

        Ok(StreamSession { config, log, camera, location, producer, transport, composer, recording_tx })
    }
}

/// One camera + location + socket streaming session.
///
/// Dropping the session stops every background task.
pub struct StreamSession {
    config: StreamConfig,
    log: LogSink,
    camera: Arc<dyn CameraPlatform>,
    location: LocationSampler,
    producer: FrameProducer,
    transport: TransportClient,
    composer: Arc<MessageComposer>,
    recording_tx: watch::Sender<bool>,
}

impl StreamSession {
    pub fn builder() -> StreamSessionBuilder {
        StreamSessionBuilder::default()
    }

    /// Start location sampling on its own, e.g. once permission is granted.
    /// Sampling keeps running across recording toggles.
    pub fn start_location(&self) -> Result<()> {
        self.location.start()
    }

    /// Start location sampling, open the socket and start camera streaming.
    /// No-op while already recording.
    pub async fn start_recording(&self) -> Result<()> {
        if *self.recording_tx.borrow() {
            return Ok(());
        }

        if let Err(e) = self.location.start() {
            // Frames still stream, with zeroed location
            warn!(error = %e, "Recording without location updates");
        }

        self.transport.connect().await;

        let consumer: Arc<MessageComposer> = Arc::clone(&self.composer);
        if let Err(e) = self.producer.start(Arc::clone(&self.camera), consumer) {
            self.transport.disconnect().await;
            return Err(e);
        }

        self.recording_tx.send_replace(true);
        info!("Recording started");
        self.log.append("Recording started");
        Ok(())
    }

    /// Stop camera streaming and close the socket. Location sampling continues.
    pub async fn stop_recording(&self) {
        if !*self.recording_tx.borrow() {
            return;
        }

        self.producer.stop();
        self.transport.disconnect().await;
        self.recording_tx.send_replace(false);
        info!("Recording stopped");
        self.log.append("Recording stopped");
    }

    /// Flip recording; returns the new recording flag
    pub async fn toggle_recording(&self) -> Result<bool> {
        if self.is_recording() {
            self.stop_recording().await;
        } else {
            self.start_recording().await?;
        }
        Ok(self.is_recording())
    }

    pub fn is_recording(&self) -> bool {
        *self.recording_tx.borrow()
    }

    pub fn observe(&self) -> Observables {
        Observables {
            preview: self.producer.preview(),
            fps: self.producer.fps(),
            location: self.location.subscribe(),
            location_authorized: self.location.authorized(),
            connection: self.transport.state_changes(),
            recording: self.recording_tx.subscribe(),
            logs: self.log.subscribe(),
        }
    }

    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn producer_stats(&self) -> ProducerStats {
        self.producer.stats()
    }

    pub fn composer_stats(&self) -> ComposerStats {
        self.composer.stats()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.producer.stop();
        self.transport.shutdown();
        self.location.stop();
    }
}
