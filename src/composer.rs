//! Message composer: fuses each accepted frame with the latest fix and sends it

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::capture::FrameConsumer;
use crate::config::ComposerConfig;
use crate::StreamError;
use crate::log_sink::LogSink;
use crate::transport::TransportClient;
use crate::types::{LocationFix, SensorFrame, StreamEnvelope};

/// What happened to one composition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeOutcome {
    Sent,
    SkippedDisconnected,
    SkippedNoFrame,
    SkippedNoFix,
    Failed,
}

/// Running totals per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposerStats {
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Builds one [`StreamEnvelope`] per accepted frame and hands it to the transport.
///
/// Fire-and-forget: nothing is buffered or retried. A frame that cannot be sent
/// right now is skipped and the next accepted frame is tried on its own merits.
pub struct MessageComposer {
    transport: TransportClient,
    location: watch::Receiver<Option<LocationFix>>,
    config: ComposerConfig,
    log: LogSink,
    sent: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl MessageComposer {
    pub fn new(
        transport: TransportClient,
        location: watch::Receiver<Option<LocationFix>>,
        config: ComposerConfig,
        log: LogSink,
    ) -> Self {
        Self {
            transport,
            location,
            config,
            log,
            sent: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Compose and send `frame`. Preconditions are checked in order: the
    /// transport is connected, a frame is available, then the location policy.
    pub async fn compose_and_send(&self, frame: Option<&SensorFrame>) -> ComposeOutcome {
        let outcome = self.attempt(frame).await;
        let counter = match outcome {
            ComposeOutcome::Sent => &self.sent,
            ComposeOutcome::Failed => &self.failed,
            _ => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    pub fn stats(&self) -> ComposerStats {
        ComposerStats {
            sent: self.sent.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    async fn attempt(&self, frame: Option<&SensorFrame>) -> ComposeOutcome {
        if !self.transport.is_connected() {
            trace!("Transport not connected, skipping frame");
            self.log.append_at(tracing::Level::DEBUG, "Skip frame (not connected)");
            return ComposeOutcome::SkippedDisconnected;
        }

        let Some(frame) = frame else {
            self.log.append_at(tracing::Level::DEBUG, "Skip send (no frame)");
            return ComposeOutcome::SkippedNoFrame;
        };

        let latest = *self.location.borrow();
        let fix = match latest {
            Some(fix) => fix,
            None if self.config.require_location_fix => {
                self.log.append_at(tracing::Level::DEBUG, "Skip frame (no location fix)");
                return ComposeOutcome::SkippedNoFix;
            }
            None => LocationFix::unknown(),
        };

        let envelope = StreamEnvelope::compose(frame, &fix);
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Envelope serialization failed");
                self.log.append_at(tracing::Level::WARN, format!("Compose failed: {}", e));
                return ComposeOutcome::Failed;
            }
        };

        trace!(bytes = text.len(), lat = fix.latitude, lon = fix.longitude, "Sending envelope");
        match self.transport.send_text(text).await {
            Ok(()) => ComposeOutcome::Sent,
            Err(StreamError::NotConnected { .. }) => ComposeOutcome::SkippedDisconnected,
            Err(_) => ComposeOutcome::Failed,
        }
    }
}

#[async_trait::async_trait]
impl FrameConsumer for MessageComposer {
    async fn on_frame(&self, frame: Arc<SensorFrame>) {
        self.compose_and_send(Some(&frame)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::store::{MemoryCredentialStore, MemoryServerConfig};
    use crate::test_utils::MockConnector;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        composer: MessageComposer,
        transport: TransportClient,
        connector: Arc<MockConnector>,
        fix_tx: watch::Sender<Option<LocationFix>>,
    }

    fn fixture(require_location_fix: bool) -> Fixture {
        let connector = Arc::new(MockConnector::default());
        let log = LogSink::default();
        let transport = TransportClient::new(
            &TransportConfig::default(),
            Arc::new(MemoryCredentialStore::new("token")),
            Arc::new(MemoryServerConfig::default()),
            connector.clone(),
            log.clone(),
        );
        let (fix_tx, fix_rx) = watch::channel(None);
        let composer =
            MessageComposer::new(transport.clone(), fix_rx, ComposerConfig { require_location_fix }, log);
        Fixture { composer, transport, connector, fix_tx }
    }

    fn frame() -> SensorFrame {
        let wall = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        SensorFrame::new(vec![0xFF, 0xD8, 0xFF], 4, 8, tokio::time::Instant::now(), wall)
    }

    fn sent_envelopes(connector: &MockConnector) -> Vec<StreamEnvelope> {
        connector
            .peer(0)
            .map(|peer| peer.sent_texts())
            .unwrap_or_default()
            .iter()
            .map(|text| StreamEnvelope::from_json(text).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_transport_skips_before_anything_else() {
        let f = fixture(true);

        assert_eq!(f.composer.compose_and_send(None).await, ComposeOutcome::SkippedDisconnected);
        assert_eq!(f.composer.compose_and_send(Some(&frame())).await, ComposeOutcome::SkippedDisconnected);
        assert_eq!(f.connector.open_count(), 0);
        assert_eq!(f.composer.stats(), ComposerStats { sent: 0, skipped: 2, failed: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn missing_frame_is_skipped() {
        let f = fixture(false);
        f.transport.connect().await;

        assert_eq!(f.composer.compose_and_send(None).await, ComposeOutcome::SkippedNoFrame);
        assert!(sent_envelopes(&f.connector).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_fix_sends_zeros_by_default() {
        let f = fixture(false);
        f.transport.connect().await;

        assert_eq!(f.composer.compose_and_send(Some(&frame())).await, ComposeOutcome::Sent);

        let envelopes = sent_envelopes(&f.connector);
        assert_eq!(envelopes.len(), 1);
        assert_eq!((envelopes[0].lat, envelopes[0].lon, envelopes[0].accuracy), (0.0, 0.0, 0.0));
        assert_eq!(envelopes[0].decode_image().unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_fix_can_be_required() {
        let f = fixture(true);
        f.transport.connect().await;

        assert_eq!(f.composer.compose_and_send(Some(&frame())).await, ComposeOutcome::SkippedNoFix);
        assert!(sent_envelopes(&f.connector).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn latest_fix_and_frame_time_are_sent() {
        let f = fixture(true);
        f.transport.connect().await;
        f.fix_tx.send_replace(Some(LocationFix::from(crate::types::PlatformFix::new(37.1234, -122.1234, Some(5.2)))));

        f.composer.on_frame(Arc::new(frame())).await;

        let sent = f.connector.peer(0).unwrap().sent_texts();
        assert!(sent[0].starts_with(r#"{"timestamp":"2024-01-01T12:00:00.000Z","lat":37.1234,"lon":-122.1234,"#));

        let envelope = &sent_envelopes(&f.connector)[0];
        assert!((envelope.accuracy - 5.2).abs() < 1e-6);
        assert_eq!(f.composer.stats().sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_is_counted_not_retried() {
        let f = fixture(false);
        f.transport.connect().await;
        f.connector.peer(0).unwrap().fail_sends();

        assert_eq!(f.composer.compose_and_send(Some(&frame())).await, ComposeOutcome::Failed);
        assert_eq!(f.composer.compose_and_send(Some(&frame())).await, ComposeOutcome::SkippedDisconnected);
        assert_eq!(f.composer.stats(), ComposerStats { sent: 0, skipped: 1, failed: 1 });
    }
}
