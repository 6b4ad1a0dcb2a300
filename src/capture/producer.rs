//! Frame producer: throttled, keep-only-latest camera pipeline

use image::RgbImage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::codec::FrameCodec;
use super::throttle::FrameGate;
use crate::log_sink::LogSink;
use crate::platform::{self, CameraPlatform, FrameObserver, Registration};
use crate::types::{FrameRate, RawFrame, SensorFrame};
use crate::{Result, StreamError};

/// Downstream receiver of accepted, encoded frames
#[async_trait::async_trait]
pub trait FrameConsumer: Send + Sync + 'static {
    async fn on_frame(&self, frame: Arc<SensorFrame>);
}

/// Counters describing what happened to delivered raw frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    /// Raw frames delivered by the platform while streaming
    pub received: u64,
    /// Frames that passed the throttle
    pub accepted: u64,
    /// Frames discarded by the throttle
    pub throttled: u64,
    /// Accepted frames abandoned because a newer one arrived mid-processing
    pub superseded: u64,
    /// Accepted frames that failed to decode or encode
    pub failed: u64,
    /// Frames handed to the consumer
    pub emitted: u64,
}

/// Converts a high-rate raw frame feed into a bounded-rate, transport-ready feed.
///
/// The platform callback only runs the throttle and overwrites a single pending
/// slot, so it never blocks. One worker task drains the slot, which bounds memory
/// to one pending plus one in-flight frame and always favors the newest frame.
pub struct FrameProducer {
    shared: Arc<ProducerShared>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    cancel: CancellationToken,
    registration: Registration,
    handle: JoinHandle<()>,
}

struct ProducerShared {
    rate: FrameRate,
    codec: FrameCodec,
    streaming: AtomicBool,
    gate: Mutex<FrameGate>,
    pending_tx: watch::Sender<Option<Arc<RawFrame>>>,
    frame_tx: watch::Sender<Option<Arc<SensorFrame>>>,
    preview_tx: watch::Sender<Option<Arc<RgbImage>>>,
    fps_tx: watch::Sender<u32>,
    counters: Counters,
    log: LogSink,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    accepted: AtomicU64,
    throttled: AtomicU64,
    superseded: AtomicU64,
    failed: AtomicU64,
    emitted: AtomicU64,
}

impl FrameObserver for ProducerShared {
    fn on_raw_frame(&self, frame: RawFrame) {
        if !self.streaming.load(Ordering::Acquire) {
            return;
        }
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let admitted = self
            .gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .admit(frame.captured_at);
        if !admitted {
            self.counters.throttled.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        trace!(width = frame.width, height = frame.height, format = frame.pixels.name(), "Frame accepted");
        if self.pending_tx.send_replace(Some(Arc::new(frame))).is_some() {
            // The worker never picked up the previous frame
            self.counters.superseded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl FrameProducer {
    pub fn new(rate: FrameRate, codec: FrameCodec, log: LogSink) -> Self {
        let (pending_tx, _) = watch::channel(None);
        let (frame_tx, _) = watch::channel(None);
        let (preview_tx, _) = watch::channel(None);
        let (fps_tx, _) = watch::channel(0);

        Self {
            shared: Arc::new(ProducerShared {
                rate,
                codec,
                streaming: AtomicBool::new(false),
                gate: Mutex::new(FrameGate::new(rate)),
                pending_tx,
                frame_tx,
                preview_tx,
                fps_tx,
                counters: Counters::default(),
                log,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Bind to the camera and start the processing worker. No-op if running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, camera: Arc<dyn CameraPlatform>, consumer: Arc<dyn FrameConsumer>) -> Result<()> {
        let mut worker = self.lock_worker();
        if worker.is_some() {
            debug!("Frame producer already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let pending_rx = self.shared.pending_tx.subscribe();
        let handle = tokio::spawn(Self::worker_task(
            Arc::clone(&self.shared),
            pending_rx,
            consumer,
            cancel.clone(),
        ));

        self.shared.streaming.store(true, Ordering::Release);

        let observer: Arc<dyn FrameObserver> = self.shared.clone();
        let registration = match platform::bind_camera(camera, observer) {
            Ok(registration) => registration,
            Err(e) => {
                self.shared.streaming.store(false, Ordering::Release);
                cancel.cancel();
                handle.abort();
                self.shared.log.append_at(tracing::Level::WARN, format!("Camera bind failed: {}", e));
                return Err(e);
            }
        };

        *worker = Some(Worker { cancel, registration, handle });
        info!(interval = ?self.shared.rate.interval(), "Frame producer started");
        self.shared.log.append("Camera streaming started");
        Ok(())
    }

    /// Unbind from the camera and stop the worker. No-op if stopped.
    ///
    /// No raw frame is accepted and no frame reaches the consumer after return.
    pub fn stop(&self) {
        let Some(worker) = self.lock_worker().take() else {
            return;
        };

        self.shared.streaming.store(false, Ordering::Release);
        worker.registration.release();
        worker.cancel.cancel();
        worker.handle.abort();
        self.shared.pending_tx.send_replace(None);
        self.shared.fps_tx.send_replace(0);

        info!("Frame producer stopped");
        self.shared.log.append("Camera streaming stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker().is_some()
    }

    /// Latest encoded frame
    pub fn latest_frame(&self) -> Option<Arc<SensorFrame>> {
        self.shared.frame_tx.borrow().clone()
    }

    pub fn frames(&self) -> watch::Receiver<Option<Arc<SensorFrame>>> {
        self.shared.frame_tx.subscribe()
    }

    /// Full-quality, reoriented preview of the latest processed frame
    pub fn preview(&self) -> watch::Receiver<Option<Arc<RgbImage>>> {
        self.shared.preview_tx.subscribe()
    }

    /// Static fps estimate derived from the throttle interval
    pub fn fps(&self) -> watch::Receiver<u32> {
        self.shared.fps_tx.subscribe()
    }

    /// Observer to hand to a platform adapter that is bound elsewhere
    pub fn observer(&self) -> Arc<dyn FrameObserver> {
        self.shared.clone()
    }

    pub fn stats(&self) -> ProducerStats {
        let c = &self.shared.counters;
        ProducerStats {
            received: c.received.load(Ordering::Relaxed),
            accepted: c.accepted.load(Ordering::Relaxed),
            throttled: c.throttled.load(Ordering::Relaxed),
            superseded: c.superseded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            emitted: c.emitted.load(Ordering::Relaxed),
        }
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Worker task - drains the pending slot one frame at a time
    async fn worker_task(
        shared: Arc<ProducerShared>,
        mut pending_rx: watch::Receiver<Option<Arc<RawFrame>>>,
        consumer: Arc<dyn FrameConsumer>,
        cancel: CancellationToken,
    ) {
        debug!("Frame worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = pending_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let Some(raw) = pending_rx.borrow_and_update().clone() else {
                continue;
            };
            // Empty the slot so a late overwrite can be told apart from this frame
            shared.pending_tx.send_if_modified(|pending| {
                if pending.as_ref().is_some_and(|current| Arc::ptr_eq(current, &raw)) {
                    *pending = None;
                }
                false
            });

            match shared.process(raw, &pending_rx, &cancel).await {
                Outcome::Emitted(frame) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    shared.counters.emitted.fetch_add(1, Ordering::Relaxed);
                    consumer.on_frame(frame).await;
                }
                Outcome::Superseded | Outcome::Dropped => {}
                Outcome::Cancelled => break,
            }
        }

        debug!("Frame worker ended");
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Outcome {
    Emitted(Arc<SensorFrame>),
    Superseded,
    Dropped,
    Cancelled,
}

impl ProducerShared {
    /// Decode, orient, publish preview, encode and publish one frame.
    ///
    /// After decode and again after encode the frame is abandoned if a newer one
    /// is waiting, so no encoded frame older than the newest accepted one is
    /// published or handed on.
    async fn process(
        &self,
        raw: Arc<RawFrame>,
        pending_rx: &watch::Receiver<Option<Arc<RawFrame>>>,
        cancel: &CancellationToken,
    ) -> Outcome {
        let codec = self.codec;
        let source = Arc::clone(&raw);
        let decoded = tokio::select! {
            _ = cancel.cancelled() => return Outcome::Cancelled,
            joined = tokio::task::spawn_blocking(move || codec.decode_oriented(&source)) => joined,
        };
        let image = match flatten(decoded, StreamError::decode_failed) {
            Ok(image) => image,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(format = raw.pixels.name(), error = %e, "Dropping undecodable frame");
                self.log.append_at(tracing::Level::WARN, format!("Frame dropped: {}", e));
                return Outcome::Dropped;
            }
        };
        if self.supersede_if_newer(pending_rx, &raw, "decode") {
            return Outcome::Superseded;
        }

        let preview = Arc::new(image);
        self.preview_tx.send_replace(Some(Arc::clone(&preview)));
        self.fps_tx.send_replace(self.rate.fps_estimate());

        let encode_source = Arc::clone(&preview);
        let encoded = tokio::select! {
            _ = cancel.cancelled() => return Outcome::Cancelled,
            joined = tokio::task::spawn_blocking(move || codec.encode_transport(&encode_source)) => joined,
        };
        let jpeg = match flatten(encoded, StreamError::encode_failed) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Dropping frame that failed to encode");
                self.log.append_at(tracing::Level::WARN, format!("Frame dropped: {}", e));
                return Outcome::Dropped;
            }
        };
        if self.supersede_if_newer(pending_rx, &raw, "encode") {
            return Outcome::Superseded;
        }

        let (width, height) = preview.dimensions();
        let frame = Arc::new(SensorFrame::new(jpeg, width, height, raw.captured_at, raw.captured_wall));
        trace!(bytes = frame.image.len(), width, height, "Frame encoded");
        self.frame_tx.send_replace(Some(Arc::clone(&frame)));
        Outcome::Emitted(frame)
    }

    /// Count `raw` as superseded if a different frame landed in the slot
    fn supersede_if_newer(
        &self,
        pending_rx: &watch::Receiver<Option<Arc<RawFrame>>>,
        raw: &Arc<RawFrame>,
        stage: &'static str,
    ) -> bool {
        let newer_waiting = pending_rx.has_changed().unwrap_or(false)
            && pending_rx.borrow().as_ref().is_some_and(|next| !Arc::ptr_eq(next, raw));
        if newer_waiting {
            self.counters.superseded.fetch_add(1, Ordering::Relaxed);
            trace!(stage, "Newer frame arrived mid-processing, abandoning current frame");
        }
        newer_waiting
    }
}

fn flatten<T>(
    joined: std::result::Result<Result<T>, tokio::task::JoinError>,
    on_panic: fn(String) -> StreamError,
) -> Result<T> {
    joined.map_err(|e| on_panic(format!("codec task failed: {}", e)))?
}
