//! Test doubles for the platform and socket seams, plus frame fixtures
//!
//! Shared by unit tests and the frame pipeline benchmark.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::capture::FrameConsumer;
use crate::platform::{
    CameraPlatform, FrameObserver, LocationObserver, LocationPlatform, LocationRequest,
};
use crate::transport::{Connector, SocketSink, SocketStream, WireMessage};
use crate::types::{PixelFormat, Plane, PlatformFix, RawFrame, SensorFrame};
use crate::{Result, StreamError};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Frame fixtures
// ---------------------------------------------------------------------------

/// YUV 4:2:0 frame with a luma gradient, neutral chroma, padded luma rows and
/// interleaved (pixel stride 2) chroma planes
pub fn gradient_yuv_frame(width: u32, height: u32) -> RawFrame {
    gradient_yuv_frame_at(width, height, Instant::now())
}

/// [`gradient_yuv_frame`] with an explicit monotonic capture time
pub fn gradient_yuv_frame_at(width: u32, height: u32, captured_at: Instant) -> RawFrame {
    let (w, h) = (width as usize, height as usize);
    let y_stride = w + 4;
    let mut y = vec![0u8; y_stride * h];
    for row in 0..h {
        for col in 0..w {
            y[row * y_stride + col] = ((row * w + col) * 255 / (w * h).max(1)) as u8;
        }
    }

    let chroma_stride = w.div_ceil(2) * 2;
    let chroma = vec![128u8; chroma_stride * h.div_ceil(2)];
    let pixels = PixelFormat::Yuv420 {
        y: Plane::new(y, y_stride, 1),
        u: Plane::new(chroma.clone(), chroma_stride, 2),
        v: Plane::new(chroma, chroma_stride, 2),
    };
    RawFrame::captured(width, height, pixels, captured_at, chrono::Utc::now())
}

/// Uniform NV21 frame
pub fn nv21_frame(width: u32, height: u32, y: u8, u: u8, v: u8) -> RawFrame {
    let (w, h) = (width as usize, height as usize);
    let mut data = vec![y; w * h];
    for _ in 0..w.div_ceil(2) * h.div_ceil(2) {
        data.extend_from_slice(&[v, u]);
    }
    RawFrame::new(width, height, PixelFormat::Nv21(Arc::from(data)))
}

/// Frame the platform already compressed to JPEG
pub fn jpeg_frame(width: u32, height: u32) -> RawFrame {
    let image = image::RgbImage::from_fn(width, height, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 96]));
    let jpeg = crate::capture::codec::encode_jpeg(&image, 90).expect("fixture encodes");
    RawFrame::new(width, height, PixelFormat::Jpeg(Arc::from(jpeg)))
}

// ---------------------------------------------------------------------------
// Platform doubles
// ---------------------------------------------------------------------------

/// Camera that delivers frames on demand
#[derive(Default)]
pub struct MockCamera {
    state: Mutex<MockCameraState>,
}

#[derive(Default)]
struct MockCameraState {
    observer: Option<Arc<dyn FrameObserver>>,
    last_observer: Option<Arc<dyn FrameObserver>>,
    binds: usize,
    unbinds: usize,
    fail_next: bool,
}

impl MockCamera {
    /// Deliver `frame` to the bound observer, if any
    pub fn deliver(&self, frame: RawFrame) {
        let observer = lock(&self.state).observer.clone();
        if let Some(observer) = observer {
            observer.on_raw_frame(frame);
        }
    }

    /// Deliver `frame` to the most recent observer even after unbind
    pub fn deliver_unconditionally(&self, frame: RawFrame) {
        let observer = lock(&self.state).last_observer.clone();
        if let Some(observer) = observer {
            observer.on_raw_frame(frame);
        }
    }

    pub fn fail_next_bind(&self) {
        lock(&self.state).fail_next = true;
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.state).observer.is_some()
    }

    pub fn bind_count(&self) -> usize {
        lock(&self.state).binds
    }

    pub fn unbind_count(&self) -> usize {
        lock(&self.state).unbinds
    }
}

impl CameraPlatform for MockCamera {
    fn bind(&self, observer: Arc<dyn FrameObserver>) -> Result<()> {
        let mut state = lock(&self.state);
        if std::mem::take(&mut state.fail_next) {
            return Err(StreamError::platform_error("camera bind", "camera unavailable"));
        }
        state.observer = Some(Arc::clone(&observer));
        state.last_observer = Some(observer);
        state.binds += 1;
        Ok(())
    }

    fn unbind(&self) {
        let mut state = lock(&self.state);
        state.observer = None;
        state.unbinds += 1;
    }
}

/// Location service that delivers fixes on demand
#[derive(Default)]
pub struct MockLocation {
    state: Mutex<MockLocationState>,
}

#[derive(Default)]
struct MockLocationState {
    observer: Option<Arc<dyn LocationObserver>>,
    last_observer: Option<Arc<dyn LocationObserver>>,
    last_request: Option<LocationRequest>,
    requests: usize,
    removals: usize,
    fail_next: bool,
}

impl MockLocation {
    /// Deliver `fix` to the registered observer, if any
    pub fn deliver(&self, fix: PlatformFix) {
        let observer = lock(&self.state).observer.clone();
        if let Some(observer) = observer {
            observer.on_location_fix(fix);
        }
    }

    /// Deliver `fix` to the most recent observer even after removal
    pub fn deliver_unconditionally(&self, fix: PlatformFix) {
        let observer = lock(&self.state).last_observer.clone();
        if let Some(observer) = observer {
            observer.on_location_fix(fix);
        }
    }

    pub fn fail_next_request(&self) {
        lock(&self.state).fail_next = true;
    }

    pub fn request_count(&self) -> usize {
        lock(&self.state).requests
    }

    pub fn remove_count(&self) -> usize {
        lock(&self.state).removals
    }

    pub fn last_request(&self) -> Option<LocationRequest> {
        lock(&self.state).last_request
    }
}

impl LocationPlatform for MockLocation {
    fn request_updates(&self, request: LocationRequest, observer: Arc<dyn LocationObserver>) -> Result<()> {
        let mut state = lock(&self.state);
        if std::mem::take(&mut state.fail_next) {
            return Err(StreamError::platform_error("location request", "permission denied"));
        }
        state.observer = Some(Arc::clone(&observer));
        state.last_observer = Some(observer);
        state.last_request = Some(request);
        state.requests += 1;
        Ok(())
    }

    fn remove_updates(&self) {
        let mut state = lock(&self.state);
        state.observer = None;
        state.removals += 1;
    }
}

/// Consumer that records every frame handed to it
#[derive(Default)]
pub struct RecordingConsumer {
    frames: Mutex<Vec<Arc<SensorFrame>>>,
}

impl RecordingConsumer {
    pub fn frames(&self) -> Vec<Arc<SensorFrame>> {
        lock(&self.frames).clone()
    }
}

#[async_trait::async_trait]
impl FrameConsumer for RecordingConsumer {
    async fn on_frame(&self, frame: Arc<SensorFrame>) {
        lock(&self.frames).push(frame);
    }
}

// ---------------------------------------------------------------------------
// Socket doubles
// ---------------------------------------------------------------------------

/// What the next `open()` does
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Accept,
    Refuse(String),
    /// Never completes; exercises the connect timeout and handshake cancellation
    Hang,
}

/// Connector with scripted handshake outcomes
pub struct MockConnector {
    state: Mutex<MockConnectorState>,
}

struct MockConnectorState {
    script: VecDeque<MockOutcome>,
    fallback: MockOutcome,
    auto_pong: bool,
    opens: Vec<(String, Instant)>,
    peers: Vec<MockPeer>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::scripted([], MockOutcome::Accept)
    }
}

impl MockConnector {
    /// Play `script` in order, then repeat `fallback`
    pub fn scripted(script: impl IntoIterator<Item = MockOutcome>, fallback: MockOutcome) -> Self {
        Self {
            state: Mutex::new(MockConnectorState {
                script: script.into_iter().collect(),
                fallback,
                auto_pong: true,
                opens: Vec::new(),
                peers: Vec::new(),
            }),
        }
    }

    /// Connector whose peers never answer pings
    pub fn without_pongs(self) -> Self {
        lock(&self.state).auto_pong = false;
        self
    }

    /// URLs passed to `open()`, in order
    pub fn urls(&self) -> Vec<String> {
        lock(&self.state).opens.iter().map(|(url, _)| url.clone()).collect()
    }

    /// Times at which `open()` was called
    pub fn open_times(&self) -> Vec<Instant> {
        lock(&self.state).opens.iter().map(|(_, at)| *at).collect()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opens.len()
    }

    /// Server side of the `index`-th accepted connection
    pub fn peer(&self, index: usize) -> Option<MockPeer> {
        lock(&self.state).peers.get(index).cloned()
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.state).peers.len()
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &str) -> Result<(Box<dyn SocketSink>, Box<dyn SocketStream>)> {
        let (outcome, auto_pong) = {
            let mut state = lock(&self.state);
            state.opens.push((url.to_owned(), Instant::now()));
            let scripted = state.script.pop_front();
            let outcome = scripted.unwrap_or_else(|| state.fallback.clone());
            (outcome, state.auto_pong)
        };

        match outcome {
            MockOutcome::Accept => {
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let peer = MockPeer {
                    inbound: inbound_tx,
                    sent: Arc::new(Mutex::new(Vec::new())),
                    closed: Arc::new(Mutex::new(None)),
                    fail_sends: Arc::new(AtomicBool::new(false)),
                };
                lock(&self.state).peers.push(peer.clone());
                Ok((
                    Box::new(MockSink { peer, auto_pong }),
                    Box::new(MockStream { inbound: inbound_rx }),
                ))
            }
            MockOutcome::Refuse(reason) => Err(StreamError::connection_failed(reason)),
            MockOutcome::Hang => std::future::pending().await,
        }
    }
}

enum PeerEvent {
    Message(WireMessage),
    Error(String),
    Drop,
}

/// Server side of one mock connection
#[derive(Clone)]
pub struct MockPeer {
    inbound: mpsc::UnboundedSender<PeerEvent>,
    sent: Arc<Mutex<Vec<WireMessage>>>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
    fail_sends: Arc<AtomicBool>,
}

impl MockPeer {
    /// Push a message to the client
    pub fn push(&self, message: WireMessage) {
        let _ = self.inbound.send(PeerEvent::Message(message));
    }

    /// Fail the client's read half with `reason`
    pub fn fail(&self, reason: &str) {
        let _ = self.inbound.send(PeerEvent::Error(reason.to_owned()));
    }

    /// End the client's read half without a close frame
    pub fn drop_connection(&self) {
        let _ = self.inbound.send(PeerEvent::Drop);
    }

    /// Make every subsequent client write fail
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Every message the client wrote, pings included
    pub fn sent(&self) -> Vec<WireMessage> {
        lock(&self.sent).clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|message| match message {
                WireMessage::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn ping_count(&self) -> usize {
        self.sent().iter().filter(|message| matches!(message, WireMessage::Ping(_))).count()
    }

    /// Close code and reason the client sent, if it closed
    pub fn close_frame(&self) -> Option<(u16, String)> {
        lock(&self.closed).clone()
    }
}

struct MockSink {
    peer: MockPeer,
    auto_pong: bool,
}

#[async_trait::async_trait]
impl SocketSink for MockSink {
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        if self.peer.fail_sends.load(Ordering::SeqCst) {
            return Err(StreamError::Send { bytes: message.len(), reason: "broken pipe".to_owned() });
        }
        if let WireMessage::Ping(payload) = &message {
            if self.auto_pong {
                self.peer.push(WireMessage::Pong(payload.clone()));
            }
        }
        lock(&self.peer.sent).push(message);
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        *lock(&self.peer.closed) = Some((code, reason.to_owned()));
        Ok(())
    }
}

struct MockStream {
    inbound: mpsc::UnboundedReceiver<PeerEvent>,
}

#[async_trait::async_trait]
impl SocketStream for MockStream {
    async fn next(&mut self) -> Option<Result<WireMessage>> {
        match self.inbound.recv().await? {
            PeerEvent::Message(message) => Some(Ok(message)),
            PeerEvent::Error(reason) => Some(Err(StreamError::connection_failed(reason))),
            PeerEvent::Drop => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::codec::decode;

    #[test]
    fn fixtures_decode() {
        assert_eq!(decode(&gradient_yuv_frame(7, 5)).unwrap().dimensions(), (7, 5));
        assert_eq!(decode(&nv21_frame(5, 3, 10, 20, 30)).unwrap().dimensions(), (5, 3));
        assert_eq!(decode(&jpeg_frame(9, 9)).unwrap().dimensions(), (9, 9));
    }

    #[tokio::test]
    async fn scripted_connector_plays_outcomes_in_order() {
        let connector = MockConnector::scripted([MockOutcome::Refuse("nope".into())], MockOutcome::Accept);

        assert!(connector.open("ws://a").await.is_err());
        let (mut sink, _stream) = connector.open("ws://b").await.unwrap();
        sink.send(WireMessage::Text("hi".into())).await.unwrap();

        assert_eq!(connector.urls(), vec!["ws://a", "ws://b"]);
        assert_eq!(connector.peer(0).unwrap().sent_texts(), vec!["hi"]);
    }
}
