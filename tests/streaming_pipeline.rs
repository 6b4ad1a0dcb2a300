//! End-to-end streaming tests
//!
//! Runs a full session against a local WebSocket server, with in-test camera
//! and location platforms, through the real `WsConnector`.

use futures::StreamExt;
use geocast::platform::{CameraPlatform, FrameObserver, LocationObserver, LocationPlatform, LocationRequest};
use geocast::types::{PixelFormat, PlatformFix, RawFrame, StreamEnvelope};
use geocast::{MemoryCredentialStore, MemoryServerConfig, StreamSession};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

#[derive(Default)]
struct TestCamera {
    observer: Mutex<Option<Arc<dyn FrameObserver>>>,
}

impl TestCamera {
    fn deliver(&self, frame: RawFrame) {
        let observer = self.observer.lock().unwrap().clone();
        if let Some(observer) = observer {
            observer.on_raw_frame(frame);
        }
    }
}

impl CameraPlatform for TestCamera {
    fn bind(&self, observer: Arc<dyn FrameObserver>) -> geocast::Result<()> {
        *self.observer.lock().unwrap() = Some(observer);
        Ok(())
    }

    fn unbind(&self) {
        *self.observer.lock().unwrap() = None;
    }
}

#[derive(Default)]
struct TestLocation {
    observer: Mutex<Option<Arc<dyn LocationObserver>>>,
}

impl TestLocation {
    fn deliver(&self, fix: PlatformFix) {
        let observer = self.observer.lock().unwrap().clone();
        if let Some(observer) = observer {
            observer.on_location_fix(fix);
        }
    }
}

impl LocationPlatform for TestLocation {
    fn request_updates(&self, _request: LocationRequest, observer: Arc<dyn LocationObserver>) -> geocast::Result<()> {
        *self.observer.lock().unwrap() = Some(observer);
        Ok(())
    }

    fn remove_updates(&self) {
        *self.observer.lock().unwrap() = None;
    }
}

#[derive(Debug)]
enum ServerEvent {
    Connected(String),
    Text(String),
    Closed,
}

/// Accept WebSocket clients on a loopback port and report what they do
async fn spawn_server() -> anyhow::Result<(String, mpsc::UnboundedReceiver<ServerEvent>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}/ws", listener.local_addr()?);
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let uri = Arc::new(Mutex::new(String::new()));
                let seen = Arc::clone(&uri);
                let callback = move |request: &Request, response: Response| {
                    *seen.lock().unwrap() = request.uri().to_string();
                    Ok::<_, ErrorResponse>(response)
                };
                let Ok(mut socket) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    return;
                };
                let _ = tx.send(ServerEvent::Connected(uri.lock().unwrap().clone()));

                while let Some(Ok(message)) = socket.next().await {
                    match message {
                        Message::Text(text) => {
                            let _ = tx.send(ServerEvent::Text(text));
                        }
                        Message::Close(_) => {
                            let _ = tx.send(ServerEvent::Closed);
                            break;
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    Ok((url, rx))
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> anyhow::Result<ServerEvent> {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("server stopped"))
}

fn nv21_frame(width: u32, height: u32) -> RawFrame {
    let (w, h) = (width as usize, height as usize);
    let mut data = vec![90u8; w * h];
    data.resize(w * h + w.div_ceil(2) * 2 * h.div_ceil(2), 128);
    RawFrame::new(width, height, PixelFormat::Nv21(Arc::from(data)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frames_and_fixes_reach_a_websocket_server() -> anyhow::Result<()> {
    geocast::init_tracing("geocast=debug");
    let (url, mut events) = spawn_server().await?;
    let camera = Arc::new(TestCamera::default());
    let location = Arc::new(TestLocation::default());
    let session = StreamSession::builder()
        .credentials(Arc::new(MemoryCredentialStore::new("abc123")))
        .server_config(Arc::new(MemoryServerConfig::new(url)))
        .camera(camera.clone())
        .location(location.clone())
        .build()?;

    let mut states = session.observe().connection_stream();
    session.start_recording().await?;

    match next_event(&mut events).await? {
        ServerEvent::Connected(uri) => assert_eq!(uri, "/ws?token=abc123"),
        other => panic!("expected a connection, got {:?}", other),
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(state) = states.next().await {
            if state.is_connected() {
                break;
            }
        }
    })
    .await?;
    assert!(!session.log().contains("abc123"));

    location.deliver(PlatformFix::new(51.5007, -0.1246, Some(4.0)));
    camera.deliver(nv21_frame(32, 24));

    let text = match next_event(&mut events).await? {
        ServerEvent::Text(text) => text,
        other => panic!("expected an envelope, got {:?}", other),
    };
    let envelope = StreamEnvelope::from_json(&text)?;
    assert_eq!((envelope.lat, envelope.lon, envelope.accuracy), (51.5007, -0.1246, 4.0));

    let jpeg = envelope.decode_image()?;
    let decoded = image::load_from_memory(&jpeg)?;
    assert_eq!((decoded.width(), decoded.height()), (24, 32));

    session.stop_recording().await;
    assert!(matches!(next_event(&mut events).await?, ServerEvent::Closed));
    assert!(session.log().contains("Recording stopped"));
    Ok(())
}

#[tokio::test]
async fn recording_without_token_never_opens_a_socket() -> anyhow::Result<()> {
    geocast::init_tracing("geocast=debug");
    let (url, mut events) = spawn_server().await?;
    let camera = Arc::new(TestCamera::default());
    let session = StreamSession::builder()
        .credentials(Arc::new(MemoryCredentialStore::default()))
        .server_config(Arc::new(MemoryServerConfig::new(url)))
        .camera(camera.clone())
        .location(Arc::new(TestLocation::default()))
        .build()?;

    session.start_recording().await?;
    camera.deliver(nv21_frame(16, 16));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(session.log().contains("no auth token"));
    assert!(!session.observe().is_connected());
    assert!(events.try_recv().is_err());
    Ok(())
}
