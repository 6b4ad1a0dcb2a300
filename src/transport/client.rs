//! Persistent socket session with automatic reconnect

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::socket::{Connector, SocketSink, SocketStream, WireMessage};
use super::timer::DeferredTask;
use crate::config::TransportConfig;
use crate::log_sink::LogSink;
use crate::store::{CredentialStore, ServerConfigStore};
use crate::types::{ConnectionState, ReconnectState};
use crate::{Result, StreamError};

const NORMAL_CLOSURE: u16 = 1000;
const NORMAL_CLOSURE_REASON: &str = "Normal closure";

/// `base` with `token=<token>` appended as a query parameter
pub fn connection_url(base: &str, token: &str) -> String {
    let base = base.trim();
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}token={}", base, separator, token)
}

/// `url` with the value of any `token` query parameter masked
pub fn redact_token(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_owned();
    };
    let query: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some(("token", _)) => "token=***".to_owned(),
            _ => pair.to_owned(),
        })
        .collect();
    format!("{}?{}", base, query.join("&"))
}

/// Owner of the connection state machine.
///
/// Cloning yields another handle to the same session. The state is written only
/// here and published on a watch channel. Sends, pings and closes are serialized
/// through one async mutex around the write half.
#[derive(Clone)]
pub struct TransportClient {
    inner: Arc<Inner>,
}

struct Inner {
    ping_interval: Duration,
    connect_timeout: Duration,
    policy: BackoffPolicy,
    credentials: Arc<dyn CredentialStore>,
    server: Arc<dyn ServerConfigStore>,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<ConnectionState>,
    reconnect_tx: watch::Sender<ReconnectState>,
    session: tokio::sync::Mutex<Option<Session>>,
    control: Mutex<Control>,
    epoch: AtomicU64,
    lifetime: CancellationToken,
    log: LogSink,
}

/// Write half of the live connection
struct Session {
    sink: Box<dyn SocketSink>,
    cancel: CancellationToken,
    epoch: u64,
}

/// Reconnect bookkeeping; never held across an await
struct Control {
    /// Consecutive failed attempts since the last success
    attempts: u32,
    /// Cleared by `disconnect()`, a server close or policy exhaustion
    wanted: bool,
    timer: DeferredTask,
    /// Cancels an in-flight handshake
    attempt_cancel: CancellationToken,
    /// Bumped each time an attempt claims `Connecting`
    attempt_id: u64,
}

enum SessionEnd {
    Cancelled,
    ClosedByServer(String),
    Failed(String),
}

impl TransportClient {
    pub fn new(
        config: &TransportConfig,
        credentials: Arc<dyn CredentialStore>,
        server: Arc<dyn ServerConfigStore>,
        connector: Arc<dyn Connector>,
        log: LogSink,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (reconnect_tx, _) = watch::channel(ReconnectState::default());

        Self {
            inner: Arc::new(Inner {
                ping_interval: config.ping_interval(),
                connect_timeout: config.connect_timeout(),
                policy: config.backoff(),
                credentials,
                server,
                connector,
                state_tx,
                reconnect_tx,
                session: tokio::sync::Mutex::new(None),
                control: Mutex::new(Control {
                    attempts: 0,
                    wanted: false,
                    timer: DeferredTask::new(),
                    attempt_cancel: CancellationToken::new(),
                    attempt_id: 0,
                }),
                epoch: AtomicU64::new(0),
                lifetime: CancellationToken::new(),
                log,
            }),
        }
    }

    /// Open the session if disconnected.
    ///
    /// Without a token this is a logged no-op. Otherwise the reconnect policy is
    /// re-armed and any pending reconnect is cancelled before the attempt. A
    /// failed attempt hands over to the reconnect policy; the outcome is
    /// observable through [`TransportClient::state_changes`].
    pub async fn connect(&self) {
        if self.inner.lifetime.is_cancelled() {
            debug!("Connect ignored after shutdown");
            return;
        }
        if self.inner.token().is_none() {
            self.inner.log.append_at(tracing::Level::WARN, "Connect skipped: no auth token");
            return;
        }

        {
            let mut control = self.inner.lock_control();
            control.attempts = 0;
            control.wanted = true;
            control.timer.cancel();
        }
        self.inner.publish_reconnect();
        self.inner.open_session().await;
    }

    /// Close the session with a normal closure and cancel any pending reconnect.
    pub async fn disconnect(&self) {
        self.inner.log.append("Disconnecting");
        {
            let mut control = self.inner.lock_control();
            control.wanted = false;
            control.timer.cancel();
            control.attempt_cancel.cancel();
            control.attempt_cancel = CancellationToken::new();
        }
        self.inner.publish_reconnect();

        let mut session = self.inner.session.lock().await;
        if let Some(mut active) = session.take() {
            self.inner.state_tx.send_replace(ConnectionState::Closing);
            active.cancel.cancel();
            match active.sink.close(NORMAL_CLOSURE, NORMAL_CLOSURE_REASON).await {
                Ok(()) => self.inner.log.append(format!("Closed: {}", NORMAL_CLOSURE_REASON)),
                Err(e) => debug!(error = %e, "Close frame not delivered"),
            }
        }
        self.inner.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Send a text message. Not connected is a logged no-op.
    pub async fn send_text(&self, text: String) -> Result<()> {
        let chars = text.chars().count();
        let bytes = text.len();
        match self.inner.send(WireMessage::Text(text), "Skip text send (not connected)").await {
            Ok(()) => {
                self.inner.log.append_at(tracing::Level::DEBUG, format!("Sent text ({} chars)", chars));
                Ok(())
            }
            Err(e) => {
                if !matches!(e, StreamError::NotConnected { .. }) {
                    self.inner.log.append_at(tracing::Level::WARN, format!("Text send failed ({} bytes)", bytes));
                }
                Err(e)
            }
        }
    }

    /// Send a binary message. Not connected is a logged no-op.
    pub async fn send_binary(&self, data: Vec<u8>) -> Result<()> {
        let bytes = data.len();
        match self.inner.send(WireMessage::Binary(data), "Send skipped (not connected)").await {
            Ok(()) => {
                self.inner.log.append_at(tracing::Level::DEBUG, format!("Sent {} bytes", bytes));
                Ok(())
            }
            Err(e) => {
                if !matches!(e, StreamError::NotConnected { .. }) {
                    self.inner.log.append_at(tracing::Level::WARN, format!("Send failed ({} bytes)", bytes));
                }
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn reconnect_state(&self) -> ReconnectState {
        *self.inner.reconnect_tx.borrow()
    }

    pub fn reconnect_changes(&self) -> watch::Receiver<ReconnectState> {
        self.inner.reconnect_tx.subscribe()
    }

    /// Stop every background task without a close handshake. The client is
    /// unusable afterwards.
    pub fn shutdown(&self) {
        self.inner.lifetime.cancel();
        {
            let mut control = self.inner.lock_control();
            control.wanted = false;
            control.timer.cancel();
            control.attempt_cancel.cancel();
        }
        self.inner.publish_reconnect();
        self.inner.state_tx.send_replace(ConnectionState::Disconnected);
        debug!("Transport shut down");
    }
}

impl Inner {
    fn lock_control(&self) -> std::sync::MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn token(&self) -> Option<String> {
        self.credentials.token().filter(|token| !token.trim().is_empty())
    }

    fn publish_reconnect(&self) {
        let control = self.lock_control();
        let snapshot = ReconnectState { attempt_count: control.attempts, scheduled_resume_at: control.timer.fires_at() };
        drop(control);
        self.reconnect_tx.send_replace(snapshot);
    }

    /// One connection attempt: Disconnected -> Connecting -> Connected, or back
    /// to Disconnected with a reconnect scheduled.
    async fn open_session(self: &Arc<Self>) {
        let Some(token) = self.token() else {
            self.log.append_at(tracing::Level::WARN, "Connect skipped: no auth token");
            return;
        };

        let Some((cancel, attempt)) = self.claim_attempt() else {
            return;
        };

        let url = connection_url(&self.server.base_url(), &token);
        let display_url = redact_token(&url);
        info!(url = %display_url, "Connecting");
        self.log.append(format!("Connecting to {}", display_url));

        let opened = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Handshake cancelled");
                self.release_attempt(attempt);
                return;
            }
            _ = self.lifetime.cancelled() => {
                self.release_attempt(attempt);
                return;
            }
            result = tokio::time::timeout(self.connect_timeout, self.connector.open(&url)) => result,
        };

        let (mut sink, stream) = match opened {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                self.fail_attempt(attempt, &e.to_string());
                return;
            }
            Err(_) => {
                let e = StreamError::Timeout { duration: self.connect_timeout };
                self.fail_attempt(attempt, &e.to_string());
                return;
            }
        };

        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let session_cancel = self.lifetime.child_token();
        {
            let mut session = self.session.lock().await;
            if cancel.is_cancelled() || self.lifetime.is_cancelled() {
                drop(session);
                debug!("Connection opened after disconnect, closing it");
                self.release_attempt(attempt);
                let _ = sink.close(NORMAL_CLOSURE, NORMAL_CLOSURE_REASON).await;
                return;
            }
            *session = Some(Session { sink, cancel: session_cancel.clone(), epoch });
            self.state_tx.send_replace(ConnectionState::Connected);
        }

        self.lock_control().attempts = 0;
        self.publish_reconnect();
        info!(epoch, "Connected");
        self.log.append("Connected");

        tokio::spawn(run_session(Arc::downgrade(self), stream, epoch, session_cancel, self.ping_interval));
    }

    /// Move Disconnected -> Connecting if a connection is still wanted.
    ///
    /// The `wanted` check and the claim share one critical section with
    /// `disconnect()`, so a claimed attempt always sees its cancel token fire.
    fn claim_attempt(&self) -> Option<(CancellationToken, u64)> {
        let mut control = self.lock_control();
        if !control.wanted {
            debug!("Connection no longer wanted, skipping attempt");
            return None;
        }
        let claimed = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            debug!(state = %*self.state_tx.borrow(), "Connect ignored, session already active");
            return None;
        }
        control.attempt_id += 1;
        Some((control.attempt_cancel.clone(), control.attempt_id))
    }

    /// Undo the `Connecting` claim of `attempt` unless a later attempt owns it
    fn release_attempt(&self, attempt: u64) {
        let control = self.lock_control();
        if control.attempt_id != attempt {
            return;
        }
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }

    /// Handshake failed or timed out
    fn fail_attempt(self: &Arc<Self>, attempt: u64, reason: &str) {
        warn!(reason, "Connection attempt failed");
        self.log.append_at(tracing::Level::WARN, format!("WS failure: {}", reason));
        self.release_attempt(attempt);
        self.schedule_reconnect();
    }

    /// Arm the reconnect timer, or stop once the policy is exhausted
    fn schedule_reconnect(self: &Arc<Self>) {
        let mut control = self.lock_control();
        if !control.wanted || self.lifetime.is_cancelled() {
            return;
        }
        if self.policy.exhausted(control.attempts) {
            control.wanted = false;
            drop(control);
            warn!(max_attempts = self.policy.max_attempts(), "Giving up on reconnect");
            self.log.append_at(tracing::Level::WARN, "Max reconnect attempts reached");
            self.publish_reconnect();
            return;
        }

        control.attempts += 1;
        let attempt = control.attempts;
        let delay = self.policy.delay_for(attempt);
        let weak = Arc::downgrade(self);
        control.timer.schedule(delay, async move {
            if let Some(inner) = weak.upgrade() {
                inner.log.append(format!("Reconnecting (attempt {})", attempt));
                inner.open_session().await;
            }
        });
        drop(control);

        info!(delay_secs = delay.as_secs(), attempt, "Reconnect scheduled");
        self.log.append(format!("Reconnect in {}s (attempt {})", delay.as_secs(), attempt));
        self.publish_reconnect();
    }

    async fn send(self: &Arc<Self>, message: WireMessage, skipped: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        let state = *self.state_tx.borrow();
        let Some(active) = session.as_mut().filter(|_| state.is_connected()) else {
            drop(session);
            self.log.append_at(tracing::Level::DEBUG, skipped);
            return Err(StreamError::NotConnected { state: state.to_string() });
        };

        let bytes = message.len();
        match active.sink.send(message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let epoch = active.epoch;
                drop(session);
                let reason = e.to_string();
                self.end_session(epoch, SessionEnd::Failed(reason.clone())).await;
                Err(StreamError::Send { bytes, reason })
            }
        }
    }

    /// Send a ping on the session identified by `epoch`
    async fn ping(&self, epoch: u64) -> Result<()> {
        let mut session = self.session.lock().await;
        match session.as_mut().filter(|active| active.epoch == epoch) {
            Some(active) => active.sink.send(WireMessage::Ping(Vec::new())).await,
            None => Err(StreamError::NotConnected { state: self.state_tx.borrow().to_string() }),
        }
    }

    /// Tear down the session identified by `epoch`. Stale epochs are ignored.
    async fn end_session(self: &Arc<Self>, epoch: u64, end: SessionEnd) {
        {
            let mut session = self.session.lock().await;
            if session.as_ref().map(|active| active.epoch) != Some(epoch) {
                return;
            }
            if let Some(active) = session.take() {
                active.cancel.cancel();
            }
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }

        match end {
            SessionEnd::Cancelled => {}
            SessionEnd::ClosedByServer(reason) => {
                info!(reason = %reason, "Server closed the connection");
                self.log.append(format!("Closed: {}", reason));
                self.lock_control().wanted = false;
            }
            SessionEnd::Failed(reason) => {
                warn!(reason = %reason, "Connection lost");
                self.log.append_at(tracing::Level::WARN, format!("WS failure: {}", reason));
                self.schedule_reconnect();
            }
        }
    }
}

/// Reader and keep-alive loop for one connection
async fn run_session(
    inner: Weak<Inner>,
    mut stream: Box<dyn SocketStream>,
    epoch: u64,
    cancel: CancellationToken,
    ping_interval: Duration,
) {
    debug!(epoch, "Session reader started");
    let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut awaiting_pong = false;

    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => break SessionEnd::Cancelled,
            message = stream.next() => {
                let Some(inner) = inner.upgrade() else { break SessionEnd::Cancelled };
                match message {
                    Some(Ok(WireMessage::Text(text))) => {
                        inner.log.append(format!("Recv text ({} chars)", text.chars().count()));
                    }
                    Some(Ok(WireMessage::Binary(data))) => {
                        inner.log.append(format!("Recv data ({} bytes)", data.len()));
                    }
                    Some(Ok(WireMessage::Pong(_))) => awaiting_pong = false,
                    Some(Ok(WireMessage::Ping(_))) => {}
                    Some(Ok(WireMessage::Close { code, reason })) => {
                        inner.log.append(format!("Closing: {} {}", code, reason));
                        break SessionEnd::ClosedByServer(reason);
                    }
                    Some(Err(e)) => break SessionEnd::Failed(e.to_string()),
                    None => break SessionEnd::Failed("connection reset by peer".to_owned()),
                }
            }
            _ = keepalive.tick() => {
                if awaiting_pong {
                    break SessionEnd::Failed("ping timeout".to_owned());
                }
                let Some(inner) = inner.upgrade() else { break SessionEnd::Cancelled };
                if let Err(e) = inner.ping(epoch).await {
                    break SessionEnd::Failed(e.to_string());
                }
                awaiting_pong = true;
            }
        }
    };

    debug!(epoch, "Session reader ended");
    if let Some(inner) = inner.upgrade() {
        inner.end_session(epoch, end).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_appended_with_the_right_separator() {
        assert_eq!(connection_url("wss://h/ws", "abc"), "wss://h/ws?token=abc");
        assert_eq!(connection_url(" wss://h/ws?room=1 ", "abc"), "wss://h/ws?room=1&token=abc");
    }

    #[test]
    fn redaction_masks_only_the_token() {
        assert_eq!(redact_token("wss://h/ws?token=abc"), "wss://h/ws?token=***");
        assert_eq!(redact_token("wss://h/ws?room=1&token=abc&x=2"), "wss://h/ws?room=1&token=***&x=2");
        assert_eq!(redact_token("wss://h/ws"), "wss://h/ws");
    }

    fn client() -> TransportClient {
        TransportClient::new(
            &TransportConfig::default(),
            Arc::new(crate::store::MemoryCredentialStore::new("abc")),
            Arc::new(crate::store::MemoryServerConfig::new("wss://h/ws")),
            Arc::new(crate::test_utils::MockConnector::default()),
            LogSink::default(),
        )
    }

    #[tokio::test]
    async fn attempt_after_disconnect_cannot_claim_connecting() {
        let client = client();
        client.inner.lock_control().wanted = true;

        client.disconnect().await;

        assert!(client.inner.claim_attempt().is_none());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn cancelled_attempt_releases_its_claim() {
        let client = client();
        client.inner.lock_control().wanted = true;
        let (cancel, attempt) = client.inner.claim_attempt().unwrap();
        assert_eq!(client.state(), ConnectionState::Connecting);

        client.disconnect().await;
        assert!(cancel.is_cancelled());
        client.inner.release_attempt(attempt);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.connect().await;
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn stale_release_leaves_a_newer_attempt_alone() {
        let client = client();
        client.inner.lock_control().wanted = true;
        let (_, stale) = client.inner.claim_attempt().unwrap();
        client.inner.release_attempt(stale);

        let (_, current) = client.inner.claim_attempt().unwrap();
        client.inner.release_attempt(stale);
        assert_eq!(client.state(), ConnectionState::Connecting);

        client.inner.release_attempt(current);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
