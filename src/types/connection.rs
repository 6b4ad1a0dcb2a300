//! Connection state types owned by the transport client

use std::fmt;
use tokio::time::Instant;

/// Lifecycle state of the persistent socket session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    /// True only in the `Connected` state
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Reconnect bookkeeping snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconnectState {
    /// Consecutive failed attempts since the last successful connection
    pub attempt_count: u32,

    /// When the pending reconnect fires, if one is scheduled
    pub scheduled_resume_at: Option<Instant>,
}
