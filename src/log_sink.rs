//! Bounded, timestamped event log observed by the UI.
//!
//! Every component appends human-readable events here in addition to emitting
//! `tracing` events. The sink keeps the newest `capacity` entries and republishes
//! an immutable newest-first snapshot after each append.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::Level;

/// Default number of retained entries
pub const DEFAULT_LOG_CAPACITY: usize = 300;

/// One log event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Newest-first snapshot of the log
pub type LogSnapshot = Arc<[LogEntry]>;

/// Shared ring-buffer log. Cloning yields another handle to the same log.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<LogInner>,
}

struct LogInner {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
    snapshot_tx: watch::Sender<LogSnapshot>,
}

impl LogSink {
    /// Create a sink holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (snapshot_tx, _) = watch::channel(LogSnapshot::from(Vec::new()));
        Self {
            inner: Arc::new(LogInner {
                capacity,
                entries: Mutex::new(VecDeque::with_capacity(capacity)),
                snapshot_tx,
            }),
        }
    }

    /// Append an informational event
    pub fn append(&self, message: impl Into<String>) {
        self.append_at(Level::INFO, message);
    }

    /// Append an event, mirroring it to `tracing` at `level`
    pub fn append_at(&self, level: Level, message: impl Into<String>) {
        let message = message.into();
        if level == Level::ERROR {
            tracing::error!(target: "geocast::log", "{}", message);
        } else if level == Level::WARN {
            tracing::warn!(target: "geocast::log", "{}", message);
        } else if level == Level::INFO {
            tracing::info!(target: "geocast::log", "{}", message);
        } else {
            tracing::debug!(target: "geocast::log", "{}", message);
        }

        let entry = LogEntry { timestamp: Utc::now(), message };
        let mut entries = self.inner.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.push_front(entry);
        entries.truncate(self.inner.capacity);

        let snapshot: LogSnapshot = entries.iter().cloned().collect();
        self.inner.snapshot_tx.send_replace(snapshot);
    }

    /// Current entries, newest first
    pub fn entries(&self) -> LogSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshot updates
    pub fn subscribe(&self) -> watch::Receiver<LogSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// True if any retained entry contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|entry| entry.message.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Drop every retained entry
    pub fn clear(&self) {
        let mut entries = self.inner.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.clear();
        self.inner.snapshot_tx.send_replace(LogSnapshot::from(Vec::new()));
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink").field("capacity", &self.inner.capacity).field("len", &self.len()).finish()
    }
}

/// Install a `tracing` fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Returns false if a global subscriber was already set.
pub fn init_tracing(default_filter: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn entries_are_newest_first() {
        let log = LogSink::new(10);
        log.append("first");
        log.append("second");
        log.append("third");

        let messages: Vec<_> = log.entries().iter().map(|e| e.message.clone()).collect();
        assert_eq!(messages, vec!["third", "second", "first"]);
    }

    #[test]
    fn display_prefixes_clock_time() {
        let log = LogSink::new(1);
        log.append("Connected");
        let rendered = log.entries()[0].to_string();
        assert!(rendered.starts_with('['));
        assert!(rendered.ends_with("] Connected"));
        assert_eq!(rendered.len(), "[00:00:00] Connected".len());
    }

    #[tokio::test]
    async fn subscribers_see_each_append() {
        let log = LogSink::default();
        let mut rx = log.subscribe();
        log.append("hello");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update()[0].message, "hello");
    }

    #[test]
    fn clear_empties_the_ring() {
        let log = LogSink::new(5);
        log.append("a");
        log.clear();
        assert!(log.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn log_keeps_exactly_the_newest_capacity_entries(n in 0usize..900) {
            let log = LogSink::new(DEFAULT_LOG_CAPACITY);
            for i in 0..n {
                log.append(format!("event {}", i));
            }

            let entries = log.entries();
            prop_assert_eq!(entries.len(), n.min(DEFAULT_LOG_CAPACITY));
            for (position, entry) in entries.iter().enumerate() {
                prop_assert_eq!(&entry.message, &format!("event {}", n - 1 - position));
            }
        }
    }
}
