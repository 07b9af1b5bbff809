//! Routing events and the append-only event log.
//!
//! Events are non-fatal notifications about graph and daemon state. Every
//! mutation publishes its event *after* the mutation succeeds and before the
//! event loop picks up the next request, so subscribers always observe a
//! consistent history.
//!
//! The log is a plain publish channel: entries carry monotonically increasing
//! sequence numbers, subscribers either register a callback or pull entries
//! by sequence. There is no implicit ownership between publisher and
//! subscriber.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Notifications published by the routing engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RouteEvent {
    /// An edge was connected or disconnected.
    ConnectionChanged {
        /// Source port of the edge.
        source: String,
        /// Sink port of the edge.
        sink: String,
        /// `true` if the edge now exists.
        connected: bool,
    },

    /// A profile became current.
    ProfileChanged {
        /// Name of the activated profile.
        name: String,
    },

    /// A client appeared in the graph since the previous monitor tick.
    ClientAppeared {
        /// Name of the new client.
        name: String,
    },

    /// A client vanished from the graph since the previous monitor tick.
    ClientDisappeared {
        /// Name of the departed client.
        name: String,
    },

    /// The audio server started or stopped.
    ServerStatusChanged {
        /// `true` if the server is now reachable.
        running: bool,
    },

    /// The device list changed since the previous scan.
    DeviceListChanged,

    /// An auxiliary service started or stopped.
    ServiceStatusChanged {
        /// Service name (e.g. `stereo_tool`).
        name: String,
        /// `true` if the service is now running.
        running: bool,
    },
}

/// A log entry: an event plus its position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedEvent {
    /// Monotonically increasing sequence number, starting at 1.
    pub seq: u64,
    /// The event itself.
    #[serde(flatten)]
    pub event: RouteEvent,
}

/// Callback type for receiving events as they are published.
pub type EventCallback = Arc<dyn Fn(&SequencedEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(&SequencedEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

struct LogInner {
    entries: Vec<SequencedEvent>,
    callbacks: Vec<EventCallback>,
}

/// Append-only, sequence-numbered event log.
///
/// Owned by the routing controller; cheap to share via `Arc`. Publishing
/// appends an entry and invokes every registered callback synchronously, in
/// registration order.
pub struct EventLog {
    inner: Mutex<LogInner>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LogInner {
                entries: Vec::new(),
                callbacks: Vec::new(),
            }),
        }
    }

    /// Appends an event, assigns it the next sequence number, and notifies
    /// subscribers. Returns the assigned sequence number.
    pub fn publish(&self, event: RouteEvent) -> u64 {
        let mut inner = self.inner.lock();
        let seq = inner.entries.len() as u64 + 1;
        let entry = SequencedEvent { seq, event };
        tracing::debug!(seq, event = ?entry.event, "event published");
        for callback in &inner.callbacks {
            callback(&entry);
        }
        inner.entries.push(entry);
        seq
    }

    /// Registers a callback invoked for every subsequently published event.
    pub fn subscribe(&self, callback: EventCallback) {
        self.inner.lock().callbacks.push(callback);
    }

    /// Returns every entry with a sequence number strictly greater than
    /// `after`. Pass 0 for the full history.
    pub fn events_since(&self, after: u64) -> Vec<SequencedEvent> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|e| e.seq > after)
            .cloned()
            .collect()
    }

    /// Sequence number of the most recent entry, or 0 if the log is empty.
    pub fn last_seq(&self) -> u64 {
        self.inner.lock().entries.len() as u64
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
