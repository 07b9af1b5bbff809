//! Error types for airpatch.
//!
//! Errors are split into two categories:
//! - **Operation failures** ([`RouteError`]): returned from routing operations
//!   that could not do what was asked.
//! - **Degraded conditions**: skipped critical disconnects, launch failures
//!   during profile activation, and similar events that are logged and
//!   absorbed. The daemon never terminates on either category.

/// Failures surfaced by routing operations.
///
/// Per the routing policy, `AlreadyConnected` and `NotConnected` describe a
/// graph that already holds the desired state; callers inside the crate treat
/// them as success. `Disconnected` aborts the enclosing operation and is
/// cleared by the status poller re-acquiring a server session.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The named profile does not exist in the store.
    #[error("unknown profile: {name}")]
    UnknownProfile {
        /// Name that was looked up.
        name: String,
    },

    /// A port name was not known to the audio server.
    #[error("unknown port: {port}")]
    UnknownPort {
        /// The qualified port name.
        port: String,
    },

    /// The requested edge already exists.
    #[error("already connected: {source} -> {sink}")]
    AlreadyConnected {
        /// Source port of the edge.
        source: String,
        /// Sink port of the edge.
        sink: String,
    },

    /// The requested edge does not exist.
    #[error("not connected: {source} -> {sink}")]
    NotConnected {
        /// Source port of the edge.
        source: String,
        /// Sink port of the edge.
        sink: String,
    },

    /// No active session to the audio server.
    #[error("audio server unavailable (no active session)")]
    Disconnected,

    /// Refusing to disconnect a client protected by the critical set.
    #[error("refusing to disconnect critical client: {client}")]
    RefusedCritical {
        /// The protected client.
        client: String,
    },

    /// The prospective input source exposes no source ports.
    #[error("no source ports on client: {client}")]
    NoSourcePorts {
        /// Client that was inspected.
        client: String,
    },

    /// The target exposes no sink ports.
    #[error("no sink ports on client: {client}")]
    NoSinkPorts {
        /// Client that was inspected.
        client: String,
    },

    /// An auxiliary process could not be started.
    #[error("failed to launch {service}: {reason}")]
    LaunchFailed {
        /// Service that failed to start.
        service: String,
        /// Why the launch failed.
        reason: String,
    },

    /// An error from the underlying audio server library.
    #[error("audio server backend error: {0}")]
    Backend(String),
}

impl RouteError {
    /// True for the error kinds that mean the desired state already holds.
    pub fn is_desired_state(&self) -> bool {
        matches!(
            self,
            Self::AlreadyConnected { .. } | Self::NotConnected { .. }
        )
    }
}

/// Outcome of an input switch.
///
/// `Partial` carries the port pairs that could not be connected so callers
/// (CLI, IPC) can show the operator what is left dangling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Every intended connection was made.
    Switched,
    /// Some connections were made, others failed.
    Partial {
        /// The `(source, sink)` pairs that failed.
        failed: Vec<(String, String)>,
    },
}

impl SwitchOutcome {
    /// True when the switch completed without any failed pairs.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Switched)
    }
}
