//! Critical-connection registry.
//!
//! Answers "is this edge (or client) critical?" for every mutation path.
//! Membership is recomputed on every query; nothing is cached. The set only
//! grows during the process lifetime: there are no removal operations.

use crate::graph::{client_of, is_source_host, local_of, ClientKind};

/// Client-name substrings protected out of the box.
const DEFAULT_CRITICAL_CLIENTS: &[&str] = &["stereo_tool", "liquidsoap", "icecast"];

/// The set of clients and edges declared untouchable, plus the name rules
/// that defend the live signal chain before any operator declaration.
///
/// Evaluation order for an edge, first match wins:
/// 1. explicitly marked edge
/// 2. either endpoint's client matches a critical-client substring
/// 3. the source is a broadcast playout port
/// 4. the edge matches a canonical chain pattern (playout host to
///    processor, processor to streamer, streamer to streaming server)
#[derive(Debug, Clone)]
pub struct CriticalSet {
    clients: Vec<String>,
    edges: Vec<(String, String)>,
}

impl CriticalSet {
    /// Creates a registry with the default protected clients.
    pub fn with_defaults() -> Self {
        Self {
            clients: DEFAULT_CRITICAL_CLIENTS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            edges: Vec::new(),
        }
    }

    /// Creates an empty registry. Used by tests that need full control.
    pub fn empty() -> Self {
        Self {
            clients: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Protects every client whose name contains `substring`
    /// (case-insensitive). Idempotent.
    pub fn mark_client_critical(&mut self, substring: &str) {
        let substring = substring.to_lowercase();
        if !self.clients.contains(&substring) {
            tracing::info!(client = %substring, "marked client critical");
            self.clients.push(substring);
        }
    }

    /// Protects one explicit edge. Idempotent.
    pub fn mark_edge_critical(&mut self, source: &str, sink: &str) {
        let edge = (source.to_string(), sink.to_string());
        if !self.edges.contains(&edge) {
            tracing::info!(source, sink, "marked edge critical");
            self.edges.push(edge);
        }
    }

    /// True when the client itself must never have its connections cleared.
    pub fn is_client_critical(&self, client: &str) -> bool {
        let lower = client.to_lowercase();
        if self.clients.iter().any(|c| lower.contains(c)) {
            return true;
        }
        // Broadcast playout clients are protected without declaration.
        lower.contains("rivendell") && lower.contains("playout")
    }

    /// True when the edge must survive every non-emergency mutation.
    pub fn is_edge_critical(&self, source: &str, sink: &str) -> bool {
        if self
            .edges
            .iter()
            .any(|(s, d)| s == source && d == sink)
        {
            return true;
        }

        let source_client = client_of(source);
        let sink_client = client_of(sink);
        if self.is_client_critical(source_client) || self.is_client_critical(sink_client) {
            return true;
        }

        // The live playout feed is protected even before any chain is built.
        if source_client.to_lowercase().contains("rivendell")
            && local_of(source).to_lowercase().contains("playout")
        {
            return true;
        }

        self.matches_chain_pattern(source_client, sink_client)
    }

    fn matches_chain_pattern(&self, source_client: &str, sink_client: &str) -> bool {
        let source_kind = ClientKind::infer(source_client);
        let sink_kind = ClientKind::infer(sink_client);

        (is_source_host(source_client) && sink_kind == ClientKind::Processor)
            || (source_kind == ClientKind::Processor && sink_kind == ClientKind::Streamer)
            || (source_kind == ClientKind::Streamer && sink_kind == ClientKind::Streamer)
    }
}
