//! In-memory snapshot of clients, ports, and edges.
//!
//! The graph model is the source of truth consulted by all policy code. It
//! is refreshed by polling the audio server; callers never mutate it
//! directly. A snapshot is replaced atomically, so readers observe either
//! the previous or the new graph in its entirety.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::server::AudioServer;
use crate::RouteError;

/// Client-name substrings identifying audio processors.
const PROCESSOR_HINTS: &[&str] = &["stereo_tool", "jack_rack", "carla", "non_mixer"];

/// Client-name substrings identifying streaming clients and servers.
const STREAMER_HINTS: &[&str] = &["liquidsoap", "glasscoder", "darkice", "butt", "icecast"];

/// Client-name substrings identifying plain software players.
const SOFTWARE_HINTS: &[&str] = &["vlc", "mpv", "mplayer", "firefox"];

/// Role of a client, inferred from its name with case-insensitive
/// substring rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// The hardware capture/playback client (`system`).
    HardwareSystem,
    /// A software player or other generic source.
    Software,
    /// An audio processor in the broadcast chain.
    Processor,
    /// A streaming encoder or streaming server.
    Streamer,
    /// Anything the rules do not recognize.
    Unknown,
}

impl ClientKind {
    /// Infers the kind for a client name.
    pub fn infer(client: &str) -> Self {
        let lower = client.to_lowercase();
        if PROCESSOR_HINTS.iter().any(|h| lower.contains(h)) {
            Self::Processor
        } else if STREAMER_HINTS.iter().any(|h| lower.contains(h)) {
            Self::Streamer
        } else if lower.contains("system") {
            Self::HardwareSystem
        } else if SOFTWARE_HINTS.iter().any(|h| lower.contains(h)) {
            Self::Software
        } else {
            Self::Unknown
        }
    }
}

/// True for the broadcast playout client (`rivendell_0` or equivalent).
pub fn is_source_host(client: &str) -> bool {
    client.to_lowercase().contains("rivendell")
}

/// Client part of a qualified port name (before the first `:`).
pub fn client_of(port: &str) -> &str {
    port.split(':').next().unwrap_or(port)
}

/// Local part of a qualified port name (after the first `:`).
pub fn local_of(port: &str) -> &str {
    match port.find(':') {
        Some(idx) => &port[idx + 1..],
        None => port,
    }
}

/// True when a local port name reads as a source (produces audio).
pub fn is_source_name(local: &str) -> bool {
    let lower = local.to_lowercase();
    lower.contains("capture")
        || lower.contains("playout")
        || lower.contains("output")
        || lower.contains("out")
        || local.ends_with('L')
        || local.ends_with('R')
}

/// True when a local port name reads as a sink (accepts audio).
pub fn is_sink_name(local: &str) -> bool {
    let lower = local.to_lowercase();
    lower.contains("record") || lower.contains("input") || lower.contains("in")
}

/// True when a local port name indicates a record/input role. This is the
/// narrower rule used when clearing a target's input slot: `playout` ports
/// are never touched even though they end in `L`/`R`.
pub fn is_record_name(local: &str) -> bool {
    let lower = local.to_lowercase();
    (lower.contains("record") || lower.contains("input")) && !lower.contains("playout")
}

/// Direction of a port for routing purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    /// Produces audio.
    Source,
    /// Accepts audio.
    Sink,
}

/// Resolves a local port name to one direction.
///
/// Names like `record_0L` match both the source rule (ends in `L`) and the
/// sink rule (contains `record`); the record/input role wins so edges stay
/// oriented from the producing side. Names matching nothing are treated as
/// sinks.
pub fn direction_of(local: &str) -> PortDirection {
    let lower = local.to_lowercase();
    if lower.contains("record") || lower.contains("input") {
        PortDirection::Sink
    } else if is_source_name(local) {
        PortDirection::Source
    } else {
        PortDirection::Sink
    }
}

/// A directed connection between two qualified ports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    /// The producing port.
    pub source: String,
    /// The accepting port.
    pub sink: String,
}

impl Edge {
    /// Creates an edge from qualified port names.
    pub fn new(source: impl Into<String>, sink: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            sink: sink.into(),
        }
    }
}

/// Immutable view of the connection graph at one instant.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    clients: Vec<String>,
    ports: Vec<String>,
    edges: Vec<Edge>,
}

impl GraphSnapshot {
    /// Builds a snapshot from a port list (server order) and an edge list.
    pub fn from_parts(ports: Vec<String>, edges: Vec<Edge>) -> Self {
        let mut clients: Vec<String> = Vec::new();
        for port in &ports {
            let client = client_of(port);
            if !clients.iter().any(|c| c == client) {
                clients.push(client.to_string());
            }
        }
        Self {
            clients,
            ports,
            edges,
        }
    }

    /// Client names in first-port order.
    pub fn clients(&self) -> &[String] {
        &self.clients
    }

    /// Every qualified port name, in server order.
    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    /// Edges present at snapshot time.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// True if the named client is present.
    pub fn has_client(&self, client: &str) -> bool {
        self.clients.iter().any(|c| c == client)
    }

    /// Qualified ports of one client, preserving server order.
    pub fn ports_of(&self, client: &str) -> Vec<&str> {
        let prefix = format!("{client}:");
        self.ports
            .iter()
            .filter(|p| p.starts_with(&prefix))
            .map(String::as_str)
            .collect()
    }

    /// Source-classified ports of a client.
    pub fn source_ports_of(&self, client: &str) -> Vec<&str> {
        self.ports_of(client)
            .into_iter()
            .filter(|p| is_source_name(local_of(p)))
            .collect()
    }

    /// Sink-classified ports of a client.
    pub fn sink_ports_of(&self, client: &str) -> Vec<&str> {
        self.ports_of(client)
            .into_iter()
            .filter(|p| is_sink_name(local_of(p)))
            .collect()
    }

    /// Record/input-role ports of a client (the narrower input-slot rule).
    pub fn record_ports_of(&self, client: &str) -> Vec<&str> {
        self.ports_of(client)
            .into_iter()
            .filter(|p| is_record_name(local_of(p)))
            .collect()
    }

    /// Clients inferred to be processors, in snapshot order.
    pub fn processors(&self) -> Vec<&str> {
        self.clients
            .iter()
            .filter(|c| ClientKind::infer(c) == ClientKind::Processor)
            .map(String::as_str)
            .collect()
    }

    /// Clients inferred to be streamers, in snapshot order.
    pub fn streamers(&self) -> Vec<&str> {
        self.clients
            .iter()
            .filter(|c| ClientKind::infer(c) == ClientKind::Streamer)
            .map(String::as_str)
            .collect()
    }

    /// The first broadcast playout client, if one is present.
    pub fn source_host(&self) -> Option<&str> {
        self.clients
            .iter()
            .find(|c| is_source_host(c))
            .map(String::as_str)
    }
}

/// Polled graph model.
///
/// `refresh()` repopulates from the audio server; `snapshot()` hands out the
/// current immutable view. When the server is unreachable the model holds
/// the empty snapshot so no stale graph informs routing decisions.
pub struct GraphModel {
    server: Arc<dyn AudioServer>,
    current: Mutex<Arc<GraphSnapshot>>,
}

impl GraphModel {
    /// Creates a model over the given server, starting empty.
    pub fn new(server: Arc<dyn AudioServer>) -> Self {
        Self {
            server,
            current: Mutex::new(Arc::new(GraphSnapshot::default())),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.current.lock().clone()
    }

    /// Synchronously repopulates the snapshot from the server.
    ///
    /// A `Disconnected` server empties the snapshot and is not an error for
    /// the caller; other backend failures are surfaced.
    pub fn refresh(&self) -> Result<(), RouteError> {
        match self.build() {
            Ok(snapshot) => {
                *self.current.lock() = Arc::new(snapshot);
                Ok(())
            }
            Err(RouteError::Disconnected) => {
                *self.current.lock() = Arc::new(GraphSnapshot::default());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn build(&self) -> Result<GraphSnapshot, RouteError> {
        let ports = self.server.list_ports(None)?;
        let mut edges: Vec<Edge> = Vec::new();
        for port in &ports {
            if direction_of(local_of(port)) != PortDirection::Source {
                continue;
            }
            for peer in self.server.port_connections(port)? {
                let edge = Edge::new(port.clone(), peer);
                if !edges.contains(&edge) {
                    edges.push(edge);
                }
            }
        }
        Ok(GraphSnapshot::from_parts(ports, edges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::MockServer;

    #[test]
    fn test_client_kind_inference() {
        assert_eq!(ClientKind::infer("stereo_tool"), ClientKind::Processor);
        assert_eq!(
            ClientKind::infer("Stereo_Tool_GUI_64"),
            ClientKind::Processor
        );
        assert_eq!(ClientKind::infer("liquidsoap"), ClientKind::Streamer);
        assert_eq!(ClientKind::infer("icecast"), ClientKind::Streamer);
        assert_eq!(ClientKind::infer("system"), ClientKind::HardwareSystem);
        assert_eq!(ClientKind::infer("vlc_media_player"), ClientKind::Software);
        assert_eq!(ClientKind::infer("somethingelse"), ClientKind::Unknown);
    }

    #[test]
    fn test_port_name_rules() {
        assert!(is_source_name("capture_1"));
        assert!(is_source_name("playout_0L"));
        assert!(is_source_name("out_0"));
        assert!(is_source_name("master_L"));
        assert!(!is_source_name("record_0"));

        assert!(is_sink_name("record_0L"));
        assert!(is_sink_name("input_1"));
        assert!(is_sink_name("in_2"));

        assert!(is_record_name("record_0L"));
        assert!(is_record_name("input_1"));
        assert!(!is_record_name("playout_0L"));
    }

    #[test]
    fn test_direction_resolution_prefers_record_role() {
        // record_0L ends in L but is the input slot, not a source
        assert_eq!(direction_of("record_0L"), PortDirection::Sink);
        assert_eq!(direction_of("playout_0L"), PortDirection::Source);
        assert_eq!(direction_of("capture_1"), PortDirection::Source);
        assert_eq!(direction_of("in_1"), PortDirection::Sink);
        assert_eq!(direction_of("unclassifiable"), PortDirection::Sink);
    }

    #[test]
    fn test_qualified_name_split() {
        assert_eq!(client_of("rivendell_0:playout_0L"), "rivendell_0");
        assert_eq!(local_of("rivendell_0:playout_0L"), "playout_0L");
        assert_eq!(local_of("odd_name_without_colon"), "odd_name_without_colon");
    }

    #[test]
    fn test_snapshot_classification() {
        let ports = vec![
            "rivendell_0:playout_0L".to_string(),
            "rivendell_0:playout_0R".to_string(),
            "rivendell_0:record_0L".to_string(),
            "stereo_tool:in_1".to_string(),
            "stereo_tool:out_l".to_string(),
        ];
        let snap = GraphSnapshot::from_parts(ports, Vec::new());

        assert_eq!(snap.clients(), &["rivendell_0", "stereo_tool"]);
        assert_eq!(
            snap.source_ports_of("rivendell_0"),
            vec!["rivendell_0:playout_0L", "rivendell_0:playout_0R"]
        );
        assert_eq!(
            snap.record_ports_of("rivendell_0"),
            vec!["rivendell_0:record_0L"]
        );
        assert_eq!(snap.processors(), vec!["stereo_tool"]);
        assert_eq!(snap.source_host(), Some("rivendell_0"));
    }

    #[test]
    fn test_refresh_builds_edges_from_source_side() {
        let server = Arc::new(MockServer::new());
        server.add_client("vlc", &["out_0"]);
        server.add_client("rivendell_0", &["record_0L"]);
        server.wire("vlc:out_0", "rivendell_0:record_0L");

        let model = GraphModel::new(server);
        model.refresh().unwrap();

        let snap = model.snapshot();
        assert_eq!(
            snap.edges(),
            &[Edge::new("vlc:out_0", "rivendell_0:record_0L")]
        );
    }

    #[test]
    fn test_refresh_on_stopped_server_empties_snapshot() {
        let server = Arc::new(MockServer::new());
        server.add_client("vlc", &["out_0"]);

        let model = GraphModel::new(server.clone());
        model.refresh().unwrap();
        assert!(!model.snapshot().clients().is_empty());

        server.set_running(false);
        model.refresh().unwrap();
        assert!(model.snapshot().clients().is_empty());
        assert!(model.snapshot().edges().is_empty());
    }
}
