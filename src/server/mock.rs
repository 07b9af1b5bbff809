//! Mock audio server for testing without a running server.
//!
//! Keeps an ordered port registry and an edge set in memory, and lets tests
//! script client appearance, disappearance, and connect/disconnect failures.

use std::collections::HashSet;

use parking_lot::Mutex;

use super::AudioServer;
use crate::RouteError;

#[derive(Default)]
struct MockState {
    running: bool,
    /// Qualified port names in registration order.
    ports: Vec<String>,
    /// Edges in creation order.
    edges: Vec<(String, String)>,
    fail_connect: HashSet<(String, String)>,
    fail_disconnect: HashSet<(String, String)>,
    connect_log: Vec<(String, String)>,
    disconnect_log: Vec<(String, String)>,
}

/// An in-memory audio server.
///
/// # Example
///
/// ```
/// use airpatch::server::{AudioServer, MockServer};
///
/// let server = MockServer::new();
/// server.add_client("vlc", &["out_0", "out_1"]);
/// server.add_client("rivendell_0", &["record_0L", "record_0R"]);
///
/// server.connect("vlc:out_0", "rivendell_0:record_0L").unwrap();
/// assert_eq!(
///     server.port_connections("vlc:out_0").unwrap(),
///     vec!["rivendell_0:record_0L".to_string()]
/// );
/// ```
pub struct MockServer {
    state: Mutex<MockState>,
}

impl MockServer {
    /// Creates a mock server that reports itself running.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                running: true,
                ..MockState::default()
            }),
        }
    }

    /// Registers a client with the given local port names, in order.
    pub fn add_client(&self, client: &str, ports: &[&str]) {
        let mut state = self.state.lock();
        for port in ports {
            let qualified = format!("{client}:{port}");
            if !state.ports.contains(&qualified) {
                state.ports.push(qualified);
            }
        }
    }

    /// Removes a client, its ports, and every incident edge.
    pub fn remove_client(&self, client: &str) {
        let prefix = format!("{client}:");
        let mut state = self.state.lock();
        state.ports.retain(|p| !p.starts_with(&prefix));
        state
            .edges
            .retain(|(s, d)| !s.starts_with(&prefix) && !d.starts_with(&prefix));
    }

    /// Inserts an edge directly, bypassing the connect path.
    pub fn wire(&self, source: &str, sink: &str) {
        let mut state = self.state.lock();
        let edge = (source.to_string(), sink.to_string());
        if !state.edges.contains(&edge) {
            state.edges.push(edge);
        }
    }

    /// Current edge set in creation order.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.state.lock().edges.clone()
    }

    /// True if the edge exists.
    pub fn has_edge(&self, source: &str, sink: &str) -> bool {
        self.state
            .lock()
            .edges
            .iter()
            .any(|(s, d)| s == source && d == sink)
    }

    /// Sets the reported server status.
    pub fn set_running(&self, running: bool) {
        let mut state = self.state.lock();
        state.running = running;
        if !running {
            state.ports.clear();
            state.edges.clear();
        }
    }

    /// Makes a specific connect attempt fail with a backend error.
    pub fn fail_connect(&self, source: &str, sink: &str) {
        self.state
            .lock()
            .fail_connect
            .insert((source.to_string(), sink.to_string()));
    }

    /// Makes a specific disconnect attempt fail with a backend error.
    pub fn fail_disconnect(&self, source: &str, sink: &str) {
        self.state
            .lock()
            .fail_disconnect
            .insert((source.to_string(), sink.to_string()));
    }

    /// Every `(source, sink)` pair passed to `connect`, in call order.
    pub fn connect_calls(&self) -> Vec<(String, String)> {
        self.state.lock().connect_log.clone()
    }

    /// Every `(source, sink)` pair passed to `disconnect`, in call order.
    pub fn disconnect_calls(&self) -> Vec<(String, String)> {
        self.state.lock().disconnect_log.clone()
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioServer for MockServer {
    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn list_ports(&self, client: Option<&str>) -> Result<Vec<String>, RouteError> {
        let state = self.state.lock();
        if !state.running {
            return Err(RouteError::Disconnected);
        }
        let ports = match client {
            Some(c) => {
                let prefix = format!("{c}:");
                state
                    .ports
                    .iter()
                    .filter(|p| p.starts_with(&prefix))
                    .cloned()
                    .collect()
            }
            None => state.ports.clone(),
        };
        Ok(ports)
    }

    fn connect(&self, source: &str, sink: &str) -> Result<(), RouteError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(RouteError::Disconnected);
        }
        state
            .connect_log
            .push((source.to_string(), sink.to_string()));

        for port in [source, sink] {
            if !state.ports.iter().any(|p| p == port) {
                return Err(RouteError::UnknownPort {
                    port: port.to_string(),
                });
            }
        }
        let edge = (source.to_string(), sink.to_string());
        if state.fail_connect.contains(&edge) {
            return Err(RouteError::Backend("injected connect failure".to_string()));
        }
        if state.edges.contains(&edge) {
            return Err(RouteError::AlreadyConnected {
                source: source.to_string(),
                sink: sink.to_string(),
            });
        }
        state.edges.push(edge);
        Ok(())
    }

    fn disconnect(&self, source: &str, sink: &str) -> Result<(), RouteError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(RouteError::Disconnected);
        }
        state
            .disconnect_log
            .push((source.to_string(), sink.to_string()));

        for port in [source, sink] {
            if !state.ports.iter().any(|p| p == port) {
                return Err(RouteError::UnknownPort {
                    port: port.to_string(),
                });
            }
        }
        let edge = (source.to_string(), sink.to_string());
        if state.fail_disconnect.contains(&edge) {
            return Err(RouteError::Backend(
                "injected disconnect failure".to_string(),
            ));
        }
        let before = state.edges.len();
        state.edges.retain(|e| *e != edge);
        if state.edges.len() == before {
            return Err(RouteError::NotConnected {
                source: source.to_string(),
                sink: sink.to_string(),
            });
        }
        Ok(())
    }

    fn port_connections(&self, port: &str) -> Result<Vec<String>, RouteError> {
        let state = self.state.lock();
        if !state.running {
            return Err(RouteError::Disconnected);
        }
        if !state.ports.iter().any(|p| p == port) {
            return Err(RouteError::UnknownPort {
                port: port.to_string(),
            });
        }
        let mut peers = Vec::new();
        for (s, d) in &state.edges {
            if s == port {
                peers.push(d.clone());
            } else if d == port {
                peers.push(s.clone());
            }
        }
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_and_disconnect_round_trip() {
        let server = MockServer::new();
        server.add_client("a", &["out"]);
        server.add_client("b", &["in"]);

        server.connect("a:out", "b:in").unwrap();
        assert!(server.has_edge("a:out", "b:in"));

        server.disconnect("a:out", "b:in").unwrap();
        assert!(!server.has_edge("a:out", "b:in"));
    }

    #[test]
    fn test_double_connect_is_already_connected() {
        let server = MockServer::new();
        server.add_client("a", &["out"]);
        server.add_client("b", &["in"]);

        server.connect("a:out", "b:in").unwrap();
        assert!(matches!(
            server.connect("a:out", "b:in"),
            Err(RouteError::AlreadyConnected { .. })
        ));
    }

    #[test]
    fn test_unknown_port() {
        let server = MockServer::new();
        server.add_client("a", &["out"]);
        assert!(matches!(
            server.connect("a:out", "ghost:in"),
            Err(RouteError::UnknownPort { .. })
        ));
    }

    #[test]
    fn test_stopped_server_is_disconnected() {
        let server = MockServer::new();
        server.add_client("a", &["out"]);
        server.set_running(false);
        assert!(matches!(
            server.list_ports(None),
            Err(RouteError::Disconnected)
        ));
    }

    #[test]
    fn test_remove_client_drops_incident_edges() {
        let server = MockServer::new();
        server.add_client("vlc", &["out_0"]);
        server.add_client("rivendell_0", &["record_0L"]);
        server.connect("vlc:out_0", "rivendell_0:record_0L").unwrap();

        server.remove_client("vlc");
        assert!(server.edges().is_empty());
        assert_eq!(server.list_ports(None).unwrap().len(), 1);
    }

    #[test]
    fn test_injected_connect_failure() {
        let server = MockServer::new();
        server.add_client("a", &["out"]);
        server.add_client("b", &["in"]);
        server.fail_connect("a:out", "b:in");
        assert!(matches!(
            server.connect("a:out", "b:in"),
            Err(RouteError::Backend(_))
        ));
        assert!(!server.has_edge("a:out", "b:in"));
    }
}
