//! Audio-server facade.
//!
//! This module is the only place that touches the audio server's native API.
//! Everything above it (graph model, routing controller, client monitor)
//! works against the [`AudioServer`] trait, which keeps the policy code
//! testable without a running server.

mod jack;
mod mock;

pub use jack::JackServer;
pub use mock::MockServer;

use crate::RouteError;

/// Minimal, honest interface to the audio server.
///
/// Implementations maintain at most one long-lived session. After the
/// session is lost, every call returns [`RouteError::Disconnected`] until the
/// status poller observes the server back and calls [`refresh_session`].
///
/// All port names are qualified (`client:port_local`) UTF-8 strings, in the
/// server's reported order, which is stable for a given session.
///
/// [`refresh_session`]: AudioServer::refresh_session
pub trait AudioServer: Send + Sync {
    /// Attempts a no-autostart test connection; true iff it succeeds.
    fn is_running(&self) -> bool;

    /// Every known qualified port name, optionally filtered to one client.
    fn list_ports(&self, client: Option<&str>) -> Result<Vec<String>, RouteError>;

    /// Connects a source port to a sink port.
    fn connect(&self, source: &str, sink: &str) -> Result<(), RouteError>;

    /// Disconnects a source port from a sink port.
    fn disconnect(&self, source: &str, sink: &str) -> Result<(), RouteError>;

    /// Peers of the given port, in server order.
    fn port_connections(&self, port: &str) -> Result<Vec<String>, RouteError>;

    /// Unique client names, derived by splitting every port name at the
    /// first `:`. Order follows the port list.
    fn list_clients(&self) -> Result<Vec<String>, RouteError> {
        let mut clients: Vec<String> = Vec::new();
        for port in self.list_ports(None)? {
            let client = port.split(':').next().unwrap_or(&port);
            if !clients.iter().any(|c| c == client) {
                clients.push(client.to_string());
            }
        }
        Ok(clients)
    }

    /// Called by the status poller when the server's reachability changes:
    /// opens a fresh session when the server is back, drops the stale one
    /// when it is gone. Backends without session state ignore this.
    fn refresh_session(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_clients_derived_from_ports() {
        let server = MockServer::new();
        server.add_client("rivendell_0", &["playout_0L", "playout_0R", "record_0L"]);
        server.add_client("system", &["capture_1", "capture_2"]);

        let clients = server.list_clients().unwrap();
        assert_eq!(clients, vec!["rivendell_0", "system"]);
    }
}
