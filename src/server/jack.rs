//! JACK-backed implementation of the audio-server facade.
//!
//! Uses a single long-lived JACK client (`NO_START_SERVER`) for queries and
//! patching. Reachability probes open and immediately close a throwaway
//! client so the daemon never autostarts a server behind the operator's
//! back.

use jack::{Client, ClientOptions, PortFlags};
use parking_lot::Mutex;

use super::AudioServer;
use crate::RouteError;

/// Client name registered with the JACK server for the long-lived session.
const SESSION_NAME: &str = "airpatch";

/// Client name used for reachability probes.
const PROBE_NAME: &str = "airpatch_probe";

/// Facade over a JACK server.
pub struct JackServer {
    session: Mutex<Option<Client>>,
}

impl JackServer {
    /// Creates the facade without opening a session. The first
    /// [`refresh_session`](AudioServer::refresh_session) after the server is
    /// observed running opens it.
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&Client) -> Result<T, RouteError>,
    ) -> Result<T, RouteError> {
        let session = self.session.lock();
        match session.as_ref() {
            Some(client) => f(client),
            None => Err(RouteError::Disconnected),
        }
    }
}

impl Default for JackServer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioServer for JackServer {
    fn is_running(&self) -> bool {
        match Client::new(PROBE_NAME, ClientOptions::NO_START_SERVER) {
            Ok((client, _status)) => {
                drop(client);
                true
            }
            Err(err) => {
                tracing::debug!(?err, "audio server probe failed");
                false
            }
        }
    }

    fn list_ports(&self, client: Option<&str>) -> Result<Vec<String>, RouteError> {
        self.with_session(|session| {
            let pattern = client.map(|c| format!("^{}:", regex_escape(c)));
            Ok(session.ports(pattern.as_deref(), None, PortFlags::empty()))
        })
    }

    fn connect(&self, source: &str, sink: &str) -> Result<(), RouteError> {
        self.with_session(|session| {
            let src = session
                .port_by_name(source)
                .ok_or_else(|| RouteError::UnknownPort {
                    port: source.to_string(),
                })?;
            session
                .port_by_name(sink)
                .ok_or_else(|| RouteError::UnknownPort {
                    port: sink.to_string(),
                })?;

            if src
                .is_connected_to(sink)
                .map_err(|e| RouteError::Backend(e.to_string()))?
            {
                return Err(RouteError::AlreadyConnected {
                    source: source.to_string(),
                    sink: sink.to_string(),
                });
            }

            session
                .connect_ports_by_name(source, sink)
                .map_err(|e| RouteError::Backend(e.to_string()))
        })
    }

    fn disconnect(&self, source: &str, sink: &str) -> Result<(), RouteError> {
        self.with_session(|session| {
            let src = session
                .port_by_name(source)
                .ok_or_else(|| RouteError::UnknownPort {
                    port: source.to_string(),
                })?;
            session
                .port_by_name(sink)
                .ok_or_else(|| RouteError::UnknownPort {
                    port: sink.to_string(),
                })?;

            if !src
                .is_connected_to(sink)
                .map_err(|e| RouteError::Backend(e.to_string()))?
            {
                return Err(RouteError::NotConnected {
                    source: source.to_string(),
                    sink: sink.to_string(),
                });
            }

            session
                .disconnect_ports_by_name(source, sink)
                .map_err(|e| RouteError::Backend(e.to_string()))
        })
    }

    fn port_connections(&self, port: &str) -> Result<Vec<String>, RouteError> {
        self.with_session(|session| {
            let subject = session
                .port_by_name(port)
                .ok_or_else(|| RouteError::UnknownPort {
                    port: port.to_string(),
                })?;

            let mut peers = Vec::new();
            for candidate in session.ports(None, None, PortFlags::empty()) {
                if candidate == port {
                    continue;
                }
                match subject.is_connected_to(&candidate) {
                    Ok(true) => peers.push(candidate),
                    Ok(false) => {}
                    Err(e) => return Err(RouteError::Backend(e.to_string())),
                }
            }
            Ok(peers)
        })
    }

    fn refresh_session(&self) {
        let running = self.is_running();
        let mut session = self.session.lock();
        match (running, session.is_some()) {
            (true, false) => match Client::new(SESSION_NAME, ClientOptions::NO_START_SERVER) {
                Ok((client, _status)) => {
                    tracing::info!(name = client.name(), "audio server session opened");
                    *session = Some(client);
                }
                Err(err) => {
                    tracing::warn!(?err, "could not open audio server session");
                }
            },
            (false, true) => {
                tracing::warn!("audio server lost, dropping session");
                *session = None;
            }
            _ => {}
        }
    }
}

/// Escapes a client name for use in the server's regex port filter.
fn regex_escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if !ch.is_alphanumeric() && ch != '_' && ch != '-' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
