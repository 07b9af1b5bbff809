//! The routing controller.
//!
//! All mutations to the audio server pass through here. The controller
//! consumes the graph model and the critical-set registry to execute profile
//! activation, input-source switching, and safe disconnection, and publishes
//! events for every mutation it makes.
//!
//! Safe-mutation discipline: before disconnecting an edge, the critical set
//! is consulted against the live graph. A critical edge is skipped with a
//! logged warning, never bubbled up as a hard error; the surrounding
//! operation continues with the remaining work.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Instant;

use crate::config::DaemonConfig;
use crate::critical::CriticalSet;
use crate::event::{EventLog, RouteEvent};
use crate::graph::{client_of, direction_of, local_of, GraphModel, GraphSnapshot, PortDirection};
use crate::launcher::{KnownService, ServiceLauncher};
use crate::profile::ProfileStore;
use crate::server::AudioServer;
use crate::{RouteError, SwitchOutcome};

/// Peer-name substrings the controller recognizes as detachable input
/// sources. Anything else on a record port is preserved.
const DETACHABLE_PEER_HINTS: &[&str] = &["capture", "out", "vlc", "liquidsoap"];

/// A chain establishment scheduled by `load_profile`, waiting out the
/// settle delay.
#[derive(Debug, Clone)]
pub struct PendingActivation {
    /// Profile to activate.
    pub profile: String,
    /// When the settle delay elapses.
    pub due: Instant,
}

/// An input switch scheduled by the client monitor.
#[derive(Debug, Clone)]
pub struct PendingReroute {
    /// Client to attach.
    pub source: String,
    /// When the settle delay elapses.
    pub due: Instant,
}

/// Policy layer over the audio server.
///
/// Owns the process-wide routing state: current profile, priority table,
/// auto-connect blacklist, critical set, active input source, and the event
/// log. None of it is reachable except through this interface.
pub struct RoutingController {
    server: Arc<dyn AudioServer>,
    graph: GraphModel,
    critical: CriticalSet,
    store: ProfileStore,
    launcher: Arc<dyn ServiceLauncher>,
    events: Arc<EventLog>,
    config: DaemonConfig,
    current_profile: String,
    priorities: HashMap<String, i32>,
    blacklist: Vec<String>,
    active_input_source: Option<String>,
    pending_activation: Option<PendingActivation>,
    pending_reroute: Option<PendingReroute>,
}

impl RoutingController {
    /// Creates a controller with the default critical set.
    pub fn new(
        server: Arc<dyn AudioServer>,
        launcher: Arc<dyn ServiceLauncher>,
        store: ProfileStore,
        config: DaemonConfig,
    ) -> Self {
        Self {
            graph: GraphModel::new(server.clone()),
            server,
            critical: CriticalSet::with_defaults(),
            store,
            launcher,
            events: Arc::new(EventLog::new()),
            config,
            current_profile: crate::profile::DEFAULT_PROFILE.to_string(),
            priorities: HashMap::new(),
            blacklist: Vec::new(),
            active_input_source: None,
            pending_activation: None,
            pending_reroute: None,
        }
    }

    /// The event log; shared with IPC subscribers.
    pub fn events(&self) -> Arc<EventLog> {
        self.events.clone()
    }

    /// The underlying server facade.
    pub fn server(&self) -> Arc<dyn AudioServer> {
        self.server.clone()
    }

    /// The polled graph model.
    pub fn graph(&self) -> &GraphModel {
        &self.graph
    }

    /// The profile store.
    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    /// Mutable profile store access, for save/delete requests.
    pub fn store_mut(&mut self) -> &mut ProfileStore {
        &mut self.store
    }

    /// Daemon configuration.
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Name of the profile currently in force.
    pub fn current_profile(&self) -> &str {
        &self.current_profile
    }

    /// Client currently feeding the source host, if a switch completed.
    pub fn active_input_source(&self) -> Option<&str> {
        self.active_input_source.as_deref()
    }

    /// True when the client is on the auto-connect blacklist.
    pub fn is_blacklisted(&self, client: &str) -> bool {
        self.blacklist.iter().any(|b| b == client)
    }

    /// Protects every client whose name contains the substring.
    pub fn mark_client_critical(&mut self, substring: &str) {
        self.critical.mark_client_critical(substring);
    }

    /// Protects one explicit edge.
    pub fn mark_edge_critical(&mut self, source: &str, sink: &str) {
        self.critical.mark_edge_critical(source, sink);
    }

    /// Read access to the critical set.
    pub fn critical(&self) -> &CriticalSet {
        &self.critical
    }

    /// Sets one client's input priority, overwriting any prior value.
    pub fn set_input_priority(&mut self, client: &str, priority: i32) {
        tracing::info!(client, priority, "setting input priority");
        self.priorities.insert(client.to_string(), priority);
    }

    fn priority_of(&self, client: &str) -> i32 {
        self.priorities.get(client).copied().unwrap_or(0)
    }

    /// The broadcast playout client input switching targets: the one in the
    /// graph if present, the configured canonical name otherwise.
    pub fn source_host(&self) -> String {
        self.graph
            .snapshot()
            .source_host()
            .map(str::to_string)
            .unwrap_or_else(|| self.config.source_host.clone())
    }

    /// Activates a profile.
    ///
    /// Applies priorities, blacklists the processor and hardware clients,
    /// starts launchable auto-clients best-effort, and schedules chain
    /// establishment after the settle delay. A newly arriving activation
    /// supersedes a still-pending one.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::UnknownProfile`] if the store has no such
    /// profile. Every other condition degrades silently with log traces.
    pub async fn load_profile(&mut self, name: &str) -> Result<(), RouteError> {
        let profile = self
            .store
            .get(name)
            .cloned()
            .ok_or_else(|| RouteError::UnknownProfile {
                name: name.to_string(),
            })?;

        tracing::info!(profile = name, "loading profile");

        let processor = self.config.processor_client.clone();
        let hardware = self.config.hardware_client.clone();
        self.prevent_auto_connect(&processor);
        self.prevent_auto_connect(&hardware);

        for (client, priority) in &profile.priorities {
            self.priorities.insert(client.clone(), *priority);
        }

        if let Err(err) = self.graph.refresh() {
            tracing::warn!(?err, "could not survey ports before activation");
        }
        let snapshot = self.graph.snapshot();
        for auto_client in &profile.auto_clients {
            let Some(service) = KnownService::from_client_name(auto_client) else {
                continue;
            };
            if !self.launcher.supports(service) {
                continue;
            }
            let present = snapshot
                .clients()
                .iter()
                .any(|c| c.to_lowercase().contains(&auto_client.to_lowercase()));
            if present {
                tracing::info!(service = service.name(), "already registered with server");
                continue;
            }
            match self.launcher.start(service).await {
                Ok(()) => {
                    self.events.publish(RouteEvent::ServiceStatusChanged {
                        name: service.name().to_string(),
                        running: true,
                    });
                }
                Err(err) => {
                    tracing::warn!(?err, service = service.name(), "launch failed, continuing");
                }
            }
        }

        self.pending_activation = Some(PendingActivation {
            profile: name.to_string(),
            due: Instant::now() + self.config.settle_delay,
        });

        self.current_profile = name.to_string();
        self.events.publish(RouteEvent::ProfileChanged {
            name: name.to_string(),
        });
        Ok(())
    }

    /// When the pending chain establishment is due, if any.
    pub fn pending_activation_due(&self) -> Option<Instant> {
        self.pending_activation.as_ref().map(|p| p.due)
    }

    /// Runs the scheduled chain establishment and, for auto-activating
    /// profiles, the input auto-attach. No-op when nothing is pending.
    pub fn complete_activation(&mut self) {
        let Some(pending) = self.pending_activation.take() else {
            return;
        };
        if let Err(err) = self.graph.refresh() {
            tracing::warn!(?err, "graph refresh failed, skipping chain establishment");
            return;
        }

        self.establish_chain();

        let auto_activate = self
            .store
            .get(&pending.profile)
            .map(|p| p.auto_activate)
            .unwrap_or(false);
        if auto_activate {
            self.auto_attach_input();
        } else {
            tracing::info!(profile = %pending.profile, "manual input mode, leaving input untouched");
        }
    }

    /// Detects processors and streamers in the current snapshot and wires
    /// the broadcast chain, marking every chain edge critical.
    fn establish_chain(&mut self) {
        let snapshot = self.graph.snapshot();
        let processors: Vec<String> = snapshot.processors().iter().map(|s| s.to_string()).collect();
        let streamers: Vec<String> = snapshot.streamers().iter().map(|s| s.to_string()).collect();
        let source_host = self.source_host();

        tracing::info!(
            processors = ?processors,
            streamers = ?streamers,
            "establishing processing chain"
        );

        match processors.first() {
            Some(processor) => self.connect_chain_pair(&source_host, processor, &snapshot),
            None => tracing::info!("no processors detected, direct output available"),
        }

        match (processors.first(), streamers.first()) {
            (Some(processor), Some(streamer)) => {
                self.connect_chain_pair(processor, streamer, &snapshot);
            }
            (None, Some(streamer)) => {
                self.connect_chain_pair(&source_host, streamer, &snapshot);
            }
            _ => {}
        }
    }

    /// Connects source ports of `from` to sink ports of `to` index by index
    /// and protects the resulting edges. Existing identical edges count as
    /// success.
    fn connect_chain_pair(&mut self, from: &str, to: &str, snapshot: &GraphSnapshot) {
        let sources = snapshot.source_ports_of(from);
        let sinks = snapshot.sink_ports_of(to);

        for (source, sink) in sources.iter().zip(sinks.iter()) {
            match self.server.connect(source, sink) {
                Ok(()) => {
                    self.critical.mark_edge_critical(source, sink);
                    self.events.publish(RouteEvent::ConnectionChanged {
                        source: (*source).to_string(),
                        sink: (*sink).to_string(),
                        connected: true,
                    });
                    tracing::info!(source, sink, "chain edge connected");
                }
                Err(err) if err.is_desired_state() => {
                    self.critical.mark_edge_critical(source, sink);
                }
                Err(err) => {
                    tracing::warn!(?err, source, sink, "chain edge failed");
                }
            }
        }
    }

    /// Attaches the preferred input after activation: a `vlc`-matching
    /// client if one is present, otherwise nothing.
    fn auto_attach_input(&mut self) {
        let preferred = self
            .enumerate_input_sources()
            .into_iter()
            .find(|s| s.to_lowercase().contains("vlc"));
        match preferred {
            Some(source) => {
                let target = self.source_host();
                tracing::info!(%source, %target, "auto-attaching preferred input");
                if let Err(err) = self.switch_input(&source, &target) {
                    tracing::warn!(?err, "auto input attach failed");
                }
            }
            None => tracing::info!("no preferred input detected, input left for manual routing"),
        }
    }

    /// Changes which client feeds `target`'s input slot.
    ///
    /// Never touches any output of `target`, and never removes a critical
    /// edge. Peers the controller cannot classify are preserved: when it has
    /// not been told what a peer is, it errs on the side of keeping audio
    /// flowing.
    ///
    /// # Errors
    ///
    /// `NoSourcePorts`/`NoSinkPorts` when either side has nothing to wire,
    /// `Disconnected` when the server is unreachable.
    pub fn switch_input(
        &mut self,
        new_source: &str,
        target: &str,
    ) -> Result<SwitchOutcome, RouteError> {
        if !self.server.is_running() {
            return Err(RouteError::Disconnected);
        }
        tracing::info!(new_source, target, "switching input source");

        self.graph.refresh()?;
        let snapshot = self.graph.snapshot();

        let mut noncritical_disconnect_failed = false;
        for sink in snapshot.record_ports_of(target) {
            for peer in self.server.port_connections(sink)? {
                if self.critical.is_edge_critical(&peer, sink) {
                    tracing::warn!(%peer, sink, "protected: skipping critical connection");
                    continue;
                }
                let lower = peer.to_lowercase();
                if DETACHABLE_PEER_HINTS.iter().any(|h| lower.contains(h)) {
                    match self.server.disconnect(&peer, sink) {
                        Ok(()) => {
                            self.events.publish(RouteEvent::ConnectionChanged {
                                source: peer.clone(),
                                sink: sink.to_string(),
                                connected: false,
                            });
                            tracing::info!(%peer, sink, "cleared input");
                        }
                        Err(err) if err.is_desired_state() => {}
                        Err(err) => {
                            tracing::warn!(?err, %peer, sink, "input clear failed");
                            noncritical_disconnect_failed = true;
                        }
                    }
                } else {
                    tracing::info!(%peer, sink, "unknown source, preserving connection");
                }
            }
        }

        let sources = snapshot.source_ports_of(new_source);
        let sinks = snapshot.sink_ports_of(target);
        if sources.is_empty() {
            return Err(RouteError::NoSourcePorts {
                client: new_source.to_string(),
            });
        }
        if sinks.is_empty() {
            return Err(RouteError::NoSinkPorts {
                client: target.to_string(),
            });
        }

        let mut connected = 0usize;
        let mut failed: Vec<(String, String)> = Vec::new();
        for (source, sink) in sources.iter().zip(sinks.iter()) {
            match self.server.connect(source, sink) {
                Ok(()) => {
                    connected += 1;
                    self.events.publish(RouteEvent::ConnectionChanged {
                        source: (*source).to_string(),
                        sink: (*sink).to_string(),
                        connected: true,
                    });
                    tracing::info!(source, sink, "input connected");
                }
                Err(err) if err.is_desired_state() => {
                    connected += 1;
                }
                Err(err) => {
                    tracing::warn!(?err, source, sink, "input connect failed");
                    failed.push(((*source).to_string(), (*sink).to_string()));
                }
            }
        }

        if failed.is_empty() {
            self.active_input_source = Some(new_source.to_string());
            tracing::info!(new_source, "input switched");
            Ok(SwitchOutcome::Switched)
        } else {
            if connected > 0 && !noncritical_disconnect_failed {
                self.active_input_source = Some(new_source.to_string());
            }
            Ok(SwitchOutcome::Partial { failed })
        }
    }

    /// Blacklists a client from monitor-driven auto-connection and clears
    /// its existing non-critical peers.
    pub fn prevent_auto_connect(&mut self, client: &str) {
        if !self.is_blacklisted(client) {
            tracing::info!(client, "adding to auto-connect blacklist");
            self.blacklist.push(client.to_string());
        }
        match self.disconnect_all_from(client) {
            Ok(()) => {}
            Err(RouteError::RefusedCritical { .. }) => {
                // Protected clients keep their wiring; the blacklist entry
                // still applies.
            }
            Err(err) => tracing::debug!(?err, client, "blacklist clear skipped"),
        }
    }

    /// All clients with at least one source port, best input first:
    /// descending priority, ties broken lexicographically.
    pub fn enumerate_input_sources(&self) -> Vec<String> {
        let snapshot = self.graph.snapshot();
        let mut sources: Vec<String> = snapshot
            .clients()
            .iter()
            .filter(|c| !snapshot.source_ports_of(c).is_empty())
            .cloned()
            .collect();
        sources.sort_by(|a, b| {
            self.priority_of(b)
                .cmp(&self.priority_of(a))
                .then_with(|| a.cmp(b))
        });
        sources
    }

    /// The client currently feeding `target`'s sink ports, if any.
    pub fn current_input_source(&self, target: &str) -> Option<String> {
        let snapshot = self.graph.snapshot();
        for sink in snapshot.sink_ports_of(target) {
            match self.server.port_connections(sink) {
                Ok(peers) => {
                    if let Some(peer) = peers.first() {
                        return Some(client_of(peer).to_string());
                    }
                }
                Err(err) => {
                    tracing::debug!(?err, sink, "peer listing failed");
                    return None;
                }
            }
        }
        None
    }

    /// Disconnects every non-critical edge touching the client.
    ///
    /// # Errors
    ///
    /// `RefusedCritical` when the client itself is protected, `Disconnected`
    /// when the server is unreachable.
    pub fn disconnect_all_from(&mut self, client: &str) -> Result<(), RouteError> {
        if self.critical.is_client_critical(client) {
            tracing::warn!(client, "refusing to disconnect protected client");
            return Err(RouteError::RefusedCritical {
                client: client.to_string(),
            });
        }

        tracing::info!(client, "clearing non-critical connections");
        let ports = self.server.list_ports(Some(client))?;
        for port in &ports {
            for peer in self.server.port_connections(port)? {
                let (source, sink) = match direction_of(local_of(port)) {
                    PortDirection::Source => (port.clone(), peer),
                    PortDirection::Sink => (peer, port.clone()),
                };
                self.safe_disconnect(&source, &sink);
            }
        }
        Ok(())
    }

    /// Disconnects one edge under the safe-mutation discipline. Returns
    /// true when an edge was actually removed.
    fn safe_disconnect(&mut self, source: &str, sink: &str) -> bool {
        if self.critical.is_edge_critical(source, sink) {
            tracing::warn!(source, sink, "protected: skipping critical connection");
            return false;
        }
        match self.server.disconnect(source, sink) {
            Ok(()) => {
                self.events.publish(RouteEvent::ConnectionChanged {
                    source: source.to_string(),
                    sink: sink.to_string(),
                    connected: false,
                });
                true
            }
            Err(err) if err.is_desired_state() => false,
            Err(err) => {
                tracing::warn!(?err, source, sink, "disconnect failed");
                false
            }
        }
    }

    /// Tears down every edge unconditionally, critical marks included.
    /// Operator-initiated last resort; reactivation requires an explicit
    /// `load_profile`.
    pub fn emergency_disconnect(&mut self) {
        tracing::warn!("emergency disconnect: tearing down all connections");
        if let Err(err) = self.graph.refresh() {
            tracing::warn!(?err, "graph refresh failed before emergency disconnect");
        }
        let snapshot = self.graph.snapshot();
        for edge in snapshot.edges() {
            match self.server.disconnect(&edge.source, &edge.sink) {
                Ok(()) => {
                    self.events.publish(RouteEvent::ConnectionChanged {
                        source: edge.source.clone(),
                        sink: edge.sink.clone(),
                        connected: false,
                    });
                }
                Err(err) if err.is_desired_state() => {}
                Err(err) => {
                    tracing::warn!(?err, source = %edge.source, sink = %edge.sink, "teardown failed");
                }
            }
        }
        self.active_input_source = None;
        if let Err(err) = self.graph.refresh() {
            tracing::warn!(?err, "graph refresh failed after emergency disconnect");
        }
    }

    /// Schedules an input switch to `source` after the reroute settle
    /// delay. Called by the client monitor; a newer schedule supersedes a
    /// pending one.
    pub fn schedule_reroute(&mut self, source: &str) {
        self.pending_reroute = Some(PendingReroute {
            source: source.to_string(),
            due: Instant::now() + self.config.reroute_delay,
        });
    }

    /// When the pending reroute is due, if any.
    pub fn pending_reroute_due(&self) -> Option<Instant> {
        self.pending_reroute.as_ref().map(|p| p.due)
    }

    /// Runs the scheduled input switch. No-op when nothing is pending.
    pub fn complete_reroute(&mut self) {
        let Some(pending) = self.pending_reroute.take() else {
            return;
        };
        let target = self.source_host();
        match self.switch_input(&pending.source, &target) {
            Ok(outcome) if outcome.is_complete() => {
                tracing::info!(source = %pending.source, "auto-routed new input");
            }
            Ok(SwitchOutcome::Partial { failed }) => {
                tracing::warn!(source = %pending.source, ?failed, "auto-route partially failed");
            }
            Err(err) => {
                tracing::warn!(?err, source = %pending.source, "auto-route failed");
            }
        }
    }

    /// Reaction to the active input source vanishing: log alternatives,
    /// never auto-swap. Whether to re-wire is an operator decision.
    pub fn note_source_departed(&mut self, client: &str) {
        if self.active_input_source.as_deref() != Some(client) {
            return;
        }
        self.active_input_source = None;
        let alternatives = self.enumerate_input_sources();
        if alternatives.is_empty() {
            tracing::warn!(client, "active input source disconnected, no alternatives");
        } else {
            tracing::warn!(
                client,
                ?alternatives,
                "active input source disconnected, alternatives available"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::MockLauncher;
    use crate::server::MockServer;
    use tempfile::tempdir;

    fn controller_with(server: Arc<MockServer>) -> RoutingController {
        let dir = tempdir().unwrap();
        let store = ProfileStore::open(dir.path().join("jack-profiles.xml"));
        RoutingController::new(
            server,
            Arc::new(MockLauncher::new()),
            store,
            DaemonConfig::default(),
        )
    }

    fn broadcast_server() -> Arc<MockServer> {
        let server = Arc::new(MockServer::new());
        server.add_client(
            "rivendell_0",
            &["playout_0L", "playout_0R", "record_0L", "record_0R"],
        );
        server.add_client("system", &["capture_1", "capture_2"]);
        server
    }

    #[tokio::test]
    async fn test_load_profile_unknown_name() {
        let server = broadcast_server();
        let mut ctrl = controller_with(server);
        let err = ctrl.load_profile("nope").await.unwrap_err();
        assert!(matches!(err, RouteError::UnknownProfile { .. }));
        assert_eq!(ctrl.current_profile(), "default");
    }

    #[tokio::test]
    async fn test_load_profile_records_and_blacklists() {
        let server = broadcast_server();
        let mut ctrl = controller_with(server);

        ctrl.load_profile("live-broadcast").await.unwrap();
        assert_eq!(ctrl.current_profile(), "live-broadcast");
        assert!(ctrl.is_blacklisted("stereo_tool"));
        assert!(ctrl.is_blacklisted("system"));
        assert!(ctrl.pending_activation_due().is_some());

        let events = ctrl.events().events_since(0);
        assert!(events.iter().any(|e| matches!(
            &e.event,
            RouteEvent::ProfileChanged { name } if name == "live-broadcast"
        )));
    }

    #[tokio::test]
    async fn test_new_load_profile_supersedes_pending_activation() {
        let server = broadcast_server();
        let mut ctrl = controller_with(server);

        ctrl.load_profile("live-broadcast").await.unwrap();
        let first_due = ctrl.pending_activation_due().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        ctrl.load_profile("default").await.unwrap();
        let second_due = ctrl.pending_activation_due().unwrap();
        assert!(second_due >= first_due);
        assert_eq!(ctrl.current_profile(), "default");
    }

    #[test]
    fn test_switch_input_replaces_input_and_keeps_chain() {
        // Scenario: live playout chain present, record fed by vlc, switch
        // the input to the hardware client.
        let server = broadcast_server();
        server.add_client("stereo_tool", &["in_1", "in_2", "out_l", "out_r"]);
        server.add_client("vlc_media_player", &["out_0", "out_1"]);
        server.wire("rivendell_0:playout_0L", "stereo_tool:in_1");
        server.wire("rivendell_0:playout_0R", "stereo_tool:in_2");
        server.wire("vlc_media_player:out_0", "rivendell_0:record_0L");
        server.wire("vlc_media_player:out_1", "rivendell_0:record_0R");

        let mut ctrl = controller_with(server.clone());
        let outcome = ctrl.switch_input("system", "rivendell_0").unwrap();
        assert_eq!(outcome, SwitchOutcome::Switched);

        // The playout chain is untouched, the record feed is replaced.
        assert!(server.has_edge("rivendell_0:playout_0L", "stereo_tool:in_1"));
        assert!(server.has_edge("rivendell_0:playout_0R", "stereo_tool:in_2"));
        assert!(!server.has_edge("vlc_media_player:out_0", "rivendell_0:record_0L"));
        assert!(server.has_edge("system:capture_1", "rivendell_0:record_0L"));
        assert!(server.has_edge("system:capture_2", "rivendell_0:record_0R"));
        assert_eq!(ctrl.active_input_source(), Some("system"));
    }

    #[test]
    fn test_switch_input_preserves_unknown_peer() {
        let server = broadcast_server();
        server.add_client("mystery", &["feed_a"]);
        server.wire("mystery:feed_a", "rivendell_0:record_0L");

        let mut ctrl = controller_with(server.clone());
        ctrl.switch_input("system", "rivendell_0").unwrap();

        // The unclassifiable peer survives; the new source is wired anyway.
        assert!(server.has_edge("mystery:feed_a", "rivendell_0:record_0L"));
        assert!(server.has_edge("system:capture_1", "rivendell_0:record_0L"));
    }

    #[test]
    fn test_switch_input_no_source_ports() {
        let server = broadcast_server();
        server.add_client("silent", &["in_only"]);

        let mut ctrl = controller_with(server);
        let err = ctrl.switch_input("silent", "rivendell_0").unwrap_err();
        assert!(matches!(err, RouteError::NoSourcePorts { .. }));
    }

    #[test]
    fn test_switch_input_partial_keeps_failed_pairs() {
        let server = broadcast_server();
        server.fail_connect("system:capture_2", "rivendell_0:record_0R");

        let mut ctrl = controller_with(server);
        let outcome = ctrl.switch_input("system", "rivendell_0").unwrap();
        match outcome {
            SwitchOutcome::Partial { failed } => {
                assert_eq!(
                    failed,
                    vec![(
                        "system:capture_2".to_string(),
                        "rivendell_0:record_0R".to_string()
                    )]
                );
            }
            other => panic!("expected partial outcome, got {other:?}"),
        }
        // One pair landed, no non-critical disconnect failed: still active.
        assert_eq!(ctrl.active_input_source(), Some("system"));
    }

    #[test]
    fn test_switch_input_disconnected_server() {
        let server = broadcast_server();
        server.set_running(false);
        let mut ctrl = controller_with(server);
        assert!(matches!(
            ctrl.switch_input("system", "rivendell_0"),
            Err(RouteError::Disconnected)
        ));
    }

    #[test]
    fn test_disconnect_all_from_refuses_critical() {
        let server = broadcast_server();
        server.add_client("stereo_tool", &["in_1", "out_l"]);
        server.wire("rivendell_0:playout_0L", "stereo_tool:in_1");

        let mut ctrl = controller_with(server.clone());
        let err = ctrl.disconnect_all_from("stereo_tool").unwrap_err();
        assert!(matches!(err, RouteError::RefusedCritical { .. }));
        assert_eq!(server.edges().len(), 1);
    }

    #[test]
    fn test_disconnect_all_from_spares_critical_edges() {
        let server = broadcast_server();
        server.add_client("stereo_tool", &["in_1"]);
        server.add_client("aux_player", &["out_0"]);
        server.wire("aux_player:out_0", "rivendell_0:record_0L");
        server.wire("rivendell_0:playout_0L", "stereo_tool:in_1");

        let mut ctrl = controller_with(server.clone());
        ctrl.disconnect_all_from("rivendell_0").unwrap();

        // Playout edge is critical (chain pattern), record feed is not.
        assert!(server.has_edge("rivendell_0:playout_0L", "stereo_tool:in_1"));
        assert!(!server.has_edge("aux_player:out_0", "rivendell_0:record_0L"));
    }

    #[test]
    fn test_enumerate_input_sources_priority_then_name() {
        let server = broadcast_server();
        server.add_client("vlc_media_player", &["out_0"]);
        server.add_client("aux_player", &["out_0"]);
        server.add_client("listener", &["in_only"]);

        let mut ctrl = controller_with(server);
        ctrl.graph().refresh().unwrap();
        ctrl.set_input_priority("system", 100);
        ctrl.set_input_priority("vlc_media_player", 80);

        let sources = ctrl.enumerate_input_sources();
        assert_eq!(
            sources,
            vec!["system", "vlc_media_player", "aux_player", "rivendell_0"]
        );
        // Idempotent between refreshes.
        assert_eq!(ctrl.enumerate_input_sources(), sources);
    }

    #[test]
    fn test_emergency_disconnect_ignores_critical_marks() {
        let server = broadcast_server();
        server.add_client("stereo_tool", &["in_1", "in_2", "out_l"]);
        server.add_client("liquidsoap", &["in_0"]);
        server.wire("rivendell_0:playout_0L", "stereo_tool:in_1");
        server.wire("rivendell_0:playout_0R", "stereo_tool:in_2");
        server.wire("stereo_tool:out_l", "liquidsoap:in_0");
        server.wire("system:capture_1", "rivendell_0:record_0L");
        server.wire("system:capture_2", "rivendell_0:record_0R");

        let mut ctrl = controller_with(server.clone());
        ctrl.emergency_disconnect();

        assert!(server.edges().is_empty());
        assert!(ctrl.graph().snapshot().edges().is_empty());
        assert_eq!(ctrl.active_input_source(), None);
        // The profile name survives; only the wiring is gone.
        assert_eq!(ctrl.current_profile(), "default");
    }

    #[tokio::test]
    async fn test_chain_establishment_marks_edges_critical() {
        let server = broadcast_server();
        server.add_client("stereo_tool", &["in_1", "in_2", "out_l", "out_r"]);
        server.add_client("liquidsoap", &["in_0", "in_1"]);

        let mut ctrl = controller_with(server.clone());
        ctrl.load_profile("live-broadcast").await.unwrap();
        ctrl.complete_activation();

        assert!(server.has_edge("rivendell_0:playout_0L", "stereo_tool:in_1"));
        assert!(server.has_edge("rivendell_0:playout_0R", "stereo_tool:in_2"));
        assert!(server.has_edge("stereo_tool:out_l", "liquidsoap:in_0"));
        assert!(server.has_edge("stereo_tool:out_r", "liquidsoap:in_1"));
        assert!(ctrl
            .critical()
            .is_edge_critical("rivendell_0:playout_0L", "stereo_tool:in_1"));
    }

    #[test]
    fn test_note_source_departed_clears_active() {
        let server = broadcast_server();
        server.add_client("vlc_media_player", &["out_0", "out_1"]);

        let mut ctrl = controller_with(server.clone());
        ctrl.switch_input("vlc_media_player", "rivendell_0")
            .unwrap();
        assert_eq!(ctrl.active_input_source(), Some("vlc_media_player"));

        server.remove_client("vlc_media_player");
        ctrl.graph().refresh().unwrap();
        ctrl.note_source_departed("vlc_media_player");
        assert_eq!(ctrl.active_input_source(), None);
    }
}
