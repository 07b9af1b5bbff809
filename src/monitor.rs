//! Client monitor.
//!
//! A periodic task that diffs successive graph snapshots, detects
//! newly-appeared and newly-departed clients, and invokes the routing
//! controller's reaction policy. The monitor never connects or disconnects
//! anything itself; every mutation goes through the controller.
//!
//! Polling is the authoritative change source. Server-side change
//! notifications, where present, are at best a wakeup hint: they are not a
//! complete history and are not consulted here.

use crate::controller::RoutingController;
use crate::event::RouteEvent;

/// Diffs client sets between ticks and reacts to changes.
pub struct ClientMonitor {
    previous: Vec<String>,
}

impl ClientMonitor {
    /// Creates a monitor with no observed clients.
    pub fn new() -> Self {
        Self {
            previous: Vec::new(),
        }
    }

    /// Runs one observation cycle against the controller's current
    /// snapshot. The caller refreshes the graph first.
    ///
    /// While the server is down the previous client set is kept, so a
    /// server restart is not misread as every client departing.
    pub fn tick(&mut self, controller: &mut RoutingController) {
        if !controller.server().is_running() {
            return;
        }

        let snapshot = controller.graph().snapshot();
        let current: Vec<String> = snapshot.clients().to_vec();
        let events = controller.events();

        for client in &current {
            if !self.previous.contains(client) {
                tracing::info!(%client, "new client detected");
                events.publish(RouteEvent::ClientAppeared {
                    name: client.clone(),
                });
                Self::react_to_appearance(client, controller);
            }
        }

        for client in &self.previous {
            if !current.contains(client) {
                tracing::info!(%client, "client disconnected");
                events.publish(RouteEvent::ClientDisappeared {
                    name: client.clone(),
                });
                controller.note_source_departed(client);
            }
        }

        self.previous = current;
    }

    fn react_to_appearance(client: &str, controller: &mut RoutingController) {
        let lower = client.to_lowercase();

        if lower.contains("vlc") {
            if controller.is_blacklisted(client) {
                tracing::info!(client, "blacklisted, not auto-routing");
                return;
            }
            let target = controller.source_host();
            match controller.current_input_source(&target) {
                Some(active) if !active.to_lowercase().contains("vlc") => {
                    tracing::info!(
                        client,
                        %active,
                        "player available but another input is active, not auto-routing"
                    );
                }
                _ => {
                    tracing::info!(client, "auto-routing media player to broadcast input");
                    controller.schedule_reroute(client);
                }
            }
        } else if lower.contains("stereo_tool") {
            tracing::info!(client, "processor connected, preventing auto-capture routing");
            controller.prevent_auto_connect(client);
        } else if lower.contains("system") {
            tracing::info!(client, "hardware audio available, awaiting operator routing");
        } else {
            tracing::info!(client, "monitoring only");
        }
    }
}

impl Default for ClientMonitor {
    fn default() -> Self {
        Self::new()
    }
}
