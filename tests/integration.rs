//! End-to-end routing scenarios against the mock audio server.
//!
//! These exercise the full policy surface: monitor-driven auto-routing,
//! protected input switching, refused disconnects, profile activation with
//! partially-missing launchers, source disappearance, and the emergency
//! teardown.

use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use airpatch::devices::{AudioDeviceInfo, DeviceProvider};
use airpatch::launcher::{KnownService, MockLauncher, ServiceLauncher};
use airpatch::server::MockServer;
use airpatch::{
    ClientMonitor, DaemonConfig, ProfileStore, RouteError, RouteEvent, RoutingController,
    RoutingDaemon, SwitchOutcome,
};

struct NoDevices;

impl DeviceProvider for NoDevices {
    fn scan(&self) -> Vec<AudioDeviceInfo> {
        Vec::new()
    }
}

/// A server with the broadcast host and the hardware client.
fn broadcast_server() -> Arc<MockServer> {
    let server = Arc::new(MockServer::new());
    server.add_client(
        "rivendell_0",
        &["playout_0L", "playout_0R", "record_0L", "record_0R"],
    );
    server.add_client("system", &["capture_1", "capture_2"]);
    server
}

fn controller(server: Arc<MockServer>, launcher: Arc<dyn ServiceLauncher>) -> RoutingController {
    let dir = tempdir().unwrap();
    let store = ProfileStore::open(dir.path().join("jack-profiles.xml"));
    RoutingController::new(server, launcher, store, DaemonConfig::default())
}

// Scenario A: a media player appears while the broadcast input is free and
// gets auto-routed into the playout host.
#[test]
fn vlc_appearance_auto_routes_to_playout_host() {
    let server = broadcast_server();
    let mut ctrl = controller(server.clone(), Arc::new(MockLauncher::new()));
    let mut monitor = ClientMonitor::new();

    ctrl.graph().refresh().unwrap();
    monitor.tick(&mut ctrl);

    server.add_client("vlc_media_player", &["out_0", "out_1"]);
    ctrl.graph().refresh().unwrap();
    monitor.tick(&mut ctrl);

    assert!(ctrl.pending_reroute_due().is_some());
    ctrl.complete_reroute();

    assert!(server.has_edge("vlc_media_player:out_0", "rivendell_0:record_0L"));
    assert!(server.has_edge("vlc_media_player:out_1", "rivendell_0:record_0R"));
    assert_eq!(ctrl.active_input_source(), Some("vlc_media_player"));
}

// Scenario A, timing variant: the same flow through the daemon event loop,
// within two monitor ticks plus the reroute settle.
#[tokio::test(start_paused = true)]
async fn vlc_auto_route_happens_within_two_ticks() {
    let server = broadcast_server();
    let launcher = Arc::new(MockLauncher::new());
    let ctrl = controller(server.clone(), launcher.clone());
    let events = ctrl.events();

    let daemon = RoutingDaemon::new(ctrl, Arc::new(NoDevices), launcher);
    let handle = daemon.handle();
    let task = tokio::spawn(daemon.run());

    // Let the monitor observe the baseline clients.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    server.add_client("vlc_media_player", &["out_0", "out_1"]);
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(server.has_edge("vlc_media_player:out_0", "rivendell_0:record_0L"));
    assert!(server.has_edge("vlc_media_player:out_1", "rivendell_0:record_0R"));
    assert!(events.events_since(0).iter().any(|e| matches!(
        &e.event,
        RouteEvent::ClientAppeared { name } if name == "vlc_media_player"
    )));

    handle.shutdown().await;
    task.await.unwrap();
}

// Scenario B: switching the input never touches the critical playout chain.
#[test]
fn input_switch_preserves_critical_chain() {
    let server = broadcast_server();
    server.add_client("stereo_tool", &["in_1", "in_2", "out_l", "out_r"]);
    server.add_client("vlc_media_player", &["out_0", "out_1"]);
    server.wire("rivendell_0:playout_0L", "stereo_tool:in_1");
    server.wire("rivendell_0:playout_0R", "stereo_tool:in_2");
    server.wire("vlc_media_player:out_0", "rivendell_0:record_0L");
    server.wire("vlc_media_player:out_1", "rivendell_0:record_0R");

    let mut ctrl = controller(server.clone(), Arc::new(MockLauncher::new()));
    let outcome = ctrl.switch_input("system", "rivendell_0").unwrap();
    assert_eq!(outcome, SwitchOutcome::Switched);

    assert!(server.has_edge("rivendell_0:playout_0L", "stereo_tool:in_1"));
    assert!(server.has_edge("rivendell_0:playout_0R", "stereo_tool:in_2"));
    assert!(server.has_edge("system:capture_1", "rivendell_0:record_0L"));
    assert!(server.has_edge("system:capture_2", "rivendell_0:record_0R"));
    assert!(!server.has_edge("vlc_media_player:out_0", "rivendell_0:record_0L"));
}

// Scenario C: clearing a protected client is refused outright.
#[test]
fn disconnect_all_from_critical_client_is_refused() {
    let server = broadcast_server();
    server.add_client("stereo_tool", &["in_1", "in_2", "out_l"]);
    server.wire("rivendell_0:playout_0L", "stereo_tool:in_1");
    server.wire("rivendell_0:playout_0R", "stereo_tool:in_2");

    let mut ctrl = controller(server.clone(), Arc::new(MockLauncher::new()));
    let before = server.edges();

    let err = ctrl.disconnect_all_from("stereo_tool").unwrap_err();
    assert!(matches!(err, RouteError::RefusedCritical { .. }));
    assert_eq!(server.edges(), before);
}

// Scenario D: profile activation with a launcher for only one of the two
// auto-clients still succeeds and wires the chain to what came up.
#[tokio::test]
async fn profile_activation_with_partially_missing_auto_clients() {
    let server = broadcast_server();
    let effect_server = server.clone();
    let launcher = Arc::new(
        MockLauncher::new()
            .with_service(KnownService::StereoTool)
            .with_start_effect(move |service| {
                if service == KnownService::StereoTool {
                    effect_server.add_client("stereo_tool", &["in_1", "in_2", "out_l", "out_r"]);
                }
            }),
    );

    let mut ctrl = controller(server.clone(), launcher.clone());
    ctrl.load_profile("live-broadcast").await.unwrap();
    ctrl.complete_activation();

    assert_eq!(launcher.started(), vec![KnownService::StereoTool]);
    assert!(server.has_edge("rivendell_0:playout_0L", "stereo_tool:in_1"));
    assert!(server.has_edge("rivendell_0:playout_0R", "stereo_tool:in_2"));
    assert!(ctrl
        .critical()
        .is_edge_critical("rivendell_0:playout_0L", "stereo_tool:in_1"));
    assert!(!ctrl.graph().snapshot().has_client("liquidsoap"));
    assert_eq!(ctrl.current_profile(), "live-broadcast");
}

// Scenario E: the active input source disappears; alternatives are listed
// but nothing is re-wired automatically.
#[test]
fn active_source_disappearance_does_not_rewire() {
    let server = broadcast_server();
    server.add_client("vlc_media_player", &["out_0", "out_1"]);

    let mut ctrl = controller(server.clone(), Arc::new(MockLauncher::new()));
    let mut monitor = ClientMonitor::new();
    ctrl.graph().refresh().unwrap();
    monitor.tick(&mut ctrl);

    ctrl.switch_input("vlc_media_player", "rivendell_0").unwrap();
    assert_eq!(ctrl.active_input_source(), Some("vlc_media_player"));

    server.remove_client("vlc_media_player");
    ctrl.graph().refresh().unwrap();
    monitor.tick(&mut ctrl);

    let events = ctrl.events().events_since(0);
    let departures = events
        .iter()
        .filter(|e| matches!(
            &e.event,
            RouteEvent::ClientDisappeared { name } if name == "vlc_media_player"
        ))
        .count();
    assert_eq!(departures, 1);
    assert_eq!(ctrl.active_input_source(), None);
    assert!(!ctrl
        .enumerate_input_sources()
        .contains(&"vlc_media_player".to_string()));
    // No automatic re-wire of the record ports.
    assert!(server.edges().is_empty());
}

// Scenario F: the emergency teardown removes everything, critical or not,
// and the next profile load rebuilds the chain.
#[tokio::test]
async fn emergency_disconnect_then_reload_rebuilds_chain() {
    let server = broadcast_server();
    server.add_client("stereo_tool", &["in_1", "in_2", "out_l", "out_r"]);
    server.add_client("liquidsoap", &["in_0", "in_1"]);
    // Three critical chain edges, two ordinary input feeds.
    server.wire("rivendell_0:playout_0L", "stereo_tool:in_1");
    server.wire("rivendell_0:playout_0R", "stereo_tool:in_2");
    server.wire("stereo_tool:out_l", "liquidsoap:in_0");
    server.wire("system:capture_1", "rivendell_0:record_0L");
    server.wire("system:capture_2", "rivendell_0:record_0R");
    assert_eq!(server.edges().len(), 5);

    let mut ctrl = controller(server.clone(), Arc::new(MockLauncher::new()));
    ctrl.load_profile("live-broadcast").await.unwrap();
    ctrl.complete_activation();

    ctrl.emergency_disconnect();
    assert!(server.edges().is_empty());
    assert!(ctrl.graph().snapshot().edges().is_empty());
    assert_eq!(ctrl.current_profile(), "live-broadcast");

    ctrl.load_profile("live-broadcast").await.unwrap();
    ctrl.complete_activation();

    assert!(server.has_edge("rivendell_0:playout_0L", "stereo_tool:in_1"));
    assert!(server.has_edge("rivendell_0:playout_0R", "stereo_tool:in_2"));
    assert!(server.has_edge("stereo_tool:out_l", "liquidsoap:in_0"));
    assert!(server.has_edge("stereo_tool:out_r", "liquidsoap:in_1"));
}

// Invariant: no operation except the emergency teardown removes a critical
// edge, even when asked to clear everything around it.
#[test]
fn critical_edges_survive_every_non_emergency_path() {
    let server = broadcast_server();
    server.add_client("stereo_tool", &["in_1", "in_2", "out_l"]);
    server.add_client("liquidsoap", &["in_0"]);
    server.wire("rivendell_0:playout_0L", "stereo_tool:in_1");
    server.wire("stereo_tool:out_l", "liquidsoap:in_0");

    let mut ctrl = controller(server.clone(), Arc::new(MockLauncher::new()));

    let _ = ctrl.switch_input("system", "rivendell_0");
    let _ = ctrl.disconnect_all_from("rivendell_0");
    let _ = ctrl.disconnect_all_from("stereo_tool");
    ctrl.prevent_auto_connect("rivendell_0");

    assert!(server.has_edge("rivendell_0:playout_0L", "stereo_tool:in_1"));
    assert!(server.has_edge("stereo_tool:out_l", "liquidsoap:in_0"));
}
