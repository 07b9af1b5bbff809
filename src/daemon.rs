//! The daemon event loop.
//!
//! Single-threaded cooperative scheduling: one task owns the controller, the
//! client monitor, and every timer, and services requests strictly FIFO from
//! an mpsc queue. Timers suspend only at tick boundaries; pending settle
//! deadlines are polled from the same loop, so a superseding `load_profile`
//! naturally cancels the schedule it replaced.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep_until, MissedTickBehavior};

use crate::controller::RoutingController;
use crate::devices::{merge_graph_clients, AudioDeviceInfo, DeviceProvider};
use crate::event::RouteEvent;
use crate::launcher::ServiceLauncher;
use crate::monitor::ClientMonitor;
use crate::SwitchOutcome;

/// Queue depth for daemon requests.
const REQUEST_QUEUE: usize = 32;

/// A request executed on the daemon loop.
///
/// The variants mirror the IPC surface; replies travel back over oneshot
/// channels.
pub enum Request {
    /// Names of every known audio device.
    GetAudioDevices {
        /// Reply channel.
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Whether the audio server is reachable.
    IsRunning {
        /// Reply channel.
        reply: oneshot::Sender<bool>,
    },
    /// Start the audio server against a named device.
    StartWithDevice {
        /// Device name from the scan list.
        device: String,
        /// Reply channel.
        reply: oneshot::Sender<bool>,
    },
    /// Names of every stored profile.
    GetAvailableProfiles {
        /// Reply channel.
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Activate a profile.
    LoadProfile {
        /// Profile name.
        name: String,
        /// Reply channel.
        reply: oneshot::Sender<bool>,
    },
    /// Switch the input feeding `target` to `source`.
    SwitchInput {
        /// New input client.
        source: String,
        /// Target client.
        target: String,
        /// Reply channel.
        reply: oneshot::Sender<bool>,
    },
    /// Input sources in preference order.
    EnumerateInputSources {
        /// Reply channel.
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Stop the daemon loop.
    Shutdown,
}

/// Cloneable handle for submitting requests to a running daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    tx: mpsc::Sender<Request>,
}

impl DaemonHandle {
    async fn call<T: Default>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> T {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(build(reply)).await.is_err() {
            return T::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Names of every known audio device.
    pub async fn get_audio_devices(&self) -> Vec<String> {
        self.call(|reply| Request::GetAudioDevices { reply }).await
    }

    /// Whether the audio server is reachable.
    pub async fn is_running(&self) -> bool {
        self.call(|reply| Request::IsRunning { reply }).await
    }

    /// Starts the audio server against a named device.
    pub async fn start_with_device(&self, device: &str) -> bool {
        let device = device.to_string();
        self.call(|reply| Request::StartWithDevice { device, reply })
            .await
    }

    /// Names of every stored profile.
    pub async fn get_available_profiles(&self) -> Vec<String> {
        self.call(|reply| Request::GetAvailableProfiles { reply })
            .await
    }

    /// Activates a profile; false only for an unknown name.
    pub async fn load_profile(&self, name: &str) -> bool {
        let name = name.to_string();
        self.call(|reply| Request::LoadProfile { name, reply }).await
    }

    /// Switches the input feeding `target` to `source`.
    pub async fn switch_input(&self, source: &str, target: &str) -> bool {
        let source = source.to_string();
        let target = target.to_string();
        self.call(|reply| Request::SwitchInput {
            source,
            target,
            reply,
        })
        .await
    }

    /// Input sources in preference order.
    pub async fn enumerate_input_sources(&self) -> Vec<String> {
        self.call(|reply| Request::EnumerateInputSources { reply })
            .await
    }

    /// Stops the daemon loop.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Request::Shutdown).await;
    }
}

/// The routing daemon: controller + monitor + timers on one event loop.
pub struct RoutingDaemon {
    controller: RoutingController,
    monitor: ClientMonitor,
    devices: Arc<dyn DeviceProvider>,
    launcher: Arc<dyn ServiceLauncher>,
    requests: Option<mpsc::Receiver<Request>>,
    handle_tx: mpsc::Sender<Request>,
    server_running: bool,
    last_devices: Vec<AudioDeviceInfo>,
}

impl RoutingDaemon {
    /// Assembles a daemon around a controller.
    pub fn new(
        controller: RoutingController,
        devices: Arc<dyn DeviceProvider>,
        launcher: Arc<dyn ServiceLauncher>,
    ) -> Self {
        let (handle_tx, requests) = mpsc::channel(REQUEST_QUEUE);
        Self {
            controller,
            monitor: ClientMonitor::new(),
            devices,
            launcher,
            requests: Some(requests),
            handle_tx,
            server_running: false,
            last_devices: Vec::new(),
        }
    }

    /// A handle for submitting requests.
    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            tx: self.handle_tx.clone(),
        }
    }

    /// The controller, for wiring event subscribers before `run`.
    pub fn controller(&self) -> &RoutingController {
        &self.controller
    }

    /// Runs the event loop until shutdown.
    pub async fn run(mut self) {
        let Some(mut requests) = self.requests.take() else {
            return;
        };
        let config = self.controller.config().clone();

        let mut status_tick = interval(config.status_poll_interval);
        let mut scan_tick = interval(config.device_scan_interval);
        let mut monitor_tick = interval(config.monitor_interval);
        for tick in [&mut status_tick, &mut scan_tick, &mut monitor_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        self.poll_status();
        self.scan_devices();
        tracing::info!("routing daemon started");

        loop {
            let activation_due = self.controller.pending_activation_due();
            let reroute_due = self.controller.pending_reroute_due();

            tokio::select! {
                request = requests.recv() => {
                    match request {
                        Some(Request::Shutdown) | None => break,
                        Some(request) => self.handle_request(request).await,
                    }
                }
                _ = status_tick.tick() => self.poll_status(),
                _ = scan_tick.tick() => self.scan_devices(),
                _ = monitor_tick.tick() => {
                    if let Err(err) = self.controller.graph().refresh() {
                        tracing::warn!(?err, "graph refresh failed");
                    }
                    self.monitor.tick(&mut self.controller);
                }
                _ = sleep_until(activation_due.unwrap_or_else(tokio::time::Instant::now)),
                    if activation_due.is_some() =>
                {
                    self.controller.complete_activation();
                }
                _ = sleep_until(reroute_due.unwrap_or_else(tokio::time::Instant::now)),
                    if reroute_due.is_some() =>
                {
                    self.controller.complete_reroute();
                }
            }
        }

        tracing::info!("routing daemon stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::GetAudioDevices { reply } => {
                let devices = self.device_list();
                let _ = reply.send(devices.into_iter().map(|d| d.name).collect());
            }
            Request::IsRunning { reply } => {
                let _ = reply.send(self.controller.server().is_running());
            }
            Request::StartWithDevice { device, reply } => {
                let ok = self.start_with_device(&device).await;
                let _ = reply.send(ok);
            }
            Request::GetAvailableProfiles { reply } => {
                let names = self
                    .controller
                    .store()
                    .names()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                let _ = reply.send(names);
            }
            Request::LoadProfile { name, reply } => {
                let ok = self.controller.load_profile(&name).await.is_ok();
                let _ = reply.send(ok);
            }
            Request::SwitchInput {
                source,
                target,
                reply,
            } => {
                let ok = matches!(
                    self.controller.switch_input(&source, &target),
                    Ok(SwitchOutcome::Switched)
                );
                let _ = reply.send(ok);
            }
            Request::EnumerateInputSources { reply } => {
                let _ = reply.send(self.controller.enumerate_input_sources());
            }
            // Shutdown is intercepted by the loop before dispatch.
            Request::Shutdown => {}
        }
    }

    fn device_list(&self) -> Vec<AudioDeviceInfo> {
        let mut devices = self.devices.scan();
        merge_graph_clients(&mut devices, &self.controller.graph().snapshot());
        devices
    }

    async fn start_with_device(&mut self, device: &str) -> bool {
        if self.controller.server().is_running() {
            tracing::info!("audio server already running");
            return true;
        }
        let card_id = self
            .device_list()
            .into_iter()
            .find(|d| d.name == device || d.card_id == device)
            .map(|d| d.card_id);
        let Some(card_id) = card_id else {
            tracing::warn!(device, "device not found");
            return false;
        };
        match self.launcher.start_audio_server(&card_id).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(?err, device, "audio server start failed");
                false
            }
        }
    }

    fn poll_status(&mut self) {
        let running = self.controller.server().is_running();
        if running == self.server_running {
            return;
        }
        self.server_running = running;
        tracing::info!(running, "audio server status changed");

        self.controller.server().refresh_session();
        if let Err(err) = self.controller.graph().refresh() {
            tracing::warn!(?err, "graph refresh failed after status change");
        }
        self.controller
            .events()
            .publish(RouteEvent::ServerStatusChanged { running });
    }

    fn scan_devices(&mut self) {
        let devices = self.device_list();
        if devices != self.last_devices {
            self.last_devices = devices;
            self.controller.events().publish(RouteEvent::DeviceListChanged);
        }
    }
}
