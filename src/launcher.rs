//! Launching of auxiliary broadcast services.
//!
//! Profile activation may need to start the audio processor, the stream
//! encoder, or the streaming server before routing can be established. The
//! [`ServiceLauncher`] trait keeps that concern opaque to the routing
//! controller; the process-backed implementation spawns children with the
//! audio server's promiscuous environment and a bounded startup wait.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;

use crate::RouteError;

/// Environment variable selecting the audio server's promiscuous group.
const PROMISCUOUS_ENV: &str = "JACK_PROMISCUOUS_SERVER";

/// Environment variable disabling exclusive audio-device reservation.
const NO_RESERVATION_ENV: &str = "JACK_NO_AUDIO_RESERVATION";

/// Services the launcher knows how to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownService {
    /// The audio processor (Stereo Tool).
    StereoTool,
    /// The stream encoder (Liquidsoap).
    Liquidsoap,
    /// The streaming server (Icecast).
    Icecast,
}

impl KnownService {
    /// Maps a client or auto-client name to a known service, by
    /// case-insensitive substring.
    pub fn from_client_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.contains("stereo_tool") {
            Some(Self::StereoTool)
        } else if lower.contains("liquidsoap") {
            Some(Self::Liquidsoap)
        } else if lower.contains("icecast") {
            Some(Self::Icecast)
        } else {
            None
        }
    }

    /// Stable name used in logs and service-status events.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StereoTool => "stereo_tool",
            Self::Liquidsoap => "liquidsoap",
            Self::Icecast => "icecast",
        }
    }
}

/// Starts auxiliary processes on behalf of the routing controller.
#[async_trait]
pub trait ServiceLauncher: Send + Sync {
    /// True when this launcher can start the given service.
    fn supports(&self, service: KnownService) -> bool;

    /// Starts the service. Resolves once the process is believed to be up;
    /// failures surface as [`RouteError::LaunchFailed`].
    async fn start(&self, service: KnownService) -> Result<(), RouteError>;

    /// Starts the audio server itself against a specific device.
    async fn start_audio_server(&self, card_id: &str) -> Result<(), RouteError>;
}

/// Launcher backed by real child processes.
pub struct ProcessLauncher {
    /// Path to the Stereo Tool binary.
    pub stereo_tool_path: PathBuf,
    /// Optional Stereo Tool preset passed with `--preset`.
    pub stereo_tool_preset: Option<PathBuf>,
    /// Liquidsoap script to run.
    pub liquidsoap_script: PathBuf,
    /// How long a spawned daemon must survive to count as started.
    pub startup_grace: Duration,
    /// Timeout for short-lived helper invocations (`systemctl`).
    pub helper_timeout: Duration,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self {
            stereo_tool_path: PathBuf::from("/home/rd/imports/APPS/stereo_tool_gui_jack_64_1030"),
            stereo_tool_preset: None,
            liquidsoap_script: PathBuf::from("/home/rd/radio.liq"),
            startup_grace: Duration::from_secs(3),
            helper_timeout: Duration::from_secs(5),
        }
    }
}

impl ProcessLauncher {
    fn launch_failed(service: KnownService, reason: impl Into<String>) -> RouteError {
        RouteError::LaunchFailed {
            service: service.name().to_string(),
            reason: reason.into(),
        }
    }

    /// Spawns a long-running child and waits `startup_grace` to see whether
    /// it survives. A child that exits within the grace period counts as a
    /// failed launch; one that keeps running is left behind as a daemon.
    async fn spawn_daemon(
        &self,
        service: KnownService,
        mut command: Command,
    ) -> Result<(), RouteError> {
        command
            .env(PROMISCUOUS_ENV, "audio")
            .env(NO_RESERVATION_ENV, "1");

        let mut child = command
            .spawn()
            .map_err(|e| Self::launch_failed(service, e.to_string()))?;

        match tokio::time::timeout(self.startup_grace, child.wait()).await {
            Ok(Ok(status)) => Err(Self::launch_failed(
                service,
                format!("exited during startup: {status}"),
            )),
            Ok(Err(e)) => Err(Self::launch_failed(service, e.to_string())),
            Err(_elapsed) => {
                tracing::info!(service = service.name(), "service started");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ServiceLauncher for ProcessLauncher {
    fn supports(&self, service: KnownService) -> bool {
        match service {
            KnownService::StereoTool => self.stereo_tool_path.exists(),
            KnownService::Liquidsoap => self.liquidsoap_script.exists(),
            KnownService::Icecast => true,
        }
    }

    async fn start(&self, service: KnownService) -> Result<(), RouteError> {
        match service {
            KnownService::StereoTool => {
                if !self.stereo_tool_path.exists() {
                    return Err(Self::launch_failed(
                        service,
                        format!("binary not found: {}", self.stereo_tool_path.display()),
                    ));
                }
                let mut command = Command::new(&self.stereo_tool_path);
                if let Some(preset) = &self.stereo_tool_preset {
                    command.arg("--preset").arg(preset);
                }
                self.spawn_daemon(service, command).await
            }
            KnownService::Liquidsoap => {
                if !self.liquidsoap_script.exists() {
                    return Err(Self::launch_failed(
                        service,
                        format!("script not found: {}", self.liquidsoap_script.display()),
                    ));
                }
                let mut command = Command::new("liquidsoap");
                command.arg(&self.liquidsoap_script);
                self.spawn_daemon(service, command).await
            }
            KnownService::Icecast => {
                let mut command = Command::new("systemctl");
                command.args(["start", "icecast2"]);
                match tokio::time::timeout(self.helper_timeout, command.status()).await {
                    Ok(Ok(status)) if status.success() => Ok(()),
                    Ok(Ok(status)) => {
                        Err(Self::launch_failed(service, format!("systemctl: {status}")))
                    }
                    Ok(Err(e)) => Err(Self::launch_failed(service, e.to_string())),
                    Err(_elapsed) => Err(Self::launch_failed(service, "systemctl timed out")),
                }
            }
        }
    }

    async fn start_audio_server(&self, card_id: &str) -> Result<(), RouteError> {
        let mut command = Command::new("jackd");
        command.args([
            "-d", "alsa", "-d", card_id, "-r", "48000", "-p", "512", "-n", "3",
        ]);
        let mut child = command.spawn().map_err(|e| RouteError::LaunchFailed {
            service: "jackd".to_string(),
            reason: e.to_string(),
        })?;

        match tokio::time::timeout(self.startup_grace, child.wait()).await {
            Ok(Ok(status)) => Err(RouteError::LaunchFailed {
                service: "jackd".to_string(),
                reason: format!("exited during startup: {status}"),
            }),
            Ok(Err(e)) => Err(RouteError::LaunchFailed {
                service: "jackd".to_string(),
                reason: e.to_string(),
            }),
            Err(_elapsed) => Ok(()),
        }
    }
}

type StartEffect = Box<dyn Fn(KnownService) + Send + Sync>;

/// Scripted launcher for tests.
///
/// Records every start request; a start effect (usually "register the
/// client's ports on the mock server") simulates the service appearing in
/// the graph.
#[derive(Default)]
pub struct MockLauncher {
    available: HashSet<KnownService>,
    started: Mutex<Vec<KnownService>>,
    effect: Option<StartEffect>,
}

impl MockLauncher {
    /// Creates a launcher that supports no services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a service launchable.
    pub fn with_service(mut self, service: KnownService) -> Self {
        self.available.insert(service);
        self
    }

    /// Runs `effect` whenever a supported service is started.
    pub fn with_start_effect<F>(mut self, effect: F) -> Self
    where
        F: Fn(KnownService) + Send + Sync + 'static,
    {
        self.effect = Some(Box::new(effect));
        self
    }

    /// Services started so far, in call order.
    pub fn started(&self) -> Vec<KnownService> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl ServiceLauncher for MockLauncher {
    fn supports(&self, service: KnownService) -> bool {
        self.available.contains(&service)
    }

    async fn start(&self, service: KnownService) -> Result<(), RouteError> {
        self.started.lock().push(service);
        if !self.available.contains(&service) {
            return Err(RouteError::LaunchFailed {
                service: service.name().to_string(),
                reason: "no launcher configured".to_string(),
            });
        }
        if let Some(effect) = &self.effect {
            effect(service);
        }
        Ok(())
    }

    async fn start_audio_server(&self, _card_id: &str) -> Result<(), RouteError> {
        Ok(())
    }
}
