//! Daemon configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Tunable timing and naming for the routing daemon.
///
/// Use [`DaemonConfig::default()`] for the standard broadcast setup, or
/// customize as needed.
///
/// # Example
///
/// ```
/// use airpatch::DaemonConfig;
/// use std::time::Duration;
///
/// let config = DaemonConfig {
///     settle_delay: Duration::from_millis(100),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Cadence of the audio-server reachability poll.
    ///
    /// Default: 2s
    pub status_poll_interval: Duration,

    /// Cadence of the hardware device scan.
    ///
    /// Default: 10s
    pub device_scan_interval: Duration,

    /// Cadence of the client monitor diff.
    ///
    /// Default: 1s
    pub monitor_interval: Duration,

    /// Pause between profile activation and chain establishment, long
    /// enough for just-launched clients to register with the server.
    ///
    /// Default: 2s
    pub settle_delay: Duration,

    /// Pause before auto-routing a freshly appeared media player.
    ///
    /// Default: 500ms
    pub reroute_delay: Duration,

    /// The broadcast playout client fed by input switching.
    ///
    /// Default: `rivendell_0`
    pub source_host: String,

    /// Canonical processor client blacklisted from auto-connection during
    /// profile activation.
    ///
    /// Default: `stereo_tool`
    pub processor_client: String,

    /// The hardware capture/playback client.
    ///
    /// Default: `system`
    pub hardware_client: String,

    /// Profile store location; `None` selects the per-user default.
    pub profile_store_path: Option<PathBuf>,

    /// IPC socket location; `None` selects the runtime-dir default.
    pub socket_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            status_poll_interval: Duration::from_secs(2),
            device_scan_interval: Duration::from_secs(10),
            monitor_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            reroute_delay: Duration::from_millis(500),
            source_host: "rivendell_0".to_string(),
            processor_client: "stereo_tool".to_string(),
            hardware_client: "system".to_string(),
            profile_store_path: None,
            socket_path: None,
        }
    }
}

impl DaemonConfig {
    /// The default IPC socket path.
    pub fn default_socket_path() -> PathBuf {
        dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("airpatch.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_config_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.status_poll_interval, Duration::from_secs(2));
        assert_eq!(config.device_scan_interval, Duration::from_secs(10));
        assert_eq!(config.monitor_interval, Duration::from_secs(1));
        assert_eq!(config.settle_delay, Duration::from_secs(2));
        assert_eq!(config.reroute_delay, Duration::from_millis(500));
        assert_eq!(config.source_host, "rivendell_0");
        assert_eq!(config.hardware_client, "system");
    }
}
