//! Audio device enumeration.
//!
//! The kernel sound layer is an opaque provider of device facts; routing
//! policy never depends on how the list is produced. The default provider
//! enumerates ALSA cards and checks their playback/capture PCM entries, and
//! the daemon merges the audio server's software clients into the list while
//! the server runs.

use std::path::Path;

use crate::graph::GraphSnapshot;

/// One entry in the device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Kernel identifier (`hw:N`), empty for software clients.
    pub card_id: String,
    /// Short stable identifier.
    pub stable_id: String,
    /// `hardware` for sound cards, `software` for server clients.
    pub device_type: &'static str,
    /// Device can play audio.
    pub has_playback: bool,
    /// Device can capture audio.
    pub has_capture: bool,
    /// Number of input channels.
    pub input_channels: u32,
    /// Number of output channels.
    pub output_channels: u32,
    /// Device is currently in use by the audio server.
    pub is_active: bool,
}

/// Opaque source of the hardware device list.
pub trait DeviceProvider: Send + Sync {
    /// Enumerates devices. Failures yield an empty or partial list, never
    /// an error: device scanning must not disturb the daemon.
    fn scan(&self) -> Vec<AudioDeviceInfo>;
}

/// Provider backed by the ALSA card list.
pub struct AlsaDeviceProvider;

impl DeviceProvider for AlsaDeviceProvider {
    fn scan(&self) -> Vec<AudioDeviceInfo> {
        let mut devices = Vec::new();
        for card in alsa::card::Iter::new() {
            let card = match card {
                Ok(card) => card,
                Err(err) => {
                    tracing::debug!(?err, "skipping unreadable sound card");
                    continue;
                }
            };
            let index = card.get_index();
            let name = card.get_name().unwrap_or_else(|_| format!("card{index}"));
            let longname = card.get_longname().unwrap_or_else(|_| name.clone());

            let has_playback = pcm_info_exists(index, 'p');
            let has_capture = pcm_info_exists(index, 'c');

            devices.push(AudioDeviceInfo {
                name: longname,
                card_id: format!("hw:{index}"),
                stable_id: name,
                device_type: "hardware",
                has_playback,
                has_capture,
                // Stereo assumption for unprobed hardware.
                input_channels: if has_capture { 2 } else { 0 },
                output_channels: if has_playback { 2 } else { 0 },
                is_active: false,
            });
        }
        devices
    }
}

fn pcm_info_exists(card_index: i32, direction: char) -> bool {
    Path::new(&format!("/proc/asound/card{card_index}/pcm0{direction}/info")).exists()
}

/// Merges the audio server's clients into a hardware scan: hardware entries
/// become active when the `system` client is up, every other client is
/// appended as a software device with channel counts derived from its ports.
pub fn merge_graph_clients(devices: &mut Vec<AudioDeviceInfo>, snapshot: &GraphSnapshot) {
    let system_up = snapshot.has_client("system");
    for device in devices.iter_mut() {
        device.is_active = system_up;
    }

    for client in snapshot.clients() {
        if client == "system" {
            continue;
        }
        devices.push(AudioDeviceInfo {
            name: client.clone(),
            card_id: String::new(),
            stable_id: client.clone(),
            device_type: "software",
            has_playback: !snapshot.sink_ports_of(client).is_empty(),
            has_capture: !snapshot.source_ports_of(client).is_empty(),
            input_channels: snapshot.sink_ports_of(client).len() as u32,
            output_channels: snapshot.source_ports_of(client).len() as u32,
            is_active: true,
        });
    }
}
