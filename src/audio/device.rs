//! Audio input device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::errors::AvatarError;

/// Audio input device information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    pub name: String,
    /// Default sample rate in Hz
    pub sample_rate: u32,
    pub channels: u16,
    pub is_default: bool,
}

/// List input devices, default first, then alphabetically
pub fn list_audio_devices() -> Result<Vec<AudioDevice>, AvatarError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices: Vec<AudioDevice> = host
        .input_devices()
        .map_err(|e| AvatarError::Audio(format!("Failed to enumerate audio devices: {}", e)))?
        .filter_map(|device| {
            let name = device.name().ok()?;
            let config = device.default_input_config().ok()?;
            Some(AudioDevice {
                is_default: default_name.as_ref() == Some(&name),
                name,
                sample_rate: config.sample_rate().0,
                channels: config.channels(),
            })
        })
        .collect();

    devices.sort_by(|a, b| b.is_default.cmp(&a.is_default).then_with(|| a.name.cmp(&b.name)));
    Ok(devices)
}

/// Open an input device by name; `None` or `"default"` picks the system default.
pub(crate) fn open_input_device(name: Option<&str>) -> Result<cpal::Device, AvatarError> {
    let host = cpal::default_host();
    match name {
        None | Some("") | Some("default") => host
            .default_input_device()
            .ok_or_else(|| AvatarError::DeviceUnavailable("no default audio input".to_string())),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| AvatarError::Audio(format!("Failed to enumerate audio devices: {}", e)))?
            .find(|d| d.name().ok().as_deref() == Some(wanted))
            .ok_or_else(|| AvatarError::DeviceUnavailable(format!("audio input {:?}", wanted))),
    }
}
