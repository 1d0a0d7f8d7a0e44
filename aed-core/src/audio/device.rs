//! Audio input device enumeration and selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Position in the host's input device list; stable for one enumeration.
    pub index: usize,
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the host's default input device.
    pub is_default: bool,
}

/// How the live capture worker picks its input device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelector {
    #[default]
    Default,
    Index(usize),
    Name(String),
}

impl FromStr for DeviceSelector {
    type Err = std::convert::Infallible;

    /// `""` / `"default"` → default device, digits → index, anything else → exact name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("default") {
            return Ok(Self::Default);
        }
        Ok(match s.parse::<usize>() {
            Ok(idx) => Self::Index(idx),
            Err(_) => Self::Name(s.to_string()),
        })
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Index(idx) => write!(f, "#{idx}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// List all available audio input devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(index, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", index + 1));
                let is_default = default_name.as_deref() == Some(name.as_str());
                DeviceInfo {
                    index,
                    name,
                    is_default,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

/// Resolve `selector` to a concrete cpal device.
#[cfg(feature = "audio-cpal")]
pub(crate) fn resolve_input_device(
    selector: &DeviceSelector,
) -> crate::error::Result<cpal::Device> {
    use crate::error::AedError;
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    match selector {
        DeviceSelector::Default => host.default_input_device().ok_or(AedError::NoInputDevice),
        DeviceSelector::Index(idx) => host
            .input_devices()
            .map_err(|e| AedError::AudioDevice(e.to_string()))?
            .nth(*idx)
            .ok_or_else(|| AedError::DeviceNotFound(selector.to_string())),
        DeviceSelector::Name(wanted) => host
            .input_devices()
            .map_err(|e| AedError::AudioDevice(e.to_string()))?
            .find(|d| d.name().map(|n| &n == wanted).unwrap_or(false))
            .ok_or_else(|| AedError::DeviceNotFound(selector.to_string())),
    }
}
