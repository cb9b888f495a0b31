//! Audio device enumeration through the default cpal host.
//!
//! Listing is deterministic: the host's default device comes first, the
//! rest follow in name order. Devices whose default configuration cannot be
//! queried are skipped.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{BackendError, DeviceDirection};

/// A capture-capable device as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub name: String,
    /// Default sample rate in Hz.
    pub sample_rate: u32,
    pub channels: u16,
    pub is_default: bool,
    pub direction: DeviceDirection,
}

/// Microphones and other input endpoints.
pub fn list_input_devices() -> Result<Vec<AudioDevice>, BackendError> {
    list_devices(DeviceDirection::Input)
}

/// Render endpoints, usable for loopback capture on hosts that support it.
pub fn list_output_devices() -> Result<Vec<AudioDevice>, BackendError> {
    list_devices(DeviceDirection::Output)
}

pub fn list_devices(direction: DeviceDirection) -> Result<Vec<AudioDevice>, BackendError> {
    let host = cpal::default_host();
    let default_name = default_device(&host, direction).and_then(|d| d.name().ok());

    let mut devices: Vec<AudioDevice> = host_devices(&host, direction)?
        .into_iter()
        .filter_map(|device| {
            let name = device.name().ok()?;
            let config = match default_config(&device, direction) {
                Ok(config) => config,
                Err(e) => {
                    log::debug!("skipping {} device {}: {}", direction, name, e);
                    return None;
                }
            };
            Some(AudioDevice {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                sample_rate: config.sample_rate().0,
                channels: config.channels(),
                direction,
            })
        })
        .collect();

    sort_devices(&mut devices);
    Ok(devices)
}

/// Default device first, then by name.
pub fn sort_devices(devices: &mut [AudioDevice]) {
    devices.sort_by(|a, b| b.is_default.cmp(&a.is_default).then_with(|| a.name.cmp(&b.name)));
}

/// Resolve a device by exact name, or the host default when `name` is `None`.
pub fn find_device(direction: DeviceDirection, name: Option<&str>) -> Result<cpal::Device, BackendError> {
    let host = cpal::default_host();
    let Some(wanted) = name else {
        return default_device(&host, direction).ok_or(BackendError::NoDefaultDevice(direction));
    };

    host_devices(&host, direction)?
        .into_iter()
        .find(|device| device.name().map(|n| n == wanted).unwrap_or(false))
        .ok_or_else(|| BackendError::DeviceNotFound {
            direction,
            name: wanted.to_string(),
        })
}

pub(crate) fn default_config(
    device: &cpal::Device,
    direction: DeviceDirection,
) -> Result<cpal::SupportedStreamConfig, BackendError> {
    let config = match direction {
        DeviceDirection::Input => device.default_input_config(),
        DeviceDirection::Output => device.default_output_config(),
    };
    config.map_err(|e| BackendError::Configuration(e.to_string()))
}

fn default_device(host: &cpal::Host, direction: DeviceDirection) -> Option<cpal::Device> {
    match direction {
        DeviceDirection::Input => host.default_input_device(),
        DeviceDirection::Output => host.default_output_device(),
    }
}

fn host_devices(host: &cpal::Host, direction: DeviceDirection) -> Result<Vec<cpal::Device>, BackendError> {
    let devices: Result<Vec<cpal::Device>, cpal::DevicesError> = match direction {
        DeviceDirection::Input => host.input_devices().map(|d| d.collect()),
        DeviceDirection::Output => host.output_devices().map(|d| d.collect()),
    };
    devices.map_err(|e| BackendError::Enumeration(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, is_default: bool) -> AudioDevice {
        AudioDevice {
            name: name.into(),
            sample_rate: 48_000,
            channels: 2,
            is_default,
            direction: DeviceDirection::Input,
        }
    }

    #[test]
    fn default_sorts_first_then_by_name() {
        let mut devices = vec![
            device("Zeta", false),
            device("Alpha", false),
            device("Studio", true),
            device("Beta", false),
        ];
        sort_devices(&mut devices);

        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Studio", "Alpha", "Beta", "Zeta"]);
    }

    #[test]
    fn sort_without_default_is_alphabetical() {
        let mut devices = vec![device("b", false), device("a", false)];
        sort_devices(&mut devices);
        assert_eq!(devices[0].name, "a");
        assert!(!devices[0].is_default);
    }
}
