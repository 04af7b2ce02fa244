//! Audio device enumeration, selection and format negotiation

use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait};

use crate::constants::SAMPLE_RATE_PRIORITY;
use crate::error::AudioError;

/// Direction a device is used in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Input,
    Output,
}

impl DeviceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Input => "input",
            DeviceRole::Output => "output",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepted PCM sample formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmFormat {
    /// Signed 16-bit, host byte order
    S16Native,
    /// Signed 16-bit, opposite byte order
    S16Foreign,
}

/// Formats in preference order
pub const FORMAT_PRIORITY: [PcmFormat; 2] = [PcmFormat::S16Native, PcmFormat::S16Foreign];

/// One supported configuration range reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRange {
    pub format: PcmFormat,
    pub channels: u16,
    pub min_rate: u32,
    pub max_rate: u32,
}

impl ConfigRange {
    fn contains(&self, rate: u32) -> bool {
        rate >= self.min_rate && rate <= self.max_rate
    }
}

/// Negotiated stream parameters for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub format: PcmFormat,
    pub sample_rate: u32,
    /// Channels the device is opened with; the pipeline itself is mono
    pub channels: u16,
}

/// Everything a device reports it can do, restricted to formats we accept
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    ranges: Vec<ConfigRange>,
}

impl Capabilities {
    pub fn new(ranges: Vec<ConfigRange>) -> Self {
        Self { ranges }
    }

    fn from_cpal(configs: impl Iterator<Item = cpal::SupportedStreamConfigRange>) -> Self {
        let ranges = configs
            .filter_map(|config| {
                // cpal only ever hands out host-order integers
                let format = match config.sample_format() {
                    cpal::SampleFormat::I16 => PcmFormat::S16Native,
                    _ => return None,
                };
                Some(ConfigRange {
                    format,
                    channels: config.channels(),
                    min_rate: config.min_sample_rate().0,
                    max_rate: config.max_sample_rate().0,
                })
            })
            .collect();
        Self { ranges }
    }

    pub fn ranges(&self) -> &[ConfigRange] {
        &self.ranges
    }

    /// First entry of [`FORMAT_PRIORITY`] the device supports
    pub fn negotiate_format(&self, device_name: &str) -> Result<PcmFormat, AudioError> {
        FORMAT_PRIORITY
            .into_iter()
            .find(|format| self.ranges.iter().any(|r| r.format == *format))
            .ok_or_else(|| AudioError::UnsupportedFormat(device_name.to_string()))
    }

    /// First entry of the sample-rate priority list the device supports in `format`
    pub fn negotiate_sample_rate(&self, device_name: &str, format: PcmFormat) -> Result<u32, AudioError> {
        SAMPLE_RATE_PRIORITY
            .into_iter()
            .find(|rate| {
                self.ranges
                    .iter()
                    .any(|r| r.format == format && r.contains(*rate))
            })
            .ok_or_else(|| AudioError::UnsupportedSampleRate(device_name.to_string()))
    }

    /// Mono when available, otherwise the fewest channels on offer
    fn channels_for(&self, format: PcmFormat, rate: u32) -> u16 {
        self.ranges
            .iter()
            .filter(|r| r.format == format && r.contains(rate))
            .map(|r| r.channels)
            .filter(|c| *c > 0)
            .min()
            .unwrap_or(1)
    }

    pub fn negotiate(&self, device_name: &str) -> Result<StreamFormat, AudioError> {
        let format = self.negotiate_format(device_name)?;
        let sample_rate = self.negotiate_sample_rate(device_name, format)?;
        Ok(StreamFormat {
            format,
            sample_rate,
            channels: self.channels_for(format, sample_rate),
        })
    }
}

/// An enumerated device. Owned copy of the backend's description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    /// Backend-specific identifier, `<role>:<index>`
    pub id: String,
    pub role: DeviceRole,
    pub is_default: bool,
}

impl Device {
    /// Raw hardware endpoints that bypass the system mixer (ALSA `hw:`)
    pub fn is_raw(&self) -> bool {
        self.name.starts_with("hw:")
    }
}

/// Pick a device by exact name, or the system default for an empty name
pub fn find_device<'a>(devices: &'a [Device], role: DeviceRole, name: &str) -> Result<&'a Device, AudioError> {
    let mut candidates = devices.iter().filter(|d| d.role == role);
    if name.is_empty() {
        candidates
            .find(|d| d.is_default)
            .ok_or(AudioError::NoDefaultDevice(role.as_str()))
    } else {
        candidates
            .find(|d| d.name == name)
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
    }
}

/// The bound device first, then every other non-raw device of its role
pub fn alternatives(devices: &[Device], bound: &Device) -> Vec<Device> {
    let mut list = vec![bound.clone()];
    list.extend(
        devices
            .iter()
            .filter(|d| d.role == bound.role && d.id != bound.id && !d.is_raw())
            .cloned(),
    );
    list
}

/// Process-wide handle on the audio backend
pub struct AudioHost {
    host: cpal::Host,
}

impl AudioHost {
    pub fn new() -> Self {
        let host = cpal::default_host();
        tracing::debug!("Audio backend: {}", host.id().name());
        Self { host }
    }

    pub fn backend_name(&self) -> &'static str {
        self.host.id().name()
    }

    fn enumerate(&self, role: DeviceRole) -> Result<Vec<(Device, cpal::Device)>, AudioError> {
        let (devices, default_name) = match role {
            DeviceRole::Input => (
                self.host.input_devices().map(|d| d.collect::<Vec<_>>()),
                self.host.default_input_device().and_then(|d| d.name().ok()),
            ),
            DeviceRole::Output => (
                self.host.output_devices().map(|d| d.collect::<Vec<_>>()),
                self.host.default_output_device().and_then(|d| d.name().ok()),
            ),
        };
        let devices = devices.map_err(|e| AudioError::CpalError(e.to_string()))?;

        let mut seen_default = false;
        let mut out = Vec::with_capacity(devices.len());
        for (index, handle) in devices.into_iter().enumerate() {
            let Ok(name) = handle.name() else {
                continue;
            };
            // Only the first device carrying the default name is the default
            let is_default = !seen_default && default_name.as_deref() == Some(name.as_str());
            seen_default |= is_default;

            out.push((
                Device {
                    name,
                    id: format!("{}:{}", role.as_str(), index),
                    role,
                    is_default,
                },
                handle,
            ));
        }
        Ok(out)
    }

    pub fn list_devices(&self, role: DeviceRole) -> Result<Vec<Device>, AudioError> {
        Ok(self.enumerate(role)?.into_iter().map(|(d, _)| d).collect())
    }

    fn capabilities(&self, handle: &cpal::Device, role: DeviceRole) -> Result<Capabilities, AudioError> {
        let caps = match role {
            DeviceRole::Input => handle
                .supported_input_configs()
                .map(Capabilities::from_cpal),
            DeviceRole::Output => handle
                .supported_output_configs()
                .map(Capabilities::from_cpal),
        };
        caps.map_err(|e| AudioError::CpalError(e.to_string()))
    }
}

impl Default for AudioHost {
    fn default() -> Self {
        Self::new()
    }
}

/// A device resolved, negotiated and ready to open
#[derive(Clone)]
pub struct BoundDevice {
    pub device: Device,
    pub format: StreamFormat,
    pub(crate) handle: cpal::Device,
}

impl fmt::Debug for BoundDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundDevice")
            .field("device", &self.device)
            .field("format", &self.format)
            .finish()
    }
}

/// Resolves device names into negotiated, openable devices
pub struct DeviceSelector<'a> {
    host: &'a AudioHost,
}

impl<'a> DeviceSelector<'a> {
    pub fn new(host: &'a AudioHost) -> Self {
        Self { host }
    }

    pub fn list_devices(&self, role: DeviceRole) -> Result<Vec<Device>, AudioError> {
        self.host.list_devices(role)
    }

    /// Select by exact name (empty for the system default) and negotiate
    /// format and rate. Fails here, not at stream start, if nothing fits.
    pub fn select_device(&self, role: DeviceRole, name: &str) -> Result<BoundDevice, AudioError> {
        let enumerated = self.host.enumerate(role)?;
        let devices: Vec<Device> = enumerated.iter().map(|(d, _)| d.clone()).collect();
        let chosen = find_device(&devices, role, name)?;

        let (device, handle) = enumerated
            .into_iter()
            .find(|(d, _)| d.id == chosen.id)
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))?;

        let capabilities = self.host.capabilities(&handle, role)?;
        let format = capabilities.negotiate(&device.name)?;

        tracing::info!(
            "Selected {} device \"{}\" ({:?}, {} Hz, {} ch)",
            role,
            device.name,
            format.format,
            format.sample_rate,
            format.channels
        );

        Ok(BoundDevice { device, format, handle })
    }

    pub fn alternatives(&self, bound: &Device) -> Result<Vec<Device>, AudioError> {
        Ok(alternatives(&self.host.list_devices(bound.role)?, bound))
    }
}
