use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Largest packet the host will fragment video into (one Ethernet MTU).
pub const MAX_PACKET_SIZE: u32 = 1500;
pub const MAX_DIMENSION: u32 = 4096;
pub const MAX_REFRESH_HZ: u32 = 240;

/// Immutable stream parameters negotiated with the host.
///
/// Built with [`StreamConfiguration::new`], which rejects out-of-range
/// values. Deserialisation goes through the same validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStreamConfiguration")]
pub struct StreamConfiguration {
    width: u32,
    height: u32,
    #[serde(rename = "refreshHz")]
    refresh_hz: u32,
    #[serde(rename = "bitrateKbps")]
    bitrate_kbps: u32,
    #[serde(rename = "packetSize")]
    packet_size: u32,
}

#[derive(Deserialize)]
struct RawStreamConfiguration {
    width: u32,
    height: u32,
    #[serde(alias = "refreshHz")]
    refresh_hz: u32,
    #[serde(alias = "bitrateKbps")]
    bitrate_kbps: u32,
    #[serde(alias = "packetSize")]
    packet_size: u32,
}

impl TryFrom<RawStreamConfiguration> for StreamConfiguration {
    type Error = ConfigError;

    fn try_from(raw: RawStreamConfiguration) -> Result<Self, Self::Error> {
        Self::new(raw.width, raw.height, raw.refresh_hz, raw.bitrate_kbps, raw.packet_size)
    }
}

impl Default for StreamConfiguration {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            refresh_hz: 60,
            bitrate_kbps: 10_000,
            packet_size: 1024,
        }
    }
}

impl StreamConfiguration {
    pub fn new(
        width: u32,
        height: u32,
        refresh_hz: u32,
        bitrate_kbps: u32,
        packet_size: u32,
    ) -> Result<Self, ConfigError> {
        let positive = [
            ("width", width),
            ("height", height),
            ("refresh rate", refresh_hz),
            ("bitrate", bitrate_kbps),
            ("packet size", packet_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::invalid(format!("{name} must be positive")));
            }
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(ConfigError::invalid(format!(
                "resolution {width}x{height} exceeds {MAX_DIMENSION}x{MAX_DIMENSION}"
            )));
        }
        if refresh_hz > MAX_REFRESH_HZ {
            return Err(ConfigError::invalid(format!(
                "refresh rate {refresh_hz} exceeds {MAX_REFRESH_HZ} Hz"
            )));
        }
        if packet_size > MAX_PACKET_SIZE {
            return Err(ConfigError::invalid(format!(
                "packet size {packet_size} exceeds {MAX_PACKET_SIZE} bytes"
            )));
        }
        Ok(Self { width, height, refresh_hz, bitrate_kbps, packet_size })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn refresh_hz(&self) -> u32 {
        self.refresh_hz
    }

    pub fn bitrate_kbps(&self) -> u32 {
        self.bitrate_kbps
    }

    pub fn packet_size(&self) -> u32 {
        self.packet_size
    }

    /// `WxHxFPS`, the form the host expects in a launch request.
    pub fn mode_string(&self) -> String {
        format!("{}x{}x{}", self.width, self.height, self.refresh_hz)
    }

    /// Interval between frames in microseconds.
    pub fn frame_interval_us(&self) -> u64 {
        1_000_000 / self.refresh_hz as u64
    }
}

impl std::fmt::Display for StreamConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}×{}@{} {} kbps (packet {} B)",
            self.width, self.height, self.refresh_hz, self.bitrate_kbps, self.packet_size
        )
    }
}
