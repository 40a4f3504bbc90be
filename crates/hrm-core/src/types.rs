//! Domain types shared across the recorder session and the HTTP surface.
//!
//! Everything here is plain data: decoded records, the device descriptor and
//! the externally visible connection state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Number of R-R intervals carried by one RRI record.
pub const RRI_INTERVALS: usize = 8;

/// Firmware revision reported when the device information service is absent.
pub const UNKNOWN_FIRMWARE: &str = "unknown";

/// A recorder that can be bound to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviceDescriptor {
    /// Transport-level identifier (the Bluetooth address on BlueZ).
    #[schema(example = "C4:7F:51:12:34:56")]
    pub id: String,

    /// Advertised device name, if any.
    #[schema(example = "HRM-REC 0042")]
    pub name: Option<String>,
}

impl DeviceDescriptor {
    /// Create a descriptor with no advertised name.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    /// Attach an advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// Record kind discriminator (header byte 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// R-R interval batch (`0x01`).
    Rri,
    /// Environmental sensor snapshot (`0x02`).
    Environmental,
    /// Any other discriminator; payload left unparsed.
    Unknown(u8),
}

impl RecordKind {
    /// Map a raw discriminator byte to a kind.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Self::Rri,
            0x02 => Self::Environmental,
            other => Self::Unknown(other),
        }
    }

    /// The discriminator byte for this kind.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Rri => 0x01,
            Self::Environmental => 0x02,
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rri => f.write_str("RRI"),
            Self::Environmental => f.write_str("ENV"),
            Self::Unknown(byte) => write!(f, "UNKNOWN(0x{byte:02x})"),
        }
    }
}

/// Eight consecutive R-R intervals with LED and sequence bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RriPayload {
    /// Device clock, POSIX seconds.
    #[schema(example = 1000)]
    pub timestamp: u32,

    /// R-R intervals in milliseconds, in measurement order.
    #[schema(value_type = Vec<u16>, example = json!([800, 805, 810, 795, 802, 798, 811, 799]))]
    pub intervals: [u16; RRI_INTERVALS],

    /// Optical sensor LED state.
    pub led_state: u8,

    /// Rolling sequence counter.
    pub sequence: u8,
}

/// Environmental readings, each decoded from hundredths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EnvironmentalPayload {
    /// Device clock, POSIX seconds.
    pub timestamp: u32,

    /// Relative humidity in percent.
    #[schema(example = 55.0)]
    pub humidity: f64,

    /// Ambient temperature in °C.
    #[schema(example = 36.5)]
    pub temperature: f64,

    /// Skin temperature in °C.
    #[schema(example = 32.0)]
    pub skin_temperature: f64,

    /// ET sensor temperature in °C.
    #[schema(example = 33.0)]
    pub et_temperature: f64,

    /// Battery level in percent.
    #[schema(example = 80)]
    pub battery: u8,

    /// Device status flags.
    pub flags: u8,
}

/// Kind-specific body of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordPayload {
    /// Body of a [`RecordKind::Rri`] frame.
    Rri(RriPayload),
    /// Body of a [`RecordKind::Environmental`] frame.
    Environmental(EnvironmentalPayload),
    /// Unrecognised kinds carry no parsed body.
    Empty,
}

/// One decoded notification frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RecordEnvelope {
    /// Record index on the device.
    #[schema(example = 42)]
    pub id: u32,

    /// Record kind from the header.
    pub kind: RecordKind,

    /// Declared payload length. Informational only; decoding uses fixed
    /// offsets per kind.
    pub length: u8,

    /// Decoded body.
    pub payload: RecordPayload,
}

impl fmt::Display for RecordEnvelope {
    /// Renders the comma-separated log line used by the recorder tooling.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.id)?;
        match &self.payload {
            RecordPayload::Rri(rri) => {
                write!(f, ", {}", rri.timestamp)?;
                for interval in rri.intervals {
                    write!(f, ", {interval}")?;
                }
                write!(f, ", {}, {}", rri.led_state, rri.sequence)
            }
            RecordPayload::Environmental(env) => write!(
                f,
                ", {}, {}, {}, {}, {}, {}, {}",
                env.timestamp,
                env.humidity,
                env.temperature,
                env.skin_temperature,
                env.et_temperature,
                env.battery,
                env.flags
            ),
            RecordPayload::Empty => Ok(()),
        }
    }
}

/// Record index range available on the device at query time.
///
/// There is no freshness guarantee: the device keeps recording after the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecordRange {
    /// Oldest record id still stored.
    #[schema(example = 100)]
    pub min_id: u32,

    /// Newest record id.
    #[schema(example = 4200)]
    pub max_id: u32,
}

impl fmt::Display for RecordRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RANGE: {}, {}", self.min_id, self.max_id)
    }
}

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No live link.
    Disconnected,
    /// Link establishment in progress.
    Connecting,
    /// Link live and notifications armed.
    Connected,
    /// Waiting for a scheduled reconnect attempt.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// When the attempt fires.
        scheduled_at: DateTime<Utc>,
    },
}

impl ConnectionState {
    /// Whether a link is live.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Snapshot of a session for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionStatus {
    /// Current connection state.
    pub state: ConnectionState,

    /// Bound device, if any.
    pub device: Option<DeviceDescriptor>,

    /// Firmware revision read on the last successful connect.
    #[schema(example = "1.4.2")]
    pub firmware_revision: String,

    /// Consecutive unsolicited losses since the last confirmed connection.
    pub retry_budget: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_bytes() {
        assert_eq!(RecordKind::from_byte(0x01), RecordKind::Rri);
        assert_eq!(RecordKind::from_byte(0x02), RecordKind::Environmental);
        assert_eq!(RecordKind::from_byte(0xFF), RecordKind::Unknown(0xFF));
        assert_eq!(RecordKind::Unknown(0x7A).as_byte(), 0x7A);
    }

    #[test]
    fn test_rri_log_line() {
        let record = RecordEnvelope {
            id: 42,
            kind: RecordKind::Rri,
            length: 22,
            payload: RecordPayload::Rri(RriPayload {
                timestamp: 1000,
                intervals: [800, 805, 810, 795, 802, 798, 811, 799],
                led_state: 1,
                sequence: 5,
            }),
        };
        assert_eq!(
            record.to_string(),
            "RRI: 42, 1000, 800, 805, 810, 795, 802, 798, 811, 799, 1, 5"
        );
    }

    #[test]
    fn test_environmental_log_line() {
        let record = RecordEnvelope {
            id: 7,
            kind: RecordKind::Environmental,
            length: 14,
            payload: RecordPayload::Environmental(EnvironmentalPayload {
                timestamp: 1000,
                humidity: 55.0,
                temperature: 36.5,
                skin_temperature: 32.0,
                et_temperature: 33.0,
                battery: 80,
                flags: 0,
            }),
        };
        assert_eq!(record.to_string(), "ENV: 7, 1000, 55, 36.5, 32, 33, 80, 0");
    }

    #[test]
    fn test_unknown_log_line() {
        let record = RecordEnvelope {
            id: 9,
            kind: RecordKind::Unknown(0xFF),
            length: 0,
            payload: RecordPayload::Empty,
        };
        assert_eq!(record.to_string(), "UNKNOWN(0xff): 9");
    }

    #[test]
    fn test_connection_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::Connected).unwrap();
        assert_eq!(json, r#"{"state":"connected"}"#);
    }

    #[test]
    fn test_device_descriptor_display() {
        assert_eq!(DeviceDescriptor::new("AA").to_string(), "AA");
        assert_eq!(
            DeviceDescriptor::new("AA").with_name("HRM").to_string(),
            "HRM (AA)"
        );
    }
}
