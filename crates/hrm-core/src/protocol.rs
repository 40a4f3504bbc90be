//! Recorder wire protocol.
//!
//! Pure, stateless conversions between domain records and the recorder's
//! fixed-layout little-endian buffers.
//!
//! ```text
//! time sync (5B)       ┌──────┬────────────────┐
//!                      │ 0xFB │ posix secs u32 │
//!                      └──────┴────────────────┘
//! record request (7B)  ┌──────┬───────────────┬────────────┐
//!                      │ 0x10 │ start id u32  │ count u16  │
//!                      └──────┴───────────────┴────────────┘
//! status (8B)          ┌───────────────┬───────────────┐
//!                      │ min id u32    │ max id u32    │
//!                      └───────────────┴───────────────┘
//! notification         ┌───────────┬──────┬─────┬──────────────────┐
//!                      │ id u32    │ kind │ len │ kind-specific... │
//!                      └───────────┴──────┴─────┴──────────────────┘
//! ```

use uuid::Uuid;

use crate::error::{HrmError, Result};
use crate::types::{
    EnvironmentalPayload, RecordEnvelope, RecordKind, RecordPayload, RecordRange, RriPayload,
    RRI_INTERVALS,
};

// ── GATT identifiers ─────────────────────────────────────────

/// Recorder primary service.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x30c4_d481_ea34_457b_8d54_5efc_6252_41f7);
/// Command characteristic (write).
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0xe906_2e71_9e62_4bc6_b0d3_35cd_cd9b_027b);
/// Record status characteristic (read).
pub const RECORD_STATUS_CHAR_UUID: Uuid =
    Uuid::from_u128(0x30c4_d483_ea34_457b_8d54_5efc_6252_41f7);
/// Record notification characteristic (notify).
pub const RECORD_NOTIFY_CHAR_UUID: Uuid =
    Uuid::from_u128(0x30c4_d484_ea34_457b_8d54_5efc_6252_41f7);
/// Standard Device Information service (`0x180A`).
pub const DEVICE_INFO_SERVICE_UUID: Uuid = bluetooth_base_uuid(0x180A);
/// Standard Firmware Revision String characteristic (`0x2A26`).
pub const FIRMWARE_REVISION_CHAR_UUID: Uuid = bluetooth_base_uuid(0x2A26);

/// Expand a 16-bit assigned number onto the Bluetooth base UUID.
const fn bluetooth_base_uuid(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5f9b_34fb | ((short as u128) << 96))
}

// ── Opcodes and layout ───────────────────────────────────────

/// Opcode: set device clock.
pub const OP_SET_CLOCK: u8 = 0xFB;
/// Opcode: request a record range.
pub const OP_REQUEST_RECORDS: u8 = 0x10;

/// Length of the time sync command.
pub const TIME_SYNC_LEN: usize = 5;
/// Length of the record request command.
pub const RECORD_REQUEST_LEN: usize = 7;
/// Length of the record status buffer.
pub const STATUS_LEN: usize = 8;
/// Common notification header: id, kind, declared length.
pub const HEADER_LEN: usize = 6;
/// Minimum RRI frame: header, timestamp, 8 intervals, led, sequence.
pub const RRI_FRAME_LEN: usize = 28;
/// Minimum environmental frame: header, timestamp, 4 readings, battery, flags.
pub const ENV_FRAME_LEN: usize = 20;

const BODY_OFFSET: usize = HEADER_LEN;
const INTERVALS_OFFSET: usize = BODY_OFFSET + 4;
const READINGS_SCALE: f64 = 100.0;

// ── Outbound commands ────────────────────────────────────────

/// Encode the clock sync command for `posix_secs`.
#[must_use]
pub fn encode_time_sync(posix_secs: u32) -> [u8; TIME_SYNC_LEN] {
    let mut buf = [0u8; TIME_SYNC_LEN];
    buf[0] = OP_SET_CLOCK;
    buf[1..5].copy_from_slice(&posix_secs.to_le_bytes());
    buf
}

/// Encode a request for `count` records starting at `start_id`.
#[must_use]
pub fn encode_record_request(start_id: u32, count: u16) -> [u8; RECORD_REQUEST_LEN] {
    let mut buf = [0u8; RECORD_REQUEST_LEN];
    buf[0] = OP_REQUEST_RECORDS;
    buf[1..5].copy_from_slice(&start_id.to_le_bytes());
    buf[5..7].copy_from_slice(&count.to_le_bytes());
    buf
}

// ── Inbound decoding ─────────────────────────────────────────

/// Decode the record status characteristic value.
///
/// # Errors
///
/// Returns [`HrmError::MalformedRecord`] if `buf` is shorter than 8 bytes.
pub fn decode_record_range(buf: &[u8]) -> Result<RecordRange> {
    ensure_len(buf, STATUS_LEN, "status")?;
    Ok(RecordRange {
        min_id: read_u32(buf, 0),
        max_id: read_u32(buf, 4),
    })
}

/// Decode one notification frame.
///
/// Unknown kinds decode to an envelope with [`RecordPayload::Empty`]; the
/// declared length byte is carried through but never used to bound parsing.
///
/// # Errors
///
/// Returns [`HrmError::MalformedRecord`] if `buf` is shorter than the header,
/// or shorter than the fixed layout of its declared kind.
pub fn decode_record(buf: &[u8]) -> Result<RecordEnvelope> {
    ensure_len(buf, HEADER_LEN, "header")?;

    let id = read_u32(buf, 0);
    let kind = RecordKind::from_byte(buf[4]);
    let length = buf[5];

    let payload = match kind {
        RecordKind::Rri => {
            ensure_len(buf, RRI_FRAME_LEN, "RRI")?;
            let mut intervals = [0u16; RRI_INTERVALS];
            for (i, interval) in intervals.iter_mut().enumerate() {
                *interval = read_u16(buf, INTERVALS_OFFSET + i * 2);
            }
            RecordPayload::Rri(RriPayload {
                timestamp: read_u32(buf, BODY_OFFSET),
                intervals,
                led_state: buf[26],
                sequence: buf[27],
            })
        }
        RecordKind::Environmental => {
            ensure_len(buf, ENV_FRAME_LEN, "ENV")?;
            RecordPayload::Environmental(EnvironmentalPayload {
                timestamp: read_u32(buf, BODY_OFFSET),
                humidity: read_scaled(buf, 10),
                temperature: read_scaled(buf, 12),
                skin_temperature: read_scaled(buf, 14),
                et_temperature: read_scaled(buf, 16),
                battery: buf[18],
                flags: buf[19],
            })
        }
        RecordKind::Unknown(_) => RecordPayload::Empty,
    };

    Ok(RecordEnvelope {
        id,
        kind,
        length,
        payload,
    })
}

// ── Device-side encoders ─────────────────────────────────────
//
// The recorder is the only real producer of these layouts; the encoders below
// back the mock device and the decoder tests.

/// Encode a status buffer.
#[must_use]
pub fn encode_record_range(range: RecordRange) -> [u8; STATUS_LEN] {
    let mut buf = [0u8; STATUS_LEN];
    buf[0..4].copy_from_slice(&range.min_id.to_le_bytes());
    buf[4..8].copy_from_slice(&range.max_id.to_le_bytes());
    buf
}

/// Encode a record as the device would notify it.
///
/// Empty payloads produce a bare header.
#[must_use]
pub fn encode_record(record: &RecordEnvelope) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RRI_FRAME_LEN);
    buf.extend_from_slice(&record.id.to_le_bytes());
    buf.push(record.kind.as_byte());
    buf.push(record.length);

    match &record.payload {
        RecordPayload::Rri(rri) => {
            buf.extend_from_slice(&rri.timestamp.to_le_bytes());
            for interval in rri.intervals {
                buf.extend_from_slice(&interval.to_le_bytes());
            }
            buf.push(rri.led_state);
            buf.push(rri.sequence);
        }
        RecordPayload::Environmental(env) => {
            buf.extend_from_slice(&env.timestamp.to_le_bytes());
            for reading in [
                env.humidity,
                env.temperature,
                env.skin_temperature,
                env.et_temperature,
            ] {
                buf.extend_from_slice(&to_raw_reading(reading).to_le_bytes());
            }
            buf.push(env.battery);
            buf.push(env.flags);
        }
        RecordPayload::Empty => {}
    }
    buf
}

// ── Helpers ──────────────────────────────────────────────────

fn ensure_len(buf: &[u8], expected: usize, kind: &str) -> Result<()> {
    if buf.len() < expected {
        return Err(HrmError::MalformedRecord {
            kind: kind.to_string(),
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_scaled(buf: &[u8], offset: usize) -> f64 {
    f64::from(read_u16(buf, offset)) / READINGS_SCALE
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_raw_reading(value: f64) -> u16 {
    // `as` saturates out-of-range floats (and maps NaN to 0).
    (value * READINGS_SCALE).round() as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rri_frame() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&42u32.to_le_bytes());
        buf.push(0x01);
        buf.push(22);
        buf.extend_from_slice(&1000u32.to_le_bytes());
        for v in [800u16, 805, 810, 795, 802, 798, 811, 799] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.push(1);
        buf.push(5);
        buf
    }

    fn env_frame() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.push(0x02);
        buf.push(14);
        buf.extend_from_slice(&1000u32.to_le_bytes());
        for v in [5500u16, 3650, 3200, 3300] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.push(80);
        buf.push(0);
        buf
    }

    #[test]
    fn test_service_uuids() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "30c4d481-ea34-457b-8d54-5efc625241f7"
        );
        assert_eq!(
            COMMAND_CHAR_UUID.to_string(),
            "e9062e71-9e62-4bc6-b0d3-35cdcd9b027b"
        );
        assert_eq!(
            DEVICE_INFO_SERVICE_UUID.to_string(),
            "0000180a-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            FIRMWARE_REVISION_CHAR_UUID.to_string(),
            "00002a26-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_encode_time_sync() {
        let buf = encode_time_sync(0x6543_2100);
        assert_eq!(buf, [0xFB, 0x00, 0x21, 0x43, 0x65]);
    }

    #[test]
    fn test_encode_record_request() {
        let buf = encode_record_request(0x0102_0304, 0x0A0B);
        assert_eq!(buf, [0x10, 0x04, 0x03, 0x02, 0x01, 0x0B, 0x0A]);
    }

    #[test]
    fn test_decode_record_range() {
        let buf = [100, 0, 0, 0, 0x68, 0x10, 0, 0];
        let range = decode_record_range(&buf).unwrap();
        assert_eq!(range.min_id, 100);
        assert_eq!(range.max_id, 4200);
    }

    #[test]
    fn test_decode_record_range_too_short() {
        let err = decode_record_range(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            HrmError::MalformedRecord {
                expected: 8,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_rri_fixture() {
        let record = decode_record(&rri_frame()).unwrap();
        assert_eq!(record.id, 42);
        assert_eq!(record.kind, RecordKind::Rri);
        assert_eq!(record.length, 22);
        let RecordPayload::Rri(rri) = record.payload else {
            panic!("expected RRI payload, got {:?}", record.payload);
        };
        assert_eq!(rri.timestamp, 1000);
        assert_eq!(rri.intervals, [800, 805, 810, 795, 802, 798, 811, 799]);
        assert_eq!(rri.led_state, 1);
        assert_eq!(rri.sequence, 5);
    }

    #[test]
    fn test_decode_environmental_fixture() {
        let record = decode_record(&env_frame()).unwrap();
        assert_eq!(record.kind, RecordKind::Environmental);
        let RecordPayload::Environmental(env) = record.payload else {
            panic!("expected environmental payload, got {:?}", record.payload);
        };
        assert!((env.humidity - 55.0).abs() < f64::EPSILON);
        assert!((env.temperature - 36.5).abs() < f64::EPSILON);
        assert!((env.skin_temperature - 32.0).abs() < f64::EPSILON);
        assert!((env.et_temperature - 33.0).abs() < f64::EPSILON);
        assert_eq!(env.battery, 80);
        assert_eq!(env.flags, 0);
    }

    #[test]
    fn test_decode_ignores_declared_length() {
        let mut frame = rri_frame();
        frame[5] = 0;
        let record = decode_record(&frame).unwrap();
        assert_eq!(record.length, 0);
        assert!(matches!(record.payload, RecordPayload::Rri(_)));
    }

    #[test]
    fn test_decode_accepts_trailing_bytes() {
        let mut frame = env_frame();
        frame.extend_from_slice(&[0xAA; 4]);
        assert!(decode_record(&frame).is_ok());
    }

    #[test]
    fn test_decode_short_rri_is_malformed() {
        let frame = rri_frame();
        let err = decode_record(&frame[..RRI_FRAME_LEN - 1]).unwrap_err();
        assert!(matches!(
            err,
            HrmError::MalformedRecord {
                expected: RRI_FRAME_LEN,
                actual: 27,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_short_environmental_is_malformed() {
        let frame = env_frame();
        let err = decode_record(&frame[..12]).unwrap_err();
        assert!(matches!(
            err,
            HrmError::MalformedRecord {
                expected: ENV_FRAME_LEN,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_short_header_is_malformed() {
        assert!(matches!(
            decode_record(&[0x01, 0x00]),
            Err(HrmError::MalformedRecord {
                expected: HEADER_LEN,
                ..
            })
        ));
        assert!(decode_record(&[]).is_err());
    }

    #[test]
    fn test_decode_unknown_kind() {
        let record = decode_record(&[9, 0, 0, 0, 0xFF, 3, 1, 2, 3]).unwrap();
        assert_eq!(record.id, 9);
        assert_eq!(record.kind, RecordKind::Unknown(0xFF));
        assert_eq!(record.length, 3);
        assert_eq!(record.payload, RecordPayload::Empty);
    }

    #[test]
    fn test_unknown_kind_with_bare_header() {
        let record = decode_record(&[1, 0, 0, 0, 0x00, 0]).unwrap();
        assert_eq!(record.kind, RecordKind::Unknown(0));
    }

    #[test]
    fn test_encoders_reproduce_device_frames() {
        let rri = decode_record(&rri_frame()).unwrap();
        assert_eq!(encode_record(&rri), rri_frame());

        let env = decode_record(&env_frame()).unwrap();
        assert_eq!(encode_record(&env), env_frame());
    }

    #[test]
    fn test_environmental_encode_rounds_to_hundredths() {
        let record = RecordEnvelope {
            id: 1,
            kind: RecordKind::Environmental,
            length: 14,
            payload: RecordPayload::Environmental(EnvironmentalPayload {
                timestamp: 5,
                humidity: 41.27,
                temperature: 21.05,
                skin_temperature: 0.0,
                et_temperature: 655.35,
                battery: 100,
                flags: 0b101,
            }),
        };
        assert_eq!(decode_record(&encode_record(&record)).unwrap(), record);
    }

    #[test]
    fn test_status_encode_matches_decode() {
        let range = RecordRange {
            min_id: 1,
            max_id: u32::MAX,
        };
        assert_eq!(decode_record_range(&encode_record_range(range)).unwrap(), range);
    }
}
