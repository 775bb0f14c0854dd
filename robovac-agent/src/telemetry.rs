//! Lifetime statistics decoded from the opaque statistics data point
//!
//! The value is base64 over a small protobuf-like buffer. Two fields are
//! understood: the trailing `0x18`-tagged record holds the session count and
//! bytes 14..16 hold the cleaned area as a 2-byte varint. The cleaning time
//! is somewhere in there too but its layout is unknown, so it is always
//! reported as unknown.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dps::{keys, DataPointSnapshot};

/// Tag byte preceding the session count record (field 3, varint).
pub const COUNT_TAG: u8 = 0x18;

/// Fixed position of the area varint.
pub const AREA_OFFSET: usize = 14;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryStats {
    pub total_count: Option<u64>,
    pub total_area: Option<u64>,
    /// Never decoded.
    pub total_duration: Option<u64>,
}

impl TelemetryStats {
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Stats for a snapshot; all unknown when the statistics key is missing.
    pub fn from_snapshot(snapshot: &DataPointSnapshot) -> Self {
        snapshot
            .str(keys::STATISTICS)
            .map(decode)
            .unwrap_or_default()
    }
}

/// Decode a base64 statistics value. Never fails; unreadable fields are `None`.
pub fn decode(encoded: &str) -> TelemetryStats {
    let data = match STANDARD.decode(encoded.trim()) {
        Ok(data) => data,
        Err(e) => {
            debug!("Statistics value is not base64: {}", e);
            return TelemetryStats::unknown();
        }
    };
    decode_bytes(&data)
}

pub fn decode_bytes(data: &[u8]) -> TelemetryStats {
    TelemetryStats {
        total_count: total_count(data),
        total_area: total_area(data),
        total_duration: None,
    }
}

/// Decode a varint starting at `start`. Returns the value and the position
/// after its last byte, or `None` if the buffer ends mid-varint.
pub fn decode_varint(data: &[u8], start: usize) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;

    for (pos, byte) in data.iter().enumerate().skip(start) {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((value, pos + 1));
        }
        shift += 7;
    }
    None
}

/// The count record is 1 to 3 bytes after its tag, so the tag sits 2, 3 or 4
/// bytes from the end. The first position whose varint ends exactly at the
/// end of the buffer wins.
fn total_count(data: &[u8]) -> Option<u64> {
    (2..=4).find_map(|from_end| {
        let tag_pos = data.len().checked_sub(from_end)?;
        if data[tag_pos] != COUNT_TAG {
            return None;
        }
        match decode_varint(data, tag_pos + 1) {
            Some((value, end)) if end == data.len() => Some(value),
            _ => None,
        }
    })
}

fn total_area(data: &[u8]) -> Option<u64> {
    if data.len() < AREA_OFFSET + 2 {
        return None;
    }
    let (value, end) = decode_varint(data, AREA_OFFSET)?;
    (end <= AREA_OFFSET + 2).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    /// 18 bytes shaped like a device capture: area 300 m² at 14..16, count at the end.
    fn capture(count: &[u8]) -> Vec<u8> {
        let mut data = vec![
            0x10, 0x0a, 0x04, 0x08, 0x01, 0x10, 0x02, 0x12, 0x06, 0x08, 0x01, 0x10, 0x02, 0x20,
            0xac, 0x02,
        ];
        data.push(COUNT_TAG);
        data.extend_from_slice(count);
        data
    }

    #[test]
    fn test_one_byte_count() {
        let stats = decode(&encode(&capture(&[100])));
        assert_eq!(stats.total_count, Some(100));
    }

    #[test]
    fn test_two_byte_count() {
        // 200 = 0xc8 0x01 as a varint
        let stats = decode(&encode(&capture(&[0xc8, 0x01])));
        assert_eq!(stats.total_count, Some(200));
    }

    #[test]
    fn test_three_byte_count() {
        // 20000 = 0xa0 0x9c 0x01
        let stats = decode(&encode(&capture(&[0xa0, 0x9c, 0x01])));
        assert_eq!(stats.total_count, Some(20000));
    }

    #[test]
    fn test_area_at_fixed_offset() {
        let stats = decode(&encode(&capture(&[7])));
        assert_eq!(stats.total_area, Some(300));
    }

    #[test]
    fn test_area_single_byte() {
        let mut data = capture(&[7]);
        data[AREA_OFFSET] = 0x2a;
        assert_eq!(decode_bytes(&data).total_area, Some(42));
    }

    #[test]
    fn test_area_running_past_two_bytes_is_unknown() {
        let mut data = capture(&[7]);
        data[AREA_OFFSET + 1] = 0x82;
        assert_eq!(decode_bytes(&data).total_area, None);
    }

    #[test]
    fn test_empty_buffer_is_all_unknown() {
        assert_eq!(decode(""), TelemetryStats::unknown());
        assert_eq!(decode_bytes(&[]), TelemetryStats::unknown());
    }

    #[test]
    fn test_short_buffer_has_count_but_no_area() {
        let stats = decode_bytes(&[0x08, 0x01, COUNT_TAG, 0x05]);
        assert_eq!(stats.total_count, Some(5));
        assert_eq!(stats.total_area, None);
    }

    #[test]
    fn test_missing_tag_is_unknown_count() {
        let stats = decode_bytes(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(stats.total_count, None);
    }

    #[test]
    fn test_invalid_base64_is_unknown() {
        assert_eq!(decode("not base64!!"), TelemetryStats::unknown());
    }

    #[test]
    fn test_duration_is_always_unknown() {
        let stats = decode(&encode(&capture(&[0xc8, 0x01])));
        assert_eq!(stats.total_duration, None);
    }

    #[test]
    fn test_from_snapshot_without_statistics_key() {
        let snapshot: DataPointSnapshot = [(keys::BATTERY, 50i64)].into_iter().collect();
        assert_eq!(
            TelemetryStats::from_snapshot(&snapshot),
            TelemetryStats::unknown()
        );
    }

    #[test]
    fn test_varint_truncated() {
        assert_eq!(decode_varint(&[0x80, 0x80], 0), None);
        assert_eq!(decode_varint(&[0xac, 0x02], 0), Some((300, 2)));
    }
}
