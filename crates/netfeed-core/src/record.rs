//! Normalized capture records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of the protocol column in the storage schema
pub const PROTOCOL_MAX_CHARS: usize = 20;

/// Protocol label used when the dissector reports none
pub const UNKNOWN_PROTOCOL: &str = "UNKNOWN";

/// Storage-ready form of one capture event.
///
/// Absent optional values serialize as `null` rather than being skipped:
/// bulk inserts require every object in the array to carry the same keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Capture instant, rendered as RFC 3339 in UTC
    pub timestamp: DateTime<Utc>,

    /// Source address (never empty)
    pub src_ip: String,

    /// Destination address (never empty)
    pub dst_ip: String,

    /// Source port, TCP preferred over UDP
    pub src_port: Option<u16>,

    /// Destination port, TCP preferred over UDP
    pub dst_port: Option<u16>,

    /// Dissector protocol label, at most 20 characters
    pub protocol: String,

    /// Decoded payload text
    pub payload: Option<String>,

    /// Frame length in bytes
    pub payload_size: u64,

    /// Provenance
    pub metadata: RecordMetadata,
}

/// Provenance attached to every record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Capture origin, e.g. `tshark:live:wlan0`
    pub source: String,

    /// Frame sequence number reported by the capture tool
    pub frame_number: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NormalizedRecord {
        NormalizedRecord {
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            src_ip: "10.0.0.2".to_string(),
            dst_ip: "10.0.0.1".to_string(),
            src_port: None,
            dst_port: Some(80),
            protocol: "TCP".to_string(),
            payload: None,
            payload_size: 100,
            metadata: RecordMetadata {
                source: "tshark:file:/tmp/a.pcap".to_string(),
                frame_number: Some(1),
            },
        }
    }

    #[test]
    fn test_serializes_every_key() {
        let value = serde_json::to_value(sample()).unwrap();
        let obj = value.as_object().unwrap();
        for key in [
            "timestamp",
            "src_ip",
            "dst_ip",
            "src_port",
            "dst_port",
            "protocol",
            "payload",
            "payload_size",
            "metadata",
        ] {
            assert!(obj.contains_key(key), "missing key {}", key);
        }
        assert!(obj["src_port"].is_null());
        assert!(obj["payload"].is_null());
        assert_eq!(obj["metadata"]["frame_number"], 1);
    }

    #[test]
    fn test_timestamp_is_rfc3339_utc() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["timestamp"], "2023-11-14T22:13:20Z");
    }
}
