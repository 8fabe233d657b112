//! Capture line parser
//!
//! Converts one line of tab-separated dissector output into a
//! [`NormalizedRecord`]. Parsing is deliberately lenient: malformed numbers,
//! timestamps and protocol labels fall back to fixed substitutes, and only a
//! short line or a missing address drops the line.

use crate::record::{NormalizedRecord, RecordMetadata, PROTOCOL_MAX_CHARS, UNKNOWN_PROTOCOL};
use chrono::{DateTime, Utc};

/// Number of positional fields emitted per capture event
pub const FIELD_COUNT: usize = 11;

/// Field order, matching the `-e` arguments given to the capture tool
const TIMESTAMP: usize = 0;
const SRC_IP: usize = 1;
const DST_IP: usize = 2;
const TCP_SRC_PORT: usize = 3;
const UDP_SRC_PORT: usize = 4;
const TCP_DST_PORT: usize = 5;
const UDP_DST_PORT: usize = 6;
const PROTOCOL: usize = 7;
const FRAME_LEN: usize = 8;
const PAYLOAD: usize = 9;
const FRAME_NUMBER: usize = 10;

/// Parse one capture line.
///
/// Returns `None` when the line has fewer than 11 fields or when either
/// address is empty. Every other defect is absorbed by a fallback.
pub fn parse_line(line: &str, source: &str) -> Option<NormalizedRecord> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < FIELD_COUNT {
        return None;
    }

    let src_ip = first_scalar(fields[SRC_IP]);
    let dst_ip = first_scalar(fields[DST_IP]);
    if src_ip.is_empty() || dst_ip.is_empty() {
        return None;
    }

    let payload = fields[PAYLOAD].trim();

    Some(NormalizedRecord {
        timestamp: parse_epoch(fields[TIMESTAMP]).unwrap_or_else(Utc::now),
        src_ip: src_ip.to_string(),
        dst_ip: dst_ip.to_string(),
        src_port: choose_port(fields[TCP_SRC_PORT], fields[UDP_SRC_PORT]),
        dst_port: choose_port(fields[TCP_DST_PORT], fields[UDP_DST_PORT]),
        protocol: normalize_protocol(fields[PROTOCOL]),
        payload: (!payload.is_empty()).then(|| payload.to_string()),
        payload_size: parse_digits(fields[FRAME_LEN]).unwrap_or(0),
        metadata: RecordMetadata {
            source: source.to_string(),
            frame_number: parse_digits(fields[FRAME_NUMBER]),
        },
    })
}

/// First value of a field the capture tool may report as `a,b,c`
pub fn first_scalar(value: &str) -> &str {
    value.trim().split(',').next().unwrap_or("").trim()
}

/// Resolve a port from its TCP and UDP variants, TCP first
pub fn choose_port(tcp: &str, udp: &str) -> Option<u16> {
    parse_port(tcp).or_else(|| parse_port(udp))
}

fn parse_port(value: &str) -> Option<u16> {
    first_scalar(value).parse().ok()
}

/// Seconds since the epoch (fractional) to a UTC instant
pub fn parse_epoch(value: &str) -> Option<DateTime<Utc>> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() {
        return None;
    }

    let whole = secs.floor();
    let mut nanos = ((secs - whole) * 1e9).round() as u32;
    let mut whole = whole as i64;
    if nanos >= 1_000_000_000 {
        whole = whole.checked_add(1)?;
        nanos = 0;
    }

    DateTime::from_timestamp(whole, nanos)
}

fn normalize_protocol(value: &str) -> String {
    let label = value.trim();
    let label = if label.is_empty() { UNKNOWN_PROTOCOL } else { label };
    label.chars().take(PROTOCOL_MAX_CHARS).collect()
}

/// Unsigned integer from purely numeric text
fn parse_digits(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}
