// Wire timestamp format: yyyy-MM-ddTHH:mm:ss.ffffffZ
//
// Six fractional digits are mandatory; the parser rejects every other
// precision because the formatted string participates in block hashes.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::error::CoreError;

const SECONDS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const WIRE_LEN: usize = 27;

/// Format an instant in the wire form, truncated to microseconds.
pub fn format(instant: &DateTime<Utc>) -> String {
    truncate_to_micros(*instant)
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

/// Parse a wire timestamp, accepting only the exact six-digit form.
pub fn parse(text: &str) -> Result<DateTime<Utc>, CoreError> {
    let bytes = text.as_bytes();
    if bytes.len() != WIRE_LEN || bytes[19] != b'.' || bytes[26] != b'Z' {
        return Err(CoreError::Decoding(format!("malformed timestamp {text:?}")));
    }
    let fraction = &text[20..26];
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::Decoding(format!("malformed timestamp {text:?}")));
    }
    let seconds = NaiveDateTime::parse_from_str(&text[..19], SECONDS_FORMAT)
        .map_err(|e| CoreError::Decoding(format!("malformed timestamp {text:?}: {e}")))?;
    let micros: i64 = fraction
        .parse()
        .map_err(|e| CoreError::Decoding(format!("malformed timestamp {text:?}: {e}")))?;
    Ok(Utc.from_utc_datetime(&seconds) + Duration::microseconds(micros))
}

/// Drop sub-microsecond precision; the wire format cannot carry it.
pub fn truncate_to_micros(instant: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = instant.nanosecond() / 1_000 * 1_000;
    instant.with_nanosecond(nanos).unwrap_or(instant)
}
