use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) const HOUR_MS: u64 = 60 * 60 * 1000;
pub(crate) const DAY_MS: u64 = 24 * HOUR_MS;

/// Get current timestamp in milliseconds.
// u128 millis fits in u64 for realistic timestamps (until year 584942417)
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Hour of day (0-23, UTC) for an epoch timestamp in ms
// Result is < 24
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn hour_of_day(millis: u64) -> usize {
    ((millis / HOUR_MS) % 24) as usize
}

/// Day of week (0 = Sunday, UTC) for an epoch timestamp in ms
// Result is < 7
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn day_of_week(millis: u64) -> usize {
    // 1970-01-01 was a Thursday
    ((millis / DAY_MS + 4) % 7) as usize
}

/// Percent-encode a query string component
pub(crate) fn encode_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for byte in query.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
