use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

const HEX: &[u8; 16] = b"0123456789abcdef";

#[inline]
pub(crate) fn unix_now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
}

/// `{prefix}_{16 hex digits}` from a process-wide counter mixed with a random seed.
pub(crate) fn next_generated_id(prefix: &str, counter: &AtomicU64) -> String {
    static SEED: std::sync::LazyLock<u64> = std::sync::LazyLock::new(|| fastrand::u64(..));
    let id = counter.fetch_add(1, Ordering::Relaxed) ^ *SEED;
    let mut out = String::with_capacity(prefix.len() + 17);
    out.push_str(prefix);
    out.push('_');
    push_u64_hex_16(&mut out, id);
    out
}

#[inline]
fn push_u64_hex_16(out: &mut String, mut value: u64) {
    let mut buf = [b'0'; 16];
    let mut idx = 16;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for byte in buf {
        out.push(char::from(byte));
    }
}

/// Extract the JSON payload of an SSE `data:` line.
///
/// Returns `None` for blank lines, `:` comments, non-data fields and the
/// `[DONE]` sentinel.
#[inline]
pub(crate) fn extract_sse_data_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let payload = trimmed.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    Some(payload)
}

#[inline]
pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

#[inline]
pub(crate) fn decode_base64(text: &str) -> Option<Vec<u8>> {
    STANDARD.decode(text.trim()).ok()
}

/// Cut `text` to at most `max` bytes on a char boundary.
pub(crate) fn truncate_for_log(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Serde adapter for `Option<Vec<u8>>` carried as standard base64 text.
pub(crate) mod base64_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub(crate) fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_str(&super::encode_base64(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(text) => super::decode_base64(&text)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom("invalid base64 signature")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_payload_extraction_skips_non_data_lines() {
        assert_eq!(extract_sse_data_payload(""), None);
        assert_eq!(extract_sse_data_payload(": keepalive"), None);
        assert_eq!(extract_sse_data_payload("event: message"), None);
        assert_eq!(extract_sse_data_payload("data: [DONE]"), None);
        assert_eq!(extract_sse_data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(extract_sse_data_payload("data:{\"a\":1}\r"), Some("{\"a\":1}"));
    }

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let counter = AtomicU64::new(0);
        let a = next_generated_id("resp", &counter);
        let b = next_generated_id("resp", &counter);
        assert!(a.starts_with("resp_"));
        assert_eq!(a.len(), "resp_".len() + 16);
        assert_ne!(a, b);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_for_log("héllo", 2), "h");
        assert_eq!(truncate_for_log("abc", 10), "abc");
    }
}
