use serde::{Deserialize, Serialize};

use crate::error::CanonicalError;
use crate::util::truncate_for_log;

const RAW_ERROR_BODY_MAX: usize = 512;

/// The `error` object of a Gemini error payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeminiErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiErrorBody,
}

/// Parse a non-2xx Gemini response body into a canonical upstream error.
///
/// Accepts, in order: an array of `{"error": {...}}` objects (messages are
/// joined, the first code wins), a single `{"error": {...}}` object, and
/// finally any other body, which is kept verbatim (truncated) with the HTTP
/// status.
#[must_use]
pub fn parse_gemini_error(status: u16, body: &[u8]) -> CanonicalError {
    if let Ok(errors) = serde_json::from_slice::<Vec<GeminiErrorEnvelope>>(body) {
        if let Some(first) = errors.first() {
            let code = error_code(&first.error);
            let message = errors
                .iter()
                .map(|e| e.error.message.as_str())
                .filter(|m| !m.is_empty())
                .collect::<Vec<_>>()
                .join("; ");
            return CanonicalError::Upstream {
                context: None,
                status,
                code,
                message,
            };
        }
    }

    if let Ok(envelope) = serde_json::from_slice::<GeminiErrorEnvelope>(body) {
        return upstream_error_from_body(status, &envelope.error);
    }

    let raw = String::from_utf8_lossy(body);
    let raw = raw.trim();
    let message = if raw.is_empty() {
        format!("upstream returned status {status}")
    } else {
        truncate_for_log(raw, RAW_ERROR_BODY_MAX).to_string()
    };
    CanonicalError::Upstream {
        context: None,
        status,
        code: None,
        message,
    }
}

/// Convert an in-band error object (e.g. a stream error frame).
#[must_use]
pub fn upstream_error_from_body(status: u16, body: &GeminiErrorBody) -> CanonicalError {
    let status = body
        .code
        .and_then(|code| u16::try_from(code).ok())
        .filter(|code| (400..600).contains(code))
        .unwrap_or(status);
    CanonicalError::Upstream {
        context: None,
        status,
        code: error_code(body),
        message: body.message.clone(),
    }
}

fn error_code(body: &GeminiErrorBody) -> Option<String> {
    body.status
        .clone()
        .or_else(|| body.code.map(|code| code.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_shape_joins_messages_and_keeps_first_code() {
        let body = br#"[{"error":{"code":400,"message":"bad field","status":"INVALID_ARGUMENT"}},
                        {"error":{"code":400,"message":"another","status":"FAILED_PRECONDITION"}}]"#;
        match parse_gemini_error(400, body) {
            CanonicalError::Upstream {
                status,
                code,
                message,
                ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(code.as_deref(), Some("INVALID_ARGUMENT"));
                assert_eq!(message, "bad field; another");
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[test]
    fn single_shape_is_parsed() {
        let body = br#"{"error":{"code":429,"message":"quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        match parse_gemini_error(429, body) {
            CanonicalError::Upstream { code, message, .. } => {
                assert_eq!(code.as_deref(), Some("RESOURCE_EXHAUSTED"));
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[test]
    fn unknown_body_falls_back_to_status() {
        match parse_gemini_error(502, b"<html>bad gateway</html>") {
            CanonicalError::Upstream {
                status,
                code,
                message,
                ..
            } => {
                assert_eq!(status, 502);
                assert_eq!(code, None);
                assert_eq!(message, "<html>bad gateway</html>");
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
        match parse_gemini_error(503, b"") {
            CanonicalError::Upstream { message, .. } => {
                assert_eq!(message, "upstream returned status 503");
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[test]
    fn in_band_error_code_overrides_status() {
        let body = GeminiErrorBody {
            code: Some(500),
            message: "internal".into(),
            status: None,
        };
        let err = upstream_error_from_body(200, &body);
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.upstream_code(), Some("500"));
    }
}
