use super::canonical::{CanonicalRole, FinishReason};

// ---------------------------------------------------------------------------
// Role mappings
// ---------------------------------------------------------------------------

/// Gemini content role for a canonical role.
///
/// Tool results answer the model's own turn and travel as `model`; callers
/// that need them in a `user` turn opt in through
/// `ConvertOptions::tool_results_as_user`. System content never reaches
/// `contents` (it becomes `systemInstruction`).
#[must_use]
pub fn canonical_role_to_gemini(role: CanonicalRole) -> &'static str {
    match role {
        CanonicalRole::Assistant | CanonicalRole::Tool => "model",
        CanonicalRole::System | CanonicalRole::User => "user",
    }
}

// ---------------------------------------------------------------------------
// Finish reason classification
// ---------------------------------------------------------------------------

/// Finish reasons that signal a blocked or failed generation.
const ERROR_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "MALFORMED_FUNCTION_CALL",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "IMAGE_SAFETY",
    "UNEXPECTED_TOOL_CALL",
];

/// Map a Gemini finish reason onto the canonical set.
#[must_use]
pub fn gemini_finish_to_canonical(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        | "IMAGE_SAFETY" | "IMAGE_PROHIBITED_CONTENT" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

/// Whether a Gemini finish reason means the candidate carries no usable output.
#[must_use]
pub fn is_error_finish_reason(reason: &str) -> bool {
    ERROR_FINISH_REASONS.contains(&reason)
}

/// Final canonical reason, promoting `stop` to `tool_calls` when calls were made.
#[must_use]
pub fn resolve_finish_reason(reason: Option<&str>, has_tool_calls: bool) -> FinishReason {
    let base = reason
        .filter(|r| !r.is_empty())
        .map_or(FinishReason::Stop, gemini_finish_to_canonical);
    if base == FinishReason::Stop && has_tool_calls {
        FinishReason::ToolCalls
    } else {
        base
    }
}

/// Reason for a response that produced no candidate at all.
#[must_use]
pub fn empty_response_finish_reason(prompt_blocked: bool) -> FinishReason {
    if prompt_blocked {
        FinishReason::ContentFilter
    } else {
        FinishReason::Other
    }
}
