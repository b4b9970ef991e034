use std::time::Duration;

use tracing::info;

use crate::protocol::canonical::{CanonicalRequest, CanonicalUsage, ContentBlock, MessageContent};

/// Rough token estimate (`bytes / 4`), used only for logging.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimate prompt tokens from text content, tool-call arguments and tool
/// declarations. Media blocks are not counted.
#[must_use]
pub fn estimate_request_tokens(request: &CanonicalRequest) -> u64 {
    let mut total: u64 = 0;

    for message in &request.messages {
        match &message.content {
            MessageContent::Text(text) => total += estimate_tokens(text),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } | ContentBlock::Reasoning { text } => {
                            total += estimate_tokens(text);
                        }
                        _ => {}
                    }
                }
            }
        }
        for call in &message.tool_calls {
            total += estimate_tokens(&call.name) + estimate_tokens(&call.arguments);
        }
    }

    for tool in &request.tools {
        total += estimate_tokens(&tool.name);
        if let Some(description) = tool.description.as_deref() {
            total += estimate_tokens(description);
        }
        if let Some(parameters) = tool.parameters.as_ref() {
            if let Ok(serialized) = serde_json::to_string(parameters) {
                total += estimate_tokens(&serialized);
            }
        }
    }

    total
}

/// Log usage for a completed non-streaming request at INFO level.
pub fn log_request_usage(model: &str, usage: &CanonicalUsage, estimated_prompt: u64, duration: Duration) {
    info!(
        model = model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        cached_tokens = usage.cached_tokens,
        reasoning_tokens = usage.reasoning_tokens,
        estimated_prompt_tokens = estimated_prompt,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}

/// Log usage once a stream has ended. Streams that never reported usage are
/// logged with zeros and `usage_reported = false`.
pub fn log_stream_usage(model: &str, response_id: &str, usage: Option<&CanonicalUsage>, duration: Duration) {
    let reported = usage.is_some();
    let usage = usage.copied().unwrap_or_default();
    info!(
        model = model,
        response_id = response_id,
        usage_reported = reported,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        reasoning_tokens = usage.reasoning_tokens,
        duration_seconds = duration.as_secs_f64(),
        "stream completed"
    );
}
