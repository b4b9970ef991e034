use std::sync::atomic::AtomicU64;

use crate::protocol::canonical::{
    CanonicalChoice, CanonicalMessage, CanonicalResponse, CanonicalRole, CanonicalUsage,
    ContentBlock, ConvertOptions, FinishReason, MessageContent, ReasoningDetail, ToolCall,
};
use crate::protocol::gemini::batch::parse_gemini_timestamp;
use crate::protocol::gemini::parts::{embed_signature_in_id, part_to_block, split_signature_from_id};
use crate::protocol::gemini::{GeminiCandidate, GeminiPart, GeminiResponse, GeminiUsageMetadata};
use crate::protocol::mapping::{
    empty_response_finish_reason, gemini_finish_to_canonical, is_error_finish_reason,
    resolve_finish_reason,
};
use crate::util::{next_generated_id, unix_now_secs};

static GENERATED_RESPONSE_ID_SEQ: AtomicU64 = AtomicU64::new(1);

/// Decode a Gemini `generateContent` response into the canonical shape.
///
/// Never fails and never returns zero choices: an empty or blocked response
/// yields one empty assistant choice carrying the mapped finish reason.
#[must_use]
pub fn decode_gemini_response(
    response: &GeminiResponse,
    request_model: &str,
    options: &ConvertOptions,
) -> CanonicalResponse {
    // --- metadata ---
    let id = response
        .response_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| next_generated_id("resp", &GENERATED_RESPONSE_ID_SEQ));
    let model = response
        .model_version
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| request_model.to_string());
    let created = response
        .create_time
        .as_deref()
        .map(parse_gemini_timestamp)
        .filter(|ts| *ts > 0)
        .unwrap_or_else(unix_now_secs);

    // --- choices ---
    let candidates = response.candidates.as_deref().unwrap_or_default();
    let choices = if candidates.is_empty() {
        let block_reason = response
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref());
        if let Some(block_reason) = block_reason {
            tracing::warn!(block_reason, "gemini response: prompt blocked");
        }
        vec![empty_choice(0, empty_response_finish_reason(block_reason.is_some()))]
    } else {
        candidates
            .iter()
            .enumerate()
            .map(|(pos, candidate)| {
                let index = candidate
                    .index
                    .unwrap_or_else(|| u32::try_from(pos).unwrap_or(u32::MAX));
                decode_candidate(candidate, index, options)
            })
            .collect()
    };

    CanonicalResponse {
        id,
        model,
        created,
        choices,
        usage: usage_from_gemini(response.usage_metadata.as_ref()),
    }
}

/// Map Gemini usage metadata onto canonical counters.
#[must_use]
pub fn usage_from_gemini(usage: Option<&GeminiUsageMetadata>) -> CanonicalUsage {
    let Some(usage) = usage else {
        return CanonicalUsage::default();
    };
    let prompt = usage.prompt_token_count.unwrap_or(0);
    let completion = usage.candidates_token_count.unwrap_or(0);
    let reasoning = usage.thoughts_token_count.unwrap_or(0);
    CanonicalUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: usage
            .total_token_count
            .unwrap_or(prompt + completion + reasoning),
        cached_tokens: usage.cached_content_token_count.unwrap_or(0),
        reasoning_tokens: reasoning,
    }
}

fn empty_choice(index: u32, finish_reason: FinishReason) -> CanonicalChoice {
    CanonicalChoice {
        index,
        message: CanonicalMessage::text(CanonicalRole::Assistant, ""),
        finish_reason: Some(finish_reason),
    }
}

fn decode_candidate(
    candidate: &GeminiCandidate,
    index: u32,
    options: &ConvertOptions,
) -> CanonicalChoice {
    if let Some(reason) = candidate
        .finish_reason
        .as_deref()
        .filter(|r| is_error_finish_reason(r))
    {
        tracing::warn!(
            finish_reason = reason,
            finish_message = candidate.finish_message.as_deref().unwrap_or_default(),
            "gemini response: candidate finished with an error reason"
        );
        return empty_choice(index, gemini_finish_to_canonical(reason));
    }

    let mut blocks: Vec<ContentBlock> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut reasoning: Vec<ReasoningDetail> = Vec::new();

    for part in &candidate.content.parts {
        match part {
            GeminiPart::Text {
                text,
                thought,
                thought_signature,
            } => {
                if *thought {
                    if !text.is_empty() {
                        reasoning.push(ReasoningDetail::thought(reasoning.len(), text.clone()));
                    }
                } else if !text.is_empty() {
                    match blocks.last_mut() {
                        Some(ContentBlock::Text { text: last }) => last.push_str(text),
                        _ => blocks.push(ContentBlock::text(text.clone())),
                    }
                }
                if let Some(signature) = thought_signature {
                    reasoning.push(ReasoningDetail::signature(
                        reasoning.len(),
                        signature.clone(),
                        None,
                    ));
                }
            }
            GeminiPart::FunctionCall {
                call,
                thought_signature,
            } => {
                let raw_id = call
                    .id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .unwrap_or(call.name.as_str());
                let (clean_id, embedded) = split_signature_from_id(raw_id);
                let signature = embedded.or_else(|| thought_signature.clone());
                let visible_id = match &signature {
                    Some(sig) if options.embed_thought_signatures => {
                        embed_signature_in_id(clean_id, sig)
                    }
                    _ => clean_id.to_string(),
                };
                if let Some(sig) = signature {
                    reasoning.push(ReasoningDetail::signature(
                        reasoning.len(),
                        sig,
                        Some(clean_id.to_string()),
                    ));
                }
                tool_calls.push(ToolCall {
                    index: tool_calls.len(),
                    id: visible_id,
                    name: call.name.clone(),
                    arguments: call
                        .args
                        .as_ref()
                        .map_or_else(|| "{}".to_string(), ToString::to_string),
                });
            }
            GeminiPart::ThoughtSignature(signature) => {
                reasoning.push(ReasoningDetail::signature(
                    reasoning.len(),
                    signature.clone(),
                    None,
                ));
            }
            GeminiPart::FunctionResponse(response) => {
                tracing::debug!(name = %response.name, "gemini response: ignoring functionResponse part");
            }
            other => blocks.extend(part_to_block(other)),
        }
    }

    let finish_reason = resolve_finish_reason(candidate.finish_reason.as_deref(), !tool_calls.is_empty());

    let content = match blocks.as_slice() {
        [] => MessageContent::Text(String::new()),
        [ContentBlock::Text { text }] => MessageContent::Text(text.clone()),
        _ => MessageContent::Blocks(blocks),
    };

    CanonicalChoice {
        index,
        message: CanonicalMessage {
            tool_calls,
            reasoning_details: reasoning,
            ..CanonicalMessage::new(CanonicalRole::Assistant, content)
        },
        finish_reason: Some(finish_reason),
    }
}
