use std::collections::HashMap;

use crate::error::CanonicalError;
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalRequest, CanonicalRole, CanonicalToolChoice, ConvertOptions,
    GenerationParams, JsonSchemaFormat, MessageContent, ReasoningConfig, ReasoningEffort,
    ReasoningKind, ResponseFormat,
};
use crate::protocol::gemini::parts::{
    block_to_parts, split_signature_from_id, tool_call_to_part, tool_result_to_part,
    ToolCallRegistry,
};
use crate::protocol::gemini::schema::to_vendor_schema;
use crate::protocol::gemini::{
    FunctionCallingMode, GeminiContent, GeminiFunctionCallingConfig, GeminiFunctionDeclaration,
    GeminiGenerationConfig, GeminiPart, GeminiRequest, GeminiThinkingConfig, GeminiTool,
    GeminiToolConfig,
};
use crate::protocol::mapping::canonical_role_to_gemini;

const JSON_MIME: &str = "application/json";

/// Encode a canonical request into a Gemini `generateContent` body.
///
/// # Errors
///
/// Returns [`CanonicalError::InvalidRequest`] when the request carries no
/// non-system content.
pub fn encode_gemini_request(
    canonical: &CanonicalRequest,
    options: &ConvertOptions,
) -> Result<GeminiRequest, CanonicalError> {
    // --- system instruction ---
    let system_text = canonical
        .messages
        .iter()
        .filter(|msg| msg.role == CanonicalRole::System)
        .map(|msg| msg.content.joined_text())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let system_instruction = (!system_text.is_empty()).then(|| GeminiContent {
        role: None,
        parts: vec![GeminiPart::text(system_text)],
    });

    // --- contents ---
    let mut registry = ToolCallRegistry::default();
    let mut contents = Vec::with_capacity(canonical.messages.len());
    let mut pending_results: Vec<GeminiPart> = Vec::new();

    for msg in &canonical.messages {
        if msg.role == CanonicalRole::Tool {
            pending_results.push(tool_result_to_part(msg, &mut registry));
            continue;
        }
        flush_tool_results(&mut contents, &mut pending_results, options);
        if msg.role == CanonicalRole::System {
            continue;
        }

        let parts = message_parts(msg, options, &mut registry);
        if parts.is_empty() {
            tracing::debug!(role = ?msg.role, "gemini encoder: message produced no parts, dropping");
            continue;
        }
        contents.push(GeminiContent {
            role: Some(canonical_role_to_gemini(msg.role).to_string()),
            parts,
        });
    }
    flush_tool_results(&mut contents, &mut pending_results, options);

    if contents.is_empty() {
        return Err(CanonicalError::InvalidRequest(
            "request has no non-system content".to_string(),
        ));
    }

    // --- tools ---
    let tools = (!canonical.tools.is_empty()).then(|| {
        vec![GeminiTool {
            function_declarations: canonical
                .tools
                .iter()
                .map(|tool| GeminiFunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.as_ref().map(to_vendor_schema),
                })
                .collect(),
        }]
    });

    // --- tool config ---
    let tool_config = if tools.is_some() {
        canonical.tool_choice.as_ref().map(tool_config_for)
    } else {
        None
    };

    let generation_config = generation_config(&canonical.params);

    tracing::debug!(
        model = %canonical.model,
        contents = contents.len(),
        tools = canonical.tools.len(),
        "gemini encoder: built request"
    );

    Ok(GeminiRequest {
        contents,
        tools,
        tool_config,
        system_instruction,
        generation_config,
    })
}

/// Consecutive tool results travel together in one content.
fn flush_tool_results(
    contents: &mut Vec<GeminiContent>,
    pending: &mut Vec<GeminiPart>,
    options: &ConvertOptions,
) {
    if pending.is_empty() {
        return;
    }
    let role = if options.tool_results_as_user {
        canonical_role_to_gemini(CanonicalRole::User)
    } else {
        canonical_role_to_gemini(CanonicalRole::Tool)
    };
    contents.push(GeminiContent {
        role: Some(role.to_string()),
        parts: std::mem::take(pending),
    });
}

fn message_parts(
    msg: &CanonicalMessage,
    options: &ConvertOptions,
    registry: &mut ToolCallRegistry,
) -> Vec<GeminiPart> {
    let mut parts = Vec::new();

    // --- replayed reasoning ---
    let mut signatures_by_call: HashMap<&str, Vec<u8>> = HashMap::new();
    if msg.role == CanonicalRole::Assistant {
        let mut details: Vec<_> = msg.reasoning_details.iter().collect();
        details.sort_by_key(|detail| detail.index);
        for detail in details {
            match detail.kind {
                ReasoningKind::Text => {
                    if let Some(text) = detail.text.as_deref().filter(|t| !t.is_empty()) {
                        parts.push(GeminiPart::thought(text));
                    }
                }
                ReasoningKind::Encrypted => {
                    let Some(signature) = detail.signature.clone() else {
                        continue;
                    };
                    let bound = detail.tool_call_id.as_deref().and_then(|id| {
                        let (clean, _) = split_signature_from_id(id);
                        msg.tool_calls
                            .iter()
                            .any(|call| split_signature_from_id(&call.id).0 == clean)
                            .then_some(clean)
                    });
                    match bound {
                        Some(call_id) => {
                            signatures_by_call.insert(call_id, signature);
                        }
                        None => parts.push(GeminiPart::ThoughtSignature(signature)),
                    }
                }
            }
        }
    }

    // --- visible content ---
    match &msg.content {
        MessageContent::Text(text) => {
            if !text.is_empty() {
                parts.push(GeminiPart::text(text.clone()));
            }
        }
        MessageContent::Blocks(blocks) => {
            for block in blocks {
                parts.extend(block_to_parts(block, msg.role));
            }
        }
    }

    // --- tool calls ---
    if msg.role == CanonicalRole::Assistant {
        registry.begin_turn(&msg.tool_calls);
        for call in &msg.tool_calls {
            let (clean_id, _) = split_signature_from_id(&call.id);
            let signature = signatures_by_call.remove(clean_id);
            match tool_call_to_part(call, signature) {
                GeminiPart::FunctionCall {
                    call,
                    thought_signature: Some(signature),
                } if options.standalone_signature_parts => {
                    parts.push(GeminiPart::ThoughtSignature(signature));
                    parts.push(GeminiPart::FunctionCall {
                        call,
                        thought_signature: None,
                    });
                }
                part => parts.push(part),
            }
        }
    } else if !msg.tool_calls.is_empty() {
        tracing::warn!(role = ?msg.role, "gemini encoder: tool calls on a non-assistant message ignored");
    }

    parts
}

fn tool_config_for(choice: &CanonicalToolChoice) -> GeminiToolConfig {
    let (mode, allowed_function_names) = match choice {
        CanonicalToolChoice::Auto => (FunctionCallingMode::Auto, None),
        CanonicalToolChoice::None => (FunctionCallingMode::None, None),
        CanonicalToolChoice::Required => (FunctionCallingMode::Any, None),
        CanonicalToolChoice::Function { name } => {
            (FunctionCallingMode::Any, Some(vec![name.clone()]))
        }
    };
    GeminiToolConfig {
        function_calling_config: Some(GeminiFunctionCallingConfig {
            mode,
            allowed_function_names,
        }),
    }
}

// --- generation config ---

fn generation_config(params: &GenerationParams) -> Option<GeminiGenerationConfig> {
    let mut config = GeminiGenerationConfig {
        temperature: params.temperature,
        top_p: params.top_p,
        top_k: params.top_k,
        max_output_tokens: params.max_tokens,
        stop_sequences: (!params.stop.is_empty()).then(|| params.stop.clone()),
        candidate_count: params.n,
        presence_penalty: params.presence_penalty,
        frequency_penalty: params.frequency_penalty,
        seed: params.seed,
        thinking_config: params.reasoning.as_ref().and_then(thinking_config),
        ..GeminiGenerationConfig::default()
    };

    match &params.response_format {
        Some(ResponseFormat::JsonSchema { json_schema }) => {
            config.response_mime_type = Some(JSON_MIME.to_string());
            config.response_json_schema = Some(response_json_schema(json_schema));
        }
        Some(ResponseFormat::JsonObject) => {
            config.response_mime_type = Some(JSON_MIME.to_string());
        }
        Some(ResponseFormat::Text) | None => {}
    }

    (!config.is_empty()).then_some(config)
}

fn thinking_config(reasoning: &ReasoningConfig) -> Option<GeminiThinkingConfig> {
    let disabled = GeminiThinkingConfig {
        include_thoughts: Some(false),
        thinking_budget: Some(0),
        thinking_level: None,
    };
    let budget = |budget: i64| GeminiThinkingConfig {
        include_thoughts: Some(true),
        thinking_budget: Some(budget),
        thinking_level: None,
    };
    let level = |level: &str| GeminiThinkingConfig {
        include_thoughts: Some(true),
        thinking_budget: None,
        thinking_level: Some(level.to_string()),
    };

    match (reasoning.max_tokens, reasoning.effort) {
        (_, Some(ReasoningEffort::None)) | (Some(0), _) => Some(disabled),
        (Some(tokens), _) if tokens > 0 => Some(budget(tokens)),
        (Some(-1), _) => Some(budget(-1)),
        (Some(tokens), _) => {
            tracing::warn!(tokens, "gemini encoder: negative thinking budget, using dynamic budget");
            Some(budget(-1))
        }
        (None, Some(ReasoningEffort::Minimal | ReasoningEffort::Low)) => Some(level("LOW")),
        (None, Some(ReasoningEffort::Medium | ReasoningEffort::High)) => Some(level("HIGH")),
        (None, None) => None,
    }
}

fn response_json_schema(format: &JsonSchemaFormat) -> serde_json::Value {
    if let Some(schema) = &format.schema {
        let mut schema = schema.clone();
        if let (serde_json::Value::Object(map), Some(name)) = (&mut schema, &format.name) {
            map.entry("title")
                .or_insert_with(|| serde_json::Value::String(name.clone()));
        }
        return schema;
    }

    let mut map = serde_json::Map::new();
    if let Some(name) = &format.name {
        map.insert("title".into(), name.clone().into());
    }
    if let Some(description) = &format.description {
        map.insert("description".into(), description.clone().into());
    }
    if let Some(schema_type) = &format.schema_type {
        map.insert("type".into(), schema_type.clone().into());
    }
    if let Some(properties) = &format.properties {
        map.insert("properties".into(), serde_json::Value::Object(properties.clone()));
    }
    if !format.required.is_empty() {
        map.insert("required".into(), format.required.clone().into());
    }
    if let Some(additional) = &format.additional_properties {
        map.insert("additionalProperties".into(), additional.clone());
    }
    serde_json::Value::Object(map)
}
