pub mod batch;
pub mod encoder;
pub mod parts;
pub mod response_decoder;
pub mod schema;
pub mod stream;
pub mod stream_state;

use serde::{Deserialize, Serialize};

use crate::protocol::error_shapes::GeminiErrorBody;
use crate::util::{decode_base64, encode_base64};

use self::schema::GeminiSchema;

/// Gemini v1beta generateContent request wire type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GeminiTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<GeminiToolConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GeminiGenerationConfig>,
}

/// A content message in Gemini format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub response: serde_json::Value,
}

/// Inline binary payload; `data` stays base64 text end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiBlob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFileData {
    #[serde(default)]
    pub mime_type: String,
    pub file_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeminiExecutableCode {
    #[serde(default)]
    pub language: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeminiCodeExecutionResult {
    #[serde(default)]
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// A single part within a Gemini content message.
///
/// On the wire a part is an object with one payload field plus optional
/// `thought`/`thoughtSignature` flags; here each payload is its own variant.
/// Payload kinds this crate does not model decode to [`GeminiPart::Unknown`]
/// with their fields kept, so the rest of the response survives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPart", into = "RawPart")]
pub enum GeminiPart {
    Text {
        text: String,
        thought: bool,
        thought_signature: Option<Vec<u8>>,
    },
    FunctionCall {
        call: GeminiFunctionCall,
        thought_signature: Option<Vec<u8>>,
    },
    FunctionResponse(GeminiFunctionResponse),
    InlineData(GeminiBlob),
    FileData(GeminiFileData),
    ExecutableCode(GeminiExecutableCode),
    CodeExecutionResult(GeminiCodeExecutionResult),
    ThoughtSignature(Vec<u8>),
    Unknown(serde_json::Map<String, serde_json::Value>),
}

impl GeminiPart {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        GeminiPart::Text {
            text: text.into(),
            thought: false,
            thought_signature: None,
        }
    }

    #[must_use]
    pub fn thought(text: impl Into<String>) -> Self {
        GeminiPart::Text {
            text: text.into(),
            thought: true,
            thought_signature: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    thought: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiBlob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_data: Option<GeminiFileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    executable_code: Option<GeminiExecutableCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code_execution_result: Option<GeminiCodeExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl TryFrom<RawPart> for GeminiPart {
    type Error = String;

    fn try_from(raw: RawPart) -> Result<Self, Self::Error> {
        let thought_signature = raw.thought_signature.as_deref().and_then(|encoded| {
            let decoded = decode_base64(encoded);
            if decoded.is_none() {
                tracing::warn!("gemini part: dropping thoughtSignature that is not base64");
            }
            decoded
        });

        if let Some(call) = raw.function_call {
            return Ok(GeminiPart::FunctionCall {
                call,
                thought_signature,
            });
        }
        if let Some(response) = raw.function_response {
            return Ok(GeminiPart::FunctionResponse(response));
        }
        if let Some(blob) = raw.inline_data {
            return Ok(GeminiPart::InlineData(blob));
        }
        if let Some(file) = raw.file_data {
            return Ok(GeminiPart::FileData(file));
        }
        if let Some(code) = raw.executable_code {
            return Ok(GeminiPart::ExecutableCode(code));
        }
        if let Some(result) = raw.code_execution_result {
            return Ok(GeminiPart::CodeExecutionResult(result));
        }
        match (raw.text, thought_signature) {
            (Some(text), thought_signature) if !text.is_empty() => Ok(GeminiPart::Text {
                text,
                thought: raw.thought,
                thought_signature,
            }),
            (_, Some(signature)) => Ok(GeminiPart::ThoughtSignature(signature)),
            (Some(text), None) => Ok(GeminiPart::Text {
                text,
                thought: raw.thought,
                thought_signature: None,
            }),
            (None, None) => {
                tracing::warn!(
                    fields = ?raw.extra.keys().collect::<Vec<_>>(),
                    "gemini part: unrecognised payload kept as unknown"
                );
                Ok(GeminiPart::Unknown(raw.extra))
            }
        }
    }
}

impl From<GeminiPart> for RawPart {
    fn from(part: GeminiPart) -> Self {
        match part {
            GeminiPart::Text {
                text,
                thought,
                thought_signature,
            } => RawPart {
                text: Some(text),
                thought,
                thought_signature: thought_signature.as_deref().map(encode_base64),
                ..RawPart::default()
            },
            GeminiPart::FunctionCall {
                call,
                thought_signature,
            } => RawPart {
                function_call: Some(call),
                thought_signature: thought_signature.as_deref().map(encode_base64),
                ..RawPart::default()
            },
            GeminiPart::FunctionResponse(response) => RawPart {
                function_response: Some(response),
                ..RawPart::default()
            },
            GeminiPart::InlineData(blob) => RawPart {
                inline_data: Some(blob),
                ..RawPart::default()
            },
            GeminiPart::FileData(file) => RawPart {
                file_data: Some(file),
                ..RawPart::default()
            },
            GeminiPart::ExecutableCode(code) => RawPart {
                executable_code: Some(code),
                ..RawPart::default()
            },
            GeminiPart::CodeExecutionResult(result) => RawPart {
                code_execution_result: Some(result),
                ..RawPart::default()
            },
            GeminiPart::ThoughtSignature(signature) => RawPart {
                thought_signature: Some(encode_base64(&signature)),
                ..RawPart::default()
            },
            GeminiPart::Unknown(extra) => RawPart {
                extra,
                ..RawPart::default()
            },
        }
    }
}

/// Gemini generateContent response wire type (also one stream chunk).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<GeminiCandidate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<GeminiUsageMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    /// Only present on error frames of a stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GeminiErrorBody>,
}

impl GeminiResponse {
    #[must_use]
    pub fn first_candidate(&self) -> Option<&GeminiCandidate> {
        self.candidates.as_ref().and_then(|c| c.first())
    }
}

/// A candidate in the response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: GeminiContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPromptFeedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason_message: Option<String>,
}

/// Usage metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiUsageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_content_token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts_token_count: Option<u64>,
}

/// A tool declaration (contains function declarations).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiTool {
    pub function_declarations: Vec<GeminiFunctionDeclaration>,
}

/// A function declaration within a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiFunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<GeminiSchema>,
}

/// Tool configuration (function calling mode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiToolConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_calling_config: Option<GeminiFunctionCallingConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionCallingMode {
    Auto,
    Any,
    None,
}

/// Function calling config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFunctionCallingConfig {
    pub mode: FunctionCallingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_function_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiThinkingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_thoughts: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
}

/// Generation config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_json_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<GeminiThinkingConfig>,
}

impl GeminiGenerationConfig {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
