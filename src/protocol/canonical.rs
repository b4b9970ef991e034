use serde::{Deserialize, Serialize};

use crate::protocol::gemini::schema::ToolSchema;

/// Canonical message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Other,
}

impl FinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Other => "other",
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
}

/// One unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    /// `url` is either a remote URI or a `data:` URL.
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Base64 audio payload.
    Audio {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl ContentBlock {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// Message content: a scalar string or an ordered block list, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl MessageContent {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Blocks(blocks) => blocks.is_empty(),
        }
    }

    /// Concatenate the plain-text portions of the content.
    #[must_use]
    pub fn joined_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => {
                let mut out = String::new();
                for block in blocks {
                    if let ContentBlock::Text { text } = block {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(text);
                    }
                }
                out
            }
        }
    }
}

/// A tool call issued by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub index: usize,
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object, kept as text to preserve field order.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningKind {
    Text,
    Encrypted,
}

/// A reasoning trace entry: either thought text or an opaque signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningDetail {
    #[serde(default)]
    pub index: usize,
    pub kind: ReasoningKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::util::base64_opt"
    )]
    pub signature: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ReasoningDetail {
    #[must_use]
    pub fn thought(index: usize, text: String) -> Self {
        Self {
            index,
            kind: ReasoningKind::Text,
            text: Some(text),
            signature: None,
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn signature(index: usize, signature: Vec<u8>, tool_call_id: Option<String>) -> Self {
        Self {
            index,
            kind: ReasoningKind::Encrypted,
            text: None,
            signature: Some(signature),
            tool_call_id,
        }
    }
}

/// A single message in the canonical conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning_details: Vec<ReasoningDetail>,
}

impl CanonicalMessage {
    #[must_use]
    pub fn new(role: CanonicalRole, content: MessageContent) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            reasoning_details: Vec::new(),
        }
    }

    #[must_use]
    pub fn text(role: CanonicalRole, text: impl Into<String>) -> Self {
        Self::new(role, MessageContent::Text(text.into()))
    }

    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::text(CanonicalRole::Tool, content)
        }
    }
}

/// Requested reasoning depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<ReasoningEffort>,
    /// Thinking token budget; `-1` asks for a dynamic budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
}

/// Descriptor of a `json_schema` structured-output request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonSchemaFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Complete schema object; wins over the individual fields below.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(
        rename = "additionalProperties",
        alias = "additional_properties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// Requested output format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema { json_schema: JsonSchemaFormat },
}

/// Generation parameters passed through to the upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// A tool's function declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ToolSchema>,
}

/// How the model may pick tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalToolChoice {
    Auto,
    None,
    #[serde(alias = "any")]
    Required,
    Function { name: String },
}

/// The fully-decoded, provider-agnostic request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    pub messages: Vec<CanonicalMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub params: GenerationParams,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<CanonicalTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<CanonicalToolChoice>,
}

/// One choice of a canonical response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalChoice {
    pub index: u32,
    pub message: CanonicalMessage,
    pub finish_reason: Option<FinishReason>,
}

/// The fully-decoded, provider-agnostic non-streaming response.
///
/// `choices` is never empty when produced by the response canonicalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub choices: Vec<CanonicalChoice>,
    pub usage: CanonicalUsage,
}

/// Per-call conversion switches, passed explicitly down the call chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Re-embed thought signatures into visible tool-call ids.
    pub embed_thought_signatures: bool,
    /// Send replayed signatures as their own parts instead of attaching them
    /// to the function-call part they belong to.
    pub standalone_signature_parts: bool,
    /// Send grouped tool results in a `user` turn instead of `model`.
    pub tool_results_as_user: bool,
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// Lifecycle event kinds of a canonical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEventType {
    ResponseCreated,
    ResponseInProgress,
    OutputItemAdded,
    OutputItemDone,
    ContentPartAdded,
    ContentPartDone,
    OutputTextDelta,
    OutputTextDone,
    ReasoningSummaryPartAdded,
    ReasoningSummaryPartDone,
    ReasoningSummaryTextDelta,
    ReasoningSummaryTextDone,
    FunctionCallArgumentsDone,
    ResponseCompleted,
    ResponseFailed,
    ResponseCancelled,
    ResponseTimedOut,
}

impl StreamEventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StreamEventType::ResponseCreated => "response.created",
            StreamEventType::ResponseInProgress => "response.in_progress",
            StreamEventType::OutputItemAdded => "response.output_item.added",
            StreamEventType::OutputItemDone => "response.output_item.done",
            StreamEventType::ContentPartAdded => "response.content_part.added",
            StreamEventType::ContentPartDone => "response.content_part.done",
            StreamEventType::OutputTextDelta => "response.output_text.delta",
            StreamEventType::OutputTextDone => "response.output_text.done",
            StreamEventType::ReasoningSummaryPartAdded => "response.reasoning_summary_part.added",
            StreamEventType::ReasoningSummaryPartDone => "response.reasoning_summary_part.done",
            StreamEventType::ReasoningSummaryTextDelta => "response.reasoning_summary_text.delta",
            StreamEventType::ReasoningSummaryTextDone => "response.reasoning_summary_text.done",
            StreamEventType::FunctionCallArgumentsDone => {
                "response.function_call_arguments.done"
            }
            StreamEventType::ResponseCompleted => "response.completed",
            StreamEventType::ResponseFailed => "response.failed",
            StreamEventType::ResponseCancelled => "response.cancelled",
            StreamEventType::ResponseTimedOut => "response.timed_out",
        }
    }

    /// Whether this event ends the stream.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamEventType::ResponseCompleted
                | StreamEventType::ResponseFailed
                | StreamEventType::ResponseCancelled
                | StreamEventType::ResponseTimedOut
        )
    }
}

impl Serialize for StreamEventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Incomplete,
}

/// An output item of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        id: String,
        status: ItemStatus,
        role: CanonicalRole,
        content: Vec<ContentBlock>,
    },
    Reasoning {
        id: String,
        status: ItemStatus,
        summary: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        encrypted_content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    FunctionCall {
        id: String,
        status: ItemStatus,
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        id: String,
        status: ItemStatus,
        call_id: String,
        name: String,
        output: String,
    },
}

/// Snapshot of the response carried by lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSnapshot {
    pub id: String,
    pub model: String,
    pub created_at: i64,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CanonicalUsage>,
}

/// Error details carried by a `response.failed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamErrorInfo {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

/// Type-specific payload of a stream event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamPayload {
    Response {
        response: ResponseSnapshot,
    },
    Item {
        item: OutputItem,
    },
    Part {
        part: ContentBlock,
    },
    Delta {
        delta: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    Text {
        text: String,
    },
    Arguments {
        arguments: String,
    },
    Failure {
        response: ResponseSnapshot,
        error: StreamErrorInfo,
    },
    Empty {},
}

/// A single event in a canonical stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalStreamEvent {
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    pub sequence_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(flatten)]
    pub payload: StreamPayload,
}

impl CanonicalStreamEvent {
    /// Text carried by delta/done events, if any.
    #[must_use]
    pub fn delta_text(&self) -> Option<&str> {
        match &self.payload {
            StreamPayload::Delta { delta, .. } => Some(delta),
            StreamPayload::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Response snapshot carried by lifecycle/terminal events, if any.
    #[must_use]
    pub fn response(&self) -> Option<&ResponseSnapshot> {
        match &self.payload {
            StreamPayload::Response { response } | StreamPayload::Failure { response, .. } => {
                Some(response)
            }
            _ => None,
        }
    }
}
