//! Gemini batch jobs: request items, job status, and result parsing.

use std::sync::atomic::AtomicU64;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::CanonicalError;
use crate::protocol::canonical::{CanonicalRequest, ConvertOptions};
use crate::protocol::error_shapes::GeminiErrorBody;
use crate::util::next_generated_id;

use super::encoder::encode_gemini_request;
use super::schema::lenient_u64;
use super::{GeminiPart, GeminiRequest, GeminiResponse};

/// One request of a batch, keyed by the caller's id.
#[derive(Debug, Clone)]
pub struct BatchRequestItem {
    pub custom_id: String,
    pub request: CanonicalRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeminiBatchItemMetadata {
    #[serde(default)]
    pub key: String,
}

/// Wire form of one inline batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiBatchRequestItem {
    pub request: GeminiRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<GeminiBatchItemMetadata>,
}

/// Encode every item with the regular request encoder.
///
/// The first item that fails to encode aborts the whole batch.
pub fn build_batch_request_items(
    items: &[BatchRequestItem],
    options: &ConvertOptions,
) -> Result<Vec<GeminiBatchRequestItem>, CanonicalError> {
    items
        .iter()
        .map(|item| {
            let request = encode_gemini_request(&item.request, options).map_err(|err| match err {
                CanonicalError::InvalidRequest(message) => CanonicalError::InvalidRequest(format!(
                    "batch item {}: {message}",
                    item.custom_id
                )),
                other => other,
            })?;
            Ok(GeminiBatchRequestItem {
                request,
                metadata: Some(GeminiBatchItemMetadata {
                    key: item.custom_id.clone(),
                }),
            })
        })
        .collect()
}

/// Where the requests of a new batch come from.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchInput {
    Inline(Vec<GeminiBatchRequestItem>),
    /// A previously uploaded JSONL file; `files/` is prefixed when missing.
    File(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiBatchRequests {
    pub requests: Vec<GeminiBatchRequestItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiBatchInputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<GeminiBatchRequests>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiBatchConfig {
    pub display_name: String,
    pub input_config: GeminiBatchInputConfig,
}

/// Body of `models/{model}:batchGenerateContent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiBatchCreateRequest {
    pub batch: GeminiBatchConfig,
}

static GENERATED_BATCH_NAME_SEQ: AtomicU64 = AtomicU64::new(1);

/// Wrap batch input in the create envelope, generating a display name when
/// none is given.
#[must_use]
pub fn build_batch_create_request(input: BatchInput, display_name: Option<&str>) -> GeminiBatchCreateRequest {
    let display_name = display_name
        .filter(|name| !name.is_empty())
        .map_or_else(|| next_generated_id("gemini-adapter-batch", &GENERATED_BATCH_NAME_SEQ), str::to_string);
    let input_config = match input {
        BatchInput::Inline(requests) => GeminiBatchInputConfig {
            file_name: None,
            requests: Some(GeminiBatchRequests { requests }),
        },
        BatchInput::File(file) => GeminiBatchInputConfig {
            file_name: Some(with_prefix("files/", &file)),
            requests: None,
        },
    };
    GeminiBatchCreateRequest {
        batch: GeminiBatchConfig {
            display_name,
            input_config,
        },
    }
}

/// `prefix + name` unless `name` already starts with `prefix`.
#[must_use]
pub fn with_prefix(prefix: &str, name: &str) -> String {
    if name.starts_with(prefix) {
        name.to_string()
    } else {
        format!("{prefix}{name}")
    }
}

/// Canonical batch lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    InProgress,
    Completed,
    Failed,
    Cancelling,
    Cancelled,
    Expired,
    /// A state this adapter does not know, passed through verbatim.
    Unknown(String),
}

impl BatchStatus {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelling => "cancelling",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Expired => "expired",
            BatchStatus::Unknown(raw) => raw,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled | BatchStatus::Expired
        )
    }
}

impl Serialize for BatchStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Map a `BATCH_STATE_*` or `JOB_STATE_*` value.
#[must_use]
pub fn batch_status_from_gemini(state: &str) -> BatchStatus {
    let suffix = state
        .strip_prefix("BATCH_STATE_")
        .or_else(|| state.strip_prefix("JOB_STATE_"));
    match suffix {
        Some("PENDING" | "RUNNING") => BatchStatus::InProgress,
        Some("SUCCEEDED") => BatchStatus::Completed,
        Some("FAILED") => BatchStatus::Failed,
        Some("CANCELLING") => BatchStatus::Cancelling,
        Some("CANCELLED") => BatchStatus::Cancelled,
        Some("EXPIRED") => BatchStatus::Expired,
        _ => BatchStatus::Unknown(state.to_string()),
    }
}

/// RFC 3339 to unix seconds; empty or unparseable input gives 0.
#[must_use]
pub fn parse_gemini_timestamp(timestamp: &str) -> i64 {
    let timestamp = timestamp.trim();
    if timestamp.is_empty() {
        return 0;
    }
    chrono::DateTime::parse_from_rfc3339(timestamp).map_or(0, |parsed| parsed.timestamp())
}

// ---------------------------------------------------------------------------
// Job wire types
// ---------------------------------------------------------------------------

/// Counts arrive as int64 and are therefore often JSON strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiBatchStats {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u64")]
    pub request_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u64")]
    pub pending_request_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u64")]
    pub successful_request_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u64")]
    pub failed_request_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiBatchMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub create_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_stats: Option<GeminiBatchStats>,
}

/// Outcome of one inline batch request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeminiInlinedResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<GeminiResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GeminiErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<GeminiBatchItemMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiBatchDest {
    #[serde(default, alias = "responsesFile", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inlined_responses: Vec<GeminiInlinedResponse>,
}

/// A batch job as returned by create, get and cancel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeminiBatchJob {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<GeminiBatchMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<GeminiBatchDest>,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiBatchList {
    #[serde(default, alias = "batches")]
    pub operations: Vec<GeminiBatchJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Canonical batch view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchRequestCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalBatch {
    pub id: String,
    pub status: BatchStatus,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    pub request_counts: BatchRequestCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<BatchResultItem>,
}

impl GeminiBatchJob {
    #[must_use]
    pub fn to_canonical(&self) -> CanonicalBatch {
        let metadata = self.metadata.clone().unwrap_or_default();
        let stats = metadata.batch_stats.unwrap_or_default();
        let inline = self
            .dest
            .as_ref()
            .map_or(&[][..], |dest| dest.inlined_responses.as_slice());

        let total = stats.request_count.unwrap_or(0);
        let (mut completed, failed) = if inline.is_empty() {
            (
                stats
                    .successful_request_count
                    .unwrap_or_else(|| total.saturating_sub(stats.pending_request_count.unwrap_or(0))),
                stats.failed_request_count.unwrap_or(0),
            )
        } else {
            let failed = inline.iter().filter(|r| r.error.is_some()).count() as u64;
            let completed = inline
                .iter()
                .filter(|r| r.error.is_none() && r.response.is_some())
                .count() as u64;
            (completed, failed)
        };

        let mut status = batch_status_from_gemini(&metadata.state);
        // Fast-completing jobs may come back with results and no state.
        if metadata.state.is_empty() && !inline.is_empty() {
            status = BatchStatus::Completed;
            completed = inline.len() as u64 - failed;
        }

        let id = if metadata.name.is_empty() {
            self.name.clone()
        } else {
            metadata.name.clone()
        };

        CanonicalBatch {
            id,
            status,
            created_at: parse_gemini_timestamp(&metadata.create_time),
            completed_at: metadata
                .end_time
                .as_deref()
                .map(parse_gemini_timestamp)
                .filter(|ts| *ts > 0),
            request_counts: BatchRequestCounts {
                total,
                completed,
                failed,
            },
            output_file_id: self
                .dest
                .as_ref()
                .and_then(|dest| dest.file_name.clone())
                .filter(|name| !name.is_empty()),
            results: batch_results_from_inline(inline),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResultResponse {
    pub status_code: u16,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResultError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResultItem {
    pub custom_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<BatchResultResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchResultError>,
}

/// A results-file line that could not be parsed. `line` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchLineError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResults {
    pub items: Vec<BatchResultItem>,
    pub errors: Vec<BatchLineError>,
}

#[derive(Debug, Deserialize)]
struct ResultLine {
    #[serde(default)]
    key: String,
    #[serde(default)]
    response: Option<GeminiResponse>,
    #[serde(default)]
    error: Option<GeminiErrorBody>,
}

/// Parse a downloaded JSONL results file.
///
/// Bad lines are collected, never fatal. Blank lines are skipped.
#[must_use]
pub fn parse_batch_results_jsonl(body: &[u8]) -> BatchResults {
    let mut results = BatchResults::default();
    for (idx, raw) in body.split(|b| *b == b'\n').enumerate() {
        let line = raw.trim_ascii();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<ResultLine>(line) {
            Ok(parsed) => {
                let position = results.items.len();
                results.items.push(result_item(
                    &parsed.key,
                    position,
                    parsed.response.as_ref(),
                    parsed.error.as_ref(),
                ));
            }
            Err(err) => {
                tracing::warn!(line = idx + 1, error = %err, "skipping unparseable batch result line");
                results.errors.push(BatchLineError {
                    line: idx + 1,
                    message: err.to_string(),
                });
            }
        }
    }
    results
}

/// Shape inline batch responses like file results.
#[must_use]
pub fn batch_results_from_inline(responses: &[GeminiInlinedResponse]) -> Vec<BatchResultItem> {
    responses
        .iter()
        .enumerate()
        .map(|(position, inline)| {
            let key = inline.metadata.as_ref().map_or("", |m| m.key.as_str());
            result_item(key, position, inline.response.as_ref(), inline.error.as_ref())
        })
        .collect()
}

fn result_item(
    key: &str,
    position: usize,
    response: Option<&GeminiResponse>,
    error: Option<&GeminiErrorBody>,
) -> BatchResultItem {
    let custom_id = if key.is_empty() {
        format!("request-{position}")
    } else {
        key.to_string()
    };

    if let Some(error) = error {
        return BatchResultItem {
            custom_id,
            response: None,
            error: Some(BatchResultError {
                code: error
                    .code
                    .map(|code| code.to_string())
                    .or_else(|| error.status.clone())
                    .unwrap_or_default(),
                message: error.message.clone(),
            }),
        };
    }

    BatchResultItem {
        custom_id,
        response: response.map(|response| BatchResultResponse {
            status_code: 200,
            body: result_body(response),
        }),
        error: None,
    }
}

fn result_body(response: &GeminiResponse) -> Value {
    let mut body = Map::new();
    if let Some(candidate) = response.first_candidate() {
        let text: String = candidate
            .content
            .parts
            .iter()
            .filter_map(|part| match part {
                GeminiPart::Text {
                    text,
                    thought: false,
                    ..
                } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if !text.is_empty() {
            body.insert("text".into(), Value::String(text));
        }
        body.insert(
            "finish_reason".into(),
            Value::String(candidate.finish_reason.clone().unwrap_or_default()),
        );
    }
    if let Some(usage) = response.usage_metadata {
        body.insert(
            "usage".into(),
            json!({
                "prompt_tokens": usage.prompt_token_count.unwrap_or(0),
                "completion_tokens": usage.candidates_token_count.unwrap_or(0),
                "total_tokens": usage.total_token_count.unwrap_or(0),
            }),
        );
    }
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{CanonicalMessage, CanonicalRole};

    #[test]
    fn status_mapping_accepts_both_prefixes() {
        assert_eq!(batch_status_from_gemini("BATCH_STATE_PENDING"), BatchStatus::InProgress);
        assert_eq!(batch_status_from_gemini("JOB_STATE_RUNNING"), BatchStatus::InProgress);
        assert_eq!(batch_status_from_gemini("BATCH_STATE_SUCCEEDED"), BatchStatus::Completed);
        assert_eq!(batch_status_from_gemini("JOB_STATE_FAILED"), BatchStatus::Failed);
        assert_eq!(batch_status_from_gemini("BATCH_STATE_CANCELLING"), BatchStatus::Cancelling);
        assert_eq!(batch_status_from_gemini("JOB_STATE_CANCELLED"), BatchStatus::Cancelled);
        assert_eq!(batch_status_from_gemini("BATCH_STATE_EXPIRED"), BatchStatus::Expired);
        assert_eq!(
            batch_status_from_gemini("BATCH_STATE_PAUSED"),
            BatchStatus::Unknown("BATCH_STATE_PAUSED".into())
        );
        assert_eq!(BatchStatus::Unknown("X".into()).as_str(), "X");
    }

    #[test]
    fn timestamps_parse_or_fall_back_to_zero() {
        assert_eq!(parse_gemini_timestamp("2024-01-01T00:00:00Z"), 1_704_067_200);
        assert_eq!(parse_gemini_timestamp("2024-01-01T01:00:00+01:00"), 1_704_067_200);
        assert_eq!(parse_gemini_timestamp("2024-01-01T00:00:00.123456Z"), 1_704_067_200);
        assert_eq!(parse_gemini_timestamp(""), 0);
        assert_eq!(parse_gemini_timestamp("yesterday"), 0);
    }

    #[test]
    fn request_items_carry_custom_id_as_key() {
        let items = vec![BatchRequestItem {
            custom_id: "req-1".into(),
            request: CanonicalRequest {
                model: "gemini-2.5-flash".into(),
                messages: vec![CanonicalMessage::text(CanonicalRole::User, "hi")],
                ..CanonicalRequest::default()
            },
        }];
        let built = build_batch_request_items(&items, &ConvertOptions::default()).unwrap();
        let wire = serde_json::to_value(&built).unwrap();
        assert_eq!(wire[0]["metadata"]["key"], "req-1");
        assert_eq!(wire[0]["request"]["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn create_request_nests_inline_items_or_file() {
        let inline = build_batch_create_request(BatchInput::Inline(Vec::new()), Some("nightly"));
        let wire = serde_json::to_value(&inline).unwrap();
        assert_eq!(wire["batch"]["displayName"], "nightly");
        assert!(wire["batch"]["inputConfig"]["requests"]["requests"].is_array());

        let file = build_batch_create_request(BatchInput::File("abc".into()), None);
        let wire = serde_json::to_value(&file).unwrap();
        assert_eq!(wire["batch"]["inputConfig"]["fileName"], "files/abc");
        assert!(wire["batch"]["displayName"]
            .as_str()
            .unwrap()
            .starts_with("gemini-adapter-batch_"));
    }

    #[test]
    fn request_item_encoding_failure_names_the_item() {
        let items = vec![BatchRequestItem {
            custom_id: "empty".into(),
            request: CanonicalRequest::default(),
        }];
        match build_batch_request_items(&items, &ConvertOptions::default()) {
            Err(CanonicalError::InvalidRequest(message)) => assert!(message.contains("empty")),
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn jsonl_collects_items_and_line_errors() {
        let body = br#"{"key":"a","response":{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2,"totalTokenCount":5}}}

not json
{"response":{"candidates":[]}}
{"key":"c","error":{"code":400,"message":"bad request"}}
"#;
        let results = parse_batch_results_jsonl(body);
        assert_eq!(results.items.len(), 3);
        assert_eq!(results.errors.len(), 1);
        assert_eq!(results.errors[0].line, 3);

        let first = &results.items[0];
        assert_eq!(first.custom_id, "a");
        let body = &first.response.as_ref().unwrap().body;
        assert_eq!(body["text"], "Hello");
        assert_eq!(body["finish_reason"], "STOP");
        assert_eq!(body["usage"]["total_tokens"], 5);

        assert_eq!(results.items[1].custom_id, "request-1");
        let error = results.items[2].error.as_ref().unwrap();
        assert_eq!(error.code, "400");
        assert_eq!(error.message, "bad request");
    }

    #[test]
    fn job_with_string_counts_maps_to_canonical() {
        let job: GeminiBatchJob = serde_json::from_value(json!({
            "name": "batches/abc",
            "metadata": {
                "name": "batches/abc",
                "state": "BATCH_STATE_RUNNING",
                "createTime": "2024-01-01T00:00:00Z",
                "batchStats": {"requestCount": "10", "pendingRequestCount": "4"}
            }
        }))
        .unwrap();
        let batch = job.to_canonical();
        assert_eq!(batch.id, "batches/abc");
        assert_eq!(batch.status, BatchStatus::InProgress);
        assert_eq!(batch.created_at, 1_704_067_200);
        assert_eq!(batch.request_counts.total, 10);
        assert_eq!(batch.request_counts.completed, 6);
        assert!(batch.output_file_id.is_none());
    }

    #[test]
    fn stateless_job_with_inline_results_is_completed() {
        let job: GeminiBatchJob = serde_json::from_value(json!({
            "name": "batches/fast",
            "metadata": {"batchStats": {"requestCount": 2}},
            "dest": {"inlinedResponses": [
                {"response": {"candidates": [{"content": {"parts": [{"text": "ok"}]}, "finishReason": "STOP"}]},
                 "metadata": {"key": "one"}},
                {"error": {"code": 500, "message": "boom"}}
            ]}
        }))
        .unwrap();
        let batch = job.to_canonical();
        assert_eq!(batch.id, "batches/fast");
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.request_counts.completed, 1);
        assert_eq!(batch.request_counts.failed, 1);
        assert_eq!(batch.results[0].custom_id, "one");
        assert_eq!(batch.results[1].custom_id, "request-1");
    }

    #[test]
    fn responses_file_is_surfaced() {
        let job: GeminiBatchJob = serde_json::from_value(json!({
            "name": "batches/f",
            "metadata": {"state": "BATCH_STATE_SUCCEEDED", "endTime": "2024-01-01T00:00:10Z"},
            "dest": {"responsesFile": "files/out-1"}
        }))
        .unwrap();
        let batch = job.to_canonical();
        assert_eq!(batch.output_file_id.as_deref(), Some("files/out-1"));
        assert_eq!(batch.completed_at, Some(1_704_067_210));
        assert!(batch.status.is_terminal());
    }
}
