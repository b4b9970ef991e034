//! Incremental translation of Gemini stream chunks into canonical lifecycle
//! events.

use crate::error::CanonicalError;
use crate::protocol::canonical::{
    CanonicalRole, CanonicalStreamEvent, ContentBlock, FinishReason, ItemStatus, OutputItem,
    ResponseSnapshot, ResponseStatus, StreamErrorInfo, StreamEventType, StreamPayload,
};
use crate::protocol::gemini::parts::{
    embed_signature_in_id, function_response_output, part_to_block, split_signature_from_id,
};
use crate::protocol::gemini::response_decoder::usage_from_gemini;
use crate::protocol::gemini::stream_state::StreamState;
use crate::protocol::gemini::{GeminiFunctionCall, GeminiPart, GeminiResponse};
use crate::protocol::mapping::{empty_response_finish_reason, resolve_finish_reason};
use crate::util::{encode_base64, extract_sse_data_payload};

/// Parse a single SSE line from a Gemini stream.
///
/// Returns `None` for lines that carry no data; `Some(Err(_))` when the data
/// payload is not a valid chunk.
#[must_use]
pub fn parse_gemini_sse_line(line: &str) -> Option<Result<GeminiResponse, serde_json::Error>> {
    extract_sse_data_payload(line).map(serde_json::from_str)
}

/// Appends numbered events to a caller buffer.
struct Emitter<'a> {
    out: &'a mut Vec<CanonicalStreamEvent>,
    next_sequence: u64,
}

impl Emitter<'_> {
    fn push(
        &mut self,
        event_type: StreamEventType,
        output_index: Option<usize>,
        content_index: Option<usize>,
        item_id: Option<&str>,
        payload: StreamPayload,
    ) {
        self.out.push(CanonicalStreamEvent {
            event_type,
            sequence_number: self.next_sequence,
            output_index,
            content_index,
            item_id: item_id.map(str::to_string),
            payload,
        });
        self.next_sequence += 1;
    }

    fn item(&mut self, event_type: StreamEventType, output_index: usize, item: OutputItem) {
        self.push(event_type, Some(output_index), None, None, StreamPayload::Item { item });
    }

    fn part(&mut self, event_type: StreamEventType, output_index: usize, item_id: &str, part: ContentBlock) {
        self.push(
            event_type,
            Some(output_index),
            Some(0),
            Some(item_id),
            StreamPayload::Part { part },
        );
    }
}

impl StreamState {
    /// Translate one vendor chunk, appending events numbered from
    /// `sequence_base`.
    ///
    /// Chunks arriving after the terminal event are ignored.
    pub fn process_chunk(
        &mut self,
        chunk: &GeminiResponse,
        sequence_base: u64,
        out: &mut Vec<CanonicalStreamEvent>,
    ) {
        if self.completed_emitted {
            tracing::debug!(response_id = %self.response_id(), "gemini stream: chunk after completion ignored");
            return;
        }
        let mut em = Emitter {
            out,
            next_sequence: sequence_base,
        };

        // --- metadata ---
        if let Some(id) = chunk.response_id.as_deref().filter(|id| !id.is_empty()) {
            if self.vendor_response_id.as_deref() != Some(id) {
                self.vendor_response_id = Some(id.to_string());
            }
        }
        if let Some(model) = chunk.model_version.as_deref().filter(|m| !m.is_empty()) {
            if self.vendor_model.as_deref() != Some(model) {
                self.vendor_model = Some(model.to_string());
            }
        }
        if chunk.usage_metadata.is_some() {
            self.last_usage = Some(usage_from_gemini(chunk.usage_metadata.as_ref()));
        }
        if chunk
            .prompt_feedback
            .as_ref()
            .is_some_and(|feedback| feedback.block_reason.is_some())
        {
            self.prompt_blocked = true;
        }

        self.emit_lifecycle_start(&mut em);

        // --- parts ---
        let Some(candidate) = chunk.first_candidate() else {
            return;
        };
        self.saw_candidate = true;
        for part in &candidate.content.parts {
            self.dispatch_part(part, &mut em);
        }

        // --- finish ---
        if let Some(reason) = candidate.finish_reason.as_deref().filter(|r| !r.is_empty()) {
            self.last_finish_reason = Some(reason.to_string());
            if self.items_opened > 0 {
                self.finalize_into(&mut em);
            }
        }
    }

    /// Close every open item and emit the single `response.completed`.
    ///
    /// Idempotent: once a terminal event exists this emits nothing.
    pub fn finalize(&mut self, sequence_base: u64, out: &mut Vec<CanonicalStreamEvent>) {
        let mut em = Emitter {
            out,
            next_sequence: sequence_base,
        };
        self.finalize_into(&mut em);
    }

    /// Emit `response.failed` for a mid-stream error.
    pub fn fail(
        &mut self,
        error: &CanonicalError,
        sequence_base: u64,
        out: &mut Vec<CanonicalStreamEvent>,
    ) {
        if self.completed_emitted {
            return;
        }
        let mut em = Emitter {
            out,
            next_sequence: sequence_base,
        };
        let response = self.snapshot(ResponseStatus::Failed, None);
        em.push(
            StreamEventType::ResponseFailed,
            None,
            None,
            None,
            StreamPayload::Failure {
                response,
                error: StreamErrorInfo {
                    status: error.status_code(),
                    code: error.upstream_code().map(str::to_string),
                    message: error.to_string(),
                },
            },
        );
        self.completed_emitted = true;
        tracing::debug!(response_id = %self.response_id(), error = %error, "gemini stream: failed");
    }

    /// Emit a `response.cancelled` or `response.timed_out` terminal event.
    pub fn interrupt(
        &mut self,
        event_type: StreamEventType,
        sequence_base: u64,
        out: &mut Vec<CanonicalStreamEvent>,
    ) {
        if self.completed_emitted {
            return;
        }
        let status = if event_type == StreamEventType::ResponseCancelled {
            ResponseStatus::Cancelled
        } else {
            ResponseStatus::Incomplete
        };
        let mut em = Emitter {
            out,
            next_sequence: sequence_base,
        };
        let response = self.snapshot(status, None);
        em.push(event_type, None, None, None, StreamPayload::Response { response });
        self.completed_emitted = true;
        tracing::debug!(response_id = %self.response_id(), event = event_type.as_str(), "gemini stream: interrupted");
    }

    fn snapshot(&self, status: ResponseStatus, finish_reason: Option<FinishReason>) -> ResponseSnapshot {
        ResponseSnapshot {
            id: self.response_id().to_string(),
            model: self.model().to_string(),
            created_at: self.created_at,
            status,
            finish_reason,
            usage: self.last_usage,
        }
    }

    fn final_finish_reason(&self) -> FinishReason {
        if !self.saw_candidate {
            return empty_response_finish_reason(self.prompt_blocked);
        }
        if self.last_finish_reason.is_none() && self.prompt_blocked {
            return FinishReason::ContentFilter;
        }
        resolve_finish_reason(self.last_finish_reason.as_deref(), self.saw_tool_calls)
    }

    // --- lifecycle ---

    fn emit_lifecycle_start(&mut self, em: &mut Emitter<'_>) {
        if !self.created_emitted {
            let response = self.snapshot(ResponseStatus::InProgress, None);
            em.push(StreamEventType::ResponseCreated, None, None, None, StreamPayload::Response { response });
            self.created_emitted = true;
            tracing::debug!(response_id = %self.response_id(), model = %self.model(), "gemini stream: created");
        }
        if !self.in_progress_emitted {
            let response = self.snapshot(ResponseStatus::InProgress, None);
            em.push(StreamEventType::ResponseInProgress, None, None, None, StreamPayload::Response { response });
            self.in_progress_emitted = true;
        }
    }

    fn finalize_into(&mut self, em: &mut Emitter<'_>) {
        if self.completed_emitted {
            return;
        }
        self.emit_lifecycle_start(em);
        self.close_open_items(em);

        let finish_reason = self.final_finish_reason();
        let response = self.snapshot(ResponseStatus::Completed, Some(finish_reason));
        em.push(StreamEventType::ResponseCompleted, None, None, None, StreamPayload::Response { response });
        self.completed_emitted = true;
        tracing::debug!(
            response_id = %self.response_id(),
            finish_reason = finish_reason.as_str(),
            items = self.items_opened,
            "gemini stream: completed"
        );
    }

    /// Close the open text run and any open tool-call items.
    fn close_open_items(&mut self, em: &mut Emitter<'_>) {
        self.close_text(em);
        if self.open_tool_calls.is_empty() {
            return;
        }
        let mut open = std::mem::take(&mut self.open_tool_calls);
        open.sort_unstable();
        for output_index in open.drain(..) {
            let item = OutputItem::FunctionCall {
                id: self.item_ids.get(&output_index).cloned().unwrap_or_default(),
                status: ItemStatus::Completed,
                call_id: self.tool_call_ids.get(&output_index).cloned().unwrap_or_default(),
                name: self.tool_names.get(&output_index).cloned().unwrap_or_default(),
                arguments: self.tool_arguments.get(&output_index).cloned().unwrap_or_default(),
            };
            em.item(StreamEventType::OutputItemDone, output_index, item);
        }
        self.open_tool_calls = open;
    }

    fn close_text(&mut self, em: &mut Emitter<'_>) {
        let Some(output_index) = self.text_output_index.take() else {
            return;
        };
        let item_id = self.item_ids.get(&output_index).cloned().unwrap_or_default();
        let text = std::mem::take(&mut self.text_buffer);
        em.push(
            StreamEventType::OutputTextDone,
            Some(output_index),
            Some(0),
            Some(&item_id),
            StreamPayload::Text { text: text.clone() },
        );
        em.part(
            StreamEventType::ContentPartDone,
            output_index,
            &item_id,
            ContentBlock::text(text.clone()),
        );
        em.item(
            StreamEventType::OutputItemDone,
            output_index,
            OutputItem::Message {
                id: item_id,
                status: ItemStatus::Completed,
                role: CanonicalRole::Assistant,
                content: vec![ContentBlock::text(text)],
            },
        );
        self.text_closed = true;
    }

    // --- parts ---

    fn dispatch_part(&mut self, part: &GeminiPart, em: &mut Emitter<'_>) {
        match part {
            GeminiPart::Text {
                text,
                thought: false,
                thought_signature,
            } => self.text_delta(text, thought_signature.as_deref(), em),
            GeminiPart::Text {
                text,
                thought: true,
                thought_signature,
            } => self.thought_item(text, thought_signature.as_deref(), em),
            GeminiPart::ThoughtSignature(signature) => {
                self.close_open_items(em);
                self.encrypted_reasoning_item(signature, None, em);
            }
            GeminiPart::FunctionCall {
                call,
                thought_signature,
            } => self.function_call_item(call, thought_signature.as_deref(), em),
            GeminiPart::FunctionResponse(response) => {
                self.close_open_items(em);
                let output_index = self.allocate_output_index();
                let item_id = self.assign_item_id("fco", output_index);
                let output = function_response_output(&response.response);
                let call_id = response.id.clone().unwrap_or_else(|| response.name.clone());
                let item = |status| OutputItem::FunctionCallOutput {
                    id: item_id.clone(),
                    status,
                    call_id: call_id.clone(),
                    name: response.name.clone(),
                    output: output.clone(),
                };
                em.item(StreamEventType::OutputItemAdded, output_index, item(ItemStatus::InProgress));
                let block = ContentBlock::text(output.clone());
                em.part(StreamEventType::ContentPartAdded, output_index, &item_id, block.clone());
                em.part(StreamEventType::ContentPartDone, output_index, &item_id, block);
                em.item(StreamEventType::OutputItemDone, output_index, item(ItemStatus::Completed));
            }
            GeminiPart::InlineData(_)
            | GeminiPart::FileData(_)
            | GeminiPart::ExecutableCode(_)
            | GeminiPart::CodeExecutionResult(_) => match part_to_block(part) {
                Some(block) => self.block_item(block, em),
                None => tracing::warn!("gemini stream: skipping part with empty mime type or uri"),
            },
            GeminiPart::Unknown(_) => {
                tracing::debug!(response_id = %self.response_id(), "gemini stream: skipping unknown part");
            }
        }
    }

    fn text_delta(&mut self, text: &str, signature: Option<&[u8]>, em: &mut Emitter<'_>) {
        if text.is_empty() {
            return;
        }
        let output_index = match self.text_output_index {
            Some(index) => index,
            None => {
                self.close_open_items(em);
                if self.text_closed {
                    tracing::debug!(response_id = %self.response_id(), "gemini stream: text resumes in a new item");
                }
                let index = self.allocate_output_index();
                let item_id = self.assign_item_id("text", index);
                em.item(
                    StreamEventType::OutputItemAdded,
                    index,
                    OutputItem::Message {
                        id: item_id.clone(),
                        status: ItemStatus::InProgress,
                        role: CanonicalRole::Assistant,
                        content: Vec::new(),
                    },
                );
                em.part(StreamEventType::ContentPartAdded, index, &item_id, ContentBlock::text(""));
                self.text_output_index = Some(index);
                self.text_closed = false;
                index
            }
        };
        let item_id = self.item_ids.get(&output_index).cloned().unwrap_or_default();
        em.push(
            StreamEventType::OutputTextDelta,
            Some(output_index),
            Some(0),
            Some(&item_id),
            StreamPayload::Delta {
                delta: text.to_string(),
                signature: signature.map(encode_base64),
            },
        );
        self.text_buffer.push_str(text);
    }

    fn thought_item(&mut self, text: &str, signature: Option<&[u8]>, em: &mut Emitter<'_>) {
        if text.is_empty() {
            if let Some(signature) = signature {
                self.close_open_items(em);
                self.encrypted_reasoning_item(signature, None, em);
            }
            return;
        }
        self.close_open_items(em);
        let output_index = self.allocate_output_index();
        let item_id = self.assign_item_id("reasoning", output_index);
        let encrypted_content = signature.map(encode_base64);

        em.item(
            StreamEventType::OutputItemAdded,
            output_index,
            OutputItem::Reasoning {
                id: item_id.clone(),
                status: ItemStatus::InProgress,
                summary: Vec::new(),
                encrypted_content: encrypted_content.clone(),
                call_id: None,
            },
        );
        let summary_events = [
            (
                StreamEventType::ReasoningSummaryPartAdded,
                StreamPayload::Part {
                    part: ContentBlock::text(""),
                },
            ),
            (
                StreamEventType::ReasoningSummaryTextDelta,
                StreamPayload::Delta {
                    delta: text.to_string(),
                    signature: None,
                },
            ),
            (
                StreamEventType::ReasoningSummaryTextDone,
                StreamPayload::Text {
                    text: text.to_string(),
                },
            ),
            (
                StreamEventType::ReasoningSummaryPartDone,
                StreamPayload::Part {
                    part: ContentBlock::text(text),
                },
            ),
        ];
        for (event_type, payload) in summary_events {
            em.push(event_type, Some(output_index), Some(0), Some(&item_id), payload);
        }
        em.item(
            StreamEventType::OutputItemDone,
            output_index,
            OutputItem::Reasoning {
                id: item_id,
                status: ItemStatus::Completed,
                summary: vec![text.to_string()],
                encrypted_content,
                call_id: None,
            },
        );
    }

    /// Self-contained reasoning item carrying only a signature.
    fn encrypted_reasoning_item(&mut self, signature: &[u8], call_id: Option<&str>, em: &mut Emitter<'_>) {
        let output_index = self.allocate_output_index();
        let item_id = self.assign_item_id("reasoning", output_index);
        let item = |status| OutputItem::Reasoning {
            id: item_id.clone(),
            status,
            summary: Vec::new(),
            encrypted_content: Some(encode_base64(signature)),
            call_id: call_id.map(str::to_string),
        };
        em.item(StreamEventType::OutputItemAdded, output_index, item(ItemStatus::InProgress));
        em.item(StreamEventType::OutputItemDone, output_index, item(ItemStatus::Completed));
    }

    fn function_call_item(
        &mut self,
        call: &GeminiFunctionCall,
        attached: Option<&[u8]>,
        em: &mut Emitter<'_>,
    ) {
        self.close_open_items(em);

        let raw_id = call
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(call.name.as_str());
        let (clean_id, embedded) = split_signature_from_id(raw_id);
        let signature = embedded.or_else(|| attached.map(<[u8]>::to_vec));
        if let Some(signature) = &signature {
            self.encrypted_reasoning_item(signature, Some(clean_id), em);
        }
        let call_id = match &signature {
            Some(signature) if self.options.embed_thought_signatures => {
                embed_signature_in_id(clean_id, signature)
            }
            _ => clean_id.to_string(),
        };
        let arguments = call
            .args
            .as_ref()
            .map_or_else(|| "{}".to_string(), ToString::to_string);

        let output_index = self.allocate_output_index();
        let item_id = self.assign_item_id("fc", output_index);
        self.tool_call_ids.insert(output_index, call_id.clone());
        self.tool_names.insert(output_index, call.name.clone());
        self.tool_arguments.insert(output_index, arguments.clone());
        self.open_tool_calls.push(output_index);
        self.saw_tool_calls = true;

        em.item(
            StreamEventType::OutputItemAdded,
            output_index,
            OutputItem::FunctionCall {
                id: item_id.clone(),
                status: ItemStatus::InProgress,
                call_id,
                name: call.name.clone(),
                arguments: arguments.clone(),
            },
        );
        em.push(
            StreamEventType::FunctionCallArgumentsDone,
            Some(output_index),
            None,
            Some(&item_id),
            StreamPayload::Arguments { arguments },
        );
    }

    /// Self-contained message item holding one media or code block.
    fn block_item(&mut self, block: ContentBlock, em: &mut Emitter<'_>) {
        self.close_open_items(em);
        let output_index = self.allocate_output_index();
        let item_id = self.assign_item_id("content", output_index);
        em.item(
            StreamEventType::OutputItemAdded,
            output_index,
            OutputItem::Message {
                id: item_id.clone(),
                status: ItemStatus::InProgress,
                role: CanonicalRole::Assistant,
                content: Vec::new(),
            },
        );
        em.part(StreamEventType::ContentPartAdded, output_index, &item_id, block.clone());
        em.part(StreamEventType::ContentPartDone, output_index, &item_id, block.clone());
        em.item(
            StreamEventType::OutputItemDone,
            output_index,
            OutputItem::Message {
                id: item_id,
                status: ItemStatus::Completed,
                role: CanonicalRole::Assistant,
                content: vec![block],
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{CanonicalUsage, ConvertOptions};
    use serde_json::json;

    fn chunk(value: serde_json::Value) -> GeminiResponse {
        serde_json::from_value(value).expect("chunk")
    }

    fn kinds(events: &[CanonicalStreamEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_type.as_str()).collect()
    }

    fn run(chunks: &[serde_json::Value], options: ConvertOptions) -> Vec<CanonicalStreamEvent> {
        let mut state = StreamState::new("gemini-2.5-flash", options);
        let mut out = Vec::new();
        for value in chunks {
            let base = out.len() as u64;
            state.process_chunk(&chunk(value.clone()), base, &mut out);
        }
        let base = out.len() as u64;
        state.finalize(base, &mut out);
        out
    }

    #[test]
    fn text_then_finish_yields_full_lifecycle() {
        let events = run(
            &[
                json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hello"}]}}],
                       "responseId": "r1"}),
                json!({"candidates": [{"content": {"parts": []}, "finishReason": "STOP"}],
                       "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 1, "totalTokenCount": 5}}),
            ],
            ConvertOptions::default(),
        );
        assert_eq!(
            kinds(&events),
            [
                "response.created",
                "response.in_progress",
                "response.output_item.added",
                "response.content_part.added",
                "response.output_text.delta",
                "response.output_text.done",
                "response.content_part.done",
                "response.output_item.done",
                "response.completed",
            ]
        );
        let completed = events.last().and_then(CanonicalStreamEvent::response).expect("snapshot");
        assert_eq!(completed.id, "r1");
        assert_eq!(completed.finish_reason, Some(FinishReason::Stop));
        assert_eq!(
            completed.usage,
            Some(CanonicalUsage {
                prompt_tokens: 4,
                completion_tokens: 1,
                total_tokens: 5,
                ..CanonicalUsage::default()
            })
        );
        let sequence: Vec<u64> = events.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequence, (0..events.len() as u64).collect::<Vec<_>>());
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut state = StreamState::new("m", ConvertOptions::default());
        let mut out = Vec::new();
        state.process_chunk(
            &chunk(json!({"candidates": [{"content": {"parts": [{"text": "x"}]}, "finishReason": "STOP"}]})),
            0,
            &mut out,
        );
        let count = out.len();
        state.finalize(count as u64, &mut out);
        state.finalize(count as u64, &mut out);
        assert_eq!(out.len(), count);
        assert_eq!(
            out.iter()
                .filter(|e| e.event_type == StreamEventType::ResponseCompleted)
                .count(),
            1
        );
    }

    #[test]
    fn finish_without_items_waits_for_eof() {
        let mut state = StreamState::new("m", ConvertOptions::default());
        let mut out = Vec::new();
        state.process_chunk(
            &chunk(json!({"candidates": [{"finishReason": "SAFETY"}]})),
            0,
            &mut out,
        );
        assert_eq!(kinds(&out), ["response.created", "response.in_progress"]);
        state.finalize(2, &mut out);
        let snapshot = out.last().and_then(CanonicalStreamEvent::response).expect("snapshot");
        assert_eq!(snapshot.finish_reason, Some(FinishReason::ContentFilter));
    }

    #[test]
    fn empty_stream_completes_with_other() {
        let mut state = StreamState::new("m", ConvertOptions::default());
        let mut out = Vec::new();
        state.finalize(10, &mut out);
        assert_eq!(
            kinds(&out),
            ["response.created", "response.in_progress", "response.completed"]
        );
        assert_eq!(out[0].sequence_number, 10);
        let snapshot = out[2].response().expect("snapshot");
        assert_eq!(snapshot.finish_reason, Some(FinishReason::Other));
    }

    #[test]
    fn candidate_free_chunks_match_the_decoder() {
        use crate::protocol::gemini::response_decoder::decode_gemini_response;

        for body in [
            json!({"usageMetadata": {"promptTokenCount": 3, "totalTokenCount": 3}}),
            json!({"promptFeedback": {"blockReason": "SAFETY"},
                   "usageMetadata": {"promptTokenCount": 3}}),
            json!({"candidates": [], "usageMetadata": {"promptTokenCount": 3}}),
        ] {
            let decoded = decode_gemini_response(&chunk(body.clone()), "m", &ConvertOptions::default());
            let events = run(&[body.clone()], ConvertOptions::default());
            let streamed = events.last().and_then(CanonicalStreamEvent::response).expect("snapshot");
            assert_eq!(streamed.finish_reason, decoded.choices[0].finish_reason, "{body}");
            assert_eq!(streamed.usage.map(|u| u.prompt_tokens), Some(3), "{body}");
        }
    }

    #[test]
    fn candidate_without_finish_reason_defaults_to_stop() {
        let events = run(
            &[json!({"candidates": [{"content": {"parts": [{"text": "hi"}]}}]})],
            ConvertOptions::default(),
        );
        let snapshot = events.last().and_then(CanonicalStreamEvent::response).expect("snapshot");
        assert_eq!(snapshot.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn function_call_with_signature_and_deferred_close() {
        let events = run(
            &[json!({"candidates": [{"content": {"parts": [
                {"text": "checking"},
                {"functionCall": {"id": "call_1", "name": "get_weather", "args": {"city": "Oslo"}},
                 "thoughtSignature": "AQID"},
                {"functionCall": {"name": "get_time", "args": {}}}
            ]}, "finishReason": "STOP"}]})],
            ConvertOptions::default(),
        );
        assert_eq!(
            kinds(&events),
            [
                "response.created",
                "response.in_progress",
                "response.output_item.added",
                "response.content_part.added",
                "response.output_text.delta",
                "response.output_text.done",
                "response.content_part.done",
                "response.output_item.done",
                // signature reasoning item bound to call_1
                "response.output_item.added",
                "response.output_item.done",
                "response.output_item.added",
                "response.function_call_arguments.done",
                // call_1 closes before get_time opens
                "response.output_item.done",
                "response.output_item.added",
                "response.function_call_arguments.done",
                "response.output_item.done",
                "response.completed",
            ]
        );
        match &events[8].payload {
            StreamPayload::Item {
                item:
                    OutputItem::Reasoning {
                        encrypted_content,
                        call_id,
                        ..
                    },
            } => {
                assert_eq!(encrypted_content.as_deref(), Some("AQID"));
                assert_eq!(call_id.as_deref(), Some("call_1"));
            }
            other => panic!("expected reasoning item, got {other:?}"),
        }
        match &events[10].payload {
            StreamPayload::Item {
                item: OutputItem::FunctionCall { call_id, arguments, .. },
            } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(arguments, r#"{"city":"Oslo"}"#);
            }
            other => panic!("expected function call item, got {other:?}"),
        }
        match &events[13].payload {
            StreamPayload::Item {
                item: OutputItem::FunctionCall { call_id, .. },
            } => assert_eq!(call_id, "get_time"),
            other => panic!("expected function call item, got {other:?}"),
        }
        let snapshot = events.last().and_then(CanonicalStreamEvent::response).expect("snapshot");
        assert_eq!(snapshot.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn embedded_signature_option_rewrites_call_id() {
        let events = run(
            &[json!({"candidates": [{"content": {"parts": [
                {"functionCall": {"id": "c", "name": "f", "args": {}}, "thoughtSignature": "AQID"}
            ]}}]})],
            ConvertOptions {
                embed_thought_signatures: true,
                ..ConvertOptions::default()
            },
        );
        let call_ids: Vec<&str> = events
            .iter()
            .filter_map(|e| match &e.payload {
                StreamPayload::Item {
                    item: OutputItem::FunctionCall { call_id, .. },
                } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(call_ids, ["c__thought__AQID", "c__thought__AQID"]);
    }

    #[test]
    fn thought_parts_are_self_contained() {
        let events = run(
            &[json!({"candidates": [{"content": {"parts": [
                {"text": "pondering", "thought": true},
                {"text": "answer"}
            ]}}]})],
            ConvertOptions::default(),
        );
        assert_eq!(
            kinds(&events)[2..8],
            [
                "response.output_item.added",
                "response.reasoning_summary_part.added",
                "response.reasoning_summary_text.delta",
                "response.reasoning_summary_text.done",
                "response.reasoning_summary_part.done",
                "response.output_item.done",
            ]
        );
        let text_delta = events
            .iter()
            .find(|e| e.event_type == StreamEventType::OutputTextDelta)
            .expect("text delta");
        assert_eq!(text_delta.output_index, Some(1));
        assert_eq!(text_delta.delta_text(), Some("answer"));
    }

    #[test]
    fn thought_after_text_closes_the_text_item_first() {
        let events = run(
            &[json!({"candidates": [{"content": {"parts": [
                {"text": "a"},
                {"text": "b", "thought": true}
            ]}}]})],
            ConvertOptions::default(),
        );
        let observed: Vec<(&str, Option<usize>)> = events
            .iter()
            .map(|e| (e.event_type.as_str(), e.output_index))
            .collect();
        assert_eq!(
            observed,
            [
                ("response.created", None),
                ("response.in_progress", None),
                ("response.output_item.added", Some(0)),
                ("response.content_part.added", Some(0)),
                ("response.output_text.delta", Some(0)),
                ("response.output_text.done", Some(0)),
                ("response.content_part.done", Some(0)),
                ("response.output_item.done", Some(0)),
                ("response.output_item.added", Some(1)),
                ("response.reasoning_summary_part.added", Some(1)),
                ("response.reasoning_summary_text.delta", Some(1)),
                ("response.reasoning_summary_text.done", Some(1)),
                ("response.reasoning_summary_part.done", Some(1)),
                ("response.output_item.done", Some(1)),
                ("response.completed", None),
            ]
        );
        for (offset, event) in events.iter().enumerate() {
            assert_eq!(event.sequence_number, offset as u64);
        }
        match &events[7].payload {
            StreamPayload::Item {
                item: OutputItem::Message { content, .. },
            } => assert_eq!(content, &[ContentBlock::text("a")]),
            other => panic!("expected message item, got {other:?}"),
        }
    }

    #[test]
    fn function_result_item_carries_unwrapped_output() {
        let events = run(
            &[json!({"candidates": [{"content": {"parts": [
                {"functionResponse": {"id": "call_1", "name": "get_weather",
                                      "response": {"output": "{\"temperature\":22}"}}}
            ]}, "finishReason": "STOP"}]})],
            ConvertOptions::default(),
        );
        let done = events
            .iter()
            .find(|e| e.event_type == StreamEventType::OutputItemDone)
            .expect("item done");
        match &done.payload {
            StreamPayload::Item {
                item: OutputItem::FunctionCallOutput { call_id, output, .. },
            } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(output, r#"{"temperature":22}"#);
            }
            other => panic!("expected function output item, got {other:?}"),
        }
    }

    #[test]
    fn unknown_part_is_skipped_without_failing() {
        let events = run(
            &[json!({"candidates": [{"content": {"parts": [
                {"text": "hi"},
                {"toolCall": {"id": "x"}},
                {"text": " there"}
            ]}, "finishReason": "STOP"}]})],
            ConvertOptions::default(),
        );
        let done = events
            .iter()
            .find(|e| e.event_type == StreamEventType::OutputTextDone)
            .expect("text done");
        assert_eq!(done.output_index, Some(0));
        match &done.payload {
            StreamPayload::Text { text } => assert_eq!(text, "hi there"),
            other => panic!("expected text payload, got {other:?}"),
        }
        assert_eq!(
            events.last().map(|e| e.event_type),
            Some(StreamEventType::ResponseCompleted)
        );
    }

    #[test]
    fn text_after_close_starts_new_run() {
        let events = run(
            &[json!({"candidates": [{"content": {"parts": [
                {"text": "a"},
                {"thoughtSignature": "AQID"},
                {"text": "b"}
            ]}}]})],
            ConvertOptions::default(),
        );
        let text_indices: Vec<Option<usize>> = events
            .iter()
            .filter(|e| e.event_type == StreamEventType::OutputTextDone)
            .map(|e| e.output_index)
            .collect();
        assert_eq!(text_indices, [Some(0), Some(2)]);
    }

    #[test]
    fn text_signature_rides_on_delta() {
        let events = run(
            &[json!({"candidates": [{"content": {"parts": [{"text": "hi", "thoughtSignature": "AQID"}]}}]})],
            ConvertOptions::default(),
        );
        let delta = events
            .iter()
            .find(|e| e.event_type == StreamEventType::OutputTextDelta)
            .expect("delta");
        match &delta.payload {
            StreamPayload::Delta { signature, .. } => assert_eq!(signature.as_deref(), Some("AQID")),
            other => panic!("expected delta, got {other:?}"),
        }
    }

    #[test]
    fn media_parts_stream_as_content_items() {
        let events = run(
            &[json!({"candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "iVBO"}},
                {"fileData": {"mimeType": "", "fileUri": ""}},
                {"executableCode": {"language": "PYTHON", "code": "print(2)"}}
            ]}, "finishReason": "STOP"}]})],
            ConvertOptions::default(),
        );
        let parts: Vec<&ContentBlock> = events
            .iter()
            .filter(|e| e.event_type == StreamEventType::ContentPartDone)
            .filter_map(|e| match &e.payload {
                StreamPayload::Part { part } => Some(part),
                _ => None,
            })
            .collect();
        assert_eq!(parts.len(), 2);
        assert!(matches!(parts[0], ContentBlock::Image { .. }));
        assert_eq!(parts[1], &ContentBlock::text("```python\nprint(2)\n```"));
    }

    #[test]
    fn failure_is_terminal() {
        let mut state = StreamState::new("m", ConvertOptions::default());
        let mut out = Vec::new();
        let err = CanonicalError::Upstream {
            context: None,
            status: 429,
            code: Some("RESOURCE_EXHAUSTED".into()),
            message: "quota".into(),
        };
        state.fail(&err, 0, &mut out);
        state.finalize(1, &mut out);
        assert_eq!(kinds(&out), ["response.failed"]);
        match &out[0].payload {
            StreamPayload::Failure { error, response } => {
                assert_eq!(error.status, 429);
                assert_eq!(error.code.as_deref(), Some("RESOURCE_EXHAUSTED"));
                assert_eq!(response.status, ResponseStatus::Failed);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn sse_line_parsing() {
        assert!(parse_gemini_sse_line(": ping").is_none());
        assert!(parse_gemini_sse_line("").is_none());
        let parsed = parse_gemini_sse_line(r#"data: {"candidates": []}"#).expect("data line");
        assert!(parsed.is_ok());
        let broken = parse_gemini_sse_line("data: {oops").expect("data line");
        assert!(broken.is_err());
    }
}
