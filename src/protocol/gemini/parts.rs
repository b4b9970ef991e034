//! Conversion between canonical content blocks and Gemini parts.

use std::collections::{HashMap, VecDeque};

use crate::protocol::canonical::{CanonicalMessage, CanonicalRole, ContentBlock, ToolCall};
use crate::protocol::gemini::{
    GeminiBlob, GeminiCodeExecutionResult, GeminiExecutableCode, GeminiFileData,
    GeminiFunctionCall, GeminiFunctionResponse, GeminiPart,
};
use crate::util::{decode_base64, encode_base64};

/// Reserved token separating a tool-call id from an embedded signature.
pub const SIGNATURE_SEPARATOR: &str = "__thought__";

const DEFAULT_IMAGE_MIME: &str = "image/jpeg";
const DEFAULT_AUDIO_MIME: &str = "audio/mpeg";
const DEFAULT_FILE_MIME: &str = "application/pdf";

const BARE_IMAGE_SUBTYPES: &[&str] = &[
    "jpeg", "jpg", "png", "gif", "webp", "bmp", "svg", "tiff", "ico", "avif",
];

// ---------------------------------------------------------------------------
// Signature-in-id helpers
// ---------------------------------------------------------------------------

/// Append `signature` to `id` behind [`SIGNATURE_SEPARATOR`].
#[must_use]
pub fn embed_signature_in_id(id: &str, signature: &[u8]) -> String {
    let encoded = encode_base64(signature);
    let mut out = String::with_capacity(id.len() + SIGNATURE_SEPARATOR.len() + encoded.len());
    out.push_str(id);
    out.push_str(SIGNATURE_SEPARATOR);
    out.push_str(&encoded);
    out
}

/// Split an id produced by [`embed_signature_in_id`].
///
/// Ids without the separator, or whose suffix is not valid base64, come back
/// whole with no signature.
#[must_use]
pub fn split_signature_from_id(id: &str) -> (&str, Option<Vec<u8>>) {
    let Some(pos) = id.find(SIGNATURE_SEPARATOR) else {
        return (id, None);
    };
    let suffix = &id[pos + SIGNATURE_SEPARATOR.len()..];
    match decode_base64(suffix) {
        Some(signature) if !signature.is_empty() => (&id[..pos], Some(signature)),
        _ => (id, None),
    }
}

// ---------------------------------------------------------------------------
// MIME handling
// ---------------------------------------------------------------------------

/// Coarse media family of a MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    File,
}

/// Classify a MIME type, ignoring case and parameters.
///
/// Bare image subtypes (`png`, `jpeg`, ...) count as images.
#[must_use]
pub fn classify_mime(mime: &str) -> MediaKind {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence.starts_with("image/") || BARE_IMAGE_SUBTYPES.contains(&essence.as_str()) {
        MediaKind::Image
    } else if essence.starts_with("audio/") {
        MediaKind::Audio
    } else {
        MediaKind::File
    }
}

/// Split a `data:<mime>;base64,<payload>` URL.
fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.split(';').next().unwrap_or_default();
    Some((mime, payload))
}

fn is_remote_uri(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://") || url.starts_with("gs://")
}

fn image_mime_from_uri(uri: &str) -> &'static str {
    let path = uri.split(['?', '#']).next().unwrap_or_default();
    let ext = path.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => DEFAULT_IMAGE_MIME,
    }
}

/// Guess an audio MIME type from the leading bytes of a base64 payload.
#[must_use]
pub fn sniff_audio_mime(base64_data: &str) -> &'static str {
    let head: String = base64_data.chars().filter(|c| !c.is_whitespace()).take(24).collect();
    let Some(bytes) = decode_base64(&head) else {
        return DEFAULT_AUDIO_MIME;
    };
    sniff_audio_bytes(&bytes)
}

fn sniff_audio_bytes(bytes: &[u8]) -> &'static str {
    let at = |range: std::ops::Range<usize>| bytes.get(range).unwrap_or_default();
    if at(0..4) == b"RIFF" && at(8..12) == b"WAVE" {
        return "audio/wav";
    }
    if at(0..4) == b"FORM" && matches!(at(8..12), b"AIFF" | b"AIFC") {
        return "audio/aiff";
    }
    if bytes.starts_with(b"ID3") {
        return "audio/mp3";
    }
    if bytes.starts_with(b"ADIF") {
        return "audio/aac";
    }
    if bytes.starts_with(b"fLaC") {
        return "audio/flac";
    }
    if bytes.starts_with(b"OggS") {
        return "audio/ogg";
    }
    match bytes {
        // ADTS: 12-bit sync word with layer bits 00.
        [0xFF, second, ..] if second & 0xF6 == 0xF0 => "audio/aac",
        // MPEG audio frame sync.
        [0xFF, second, ..] if second & 0xE0 == 0xE0 => "audio/mp3",
        _ => DEFAULT_AUDIO_MIME,
    }
}

// ---------------------------------------------------------------------------
// Canonical -> vendor
// ---------------------------------------------------------------------------

/// Convert one canonical content block into Gemini parts.
///
/// Returns an empty vector for blocks that carry nothing Gemini can accept.
#[must_use]
pub fn block_to_parts(block: &ContentBlock, role: CanonicalRole) -> Vec<GeminiPart> {
    match block {
        ContentBlock::Text { text } => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![GeminiPart::text(text.clone())]
            }
        }
        ContentBlock::Reasoning { text } => {
            if text.is_empty() {
                Vec::new()
            } else if role == CanonicalRole::Assistant {
                vec![GeminiPart::thought(text.clone())]
            } else {
                vec![GeminiPart::text(text.clone())]
            }
        }
        ContentBlock::Image { url, .. } => vec![image_part(url)],
        ContentBlock::Audio { data, format } => vec![audio_part(data, format.as_deref())],
        ContentBlock::File {
            file_data,
            file_url,
            mime_type,
            filename,
        } => match file_part(file_data.as_deref(), file_url.as_deref(), mime_type.as_deref()) {
            Some(part) => vec![part],
            None => {
                tracing::warn!(
                    filename = filename.as_deref().unwrap_or_default(),
                    "gemini parts: file block has neither data nor uri, dropping"
                );
                Vec::new()
            }
        },
    }
}

fn image_part(url: &str) -> GeminiPart {
    if let Some((mime, data)) = parse_data_url(url) {
        let mime = if mime.is_empty() { DEFAULT_IMAGE_MIME } else { mime };
        return GeminiPart::InlineData(GeminiBlob {
            mime_type: mime.to_string(),
            data: data.to_string(),
        });
    }
    if is_remote_uri(url) {
        return GeminiPart::FileData(GeminiFileData {
            mime_type: image_mime_from_uri(url).to_string(),
            file_uri: url.to_string(),
        });
    }
    GeminiPart::InlineData(GeminiBlob {
        mime_type: DEFAULT_IMAGE_MIME.to_string(),
        data: url.to_string(),
    })
}

fn audio_part(data: &str, format: Option<&str>) -> GeminiPart {
    if let Some((mime, payload)) = parse_data_url(data) {
        let mime = if mime.is_empty() {
            sniff_audio_mime(payload).to_string()
        } else {
            mime.to_string()
        };
        return GeminiPart::InlineData(GeminiBlob {
            mime_type: mime,
            data: payload.to_string(),
        });
    }
    let mime = match format.map(str::trim).filter(|f| !f.is_empty()) {
        Some(format) if format.contains('/') => format.to_ascii_lowercase(),
        Some(format) => format!("audio/{}", format.to_ascii_lowercase()),
        None => sniff_audio_mime(data).to_string(),
    };
    GeminiPart::InlineData(GeminiBlob {
        mime_type: mime,
        data: data.to_string(),
    })
}

fn file_part(
    file_data: Option<&str>,
    file_url: Option<&str>,
    mime_type: Option<&str>,
) -> Option<GeminiPart> {
    let explicit = mime_type.filter(|m| !m.is_empty());
    if let Some(data) = file_data.filter(|d| !d.is_empty()) {
        let (url_mime, payload) = match parse_data_url(data) {
            Some((mime, payload)) => (Some(mime).filter(|m| !m.is_empty()), payload),
            None => (None, data),
        };
        return Some(GeminiPart::InlineData(GeminiBlob {
            mime_type: url_mime.or(explicit).unwrap_or(DEFAULT_FILE_MIME).to_string(),
            data: payload.to_string(),
        }));
    }
    let uri = file_url.filter(|u| !u.is_empty())?;
    Some(GeminiPart::FileData(GeminiFileData {
        mime_type: explicit.unwrap_or(DEFAULT_FILE_MIME).to_string(),
        file_uri: uri.to_string(),
    }))
}

/// Build a function-call part for an assistant tool call.
///
/// A signature embedded in the id wins over `signature`; the vendor id is
/// always the clean id.
#[must_use]
pub fn tool_call_to_part(call: &ToolCall, signature: Option<Vec<u8>>) -> GeminiPart {
    let (clean_id, embedded) = split_signature_from_id(&call.id);
    GeminiPart::FunctionCall {
        call: GeminiFunctionCall {
            id: (!clean_id.is_empty()).then(|| clean_id.to_string()),
            name: call.name.clone(),
            args: Some(parse_arguments(&call.name, &call.arguments)),
        },
        thought_signature: embedded.or(signature),
    }
}

fn parse_arguments(name: &str, arguments: &str) -> serde_json::Value {
    let empty = || serde_json::Value::Object(serde_json::Map::new());
    if arguments.trim().is_empty() {
        return empty();
    }
    match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        Ok(_) => {
            tracing::warn!(tool = name, "gemini parts: tool arguments are not an object, sending {{}}");
            empty()
        }
        Err(err) => {
            tracing::warn!(tool = name, error = %err, "gemini parts: unparseable tool arguments, sending {{}}");
            empty()
        }
    }
}

/// Correlates tool results with the calls that produced them.
///
/// Ids are resolved through every call seen so far; results without an id
/// consume pending calls of the current assistant turn in FIFO order.
#[derive(Debug, Default)]
pub struct ToolCallRegistry {
    names_by_id: HashMap<String, String>,
    pending: VecDeque<(String, String)>,
}

impl ToolCallRegistry {
    /// Record the calls of a new assistant turn.
    pub fn begin_turn(&mut self, calls: &[ToolCall]) {
        self.pending.clear();
        for call in calls {
            let (clean_id, _) = split_signature_from_id(&call.id);
            self.names_by_id
                .insert(clean_id.to_string(), call.name.clone());
            self.pending
                .push_back((clean_id.to_string(), call.name.clone()));
        }
    }

    /// Resolve the `(id, name)` of a tool result.
    pub fn resolve(&mut self, tool_call_id: Option<&str>, name: Option<&str>) -> (Option<String>, String) {
        let name = name.filter(|n| !n.trim().is_empty());
        if let Some(raw_id) = tool_call_id.filter(|id| !id.is_empty()) {
            let (clean_id, _) = split_signature_from_id(raw_id);
            self.pending.retain(|(id, _)| id != clean_id);
            let resolved = self
                .names_by_id
                .get(clean_id)
                .cloned()
                .or_else(|| name.map(str::to_string))
                .unwrap_or_else(|| clean_id.to_string());
            return (Some(clean_id.to_string()), resolved);
        }

        let position = match name {
            Some(name) => self.pending.iter().position(|(_, n)| n == name),
            None => (!self.pending.is_empty()).then_some(0),
        };
        if let Some((id, pending_name)) = position.and_then(|pos| self.pending.remove(pos)) {
            return (Some(id), pending_name);
        }
        tracing::warn!(
            name = name.unwrap_or_default(),
            "gemini parts: tool result has no id and no matching pending call"
        );
        (None, name.unwrap_or("unknown_function").to_string())
    }
}

/// Build the function-result part for a tool-role message.
#[must_use]
pub fn tool_result_to_part(message: &CanonicalMessage, registry: &mut ToolCallRegistry) -> GeminiPart {
    let (id, name) = registry.resolve(message.tool_call_id.as_deref(), message.name.as_deref());
    GeminiPart::FunctionResponse(GeminiFunctionResponse {
        id,
        name,
        response: serde_json::json!({ "output": message.content.joined_text() }),
    })
}

// ---------------------------------------------------------------------------
// Vendor -> canonical
// ---------------------------------------------------------------------------

/// Tool output text carried by a function-result payload.
///
/// A lone `output` key is unwrapped (a string verbatim, anything else as
/// JSON); other payloads are returned whole as JSON text.
#[must_use]
pub fn function_response_output(response: &serde_json::Value) -> String {
    match response.as_object() {
        Some(object) if object.len() == 1 => match object.get("output") {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => response.to_string(),
        },
        _ => response.to_string(),
    }
}

/// Convert Gemini content parts into canonical blocks.
///
/// Function calls, function results and bare signatures carry no block and
/// are handled by the callers.
#[must_use]
pub fn parts_to_blocks(parts: &[GeminiPart]) -> Vec<ContentBlock> {
    parts.iter().filter_map(part_to_block).collect()
}

/// Block form of a single part, if it has one.
#[must_use]
pub fn part_to_block(part: &GeminiPart) -> Option<ContentBlock> {
    match part {
        GeminiPart::Text { text, thought, .. } => {
            if text.is_empty() {
                None
            } else if *thought {
                Some(ContentBlock::Reasoning { text: text.clone() })
            } else {
                Some(ContentBlock::text(text.clone()))
            }
        }
        GeminiPart::InlineData(blob) => blob_to_block(blob),
        GeminiPart::FileData(file) => file_to_block(file),
        GeminiPart::ExecutableCode(code) => Some(executable_code_block(code)),
        GeminiPart::CodeExecutionResult(result) => code_result_block(result),
        GeminiPart::FunctionCall { .. }
        | GeminiPart::FunctionResponse(_)
        | GeminiPart::ThoughtSignature(_)
        | GeminiPart::Unknown(_) => None,
    }
}

fn blob_to_block(blob: &GeminiBlob) -> Option<ContentBlock> {
    if blob.mime_type.trim().is_empty() {
        return None;
    }
    Some(match classify_mime(&blob.mime_type) {
        MediaKind::Image => ContentBlock::Image {
            url: format!("data:{};base64,{}", blob.mime_type, blob.data),
            detail: None,
        },
        MediaKind::Audio => ContentBlock::Audio {
            data: blob.data.clone(),
            format: blob
                .mime_type
                .split_once('/')
                .map(|(_, subtype)| subtype.to_ascii_lowercase()),
        },
        MediaKind::File => ContentBlock::File {
            file_data: Some(format!("data:{};base64,{}", blob.mime_type, blob.data)),
            file_url: None,
            mime_type: Some(blob.mime_type.clone()),
            filename: None,
        },
    })
}

fn file_to_block(file: &GeminiFileData) -> Option<ContentBlock> {
    if file.file_uri.trim().is_empty() {
        return None;
    }
    Some(match classify_mime(&file.mime_type) {
        MediaKind::Image => ContentBlock::Image {
            url: file.file_uri.clone(),
            detail: None,
        },
        MediaKind::Audio | MediaKind::File => ContentBlock::File {
            file_data: None,
            file_url: Some(file.file_uri.clone()),
            mime_type: (!file.mime_type.is_empty()).then(|| file.mime_type.clone()),
            filename: None,
        },
    })
}

fn executable_code_block(code: &GeminiExecutableCode) -> ContentBlock {
    let language = match code.language.as_str() {
        "" | "LANGUAGE_UNSPECIFIED" => String::new(),
        other => other.to_ascii_lowercase(),
    };
    ContentBlock::text(format!("```{language}\n{}\n```", code.code.trim_end()))
}

fn code_result_block(result: &GeminiCodeExecutionResult) -> Option<ContentBlock> {
    match result.output.as_deref().filter(|o| !o.is_empty()) {
        Some(output) => Some(ContentBlock::text(output.to_string())),
        None if !result.outcome.is_empty() => {
            Some(ContentBlock::text(format!("[code execution: {}]", result.outcome)))
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_response_output_mirrors_the_encoder() {
        let message = CanonicalMessage::tool_result("call_1", r#"{"temperature":22}"#);
        let GeminiPart::FunctionResponse(encoded) =
            tool_result_to_part(&message, &mut ToolCallRegistry::default())
        else {
            panic!("expected function response");
        };
        assert_eq!(function_response_output(&encoded.response), r#"{"temperature":22}"#);

        assert_eq!(function_response_output(&serde_json::json!({"output": 7})), "7");
        assert_eq!(
            function_response_output(&serde_json::json!({"temp": 22, "unit": "C"})),
            r#"{"temp":22,"unit":"C"}"#
        );
    }

    #[test]
    fn signature_embedding_round_trips() {
        let id = embed_signature_in_id("call_1", &[9, 8, 7]);
        assert_eq!(id, "call_1__thought__CQgH");
        let (clean, signature) = split_signature_from_id(&id);
        assert_eq!(clean, "call_1");
        assert_eq!(signature, Some(vec![9, 8, 7]));
    }

    #[test]
    fn invalid_signature_suffix_keeps_id_whole() {
        let (clean, signature) = split_signature_from_id("call_1__thought__!!not-b64");
        assert_eq!(clean, "call_1__thought__!!not-b64");
        assert_eq!(signature, None);
        assert_eq!(split_signature_from_id("plain"), ("plain", None));
    }

    #[test]
    fn mime_classification() {
        assert_eq!(classify_mime("image/PNG"), MediaKind::Image);
        assert_eq!(classify_mime("png"), MediaKind::Image);
        assert_eq!(classify_mime("image/webp; q=1"), MediaKind::Image);
        assert_eq!(classify_mime("audio/wav"), MediaKind::Audio);
        assert_eq!(classify_mime("application/pdf"), MediaKind::File);
        assert_eq!(classify_mime("pdf"), MediaKind::File);
    }

    #[test]
    fn audio_sniffing_by_magic_bytes() {
        let wav = encode_base64(b"RIFF\x00\x00\x00\x00WAVEfmt ");
        assert_eq!(sniff_audio_mime(&wav), "audio/wav");
        assert_eq!(sniff_audio_mime(&encode_base64(b"ID3\x04\x00\x00")), "audio/mp3");
        assert_eq!(sniff_audio_mime(&encode_base64(b"fLaC\x00\x00")), "audio/flac");
        assert_eq!(sniff_audio_mime(&encode_base64(b"OggS\x00\x02")), "audio/ogg");
        assert_eq!(sniff_audio_mime(&encode_base64(&[0xFF, 0xF1, 0x50, 0x80])), "audio/aac");
        assert_eq!(sniff_audio_mime(&encode_base64(&[0xFF, 0xFB, 0x90, 0x00])), "audio/mp3");
        assert_eq!(sniff_audio_mime(&encode_base64(b"FORM\x00\x00\x00\x00AIFF")), "audio/aiff");
        assert_eq!(sniff_audio_mime("????"), "audio/mpeg");
    }

    #[test]
    fn reasoning_is_a_thought_only_for_assistant() {
        let block = ContentBlock::Reasoning { text: "hmm".into() };
        assert_eq!(
            block_to_parts(&block, CanonicalRole::Assistant),
            vec![GeminiPart::thought("hmm")]
        );
        assert_eq!(
            block_to_parts(&block, CanonicalRole::User),
            vec![GeminiPart::text("hmm")]
        );
    }

    #[test]
    fn image_urls_branch_on_shape() {
        let data_url = ContentBlock::Image {
            url: "data:image/png;base64,iVBORw0KGgo=".into(),
            detail: None,
        };
        match block_to_parts(&data_url, CanonicalRole::User).as_slice() {
            [GeminiPart::InlineData(blob)] => {
                assert_eq!(blob.mime_type, "image/png");
                assert_eq!(blob.data, "iVBORw0KGgo=");
            }
            other => panic!("expected inline data, got {other:?}"),
        }

        let remote = ContentBlock::Image {
            url: "https://example.com/cat".into(),
            detail: None,
        };
        match block_to_parts(&remote, CanonicalRole::User).as_slice() {
            [GeminiPart::FileData(file)] => {
                assert_eq!(file.mime_type, "image/jpeg");
                assert_eq!(file.file_uri, "https://example.com/cat");
            }
            other => panic!("expected file data, got {other:?}"),
        }
    }

    #[test]
    fn file_without_payload_is_dropped() {
        let block = ContentBlock::File {
            file_data: None,
            file_url: None,
            mime_type: Some("application/pdf".into()),
            filename: Some("a.pdf".into()),
        };
        assert!(block_to_parts(&block, CanonicalRole::User).is_empty());
    }

    #[test]
    fn file_mime_precedence() {
        let block = ContentBlock::File {
            file_data: Some("data:text/csv;base64,YSxi".into()),
            file_url: None,
            mime_type: Some("application/octet-stream".into()),
            filename: None,
        };
        match block_to_parts(&block, CanonicalRole::User).as_slice() {
            [GeminiPart::InlineData(blob)] => assert_eq!(blob.mime_type, "text/csv"),
            other => panic!("expected inline data, got {other:?}"),
        }
        let bare = ContentBlock::File {
            file_data: Some("YSxi".into()),
            file_url: None,
            mime_type: None,
            filename: None,
        };
        match block_to_parts(&bare, CanonicalRole::User).as_slice() {
            [GeminiPart::InlineData(blob)] => assert_eq!(blob.mime_type, "application/pdf"),
            other => panic!("expected inline data, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_part_uses_clean_id_and_embedded_signature() {
        let call = ToolCall {
            index: 0,
            id: embed_signature_in_id("call_9", &[1, 2]),
            name: "lookup".into(),
            arguments: "not json".into(),
        };
        match tool_call_to_part(&call, Some(vec![7])) {
            GeminiPart::FunctionCall {
                call,
                thought_signature,
            } => {
                assert_eq!(call.id.as_deref(), Some("call_9"));
                assert_eq!(call.args, Some(serde_json::json!({})));
                assert_eq!(thought_signature, Some(vec![1, 2]));
            }
            other => panic!("expected FunctionCall, got {other:?}"),
        }
    }

    #[test]
    fn registry_resolves_by_id_then_fifo() {
        let mut registry = ToolCallRegistry::default();
        registry.begin_turn(&[
            ToolCall {
                index: 0,
                id: "a".into(),
                name: "search".into(),
                arguments: "{}".into(),
            },
            ToolCall {
                index: 1,
                id: "b".into(),
                name: "fetch".into(),
                arguments: "{}".into(),
            },
        ]);
        assert_eq!(
            registry.resolve(Some("b"), None),
            (Some("b".to_string()), "fetch".to_string())
        );
        assert_eq!(
            registry.resolve(None, None),
            (Some("a".to_string()), "search".to_string())
        );
        assert_eq!(registry.resolve(None, Some("x")), (None, "x".to_string()));
    }

    #[test]
    fn vendor_parts_map_back_to_blocks() {
        let parts = vec![
            GeminiPart::thought("plan"),
            GeminiPart::text("answer"),
            GeminiPart::InlineData(GeminiBlob {
                mime_type: "audio/wav".into(),
                data: "UklGRg==".into(),
            }),
            GeminiPart::FileData(GeminiFileData {
                mime_type: "application/pdf".into(),
                file_uri: "gs://b/doc.pdf".into(),
            }),
            GeminiPart::InlineData(GeminiBlob {
                mime_type: String::new(),
                data: "AA==".into(),
            }),
            GeminiPart::ExecutableCode(GeminiExecutableCode {
                language: "PYTHON".into(),
                code: "print(1)".into(),
            }),
            GeminiPart::CodeExecutionResult(GeminiCodeExecutionResult {
                outcome: "OUTCOME_OK".into(),
                output: Some("1\n".into()),
            }),
            GeminiPart::ThoughtSignature(vec![1]),
        ];
        let blocks = parts_to_blocks(&parts);
        assert_eq!(blocks.len(), 6);
        assert_eq!(blocks[0], ContentBlock::Reasoning { text: "plan".into() });
        assert_eq!(blocks[1], ContentBlock::text("answer"));
        assert_eq!(
            blocks[2],
            ContentBlock::Audio {
                data: "UklGRg==".into(),
                format: Some("wav".into())
            }
        );
        match &blocks[3] {
            ContentBlock::File { file_url, .. } => {
                assert_eq!(file_url.as_deref(), Some("gs://b/doc.pdf"));
            }
            other => panic!("expected file, got {other:?}"),
        }
        assert_eq!(blocks[4], ContentBlock::text("```python\nprint(1)\n```"));
        assert_eq!(blocks[5], ContentBlock::text("1\n"));
    }
}
