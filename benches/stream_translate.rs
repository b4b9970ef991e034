use criterion::{black_box, criterion_group, criterion_main, Criterion};

use gemini_adapter::protocol::canonical::{
    CanonicalMessage, CanonicalRequest, CanonicalRole, CanonicalTool, ConvertOptions, ToolCall,
};
use gemini_adapter::protocol::gemini::encoder::encode_gemini_request;
use gemini_adapter::protocol::gemini::response_decoder::decode_gemini_response;
use gemini_adapter::protocol::gemini::stream::parse_gemini_sse_line;
use gemini_adapter::protocol::gemini::stream_state::StreamStatePool;
use gemini_adapter::protocol::gemini::GeminiResponse;

fn text_lines(chunks: usize) -> Vec<String> {
    let mut lines: Vec<String> = (0..chunks)
        .map(|idx| {
            format!(
                r#"data: {{"candidates":[{{"content":{{"role":"model","parts":[{{"text":"token {idx} of the answer "}}]}}}}]}}"#
            )
        })
        .collect();
    lines.push(
        r#"data: {"candidates":[{"content":{"role":"model","parts":[]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":12,"candidatesTokenCount":400,"totalTokenCount":412}}"#
            .to_string(),
    );
    lines
}

fn tool_conversation(turns: usize) -> CanonicalRequest {
    let mut messages = vec![CanonicalMessage::text(CanonicalRole::System, "You are a helpful assistant")];
    for turn in 0..turns {
        messages.push(CanonicalMessage::text(CanonicalRole::User, format!("question {turn}")));
        messages.push(CanonicalMessage {
            tool_calls: vec![
                ToolCall {
                    index: 0,
                    id: format!("call_{turn}_a"),
                    name: "get_weather".into(),
                    arguments: r#"{"city":"SF"}"#.into(),
                },
                ToolCall {
                    index: 1,
                    id: format!("call_{turn}_b"),
                    name: "get_weather".into(),
                    arguments: r#"{"city":"NYC"}"#.into(),
                },
            ],
            ..CanonicalMessage::text(CanonicalRole::Assistant, "")
        });
        messages.push(CanonicalMessage::tool_result(format!("call_{turn}_a"), r#"{"t":22}"#));
        messages.push(CanonicalMessage::tool_result(format!("call_{turn}_b"), r#"{"t":15}"#));
    }
    let parameters = serde_json::from_value(serde_json::json!({
        "type": "object",
        "properties": {"city": {"type": "string"}},
        "required": ["city"]
    }))
    .unwrap();
    CanonicalRequest {
        model: "gemini-2.5-flash".into(),
        messages,
        tools: vec![CanonicalTool {
            name: "get_weather".into(),
            description: Some("Get weather".into()),
            parameters: Some(parameters),
        }],
        ..CanonicalRequest::default()
    }
}

fn bench_stream_translate(c: &mut Criterion) {
    let pool = StreamStatePool::new(8);
    let lines = text_lines(200);
    let chunks: Vec<GeminiResponse> = lines
        .iter()
        .filter_map(|line| parse_gemini_sse_line(line))
        .map(Result::unwrap)
        .collect();

    c.bench_function("stream_parse_200_lines", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(parse_gemini_sse_line(black_box(line)));
            }
        });
    });

    c.bench_function("stream_translate_200_chunks", |b| {
        let mut events = Vec::with_capacity(1024);
        b.iter(|| {
            let mut state = pool.acquire("gemini-2.5-flash", ConvertOptions::default());
            for chunk in &chunks {
                state.process_chunk(black_box(chunk), 0, &mut events);
            }
            state.finalize(0, &mut events);
            black_box(events.len());
            events.clear();
        });
    });
}

fn bench_request_response(c: &mut Criterion) {
    let request = tool_conversation(25);
    let options = ConvertOptions::default();
    let response: GeminiResponse = serde_json::from_value(serde_json::json!({
        "candidates": [{
            "content": {"role": "model", "parts": [
                {"text": "thinking", "thought": true},
                {"text": "The weather is mild."},
                {"functionCall": {"id": "call_x", "name": "get_weather", "args": {"city": "SF"}}, "thoughtSignature": "c2ln"}
            ]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
    }))
    .unwrap();

    c.bench_function("encode_request_25_tool_turns", |b| {
        b.iter(|| black_box(encode_gemini_request(black_box(&request), &options).unwrap()));
    });

    c.bench_function("decode_response_with_tool_call", |b| {
        b.iter(|| black_box(decode_gemini_response(black_box(&response), "gemini-2.5-flash", &options)));
    });
}

criterion_group!(benches, bench_stream_translate, bench_request_response);
criterion_main!(benches);
