//! Collect mode: consume the streaming frames and reassemble a single
//! response object in the client's dialect.
//!
//! Reusing the framer output keeps one code path for both modes; usage is
//! read off the final frame and zeroes out when absent.

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::GatewayError;
use crate::models::anthropic::{
    AnthropicUsage, MessagesResponse, ResponseContentBlock, StopReason,
};
use crate::models::gemini::{
    Candidate, GeminiContent, GeminiFunctionCall, GeminiPart, GenerateContentResponse,
    UsageMetadata,
};
use crate::models::openai::{ChatChunk, ChatCompletion, Choice, ResponseMessage, ToolCall, Usage};
use crate::stream::SseMsg;
use crate::upstream::json_repair;

/// Detect a mid-stream error frame and surface it as an error value.
/// All three dialects carry a top-level `error` object.
fn check_error(value: &Value) -> Result<(), GatewayError> {
    if let Some(error) = value.get("error") {
        let message = error["message"]
            .as_str()
            .unwrap_or("upstream stream error")
            .to_string();
        let status = error["code"].as_u64().unwrap_or(502) as u16;
        return Err(GatewayError::Upstream { status, message });
    }
    Ok(())
}

/// Reassemble an OpenAI chat completion from its chunk stream.
pub async fn collect_openai(
    frames: impl Stream<Item = SseMsg>,
) -> Result<ChatCompletion, GatewayError> {
    futures::pin_mut!(frames);

    let mut id = String::new();
    let mut created = 0i64;
    let mut model = String::new();
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut finish_reason = None;
    let mut usage = Usage::default();

    while let Some(frame) = frames.next().await {
        let SseMsg::Event { data, .. } = frame else {
            break;
        };
        let value: Value = serde_json::from_str(&data)?;
        check_error(&value)?;

        let chunk: ChatChunk = serde_json::from_value(value)?;
        id = chunk.id;
        created = chunk.created;
        model = chunk.model;
        if let Some(u) = chunk.usage {
            usage = u;
        }
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content {
                content.push_str(&text);
            }
            if let Some(thinking) = choice.delta.reasoning_content {
                reasoning.push_str(&thinking);
            }
            if let Some(calls) = choice.delta.tool_calls {
                tool_calls.extend(calls);
            }
            if choice.finish_reason.is_some() {
                finish_reason = choice.finish_reason;
            }
        }
    }

    Ok(ChatCompletion {
        id,
        object: "chat.completion".to_string(),
        created,
        model,
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: if content.is_empty() { None } else { Some(content) },
                reasoning_content: if reasoning.is_empty() {
                    None
                } else {
                    Some(reasoning)
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason,
        }],
        usage,
    })
}

/// Reassemble an Anthropic Messages response from its event stream.
pub async fn collect_anthropic(
    frames: impl Stream<Item = SseMsg>,
) -> Result<MessagesResponse, GatewayError> {
    futures::pin_mut!(frames);

    let mut id = String::new();
    let mut model = String::new();
    let mut text = String::new();
    let mut thinking = String::new();
    let mut blocks: Vec<ResponseContentBlock> = Vec::new();
    let mut open_tool: Option<(String, String, String)> = None;
    let mut stop_reason = None;
    let mut usage = AnthropicUsage::default();

    while let Some(frame) = frames.next().await {
        let SseMsg::Event { data, .. } = frame else {
            break;
        };
        let value: Value = serde_json::from_str(&data)?;
        check_error(&value)?;

        match value["type"].as_str().unwrap_or_default() {
            "message_start" => {
                id = value["message"]["id"].as_str().unwrap_or_default().to_string();
                model = value["message"]["model"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                usage.input_tokens =
                    value["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
            }
            "content_block_start" => {
                let block = &value["content_block"];
                if block["type"] == "tool_use" {
                    open_tool = Some((
                        block["id"].as_str().unwrap_or_default().to_string(),
                        block["name"].as_str().unwrap_or_default().to_string(),
                        String::new(),
                    ));
                }
            }
            "content_block_delta" => match value["delta"]["type"].as_str().unwrap_or_default() {
                "text_delta" => {
                    text.push_str(value["delta"]["text"].as_str().unwrap_or_default());
                }
                "thinking_delta" => {
                    thinking.push_str(value["delta"]["thinking"].as_str().unwrap_or_default());
                }
                "input_json_delta" => {
                    if let Some((_, _, args)) = open_tool.as_mut() {
                        args.push_str(value["delta"]["partial_json"].as_str().unwrap_or_default());
                    }
                }
                _ => {}
            },
            "content_block_stop" => {
                if let Some((tool_id, name, args)) = open_tool.take() {
                    blocks.push(ResponseContentBlock::ToolUse {
                        id: tool_id,
                        name,
                        input: json_repair::parse_object_or_empty(&args),
                    });
                }
            }
            "message_delta" => {
                if let Ok(reason) =
                    serde_json::from_value::<StopReason>(value["delta"]["stop_reason"].clone())
                {
                    stop_reason = Some(reason);
                }
                if let Some(input) = value["usage"]["input_tokens"].as_u64() {
                    usage.input_tokens = input as u32;
                }
                if let Some(output) = value["usage"]["output_tokens"].as_u64() {
                    usage.output_tokens = output as u32;
                }
            }
            _ => {}
        }
    }

    // Thinking first, then text, then tool uses.
    let mut content = Vec::new();
    if !thinking.is_empty() {
        content.push(ResponseContentBlock::Thinking { thinking });
    }
    if !text.is_empty() {
        content.push(ResponseContentBlock::Text { text });
    }
    content.extend(blocks);

    Ok(MessagesResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model,
        stop_reason,
        stop_sequence: None,
        usage,
    })
}

/// Reassemble a Gemini generateContent response from its chunk stream.
pub async fn collect_gemini(
    frames: impl Stream<Item = SseMsg>,
) -> Result<GenerateContentResponse, GatewayError> {
    futures::pin_mut!(frames);

    let mut text = String::new();
    let mut function_calls: Vec<GeminiFunctionCall> = Vec::new();
    let mut finish_reason = None;
    let mut usage_metadata: Option<UsageMetadata> = None;

    while let Some(frame) = frames.next().await {
        let SseMsg::Event { data, .. } = frame else {
            break;
        };
        let value: Value = serde_json::from_str(&data)?;
        check_error(&value)?;

        let chunk: GenerateContentResponse = serde_json::from_value(value)?;
        if let Some(meta) = chunk.usage_metadata {
            usage_metadata = Some(meta);
        }
        for candidate in chunk.candidates {
            if candidate.finish_reason.is_some() {
                finish_reason = candidate.finish_reason;
            }
            for part in candidate.content.parts {
                match part {
                    GeminiPart::Text(t) => text.push_str(&t),
                    GeminiPart::FunctionCall(fc) => function_calls.push(fc),
                    _ => {}
                }
            }
        }
    }

    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(GeminiPart::Text(text));
    }
    parts.extend(function_calls.into_iter().map(GeminiPart::FunctionCall));

    Ok(GenerateContentResponse {
        candidates: vec![Candidate {
            content: GeminiContent {
                role: Some("model".to_string()),
                parts,
            },
            finish_reason: finish_reason.or_else(|| Some("STOP".to_string())),
            index: Some(0),
        }],
        usage_metadata: Some(usage_metadata.unwrap_or_default()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{EventReader, StreamContext};

    fn ctx() -> StreamContext {
        StreamContext {
            model: "claude-sonnet-4-5".into(),
            response_id: "chatcmpl-test".into(),
            created: 1_700_000_000,
            prompt_estimate: 9,
            max_input_tokens: 200_000,
        }
    }

    #[tokio::test]
    async fn test_collect_openai_text_and_usage() {
        let reader = EventReader::from_bytes(
            br#"{"content":"Hello"}{"content":" there"}{"contextUsagePercentage":0.5}"#,
        );
        let frames = crate::stream::openai::stream_to_openai(reader, ctx());
        let completion = collect_openai(frames).await.unwrap();

        assert_eq!(
            completion.choices[0].message.content.as_deref(),
            Some("Hello there")
        );
        assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(completion.usage.total_tokens, 1000);
        assert_eq!(completion.model, "claude-sonnet-4-5");
    }

    #[tokio::test]
    async fn test_collect_openai_tool_calls() {
        let reader = EventReader::from_bytes(concat!(
            r#"{"name":"f","toolUseId":"t1","input":{"x":1}}"#,
            r#"{"stop":true}"#
        ).as_bytes());
        let frames = crate::stream::openai::stream_to_openai(reader, ctx());
        let completion = collect_openai(frames).await.unwrap();

        let calls = completion.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "f");
        assert_eq!(
            completion.choices[0].finish_reason.as_deref(),
            Some("tool_calls")
        );
    }

    #[tokio::test]
    async fn test_collect_anthropic_text_and_tools() {
        let reader = EventReader::from_bytes(concat!(
            r#"{"content":"Checking."}"#,
            r#"{"name":"get_weather","toolUseId":"t1","input":{"city":"NYC"}}"#,
            r#"{"stop":true}"#
        ).as_bytes());
        let frames = crate::stream::anthropic::stream_to_anthropic(reader, ctx());
        let response = collect_anthropic(frames).await.unwrap();

        assert_eq!(response.text(), "Checking.");
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        match &response.content[1] {
            ResponseContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "t1");
                assert_eq!(name, "get_weather");
                assert_eq!(input["city"], "NYC");
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
        assert_eq!(response.usage.input_tokens, 9);
    }

    #[tokio::test]
    async fn test_collect_openai_reasoning_content() {
        let reader = EventReader::from_bytes(concat!(
            r#"{"content":"<antThinking>mull it over</antThinking>"}"#,
            r#"{"content":"Done."}"#
        ).as_bytes());
        let frames = crate::stream::openai::stream_to_openai(reader, ctx());
        let completion = collect_openai(frames).await.unwrap();

        let message = &completion.choices[0].message;
        assert_eq!(message.content.as_deref(), Some("Done."));
        assert_eq!(message.reasoning_content.as_deref(), Some("mull it over"));
    }

    #[tokio::test]
    async fn test_collect_anthropic_thinking_block() {
        let reader = EventReader::from_bytes(concat!(
            r#"{"content":"<antThinking>consider the options</antThinking>"}"#,
            r#"{"content":"Picked one."}"#
        ).as_bytes());
        let frames = crate::stream::anthropic::stream_to_anthropic(reader, ctx());
        let response = collect_anthropic(frames).await.unwrap();

        // Thinking block leads, text follows.
        match &response.content[0] {
            ResponseContentBlock::Thinking { thinking } => {
                assert_eq!(thinking, "consider the options");
            }
            other => panic!("expected thinking block, got {other:?}"),
        }
        assert_eq!(response.text(), "Picked one.");
    }

    #[tokio::test]
    async fn test_collect_gemini() {
        let reader = EventReader::from_bytes(concat!(
            r#"{"content":"Sure."}"#,
            r#"{"name":"lookup","toolUseId":"t1","input":{"q":"x"}}"#,
            r#"{"stop":true}"#
        ).as_bytes());
        let frames = crate::stream::gemini::stream_to_gemini(reader, ctx());
        let response = collect_gemini(frames).await.unwrap();

        let parts = &response.candidates[0].content.parts;
        assert!(matches!(&parts[0], GeminiPart::Text(t) if t == "Sure."));
        assert!(matches!(&parts[1], GeminiPart::FunctionCall(fc) if fc.name == "lookup"));
        assert_eq!(response.candidates[0].finish_reason.as_deref(), Some("STOP"));
        assert!(response.usage_metadata.is_some());
    }

    #[tokio::test]
    async fn test_collect_without_usage_is_zeroed() {
        // A frame stream with no usage-bearing final chunk.
        let frames = futures::stream::iter(vec![SseMsg::data(
            serde_json::json!({
                "id": "x", "object": "chat.completion.chunk", "created": 1,
                "model": "m",
                "choices": [{"index": 0, "delta": {"content": "hi"}, "finish_reason": null}]
            })
            .to_string(),
        )]);
        let completion = collect_openai(frames).await.unwrap();
        assert_eq!(completion.usage.total_tokens, 0);
        assert_eq!(completion.usage.prompt_tokens, 0);
    }

    #[tokio::test]
    async fn test_collect_surfaces_error_frame() {
        let frames = futures::stream::iter(vec![SseMsg::data(
            serde_json::json!({
                "error": {"message": "boom", "type": "api_error", "code": 502}
            })
            .to_string(),
        )]);
        let err = collect_openai(frames).await.unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { status: 502, .. }));
    }
}
