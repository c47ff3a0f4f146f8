//! OpenAI chat-completion SSE framing.

use futures::Stream;

use crate::models::openai::{
    ChatChunk, ChunkChoice, Delta, FunctionCall, ToolCall, Usage,
};
use crate::stream::usage;
use crate::stream::{ContentPiece, EventReader, SseMsg, StreamContext};

/// Frame the upstream stream as OpenAI chat-completion chunks.
///
/// The first delta carries the assistant role; decoded thinking rides in
/// `reasoning_content`; tool calls are emitted as one indexed chunk after
/// the stream ends, followed by the finish chunk with usage and the
/// `[DONE]` terminator.
pub fn stream_to_openai(
    mut reader: EventReader,
    ctx: StreamContext,
) -> impl Stream<Item = SseMsg> + Send {
    async_stream::stream! {
        let mut first = true;
        loop {
            match reader.next_content().await {
                Ok(Some(piece)) => {
                    let mut delta = Delta {
                        role: first.then(|| "assistant".to_string()),
                        ..Delta::default()
                    };
                    match piece {
                        ContentPiece::Text(text) => delta.content = Some(text),
                        ContentPiece::Thinking(thinking) => {
                            delta.reasoning_content = Some(thinking);
                        }
                    }
                    first = false;
                    yield frame(&ctx, delta, None, None);
                }
                Ok(None) => break,
                Err(e) => {
                    yield SseMsg::data(e.to_openai_body().to_string());
                    return;
                }
            }
        }

        let outcome = reader.finalize();
        let report = usage::compute(&outcome, ctx.prompt_estimate, ctx.max_input_tokens);

        let has_tools = !outcome.tool_calls.is_empty();
        if has_tools {
            let tool_calls: Vec<ToolCall> = outcome
                .tool_calls
                .iter()
                .enumerate()
                .map(|(i, call)| ToolCall {
                    index: Some(i as u32),
                    id: call.id.clone(),
                    r#type: "function".to_string(),
                    function: FunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect();
            yield frame(
                &ctx,
                Delta {
                    tool_calls: Some(tool_calls),
                    ..Delta::default()
                },
                None,
                None,
            );
        }

        let finish_reason = if has_tools { "tool_calls" } else { "stop" };
        yield frame(
            &ctx,
            Delta::default(),
            Some(finish_reason.to_string()),
            Some(Usage {
                prompt_tokens: report.prompt_tokens,
                completion_tokens: report.completion_tokens,
                total_tokens: report.total_tokens,
                credits_used: report.credits_used,
            }),
        );
        yield SseMsg::Done;
    }
}

fn frame(
    ctx: &StreamContext,
    delta: Delta,
    finish_reason: Option<String>,
    usage: Option<Usage>,
) -> SseMsg {
    let chunk = ChatChunk {
        id: ctx.response_id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: ctx.created,
        model: ctx.model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
        usage,
    };
    SseMsg::data(serde_json::to_string(&chunk).unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn ctx() -> StreamContext {
        StreamContext {
            model: "claude-sonnet-4-5".into(),
            response_id: "chatcmpl-test".into(),
            created: 1_700_000_000,
            prompt_estimate: 7,
            max_input_tokens: 200_000,
        }
    }

    async fn run(bytes: &[u8]) -> Vec<SseMsg> {
        let reader = EventReader::from_bytes(bytes);
        stream_to_openai(reader, ctx()).collect().await
    }

    #[tokio::test]
    async fn test_simple_chat_frame_sequence() {
        // Spec scenario: two content events, usage, context percentage.
        let frames = run(concat!(
            r#"{"content":"Hello"}"#,
            r#"{"content":" there"}"#,
            r#"{"usage":2}"#,
            r#"{"contextUsagePercentage":0.5}"#
        ).as_bytes())
        .await;

        assert_eq!(frames.len(), 4);

        let first = frames[0].json().unwrap();
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(first["choices"][0]["delta"]["content"], "Hello");

        let second = frames[1].json().unwrap();
        assert!(second["choices"][0]["delta"].get("role").is_none());
        assert_eq!(second["choices"][0]["delta"]["content"], " there");

        let last = frames[2].json().unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        // floor(0.5/100 * 200000) = 1000
        assert_eq!(last["usage"]["total_tokens"], 1000);
        assert_eq!(last["usage"]["credits_used"], 2.0);

        assert_eq!(frames[3], SseMsg::Done);
    }

    #[tokio::test]
    async fn test_tool_call_framing() {
        let frames = run(concat!(
            r#"{"name":"get_weather","toolUseId":"t1","input":{"city":"NYC"}}"#,
            r#"{"stop":true}"#
        ).as_bytes())
        .await;

        // tool_calls chunk, finish chunk, done.
        assert_eq!(frames.len(), 3);
        let tools = frames[0].json().unwrap();
        let call = &tools["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["index"], 0);
        assert_eq!(call["id"], "t1");
        assert_eq!(call["function"]["name"], "get_weather");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(call["function"]["arguments"].as_str().unwrap())
                .unwrap(),
            serde_json::json!({"city": "NYC"})
        );

        let finish = frames[1].json().unwrap();
        assert_eq!(finish["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(frames[2], SseMsg::Done);
    }

    #[tokio::test]
    async fn test_thinking_becomes_reasoning_content() {
        let frames = run(concat!(
            r#"{"content":"<antThinking>let me think</antThinking>"}"#,
            r#"{"content":"Answer."}"#
        ).as_bytes())
        .await;

        let reasoning = frames[0].json().unwrap();
        assert_eq!(reasoning["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(
            reasoning["choices"][0]["delta"]["reasoning_content"],
            "let me think"
        );
        assert!(reasoning["choices"][0]["delta"].get("content").is_none());

        let text = frames[1].json().unwrap();
        assert_eq!(text["choices"][0]["delta"]["content"], "Answer.");
        // The tags themselves never reach the client.
        for frame in &frames {
            if let Some(v) = frame.json() {
                assert!(!v.to_string().contains("antThinking"));
            }
        }
    }

    #[tokio::test]
    async fn test_no_content_no_tools_still_finishes() {
        let frames = run(b"").await;
        assert_eq!(frames.len(), 2);
        let finish = frames[0].json().unwrap();
        assert_eq!(finish["choices"][0]["finish_reason"], "stop");
        assert_eq!(frames[1], SseMsg::Done);
    }

    #[tokio::test]
    async fn test_fallback_usage_without_context_pct() {
        let frames = run(br#"{"content":"hi"}"#).await;
        let finish = frames[frames.len() - 2].json().unwrap();
        let prompt = finish["usage"]["prompt_tokens"].as_u64().unwrap();
        assert_eq!(prompt, 7, "local estimate used when no context percentage");
    }
}
