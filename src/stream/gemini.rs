//! Gemini generateContent SSE framing.
//!
//! Bare `data:` frames, one candidate per chunk, no terminator. The final
//! chunk carries `finishReason` and `usageMetadata`.

use futures::Stream;
use serde_json::Value;

use crate::models::gemini::{
    Candidate, GeminiContent, GeminiFunctionCall, GeminiPart, GenerateContentResponse,
    UsageMetadata,
};
use crate::stream::usage;
use crate::stream::{ContentPiece, EventReader, SseMsg, StreamContext};

pub fn stream_to_gemini(
    mut reader: EventReader,
    ctx: StreamContext,
) -> impl Stream<Item = SseMsg> + Send {
    async_stream::stream! {
        loop {
            match reader.next_content().await {
                Ok(Some(ContentPiece::Text(text))) => {
                    yield chunk_frame(vec![GeminiPart::Text(text)], None, None);
                }
                // The dialect has no reasoning channel; decoded thinking is
                // dropped from the output (it still counts toward usage).
                Ok(Some(ContentPiece::Thinking(_))) => {}
                Ok(None) => break,
                Err(e) => {
                    yield SseMsg::data(e.to_gemini_body().to_string());
                    return;
                }
            }
        }

        let outcome = reader.finalize();
        let report = usage::compute(&outcome, ctx.prompt_estimate, ctx.max_input_tokens);

        for call in &outcome.tool_calls {
            let args: Value = serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| Value::Object(Default::default()));
            yield chunk_frame(
                vec![GeminiPart::FunctionCall(GeminiFunctionCall {
                    name: call.name.clone(),
                    args,
                })],
                None,
                None,
            );
        }

        yield chunk_frame(
            Vec::new(),
            Some("STOP".to_string()),
            Some(UsageMetadata {
                prompt_token_count: report.prompt_tokens,
                candidates_token_count: report.completion_tokens,
                total_token_count: report.total_tokens,
                credits_used: report.credits_used,
            }),
        );
    }
}

fn chunk_frame(
    parts: Vec<GeminiPart>,
    finish_reason: Option<String>,
    usage_metadata: Option<UsageMetadata>,
) -> SseMsg {
    let chunk = GenerateContentResponse {
        candidates: vec![Candidate {
            content: GeminiContent {
                role: Some("model".to_string()),
                parts,
            },
            finish_reason,
            index: Some(0),
        }],
        usage_metadata,
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
            prompt_estimate: 5,
            max_input_tokens: 200_000,
        }
    }

    async fn run(bytes: &[u8]) -> Vec<SseMsg> {
        let reader = EventReader::from_bytes(bytes);
        stream_to_gemini(reader, ctx()).collect().await
    }

    #[tokio::test]
    async fn test_content_chunks() {
        let frames = run(br#"{"content":"Hello"}{"content":" there"}"#).await;
        assert_eq!(frames.len(), 3);

        let first = frames[0].json().unwrap();
        assert_eq!(first["candidates"][0]["content"]["role"], "model");
        assert_eq!(first["candidates"][0]["content"]["parts"][0]["text"], "Hello");
        assert!(first["candidates"][0].get("finishReason").is_none());

        let last = frames[2].json().unwrap();
        assert_eq!(last["candidates"][0]["finishReason"], "STOP");
        assert!(last["usageMetadata"]["totalTokenCount"].is_u64());
    }

    #[tokio::test]
    async fn test_function_call_chunk() {
        let frames = run(concat!(
            r#"{"name":"lookup","toolUseId":"t1","input":{"q":"x"}}"#,
            r#"{"stop":true}"#
        ).as_bytes())
        .await;
        assert_eq!(frames.len(), 2);

        let call = frames[0].json().unwrap();
        let fc = &call["candidates"][0]["content"]["parts"][0]["functionCall"];
        assert_eq!(fc["name"], "lookup");
        assert_eq!(fc["args"]["q"], "x");
    }

    #[tokio::test]
    async fn test_usage_from_context_percentage() {
        let frames = run(br#"{"content":"hi"}{"contextUsagePercentage":1.0}"#).await;
        let last = frames.last().unwrap().json().unwrap();
        assert_eq!(last["usageMetadata"]["totalTokenCount"], 2000);
    }

    #[tokio::test]
    async fn test_thinking_dropped_from_output() {
        let frames = run(concat!(
            r#"{"content":"<antThinking>pondering</antThinking>"}"#,
            r#"{"content":"Result"}"#
        ).as_bytes())
        .await;
        // One text chunk plus the final chunk; no tags anywhere.
        assert_eq!(frames.len(), 2);
        let first = frames[0].json().unwrap();
        assert_eq!(first["candidates"][0]["content"]["parts"][0]["text"], "Result");
        for frame in &frames {
            assert!(!frame.json().unwrap().to_string().contains("antThinking"));
        }
    }

    #[tokio::test]
    async fn test_no_done_terminator() {
        let frames = run(br#"{"content":"x"}"#).await;
        assert!(frames.iter().all(|f| *f != SseMsg::Done));
    }
}
