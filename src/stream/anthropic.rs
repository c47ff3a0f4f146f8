//! Anthropic Messages SSE framing.
//!
//! Frame order: `message_start`, then thinking/text blocks
//! (start/deltas/stop, a new block whenever the piece kind changes), one
//! block per finalized tool call, then `message_delta` with the stop
//! reason and `message_stop`.

use futures::Stream;
use serde_json::Value;

use crate::models::anthropic::{
    AnthropicUsage, ContentDelta, MessageDeltaBody, PartialMessage, ResponseContentBlock,
    StopReason, StreamEvent,
};
use crate::stream::usage;
use crate::stream::{ContentPiece, EventReader, SseMsg, StreamContext};

/// Kind of the content block currently streaming.
#[derive(Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Thinking,
}

pub fn stream_to_anthropic(
    mut reader: EventReader,
    ctx: StreamContext,
) -> impl Stream<Item = SseMsg> + Send {
    async_stream::stream! {
        yield event_frame(&StreamEvent::MessageStart {
            message: PartialMessage {
                id: format!("msg_{}", ctx.response_id.trim_start_matches("chatcmpl-")),
                message_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: ctx.model.clone(),
                usage: AnthropicUsage {
                    input_tokens: ctx.prompt_estimate,
                    output_tokens: 0,
                },
            },
        });

        let mut block_index = 0usize;
        let mut open_block: Option<OpenBlock> = None;
        loop {
            match reader.next_content().await {
                Ok(Some(piece)) => {
                    let (kind, delta) = match piece {
                        ContentPiece::Text(text) => {
                            (OpenBlock::Text, ContentDelta::TextDelta { text })
                        }
                        ContentPiece::Thinking(thinking) => {
                            (OpenBlock::Thinking, ContentDelta::ThinkingDelta { thinking })
                        }
                    };
                    if open_block != Some(kind) {
                        if open_block.is_some() {
                            yield event_frame(&StreamEvent::ContentBlockStop {
                                index: block_index,
                            });
                            block_index += 1;
                        }
                        let content_block = match kind {
                            OpenBlock::Text => ResponseContentBlock::Text {
                                text: String::new(),
                            },
                            OpenBlock::Thinking => ResponseContentBlock::Thinking {
                                thinking: String::new(),
                            },
                        };
                        yield event_frame(&StreamEvent::ContentBlockStart {
                            index: block_index,
                            content_block,
                        });
                        open_block = Some(kind);
                    }
                    yield event_frame(&StreamEvent::ContentBlockDelta {
                        index: block_index,
                        delta,
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    yield SseMsg::named("error", e.to_anthropic_body().to_string());
                    return;
                }
            }
        }
        if open_block.is_some() {
            yield event_frame(&StreamEvent::ContentBlockStop { index: block_index });
            block_index += 1;
        }

        let outcome = reader.finalize();
        let report = usage::compute(&outcome, ctx.prompt_estimate, ctx.max_input_tokens);

        for call in &outcome.tool_calls {
            let input: Value = serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| Value::Object(Default::default()));
            yield event_frame(&StreamEvent::ContentBlockStart {
                index: block_index,
                content_block: ResponseContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: Value::Object(Default::default()),
                },
            });
            if input.as_object().is_some_and(|o| !o.is_empty()) {
                yield event_frame(&StreamEvent::ContentBlockDelta {
                    index: block_index,
                    delta: ContentDelta::InputJsonDelta {
                        partial_json: input.to_string(),
                    },
                });
            }
            yield event_frame(&StreamEvent::ContentBlockStop { index: block_index });
            block_index += 1;
        }

        let stop_reason = if outcome.tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };
        yield event_frame(&StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason,
                stop_sequence: None,
            },
            usage: AnthropicUsage {
                input_tokens: report.prompt_tokens,
                output_tokens: report.completion_tokens,
            },
        });
        yield event_frame(&StreamEvent::MessageStop);
    }
}

fn event_frame(event: &StreamEvent) -> SseMsg {
    SseMsg::named(
        event.name(),
        serde_json::to_string(event).unwrap_or_default(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
