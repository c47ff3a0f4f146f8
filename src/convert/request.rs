//! Upstream payload construction.
//!
//! Builds the `generateAssistantResponse` body from a canonical request:
//! history is everything except the last message, the last message becomes
//! `currentMessage`, and the system prompt is folded into the first user
//! turn (the upstream has no system field).

use uuid::Uuid;

use crate::convert::model_map;
use crate::error::GatewayError;
use crate::models::canonical::{CanonicalMessage, CanonicalRequest, ContentBlock, MessageBody, Role};
use crate::models::kiro::{
    AssistantResponseMessage, ConversationState, CurrentMessage, HistoryEntry, InputSchema,
    KiroImage, KiroImageSource, KiroPayload, KiroTextContent, KiroToolResult, KiroToolSpec,
    KiroToolUse, ToolSpecification, UserInputMessage, UserInputMessageContext,
};

/// Origin query/body value sent with every upstream request.
pub const API_ORIGIN: &str = "AI_EDITOR";

/// Content substituted when the current message would otherwise be empty.
const CONTINUATION_PROMPT: &str = "Continue";

/// Build the upstream payload from a canonical request.
pub fn build_payload(
    request: &CanonicalRequest,
    profile_arn: Option<String>,
) -> Result<KiroPayload, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::Validation("messages must not be empty".into()));
    }

    let model_id = model_map::resolve(&request.model);
    let mut messages = request.messages.clone();

    // A trailing assistant turn moves into history; a synthetic user message
    // carries the conversation forward.
    if messages.last().is_some_and(|m| m.role == Role::Assistant) {
        messages.push(CanonicalMessage::text(Role::User, CONTINUATION_PROMPT));
    }

    let (history_msgs, current_msgs) = messages.split_at(messages.len() - 1);
    let current = &current_msgs[0];

    let mut history: Vec<HistoryEntry> = history_msgs
        .iter()
        .map(|msg| history_entry(msg, &model_id))
        .collect();

    // Current message assembly.
    let mut content = extract_text(&current.content);
    if content.is_empty() {
        content = CONTINUATION_PROMPT.to_string();
    }

    let images = extract_images(&current.content);
    let tool_results = extract_tool_results(&current.content);
    let tools: Vec<KiroToolSpec> = request
        .tools
        .iter()
        .map(|t| KiroToolSpec {
            tool_specification: ToolSpecification {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: InputSchema {
                    json: t.input_schema.clone(),
                },
            },
        })
        .collect();

    let context = UserInputMessageContext {
        tools: if tools.is_empty() { None } else { Some(tools) },
        tool_results: if tool_results.is_empty() {
            None
        } else {
            Some(tool_results)
        },
    };

    let mut user_input_message = UserInputMessage {
        content,
        model_id: model_id.clone(),
        origin: API_ORIGIN.to_string(),
        images: if images.is_empty() { None } else { Some(images) },
        user_input_message_context: if context.is_empty() {
            None
        } else {
            Some(context)
        },
    };

    // The system prompt rides on the first user turn.
    if !request.system.is_empty() {
        let mut prepended = false;
        for entry in history.iter_mut() {
            if let HistoryEntry::User { user_input_message } = entry {
                user_input_message.content =
                    format!("{}\n\n{}", request.system, user_input_message.content);
                prepended = true;
                break;
            }
        }
        if !prepended {
            user_input_message.content =
                format!("{}\n\n{}", request.system, user_input_message.content);
        }
    }

    Ok(KiroPayload {
        conversation_state: ConversationState {
            chat_trigger_type: "MANUAL".to_string(),
            conversation_id: Uuid::new_v4().to_string(),
            current_message: CurrentMessage { user_input_message },
            history: if history.is_empty() {
                None
            } else {
                Some(history)
            },
        },
        profile_arn,
    })
}

/// Map one canonical message to a history entry.
fn history_entry(msg: &CanonicalMessage, model_id: &str) -> HistoryEntry {
    match msg.role {
        Role::Assistant => {
            let text = extract_text(&msg.content);
            let tool_uses = extract_tool_uses(&msg.content);
            let content = match extract_thinking(&msg.content) {
                Some(thinking) => format!("<antThinking>\n{thinking}\n</antThinking>\n{text}"),
                None => text,
            };
            HistoryEntry::Assistant {
                assistant_response_message: AssistantResponseMessage {
                    content,
                    tool_uses: if tool_uses.is_empty() {
                        None
                    } else {
                        Some(tool_uses)
                    },
                },
            }
        }
        _ => {
            let tool_results = extract_tool_results(&msg.content);
            let images = extract_images(&msg.content);
            HistoryEntry::User {
                user_input_message: UserInputMessage {
                    content: extract_text(&msg.content),
                    model_id: model_id.to_string(),
                    origin: API_ORIGIN.to_string(),
                    images: if images.is_empty() { None } else { Some(images) },
                    user_input_message_context: if tool_results.is_empty() {
                        None
                    } else {
                        Some(UserInputMessageContext {
                            tools: None,
                            tool_results: Some(tool_results),
                        })
                    },
                },
            }
        }
    }
}

// -- block extraction --------------------------------------------------------

fn extract_text(body: &MessageBody) -> String {
    body.text()
}

fn extract_images(body: &MessageBody) -> Vec<KiroImage> {
    let MessageBody::Blocks(blocks) = body else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Image { media_type, data } => Some(KiroImage {
                format: media_type.split('/').next_back().unwrap_or("png").to_string(),
                source: KiroImageSource { bytes: data.clone() },
            }),
            _ => None,
        })
        .collect()
}

fn extract_tool_results(body: &MessageBody) -> Vec<KiroToolResult> {
    let MessageBody::Blocks(blocks) = body else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some(KiroToolResult {
                content: vec![KiroTextContent {
                    text: content.clone(),
                }],
                status: if *is_error { "error" } else { "success" }.to_string(),
                tool_use_id: tool_use_id.clone(),
            }),
            _ => None,
        })
        .collect()
}

fn extract_tool_uses(body: &MessageBody) -> Vec<KiroToolUse> {
    let MessageBody::Blocks(blocks) = body else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => Some(KiroToolUse {
                name: name.clone(),
                input: input.clone(),
                tool_use_id: id.clone(),
            }),
            _ => None,
        })
        .collect()
}

fn extract_thinking(body: &MessageBody) -> Option<String> {
    let MessageBody::Blocks(blocks) = body else {
        return None;
    };
    let parts: Vec<&str> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Thinking { thinking } => Some(thinking.as_str()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::canonical::CanonicalMessage;
    use serde_json::json;

    fn request(messages: Vec<CanonicalMessage>) -> CanonicalRequest {
        CanonicalRequest::for_test("claude-sonnet-4-5", messages)
    }

    #[test]
    fn test_minimal_payload() {
        let payload = build_payload(
            &request(vec![CanonicalMessage::text(Role::User, "Hello")]),
            None,
        )
        .unwrap();
        let current = &payload.conversation_state.current_message.user_input_message;
        assert_eq!(current.content, "Hello");
        assert_eq!(current.model_id, "CLAUDE_SONNET_4_5_20250929_V1_0");
        assert_eq!(current.origin, "AI_EDITOR");
        assert!(payload.conversation_state.history.is_none());
        assert_eq!(payload.conversation_state.chat_trigger_type, "MANUAL");
    }

    #[test]
    fn test_empty_messages_rejected() {
        assert!(matches!(
            build_payload(&request(vec![]), None),
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn test_history_split() {
        let payload = build_payload(
            &request(vec![
                CanonicalMessage::text(Role::User, "Hi"),
                CanonicalMessage::text(Role::Assistant, "Hello!"),
                CanonicalMessage::text(Role::User, "How are you?"),
            ]),
            None,
        )
        .unwrap();
        let history = payload.conversation_state.history.unwrap();
        assert_eq!(history.len(), 2);
        assert!(matches!(history[0], HistoryEntry::User { .. }));
        assert!(matches!(history[1], HistoryEntry::Assistant { .. }));
        assert_eq!(
            payload
                .conversation_state
                .current_message
                .user_input_message
                .content,
            "How are you?"
        );
    }

    #[test]
    fn test_trailing_assistant_moved_to_history() {
        let payload = build_payload(
            &request(vec![
                CanonicalMessage::text(Role::User, "Hi"),
                CanonicalMessage::text(Role::Assistant, "Partial answer"),
            ]),
            None,
        )
        .unwrap();
        let history = payload.conversation_state.history.unwrap();
        assert_eq!(history.len(), 2);
        assert!(matches!(history[1], HistoryEntry::Assistant { .. }));
        assert_eq!(
            payload
                .conversation_state
                .current_message
                .user_input_message
                .content,
            "Continue"
        );
    }

    #[test]
    fn test_empty_current_content_becomes_continue() {
        let payload = build_payload(
            &request(vec![CanonicalMessage::text(Role::User, "")]),
            None,
        )
        .unwrap();
        assert_eq!(
            payload
                .conversation_state
                .current_message
                .user_input_message
                .content,
            "Continue"
        );
    }

    #[test]
    fn test_system_prepended_to_first_user_history_entry() {
        let mut req = request(vec![
            CanonicalMessage::text(Role::User, "Hi"),
            CanonicalMessage::text(Role::Assistant, "Hello!"),
            CanonicalMessage::text(Role::User, "Next"),
        ]);
        req.system = "Be terse.".into();
        let payload = build_payload(&req, None).unwrap();
        let history = payload.conversation_state.history.unwrap();
        match &history[0] {
            HistoryEntry::User { user_input_message } => {
                assert_eq!(user_input_message.content, "Be terse.\n\nHi");
            }
            other => panic!("expected user entry, got {other:?}"),
        }
        // Current message is untouched.
        assert_eq!(
            payload
                .conversation_state
                .current_message
                .user_input_message
                .content,
            "Next"
        );
    }

    #[test]
    fn test_system_prepended_to_current_when_no_history() {
        let mut req = request(vec![CanonicalMessage::text(Role::User, "Hi")]);
        req.system = "Be terse.".into();
        let payload = build_payload(&req, None).unwrap();
        assert_eq!(
            payload
                .conversation_state
                .current_message
                .user_input_message
                .content,
            "Be terse.\n\nHi"
        );
    }

    #[test]
    fn test_images_and_tool_results_on_current() {
        let req = request(vec![CanonicalMessage {
            role: Role::User,
            content: MessageBody::Blocks(vec![
                ContentBlock::Text {
                    text: "see".into(),
                },
                ContentBlock::Image {
                    media_type: "image/png".into(),
                    data: "QUJD".into(),
                },
                ContentBlock::ToolResult {
                    tool_use_id: "t1".into(),
                    content: "42".into(),
                    is_error: true,
                },
            ]),
        }]);
        let payload = build_payload(&req, None).unwrap();
        let current = payload.conversation_state.current_message.user_input_message;
        let images = current.images.unwrap();
        assert_eq!(images[0].format, "png");
        assert_eq!(images[0].source.bytes, "QUJD");
        let ctx = current.user_input_message_context.unwrap();
        let results = ctx.tool_results.unwrap();
        assert_eq!(results[0].tool_use_id, "t1");
        assert_eq!(results[0].status, "error");
    }

    #[test]
    fn test_tools_attached_to_current_context() {
        let mut req = request(vec![CanonicalMessage::text(Role::User, "go")]);
        req.tools = vec![crate::models::canonical::NormalizedTool {
            name: "f".into(),
            description: "d".into(),
            input_schema: json!({"type": "object"}),
        }];
        let payload = build_payload(&req, None).unwrap();
        let ctx = payload
            .conversation_state
            .current_message
            .user_input_message
            .user_input_message_context
            .unwrap();
        let tools = ctx.tools.unwrap();
        assert_eq!(tools[0].tool_specification.name, "f");
        assert_eq!(tools[0].tool_specification.input_schema.json["type"], "object");
    }

    #[test]
    fn test_assistant_history_carries_tool_uses() {
        let req = request(vec![
            CanonicalMessage::text(Role::User, "go"),
            CanonicalMessage {
                role: Role::Assistant,
                content: MessageBody::Blocks(vec![ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "f".into(),
                    input: json!({"x": 1}),
                }]),
            },
            CanonicalMessage::text(Role::User, "result in"),
        ]);
        let payload = build_payload(&req, None).unwrap();
        let history = payload.conversation_state.history.unwrap();
        match &history[1] {
            HistoryEntry::Assistant {
                assistant_response_message,
            } => {
                let uses = assistant_response_message.tool_uses.as_ref().unwrap();
                assert_eq!(uses[0].tool_use_id, "t1");
                assert_eq!(uses[0].input, json!({"x": 1}));
            }
            other => panic!("expected assistant entry, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_model_passthrough() {
        let mut req = request(vec![CanonicalMessage::text(Role::User, "hi")]);
        req.model = "experimental-model-x".into();
        let payload = build_payload(&req, None).unwrap();
        assert_eq!(
            payload
                .conversation_state
                .current_message
                .user_input_message
                .model_id,
            "experimental-model-x"
        );
    }

    proptest::proptest! {
        /// `history ++ [currentMessage]` preserves every turn in order.
        #[test]
        fn prop_payload_preserves_message_order(
            texts in proptest::collection::vec("[a-z]{1,8}", 1..8)
        ) {
            use proptest::prelude::prop_assert_eq;

            let messages: Vec<CanonicalMessage> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                    CanonicalMessage::text(role, t.clone())
                })
                .collect();
            let payload = build_payload(
                &CanonicalRequest::for_test("auto", messages),
                None,
            )
            .unwrap();

            let mut seen: Vec<String> = Vec::new();
            if let Some(history) = &payload.conversation_state.history {
                for entry in history {
                    match entry {
                        HistoryEntry::User { user_input_message } => {
                            seen.push(user_input_message.content.clone());
                        }
                        HistoryEntry::Assistant { assistant_response_message } => {
                            seen.push(assistant_response_message.content.clone());
                        }
                    }
                }
            }
            let current = payload
                .conversation_state
                .current_message
                .user_input_message
                .content
                .clone();

            if texts.len() % 2 == 0 {
                // Trailing assistant turn moved to history.
                prop_assert_eq!(current, "Continue");
                prop_assert_eq!(seen, texts);
            } else {
                prop_assert_eq!(&current, texts.last().unwrap());
                prop_assert_eq!(seen, texts[..texts.len() - 1].to_vec());
            }
        }
    }

    #[test]
    fn test_profile_arn_included() {
        let payload = build_payload(
            &request(vec![CanonicalMessage::text(Role::User, "hi")]),
            Some("arn:aws:codewhisperer:us-east-1:1:profile/x".into()),
        )
        .unwrap();
        assert_eq!(
            payload.profile_arn.as_deref(),
            Some("arn:aws:codewhisperer:us-east-1:1:profile/x")
        );
    }
}
