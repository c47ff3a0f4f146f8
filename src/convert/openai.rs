//! OpenAI dialect to canonical request, and response cross-conversion.

use serde_json::Value;
use tracing::warn;

use crate::convert::messages::canonicalize;
use crate::convert::tools::{append_tool_docs, extract_long_descriptions, normalize_tools};
use crate::error::GatewayError;
use crate::models::anthropic::{
    AnthropicUsage, MessagesResponse, ResponseContentBlock, StopReason,
};
use crate::models::canonical::{
    CanonicalMessage, CanonicalRequest, ContentBlock, MessageBody, Role,
};
use crate::models::openai::{
    ChatCompletion, ChatMessage, ChatRequest, ContentPart, OpenAiContent, OpenAiRole, ToolCall,
};

/// Normalize an OpenAI chat completion request into the canonical shape.
pub fn to_canonical(
    request: &ChatRequest,
    tool_description_max_length: usize,
) -> Result<CanonicalRequest, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::Validation("messages must not be empty".into()));
    }

    let raw: Vec<CanonicalMessage> = request.messages.iter().map(convert_message).collect();
    let conversation = canonicalize(raw);

    let normalized = normalize_tools(request.tools.as_deref().unwrap_or_default());
    let (tools, docs) = extract_long_descriptions(normalized, tool_description_max_length);

    let mut system = conversation.system;
    if let Some(docs) = docs {
        system = append_tool_docs(&system, &docs);
    }

    Ok(CanonicalRequest {
        model: request.model.clone(),
        system,
        messages: conversation.messages,
        tools,
        tool_choice: request.tool_choice.clone(),
        stream: request.stream,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop.clone().map(|s| s.into_vec()),
    })
}

/// Convert one OpenAI message into the canonical model.
fn convert_message(msg: &ChatMessage) -> CanonicalMessage {
    match msg.role {
        OpenAiRole::System => CanonicalMessage {
            role: Role::System,
            content: MessageBody::Text(
                msg.content.as_ref().map(OpenAiContent::text).unwrap_or_default(),
            ),
        },
        OpenAiRole::User => CanonicalMessage {
            role: Role::User,
            content: convert_user_content(msg.content.as_ref()),
        },
        OpenAiRole::Assistant => {
            let mut blocks: Vec<ContentBlock> = Vec::new();
            if let Some(content) = &msg.content {
                let text = content.text();
                if !text.is_empty() {
                    blocks.push(ContentBlock::Text { text });
                }
            }
            for tc in msg.tool_calls.as_deref().unwrap_or_default() {
                blocks.push(ContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input: serde_json::from_str(&tc.function.arguments)
                        .unwrap_or_else(|_| Value::Object(Default::default())),
                });
            }
            CanonicalMessage {
                role: Role::Assistant,
                content: MessageBody::Blocks(blocks),
            }
        }
        OpenAiRole::Tool => {
            let text = msg.content.as_ref().map(OpenAiContent::text).unwrap_or_default();
            // Error status is inferred from the content, the OpenAI shape
            // has no flag for it.
            let is_error = text.starts_with("Error:")
                || text.starts_with("error:")
                || text.starts_with("ERROR:");
            CanonicalMessage {
                role: Role::Tool,
                content: MessageBody::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: text,
                    is_error,
                }]),
            }
        }
    }
}

fn convert_user_content(content: Option<&OpenAiContent>) -> MessageBody {
    match content {
        None => MessageBody::Text(String::new()),
        Some(OpenAiContent::Text(t)) => MessageBody::Text(t.clone()),
        Some(OpenAiContent::Parts(parts)) => {
            let mut blocks = Vec::new();
            for part in parts {
                match part {
                    ContentPart::Text { text } => {
                        if !text.is_empty() {
                            blocks.push(ContentBlock::Text { text: text.clone() });
                        }
                    }
                    ContentPart::ImageUrl { image_url } => {
                        match parse_data_url(&image_url.url) {
                            Some((media_type, data)) => {
                                blocks.push(ContentBlock::Image { media_type, data });
                            }
                            None => {
                                warn!(url = image_url.url.as_str(), "Skipping non-data image URL");
                            }
                        }
                    }
                }
            }
            MessageBody::Blocks(blocks)
        }
    }
}

/// Split a `data:<media>;base64,<payload>` URI. Anything else is rejected.
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    let media_type = header.trim_end_matches(";base64");
    Some((media_type.to_string(), data.to_string()))
}

// ---------------------------------------------------------------------------
// Response cross-conversion
// ---------------------------------------------------------------------------

/// Map an OpenAI finish reason to the Anthropic stop reason.
pub fn finish_reason_to_stop_reason(reason: &str) -> StopReason {
    match reason {
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

/// Reshape a collected OpenAI response into the Anthropic dialect.
pub fn response_to_anthropic(response: &ChatCompletion) -> MessagesResponse {
    let choice = response.choices.first();
    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(choice) = choice {
        if let Some(reasoning) = &choice.message.reasoning_content {
            if !reasoning.is_empty() {
                content.push(ResponseContentBlock::Thinking {
                    thinking: reasoning.clone(),
                });
            }
        }
        if let Some(text) = &choice.message.content {
            if !text.is_empty() {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
        }
        for tc in choice.message.tool_calls.as_deref().unwrap_or_default() {
            content.push(ResponseContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or_else(|_| Value::Object(Default::default())),
            });
        }
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(finish_reason_to_stop_reason);

    MessagesResponse {
        id: response.id.clone(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: response.model.clone(),
        stop_reason,
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
        },
    }
}

/// Rebuild OpenAI tool calls from Anthropic tool_use blocks.
pub fn tool_use_to_tool_call(id: &str, name: &str, input: &Value, index: u32) -> ToolCall {
    ToolCall {
        index: Some(index),
        id: id.to_string(),
        r#type: "function".to_string(),
        function: crate::models::openai::FunctionCall {
            name: name.to_string(),
            arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
