//! Anthropic dialect to canonical request, and response cross-conversion.

use serde_json::Value;

use crate::convert::messages::canonicalize;
use crate::convert::tools::{append_tool_docs, extract_long_descriptions, normalize_tools};
use crate::error::GatewayError;
use crate::models::anthropic::{
    AnthropicBlock, AnthropicContent, AnthropicMessage, MessagesRequest, MessagesResponse,
    ResponseContentBlock, StopReason,
};
use crate::models::canonical::{
    CanonicalMessage, CanonicalRequest, ContentBlock, MessageBody, Role,
};
use crate::models::openai::{
    ChatCompletion, Choice, ResponseMessage, Usage,
};

/// Normalize an Anthropic Messages request into the canonical shape.
pub fn to_canonical(
    request: &MessagesRequest,
    tool_description_max_length: usize,
) -> Result<CanonicalRequest, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::Validation("messages must not be empty".into()));
    }

    let raw: Vec<CanonicalMessage> = request
        .messages
        .iter()
        .map(convert_message)
        .collect::<Result<_, _>>()?;
    let conversation = canonicalize(raw);

    // The dialect carries the system prompt out-of-band; a system-role
    // message cannot appear in `messages`, so conversation.system is empty.
    let mut system = request
        .system
        .as_ref()
        .map(|s| s.text())
        .unwrap_or_default();
    if !conversation.system.is_empty() {
        system = if system.is_empty() {
            conversation.system
        } else {
            format!("{system}\n{}", conversation.system)
        };
    }

    let normalized = normalize_tools(request.tools.as_deref().unwrap_or_default());
    let (tools, docs) = extract_long_descriptions(normalized, tool_description_max_length);
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
        stop: request.stop_sequences.clone(),
    })
}

fn convert_message(msg: &AnthropicMessage) -> Result<CanonicalMessage, GatewayError> {
    let role = match msg.role.as_str() {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        other => {
            return Err(GatewayError::Validation(format!(
                "unsupported message role: {other}"
            )));
        }
    };

    let content = match &msg.content {
        AnthropicContent::Text(t) => MessageBody::Text(t.clone()),
        AnthropicContent::Blocks(blocks) => {
            MessageBody::Blocks(blocks.iter().map(convert_block).collect())
        }
    };
    Ok(CanonicalMessage { role, content })
}

fn convert_block(block: &AnthropicBlock) -> ContentBlock {
    match block {
        AnthropicBlock::Text { text } => ContentBlock::Text { text: text.clone() },
        AnthropicBlock::Image { source } => ContentBlock::Image {
            media_type: source.media_type.clone(),
            data: source.data.clone(),
        },
        AnthropicBlock::ToolUse { id, name, input } => ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        AnthropicBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.as_ref().map(|c| c.text()).unwrap_or_default(),
            is_error: *is_error,
        },
        AnthropicBlock::Thinking { thinking } => ContentBlock::Thinking {
            thinking: thinking.clone(),
        },
    }
}

// ---------------------------------------------------------------------------
// Response cross-conversion
// ---------------------------------------------------------------------------

/// Map an Anthropic stop reason to the OpenAI finish reason.
pub fn stop_reason_to_finish_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence => "stop",
        StopReason::ToolUse => "tool_calls",
        StopReason::MaxTokens => "length",
    }
}

/// Reshape a collected Anthropic response into the OpenAI dialect.
pub fn response_to_openai(response: &MessagesResponse, created: i64) -> ChatCompletion {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in &response.content {
        match block {
            ResponseContentBlock::Text { text: t } => text.push_str(t),
            ResponseContentBlock::Thinking { thinking } => reasoning.push_str(thinking),
            ResponseContentBlock::ToolUse { id, name, input } => {
                let index = tool_calls.len() as u32;
                tool_calls.push(crate::convert::openai::tool_use_to_tool_call(
                    id, name, input, index,
                ));
            }
        }
    }

    let finish_reason = response
        .stop_reason
        .map(stop_reason_to_finish_reason)
        .map(str::to_string);

    ChatCompletion {
        id: response.id.clone(),
        object: "chat.completion".to_string(),
        created,
        model: response.model.clone(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() { None } else { Some(text) },
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
        usage: Usage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
            credits_used: None,
        },
    }
}

/// Arguments-object equality, used to compare tool calls across dialects.
pub fn arguments_equal(a: &str, b: &str) -> bool {
    let pa: Option<Value> = serde_json::from_str(a).ok();
    let pb: Option<Value> = serde_json::from_str(b).ok();
    match (pa, pb) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
