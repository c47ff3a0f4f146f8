//! Gemini dialect to canonical request.
//!
//! Gemini has no tool-use ids; calls and responses pair up by function
//! name, so the function name doubles as the canonical tool_use id.

use serde_json::Value;

use crate::convert::messages::canonicalize;
use crate::convert::tools::{append_tool_docs, extract_long_descriptions, normalize_tools};
use crate::error::GatewayError;
use crate::models::canonical::{
    CanonicalMessage, CanonicalRequest, ContentBlock, MessageBody, Role,
};
use crate::models::gemini::{GeminiContent, GeminiPart, GenerateContentRequest};

/// Normalize a generateContent request into the canonical shape.
///
/// `model` comes from the URL path, `stream` from which endpoint was hit.
pub fn to_canonical(
    model: &str,
    request: &GenerateContentRequest,
    stream: bool,
    tool_description_max_length: usize,
) -> Result<CanonicalRequest, GatewayError> {
    if request.contents.is_empty() {
        return Err(GatewayError::Validation("contents must not be empty".into()));
    }

    let raw: Vec<CanonicalMessage> = request
        .contents
        .iter()
        .map(convert_content)
        .collect::<Result<_, _>>()?;
    let conversation = canonicalize(raw);

    let mut system = request
        .system_instruction
        .as_ref()
        .map(content_text)
        .unwrap_or_default();
    if !conversation.system.is_empty() {
        system = if system.is_empty() {
            conversation.system
        } else {
            format!("{system}\n{}", conversation.system)
        };
    }

    // Gemini wraps declarations: [{functionDeclarations: [...]}]. Unwrap
    // before normalization; each declaration is the {name, description,
    // parameters} shape.
    let declarations: Vec<Value> = request
        .tools
        .as_deref()
        .unwrap_or_default()
        .iter()
        .flat_map(|t| {
            t.get("functionDeclarations")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_else(|| vec![t.clone()])
        })
        .collect();
    let normalized = normalize_tools(&declarations);
    let (tools, docs) = extract_long_descriptions(normalized, tool_description_max_length);
    if let Some(docs) = docs {
        system = append_tool_docs(&system, &docs);
    }

    let generation = request.generation_config.clone().unwrap_or_default();

    Ok(CanonicalRequest {
        model: model.to_string(),
        system,
        messages: conversation.messages,
        tools,
        tool_choice: request.tool_config.clone(),
        stream,
        max_tokens: generation.max_output_tokens,
        temperature: generation.temperature,
        top_p: generation.top_p,
        stop: generation.stop_sequences,
    })
}

fn convert_content(content: &GeminiContent) -> Result<CanonicalMessage, GatewayError> {
    let role = match content.role.as_deref() {
        Some("model") => Role::Assistant,
        Some("user") | None => Role::User,
        Some(other) => {
            return Err(GatewayError::Validation(format!(
                "unsupported content role: {other}"
            )));
        }
    };

    let mut blocks = Vec::new();
    let mut has_function_response = false;
    for part in &content.parts {
        match part {
            GeminiPart::Text(text) => {
                if !text.is_empty() {
                    blocks.push(ContentBlock::Text { text: text.clone() });
                }
            }
            GeminiPart::InlineData(data) => blocks.push(ContentBlock::Image {
                media_type: data.mime_type.clone(),
                data: data.data.clone(),
            }),
            GeminiPart::FunctionCall(call) => blocks.push(ContentBlock::ToolUse {
                id: call.name.clone(),
                name: call.name.clone(),
                input: call.args.clone(),
            }),
            GeminiPart::FunctionResponse(resp) => {
                has_function_response = true;
                blocks.push(ContentBlock::ToolResult {
                    tool_use_id: resp.name.clone(),
                    content: function_response_text(&resp.response),
                    is_error: false,
                });
            }
        }
    }

    // Function responses arrive with role "user" in the Gemini dialect;
    // mark them tool-role so canonicalization groups them.
    let role = if has_function_response && role == Role::User {
        Role::Tool
    } else {
        role
    };

    Ok(CanonicalMessage {
        role,
        content: MessageBody::Blocks(blocks),
    })
}

fn content_text(content: &GeminiContent) -> String {
    content
        .parts
        .iter()
        .filter_map(|p| match p {
            GeminiPart::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Unwrap `{result: "..."}` responses; serialize anything else.
fn function_response_text(response: &Value) -> String {
    if let Some(result) = response.get("result").and_then(Value::as_str) {
        return result.to_string();
    }
    match response {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map an OpenAI finish reason onto Gemini's enum.
pub fn finish_reason_to_gemini(reason: &str) -> &'static str {
    match reason {
        "length" => "MAX_TOKENS",
        "content_filter" => "SAFETY",
        _ => "STOP",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
