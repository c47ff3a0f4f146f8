//! Canonical request model.
//!
//! Every client dialect normalizes into this shape before the upstream
//! payload is built. After canonicalization no two adjacent messages share
//! a role and no `tool`-role message remains (tool results are promoted
//! into user messages).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role in the canonical model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A typed content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        /// Base64 payload.
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Thinking {
        thinking: String,
    },
}

/// Message content: a plain string or an ordered block sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageBody {
    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// View as a block list, wrapping plain text.
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            Self::Text(s) if s.is_empty() => Vec::new(),
            Self::Text(s) => vec![ContentBlock::Text { text: s }],
            Self::Blocks(blocks) => blocks,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

/// One message in the canonical conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: Role,
    pub content: MessageBody,
}

impl CanonicalMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageBody::Text(text.into()),
        }
    }
}

/// A tool after normalization (spec shape: name / description / JSON schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
}

/// The canonical request all dialects produce.
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    /// External model id as the client sent it.
    pub model: String,
    /// Joined system prompt (empty when none).
    pub system: String,
    /// Canonicalized conversation: alternating roles, no system/tool roles.
    pub messages: Vec<CanonicalMessage>,
    pub tools: Vec<NormalizedTool>,
    pub tool_choice: Option<Value>,
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
}

impl CanonicalRequest {
    /// A minimal request around pre-canonicalized messages, used by tests.
    #[cfg(test)]
    pub fn for_test(model: &str, messages: Vec<CanonicalMessage>) -> Self {
        Self {
            model: model.to_string(),
            system: String::new(),
            messages,
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_text_joins_text_blocks() {
        let body = MessageBody::Blocks(vec![
            ContentBlock::Text { text: "a".into() },
            ContentBlock::Image {
                media_type: "image/png".into(),
                data: "AAAA".into(),
            },
            ContentBlock::Text { text: "b".into() },
        ]);
        assert_eq!(body.text(), "ab");
    }

    #[test]
    fn test_into_blocks_wraps_text() {
        let blocks = MessageBody::Text("hi".into()).into_blocks();
        assert_eq!(blocks, vec![ContentBlock::Text { text: "hi".into() }]);
        assert!(MessageBody::Text(String::new()).into_blocks().is_empty());
    }
}
