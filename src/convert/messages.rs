//! Message sequence canonicalization.
//!
//! Three passes over the raw message list:
//!   1. system messages are split off and newline-joined,
//!   2. `tool`-role messages are promoted into synthetic user messages of
//!      tool_result blocks (consecutive runs grouped into one),
//!   3. adjacent messages of the same role merge.
//!
//! Afterwards no two adjacent messages share a role and no `tool` role
//! remains.

use crate::models::canonical::{CanonicalMessage, ContentBlock, MessageBody, Role};

/// Result of canonicalization: separated system prompt + merged messages.
#[derive(Debug, Clone)]
pub struct CanonicalConversation {
    pub system: String,
    pub messages: Vec<CanonicalMessage>,
}

/// Run the full canonicalization over raw messages.
pub fn canonicalize(messages: Vec<CanonicalMessage>) -> CanonicalConversation {
    let (system, rest) = split_system(messages);
    let promoted = promote_tool_messages(rest);
    let merged = merge_adjacent(promoted);
    CanonicalConversation {
        system,
        messages: merged,
    }
}

/// Pull out system messages, joining their text with newlines.
fn split_system(messages: Vec<CanonicalMessage>) -> (String, Vec<CanonicalMessage>) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut rest = Vec::with_capacity(messages.len());

    for msg in messages {
        if msg.role == Role::System {
            let text = msg.content.text();
            if !text.is_empty() {
                system_parts.push(text);
            }
        } else {
            rest.push(msg);
        }
    }
    (system_parts.join("\n"), rest)
}

/// Promote `tool`-role messages to synthetic user messages. Consecutive
/// tool messages collapse into a single user message carrying all of their
/// tool_result blocks.
fn promote_tool_messages(messages: Vec<CanonicalMessage>) -> Vec<CanonicalMessage> {
    let mut out: Vec<CanonicalMessage> = Vec::with_capacity(messages.len());
    let mut pending_results: Vec<ContentBlock> = Vec::new();

    let flush = |pending: &mut Vec<ContentBlock>, out: &mut Vec<CanonicalMessage>| {
        if !pending.is_empty() {
            out.push(CanonicalMessage {
                role: Role::User,
                content: MessageBody::Blocks(std::mem::take(pending)),
            });
        }
    };

    for msg in messages {
        if msg.role == Role::Tool {
            pending_results.extend(msg.content.into_blocks());
        } else {
            flush(&mut pending_results, &mut out);
            out.push(msg);
        }
    }
    flush(&mut pending_results, &mut out);
    out
}

/// Merge adjacent messages of the same role.
///
/// string+string joins with a newline; array+array concatenates; mixed
/// content becomes an array. Assistant tool_use blocks ride along in the
/// block list, so merged assistant turns keep all their calls.
fn merge_adjacent(messages: Vec<CanonicalMessage>) -> Vec<CanonicalMessage> {
    let mut out: Vec<CanonicalMessage> = Vec::with_capacity(messages.len());

    for msg in messages {
        let Some(last) = out.last_mut() else {
            out.push(msg);
            continue;
        };
        if last.role != msg.role {
            out.push(msg);
            continue;
        }

        last.content = match (last.content.clone(), msg.content) {
            (MessageBody::Text(a), MessageBody::Text(b)) => {
                if a.is_empty() {
                    MessageBody::Text(b)
                } else if b.is_empty() {
                    MessageBody::Text(a)
                } else {
                    MessageBody::Text(format!("{a}\n{b}"))
                }
            }
            (MessageBody::Blocks(mut a), MessageBody::Blocks(b)) => {
                a.extend(b);
                MessageBody::Blocks(a)
            }
            (a, b) => {
                let mut blocks = a.into_blocks();
                blocks.extend(b.into_blocks());
                MessageBody::Blocks(blocks)
            }
        };
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
