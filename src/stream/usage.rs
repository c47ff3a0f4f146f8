//! Token accounting.
//!
//! When the upstream reports a `contextUsagePercentage`, total tokens are
//! derived from it against the configured context window. Otherwise the
//! prompt is estimated locally with tiktoken's `cl100k_base` encoding plus
//! a correction factor, degrading to a chars/4 heuristic when the encoder
//! is unavailable.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;
use tracing::warn;

use crate::models::canonical::{CanonicalRequest, ContentBlock, MessageBody};
use crate::stream::StreamOutcome;

/// Correction applied to tiktoken counts: the upstream tokenizer is close
/// to but not exactly cl100k.
const ESTIMATE_CORRECTION: f64 = 1.15;

/// Final usage numbers for one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageReport {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub credits_used: Option<f64>,
}

fn encoder() -> Option<&'static CoreBPE> {
    static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    ENCODER
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!(error = %e, "tiktoken unavailable, using chars/4 estimate");
                None
            }
        })
        .as_ref()
}

/// Token count of a text, by encoder or chars/4 fallback.
pub fn count_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u32,
        None => text.len().div_ceil(4) as u32,
    }
}

/// Estimate prompt tokens for a canonical request: system prompt, message
/// text, tool uses/results, and the serialized tool schemas, corrected.
pub fn estimate_prompt_tokens(request: &CanonicalRequest) -> u32 {
    let mut count = count_tokens(&request.system);

    for msg in &request.messages {
        match &msg.content {
            MessageBody::Text(text) => count += count_tokens(text),
            MessageBody::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => count += count_tokens(text),
                        ContentBlock::ToolResult { content, .. } => {
                            count += count_tokens(content);
                        }
                        ContentBlock::ToolUse { name, input, .. } => {
                            count += count_tokens(name);
                            count += count_tokens(&input.to_string());
                        }
                        ContentBlock::Thinking { thinking } => count += count_tokens(thinking),
                        ContentBlock::Image { .. } => {}
                    }
                }
            }
        }
    }

    if !request.tools.is_empty() {
        if let Ok(serialized) = serde_json::to_string(&request.tools) {
            count += count_tokens(&serialized);
        }
    }

    (count as f64 * ESTIMATE_CORRECTION).round() as u32
}

/// Compute the usage report for a finished stream.
///
/// `contextUsagePercentage` is a value in [0, 100]; zero means the
/// upstream reported nothing useful and the local estimate stands in.
pub fn compute(
    outcome: &StreamOutcome,
    prompt_estimate: u32,
    max_input_tokens: u32,
) -> UsageReport {
    let completion_tokens = count_tokens(&outcome.text)
        + outcome.thinking.as_deref().map_or(0, count_tokens);

    match outcome.context_usage_pct {
        Some(pct) if pct > 0.0 => {
            let total_tokens = (pct / 100.0 * max_input_tokens as f64).floor() as u32;
            UsageReport {
                prompt_tokens: total_tokens.saturating_sub(completion_tokens),
                completion_tokens,
                total_tokens,
                credits_used: outcome.credits_used,
            }
        }
        _ => UsageReport {
            prompt_tokens: prompt_estimate,
            completion_tokens,
            total_tokens: prompt_estimate + completion_tokens,
            credits_used: outcome.credits_used,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
