//! Translation pipeline: upstream events to per-dialect SSE frames.
//!
//! The shared [`EventReader`] drives the byte stream through the parser
//! with first-token and inter-chunk timeout supervision; the per-dialect
//! modules frame its output. Frames are modeled as [`SseMsg`] so tests can
//! assert on them directly, with the HTTP layer adapting to wire events at
//! the edge.

pub mod anthropic;
pub mod collect;
pub mod gemini;
pub mod openai;
pub mod usage;

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::GatewayError;
use crate::models::kiro::{ToolCallRecord, UpstreamEvent};
use crate::upstream::parser::{
    EventStreamParser, ToolCallAssembler, dedup_tool_calls, recover_bracket_tool_calls,
};

/// Fixed spacing between whole-attempt retries on first-token timeout.
const FIRST_TOKEN_RETRY_SPACING: Duration = Duration::from_secs(1);

/// Consecutive inter-chunk timeouts tolerated before the stream is
/// considered finished. Models emitting one large block can stall for a
/// while between chunks.
const MAX_CONSECUTIVE_READ_TIMEOUTS: u32 = 3;

/// Tags the upstream model wraps its reasoning in. Decoded out of the
/// content stream and surfaced as thinking, never shown as text.
const THINKING_OPEN_TAG: &str = "<antThinking>";
const THINKING_CLOSE_TAG: &str = "</antThinking>";

/// One decoded unit of assistant output.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPiece {
    Text(String),
    Thinking(String),
}

/// One SSE frame, before wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum SseMsg {
    Event {
        /// Named event (`event: <name>` line); Anthropic framing only.
        event: Option<String>,
        data: String,
    },
    /// The `data: [DONE]` terminator (OpenAI framing only).
    Done,
}

impl SseMsg {
    pub fn data(data: impl Into<String>) -> Self {
        Self::Event {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Event {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// The JSON payload, when this is a data frame.
    pub fn json(&self) -> Option<Value> {
        match self {
            Self::Event { data, .. } => serde_json::from_str(data).ok(),
            Self::Done => None,
        }
    }
}

/// Per-request context shared by the framers.
#[derive(Debug, Clone)]
pub struct StreamContext {
    /// External model id, echoed back to the client.
    pub model: String,
    pub response_id: String,
    pub created: i64,
    /// Locally estimated prompt tokens, used when the upstream reports no
    /// context usage.
    pub prompt_estimate: u32,
    pub max_input_tokens: u32,
}

impl StreamContext {
    pub fn new(model: &str, prompt_estimate: u32, max_input_tokens: u32) -> Self {
        Self {
            model: model.to_string(),
            response_id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            prompt_estimate,
            max_input_tokens,
        }
    }
}

/// Everything accumulated over one upstream stream.
#[derive(Debug, Clone, Default)]
pub struct StreamOutcome {
    pub text: String,
    /// Reasoning decoded from thinking tags, when the model emitted any.
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub credits_used: Option<f64>,
    pub context_usage_pct: Option<f64>,
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Reads upstream bytes, yielding deduplicated content strings while
/// accumulating tool calls and usage for finalization.
pub struct EventReader {
    stream: Option<ByteStream>,
    parser: EventStreamParser,
    assembler: ToolCallAssembler,
    pending: VecDeque<UpstreamEvent>,
    read_timeout: Duration,
    text: String,
    thinking: String,
    in_thinking: bool,
    last_content: Option<String>,
    credits_used: Option<f64>,
    context_usage_pct: Option<f64>,
}

impl std::fmt::Debug for EventReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReader")
            .field("parser", &self.parser)
            .field("assembler", &self.assembler)
            .field("pending", &self.pending)
            .field("read_timeout", &self.read_timeout)
            .field("text", &self.text)
            .field("thinking", &self.thinking)
            .field("in_thinking", &self.in_thinking)
            .field("last_content", &self.last_content)
            .field("credits_used", &self.credits_used)
            .field("context_usage_pct", &self.context_usage_pct)
            .finish()
    }
}

impl EventReader {
    fn new(first_chunk: Bytes, stream: ByteStream, read_timeout: Duration) -> Self {
        let mut reader = Self::empty(read_timeout);
        reader.stream = Some(stream);
        reader.pending = reader.parser.feed(&first_chunk).into();
        reader
    }

    /// A reader over a stream that ended before producing any bytes.
    fn empty(read_timeout: Duration) -> Self {
        Self {
            stream: None,
            parser: EventStreamParser::new(),
            assembler: ToolCallAssembler::new(),
            pending: VecDeque::new(),
            read_timeout,
            text: String::new(),
            thinking: String::new(),
            in_thinking: false,
            last_content: None,
            credits_used: None,
            context_usage_pct: None,
        }
    }

    /// A reader over fixed bytes (tests and collected bodies).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut reader = Self::empty(Duration::from_secs(1));
        reader.pending = reader.parser.feed(bytes).into();
        reader
    }

    /// Next decoded content piece, or `None` when the stream is done.
    /// Tool, usage and context events are absorbed into the reader's
    /// state; identical consecutive content events are dropped, follow-up
    /// prompts ignored, and thinking tags are decoded out of the text.
    pub async fn next_content(&mut self) -> Result<Option<ContentPiece>, GatewayError> {
        let mut consecutive_timeouts = 0u32;
        loop {
            while let Some(event) = self.pending.pop_front() {
                match event {
                    UpstreamEvent::Content(text) => {
                        if self.last_content.as_deref() == Some(text.as_str()) {
                            debug!("Dropping duplicated content event");
                            continue;
                        }
                        self.last_content = Some(text.clone());
                        match self.decode_content(text) {
                            Some(piece) => return Ok(Some(piece)),
                            None => continue,
                        }
                    }
                    UpstreamEvent::ToolStart {
                        name,
                        tool_use_id,
                        input,
                    } => self.assembler.start(name, tool_use_id, input),
                    UpstreamEvent::ToolInput(input) => self.assembler.push_input(input),
                    UpstreamEvent::ToolStop => self.assembler.stop(),
                    UpstreamEvent::FollowupPrompt => {}
                    UpstreamEvent::Usage(v) => self.credits_used = Some(v),
                    UpstreamEvent::ContextUsage(pct) => self.context_usage_pct = Some(pct),
                }
            }

            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };
            match tokio::time::timeout(self.read_timeout, stream.next()).await {
                Err(_) => {
                    consecutive_timeouts += 1;
                    warn!(
                        consecutive_timeouts,
                        "Stream read timed out between chunks"
                    );
                    if consecutive_timeouts > MAX_CONSECUTIVE_READ_TIMEOUTS {
                        self.stream = None;
                    }
                }
                Ok(None) => self.stream = None,
                Ok(Some(Err(e))) => {
                    self.stream = None;
                    return Err(GatewayError::Upstream {
                        status: 502,
                        message: format!("stream read error: {e}"),
                    });
                }
                Ok(Some(Ok(bytes))) => {
                    consecutive_timeouts = 0;
                    self.pending.extend(self.parser.feed(&bytes));
                }
            }
        }
    }

    /// Route a content event to text or thinking.
    ///
    /// Content carrying a thinking tag, or arriving while a thinking span
    /// is open, has its tags stripped and accumulates as reasoning. Tag-only
    /// events decode to nothing.
    fn decode_content(&mut self, text: String) -> Option<ContentPiece> {
        let has_tag = text.contains(THINKING_OPEN_TAG) || text.contains(THINKING_CLOSE_TAG);
        if !has_tag && !self.in_thinking {
            self.text.push_str(&text);
            return Some(ContentPiece::Text(text));
        }

        self.in_thinking = match (text.rfind(THINKING_OPEN_TAG), text.rfind(THINKING_CLOSE_TAG)) {
            (Some(open), Some(close)) => open > close,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => self.in_thinking,
        };

        let clean = text
            .replace(THINKING_OPEN_TAG, "")
            .replace(THINKING_CLOSE_TAG, "");
        if clean.is_empty() {
            return None;
        }
        self.thinking.push_str(&clean);
        Some(ContentPiece::Thinking(clean))
    }

    /// Finish the stream: finalize open tool calls, recover bracket-form
    /// calls from the accumulated text, deduplicate.
    pub fn finalize(self) -> StreamOutcome {
        let mut calls = self.assembler.finish();
        calls.extend(recover_bracket_tool_calls(&self.text));
        StreamOutcome {
            tool_calls: dedup_tool_calls(calls),
            text: self.text,
            thinking: if self.thinking.is_empty() {
                None
            } else {
                Some(self.thinking)
            },
            credits_used: self.credits_used,
            context_usage_pct: self.context_usage_pct,
        }
    }
}

/// Open the upstream stream, retrying the entire HTTP attempt when no byte
/// arrives inside the first-token window.
pub async fn start_with_retry<F, Fut>(
    make_request: F,
    cfg: &Config,
    model: &str,
) -> Result<EventReader, GatewayError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, GatewayError>>,
{
    let first_timeout = cfg.scaled_first_token_timeout(model);
    let read_timeout = cfg.scaled_stream_read_timeout(model);

    for attempt in 0..cfg.first_token_max_retries.max(1) {
        if attempt > 0 {
            tokio::time::sleep(FIRST_TOKEN_RETRY_SPACING).await;
        }

        let response = match make_request().await {
            Ok(response) => response,
            Err(GatewayError::FirstTokenTimeout) => {
                warn!(attempt, "First-token timeout before response, retrying attempt");
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut stream: ByteStream = Box::pin(response.bytes_stream());
        match tokio::time::timeout(first_timeout, stream.next()).await {
            Err(_) => {
                warn!(attempt, "No data within first-token window, retrying attempt");
                continue;
            }
            Ok(None) => return Ok(EventReader::empty(read_timeout)),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(first))) => return Ok(EventReader::new(first, stream, read_timeout)),
        }
    }

    Err(GatewayError::Timeout(format!(
        "no upstream data within the first-token window after {} attempts",
        cfg.first_token_max_retries
    )))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
