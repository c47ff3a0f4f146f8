//! Upstream event stream parser.
//!
//! The upstream returns concatenated JSON event objects mixed with binary
//! framing bytes (an AWS event stream, not text SSE). The parser is
//! pattern-driven: it searches the buffer for one of the recognized JSON
//! object prefixes and extracts the balanced object with a string-aware
//! depth counter. Incomplete trailing objects stay buffered until the next
//! feed.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::models::kiro::{ToolCallRecord, UpstreamEvent};
use crate::upstream::json_repair;

/// Recognized event object prefixes.
const CONTENT_PATTERN: &str = r#"{"content":"#;
const TOOL_NAME_PATTERN: &str = r#"{"name":"#;
const TOOL_INPUT_PATTERN: &str = r#"{"input":"#;
const STOP_PATTERN: &str = r#"{"stop":"#;
const FOLLOWUP_PATTERN: &str = r#"{"followupPrompt":"#;
const USAGE_PATTERN: &str = r#"{"usage":"#;
const CONTEXT_USAGE_PATTERN: &str = r#"{"contextUsagePercentage":"#;

const EVENT_PATTERNS: &[&str] = &[
    CONTENT_PATTERN,
    TOOL_NAME_PATTERN,
    TOOL_INPUT_PATTERN,
    STOP_PATTERN,
    FOLLOWUP_PATTERN,
    USAGE_PATTERN,
    CONTEXT_USAGE_PATTERN,
];

/// How close to a bracket-form `args:` marker the JSON object must start.
const BRACKET_ARGS_LOOKAHEAD: usize = 10;

/// Incremental extractor of typed events from the upstream byte stream.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    buffer: String,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and extract every complete event object.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<UpstreamEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        loop {
            let Some((start, pattern)) = earliest_pattern(&self.buffer) else {
                self.trim_unmatched_tail();
                break;
            };

            match find_object_end(&self.buffer, start) {
                Some(end) => {
                    let raw: String = self.buffer[start..=end].to_string();
                    self.buffer.drain(..=end);
                    match parse_event(pattern, &raw) {
                        Some(event) => events.push(event),
                        None => debug!(
                            raw = &raw[..raw.len().min(120)],
                            "Discarding unparseable event object"
                        ),
                    }
                }
                None => {
                    // Incomplete object: drop leading junk, wait for more bytes.
                    self.buffer.drain(..start);
                    break;
                }
            }
        }
        events
    }

    /// Bytes currently held back waiting for completion.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Without any pattern in the buffer, only a suffix that could still
    /// grow into a pattern is worth keeping.
    fn trim_unmatched_tail(&mut self) {
        let max_keep = EVENT_PATTERNS
            .iter()
            .map(|p| p.len() - 1)
            .max()
            .unwrap_or(0)
            .min(self.buffer.len());

        let mut keep = 0;
        for k in (1..=max_keep).rev() {
            if !self.buffer.is_char_boundary(self.buffer.len() - k) {
                continue;
            }
            let suffix = &self.buffer[self.buffer.len() - k..];
            if EVENT_PATTERNS.iter().any(|p| p.starts_with(suffix)) {
                keep = k;
                break;
            }
        }
        self.buffer.drain(..self.buffer.len() - keep);
    }
}

/// Earliest occurrence of any recognized pattern.
fn earliest_pattern(buffer: &str) -> Option<(usize, &'static str)> {
    EVENT_PATTERNS
        .iter()
        .filter_map(|p| buffer.find(p).map(|i| (i, *p)))
        .min_by_key(|(i, _)| *i)
}

/// Byte offset of the `}` closing the object that opens at `start`.
///
/// String-aware and escape-aware: braces inside string literals do not
/// count, and `\"` does not terminate a string.
fn find_object_end(buffer: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in buffer[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Map a balanced object to its typed event, by the pattern that matched it.
fn parse_event(pattern: &str, raw: &str) -> Option<UpstreamEvent> {
    let value = json_repair::parse_tolerant(raw)?;
    let obj = value.as_object()?;

    match pattern {
        CONTENT_PATTERN => obj
            .get("content")
            .and_then(Value::as_str)
            .map(|s| UpstreamEvent::Content(s.to_string())),
        TOOL_NAME_PATTERN => {
            let name = obj.get("name")?.as_str()?.to_string();
            let tool_use_id = obj
                .get("toolUseId")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let input = obj
                .get("input")
                .cloned()
                .unwrap_or(Value::String(String::new()));
            Some(UpstreamEvent::ToolStart {
                name,
                tool_use_id,
                input,
            })
        }
        TOOL_INPUT_PATTERN => obj.get("input").cloned().map(UpstreamEvent::ToolInput),
        STOP_PATTERN => Some(UpstreamEvent::ToolStop),
        FOLLOWUP_PATTERN => Some(UpstreamEvent::FollowupPrompt),
        USAGE_PATTERN => Some(UpstreamEvent::Usage(
            obj.get("usage").and_then(Value::as_f64).unwrap_or(0.0),
        )),
        CONTEXT_USAGE_PATTERN => obj
            .get("contextUsagePercentage")
            .and_then(Value::as_f64)
            .map(UpstreamEvent::ContextUsage),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tool call reassembly
// ---------------------------------------------------------------------------

/// Reassembles tool invocations whose arguments arrive in fragments.
///
/// A `tool_start` opens a provisional call; `tool_input` events append
/// string fragments or deep-merge object payloads; the next `tool_start`
/// or a `tool_stop` finalizes it.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    current: Option<ProvisionalCall>,
    completed: Vec<ToolCallRecord>,
}

#[derive(Debug)]
struct ProvisionalCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new provisional call, finalizing any open one.
    pub fn start(&mut self, name: String, tool_use_id: String, input: Value) {
        self.finalize_current();

        let id = if tool_use_id.is_empty() {
            format!("toolu_{}", Uuid::new_v4().simple())
        } else {
            tool_use_id
        };
        let arguments = match input {
            Value::String(s) => s,
            Value::Object(_) => input.to_string(),
            _ => String::new(),
        };
        self.current = Some(ProvisionalCall {
            id,
            name,
            arguments,
        });
    }

    /// Attach an input payload to the open provisional call.
    pub fn push_input(&mut self, input: Value) {
        let Some(current) = &mut self.current else {
            debug!("Tool input with no open tool call, dropping");
            return;
        };
        match input {
            Value::String(s) => current.arguments.push_str(&s),
            Value::Object(_) => {
                let mut base = json_repair::parse_object_or_empty(&current.arguments);
                deep_merge(&mut base, input);
                current.arguments = base.to_string();
            }
            other => debug!(payload = %other, "Ignoring non-mergeable tool input"),
        }
    }

    /// Explicit stop: finalize the open call.
    pub fn stop(&mut self) {
        self.finalize_current();
    }

    /// Finalize any open call and return everything collected so far.
    pub fn finish(mut self) -> Vec<ToolCallRecord> {
        self.finalize_current();
        self.completed
    }

    fn finalize_current(&mut self) {
        let Some(call) = self.current.take() else {
            return;
        };
        let arguments = match json_repair::parse_tolerant(&call.arguments) {
            Some(v) if v.is_object() => v.to_string(),
            _ => {
                if !call.arguments.is_empty() {
                    debug!(
                        tool = call.name.as_str(),
                        "Tool arguments unparseable, substituting empty object"
                    );
                }
                "{}".to_string()
            }
        };
        self.completed.push(ToolCallRecord {
            id: call.id,
            name: call.name,
            arguments,
        });
    }
}

/// Recursively merge `patch` into `base`. Objects merge key-wise; any other
/// value overwrites.
fn deep_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                match base_map.get_mut(&k) {
                    Some(slot) => deep_merge(slot, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

// ---------------------------------------------------------------------------
// Bracket-form recovery
// ---------------------------------------------------------------------------

/// Recover tool calls embedded in assistant text as
/// `[Called <name> with args: {...}]`.
///
/// The object must start within ten characters of the colon and its
/// matching brace must be followed by `]`.
pub fn recover_bracket_tool_calls(text: &str) -> Vec<ToolCallRecord> {
    let marker = regex_lite::Regex::new(r"\[Called\s+([A-Za-z0-9_.\-]+)\s+with\s+args:")
        .expect("bracket marker regex");

    let mut calls = Vec::new();
    for caps in marker.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let name = caps.get(1).unwrap().as_str().to_string();
        let after = whole.end();

        let window_end = (after + BRACKET_ARGS_LOOKAHEAD).min(text.len());
        let Some(brace_offset) = text[after..window_end].find('{') else {
            continue;
        };
        let obj_start = after + brace_offset;
        let Some(obj_end) = find_object_end(text, obj_start) else {
            continue;
        };
        let next = text[obj_end + 1..].trim_start().chars().next();
        if next != Some(']') {
            continue;
        }

        let raw = &text[obj_start..=obj_end];
        let arguments = match json_repair::parse_tolerant(raw) {
            Some(v) if v.is_object() => v.to_string(),
            _ => continue,
        };
        calls.push(ToolCallRecord {
            id: format!("toolu_{}", Uuid::new_v4().simple()),
            name,
            arguments,
        });
    }
    calls
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

/// Deduplicate tool calls: per id keep the longest arguments (`"{}"` counts
/// as the minimum), then drop repeats of the same `(name, arguments)` pair.
pub fn dedup_tool_calls(calls: Vec<ToolCallRecord>) -> Vec<ToolCallRecord> {
    use std::collections::HashMap;

    let mut by_id: Vec<ToolCallRecord> = Vec::new();
    let mut index_of: HashMap<String, usize> = HashMap::new();
    for call in calls {
        match index_of.get(&call.id) {
            Some(&i) => {
                if call.arguments.len() > by_id[i].arguments.len() {
                    by_id[i] = call;
                }
            }
            None => {
                index_of.insert(call.id.clone(), by_id.len());
                by_id.push(call);
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    by_id
        .into_iter()
        .filter(|c| seen.insert((c.name.clone(), c.arguments.clone())))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_single_content_event() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(br#"{"content":"Hello"}"#);
        assert_eq!(events, vec![UpstreamEvent::Content("Hello".into())]);
        assert!(parser.buffered().is_empty());
    }

    #[test]
    fn test_parse_concatenated_events() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(
            br#"{"content":"Hello"}{"content":" there"}{"usage":2}{"contextUsagePercentage":0.5}"#,
        );
        assert_eq!(
            events,
            vec![
                UpstreamEvent::Content("Hello".into()),
                UpstreamEvent::Content(" there".into()),
                UpstreamEvent::Usage(2.0),
                UpstreamEvent::ContextUsage(0.5),
            ]
        );
    }

    #[test]
    fn test_binary_junk_between_events_skipped() {
        let mut parser = EventStreamParser::new();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0x00, 0x00, 0x01, 0x8f]);
        bytes.extend_from_slice(br#"{"content":"a"}"#);
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(br#"{"stop":true}"#);
        let events = parser.feed(&bytes);
        assert_eq!(
            events,
            vec![
                UpstreamEvent::Content("a".into()),
                UpstreamEvent::ToolStop,
            ]
        );
    }

    #[test]
    fn test_split_event_across_feeds() {
        let mut parser = EventStreamParser::new();
        assert!(parser.feed(br#"{"content":"Hel"#).is_empty());
        let events = parser.feed(br#"lo"}"#);
        assert_eq!(events, vec![UpstreamEvent::Content("Hello".into())]);
    }

    #[test]
    fn test_split_mid_pattern() {
        let mut parser = EventStreamParser::new();
        assert!(parser.feed(b"junk{\"cont").is_empty());
        let events = parser.feed(br#"ent":"x"}"#);
        assert_eq!(events, vec![UpstreamEvent::Content("x".into())]);
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(br#"{"content":"fn main() { return; }"}"#);
        assert_eq!(
            events,
            vec![UpstreamEvent::Content("fn main() { return; }".into())]
        );
    }

    #[test]
    fn test_escaped_quotes_inside_strings() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(br#"{"content":"she said \"hi\" {"}"#);
        assert_eq!(
            events,
            vec![UpstreamEvent::Content(r#"she said "hi" {"#.into())]
        );
    }

    #[test]
    fn test_tool_start_event() {
        let mut parser = EventStreamParser::new();
        let events =
            parser.feed(br#"{"name":"get_weather","toolUseId":"t1","input":{"city":"NYC"}}"#);
        assert_eq!(
            events,
            vec![UpstreamEvent::ToolStart {
                name: "get_weather".into(),
                tool_use_id: "t1".into(),
                input: json!({"city": "NYC"}),
            }]
        );
    }

    #[test]
    fn test_tool_input_fragments() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(br#"{"input":"{\"a"}{"input":"1}"}"#);
        assert_eq!(
            events,
            vec![
                UpstreamEvent::ToolInput(Value::String("{\"a".into())),
                UpstreamEvent::ToolInput(Value::String("1}".into())),
            ]
        );
    }

    #[test]
    fn test_followup_prompt_recognized() {
        let mut parser = EventStreamParser::new();
        let events =
            parser.feed(br#"{"followupPrompt":{"content":"next?","userIntent":"EXPLAIN"}}"#);
        assert_eq!(events, vec![UpstreamEvent::FollowupPrompt]);
    }

    #[test]
    fn test_embedded_pattern_inside_content_string() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(br#"{"content":"example: {\"usage\": 1}"}"#);
        assert_eq!(
            events,
            vec![UpstreamEvent::Content(r#"example: {"usage": 1}"#.into())]
        );
    }

    // -- assembler -----------------------------------------------------------

    #[test]
    fn test_assembler_fragmented_arguments() {
        let mut asm = ToolCallAssembler::new();
        asm.start("f".into(), "t2".into(), Value::String(String::new()));
        asm.push_input(Value::String("{\"a\":".into()));
        asm.push_input(Value::String("1,\"b\":".into()));
        asm.push_input(Value::String("2}".into()));
        asm.stop();
        let calls = asm.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            serde_json::from_str::<Value>(&calls[0].arguments).unwrap(),
            json!({"a": 1, "b": 2})
        );
    }

    #[test]
    fn test_assembler_object_deep_merge() {
        let mut asm = ToolCallAssembler::new();
        asm.start("f".into(), "t1".into(), json!({"outer": {"a": 1}}));
        asm.push_input(json!({"outer": {"b": 2}, "top": true}));
        asm.stop();
        let calls = asm.finish();
        assert_eq!(
            serde_json::from_str::<Value>(&calls[0].arguments).unwrap(),
            json!({"outer": {"a": 1, "b": 2}, "top": true})
        );
    }

    #[test]
    fn test_assembler_new_start_finalizes_previous() {
        let mut asm = ToolCallAssembler::new();
        asm.start("first".into(), "t1".into(), json!({"x": 1}));
        asm.start("second".into(), "t2".into(), Value::String(String::new()));
        let calls = asm.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].name, "second");
        assert_eq!(calls[1].arguments, "{}");
    }

    #[test]
    fn test_assembler_unparseable_becomes_empty_object() {
        let mut asm = ToolCallAssembler::new();
        asm.start("f".into(), "t1".into(), Value::String("not json at all [[".into()));
        asm.stop();
        let calls = asm.finish();
        assert_eq!(calls[0].arguments, "{}");
    }

    #[test]
    fn test_assembler_generates_id_when_missing() {
        let mut asm = ToolCallAssembler::new();
        asm.start("f".into(), String::new(), Value::String(String::new()));
        let calls = asm.finish();
        assert!(calls[0].id.starts_with("toolu_"));
    }

    // -- bracket recovery ----------------------------------------------------

    #[test]
    fn test_bracket_recovery_basic() {
        let text = r#"Sure. [Called get_weather with args: {"city": "NYC"}] Done."#;
        let calls = recover_bracket_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(
            serde_json::from_str::<Value>(&calls[0].arguments).unwrap(),
            json!({"city": "NYC"})
        );
    }

    #[test]
    fn test_bracket_recovery_lookahead_exceeded() {
        // The object starts more than ten characters past the colon.
        let text = r#"[Called f with args:                {"a": 1}]"#;
        assert!(recover_bracket_tool_calls(text).is_empty());
    }

    #[test]
    fn test_bracket_recovery_requires_closing_bracket() {
        let text = r#"[Called f with args: {"a": 1} and more"#;
        assert!(recover_bracket_tool_calls(text).is_empty());
    }

    #[test]
    fn test_bracket_recovery_multiple() {
        let text = r#"[Called a with args: {"x":1}] mid [Called b with args: {"y":2}]"#;
        let calls = recover_bracket_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
    }

    // -- dedup ---------------------------------------------------------------

    #[test]
    fn test_dedup_keeps_longest_per_id() {
        let calls = vec![
            ToolCallRecord {
                id: "t1".into(),
                name: "f".into(),
                arguments: "{}".into(),
            },
            ToolCallRecord {
                id: "t1".into(),
                name: "f".into(),
                arguments: r#"{"a":1}"#.into(),
            },
        ];
        let out = dedup_tool_calls(calls);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].arguments, r#"{"a":1}"#);
    }

    #[test]
    fn test_dedup_by_name_and_arguments() {
        let calls = vec![
            ToolCallRecord {
                id: "t1".into(),
                name: "f".into(),
                arguments: r#"{"a":1}"#.into(),
            },
            ToolCallRecord {
                id: "t2".into(),
                name: "f".into(),
                arguments: r#"{"a":1}"#.into(),
            },
            ToolCallRecord {
                id: "t3".into(),
                name: "f".into(),
                arguments: r#"{"a":2}"#.into(),
            },
        ];
        let out = dedup_tool_calls(calls);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "t1");
        assert_eq!(out[1].id, "t3");
    }
}
