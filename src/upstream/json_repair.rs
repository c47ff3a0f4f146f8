//! Tolerant JSON parsing.
//!
//! Model-produced tool arguments arrive as fragments and are frequently
//! malformed in small, predictable ways. Repairs are attempted in order on
//! top of each other; the first candidate that parses wins.

use serde_json::Value;
use tracing::trace;

/// Parse `input`, applying the repair sequence on failure.
///
/// Repair order: strip trailing commas, quote bare identifiers, truncate a
/// dangling escape at the tail, escape raw control characters in strings.
pub fn parse_tolerant(input: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(input) {
        return Some(v);
    }

    let mut candidate = strip_trailing_commas(input);
    if let Ok(v) = serde_json::from_str(&candidate) {
        trace!("JSON repaired: trailing commas");
        return Some(v);
    }

    candidate = quote_bare_identifiers(&candidate);
    if let Ok(v) = serde_json::from_str(&candidate) {
        trace!("JSON repaired: bare identifiers");
        return Some(v);
    }

    candidate = truncate_dangling_escape(&candidate);
    if let Ok(v) = serde_json::from_str(&candidate) {
        trace!("JSON repaired: dangling escape");
        return Some(v);
    }

    candidate = escape_control_chars(&candidate);
    if let Ok(v) = serde_json::from_str(&candidate) {
        trace!("JSON repaired: control characters");
        return Some(v);
    }

    None
}

/// Parse `input` as a JSON object, or return an empty object.
pub fn parse_object_or_empty(input: &str) -> Value {
    match parse_tolerant(input) {
        Some(v) if v.is_object() => v,
        _ => Value::Object(serde_json::Map::new()),
    }
}

/// Remove `,` immediately preceding a closing brace/bracket (outside strings).
fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
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
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                // Drop the comma when the next significant char closes a scope.
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Quote unquoted object keys and bare identifier values.
///
/// `true`, `false` and `null` stay as literals.
fn quote_bare_identifiers(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 8);
    let mut in_string = false;
    let mut escaped = false;
    let mut prev_significant: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            prev_significant = Some('"');
            out.push(c);
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            let next = chars[i..].iter().find(|ch| !ch.is_whitespace()).copied();

            let is_key =
                next == Some(':') && matches!(prev_significant, Some('{') | Some(','));
            let is_value = prev_significant == Some(':')
                && !matches!(ident.as_str(), "true" | "false" | "null")
                && matches!(next, Some(',') | Some('}') | Some(']') | None);

            if is_key || is_value {
                out.push('"');
                out.push_str(&ident);
                out.push('"');
            } else {
                out.push_str(&ident);
            }
            prev_significant = Some('"');
            continue;
        }
        if !c.is_whitespace() {
            prev_significant = Some(c);
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Drop an incomplete `\` or `\uXXXX` escape at the very end of the input.
fn truncate_dangling_escape(input: &str) -> String {
    let trailing_backslashes = input
        .chars()
        .rev()
        .take_while(|&c| c == '\\')
        .count();
    if trailing_backslashes % 2 == 1 {
        return input[..input.len() - 1].to_string();
    }

    // Incomplete unicode escape: `\u`, `\uA`, `\uAB`, `\uABC` at the tail.
    for hex_len in 0..4 {
        let suffix_len = 2 + hex_len;
        if input.len() < suffix_len || !input.is_char_boundary(input.len() - suffix_len) {
            continue;
        }
        let tail = &input[input.len() - suffix_len..];
        if tail.starts_with("\\u")
            && tail[2..].chars().all(|c| c.is_ascii_hexdigit())
            && tail[2..].chars().count() == hex_len
        {
            return input[..input.len() - suffix_len].to_string();
        }
    }
    input.to_string()
}

/// Replace raw control characters inside strings with `\uXXXX` escapes.
fn escape_control_chars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                c if (c as u32) < 0x20 => {
                    out.push_str(&format!("\\u{:04x}", c as u32));
                }
                _ => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
