//! Tool schema normalization.
//!
//! Clients send tool definitions in any of seven shapes. Recognition is by
//! structure, not declared type: `has .function`, `has .toolSpecification`,
//! and so on, projected onto one canonical `{name, description,
//! input_schema}` shape.

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::models::canonical::NormalizedTool;

/// Tool names that are silently dropped.
const DROPPED_TOOL_NAMES: &[&str] = &["web_search", "websearch"];

/// Heading prefix used for extracted tool documentation.
const TOOL_DOC_HEADING: &str = "## Tool: ";

/// Normalize a batch of tool definitions, dropping unrecognized shapes and
/// blocked names.
pub fn normalize_tools(tools: &[Value]) -> Vec<NormalizedTool> {
    tools
        .iter()
        .filter_map(|t| match normalize_tool(t) {
            Some(tool) if DROPPED_TOOL_NAMES.contains(&tool.name.as_str()) => {
                debug!(tool = tool.name.as_str(), "Dropping blocked tool");
                None
            }
            Some(tool) => Some(tool),
            None => {
                warn!(raw = %t, "Unrecognized tool shape, skipping");
                None
            }
        })
        .collect()
}

/// Normalize one tool definition.
pub fn normalize_tool(tool: &Value) -> Option<NormalizedTool> {
    let obj = tool.as_object()?;

    // OpenAI function wrapper: {type:"function", function:{...}}.
    if let Some(function) = obj.get("function").and_then(Value::as_object) {
        return Some(NormalizedTool {
            name: str_field(function, "name")?,
            description: str_field(function, "description").unwrap_or_default(),
            input_schema: schema_or_empty(function.get("parameters")),
        });
    }

    // Upstream-native: {toolSpecification:{name, description, inputSchema:{json}}}.
    if let Some(spec) = obj.get("toolSpecification").and_then(Value::as_object) {
        let schema = spec
            .get("inputSchema")
            .and_then(|s| s.get("json"))
            .cloned();
        return Some(NormalizedTool {
            name: str_field(spec, "name")?,
            description: str_field(spec, "description").unwrap_or_default(),
            input_schema: schema_or_empty(schema.as_ref()),
        });
    }

    if let Some(name) = str_field(obj, "name") {
        let description = str_field(obj, "description").unwrap_or_default();
        // {name, input_schema | schema} or {name, parameters} or bare {name}.
        let schema = obj
            .get("input_schema")
            .or_else(|| obj.get("schema"))
            .or_else(|| obj.get("parameters"));
        return Some(NormalizedTool {
            name,
            description,
            input_schema: schema_or_empty(schema),
        });
    }

    // Id-keyed variants: {id, parameters} / {id, schema}.
    if let Some(id) = str_field(obj, "id") {
        let schema = obj.get("parameters").or_else(|| obj.get("schema"))?;
        return Some(NormalizedTool {
            name: id,
            description: str_field(obj, "description").unwrap_or_default(),
            input_schema: schema_or_empty(Some(schema)),
        });
    }

    None
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn schema_or_empty(schema: Option<&Value>) -> Value {
    match schema {
        Some(v) if v.is_object() => v.clone(),
        _ => json!({"type": "object", "properties": {}}),
    }
}

// ---------------------------------------------------------------------------
// Long-description extraction
// ---------------------------------------------------------------------------

/// Replace over-length tool descriptions with a cross-reference marker and
/// collect the full texts for the system prompt. `max_length` of zero
/// disables extraction.
pub fn extract_long_descriptions(
    tools: Vec<NormalizedTool>,
    max_length: usize,
) -> (Vec<NormalizedTool>, Option<String>) {
    if max_length == 0 {
        return (tools, None);
    }

    let mut sections: Vec<String> = Vec::new();
    let tools = tools
        .into_iter()
        .map(|mut tool| {
            if tool.description.len() > max_length {
                sections.push(format!(
                    "{TOOL_DOC_HEADING}{}\n\n{}",
                    tool.name, tool.description
                ));
                tool.description = format!(
                    "Full description moved to the system prompt, see \"{TOOL_DOC_HEADING}{}\"",
                    tool.name
                );
            }
            tool
        })
        .collect();

    let docs = if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    };
    (tools, docs)
}

/// Append the extracted tool documentation to a system prompt.
pub fn append_tool_docs(system: &str, docs: &str) -> String {
    let section = format!("---\n# Tool Documentation\n\n{docs}");
    if system.is_empty() {
        section
    } else {
        format!("{system}\n\n{section}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
