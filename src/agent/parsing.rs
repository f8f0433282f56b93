//! Tool call recovery.
//!
//! Models served by Ollama either return structured `tool_calls` or, when they
//! lack native function calling, write the call as JSON inside their reply.
//! Both paths end up as a list of [`ToolCall`]s with stable ids.

use crate::providers::ToolCall;
use serde_json::Value;
use std::collections::HashSet;

/// Id given to the `index`-th call of a batch that arrived without one.
pub fn synthesized_call_id(index: usize) -> String {
    format!("call_{index}")
}

/// Find the end position of a JSON object by tracking balanced braces.
///
/// `input` must start with `{`. Braces inside strings (including escaped
/// quotes) are ignored. Returns the byte offset just past the closing brace.
pub(crate) fn find_json_end(input: &str) -> Option<usize> {
    if !input.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in input.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

/// Arguments given as a JSON-encoded string are decoded; anything else is
/// kept as is.
fn normalize_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(raw) => serde_json::from_str::<Value>(raw.trim()).unwrap_or(Value::String(raw)),
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    }
}

/// `{"name": ..., "arguments": ...}` objects, or `None`.
fn as_call_object(value: &Value) -> Option<(String, Value)> {
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?.trim();
    let arguments = obj.get("arguments")?;
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), normalize_arguments(arguments.clone())))
}

/// Recover tool calls written as JSON in free text.
///
/// Every brace-balanced candidate is parsed on its own; objects carrying both
/// `name` and `arguments` become calls, in order of appearance. Candidates that
/// fail to parse or lack either key are skipped, but objects nested inside them
/// are still considered. Ids are `call_0`, `call_1`, ... within the result.
pub fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut pos = 0;

    while let Some(rel) = text[pos..].find('{') {
        let start = pos + rel;
        let candidate = &text[start..];

        let matched = find_json_end(candidate).and_then(|end| {
            serde_json::from_str::<Value>(&candidate[..end])
                .ok()
                .and_then(|value| as_call_object(&value))
                .map(|call| (call, end))
        });

        match matched {
            Some(((name, arguments), end)) => {
                calls.push(ToolCall::new(synthesized_call_id(calls.len()), name, arguments));
                pos = start + end;
            }
            None => pos = start + 1,
        }
    }

    calls
}

/// Extract the actual tool name and arguments from potentially nested structures.
///
/// Handles quirky model behaviour where calls are wrapped:
/// - `{"name": "tool_call", "arguments": {"name": "Bash", "arguments": {...}}}`
/// - `{"name": "tool.Bash", "arguments": {...}}`
fn unwrap_tool_name_and_args(name: &str, args: Value) -> (String, Value) {
    let args = normalize_arguments(args);

    if name == "tool_call"
        || name == "tool.call"
        || name.starts_with("tool_call>")
        || name.starts_with("tool_call<")
    {
        if let Some(nested_name) = args.get("name").and_then(Value::as_str) {
            let nested_args = args
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            tracing::debug!("Unwrapped nested tool call: {} -> {}", name, nested_name);
            return (nested_name.to_string(), normalize_arguments(nested_args));
        }
    }

    if let Some(stripped) = name.strip_prefix("tool.") {
        return (stripped.to_string(), args);
    }

    (name.to_string(), args)
}

/// Normalize native tool calls: unwrap wrappers, decode string arguments and
/// give id-less calls `call_<index>`.
pub fn from_native(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(index, call)| {
            let (name, arguments) = unwrap_tool_name_and_args(call.name.trim(), call.arguments);
            let id = if call.id.trim().is_empty() {
                synthesized_call_id(index)
            } else {
                call.id
            };
            ToolCall::new(id, name, arguments)
        })
        .collect()
}

/// Rename calls whose id is already in `used` (or repeated within the batch)
/// to the next free `call_<n>`.
pub fn assign_unique_ids(calls: &mut [ToolCall], used: &HashSet<String>) {
    let mut taken: HashSet<String> = used.clone();
    let mut next = used.len();
    for call in calls.iter_mut() {
        if taken.contains(&call.id) {
            while taken.contains(&synthesized_call_id(next)) {
                next += 1;
            }
            call.id = synthesized_call_id(next);
        }
        taken.insert(call.id.clone());
    }
}
