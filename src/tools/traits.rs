use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Terminal status of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
    PermissionDenied,
}

/// Result of a tool execution.
///
/// Serialized as the content of a `tool` role message:
/// `{"status": "...", "output": "...", "error": ..., "metadata": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            output: output.into(),
            error: None,
            metadata: Map::new(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            output: String::new(),
            error: Some(error.into()),
            metadata: Map::new(),
        }
    }

    pub fn permission_denied(error: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::PermissionDenied,
            output: String::new(),
            error: Some(error.into()),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Keep any output produced before the failure (e.g. stdout of a failed command).
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// JSON wire form stored in the conversation.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"status":"error","output":"","error":"unserializable tool result: {e}","metadata":{{}}}}"#)
        })
    }

    pub fn from_wire(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Description of a tool for the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    /// Function-calling schema: `{"type": "function", "function": {name, description, parameters}}`.
    pub fn to_function_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Core tool trait. Implement for any capability the model may invoke.
///
/// `execute` may return `Err` for malformed arguments or unexpected I/O
/// failures; the agent loop converts those into an error [`ToolResult`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in model tool calls.
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON schema for the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Whether the permission manager must approve each invocation.
    fn requires_permission(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Fetch a required string argument.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("Missing '{key}' parameter"))
}

/// Fetch an optional non-negative integer argument. Accepts numeric strings;
/// fractional values round up.
pub(crate) fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    match args.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(ceil_u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(ceil_u64))
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn ceil_u64(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then(|| value.ceil() as u64)
}

/// Fetch an optional boolean argument. Accepts "true"/"false" strings.
pub(crate) fn optional_bool(args: &Value, key: &str) -> Option<bool> {
    match args.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct DummyTool;

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            "Dummy"
        }

        fn description(&self) -> &str {
            "A deterministic test tool"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "value": { "type": "string" } }
            })
        }

        async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::success(
                args.get("value").and_then(Value::as_str).unwrap_or_default(),
            ))
        }
    }

    #[test]
    fn spec_uses_tool_metadata() {
        let spec = DummyTool.spec();
        assert_eq!(spec.name, "Dummy");
        assert_eq!(spec.parameters["type"], "object");
        assert!(!DummyTool.requires_permission());
    }

    #[test]
    fn function_schema_has_function_wrapper() {
        let schema = DummyTool.spec().to_function_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "Dummy");
        assert_eq!(schema["function"]["parameters"]["properties"]["value"]["type"], "string");
    }

    #[tokio::test]
    async fn execute_returns_expected_output() {
        let result = DummyTool.execute(json!({ "value": "hello" })).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, "hello");
    }

    #[test]
    fn wire_form_uses_lowercase_status_strings() {
        let wire: Value = serde_json::from_str(&ToolResult::permission_denied("no").to_wire()).unwrap();
        assert_eq!(wire["status"], "permission_denied");
        assert_eq!(wire["error"], "no");
        assert_eq!(wire["metadata"], json!({}));

        let wire: Value = serde_json::from_str(&ToolResult::success("ok").to_wire()).unwrap();
        assert_eq!(wire["status"], "success");
        assert!(wire["error"].is_null());
    }

    #[test]
    fn wire_form_round_trips() {
        let original = ToolResult::error("boom")
            .with_output("partial")
            .with_metadata("return_code", 2)
            .with_metadata("command", "false");
        let parsed = ToolResult::from_wire(&original.to_wire()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn argument_helpers_accept_loose_types() {
        let args = json!({ "n": "12", "m": 3, "flag": "TRUE", "s": "x" });
        assert_eq!(optional_u64(&args, "n"), Some(12));
        assert_eq!(optional_u64(&args, "m"), Some(3));
        assert_eq!(optional_u64(&args, "missing"), None);
        assert_eq!(optional_u64(&json!({ "t": 30.5 }), "t"), Some(31));
        assert_eq!(optional_u64(&json!({ "t": "2.1" }), "t"), Some(3));
        assert_eq!(optional_u64(&json!({ "t": -4.0 }), "t"), None);
        assert_eq!(optional_bool(&args, "flag"), Some(true));
        assert_eq!(required_str(&args, "s").unwrap(), "x");
        assert!(required_str(&args, "missing")
            .unwrap_err()
            .to_string()
            .contains("Missing 'missing'"));
    }
}
