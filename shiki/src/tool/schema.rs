//! Provider-facing tool schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ToolDyn;

/// A tool in the provider function shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// JSON Schema of the arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl FunctionTool {
    /// Create a function tool.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            kind: "function".to_owned(),
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Wrap a dynamic tool into the provider shape.
    #[must_use]
    pub fn from_tool(tool: &dyn ToolDyn) -> Self {
        Self::new(tool.name(), tool.description(), tool.parameters())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_wire_keys() {
        let tool = FunctionTool::new("add", "Add numbers", serde_json::json!({"type": "object"}));
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["type"], "function");
        assert!(json.get("inputSchema").is_some());
    }
}
