//! Built-in synthetic tools.
//!
//! These are added to an agent's tool set based on its workflow-node
//! features (variable I/O, `forEach`, `watch`), or driven locally by the
//! runtime (`task_snapshot`, `task_result_check`, `todo_list_manager`).

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::config::keys;
use crate::context::AgentContext;
use crate::error::Result;
use crate::message::{ToolCallPart, ToolResult};
use crate::workflow::{WorkflowAgent, nodes_to_xml};

use super::{FunctionTool, Tool};

// ── variable_storage ─────────────────────────────────────────────────────

/// Operation selector for [`VariableStorage`].
#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VariableOp {
    /// Read a variable.
    Get,
    /// Write a variable.
    Set,
    /// List variable names.
    List,
}

/// Arguments of [`VariableStorage`].
#[derive(Debug, Deserialize, JsonSchema)]
pub struct VariableStorageArgs {
    /// The operation to perform.
    pub operation: VariableOp,
    /// Variable name (required for get/set).
    pub name: Option<String>,
    /// Value to store (required for set).
    pub value: Option<Value>,
}

/// Read/write access to the task's variable map, for workflow nodes that
/// declare `input`/`output` variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableStorage;

impl Tool for VariableStorage {
    const NAME: &'static str = "variable_storage";

    type Args = VariableStorageArgs;

    fn description(&self) -> String {
        "Read and write task variables shared between workflow nodes. \
         Use operation=get/set with a name, or operation=list."
            .to_owned()
    }

    fn support_parallel_calls(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        args: VariableStorageArgs,
        ctx: &AgentContext,
        _call: &ToolCallPart,
    ) -> Result<ToolResult> {
        let task = ctx.task();
        Ok(match args.operation {
            VariableOp::Get => {
                let Some(name) = args.name else {
                    return Ok(ToolResult::error("missing variable name"));
                };
                match task.get_variable(&name) {
                    Some(value) => ToolResult::text(value.to_string()),
                    None => ToolResult::text(format!("variable `{name}` is not set")),
                }
            }
            VariableOp::Set => {
                let Some(name) = args.name else {
                    return Ok(ToolResult::error("missing variable name"));
                };
                task.set_variable(name, args.value.unwrap_or(Value::Null));
                ToolResult::text("Successful")
            }
            VariableOp::List => {
                let mut names: Vec<String> = task.variables().into_keys().collect();
                names.sort();
                ToolResult::text(serde_json::to_string(&names).unwrap_or_default())
            }
        })
    }
}

// ── foreach_task ─────────────────────────────────────────────────────────

/// Arguments of [`ForeachTask`].
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ForeachTaskArgs {
    /// The items to iterate: a JSON array, or the name of a list variable.
    pub items: Value,
}

/// Expands a `forEach` node's item source into an enumerated list the model
/// works through one by one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForeachTask;

impl Tool for ForeachTask {
    const NAME: &'static str = "foreach_task";

    type Args = ForeachTaskArgs;

    fn description(&self) -> String {
        "Resolve the item list of a forEach step. Pass the items array, or \
         the name of a variable holding it; returns the enumerated items to \
         process in order."
            .to_owned()
    }

    async fn execute(
        &self,
        args: ForeachTaskArgs,
        ctx: &AgentContext,
        _call: &ToolCallPart,
    ) -> Result<ToolResult> {
        let items = match args.items {
            Value::String(name) => match ctx.task().get_variable(&name) {
                Some(Value::Array(items)) => items,
                Some(other) => vec![other],
                None => {
                    return Ok(ToolResult::error(format!("variable `{name}` is not set")));
                }
            },
            Value::Array(items) => items,
            other => vec![other],
        };
        if items.is_empty() {
            return Ok(ToolResult::text("No items to process"));
        }
        let listing = items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(s) => format!("{}. {s}", i + 1),
                other => format!("{}. {other}", i + 1),
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolResult::text(format!(
            "Process the following {} items in order:\n{listing}",
            items.len()
        )))
    }
}

// ── watch_trigger ────────────────────────────────────────────────────────

/// Arguments of [`WatchTrigger`].
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WatchTriggerArgs {
    /// What condition is being watched.
    pub description: String,
}

/// Marker tool for `watch` nodes. The runtime does not deliver external
/// events itself; the host environment owns the watch and re-enters the
/// task when it fires. This tool only records the armed condition.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchTrigger;

impl Tool for WatchTrigger {
    const NAME: &'static str = "watch_trigger";

    type Args = WatchTriggerArgs;

    fn description(&self) -> String {
        "Arm an event watch described by the current workflow node. Returns \
         immediately; the hosting environment delivers the event."
            .to_owned()
    }

    async fn execute(
        &self,
        args: WatchTriggerArgs,
        ctx: &AgentContext,
        _call: &ToolCallPart,
    ) -> Result<ToolResult> {
        ctx.task()
            .set_variable("watch_description", Value::String(args.description.clone()));
        Ok(ToolResult::text(format!(
            "Watch armed: {}. Continue with the remaining steps; the host \
             environment will deliver the event.",
            args.description
        )))
    }
}

// ── task_snapshot (runtime-executed) ─────────────────────────────────────

/// Arguments of the `task_snapshot` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TaskSnapshotArgs {
    /// Ids of workflow-node steps already completed.
    #[serde(rename = "doneIds", default)]
    pub done_ids: Vec<usize>,
    /// Natural-language snapshot of progress so far.
    #[serde(rename = "taskSnapshot")]
    pub task_snapshot: String,
}

/// The `task_snapshot` schema offered during compression.
#[must_use]
pub fn task_snapshot_schema() -> FunctionTool {
    FunctionTool::new(
        "task_snapshot",
        "Record a snapshot of task progress: the ids of completed steps and \
         a dense natural-language summary of everything done and learned so \
         far.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "doneIds": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "Ids of completed node steps"
                },
                "taskSnapshot": {
                    "type": "string",
                    "description": "Dense summary of progress, findings and pending work"
                }
            },
            "required": ["taskSnapshot"]
        }),
    )
}

/// Execute `task_snapshot` locally: annotate the node body with done/todo
/// status and concatenate it with the model's snapshot text.
#[must_use]
pub fn execute_task_snapshot(node: Option<&WorkflowAgent>, args: &TaskSnapshotArgs) -> ToolResult {
    let mut text = args.task_snapshot.clone();
    if let Some(node) = node {
        let annotated = nodes_to_xml(&node.nodes, Some(&args.done_ids));
        text.push_str("\n\nTask step status:\n");
        text.push_str(&annotated);
    }
    ToolResult::text(text)
}

// ── task_result_check (runtime-executed, expert mode) ────────────────────

/// Arguments of the `task_result_check` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TaskResultCheckArgs {
    /// Whether the task is fully complete.
    pub completed: bool,
    /// Why the task is or is not complete.
    #[serde(default)]
    pub reason: String,
}

/// The `task_result_check` schema forced in expert mode.
#[must_use]
pub fn task_result_check_schema() -> FunctionTool {
    FunctionTool::new(
        "task_result_check",
        "Judge whether the produced answer fully completes the assigned \
         task. Report completed=false with a reason when work remains.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "completed": { "type": "boolean" },
                "reason": { "type": "string" }
            },
            "required": ["completed"]
        }),
    )
}

// ── todo_list_manager (runtime-executed, expert mode) ────────────────────

/// Arguments of the `todo_list_manager` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TodoListManagerArgs {
    /// The updated todo list in Markdown.
    #[serde(rename = "todoList")]
    pub todo_list: String,
}

/// The `todo_list_manager` schema forced periodically in expert mode.
#[must_use]
pub fn todo_list_manager_schema() -> FunctionTool {
    FunctionTool::new(
        "todo_list_manager",
        "Rewrite the running todo list: keep finished items checked off and \
         list the remaining work in priority order.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "todoList": { "type": "string" }
            },
            "required": ["todoList"]
        }),
    )
}

/// Apply a todo update to the task variables.
pub fn apply_todo_update(ctx: &AgentContext, args: &TodoListManagerArgs) {
    ctx.task()
        .set_variable(keys::TODO_LIST, Value::String(args.todo_list.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{NodeStatus, TaskNode};

    fn node() -> WorkflowAgent {
        WorkflowAgent {
            id: "0".to_owned(),
            name: "Coder".to_owned(),
            task: "write code".to_owned(),
            depends_on: Vec::new(),
            status: NodeStatus::Running,
            xml: String::new(),
            nodes: vec![
                TaskNode::Normal {
                    id: 0,
                    text: "read".to_owned(),
                    input: None,
                    output: None,
                },
                TaskNode::Normal {
                    id: 1,
                    text: "write".to_owned(),
                    input: None,
                    output: None,
                },
            ],
        }
    }

    #[test]
    fn snapshot_concatenates_summary_and_annotated_nodes() {
        let args = TaskSnapshotArgs {
            done_ids: vec![0],
            task_snapshot: "Read the file already.".to_owned(),
        };
        let result = execute_task_snapshot(Some(&node()), &args);
        let text = match &result.content[0] {
            crate::message::ResultContent::Text { text } => text.clone(),
            _ => panic!("expected text"),
        };
        assert!(text.starts_with("Read the file already."));
        assert!(text.contains("<node status=\"done\">read</node>"));
        assert!(text.contains("<node status=\"todo\">write</node>"));
    }

    #[test]
    fn snapshot_without_node_is_just_summary() {
        let args = TaskSnapshotArgs {
            done_ids: vec![],
            task_snapshot: "summary".to_owned(),
        };
        let result = execute_task_snapshot(None, &args);
        assert_eq!(result, ToolResult::text("summary"));
    }

    #[test]
    fn snapshot_args_parse_wire_names() {
        let args: TaskSnapshotArgs =
            serde_json::from_str(r#"{"doneIds": [1, 2], "taskSnapshot": "s"}"#).unwrap();
        assert_eq!(args.done_ids, vec![1, 2]);
        assert_eq!(args.task_snapshot, "s");
    }

    #[test]
    fn schemas_are_function_shaped() {
        for schema in [
            task_snapshot_schema(),
            task_result_check_schema(),
            todo_list_manager_schema(),
        ] {
            assert_eq!(schema.kind, "function");
            assert!(schema.input_schema.get("properties").is_some());
        }
    }
}
