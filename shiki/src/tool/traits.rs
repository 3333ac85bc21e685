//! Core tool traits.

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::AgentContext;
use crate::error::{Error, Result};
use crate::message::{ToolCallPart, ToolResult};

/// A boxed, thread-safe dynamic tool.
pub type BoxedTool = std::sync::Arc<dyn ToolDyn>;

/// A typed LLM tool.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(serde::Deserialize, schemars::JsonSchema)]
/// struct AddArgs { a: i64, b: i64 }
///
/// struct Adder;
///
/// impl Tool for Adder {
///     const NAME: &'static str = "add";
///     type Args = AddArgs;
///
///     fn description(&self) -> String {
///         "Add two numbers".into()
///     }
///
///     async fn execute(
///         &self,
///         args: AddArgs,
///         _ctx: &AgentContext,
///         _call: &ToolCallPart,
///     ) -> Result<ToolResult> {
///         Ok(ToolResult::text((args.a + args.b).to_string()))
///     }
/// }
/// ```
pub trait Tool: Send + Sync + 'static {
    /// The unique tool name.
    const NAME: &'static str;

    /// The argument type, deserialized from the model's JSON input.
    type Args: DeserializeOwned + JsonSchema + Send;

    /// Human/model-facing description.
    fn description(&self) -> String;

    /// JSON Schema of the arguments. The default derives it from
    /// [`Self::Args`].
    fn parameters(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(Self::Args)).unwrap_or_else(|_| {
            serde_json::json!({ "type": "object" })
        })
    }

    /// Excluded from planning prompts when `true`.
    fn no_plan(&self) -> bool {
        false
    }

    /// Whether this tool may run concurrently with others in one step.
    fn support_parallel_calls(&self) -> bool {
        false
    }

    /// Execute the tool.
    fn execute(
        &self,
        args: Self::Args,
        ctx: &AgentContext,
        call: &ToolCallPart,
    ) -> impl Future<Output = Result<ToolResult>> + Send;
}

/// Object-safe wrapper trait for dynamic dispatch of tools.
pub trait ToolDyn: Send + Sync {
    /// The tool name. Lookup is case-sensitive.
    fn name(&self) -> String;

    /// Human/model-facing description.
    fn description(&self) -> String;

    /// JSON Schema of the arguments.
    fn parameters(&self) -> Value;

    /// Excluded from planning prompts when `true`.
    fn no_plan(&self) -> bool {
        false
    }

    /// Whether this tool may run concurrently with others in one step.
    fn support_parallel_calls(&self) -> bool {
        false
    }

    /// Execute with JSON arguments (object, or JSON text in a string).
    fn execute<'a>(
        &'a self,
        args: Value,
        ctx: &'a AgentContext,
        call: &'a ToolCallPart,
    ) -> BoxFuture<'a, Result<ToolResult>>;
}

/// Parse tool arguments that may arrive as a JSON object or as JSON text
/// wrapped in a string.
pub(crate) fn parse_args<T: DeserializeOwned>(tool_name: &str, args: Value) -> Result<T> {
    let result = match args {
        Value::String(s) => serde_json::from_str(&s),
        other => serde_json::from_value(other),
    };
    result.map_err(|e| Error::tool_execution(tool_name, format!("invalid arguments: {e}")))
}

impl<T: Tool> ToolDyn for T {
    fn name(&self) -> String {
        Self::NAME.to_owned()
    }

    fn description(&self) -> String {
        Tool::description(self)
    }

    fn parameters(&self) -> Value {
        Tool::parameters(self)
    }

    fn no_plan(&self) -> bool {
        Tool::no_plan(self)
    }

    fn support_parallel_calls(&self) -> bool {
        Tool::support_parallel_calls(self)
    }

    fn execute<'a>(
        &'a self,
        args: Value,
        ctx: &'a AgentContext,
        call: &'a ToolCallPart,
    ) -> BoxFuture<'a, Result<ToolResult>> {
        Box::pin(async move {
            let args = parse_args::<T::Args>(Self::NAME, args)?;
            Tool::execute(self, args, ctx, call).await
        })
    }
}

/// A tool assembled from closures, for hosts that do not want a dedicated
/// type per tool.
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    support_parallel_calls: bool,
    #[allow(clippy::type_complexity)]
    handler: Box<
        dyn for<'a> Fn(Value, &'a AgentContext) -> BoxFuture<'a, Result<ToolResult>> + Send + Sync,
    >,
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish()
    }
}

impl FnTool {
    /// Create a closure-backed tool.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: impl for<'a> Fn(Value, &'a AgentContext) -> BoxFuture<'a, Result<ToolResult>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            support_parallel_calls: false,
            handler: Box::new(handler),
        }
    }

    /// Mark the tool as safe for parallel dispatch.
    #[must_use]
    pub const fn with_parallel_calls(mut self) -> Self {
        self.support_parallel_calls = true;
        self
    }
}

impl ToolDyn for FnTool {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn support_parallel_calls(&self) -> bool {
        self.support_parallel_calls
    }

    fn execute<'a>(
        &'a self,
        args: Value,
        ctx: &'a AgentContext,
        _call: &'a ToolCallPart,
    ) -> BoxFuture<'a, Result<ToolResult>> {
        (self.handler)(args, ctx)
    }
}
