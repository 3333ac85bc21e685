//! Error types for the shiki runtime.
//!
//! A single [`Error`] enum covers every failure surface of the runtime:
//! cancellation, model/transport failures, tool dispatch, workflow structure,
//! and plan parsing. Cancellation is a distinguished kind so that retry and
//! stop-reason decisions can tell it apart from ordinary failures.

use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Execution was aborted, either by the task controller or a per-step
    /// controller. Never retried.
    #[error("Execution aborted: {reason}")]
    Aborted {
        /// Why the abort happened (e.g. "Abort", "Pause").
        reason: String,
    },

    /// Error from the model provider stream.
    #[error("Model error: {message}")]
    Model {
        /// The underlying error message.
        message: String,
    },

    /// Error during tool execution.
    #[error("Tool execution error in '{tool_name}': {message}")]
    ToolExecution {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
    },

    /// A workflow was structurally invalid (empty, unknown agent, cyclic or
    /// unresolved `depends_on`).
    #[error("Workflow error: {message}")]
    Workflow {
        /// Description of the structural problem.
        message: String,
    },

    /// The planner's final output failed the strict parse.
    #[error("Plan parse error: {message}")]
    PlanParse {
        /// The parsing error message.
        message: String,
    },

    /// Invalid runtime configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration issue.
        message: String,
    },

    /// No task is registered under the given id.
    #[error("Unknown task: {task_id}")]
    UnknownTask {
        /// The offending task id.
        task_id: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// The underlying error message.
        message: String,
    },
}

impl Error {
    /// Create an abort error with the given reason.
    #[must_use]
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Create a new model error.
    #[must_use]
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    /// Create a new tool execution error.
    #[must_use]
    pub fn tool_execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a new workflow structure error.
    #[must_use]
    pub fn workflow(message: impl Into<String>) -> Self {
        Self::Workflow {
            message: message.into(),
        }
    }

    /// Create a new plan parse error.
    #[must_use]
    pub fn plan_parse(message: impl Into<String>) -> Self {
        Self::PlanParse {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is a cancellation.
    ///
    /// Cancellation propagates out of every suspension point and is never
    /// retried; the task result records stop reason `abort`.
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_is_abort() {
        assert!(Error::aborted("Abort").is_abort());
        assert!(Error::aborted("Pause").is_abort());
    }

    #[test]
    fn other_kinds_are_not_abort() {
        assert!(!Error::model("boom").is_abort());
        assert!(!Error::tool_execution("t", "boom").is_abort());
        assert!(!Error::workflow("empty").is_abort());
    }

    #[test]
    fn display_includes_context() {
        let err = Error::tool_execution("browser_click", "element not found");
        let text = err.to_string();
        assert!(text.contains("browser_click"));
        assert!(text.contains("element not found"));
    }

    #[test]
    fn json_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{broken");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));
    }
}
