//! Runtime configuration.
//!
//! All tunables live in an explicit [`Config`] struct threaded through the
//! task context. Each recognized key can be overridden per task by setting a
//! context variable of the same (camelCase) name; lookups resolve the
//! variable first and fall back to the global value.

use serde::{Deserialize, Serialize};

/// Global runtime tunables.
///
/// See the context-variable table in the crate docs for the per-task
/// override names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Enables concurrent execution of sibling agents in a parallel group.
    pub agent_parallel: bool,
    /// Enables concurrent tool dispatch within one assistant step.
    pub parallel_tool_calls: bool,
    /// Message-count threshold triggering snapshot compression.
    pub compress_threshold: usize,
    /// Estimated-token threshold triggering compression once the buffer has
    /// at least ten messages.
    pub compress_tokens_threshold: u64,
    /// Retry cap for stream failures and length finishes.
    pub max_retry_num: usize,
    /// Agent-loop iteration cap.
    pub max_react_num: usize,
    /// Truncation ceiling for individual text payloads.
    pub large_text_length: usize,
    /// Quota for image parts and for non-image file parts in the working
    /// buffer.
    pub max_dialogue_img_file_num: usize,
    /// Enables the result-check and todo-maintenance passes.
    pub expert_mode: bool,
    /// Iteration period for the todo-maintenance invocation.
    pub expert_mode_todo_loop_num: usize,
    /// Emit media inline in tool results instead of a synthesized user turn.
    pub tool_result_multimodal: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_parallel: false,
            parallel_tool_calls: true,
            compress_threshold: 50,
            compress_tokens_threshold: 80_000,
            max_retry_num: 3,
            max_react_num: 100,
            large_text_length: 5_000,
            max_dialogue_img_file_num: 1,
            expert_mode: false,
            expert_mode_todo_loop_num: 10,
            tool_result_multimodal: true,
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable expert mode.
    #[must_use]
    pub const fn with_expert_mode(mut self, on: bool) -> Self {
        self.expert_mode = on;
        self
    }

    /// Enable parallel agent execution.
    #[must_use]
    pub const fn with_agent_parallel(mut self, on: bool) -> Self {
        self.agent_parallel = on;
        self
    }

    /// Set the retry cap.
    #[must_use]
    pub const fn with_max_retry_num(mut self, n: usize) -> Self {
        self.max_retry_num = n;
        self
    }

    /// Set the agent-loop iteration cap.
    #[must_use]
    pub const fn with_max_react_num(mut self, n: usize) -> Self {
        self.max_react_num = n;
        self
    }

    /// Set the compression thresholds.
    #[must_use]
    pub const fn with_compress_thresholds(mut self, messages: usize, tokens: u64) -> Self {
        self.compress_threshold = messages;
        self.compress_tokens_threshold = tokens;
        self
    }

    /// Set the large-text truncation ceiling.
    #[must_use]
    pub const fn with_large_text_length(mut self, len: usize) -> Self {
        self.large_text_length = len;
        self
    }
}

/// Well-known context-variable keys recognized by the runtime.
pub mod keys {
    /// Enables concurrent execution of sibling agents.
    pub const AGENT_PARALLEL: &str = "agentParallel";
    /// Enables concurrent tool dispatch within one assistant step.
    pub const PARALLEL_TOOL_CALLS: &str = "parallelToolCalls";
    /// Message-count compression threshold.
    pub const COMPRESS_THRESHOLD: &str = "compressThreshold";
    /// Estimated-token compression threshold.
    pub const COMPRESS_TOKENS_THRESHOLD: &str = "compressTokensThreshold";
    /// Retry cap.
    pub const MAX_RETRY_NUM: &str = "maxRetryNum";
    /// Agent-loop iteration cap.
    pub const MAX_REACT_NUM: &str = "maxReactNum";
    /// Large-text truncation ceiling.
    pub const LARGE_TEXT_LENGTH: &str = "largeTextLength";
    /// Image/file quota in the working buffer.
    pub const MAX_DIALOGUE_IMG_FILE_NUM: &str = "maxDialogueImgFileNum";
    /// Expert-mode switch.
    pub const EXPERT_MODE: &str = "expertMode";
    /// Todo-maintenance period.
    pub const EXPERT_MODE_TODO_LOOP_NUM: &str = "expertModeTodoLoopNum";
    /// Inline media in tool results.
    pub const TOOL_RESULT_MULTIMODAL: &str = "toolResultMultimodal";
    /// Immediately terminate the agent with this value as the result.
    pub const FORCE_STOP: &str = "forceStop";
    /// Extra text appended to the planning prompt.
    pub const PLAN_EXT_PROMPT: &str = "plan_ext_prompt";
    /// Website hint injected into the planning prompt.
    pub const TASK_WEBSITE: &str = "task_website";
    /// Expert-mode todo list maintained by the todo manager.
    pub const TODO_LIST: &str = "todoList";
}
