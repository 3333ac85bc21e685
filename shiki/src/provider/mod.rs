//! The LLM provider seam.
//!
//! Transports are out of scope for this crate: a [`Provider`] is anything
//! that can turn a [`ProviderRequest`] into a finite stream of
//! [`StreamEvent`]s. The turn engine owns demultiplexing, retries, and
//! cancellation; providers only produce events.

pub mod mock;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::AbortSignal;
use crate::error::Result;
use crate::message::Message;
use crate::stream::StreamEvent;
use crate::tool::FunctionTool;

pub use mock::MockProvider;

/// A boxed provider event stream.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Tool selection directive for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides whether to call tools.
    Auto,
    /// The model must call some tool.
    Required,
    /// The model must call the named tool.
    Tool {
        /// Name of the tool to call.
        #[serde(rename = "toolName")]
        tool_name: String,
    },
}

impl ToolChoice {
    /// Force the named tool.
    #[must_use]
    pub fn tool(name: impl Into<String>) -> Self {
        Self::Tool {
            tool_name: name.into(),
        }
    }
}

/// One streaming request to a provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Conversation messages, role-tagged.
    pub messages: Vec<Message>,
    /// Available tools in the provider function shape.
    pub tools: Vec<FunctionTool>,
    /// Optional tool selection directive.
    pub tool_choice: Option<ToolChoice>,
    /// Cancellation signal for the request.
    pub abort: AbortSignal,
    /// Optional completion token cap.
    pub max_tokens: Option<u32>,
    /// Optional sampling temperature.
    pub temperature: Option<f32>,
    /// Opaque provider-specific options, never parsed by the runtime.
    pub provider_options: Option<Value>,
}

impl ProviderRequest {
    /// Create a request from messages and tools.
    #[must_use]
    pub const fn new(messages: Vec<Message>, tools: Vec<FunctionTool>, abort: AbortSignal) -> Self {
        Self {
            messages,
            tools,
            tool_choice: None,
            abort,
            max_tokens: None,
            temperature: None,
            provider_options: None,
        }
    }

    /// Set the tool choice.
    #[must_use]
    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }
}

/// A streaming LLM source.
///
/// Implementations must yield events in provider-arrival order and must end
/// every successful stream with a `finish` event.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start one streaming request.
    async fn stream(&self, request: ProviderRequest) -> Result<EventStream>;
}

/// A named set of providers; agents select one by model policy name.
///
/// The `"default"` entry is used when an agent names no policy.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("names", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderSet {
    /// Create a set with a single `"default"` provider.
    #[must_use]
    pub fn single(provider: Arc<dyn Provider>) -> Self {
        let mut providers = HashMap::new();
        providers.insert("default".to_owned(), provider);
        Self { providers }
    }

    /// Insert a named provider.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    /// Resolve a provider by policy name, falling back to `"default"`.
    #[must_use]
    pub fn resolve(&self, name: Option<&str>) -> Option<Arc<dyn Provider>> {
        name.and_then(|n| self.providers.get(n))
            .or_else(|| self.providers.get("default"))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AbortController;

    #[test]
    fn tool_choice_serde() {
        let choice = ToolChoice::tool("task_snapshot");
        let json = serde_json::to_string(&choice).unwrap();
        assert!(json.contains("toolName"));
        assert!(json.contains("task_snapshot"));
    }

    #[test]
    fn provider_set_falls_back_to_default() {
        let provider: Arc<dyn Provider> = Arc::new(MockProvider::new(vec![]));
        let set = ProviderSet::single(Arc::clone(&provider));
        assert!(set.resolve(Some("missing")).is_some());
        assert!(set.resolve(None).is_some());
    }

    #[test]
    fn empty_set_resolves_nothing() {
        let set = ProviderSet::default();
        assert!(set.resolve(None).is_none());
    }

    #[test]
    fn request_builder() {
        let controller = AbortController::new();
        let request = ProviderRequest::new(vec![Message::user("hi")], vec![], controller.signal())
            .with_tool_choice(ToolChoice::Auto);
        assert_eq!(request.tool_choice, Some(ToolChoice::Auto));
    }
}
