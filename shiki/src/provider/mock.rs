//! Scripted mock provider for testing.
//!
//! Replays predefined event scripts in request order, records every request
//! for assertions, and tracks live streams so tests can verify the engine
//! releases its reader on every path.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::stream::StreamEvent;

use super::{EventStream, Provider, ProviderRequest, ToolChoice};

/// One scripted step of a mock stream.
#[derive(Debug, Clone)]
pub enum MockAction {
    /// Yield a stream event.
    Event(StreamEvent),
    /// Yield a transport error.
    Fail(String),
    /// Sleep this many milliseconds before the next action.
    Delay(u64),
    /// Never yield again; the stream pends until dropped.
    Hang,
}

impl From<StreamEvent> for MockAction {
    fn from(event: StreamEvent) -> Self {
        Self::Event(event)
    }
}

/// A recorded provider request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// The request messages.
    pub messages: Vec<Message>,
    /// Names of the offered tools.
    pub tool_names: Vec<String>,
    /// The tool choice, if any.
    pub tool_choice: Option<ToolChoice>,
}

/// A provider that replays scripts, one per request.
///
/// When scripts run out, the last script is replayed if `loop_last` is set;
/// otherwise the request fails.
pub struct MockProvider {
    scripts: Mutex<VecDeque<Vec<MockAction>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    live_streams: Arc<AtomicUsize>,
    max_live_streams: Arc<AtomicUsize>,
    request_count: AtomicUsize,
    loop_last: bool,
    last_script: Mutex<Option<Vec<MockAction>>>,
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("request_count", &self.request_count())
            .finish_non_exhaustive()
    }
}

impl MockProvider {
    /// Create a mock provider with the given scripts.
    #[must_use]
    pub fn new(scripts: Vec<Vec<MockAction>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            live_streams: Arc::new(AtomicUsize::new(0)),
            max_live_streams: Arc::new(AtomicUsize::new(0)),
            request_count: AtomicUsize::new(0),
            loop_last: false,
            last_script: Mutex::new(None),
        }
    }

    /// Replay the final script indefinitely once the queue is exhausted.
    #[must_use]
    pub const fn with_loop_last(mut self) -> Self {
        self.loop_last = true;
        self
    }

    /// Append another script.
    pub fn push_script(&self, script: Vec<MockAction>) {
        self.scripts.lock().expect("lock poisoned").push_back(script);
    }

    /// Number of stream requests made so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// All recorded requests.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }

    /// Number of streams created but not yet dropped.
    #[must_use]
    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live streams seen.
    #[must_use]
    pub fn max_live_streams(&self) -> usize {
        self.max_live_streams.load(Ordering::SeqCst)
    }
}

/// Decrements the live-stream counter when the stream is dropped.
struct StreamGuard(Arc<AtomicUsize>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn stream(&self, request: ProviderRequest) -> Result<EventStream> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("lock poisoned").push(RecordedRequest {
            messages: request.messages,
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            tool_choice: request.tool_choice,
        });

        let script = {
            let mut scripts = self.scripts.lock().expect("lock poisoned");
            match scripts.pop_front() {
                Some(script) => {
                    *self.last_script.lock().expect("lock poisoned") = Some(script.clone());
                    Some(script)
                }
                None if self.loop_last => self.last_script.lock().expect("lock poisoned").clone(),
                None => None,
            }
        };
        let Some(script) = script else {
            return Err(Error::model("mock provider has no script for this request"));
        };

        let live = self.live_streams.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live_streams.fetch_max(live, Ordering::SeqCst);
        let guard = StreamGuard(Arc::clone(&self.live_streams));

        let stream = async_stream::stream! {
            let _guard = guard;
            for action in script {
                match action {
                    MockAction::Event(event) => yield Ok(event),
                    MockAction::Fail(message) => {
                        yield Err(Error::model(message));
                        return;
                    }
                    MockAction::Delay(ms) => {
                        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                    }
                    MockAction::Hang => {
                        futures::future::pending::<()>().await;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Convenience builders for common scripts.
pub mod script {
    use crate::stream::{FinishReason, StreamEvent};
    use crate::usage::Usage;

    use super::MockAction;

    /// A plain text answer: start, one delta, end, finish(stop).
    #[must_use]
    pub fn text_answer(text: &str) -> Vec<MockAction> {
        vec![
            StreamEvent::TextStart.into(),
            StreamEvent::text_delta(text).into(),
            StreamEvent::TextEnd.into(),
            StreamEvent::finish(FinishReason::Stop, Usage::new(10, 5)).into(),
        ]
    }

    /// A single streamed tool call with the given JSON arguments.
    #[must_use]
    pub fn tool_call(id: &str, name: &str, input_json: &str) -> Vec<MockAction> {
        vec![
            StreamEvent::ToolInputStart {
                id: id.to_owned(),
                tool_name: name.to_owned(),
            }
            .into(),
            StreamEvent::ToolInputDelta {
                id: id.to_owned(),
                delta: input_json.to_owned(),
            }
            .into(),
            StreamEvent::tool_call(id, name, input_json).into(),
            StreamEvent::finish(FinishReason::ToolCalls, Usage::new(10, 5)).into(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;

    use super::*;
    use crate::context::AbortController;
    use crate::stream::FinishReason;

    fn request() -> ProviderRequest {
        ProviderRequest::new(
            vec![Message::user("hi")],
            vec![],
            AbortController::new().signal(),
        )
    }

    #[tokio::test]
    async fn replays_scripts_in_order() {
        let provider = MockProvider::new(vec![script::text_answer("one"), script::text_answer("two")]);

        for expected in ["one", "two"] {
            let mut stream = provider.stream(request()).await.unwrap();
            let mut text = String::new();
            while let Some(event) = stream.next().await {
                if let StreamEvent::TextDelta { delta } = event.unwrap() {
                    text.push_str(&delta);
                }
            }
            assert_eq!(text, expected);
        }
        assert_eq!(provider.request_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_scripts_fail_without_loop_last() {
        let provider = MockProvider::new(vec![]);
        assert!(provider.stream(request()).await.is_err());
    }

    #[tokio::test]
    async fn loop_last_replays_final_script() {
        let provider = MockProvider::new(vec![script::text_answer("again")]).with_loop_last();
        for _ in 0..3 {
            let mut stream = provider.stream(request()).await.unwrap();
            let mut finish = None;
            while let Some(event) = stream.next().await {
                if let StreamEvent::Finish { finish_reason, .. } = event.unwrap() {
                    finish = Some(finish_reason);
                }
            }
            assert_eq!(finish, Some(FinishReason::Stop));
        }
    }

    #[tokio::test]
    async fn live_streams_tracks_drop() {
        let provider = MockProvider::new(vec![script::text_answer("x")]);
        let stream = provider.stream(request()).await.unwrap();
        assert_eq!(provider.live_streams(), 1);
        drop(stream);
        assert_eq!(provider.live_streams(), 0);
    }

    #[tokio::test]
    async fn fail_action_yields_error() {
        let provider = MockProvider::new(vec![vec![
            StreamEvent::text_delta("partial").into(),
            MockAction::Fail("connection reset".into()),
        ]]);
        let mut stream = provider.stream(request()).await.unwrap();
        let first = stream.next().await.unwrap();
        assert!(first.is_ok());
        let second = stream.next().await.unwrap();
        assert!(second.is_err());
        assert!(stream.next().await.is_none());
    }
}
