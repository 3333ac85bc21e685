//! Multi-subscriber callback composition.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt as _;
use tracing::warn;

use super::{CallbackMessage, TaskCallback};

/// Fans every message out to a list of subscribers.
///
/// Subscribers are isolated from each other: a panicking subscriber is
/// caught and logged, and the remaining subscribers still receive the
/// message.
#[derive(Clone, Default)]
pub struct CompositeCallback {
    subscribers: Vec<Arc<dyn TaskCallback>>,
}

impl std::fmt::Debug for CompositeCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeCallback")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl CompositeCallback {
    /// Create an empty composition.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Add a subscriber.
    #[must_use]
    pub fn with(mut self, subscriber: Arc<dyn TaskCallback>) -> Self {
        self.subscribers.push(subscriber);
        self
    }
}

#[async_trait]
impl TaskCallback for CompositeCallback {
    async fn on_message(&self, message: CallbackMessage) {
        for subscriber in &self.subscribers {
            let delivery = std::panic::AssertUnwindSafe(subscriber.on_message(message.clone()))
                .catch_unwind()
                .await;
            if delivery.is_err() {
                warn!(task_id = %message.task_id, "Callback subscriber panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::callback::CallbackEvent;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl TaskCallback for Counting {
        async fn on_message(&self, _message: CallbackMessage) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    #[async_trait]
    impl TaskCallback for Panicking {
        async fn on_message(&self, _message: CallbackMessage) {
            panic!("subscriber failure");
        }
    }

    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl TaskCallback for Recording {
        async fn on_message(&self, message: CallbackMessage) {
            self.0.lock().unwrap().push(message.task_id);
        }
    }

    fn message() -> CallbackMessage {
        CallbackMessage::new("task-1", None, None, CallbackEvent::TaskStart {
            workflow_xml: String::new(),
        })
    }

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let a = Arc::new(Counting(AtomicUsize::new(0)));
        let b = Arc::new(Counting(AtomicUsize::new(0)));
        let composite = CompositeCallback::new()
            .with(Arc::clone(&a) as Arc<dyn TaskCallback>)
            .with(Arc::clone(&b) as Arc<dyn TaskCallback>);
        composite.on_message(message()).await;
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_block_others() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let composite = CompositeCallback::new()
            .with(Arc::new(Panicking) as Arc<dyn TaskCallback>)
            .with(Arc::clone(&counter) as Arc<dyn TaskCallback>);
        composite.on_message(message()).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn records_task_ids() {
        let recorder = Arc::new(Recording(Mutex::new(Vec::new())));
        let composite = CompositeCallback::new().with(Arc::clone(&recorder) as Arc<dyn TaskCallback>);
        composite.on_message(message()).await;
        assert_eq!(recorder.0.lock().unwrap().clone(), vec!["task-1"]);
    }
}
