//! No-op callback sink.

use async_trait::async_trait;

use super::{CallbackMessage, TaskCallback};

/// A sink that discards every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallback;

#[async_trait]
impl TaskCallback for NoopCallback {
    async fn on_message(&self, _message: CallbackMessage) {}
}
