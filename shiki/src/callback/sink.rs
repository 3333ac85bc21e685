//! The callback sink trait.

use async_trait::async_trait;

use super::CallbackMessage;

/// An asynchronous sink for [`CallbackMessage`]s.
///
/// Implementations must be non-throwing: the method returns `()` and any
/// internal failure must be swallowed (or logged) by the sink itself. The
/// runtime invokes the sink from a single logical thread of execution per
/// task; ordering across tasks is unspecified.
#[async_trait]
pub trait TaskCallback: Send + Sync {
    /// Receive one message.
    async fn on_message(&self, message: CallbackMessage);
}
