//! Task lifecycle callbacks.
//!
//! Every layer of the runtime publishes tagged [`CallbackMessage`]s to a
//! single [`TaskCallback`] sink: task and plan lifecycle, workflow changes,
//! agent starts/results, LLM streaming deltas, and tool dispatch. Sinks are
//! non-throwing; a multi-subscriber composition isolates subscribers from
//! each other.

mod composite;
mod message;
mod noop;
mod sink;

pub use composite::CompositeCallback;
pub use message::{CallbackEvent, CallbackMessage};
pub use noop::NoopCallback;
pub use sink::TaskCallback;
