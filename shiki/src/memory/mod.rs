//! Conversation memory management.
//!
//! Two layers:
//!
//! - the **working buffer**: the per-agent message list driven by the turn
//!   engine, with large-content pruning, snapshot compression, and
//!   continuity repair ([`working`], [`compress`]);
//! - the **dialogue buffer**: an optional outer chat layer with message
//!   ids, capacity policy, and prompt building ([`dialogue`]).
//!
//! Both share the token estimator in [`estimate`].

pub mod compress;
pub mod dialogue;
pub mod estimate;
pub mod working;

pub use compress::{first_tool_index, splice_snapshot, trim_to_last_tool, truncate_large_parts};
pub use dialogue::{DialogueMemory, DialogueMessage};
pub use estimate::{estimate_messages, estimate_text};
pub use working::{fix_discontinuous, prune_large_content};
