//! The tool subsystem.
//!
//! Tools are the "Act" of the ReAct loop. A typed [`Tool`] implementation
//! is adapted into the object-safe [`ToolDyn`] for dynamic dispatch, looked
//! up by name in a first-registered-wins [`ToolSet`], advertised to the
//! provider as a [`FunctionTool`], and its [`ToolResult`] converted into
//! the provider wire shape by [`result::convert_tool_result`].

pub mod builtin;
pub mod result;
mod schema;
mod toolset;
mod traits;

pub use result::convert_tool_result;
pub use schema::FunctionTool;
pub use toolset::ToolSet;
pub use traits::{BoxedTool, FnTool, Tool, ToolDyn};

pub(crate) use traits::parse_args;
