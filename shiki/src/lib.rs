#![cfg_attr(docsrs, feature(doc_cfg))]
//! Shiki is an LLM agent orchestration runtime: given a natural-language
//! task and a set of declared agents, it plans a workflow DAG of agent
//! invocations, drives each agent through a streaming ReAct loop, executes
//! the tool calls the model emits, and folds the results back into
//! subsequent reasoning — with pause/resume, abort, parallel agents,
//! context compression, and retry.
//!
//! Provider transports, MCP protocol clients, and side-effect backends are
//! external collaborators specified at trait seams ([`provider::Provider`],
//! [`discovery`], [`capability::Capability`]); the runtime itself keeps no
//! state on disk.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use shiki::prelude::*;
//!
//! let orchestrator = Orchestrator::new(Config::default(), ProviderSet::single(provider))
//!     .with_agent(Arc::new(BaseAgent::new("Chat", "Answers questions")));
//! let result = orchestrator.run("Say hello.").await;
//! assert_eq!(result.stop_reason, TaskStopReason::Done);
//! ```

// Core data model
pub mod error;
pub mod message;
pub mod stream;
pub mod usage;

// Execution state
pub mod chain;
pub mod config;
pub mod context;

// Callbacks
pub mod callback;

// Tools and capabilities
pub mod capability;
pub mod discovery;
pub mod tool;

// Memory
pub mod memory;

// Agents
pub mod agent;

// Planning and orchestration
pub mod orchestrator;
pub mod planner;
pub mod workflow;
pub mod workflow_xml;

// Providers
pub mod provider;

// Prompt text
pub mod prompts;

pub mod prelude;

pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, TaskResult, TaskStopReason};
